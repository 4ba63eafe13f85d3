//! Bounded sample buffer with disk overflow
//!
//! The collector appends one row per tick. Once the in-memory table grows
//! past its capacity, the oldest block is written to the [`OverflowStore`]
//! and evicted, both under the same lock, so a reader sees every row either
//! in memory or on disk and never in both.
//!
//! ```text
//! append ──► [ r0 r1 ... r(capacity) ]  len > capacity
//!               └── block ──┘
//!                   │ write, then evict
//!                   ▼
//!            overflow.csv (header + archived rows)
//! ```

use super::overflow::OverflowStore;
use crate::config::CollectionSettings;
use crate::error::{Result, ThrustRigError};
use crate::types::{SampleRow, COLUMNS};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

struct BufferInner {
    rows: VecDeque<SampleRow>,
    store: OverflowStore,
}

/// Thread-safe bounded buffer of sample rows
pub struct SampleBuffer {
    inner: Mutex<BufferInner>,
    capacity: usize,
    block: usize,
}

impl SampleBuffer {
    /// Create a buffer over an existing store
    pub fn new(capacity: usize, block: usize, store: OverflowStore) -> Result<Self> {
        if capacity == 0 || block == 0 || block > capacity {
            return Err(ThrustRigError::Configuration(format!(
                "invalid buffer bounds: capacity {}, block {}",
                capacity, block
            )));
        }
        Ok(Self {
            inner: Mutex::new(BufferInner {
                rows: VecDeque::with_capacity(capacity + 1),
                store,
            }),
            capacity,
            block,
        })
    }

    /// Create a buffer and a fresh overflow store from settings
    pub fn from_settings(settings: &CollectionSettings) -> Result<Self> {
        settings.validate()?;
        let store = OverflowStore::create(settings.resolved_overflow_path()?)?;
        Self::new(settings.buffer_capacity, settings.archive_block, store)
    }

    fn lock(&self) -> MutexGuard<'_, BufferInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn block(&self) -> usize {
        self.block
    }

    /// Rows currently held in memory
    pub fn len(&self) -> usize {
        self.lock().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rows moved to disk since creation or the last reset
    pub fn archived(&self) -> usize {
        self.lock().store.rows()
    }

    pub fn overflow_path(&self) -> PathBuf {
        self.lock().store.path().to_path_buf()
    }

    /// Append a row, archiving the oldest blocks while over capacity
    ///
    /// Returns the number of rows archived by this call. The row itself is
    /// always kept; on an archive error the unwritten blocks stay in memory
    /// and the next append catches up on the whole backlog.
    pub fn append(&self, row: SampleRow) -> Result<usize> {
        let mut inner = self.lock();
        inner.rows.push_back(row);

        let BufferInner { rows, store } = &mut *inner;
        let mut archived = 0;
        while rows.len() > self.capacity {
            let written = match store.append_rows(rows.iter().take(self.block)) {
                Ok(written) => written,
                Err(e) if archived > 0 => {
                    tracing::warn!("Archiving stopped after {} rows: {}", archived, e);
                    break;
                }
                Err(e) => return Err(e),
            };
            rows.drain(..written);
            archived += written;
        }
        if archived > 0 {
            tracing::debug!("Archived {} rows, {} left in memory", archived, rows.len());
        }
        Ok(archived)
    }

    /// Move every in-memory row to the overflow store
    ///
    /// Used when a run ends so the store alone holds the complete session.
    pub fn archive_remaining(&self) -> Result<usize> {
        let mut inner = self.lock();
        let BufferInner { rows, store } = &mut *inner;
        let archived = store.append_rows(rows.iter())?;
        rows.clear();
        Ok(archived)
    }

    /// Copy of the in-memory rows, oldest first
    pub fn window(&self) -> Vec<SampleRow> {
        self.lock().rows.iter().cloned().collect()
    }

    /// Drop every in-memory row and start a fresh overflow store
    pub fn reset(&self) -> Result<()> {
        let mut inner = self.lock();
        inner.rows.clear();
        inner.store.reset()
    }

    /// Header, archived rows, then in-memory rows as delimited text
    pub fn export(&self) -> Result<Vec<u8>> {
        let inner = self.lock();
        let archived = inner.store.read_records()?;

        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(COLUMNS)?;
        for record in &archived {
            writer.write_record(record)?;
        }
        for row in &inner.rows {
            writer.write_record(row.to_record())?;
        }
        Ok(writer.into_inner()?)
    }
}
