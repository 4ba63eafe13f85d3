//! Disk overflow store
//!
//! A delimited text file holding rows evicted from the in-memory buffer, in
//! eviction order, below the fixed column header. Only the sample buffer
//! writes to it, always while holding its lock.

use crate::error::{Result, ResultExt, ThrustRigError};
use crate::types::{SampleRow, COLUMNS};
use csv::StringRecord;
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Render records as delimited text, one line each
pub(crate) fn encode_records<I, R, T>(records: I) -> Result<Vec<u8>>
where
    I: IntoIterator<Item = R>,
    R: IntoIterator<Item = T>,
    T: AsRef<[u8]>,
{
    let mut writer = csv::Writer::from_writer(Vec::new());
    for record in records {
        writer.write_record(record)?;
    }
    Ok(writer.into_inner()?)
}

/// Append-only overflow file
#[derive(Debug)]
pub struct OverflowStore {
    path: PathBuf,
    file: File,
    rows: usize,
}

impl OverflowStore {
    /// Create (or truncate) the store and write a fresh header
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .context(format!("Failed to create overflow directory {:?}", parent))?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .context(format!("Failed to open overflow store {:?}", path))?;

        let mut store = Self { path, file, rows: 0 };
        store.write_header()?;
        tracing::debug!("Overflow store ready at {:?}", store.path);
        Ok(store)
    }

    fn write_header(&mut self) -> Result<()> {
        let header = encode_records([COLUMNS])?;
        self.file
            .write_all(&header)
            .and_then(|_| self.file.flush())
            .context("Failed to write overflow header")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rows written since creation or the last reset
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Append rows in order with a single write
    ///
    /// On failure the file is cut back to its previous length so a retry
    /// cannot duplicate rows.
    pub fn append_rows<'a, I>(&mut self, rows: I) -> Result<usize>
    where
        I: IntoIterator<Item = &'a SampleRow>,
    {
        let records: Vec<Vec<String>> = rows.into_iter().map(SampleRow::to_record).collect();
        let count = records.len();
        if count == 0 {
            return Ok(0);
        }
        let data = encode_records(records)?;

        let before = self.file.seek(SeekFrom::End(0)).context("Failed to seek overflow store")?;
        let written = self.file.write_all(&data).and_then(|_| self.file.flush());
        if let Err(e) = written {
            if let Err(rollback) = self.file.set_len(before) {
                tracing::error!("Failed to roll back overflow store: {}", rollback);
            }
            return Err(e).context(format!("Failed to archive {} rows to {:?}", count, self.path));
        }

        self.rows += count;
        Ok(count)
    }

    /// Every archived record below the header, in write order
    pub fn read_records(&self) -> Result<Vec<StringRecord>> {
        let read = || -> std::result::Result<Vec<StringRecord>, csv::Error> {
            let mut reader = csv::ReaderBuilder::new().has_headers(true).from_path(&self.path)?;
            let records = reader.records().collect();
            records
        };
        read()
            .map_err(ThrustRigError::from)
            .context(format!("Failed to read overflow store {:?}", self.path))
    }

    /// Truncate and write a fresh header
    pub fn reset(&mut self) -> Result<()> {
        self.file.set_len(0).context("Failed to truncate overflow store")?;
        self.file.seek(SeekFrom::Start(0)).context("Failed to rewind overflow store")?;
        self.rows = 0;
        self.write_header()
    }

    /// Swap the handle for a read-only one so appends fail
    #[cfg(test)]
    pub(crate) fn make_read_only(&mut self) -> Result<()> {
        self.file = File::open(&self.path).context("Failed to reopen overflow store")?;
        Ok(())
    }

    /// Reopen for appending after [`make_read_only`](Self::make_read_only)
    #[cfg(test)]
    pub(crate) fn make_writable(&mut self) -> Result<()> {
        self.file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .context("Failed to reopen overflow store")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Local;

    fn row(v: f64) -> SampleRow {
        SampleRow::from_readings(Local::now(), &[Some(v), None, None, None, None, None, None]).unwrap()
    }

    fn fields(records: &[StringRecord]) -> Vec<Vec<String>> {
        records
            .iter()
            .map(|r| r.iter().map(str::to_string).collect())
            .collect()
    }

    #[test]
    fn test_create_writes_header_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("overflow.csv");
        let store = OverflowStore::create(&path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, format!("{}\n", COLUMNS.join(",")));
        assert!(store.read_records().unwrap().is_empty());
        assert_eq!(store.rows(), 0);
    }

    #[test]
    fn test_create_truncates_previous_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("overflow.csv");
        std::fs::write(&path, "stale\nrows\n").unwrap();

        let store = OverflowStore::create(&path).unwrap();
        assert!(store.read_records().unwrap().is_empty());
    }

    #[test]
    fn test_rows_are_appended_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = OverflowStore::create(dir.path().join("overflow.csv")).unwrap();

        let first = [row(1.0), row(2.0)];
        let second = [row(3.0)];
        assert_eq!(store.append_rows(&first).unwrap(), 2);
        assert_eq!(store.append_rows(&second).unwrap(), 1);
        assert_eq!(store.append_rows(&[]).unwrap(), 0);

        let expected: Vec<Vec<String>> = first.iter().chain(second.iter()).map(SampleRow::to_record).collect();
        assert_eq!(fields(&store.read_records().unwrap()), expected);
        assert_eq!(store.rows(), 3);
    }

    #[test]
    fn test_missing_values_are_empty_fields_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("overflow.csv");
        let mut store = OverflowStore::create(&path).unwrap();
        store.append_rows(&[row(2.5)]).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let line = content.lines().nth(1).unwrap();
        assert!(line.ends_with(",2.5,,,,,,"), "unexpected line {:?}", line);
    }

    #[test]
    fn test_failed_append_leaves_store_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = OverflowStore::create(dir.path().join("overflow.csv")).unwrap();
        store.append_rows(&[row(1.0)]).unwrap();

        store.make_read_only().unwrap();
        assert!(store.append_rows(&[row(2.0)]).is_err());
        assert_eq!(store.rows(), 1);

        store.make_writable().unwrap();
        store.append_rows(&[row(3.0)]).unwrap();
        let values: Vec<String> = store.read_records().unwrap().iter().map(|r| r[1].to_string()).collect();
        assert_eq!(values, ["1", "3"]);
    }

    #[test]
    fn test_reset_starts_over() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = OverflowStore::create(dir.path().join("overflow.csv")).unwrap();
        store.append_rows(&[row(1.0)]).unwrap();

        store.reset().unwrap();
        assert!(store.read_records().unwrap().is_empty());
        assert_eq!(store.rows(), 0);

        store.append_rows(&[row(9.0)]).unwrap();
        assert_eq!(&store.read_records().unwrap()[0][1], "9");
    }
}
