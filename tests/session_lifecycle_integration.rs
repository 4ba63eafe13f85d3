//! Integration tests for the session lifecycle
//!
//! These tests drive a [`Session`] end to end over simulated ports:
//! - All-or-nothing start and device release
//! - Row collection, overflow and export
//! - Actuator control and parking on stop
//! - Tare and reset rules

mod common;

use common::builders::RigConfigBuilder;
use common::mock_helpers::{add_echoing_actuator, add_fixed_load_cell, add_fixed_temperature, simulated_rig};
use common::{assert_float_eq, test_timeout, wait_for};
use serial_test::serial;
use std::sync::Arc;
use thrustrig::{SessionState, SimConnector, ThrustRigError, COLUMNS};

#[test]
fn test_start_is_all_or_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let config = RigConfigBuilder::new(&dir)
        .enable("temp")
        .enable("thrust")
        .enable("pwm")
        .build();

    // No actuator board attached
    let connector = Arc::new(SimConnector::new());
    let temp = add_fixed_temperature(&connector, &config.temp.port, 30_000);
    let thrust = add_fixed_load_cell(&connector, &config.thrust.port, 10.0);

    let mut session = thrustrig::Session::new(config, connector.clone()).unwrap();
    let err = session.start().unwrap_err();
    assert!(err.is_transport(), "unexpected error: {}", err);

    assert_eq!(session.state(), SessionState::Stopped);
    assert_eq!(connector.open_ports(), 0);
    assert_eq!(temp.open_count(), 1);
    assert_eq!(thrust.open_count(), 1);
}

#[test]
fn test_disabled_devices_are_never_opened() {
    let dir = tempfile::tempdir().unwrap();
    let config = RigConfigBuilder::new(&dir).enable("thrust").build();

    let connector = Arc::new(SimConnector::new());
    let temp = add_fixed_temperature(&connector, &config.temp.port, 30_000);
    add_fixed_load_cell(&connector, &config.thrust.port, 10.0);

    let mut session = thrustrig::Session::new(config, connector.clone()).unwrap();
    session.start().unwrap();
    assert_eq!(temp.open_count(), 0);
    assert_eq!(connector.open_ports(), 1);

    session.stop().unwrap();
    assert_eq!(connector.open_ports(), 0);
}

#[test]
#[serial]
fn test_collects_calibrated_rows() {
    let dir = tempfile::tempdir().unwrap();
    let config = RigConfigBuilder::new(&dir)
        .enable("temp")
        .enable("thrust")
        .thrust_calibration(2.0, 4.0)
        .build();

    let connector = Arc::new(SimConnector::new());
    add_fixed_temperature(&connector, &config.temp.port, 30_000);
    add_fixed_load_cell(&connector, &config.thrust.port, 10.0);

    let mut session = thrustrig::Session::new(config, connector).unwrap();
    session.start().unwrap();
    assert!(wait_for(test_timeout(), || session.window().len() >= 3));
    session.stop().unwrap();

    let rows = session.window();
    let row = rows
        .iter()
        .find(|r| r.thrust().is_some() && r.coil_temperature().is_some())
        .expect("a row with both enabled sensors");
    assert_float_eq(row.thrust().unwrap(), 2.0, 1e-9);
    assert_float_eq(row.coil_temperature().unwrap(), 40.0, 1e-9);

    // Disabled devices and the idle actuator stay missing
    for row in &rows {
        assert_eq!(row.voltage(), None);
        assert_eq!(row.rpm(), None);
        assert_eq!(row.pwm(), None);
    }

    for pair in rows.windows(2) {
        assert!(pair[0].timestamp <= pair[1].timestamp);
    }
    assert_eq!(session.stats().rows_appended as usize, rows.len());
}

#[test]
#[serial]
fn test_export_contains_archived_and_live_rows() {
    let dir = tempfile::tempdir().unwrap();
    let config = RigConfigBuilder::new(&dir)
        .enable("thrust")
        .buffer(4, 2)
        .poll_interval_ms(5)
        .build();

    let connector = Arc::new(SimConnector::new());
    add_fixed_load_cell(&connector, &config.thrust.port, 1.5);

    let mut session = thrustrig::Session::new(config, connector).unwrap();
    session.start().unwrap();
    assert!(wait_for(test_timeout(), || session.buffer().archived() >= 6));
    session.stop().unwrap();

    let buffer = session.buffer();
    assert!(buffer.len() <= 4);

    let text = String::from_utf8(session.export().unwrap()).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], COLUMNS.join(","));
    assert_eq!(lines.len() - 1, buffer.archived() + buffer.len());
    assert_eq!(session.stats().rows_appended as usize, lines.len() - 1);
    assert!(lines[1..].iter().all(|l| l.contains(",1.5,")));

    let out = dir.path().join("run.csv");
    session.export_to(&out).unwrap();
    assert_eq!(std::fs::read_to_string(&out).unwrap(), text);
}

#[test]
#[serial]
fn test_pwm_column_follows_actuator_reports() {
    let dir = tempfile::tempdir().unwrap();
    let config = RigConfigBuilder::new(&dir).enable("thrust").enable("pwm").build();

    let connector = Arc::new(SimConnector::new());
    add_fixed_load_cell(&connector, &config.thrust.port, 0.0);
    let board = add_echoing_actuator(&connector, &config.pwm.port);

    let mut session = thrustrig::Session::new(config, connector.clone()).unwrap();
    session.start().unwrap();

    assert!(!session.set_pwm(2500));
    assert!(session.set_pwm(1500));
    assert!(wait_for(test_timeout(), || session.pwm_value() == Some(1500)));
    assert!(wait_for(test_timeout(), || {
        session.window().iter().any(|r| r.pwm() == Some(1500.0))
    }));

    session.stop().unwrap();
    let written = board.written_text();
    assert!(written.contains("set 1500"));
    assert!(written.trim_end().ends_with("set 1000"), "not parked: {:?}", written);
    assert!(!board.is_open());
    assert_eq!(connector.open_ports(), 0);
}

#[test]
#[serial]
fn test_pwm_column_stays_missing_without_actuator() {
    let dir = tempfile::tempdir().unwrap();
    let config = RigConfigBuilder::new(&dir).enable("thrust").build();

    let connector = Arc::new(SimConnector::new());
    add_fixed_load_cell(&connector, &config.thrust.port, 1.0);

    let mut session = thrustrig::Session::new(config, connector).unwrap();
    session.start().unwrap();
    session.set_pwm(1500);
    let before = session.window().len();
    assert!(wait_for(test_timeout(), || session.window().len() >= before + 3));
    session.stop().unwrap();

    let rows = session.window();
    assert!(rows.iter().any(|r| r.thrust().is_some()));
    assert!(rows.iter().all(|r| r.pwm().is_none()), "PWM column filled: {:?}", rows);
}

#[test]
#[serial]
fn test_stop_is_idempotent_and_restartable() {
    let dir = tempfile::tempdir().unwrap();
    let config = RigConfigBuilder::new(&dir).enable("thrust").build();

    let connector = Arc::new(SimConnector::new());
    let cell = add_fixed_load_cell(&connector, &config.thrust.port, 3.0);

    let mut session = thrustrig::Session::new(config, connector).unwrap();
    session.stop().unwrap();

    session.start().unwrap();
    session.stop().unwrap();
    session.stop().unwrap();
    assert!(!cell.is_open());

    // Data survives a restart until reset
    let before = session.window().len();
    session.start().unwrap();
    assert!(wait_for(test_timeout(), || session.window().len() > before));
    session.stop().unwrap();
    assert_eq!(cell.open_count(), 2);
}

#[test]
#[serial]
fn test_reset_only_while_stopped() {
    let dir = tempfile::tempdir().unwrap();
    let config = RigConfigBuilder::new(&dir).enable("thrust").buffer(3, 1).build();

    let connector = Arc::new(SimConnector::new());
    add_fixed_load_cell(&connector, &config.thrust.port, 3.0);

    let mut session = thrustrig::Session::new(config, connector).unwrap();
    session.start().unwrap();
    assert!(wait_for(test_timeout(), || session.buffer().archived() > 0));

    let err = session.reset().unwrap_err();
    assert!(matches!(err, ThrustRigError::InvalidState(_)));

    session.stop().unwrap();
    session.reset().unwrap();
    assert!(session.window().is_empty());
    assert_eq!(session.buffer().archived(), 0);
    assert_eq!(session.stats().rows_appended, 0);
    assert_eq!(
        String::from_utf8(session.export().unwrap()).unwrap().trim_end(),
        COLUMNS.join(",")
    );
}

#[test]
#[serial]
fn test_tare_refused_while_load_cell_in_use() {
    let dir = tempfile::tempdir().unwrap();
    let config = RigConfigBuilder::new(&dir).enable("thrust").build();

    let connector = Arc::new(SimConnector::new());
    add_fixed_load_cell(&connector, &config.thrust.port, 12.5);

    let mut session = thrustrig::Session::new(config, connector).unwrap();
    session.start().unwrap();
    let err = session.tare_thrust().unwrap_err();
    assert!(matches!(err, ThrustRigError::InvalidState(_)));
    assert_eq!(session.config().thrust.offset, 0.0);

    session.stop().unwrap();
    let offset = session.tare_thrust().unwrap();
    assert_float_eq(offset, 12.5, 1e-9);
    assert_eq!(session.config().thrust.offset, offset);

    // New offset applies to the next run
    session.reset().unwrap();
    session.start().unwrap();
    assert!(wait_for(test_timeout(), || {
        session.window().iter().any(|r| r.thrust().is_some())
    }));
    session.stop().unwrap();
    let thrust = session.window().iter().find_map(|r| r.thrust()).unwrap();
    assert_float_eq(thrust, 0.0, 1e-9);
}

#[test]
#[serial]
fn test_simulated_rig_fills_every_column() {
    let dir = tempfile::tempdir().unwrap();
    let config = RigConfigBuilder::new(&dir).enable_all().build();
    let connector = simulated_rig(&config);

    let mut session = thrustrig::Session::new(config, connector.clone()).unwrap();
    session.start().unwrap();
    assert!(session.set_pwm(1200));

    let complete = wait_for(std::time::Duration::from_secs(5), || {
        session.window().iter().any(|r| r.values.iter().all(Option::is_some))
    });
    session.stop().unwrap();

    assert!(complete, "no complete row in {:?}", session.window());
    assert_eq!(connector.open_ports(), 0);
    assert_eq!(session.state(), SessionState::Stopped);
}

#[test]
#[serial]
fn test_decoupled_rpm_does_not_stall_collection() {
    let dir = tempfile::tempdir().unwrap();
    let config = RigConfigBuilder::new(&dir)
        .enable("thrust")
        .enable("rpm")
        .decouple_rpm()
        .build();

    let connector = Arc::new(SimConnector::new());
    add_fixed_load_cell(&connector, &config.thrust.port, 1.0);
    connector.set_rpm_tool(
        (0..1000).map(|i| format!("1 {} RPM", 2000 + i)),
        std::time::Duration::from_millis(200),
    );

    let mut session = thrustrig::Session::new(config, connector).unwrap();
    session.start().unwrap();
    // 200ms per measurement would cap an inline poll near 5 rows per second
    assert!(wait_for(std::time::Duration::from_millis(600), || session.window().len() >= 15));
    assert!(wait_for(test_timeout(), || {
        session.window().iter().any(|r| r.rpm().is_some())
    }));
    session.stop().unwrap();
}
