//! AppService behaviour against the mock rig: boot, fusion, safety,
//! recovery, profile runs and backups.

use super::mock_hw::{ActuatorCall, Rig, T0};

use incubator::alarm::AlarmType;
use incubator::app::events::AppEvent;
use incubator::app::ports::StoragePort;
use incubator::app::service::AppService;
use incubator::clock::SECS_PER_DAY;
use incubator::config::{IncubationSettings, SystemConfig, TurnerSettings};
use incubator::error::{Error, SensorError};
use incubator::profile::ProfileType;
use incubator::recovery::{self, RecoverySnapshot};
use incubator::sensors::SensorId;
use incubator::store::{self, NAMESPACE, keys};

fn booted(rig: &mut Rig) -> AppService {
    let mut app = AppService::new(SystemConfig::default(), 0);
    app.start(0, &mut rig.ports());
    app
}

// ── Boot ──────────────────────────────────────────────────────

#[test]
fn first_boot_writes_defaults_and_reports_clean_start() {
    let mut rig = Rig::new();
    let mut app = AppService::new(SystemConfig::default(), 0);
    let report = app.start(0, &mut rig.ports());

    assert!(report.sensors_found);
    assert!(!report.clock_lost_power);
    assert_eq!(report.outage, None);
    assert!(!report.restored);
    assert!(rig.storage.exists(NAMESPACE, keys::POWER_ON));
    assert!(rig.storage.exists(NAMESPACE, keys::TURNER));
    assert!(matches!(
        rig.sink.events.last(),
        Some(AppEvent::Started { outage: None, restored: false })
    ));
    assert!(!app.settings().is_active());
}

#[test]
fn missing_sensors_and_dead_rtc_are_reported() {
    let mut rig = Rig::new();
    rig.sensors.present = [false; 2];
    rig.clock.lost_power = true;
    let mut app = AppService::new(SystemConfig::default(), 0);
    let report = app.start(0, &mut rig.ports());
    assert!(!report.sensors_found);
    assert!(report.clock_lost_power);
}

// ── Fusion and control ────────────────────────────────────────

#[test]
fn healthy_sensors_are_averaged() {
    let mut rig = Rig::new();
    rig.sensors.set(SensorId::Primary, 38.2, 60.0);
    rig.sensors.set(SensorId::Secondary, 38.3, 60.0);
    let mut app = booted(&mut rig);

    let ran = app.tick(0, &mut rig.ports());
    assert!(ran > 0);
    let data = app.sensor_data();
    assert!((data.temperature - 38.25).abs() < 1e-4);
    assert!((data.humidity - 60.0).abs() < 1e-4);
    assert!(!app.alarms().status().active);
}

#[test]
fn one_failed_sensor_leaves_the_other_in_charge() {
    let mut rig = Rig::new();
    rig.sensors.set(SensorId::Primary, 37.6, 58.0);
    rig.sensors.fail(SensorId::Secondary, SensorError::BusError);
    let mut app = booted(&mut rig);

    // Three consecutive failures invalidate the second sensor.
    for i in 0..3 {
        app.tick(i * 2_000, &mut rig.ports());
    }
    let data = app.sensor_data();
    assert!(data.sensor1.valid);
    assert!(!data.sensor2.valid);
    assert!((data.temperature - 37.6).abs() < 1e-4);
}

#[test]
fn critical_temperature_cuts_heater_and_raises_alarm() {
    let mut rig = Rig::new();
    rig.sensors.set(SensorId::Primary, 39.0, 60.0);
    rig.sensors.set(SensorId::Secondary, 39.0, 60.0);
    let mut app = booted(&mut rig);

    app.tick(0, &mut rig.ports());

    assert!(!rig.relays.heater);
    assert!(!rig.relays.calls.contains(&ActuatorCall::Heater(true)));
    let status = app.alarms().status();
    assert!(status.active);
    assert_eq!(status.kind, AlarmType::HighTemp);
    assert_eq!(status.message, "Critical high temperature: 39.0C");
    assert!(rig.sink.alarms().iter().any(|m| m.starts_with("Critical")));
    assert_ne!(app.controller().safety_faults(), 0);
}

#[test]
fn cold_incubator_turns_the_heater_on() {
    let mut rig = Rig::new();
    rig.sensors.set(SensorId::Primary, 36.0, 60.0);
    rig.sensors.set(SensorId::Secondary, 36.0, 60.0);
    let mut app = booted(&mut rig);

    app.tick(0, &mut rig.ports());
    assert!(rig.relays.heater);
}

#[test]
fn losing_every_sensor_forces_heater_off() {
    let mut rig = Rig::new();
    rig.sensors.set(SensorId::Primary, 36.0, 60.0);
    rig.sensors.set(SensorId::Secondary, 36.0, 60.0);
    let mut app = booted(&mut rig);
    app.tick(0, &mut rig.ports());
    assert!(rig.relays.heater);

    rig.sensors.fail(SensorId::Primary, SensorError::CrcMismatch);
    rig.sensors.fail(SensorId::Secondary, SensorError::CrcMismatch);
    for i in 1..=3 {
        app.tick(i * 2_000, &mut rig.ports());
    }
    assert!(!rig.relays.heater);
    assert!(rig.sink.events.iter().any(|e| matches!(e, AppEvent::FaultDetected(_))));
}

// ── Recovery ──────────────────────────────────────────────────

#[test]
fn long_gap_is_logged_as_outage() {
    let mut rig = Rig::new();
    rig.clock.now = Some(1_500);
    store::save_power_on_time(&mut rig.storage, 1_000).unwrap();

    let mut app = AppService::new(SystemConfig::default(), 0);
    let report = app.start(0, &mut rig.ports());

    let outage = report.outage.unwrap();
    assert_eq!((outage.start_time, outage.end_time, outage.duration), (1_000, 1_500, 500));
    assert!(app.recovery().was_power_outage());
    assert_eq!(app.recovery().outages().len(), 1);
    assert_eq!(app.alarms().status().kind, AlarmType::PowerOutage);
    assert_eq!(app.alarms().status().message, "Power outage: 500 s");
    assert_eq!(store::load_power_on_time(&rig.storage).unwrap(), 1_500);

    // Healthy readings do not clear it.
    app.tick(0, &mut rig.ports());
    app.tick(120_000, &mut rig.ports());
    assert!(app.alarms().status().active);
    assert_eq!(app.alarms().status().kind, AlarmType::PowerOutage);
}

#[test]
fn quick_reboot_is_not_an_outage() {
    let mut rig = Rig::new();
    rig.clock.now = Some(1_005);
    store::save_power_on_time(&mut rig.storage, 1_000).unwrap();

    let mut app = AppService::new(SystemConfig::default(), 0);
    let report = app.start(0, &mut rig.ports());
    assert_eq!(report.outage, None);
    assert!(!app.alarms().status().active);
}

#[test]
fn snapshot_repairs_lost_settings() {
    let mut rig = Rig::new();
    let snap = RecoverySnapshot {
        incubation_active: true,
        profile_type: ProfileType::Quail,
        start_time: 500,
        total_days: 18,
        target_temp: 37.7,
        target_humidity: 60.0,
        ..RecoverySnapshot::default()
    };
    recovery::save_snapshot(&mut rig.storage, &snap).unwrap();

    let mut app = AppService::new(SystemConfig::default(), 0);
    let report = app.start(0, &mut rig.ports());

    assert!(report.restored);
    assert_eq!(app.settings().start_time, 500);
    assert_eq!(app.settings().profile_type, ProfileType::Quail);
    let persisted: IncubationSettings = store::load_json(&rig.storage, keys::SETTINGS).unwrap().unwrap();
    assert_eq!(persisted.start_time, 500);
    assert_eq!(persisted.profile_type, ProfileType::Quail);
    assert_eq!(app.controller().targets(), (37.7, 60.0));
}

#[test]
fn shutdown_leaves_relays_off_and_state_on_disk() {
    let mut rig = Rig::new();
    rig.sensors.set(SensorId::Primary, 36.0, 40.0);
    rig.sensors.set(SensorId::Secondary, 36.0, 40.0);
    let mut app = booted(&mut rig);
    app.tick(0, &mut rig.ports());

    app.shutdown(1_000, &mut rig.ports());
    assert_eq!(rig.relays.calls.last(), Some(&ActuatorCall::AllOff));
    assert!(!rig.relays.heater && !rig.relays.humidifier);
    assert!(recovery::load_snapshot(&rig.storage).is_some());
    let csv = rig.storage.get(NAMESPACE, keys::TEMP_LOG).unwrap();
    assert!(std::str::from_utf8(csv).unwrap().starts_with("timestamp,"));
}

// ── Incubation runs ───────────────────────────────────────────

#[test]
fn start_and_stop_incubation() {
    let mut rig = Rig::new();
    let mut app = booted(&mut rig);

    app.start_incubation(ProfileType::Quail, 100, &mut rig.ports()).unwrap();
    let s = *app.settings();
    assert!(s.is_active());
    assert_eq!(s.start_time, T0);
    assert_eq!(s.total_days, 18);
    assert_eq!(app.controller().targets(), (37.7, 60.0));
    assert_eq!(app.incubation_day(), 1);
    assert_eq!(app.remaining_days(), 18);
    assert!(recovery::load_snapshot(&rig.storage).unwrap().incubation_active);
    assert!(rig
        .sink
        .events
        .iter()
        .any(|e| matches!(e, AppEvent::IncubationStarted { profile: ProfileType::Quail, total_days: 18 })));

    app.stop_incubation(200, &mut rig.ports()).unwrap();
    assert!(!app.settings().is_active());
    assert!(!recovery::load_snapshot(&rig.storage).unwrap().incubation_active);
    assert!(matches!(rig.sink.events.last(), Some(AppEvent::IncubationStopped)));
}

#[test]
fn start_is_refused_without_profile_or_clock() {
    let mut rig = Rig::new();
    let mut app = booted(&mut rig);

    let err = app.start_incubation(ProfileType::None, 0, &mut rig.ports()).unwrap_err();
    assert!(matches!(err, Error::Rejected("Invalid profile type")));

    rig.clock.now = Some(0);
    let err = app.start_incubation(ProfileType::Chicken, 0, &mut rig.ports()).unwrap_err();
    assert!(matches!(err, Error::Rejected("Clock not set")));
    assert!(!app.settings().is_active());
}

#[test]
fn profile_advances_to_next_stage() {
    let mut rig = Rig::new();
    let mut app = booted(&mut rig);
    app.start_incubation(ProfileType::Chicken, 0, &mut rig.ports()).unwrap();
    app.tick(0, &mut rig.ports());
    assert_eq!(app.controller().targets(), (37.8, 55.0));

    // Day 10 begins the second chicken stage.
    rig.clock.now = Some(T0 + 9 * SECS_PER_DAY);
    app.tick(60_000, &mut rig.ports());

    assert_eq!(app.controller().targets(), (37.5, 60.0));
    assert_eq!(app.settings().target_temp, 37.5);
    assert!(rig
        .sink
        .events
        .iter()
        .any(|e| matches!(e, AppEvent::StageChanged(c) if c.to_stage == 1 && c.day == 10)));
}

#[test]
fn reboot_after_stage_boundary_applies_new_stage() {
    let mut rig = Rig::new();
    let mut app = booted(&mut rig);
    app.start_incubation(ProfileType::Chicken, 0, &mut rig.ports()).unwrap();
    app.tick(0, &mut rig.ports());
    app.shutdown(1_000, &mut rig.ports());

    // Powered off through day 10, short enough to restart on day 11.
    rig.clock.now = Some(T0 + 10 * SECS_PER_DAY);
    let mut app = booted(&mut rig);

    assert_eq!(app.settings().profile_type, ProfileType::Chicken);
    assert_eq!(app.settings().target_temp, 37.5);
    assert_eq!(app.settings().target_humidity, 60.0);
    assert_eq!(app.controller().targets(), (37.5, 60.0));
    assert_eq!(app.profiles().current_stage_index(), Some(1));

    let stored: IncubationSettings = store::load_json(&rig.storage, keys::SETTINGS).unwrap().unwrap();
    assert_eq!((stored.target_temp, stored.target_humidity), (37.5, 60.0));
    let snap = recovery::load_snapshot(&rig.storage).unwrap();
    assert_eq!(snap.target_temp, 37.5);

    app.tick(0, &mut rig.ports());
    app.tick(60_000, &mut rig.ports());
    assert_eq!(app.controller().targets(), (37.5, 60.0));
}

#[test]
fn reboot_within_stage_keeps_operator_targets() {
    let mut rig = Rig::new();
    let mut app = booted(&mut rig);
    app.start_incubation(ProfileType::Chicken, 0, &mut rig.ports()).unwrap();
    app.set_targets(37.6, 58.0, 0, &mut rig.storage).unwrap();
    app.shutdown(1_000, &mut rig.ports());

    // Day 4 is still the first stage; the stored targets stand.
    rig.clock.now = Some(T0 + 3 * SECS_PER_DAY);
    let app = booted(&mut rig);
    assert_eq!(app.profiles().current_stage_index(), Some(0));
    assert_eq!(app.controller().targets(), (37.6, 58.0));
    assert_eq!(app.settings().target_temp, 37.6);
}

#[test]
fn failed_save_leaves_run_untouched() {
    let mut rig = Rig::new();
    let mut app = booted(&mut rig);
    let before = *app.settings();

    rig.storage.full = true;
    assert!(app.start_incubation(ProfileType::Chicken, 0, &mut rig.ports()).is_err());
    assert_eq!(*app.settings(), before);
    assert_eq!(app.profiles().active_type(), ProfileType::None);
    assert!(!rig.sink.events.iter().any(|e| matches!(e, AppEvent::IncubationStarted { .. })));

    rig.storage.full = false;
    app.start_incubation(ProfileType::Chicken, 0, &mut rig.ports()).unwrap();
    rig.storage.full = true;
    assert!(app.stop_incubation(0, &mut rig.ports()).is_err());
    assert!(app.settings().is_active());
    assert_eq!(app.profiles().active_type(), ProfileType::Chicken);
}

// ── Settings ──────────────────────────────────────────────────

#[test]
fn targets_are_range_checked_and_persisted() {
    let mut rig = Rig::new();
    let mut app = booted(&mut rig);

    assert!(app.set_targets(45.0, 60.0, 0, &mut rig.storage).is_err());
    assert!(app.set_targets(37.0, 95.0, 0, &mut rig.storage).is_err());
    app.set_targets(37.2, 62.0, 0, &mut rig.storage).unwrap();

    assert_eq!(app.controller().targets(), (37.2, 62.0));
    let persisted: IncubationSettings = store::load_json(&rig.storage, keys::SETTINGS).unwrap().unwrap();
    assert_eq!(persisted.target_temp, 37.2);
}

#[test]
fn turner_interval_must_exceed_duration() {
    let mut rig = Rig::new();
    let mut app = booted(&mut rig);
    let bad = TurnerSettings { duration: 10_000, interval: 5_000 };
    assert!(app.set_turner_settings(bad, &mut rig.storage).is_err());

    let good = TurnerSettings { duration: 10_000, interval: 3_600_000 };
    app.set_turner_settings(good, &mut rig.storage).unwrap();
    assert_eq!(app.controller().turner_settings(), good);
}

#[test]
fn manual_turner_drives_relay() {
    let mut rig = Rig::new();
    let mut app = booted(&mut rig);
    app.control_turner(true, 0, &mut rig.relays);
    assert!(rig.relays.turner);
    app.control_turner(false, 1_000, &mut rig.relays);
    assert!(!rig.relays.turner);
}

#[test]
fn calibration_pulls_sensors_to_reference() {
    let mut rig = Rig::new();
    rig.sensors.set(SensorId::Primary, 37.0, 55.0);
    rig.sensors.set(SensorId::Secondary, 38.0, 57.0);
    let mut app = booted(&mut rig);
    app.tick(0, &mut rig.ports());

    let cal = app.calibrate(37.5, 56.0, &mut rig.sensors, &mut rig.storage).unwrap();
    assert!((cal.temp_offset1 - 0.5).abs() < 1e-4);
    assert!((cal.temp_offset2 + 0.5).abs() < 1e-4);
    assert!(rig.storage.exists(NAMESPACE, keys::CALIBRATION));
}

#[test]
fn clearing_an_alarm_notifies_sink() {
    let mut rig = Rig::new();
    rig.sensors.set(SensorId::Primary, 39.0, 60.0);
    rig.sensors.set(SensorId::Secondary, 39.0, 60.0);
    let mut app = booted(&mut rig);
    app.tick(0, &mut rig.ports());
    assert!(app.alarms().status().active);

    app.clear_alarm(&mut rig.sink);
    assert!(!app.alarms().status().active);
    assert!(matches!(rig.sink.events.last(), Some(AppEvent::AlarmCleared)));
}

// ── Backup ────────────────────────────────────────────────────

#[test]
fn backup_restores_settings_after_changes() {
    let mut rig = Rig::new();
    let mut app = booted(&mut rig);
    app.set_targets(38.0, 62.0, 0, &mut rig.storage).unwrap();

    let size = app.backup(&mut rig.storage).unwrap();
    assert!(size > 0);

    app.set_targets(35.0, 50.0, 10_000, &mut rig.storage).unwrap();
    app.restore_backup(20_000, &mut rig.storage).unwrap();

    assert_eq!(app.settings().target_temp, 38.0);
    assert_eq!(app.controller().targets(), (38.0, 62.0));
}

#[test]
fn restore_without_backup_is_refused() {
    let mut rig = Rig::new();
    let mut app = booted(&mut rig);
    let err = app.restore_backup(0, &mut rig.storage).unwrap_err();
    assert!(matches!(err, Error::Rejected("No backup found")));
}

#[test]
fn clear_data_drops_log_and_outages() {
    let mut rig = Rig::new();
    rig.clock.now = Some(T0);
    store::save_power_on_time(&mut rig.storage, T0 - 3_600).unwrap();
    let mut app = booted(&mut rig);
    app.tick(0, &mut rig.ports());
    assert_eq!(app.recovery().outages().len(), 1);
    assert!(!app.datalog().is_empty());

    app.clear_data(&mut rig.storage).unwrap();
    assert!(app.datalog().is_empty());
    assert!(app.recovery().outages().is_empty());
}
