//! Line-delimited JSON protocol, end to end through `handle_line`.

use super::mock_hw::{Rig, T0};

use incubator::app::commands::handle_line;
use incubator::app::service::AppService;
use incubator::config::SystemConfig;
use incubator::profile::ProfileType;
use incubator::sensors::SensorId;
use serde_json::Value;

fn send(app: &mut AppService, rig: &mut Rig, line: &str) -> Value {
    let reply = handle_line(app, line, 1_000, &mut rig.ports());
    serde_json::from_str(&reply).expect("reply is JSON")
}

fn booted(rig: &mut Rig) -> AppService {
    let mut app = AppService::new(SystemConfig::default(), 0);
    app.start(0, &mut rig.ports());
    app
}

#[test]
fn ping_answers_pong() {
    let mut rig = Rig::new();
    let mut app = booted(&mut rig);
    let v = send(&mut app, &mut rig, r#"{"cmd":"ping"}"#);
    assert_eq!(v["cmd"], "ping");
    assert_eq!(v["status"], "success");
    assert_eq!(v["message"], "pong");
}

#[test]
fn malformed_requests_get_error_replies() {
    let mut rig = Rig::new();
    let mut app = booted(&mut rig);

    let v = send(&mut app, &mut rig, "{not json");
    assert_eq!(v["status"], "error");
    assert_eq!(v["message"], "Invalid JSON");

    let v = send(&mut app, &mut rig, r#"{"cmd":"reboot_now"}"#);
    assert_eq!(v["message"], "Unknown command: reboot_now");

    let v = send(&mut app, &mut rig, r#"{"cmd":"set_targets","temp":"hot"}"#);
    assert_eq!(v["message"], "Invalid parameters");
}

#[test]
fn sensor_data_reflects_fused_reading() {
    let mut rig = Rig::new();
    rig.sensors.set(SensorId::Primary, 38.2, 60.0);
    rig.sensors.set(SensorId::Secondary, 38.3, 62.0);
    let mut app = booted(&mut rig);
    app.tick(0, &mut rig.ports());

    let v = send(&mut app, &mut rig, r#"{"cmd":"get_sensor_data"}"#);
    assert_eq!(v["type"], "sensor_data");
    assert!((v["temp"].as_f64().unwrap() - 38.25).abs() < 1e-3);
    assert!((v["humidity"].as_f64().unwrap() - 61.0).abs() < 1e-3);
    assert!((v["temp2"].as_f64().unwrap() - 38.3).abs() < 1e-3);
    assert_eq!(v["heater"], false);
}

#[test]
fn start_incubation_over_the_wire() {
    let mut rig = Rig::new();
    let mut app = booted(&mut rig);

    let v = send(&mut app, &mut rig, r#"{"cmd":"start_incubation"}"#);
    assert_eq!(v["message"], "Missing profile_type parameter");

    let v = send(&mut app, &mut rig, r#"{"cmd":"start_incubation","profile_type":12}"#);
    assert_eq!(v["message"], "Invalid profile type");

    let v = send(&mut app, &mut rig, r#"{"cmd":"start_incubation","profile_type":3}"#);
    assert_eq!(v["status"], "success");
    assert_eq!(app.settings().profile_type, ProfileType::Duck);
    assert_eq!(app.settings().start_time, T0);

    let v = send(&mut app, &mut rig, r#"{"cmd":"get_settings"}"#);
    assert_eq!(v["profile_type"], 3);
    assert_eq!(v["total_days"], 28);
    assert_eq!(v["current_day"], 1);

    let v = send(&mut app, &mut rig, r#"{"cmd":"get_profile"}"#);
    assert_eq!(v["type"], "profile");
    assert_eq!(v["name"], "Duck");
    assert_eq!(v["stages"].as_array().unwrap().len(), 3);

    let v = send(&mut app, &mut rig, r#"{"cmd":"stop_incubation"}"#);
    assert_eq!(v["status"], "success");
    assert!(!app.settings().is_active());
}

#[test]
fn set_targets_validates_range() {
    let mut rig = Rig::new();
    let mut app = booted(&mut rig);

    let v = send(&mut app, &mut rig, r#"{"cmd":"set_targets","temp":37.4}"#);
    assert_eq!(v["message"], "Missing temperature or humidity parameters");

    let v = send(&mut app, &mut rig, r#"{"cmd":"set_targets","temp":50,"humidity":60}"#);
    assert_eq!(v["status"], "error");
    assert_eq!(v["message"], "Target out of range");

    let v = send(&mut app, &mut rig, r#"{"cmd":"set_targets","temp":37.4,"humidity":58}"#);
    assert_eq!(v["status"], "success");
    assert_eq!(app.controller().targets(), (37.4, 58.0));
}

#[test]
fn update_settings_applies_partial_document() {
    let mut rig = Rig::new();
    let mut app = booted(&mut rig);

    let v = send(
        &mut app,
        &mut rig,
        r#"{"cmd":"update_settings","pid_kp":8,"pid_ki":0.2,"pid_kd":40,"alarm":{"high_temp":39.0}}"#,
    );
    assert_eq!(v["status"], "success");
    assert_eq!(app.controller().pid_params(), (8.0, 0.2, 40.0));
    assert_eq!(app.alarms().thresholds().high_temp, 39.0);

    let v = send(&mut app, &mut rig, r#"{"cmd":"update_settings"}"#);
    assert_eq!(v["status"], "error");

    let v = send(&mut app, &mut rig, r#"{"cmd":"update_settings","alarm":{"low_temp":40.0}}"#);
    assert_eq!(v["status"], "error");
}

#[test]
fn motor_commands() {
    let mut rig = Rig::new();
    let mut app = booted(&mut rig);

    let v = send(&mut app, &mut rig, r#"{"cmd":"set_motor","duration":20000,"interval":10000}"#);
    assert_eq!(v["status"], "error");

    let v = send(&mut app, &mut rig, r#"{"cmd":"set_motor","duration":20000,"interval":3600000}"#);
    assert_eq!(v["status"], "success");
    assert_eq!(app.controller().turner_settings().duration, 20_000);

    let v = send(&mut app, &mut rig, r#"{"cmd":"control_motor","state":true}"#);
    assert_eq!(v["message"], "Motor on");
    assert!(rig.relays.turner);
}

#[test]
fn heater_and_humidifier_commands() {
    let mut rig = Rig::new();
    let mut app = booted(&mut rig);
    app.tick(0, &mut rig.ports());

    let v = send(&mut app, &mut rig, r#"{"cmd":"control_heater"}"#);
    assert_eq!(v["message"], "Missing state parameter");

    let v = send(&mut app, &mut rig, r#"{"cmd":"control_heater","state":true}"#);
    assert_eq!(v["status"], "success");
    assert_eq!(v["message"], "Heater on");
    assert!(rig.relays.heater);

    let v = send(&mut app, &mut rig, r#"{"cmd":"control_humidifier","state":true}"#);
    assert_eq!(v["message"], "Humidifier on");
    assert!(rig.relays.humidifier);

    let v = send(&mut app, &mut rig, r#"{"cmd":"control_humidifier","state":false}"#);
    assert_eq!(v["message"], "Humidifier off");
    assert!(!rig.relays.humidifier);
}

#[test]
fn heater_command_refused_when_overheated() {
    let mut rig = Rig::new();
    rig.sensors.set(SensorId::Primary, 38.5, 60.0);
    rig.sensors.set(SensorId::Secondary, 38.5, 60.0);
    let mut app = booted(&mut rig);
    app.tick(0, &mut rig.ports());

    let v = send(&mut app, &mut rig, r#"{"cmd":"control_heater","state":true}"#);
    assert_eq!(v["status"], "error");
    assert_eq!(v["message"], "Heater locked out by safety");
    assert!(!rig.relays.heater);

    let v = send(&mut app, &mut rig, r#"{"cmd":"control_heater","state":false}"#);
    assert_eq!(v["message"], "Heater off");
}

#[test]
fn set_time_and_power_save() {
    let mut rig = Rig::new();
    let mut app = booted(&mut rig);

    let v = send(&mut app, &mut rig, r#"{"cmd":"set_time","timestamp":1720000000}"#);
    assert_eq!(v["status"], "success");
    assert_eq!(rig.clock.now, Some(1_720_000_000));
    assert_eq!(app.unix_time(), 1_720_000_000);

    let v = send(&mut app, &mut rig, r#"{"cmd":"set_power_save","level":2}"#);
    assert_eq!(v["status"], "success");
    let v = send(&mut app, &mut rig, r#"{"cmd":"set_power_save","level":7}"#);
    assert_eq!(v["status"], "error");
}

#[test]
fn alarm_and_status_documents() {
    let mut rig = Rig::new();
    rig.sensors.set(SensorId::Primary, 39.0, 60.0);
    rig.sensors.set(SensorId::Secondary, 39.0, 60.0);
    let mut app = booted(&mut rig);
    app.tick(0, &mut rig.ports());

    let v = send(&mut app, &mut rig, r#"{"cmd":"get_alarm_data"}"#);
    assert_eq!(v["type"], "alarm_data");
    assert_eq!(v["alarm_active"], true);
    assert_eq!(v["alarm_message"], "Critical high temperature: 39.0C");
    assert_eq!(v["history"].as_array().unwrap().len(), 1);

    let v = send(&mut app, &mut rig, r#"{"cmd":"get_system_status"}"#);
    assert_eq!(v["type"], "system_status");
    assert_eq!(v["sensor1_valid"], true);
    assert_eq!(v["power_outage"], false);
    assert_ne!(v["fault_flags"], 0);

    let v = send(&mut app, &mut rig, r#"{"cmd":"get_all_profiles"}"#);
    assert_eq!(v["profiles"].as_array().unwrap().len(), 9);
}
