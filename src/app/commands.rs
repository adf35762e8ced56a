//! Inbound commands: the line-delimited JSON remote protocol.
//!
//! Every request carries `{"cmd": <name>, …}`.  Mutators answer with a
//! `{"cmd", "status", "message"}` reply; queries answer with a typed
//! payload document (`sensor_data`, `settings`, …).  The transport that
//! delivers the lines is not part of this module.

use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::clock::TimeInfo;
use crate::config::{AlarmThresholds, TurnerSettings};
use crate::control::PowerSaveLevel;
use crate::profile::{Profile, ProfileType};

use super::service::{AppService, Ports};

/// Alarm entries included in an `alarm_data` payload.
pub const ALARM_DATA_HISTORY: usize = 5;

/// Command names this protocol understands.
pub const COMMANDS: [&str; 18] = [
    "get_sensor_data",
    "get_settings",
    "get_profile",
    "get_alarm_data",
    "get_all_profiles",
    "get_system_status",
    "update_settings",
    "ping",
    "start_incubation",
    "stop_incubation",
    "set_targets",
    "set_motor",
    "control_motor",
    "control_heater",
    "control_humidifier",
    "calibrate",
    "set_time",
    "set_power_save",
];

/// Commands that external adapters can send into the application core.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum AppCommand {
    GetSensorData,
    GetSettings,
    GetProfile,
    GetAlarmData,
    GetAllProfiles,
    GetSystemStatus,
    UpdateSettings(SettingsUpdate),
    Ping,
    StartIncubation { profile_type: Option<i64> },
    StopIncubation,
    SetTargets { temp: Option<f32>, humidity: Option<f32> },
    /// Turner run length and period (ms).
    SetMotor { duration: Option<u32>, interval: Option<u32> },
    ControlMotor { state: Option<bool> },
    ControlHeater { state: Option<bool> },
    ControlHumidifier { state: Option<bool> },
    Calibrate { temp: Option<f32>, humidity: Option<f32> },
    SetTime { timestamp: Option<u32> },
    SetPowerSave { level: Option<u8> },
}

/// Partial settings document.  The PID gains only apply as a triple.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct SettingsUpdate {
    pub target_temp: Option<f32>,
    pub target_humidity: Option<f32>,
    pub motor_enabled: Option<bool>,
    pub pid_kp: Option<f32>,
    pub pid_ki: Option<f32>,
    pub pid_kd: Option<f32>,
    pub hum_hysteresis: Option<f32>,
    pub alarm: Option<AlarmUpdate>,
}

/// Partial alarm-threshold document nested in `update_settings`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct AlarmUpdate {
    pub enabled: Option<bool>,
    pub high_temp: Option<f32>,
    pub low_temp: Option<f32>,
    pub high_hum: Option<f32>,
    pub low_hum: Option<f32>,
    pub temp_diff: Option<f32>,
    pub hum_diff: Option<f32>,
}

impl AlarmUpdate {
    pub fn apply_to(&self, t: &mut AlarmThresholds) {
        if let Some(v) = self.enabled {
            t.enabled = v;
        }
        if let Some(v) = self.high_temp {
            t.high_temp = v;
        }
        if let Some(v) = self.low_temp {
            t.low_temp = v;
        }
        if let Some(v) = self.high_hum {
            t.high_hum = v;
        }
        if let Some(v) = self.low_hum {
            t.low_hum = v;
        }
        if let Some(v) = self.temp_diff {
            t.temp_diff = v;
        }
        if let Some(v) = self.hum_diff {
            t.hum_diff = v;
        }
    }
}

/// `{"cmd", "status", "message"}` acknowledgement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandReply {
    pub cmd: String,
    pub status: &'static str,
    pub message: String,
}

impl CommandReply {
    pub fn success(cmd: &str, message: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            status: "success",
            message: message.into(),
        }
    }

    pub fn error(cmd: &str, message: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            status: "error",
            message: message.into(),
        }
    }
}

enum Response {
    Document(Value),
    Reply(CommandReply),
}

// ── Entry point ───────────────────────────────────────────────

/// Handle one request line and return the response line.
pub fn handle_line(app: &mut AppService, line: &str, now_ms: u64, p: &mut Ports<'_>) -> String {
    let response = match parse(line) {
        Ok((name, cmd)) => {
            info!("Command: {}", name);
            execute(app, &name, cmd, now_ms, p)
        }
        Err(reply) => {
            warn!("Command: rejected ({})", reply.message);
            Response::Reply(reply)
        }
    };
    let encoded = match response {
        Response::Document(v) => serde_json::to_string(&v),
        Response::Reply(r) => serde_json::to_string(&r),
    };
    encoded.unwrap_or_else(|_| String::from(r#"{"status":"error","message":"Encoding failed"}"#))
}

/// Decode a request line into its name and typed command.
pub fn parse(line: &str) -> Result<(String, AppCommand), CommandReply> {
    let value: Value = serde_json::from_str(line.trim()).map_err(|_| CommandReply::error("", "Invalid JSON"))?;
    let name = value
        .get("cmd")
        .and_then(Value::as_str)
        .map(String::from)
        .ok_or_else(|| CommandReply::error("", "Missing cmd field"))?;
    if !COMMANDS.contains(&name.as_str()) {
        return Err(CommandReply::error(&name, format!("Unknown command: {name}")));
    }
    let cmd = serde_json::from_value(value).map_err(|_| CommandReply::error(&name, "Invalid parameters"))?;
    Ok((name, cmd))
}

fn execute(app: &mut AppService, name: &str, cmd: AppCommand, now_ms: u64, p: &mut Ports<'_>) -> Response {
    let reply = match cmd {
        // ── Queries ───────────────────────────────────────────
        AppCommand::GetSensorData => return Response::Document(sensor_data(app, now_ms)),
        AppCommand::GetSettings => return Response::Document(settings(app, now_ms)),
        AppCommand::GetProfile => return Response::Document(profile(app)),
        AppCommand::GetAlarmData => return Response::Document(alarm_data(app)),
        AppCommand::GetAllProfiles => return Response::Document(all_profiles(app)),
        AppCommand::GetSystemStatus => return Response::Document(system_status(app, now_ms, p)),

        // ── Mutators ──────────────────────────────────────────
        AppCommand::Ping => CommandReply::success(name, "pong"),

        AppCommand::UpdateSettings(update) => match app.update_settings(&update, now_ms, p.storage) {
            Ok(true) => CommandReply::success(name, "Settings updated"),
            Ok(false) => CommandReply::error(name, "Failed to update settings"),
            Err(e) => CommandReply::error(name, format!("Failed to update settings: {e}")),
        },

        AppCommand::StartIncubation { profile_type } => match profile_type {
            None => CommandReply::error(name, "Missing profile_type parameter"),
            Some(code) if !(0..=8).contains(&code) => CommandReply::error(name, "Invalid profile type"),
            Some(code) => {
                let t = ProfileType::from(code as i32);
                match app.start_incubation(t, now_ms, p) {
                    Ok(()) => CommandReply::success(name, format!("Incubation started: {t}")),
                    Err(e) => CommandReply::error(name, e.to_string()),
                }
            }
        },

        AppCommand::StopIncubation => match app.stop_incubation(now_ms, p) {
            Ok(()) => CommandReply::success(name, "Incubation stopped"),
            Err(e) => CommandReply::error(name, e.to_string()),
        },

        AppCommand::SetTargets { temp, humidity } => match (temp, humidity) {
            (Some(t), Some(h)) => match app.set_targets(t, h, now_ms, p.storage) {
                Ok(()) => CommandReply::success(name, "Targets updated"),
                Err(e) => CommandReply::error(name, e.to_string()),
            },
            _ => CommandReply::error(name, "Missing temperature or humidity parameters"),
        },

        AppCommand::SetMotor { duration, interval } => match (duration, interval) {
            (Some(duration), Some(interval)) => {
                match app.set_turner_settings(TurnerSettings { duration, interval }, p.storage) {
                    Ok(()) => CommandReply::success(name, "Motor settings updated"),
                    Err(e) => CommandReply::error(name, e.to_string()),
                }
            }
            _ => CommandReply::error(name, "Missing duration or interval parameters"),
        },

        AppCommand::ControlMotor { state } => match state {
            Some(on) => {
                app.control_turner(on, now_ms, p.actuators);
                CommandReply::success(name, if on { "Motor on" } else { "Motor off" })
            }
            None => CommandReply::error(name, "Missing state parameter"),
        },

        AppCommand::ControlHeater { state } => match state {
            Some(on) => match app.control_heater(on, now_ms, p.actuators) {
                Ok(()) => CommandReply::success(name, if on { "Heater on" } else { "Heater off" }),
                Err(e) => CommandReply::error(name, e.to_string()),
            },
            None => CommandReply::error(name, "Missing state parameter"),
        },

        AppCommand::ControlHumidifier { state } => match state {
            Some(on) => {
                app.control_humidifier(on, now_ms, p.actuators);
                CommandReply::success(name, if on { "Humidifier on" } else { "Humidifier off" })
            }
            None => CommandReply::error(name, "Missing state parameter"),
        },

        AppCommand::Calibrate { temp, humidity } => match (temp, humidity) {
            (Some(t), Some(h)) => match app.calibrate(t, h, p.sensors, p.storage) {
                Ok(_) => CommandReply::success(name, "Sensors calibrated"),
                Err(e) => CommandReply::error(name, e.to_string()),
            },
            _ => CommandReply::error(name, "Missing temperature or humidity parameters"),
        },

        AppCommand::SetTime { timestamp } => match timestamp {
            Some(ts) => match app.set_time(ts, p.clock) {
                Ok(()) => CommandReply::success(name, "Time set"),
                Err(e) => CommandReply::error(name, e.to_string()),
            },
            None => CommandReply::error(name, "Missing timestamp parameter"),
        },

        AppCommand::SetPowerSave { level } => match level.map(PowerSaveLevel::try_from) {
            Some(Ok(level)) => {
                app.set_power_save(level);
                CommandReply::success(name, "Power save updated")
            }
            Some(Err(msg)) => CommandReply::error(name, msg),
            None => CommandReply::error(name, "Missing level parameter"),
        },
    };
    Response::Reply(reply)
}

// ── Payload builders ──────────────────────────────────────────

pub fn sensor_data(app: &AppService, now_ms: u64) -> Value {
    let data = app.sensor_data();
    let c = app.controller();
    let relays = c.relays();
    json!({
        "type": "sensor_data",
        "temp": data.temperature,
        "humidity": data.humidity,
        "temp1": data.sensor1.temperature,
        "hum1": data.sensor1.humidity,
        "temp2": data.sensor2.temperature,
        "hum2": data.sensor2.humidity,
        "heater": relays.heater.on,
        "humidifier": relays.humidifier.on,
        "motor": relays.turner.on,
        "motorRemaining": c.turner_countdown_minutes(now_ms),
        "pidOutput": c.pid_output(),
        "day": app.incubation_day(),
    })
}

pub fn settings(app: &AppService, now_ms: u64) -> Value {
    let s = app.settings();
    let c = app.controller();
    let turner = c.turner_settings();
    let (kp, ki, kd) = c.pid_params();
    let relays = c.relays();
    json!({
        "type": "settings",
        "profile_type": s.profile_type.code(),
        "target_temp": s.target_temp,
        "target_humidity": s.target_humidity,
        "total_days": s.total_days,
        "start_time": s.start_time,
        "motor_enabled": s.motor_enabled,
        "current_day": app.incubation_day(),
        "remaining_days": app.remaining_days(),
        "hum_hysteresis": c.hum_hysteresis(),
        "power_save": u8::from(c.power_save()),
        "motor": { "duration": turner.duration, "interval": turner.interval },
        "pid": { "kp": kp, "ki": ki, "kd": kd },
        "relay": {
            "heater": relays.heater.on,
            "humidifier": relays.humidifier.on,
            "motor": relays.turner.on,
            "heater_on_ms": relays.heater.total_on_ms_at(now_ms),
            "humidifier_on_ms": relays.humidifier.total_on_ms_at(now_ms),
        },
    })
}

fn profile_doc(p: &Profile) -> Value {
    let stages: Vec<Value> = p
        .stages
        .iter()
        .map(|s| {
            json!({
                "temperature": s.temperature,
                "humidity": s.humidity,
                "motor_active": s.motor_active,
                "start_day": s.start_day,
                "end_day": s.end_day,
            })
        })
        .collect();
    json!({
        "profile_type": p.profile_type.code(),
        "name": p.name.as_str(),
        "total_days": p.total_days,
        "stages": stages,
    })
}

pub fn profile(app: &AppService) -> Value {
    let mut doc = match app.profiles().current_profile() {
        Some(p) => profile_doc(p),
        None => json!({
            "profile_type": ProfileType::None.code(),
            "name": "None",
            "total_days": 0,
            "stages": [],
        }),
    };
    doc["type"] = json!("profile");
    doc
}

pub fn alarm_data(app: &AppService) -> Value {
    let alarms = app.alarms();
    let status = alarms.status();
    let t = alarms.thresholds();
    let skip = alarms.history_len().saturating_sub(ALARM_DATA_HISTORY);
    let history: Vec<Value> = alarms
        .history()
        .skip(skip)
        .map(|a| json!({ "type": a.kind.code(), "message": a.message, "time": a.start_time }))
        .collect();
    json!({
        "type": "alarm_data",
        "alarm_active": status.active,
        "alarm_type": status.kind.code(),
        "alarm_message": status.message,
        "alarm_start_time": status.start_time,
        "thresholds": {
            "enabled": t.enabled,
            "high_temp": t.high_temp,
            "low_temp": t.low_temp,
            "high_hum": t.high_hum,
            "low_hum": t.low_hum,
            "temp_diff": t.temp_diff,
            "hum_diff": t.hum_diff,
        },
        "history": history,
    })
}

pub fn all_profiles(app: &AppService) -> Value {
    let profiles: Vec<Value> = app.profiles().library().profiles.iter().map(profile_doc).collect();
    json!({ "type": "all_profiles", "profiles": profiles })
}

pub fn system_status(app: &AppService, now_ms: u64, p: &mut Ports<'_>) -> Value {
    let data = app.sensor_data();
    let metrics = app.metrics(now_ms, p.storage);
    let recovery = app.recovery();
    json!({
        "type": "system_status",
        "system_name": "incubator",
        "version": env!("CARGO_PKG_VERSION"),
        "sensor1_valid": data.sensor1.valid,
        "sensor2_valid": data.sensor2.valid,
        "free_heap": metrics.heap_free,
        "metrics": metrics,
        "power_outage": recovery.was_power_outage(),
        "outage_duration": recovery.outage_duration(),
        "fault_flags": app.controller().safety_faults(),
        "time": TimeInfo::from_unix(app.unix_time()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tagged_commands() {
        let (name, cmd) = parse(r#"{"cmd":"set_targets","temp":37.5,"humidity":60}"#).unwrap();
        assert_eq!(name, "set_targets");
        assert_eq!(
            cmd,
            AppCommand::SetTargets {
                temp: Some(37.5),
                humidity: Some(60.0)
            }
        );
        assert_eq!(parse(r#"{"cmd":"ping"}"#).unwrap().1, AppCommand::Ping);
    }

    #[test]
    fn missing_parameters_decode_as_none() {
        let (_, cmd) = parse(r#"{"cmd":"start_incubation"}"#).unwrap();
        assert_eq!(cmd, AppCommand::StartIncubation { profile_type: None });
    }

    #[test]
    fn unknown_command_is_named() {
        let err = parse(r#"{"cmd":"self_destruct"}"#).unwrap_err();
        assert_eq!(err.status, "error");
        assert_eq!(err.message, "Unknown command: self_destruct");
    }

    #[test]
    fn garbage_is_invalid_json() {
        assert_eq!(parse("not json").unwrap_err().message, "Invalid JSON");
        assert_eq!(parse(r#"{"x":1}"#).unwrap_err().message, "Missing cmd field");
    }

    #[test]
    fn settings_update_with_nested_alarm() {
        let (_, cmd) = parse(
            r#"{"cmd":"update_settings","target_temp":37.6,"pid_kp":9,"alarm":{"high_temp":39.5}}"#,
        )
        .unwrap();
        let AppCommand::UpdateSettings(u) = cmd else {
            panic!("wrong variant");
        };
        assert_eq!(u.target_temp, Some(37.6));
        assert_eq!(u.pid_kp, Some(9.0));
        assert_eq!(u.pid_ki, None);

        let mut t = AlarmThresholds::default();
        u.alarm.unwrap().apply_to(&mut t);
        assert_eq!(t.high_temp, 39.5);
        assert_eq!(t.low_temp, AlarmThresholds::default().low_temp);
    }

    #[test]
    fn every_listed_command_decodes() {
        for name in COMMANDS {
            let line = format!(r#"{{"cmd":"{name}"}}"#);
            assert!(parse(&line).is_ok(), "{name} did not decode");
        }
    }
}
