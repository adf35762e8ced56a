//! Alarm evaluator.
//!
//! Evaluated on a fixed cadence while alarms are enabled.  Conditions are
//! checked in priority order and the first match wins:
//!
//! ```text
//!   sensor failure → high T → low T → high H → low H → ΔT → ΔH
//! ```
//!
//! No match clears an active alarm.  A repeated detection of the alarm
//! type already active is silent.

use heapless::Deque;
use log::{error, info};
use serde::Serialize;

use crate::config::AlarmThresholds;
use crate::sensors::SensorData;

pub const MAX_ALARM_HISTORY: usize = 10;
/// Message length carried in the remote payload before truncation.
pub const MAX_REMOTE_MESSAGE: usize = 200;

// ───────────────────────────────────────────────────────────────
// Alarm kinds
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(into = "u8")]
pub enum AlarmType {
    None,
    HighTemp,
    LowTemp,
    HighHumidity,
    LowHumidity,
    SensorError,
    PowerOutage,
    TempDiff,
    HumDiff,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlarmCategory {
    Unknown,
    Temperature,
    Humidity,
    System,
    Sensor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlarmSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl AlarmType {
    pub const fn code(self) -> u8 {
        self as u8
    }

    pub const fn category(self) -> AlarmCategory {
        match self {
            Self::None => AlarmCategory::Unknown,
            Self::HighTemp | Self::LowTemp => AlarmCategory::Temperature,
            Self::HighHumidity | Self::LowHumidity => AlarmCategory::Humidity,
            Self::SensorError | Self::PowerOutage => AlarmCategory::System,
            Self::TempDiff | Self::HumDiff => AlarmCategory::Sensor,
        }
    }

    pub const fn severity(self) -> AlarmSeverity {
        match self {
            Self::HighTemp | Self::HighHumidity => AlarmSeverity::High,
            Self::LowTemp | Self::LowHumidity => AlarmSeverity::Low,
            Self::SensorError | Self::PowerOutage => AlarmSeverity::Critical,
            Self::None | Self::TempDiff | Self::HumDiff => AlarmSeverity::Medium,
        }
    }
}

impl From<AlarmType> for u8 {
    fn from(t: AlarmType) -> Self {
        t.code()
    }
}

// ───────────────────────────────────────────────────────────────
// Status
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlarmStatus {
    pub active: bool,
    #[serde(rename = "type")]
    pub kind: AlarmType,
    /// Uptime (ms) at which the alarm was raised.
    pub start_time: u64,
    pub message: String,
}

impl AlarmStatus {
    fn inactive() -> Self {
        Self {
            active: false,
            kind: AlarmType::None,
            start_time: 0,
            message: String::new(),
        }
    }
}

/// Outbound `{"notification":"alarm", …}` document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlarmNotification {
    pub notification: &'static str,
    #[serde(rename = "type")]
    pub kind: AlarmType,
    pub message: String,
    pub time: u32,
    pub category: AlarmCategory,
    pub severity: AlarmSeverity,
}

impl AlarmNotification {
    pub fn new(status: &AlarmStatus, unix_time: u32) -> Self {
        let message = match status.message.char_indices().nth(MAX_REMOTE_MESSAGE) {
            Some((cut, _)) => format!("{}...", &status.message[..cut]),
            None => status.message.clone(),
        };
        Self {
            notification: "alarm",
            kind: status.kind,
            message,
            time: unix_time,
            category: status.kind.category(),
            severity: status.kind.severity(),
        }
    }
}

/// Result of one evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum AlarmChange {
    Raised(AlarmStatus),
    Cleared,
}

// ───────────────────────────────────────────────────────────────
// Evaluator
// ───────────────────────────────────────────────────────────────

pub struct AlarmEvaluator {
    thresholds: AlarmThresholds,
    current: AlarmStatus,
    history: Deque<AlarmStatus, MAX_ALARM_HISTORY>,
    interval_ms: u32,
    last_check_ms: Option<u64>,
}

impl AlarmEvaluator {
    pub fn new(thresholds: AlarmThresholds, interval_ms: u32) -> Self {
        Self {
            thresholds,
            current: AlarmStatus::inactive(),
            history: Deque::new(),
            interval_ms,
            last_check_ms: None,
        }
    }

    /// First matching condition for `data`, or `None`.
    pub fn detect(&self, data: &SensorData) -> Option<(AlarmType, String)> {
        let t = &self.thresholds;
        if !data.any_valid() {
            return Some((AlarmType::SensorError, "All sensors failed".into()));
        }
        let (temp, hum) = (data.temperature, data.humidity);
        if temp > t.high_temp {
            return Some((AlarmType::HighTemp, format!("High temp: {temp:.1}C")));
        }
        if temp < t.low_temp {
            return Some((AlarmType::LowTemp, format!("Low temp: {temp:.1}C")));
        }
        if hum > t.high_hum {
            return Some((AlarmType::HighHumidity, format!("High humidity: {hum:.1}%")));
        }
        if hum < t.low_hum {
            return Some((AlarmType::LowHumidity, format!("Low humidity: {hum:.1}%")));
        }
        if data.both_valid() {
            let (dt, dh) = data.divergence();
            if dt > t.temp_diff {
                return Some((AlarmType::TempDiff, format!("Temp difference: {dt:.1}C")));
            }
            if dh > t.hum_diff {
                return Some((AlarmType::HumDiff, format!("Humidity difference: {dh:.1}%")));
            }
        }
        None
    }

    /// Periodic evaluation.  `None` when disabled, not yet due, or nothing
    /// changed.  A power-outage alarm is never derived from readings, so it
    /// stays latched until cleared or replaced by a sensor condition.
    pub fn update(&mut self, now_ms: u64, data: &SensorData) -> Option<AlarmChange> {
        if !self.thresholds.enabled {
            return None;
        }
        if let Some(last) = self.last_check_ms {
            if now_ms.saturating_sub(last) < u64::from(self.interval_ms) {
                return None;
            }
        }
        self.last_check_ms = Some(now_ms);

        match self.detect(data) {
            Some((kind, message)) => self.raise(kind, message, now_ms),
            None if self.current.active && self.current.kind != AlarmType::PowerOutage => {
                self.clear();
                Some(AlarmChange::Cleared)
            }
            None => None,
        }
    }

    /// Raise unless the same type is already active.
    pub fn raise(&mut self, kind: AlarmType, message: String, now_ms: u64) -> Option<AlarmChange> {
        if self.current.active && self.current.kind == kind {
            return None;
        }
        Some(AlarmChange::Raised(self.log(kind, message, now_ms)))
    }

    /// Unconditionally make `kind` the active alarm and record it.
    pub fn log(&mut self, kind: AlarmType, message: String, now_ms: u64) -> AlarmStatus {
        self.current = AlarmStatus {
            active: true,
            kind,
            start_time: now_ms,
            message,
        };
        if self.history.is_full() {
            self.history.pop_front();
        }
        let _ = self.history.push_back(self.current.clone());
        error!("Alarm: {}", self.current.message);
        self.current.clone()
    }

    pub fn clear(&mut self) {
        self.current = AlarmStatus::inactive();
        info!("Alarm: cleared");
    }

    pub fn status(&self) -> &AlarmStatus {
        &self.current
    }

    /// Oldest first.
    pub fn history(&self) -> impl Iterator<Item = &AlarmStatus> {
        self.history.iter()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn thresholds(&self) -> AlarmThresholds {
        self.thresholds
    }

    pub fn set_thresholds(&mut self, thresholds: AlarmThresholds) {
        self.thresholds = thresholds;
        info!("Alarm: thresholds updated");
    }

    pub fn is_enabled(&self) -> bool {
        self.thresholds.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.thresholds.enabled = enabled;
        info!("Alarm: {}", if enabled { "enabled" } else { "disabled" });
    }
}
