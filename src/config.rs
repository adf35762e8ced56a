//! System configuration parameters and persisted user documents.
//!
//! Two families live here:
//!
//! - **Documents** the operator edits (settings, turner, calibration, alarm
//!   thresholds).  Stored as JSON with the field names the companion app
//!   already speaks; missing keys fall back to their defaults.
//! - **[`SystemConfig`]**, the tuned constants of the control core.  Stored
//!   as postcard through the `ConfigPort` and range-validated before save.

use serde::{Deserialize, Serialize};

use crate::profile::ProfileType;

// ───────────────────────────────────────────────────────────────
// Factory defaults
// ───────────────────────────────────────────────────────────────

pub const DEFAULT_TEMP: f32 = 37.8;
pub const DEFAULT_HUMIDITY: f32 = 65.0;
pub const DEFAULT_TOTAL_DAYS: u16 = 21;
pub const PID_KP: f32 = 10.0;
pub const PID_KI: f32 = 0.1;
pub const PID_KD: f32 = 50.0;
pub const HUM_HYSTERESIS: f32 = 2.0;
pub const DEFAULT_TURNER_DURATION_MS: u32 = 14_000;
pub const DEFAULT_TURNER_INTERVAL_MS: u32 = 7_200_000;

// ───────────────────────────────────────────────────────────────
// Incubation settings
// ───────────────────────────────────────────────────────────────

/// The operator's incubation run.  `start_time == 0` is the only
/// "no active incubation" sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IncubationSettings {
    #[serde(rename = "type")]
    pub profile_type: ProfileType,
    pub target_temp: f32,
    pub target_humidity: f32,
    pub total_days: u16,
    /// Unix seconds; 0 = inactive.
    pub start_time: u32,
    pub motor_enabled: bool,
    pub pid_kp: f32,
    pub pid_ki: f32,
    pub pid_kd: f32,
    pub hum_hysteresis: f32,
}

impl Default for IncubationSettings {
    fn default() -> Self {
        Self {
            profile_type: ProfileType::Chicken,
            target_temp: DEFAULT_TEMP,
            target_humidity: DEFAULT_HUMIDITY,
            total_days: DEFAULT_TOTAL_DAYS,
            start_time: 0,
            motor_enabled: true,
            pid_kp: PID_KP,
            pid_ki: PID_KI,
            pid_kd: PID_KD,
            hum_hysteresis: HUM_HYSTERESIS,
        }
    }
}

impl IncubationSettings {
    /// Pull loaded values back into the ranges the hardware can hold.
    pub fn clamp_to_limits(&mut self) {
        self.target_temp = self.target_temp.clamp(30.0, 42.0);
        self.target_humidity = self.target_humidity.clamp(30.0, 90.0);
        self.total_days = self.total_days.clamp(1, 60);
    }

    pub fn is_active(&self) -> bool {
        self.start_time > 0 && self.profile_type != ProfileType::None
    }
}

// ───────────────────────────────────────────────────────────────
// Turner settings
// ───────────────────────────────────────────────────────────────

/// Egg-turner run length and period, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnerSettings {
    pub duration: u32,
    pub interval: u32,
}

impl Default for TurnerSettings {
    fn default() -> Self {
        Self {
            duration: DEFAULT_TURNER_DURATION_MS,
            interval: DEFAULT_TURNER_INTERVAL_MS,
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Sensor calibration
// ───────────────────────────────────────────────────────────────

/// Per-sensor additive offsets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Calibration {
    pub temp_offset1: f32,
    pub hum_offset1: f32,
    pub temp_offset2: f32,
    pub hum_offset2: f32,
}

// ───────────────────────────────────────────────────────────────
// Alarm thresholds
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlarmThresholds {
    pub enabled: bool,
    pub high_temp: f32,
    pub low_temp: f32,
    pub high_hum: f32,
    pub low_hum: f32,
    pub temp_diff: f32,
    pub hum_diff: f32,
}

impl Default for AlarmThresholds {
    fn default() -> Self {
        Self {
            enabled: true,
            high_temp: 38.5,
            low_temp: 36.5,
            high_hum: 80.0,
            low_hum: 50.0,
            temp_diff: 2.0,
            hum_diff: 10.0,
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Tuned constants of the control core
// ───────────────────────────────────────────────────────────────

/// Core system configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemConfig {
    // --- Sensors ---
    /// Minimum time between physical sensor reads (ms).
    pub sensor_read_interval_ms: u32,
    /// Moving-average window length (samples).
    pub filter_samples: u8,
    /// Inter-sensor temperature divergence that triggers a warning (°C).
    pub divergence_temp_c: f32,
    /// Inter-sensor humidity divergence that triggers a warning (%RH).
    pub divergence_hum_pct: f32,
    /// Period of the failed-sensor re-initialisation sweep (ms).
    pub sensor_recovery_interval_ms: u32,

    // --- Heater ---
    /// Time-proportioning window (ms); also the PID output ceiling.
    pub pwm_window_ms: u32,
    /// Maximum change of the PID output between evaluations.
    pub max_output_step: f32,
    /// Adaptive control period bounds (ms).
    pub control_interval_min_ms: u32,
    pub control_interval_max_ms: u32,

    // --- Humidity ---
    pub humidity_interval_ms: u32,

    // --- Cadences ---
    pub alarm_interval_ms: u32,
    pub profile_interval_ms: u32,
    pub snapshot_interval_ms: u32,
    pub datalog_interval_ms: u32,

    // --- Recovery ---
    /// Gaps strictly longer than this are recorded as outages (s).
    pub outage_threshold_secs: u32,

    // --- Data log dedup ---
    pub log_min_temp_delta: f32,
    pub log_min_hum_delta: f32,
    pub log_max_silence_secs: u32,
    pub log_flush_interval_ms: u32,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            // Sensors
            sensor_read_interval_ms: 2_000,
            filter_samples: 5,
            divergence_temp_c: 5.0,
            divergence_hum_pct: 15.0,
            sensor_recovery_interval_ms: 6 * 3_600_000,

            // Heater
            pwm_window_ms: 5_000,
            max_output_step: 500.0,
            control_interval_min_ms: 500,
            control_interval_max_ms: 2_000,

            // Humidity
            humidity_interval_ms: 5_000,

            // Cadences
            alarm_interval_ms: 5_000,
            profile_interval_ms: 60_000,
            snapshot_interval_ms: 300_000,
            datalog_interval_ms: 300_000,

            // Recovery
            outage_threshold_secs: 5,

            // Data log
            log_min_temp_delta: 0.2,
            log_min_hum_delta: 1.0,
            log_max_silence_secs: 600,
            log_flush_interval_ms: 60_000,
        }
    }
}
