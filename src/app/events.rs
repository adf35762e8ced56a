//! Outbound application events.
//!
//! The [`AppService`](super::service::AppService) emits these through the
//! [`EventSink`](super::ports::EventSink) port.  Adapters on the other
//! side decide what to do with them: log to serial, push to connected
//! remote clients, beep, etc.

use serde::Serialize;

use crate::alarm::AlarmNotification;
use crate::control::turner::TurnerAction;
use crate::diagnostics::MemoryAction;
use crate::profile::{ProfileType, StageChange};
use crate::recovery::PowerOutage;
use crate::sensors::ChannelReading;

/// Structured events emitted by the application core.
#[derive(Debug, Clone)]
pub enum AppEvent {
    /// Boot finished.  Carries the outage detected at boot, if any, and
    /// whether the run was restored from the recovery snapshot.
    Started {
        outage: Option<PowerOutage>,
        restored: bool,
    },

    /// Periodic telemetry snapshot.
    Telemetry(TelemetryData),

    /// A new alarm became active.
    Alarm(AlarmNotification),

    /// The active alarm cleared.
    AlarmCleared,

    /// The active profile entered a new stage.
    StageChanged(StageChange),

    IncubationStarted {
        profile: ProfileType,
        total_days: u16,
    },

    IncubationStopped,

    /// The egg turner started or finished a turn.
    Turner(TurnerAction),

    /// One or more safety faults were raised (bitmask).
    FaultDetected(u8),

    /// All safety faults have been cleared.
    FaultCleared,

    /// Free heap dropped below a guard threshold.
    MemoryPressure(MemoryAction),
}

/// A point-in-time telemetry snapshot suitable for logging or transmission.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TelemetryData {
    pub temperature: f32,
    pub humidity: f32,
    pub sensor1: ChannelReading,
    pub sensor2: ChannelReading,
    pub valid: bool,
    pub target_temp: f32,
    pub target_humidity: f32,
    pub heater: bool,
    pub humidifier: bool,
    pub turner: bool,
    pub pid_output: f32,
    /// Incubation day, 0 when idle.
    pub day: u32,
    pub fault_flags: u8,
}
