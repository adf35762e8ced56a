//! Unified error types for the incubator firmware.
//!
//! A single `Error` enum that every subsystem can convert into, keeping the
//! control loop's error handling uniform.  All variants are `Copy` so they
//! can be passed through the safety supervisor and telemetry without
//! allocation.

use core::fmt;

use crate::app::ports::StorageError;

// ---------------------------------------------------------------------------
// Top-level firmware error
// ---------------------------------------------------------------------------

/// Every fallible operation in the firmware funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A sensor could not be read or returned implausible data.
    Sensor(SensorError),
    /// The real-time clock could not be read or set.
    Clock(ClockError),
    /// A safety interlock forced an actuator off.
    Safety(SafetyFault),
    /// Persistent storage failed.
    Storage(StorageError),
    /// A persisted document could not be encoded or decoded.
    Codec(CodecError),
    /// Peripheral initialisation failed.
    Init(&'static str),
    /// An operator request was refused (bad value, no valid sensor, …).
    Rejected(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sensor(e) => write!(f, "sensor: {e}"),
            Self::Clock(e) => write!(f, "clock: {e}"),
            Self::Safety(e) => write!(f, "safety: {e}"),
            Self::Storage(e) => write!(f, "storage: {e}"),
            Self::Codec(e) => write!(f, "codec: {e}"),
            Self::Init(msg) => write!(f, "init: {msg}"),
            Self::Rejected(msg) => write!(f, "{msg}"),
        }
    }
}

impl From<StorageError> for Error {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

// ---------------------------------------------------------------------------
// Sensor errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorError {
    /// I2C transaction failed or the device did not ACK.
    BusError,
    /// Measurement CRC did not match.
    CrcMismatch,
    /// Driver returned NaN.
    NotANumber,
    /// Reading is outside the instrument or physical range.
    OutOfRange,
    /// Device has not been (re)initialised since the last bus failure.
    NotInitialised,
}

impl fmt::Display for SensorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BusError => write!(f, "I2C bus error"),
            Self::CrcMismatch => write!(f, "CRC mismatch"),
            Self::NotANumber => write!(f, "reading is NaN"),
            Self::OutOfRange => write!(f, "reading out of range"),
            Self::NotInitialised => write!(f, "sensor not initialised"),
        }
    }
}

impl From<SensorError> for Error {
    fn from(e: SensorError) -> Self {
        Self::Sensor(e)
    }
}

// ---------------------------------------------------------------------------
// Clock errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockError {
    /// I2C transaction with the RTC failed.
    BusError,
    /// Register contents do not form a valid calendar date.
    InvalidTime,
}

impl fmt::Display for ClockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BusError => write!(f, "RTC bus error"),
            Self::InvalidTime => write!(f, "RTC holds an invalid time"),
        }
    }
}

impl From<ClockError> for Error {
    fn from(e: ClockError) -> Self {
        Self::Clock(e)
    }
}

// ---------------------------------------------------------------------------
// Safety faults
// ---------------------------------------------------------------------------

/// Heater safety overrides, accumulated in a bitfield by the safety
/// supervisor so that simultaneous conditions are tracked individually.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SafetyFault {
    /// Temperature at or above target + 1.0 °C.  Heater cut, alarm raised.
    CriticalOverTemp = 0b0000_0001,
    /// Temperature above target + 0.2 °C.
    OverTemp = 0b0000_0010,
    /// Temperature below target − 0.3 °C.  Heater forced on.
    UnderTemp = 0b0000_0100,
    /// Heater continuously on longer than the power-save run limit.
    MaxRunTime = 0b0000_1000,
    /// Power-save cut-off close to setpoint.
    PowerSaveCutoff = 0b0001_0000,
    /// No valid sensor reading; every actuator held off.
    NoMeasurement = 0b0010_0000,
}

impl SafetyFault {
    /// Return the bitmask for this fault.
    pub const fn mask(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for SafetyFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CriticalOverTemp => write!(f, "critical over-temperature"),
            Self::OverTemp => write!(f, "over target band"),
            Self::UnderTemp => write!(f, "under target band"),
            Self::MaxRunTime => write!(f, "heater max run time exceeded"),
            Self::PowerSaveCutoff => write!(f, "power-save cut-off"),
            Self::NoMeasurement => write!(f, "no valid measurement"),
        }
    }
}

impl From<SafetyFault> for Error {
    fn from(e: SafetyFault) -> Self {
        Self::Safety(e)
    }
}

// ---------------------------------------------------------------------------
// Codec errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    /// JSON document failed to parse.
    Json,
    /// Binary record has a bad header or truncated body.
    Binary,
    /// Text value (e.g. the power-on timestamp) failed to parse.
    Text,
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json => write!(f, "malformed JSON document"),
            Self::Binary => write!(f, "malformed binary record"),
            Self::Text => write!(f, "malformed text value"),
        }
    }
}

impl From<CodecError> for Error {
    fn from(e: CodecError) -> Self {
        Self::Codec(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Firmware-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
