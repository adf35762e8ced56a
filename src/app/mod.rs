//! Application core: pure domain logic, zero I/O.
//!
//! This module wires the incubator subsystems together: sensor fusion,
//! environmental control, profiles, recovery, alarms and the data log.
//! All interaction with hardware happens through **port traits** defined
//! in [`ports`], keeping this layer fully testable without real peripherals.

pub mod commands;
pub mod events;
pub mod ports;
pub mod service;
