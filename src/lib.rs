//! Incubator firmware library.
//!
//! Exposes the pure-logic modules for integration testing and external
//! inspection. All ESP-IDF-specific code is guarded by
//! `#[cfg(target_os = "espidf")]` within each module.

#![deny(unused_must_use)]

pub mod app;
pub mod config;
pub mod clock;
pub mod diagnostics;
pub mod error;
pub mod scheduler;
pub mod safety;
pub mod profile;
pub mod recovery;
pub mod alarm;
pub mod datalog;
pub mod store;

mod pins;

// Hardware-facing modules; the ESP-IDF paths are guarded by cfg
// attributes inside, the rest runs on the host against mocks.
pub mod adapters;
pub mod drivers;
pub mod sensors;
pub mod control;
