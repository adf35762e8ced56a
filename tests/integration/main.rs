//! Integration tests for the incubator core.
//!
//! `mock_hw` provides a rig of host-side ports; the other modules drive
//! `AppService` through it, either directly or over the JSON console
//! protocol.

mod command_tests;
mod mock_hw;
mod service_tests;
