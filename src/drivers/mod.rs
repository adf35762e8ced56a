//! Peripheral drivers: SHT31 pair, DS3231, relays, and boot-time helpers.

pub mod ds3231;
pub mod hw_init;
pub mod relay;
pub mod sht31;
pub mod watchdog;
