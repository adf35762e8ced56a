//! GPIO / peripheral pin assignments for the incubator main board.
//!
//! Single source of truth: every driver references this module rather than
//! hard-coding pin numbers.

// ---------------------------------------------------------------------------
// I²C bus (SHT31 ×2, DS3231)
// ---------------------------------------------------------------------------

pub const I2C_SDA_GPIO: i32 = 21;
pub const I2C_SCL_GPIO: i32 = 22;
/// Bus clock.  SHT31 and DS3231 both support fast mode.
pub const I2C_FREQ_HZ: u32 = 100_000;

/// Lower SHT31 (ADDR pin low).
pub const SHT31_ADDR_1: u8 = 0x44;
/// Upper SHT31 (ADDR pin high).
pub const SHT31_ADDR_2: u8 = 0x45;
/// DS3231 real-time clock.
pub const DS3231_ADDR: u8 = 0x68;

// ---------------------------------------------------------------------------
// Relays (SSR, active HIGH)
// ---------------------------------------------------------------------------

pub const RELAY_HEATER_GPIO: i32 = 25;
pub const RELAY_HUMIDIFIER_GPIO: i32 = 26;
pub const RELAY_TURNER_GPIO: i32 = 27;

/// Level that energises a relay.  Mechanical relay boards are active LOW.
pub const RELAY_ACTIVE_HIGH: bool = true;

// ---------------------------------------------------------------------------
// Alarm buzzer
// ---------------------------------------------------------------------------

pub const ALARM_GPIO: i32 = 33;
