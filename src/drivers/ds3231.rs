//! Maxim DS3231 real-time clock driver.
//!
//! The calendar registers hold BCD in 24-hour mode; years are stored as
//! an offset from 2000.  The oscillator-stop flag (OSF, bit 7 of the
//! status register) survives until cleared and tells us the backup
//! battery failed while main power was off.

use embedded_hal::i2c::I2c;

use crate::clock::TimeInfo;
use crate::error::ClockError;

const REG_SECONDS: u8 = 0x00;
const REG_STATUS: u8 = 0x0F;
const STATUS_OSF: u8 = 0x80;
const HOUR_12H_MODE: u8 = 0x40;
const HOUR_PM: u8 = 0x20;

const fn bcd_to_bin(v: u8) -> u8 {
    (v >> 4) * 10 + (v & 0x0F)
}

const fn bin_to_bcd(v: u8) -> u8 {
    ((v / 10) << 4) | (v % 10)
}

/// Decode the seven calendar registers to Unix seconds.
pub fn decode(regs: &[u8; 7]) -> Result<u32, ClockError> {
    let second = bcd_to_bin(regs[0] & 0x7F);
    let minute = bcd_to_bin(regs[1] & 0x7F);
    let hour = if regs[2] & HOUR_12H_MODE != 0 {
        let h = bcd_to_bin(regs[2] & 0x1F) % 12;
        if regs[2] & HOUR_PM != 0 { h + 12 } else { h }
    } else {
        bcd_to_bin(regs[2] & 0x3F)
    };
    let day = bcd_to_bin(regs[4] & 0x3F);
    let month = bcd_to_bin(regs[5] & 0x1F);
    let year = 2000 + u16::from(bcd_to_bin(regs[6]));
    TimeInfo::to_unix(year, month, day, hour, minute, second).ok_or(ClockError::InvalidTime)
}

/// Encode Unix seconds as the seven calendar registers.
pub fn encode(unix: u32) -> Result<[u8; 7], ClockError> {
    let t = TimeInfo::from_unix(unix);
    if !(2000..=2099).contains(&t.year) {
        return Err(ClockError::InvalidTime);
    }
    // 1970-01-01 was a Thursday; DS3231 day-of-week is 1..=7.
    let weekday = ((unix / crate::clock::SECS_PER_DAY + 3) % 7 + 1) as u8;
    Ok([
        bin_to_bcd(t.second),
        bin_to_bcd(t.minute),
        bin_to_bcd(t.hour),
        weekday,
        bin_to_bcd(t.day),
        bin_to_bcd(t.month),
        bin_to_bcd((t.year - 2000) as u8),
    ])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ds3231 {
    address: u8,
}

impl Ds3231 {
    pub const fn new(address: u8) -> Self {
        Self { address }
    }

    pub fn now<I: I2c>(&self, i2c: &mut I) -> Result<u32, ClockError> {
        let mut regs = [0u8; 7];
        i2c.write_read(self.address, &[REG_SECONDS], &mut regs)
            .map_err(|_| ClockError::BusError)?;
        decode(&regs)
    }

    /// Write the calendar and clear the oscillator-stop flag.
    pub fn set_unix_time<I: I2c>(&self, i2c: &mut I, unix: u32) -> Result<(), ClockError> {
        let regs = encode(unix)?;
        let mut frame = [0u8; 8];
        frame[0] = REG_SECONDS;
        frame[1..].copy_from_slice(&regs);
        i2c.write(self.address, &frame)
            .map_err(|_| ClockError::BusError)?;

        let status = self.status(i2c)?;
        i2c.write(self.address, &[REG_STATUS, status & !STATUS_OSF])
            .map_err(|_| ClockError::BusError)
    }

    /// `true` when the oscillator stopped since the time was last set.
    /// An unreadable clock counts as having lost power.
    pub fn lost_power<I: I2c>(&self, i2c: &mut I) -> bool {
        match self.status(i2c) {
            Ok(s) => s & STATUS_OSF != 0,
            Err(_) => true,
        }
    }

    fn status<I: I2c>(&self, i2c: &mut I) -> Result<u8, ClockError> {
        let mut buf = [0u8; 1];
        i2c.write_read(self.address, &[REG_STATUS], &mut buf)
            .map_err(|_| ClockError::BusError)?;
        Ok(buf[0])
    }
}
