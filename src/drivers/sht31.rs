//! Sensirion SHT31 temperature/humidity sensor driver.
//!
//! Single-shot, high-repeatability measurements without clock stretching.
//! The driver holds only the device address; the I2C bus is passed into
//! each call so both sensors can share one bus without a bus manager.
//!
//! ## Frame format
//!
//! ```text
//! ┌──────────┬──────────┬──────┬──────────┬──────────┬──────┐
//! │ T  MSB   │ T  LSB   │ CRC  │ RH MSB   │ RH LSB   │ CRC  │
//! └──────────┴──────────┴──────┴──────────┴──────────┴──────┘
//! ```
//!
//! CRC-8: polynomial 0x31, init 0xFF, no reflection.

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;
use log::debug;

use crate::error::SensorError;
use crate::sensors::RawReading;

const CMD_MEASURE_HIGH: [u8; 2] = [0x24, 0x00];
const CMD_SOFT_RESET: [u8; 2] = [0x30, 0xA2];
const CMD_READ_STATUS: [u8; 2] = [0xF3, 0x2D];
const CMD_CLEAR_STATUS: [u8; 2] = [0x30, 0x41];

/// High-repeatability conversion time (datasheet max 15 ms).
const MEASURE_DELAY_MS: u32 = 16;
const RESET_DELAY_MS: u32 = 2;

pub fn crc8(data: &[u8]) -> u8 {
    let mut crc: u8 = 0xFF;
    for &byte in data {
        crc ^= byte;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 { (crc << 1) ^ 0x31 } else { crc << 1 };
        }
    }
    crc
}

fn word(chunk: &[u8]) -> Result<u16, SensorError> {
    if crc8(&chunk[..2]) != chunk[2] {
        return Err(SensorError::CrcMismatch);
    }
    Ok(u16::from_be_bytes([chunk[0], chunk[1]]))
}

/// Convert a checked 6-byte measurement frame to engineering units.
pub fn decode(frame: &[u8; 6]) -> Result<RawReading, SensorError> {
    let t = word(&frame[0..3])?;
    let rh = word(&frame[3..6])?;
    Ok(RawReading {
        temperature: -45.0 + 175.0 * f32::from(t) / 65535.0,
        humidity: 100.0 * f32::from(rh) / 65535.0,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sht31 {
    address: u8,
}

impl Sht31 {
    pub const fn new(address: u8) -> Self {
        Self { address }
    }

    pub const fn address(&self) -> u8 {
        self.address
    }

    /// Soft reset, then confirm the device answers a status read.
    pub fn init<I: I2c, D: DelayNs>(&self, i2c: &mut I, delay: &mut D) -> Result<(), SensorError> {
        i2c.write(self.address, &CMD_SOFT_RESET)
            .map_err(|_| SensorError::BusError)?;
        delay.delay_ms(RESET_DELAY_MS);
        let status = self.status(i2c)?;
        debug!("Sensors: SHT31 0x{:02x} status 0x{:04x}", self.address, status);
        i2c.write(self.address, &CMD_CLEAR_STATUS)
            .map_err(|_| SensorError::BusError)
    }

    pub fn status<I: I2c>(&self, i2c: &mut I) -> Result<u16, SensorError> {
        let mut buf = [0u8; 3];
        i2c.write_read(self.address, &CMD_READ_STATUS, &mut buf)
            .map_err(|_| SensorError::BusError)?;
        word(&buf)
    }

    /// One blocking single-shot measurement.
    pub fn measure<I: I2c, D: DelayNs>(&self, i2c: &mut I, delay: &mut D) -> Result<RawReading, SensorError> {
        i2c.write(self.address, &CMD_MEASURE_HIGH)
            .map_err(|_| SensorError::BusError)?;
        delay.delay_ms(MEASURE_DELAY_MS);
        let mut frame = [0u8; 6];
        i2c.read(self.address, &mut frame)
            .map_err(|_| SensorError::BusError)?;
        decode(&frame)
    }
}
