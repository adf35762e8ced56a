//! Hardware adapters: bridge real peripherals to domain port traits.
//!
//! Three adapters so the service can borrow each port independently:
//!
//! | Adapter          | Port           | Peripheral          |
//! |------------------|----------------|---------------------|
//! | [`SensorAdapter`]| [`SensorPort`] | SHT31 ×2 on I2C     |
//! | [`RtcAdapter`]   | [`ClockPort`]  | DS3231 on I2C       |
//! | [`RelayAdapter`] | [`ActuatorPort`]| relay + buzzer GPIO|
//!
//! The sensors and the RTC share one bus; `main()` hands each adapter an
//! `embedded_hal_bus::i2c::RefCellDevice` over the same driver.  The bus
//! and delay are generic `embedded-hal` types, so the adapters run on the
//! host against a scripted bus.

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;
use log::warn;

use crate::app::ports::{ActuatorPort, ClockPort, SensorPort};
use crate::drivers::ds3231::Ds3231;
use crate::drivers::hw_init;
use crate::drivers::relay::RelayBank;
use crate::drivers::sht31::Sht31;
use crate::error::{ClockError, SensorError};
use crate::pins;
use crate::sensors::{RawReading, SensorId};

// ── Sensors ───────────────────────────────────────────────────

/// Both SHT31s behind [`SensorPort`].
pub struct SensorAdapter<I, D> {
    i2c: I,
    delay: D,
    sensors: [Sht31; 2],
    /// Sensors that answered their last init.
    present: [bool; 2],
}

impl<I: I2c, D: DelayNs> SensorAdapter<I, D> {
    pub fn new(i2c: I, delay: D) -> Self {
        Self {
            i2c,
            delay,
            sensors: [Sht31::new(pins::SHT31_ADDR_1), Sht31::new(pins::SHT31_ADDR_2)],
            present: [false; 2],
        }
    }

    fn slot(id: SensorId) -> usize {
        usize::from(id.number() - 1)
    }
}

impl<I: I2c, D: DelayNs> SensorPort for SensorAdapter<I, D> {
    fn read_raw(&mut self, id: SensorId) -> Result<RawReading, SensorError> {
        let slot = Self::slot(id);
        if !self.present[slot] {
            return Err(SensorError::NotInitialised);
        }
        let reading = self.sensors[slot].measure(&mut self.i2c, &mut self.delay);
        if reading == Err(SensorError::BusError) {
            // Force a re-init before the next read.
            self.present[slot] = false;
        }
        reading
    }

    fn reinit(&mut self, id: SensorId) -> bool {
        let slot = Self::slot(id);
        let sensor = self.sensors[slot];
        let ok = match sensor.init(&mut self.i2c, &mut self.delay) {
            Ok(()) => true,
            Err(e) => {
                warn!("Sensors: SHT31 0x{:02x} init failed: {}", sensor.address(), e);
                false
            }
        };
        self.present[slot] = ok;
        ok
    }
}

// ── Real-time clock ───────────────────────────────────────────

/// DS3231 behind [`ClockPort`].
pub struct RtcAdapter<I> {
    i2c: I,
    rtc: Ds3231,
}

impl<I: I2c> RtcAdapter<I> {
    pub fn new(i2c: I) -> Self {
        Self {
            i2c,
            rtc: Ds3231::new(pins::DS3231_ADDR),
        }
    }
}

impl<I: I2c> ClockPort for RtcAdapter<I> {
    fn now(&mut self) -> Result<u32, ClockError> {
        self.rtc.now(&mut self.i2c)
    }

    fn lost_power(&mut self) -> bool {
        self.rtc.lost_power(&mut self.i2c)
    }

    fn set_time(&mut self, unix: u32) -> Result<(), ClockError> {
        self.rtc.set_unix_time(&mut self.i2c, unix)
    }
}

// ── Relays and buzzer ─────────────────────────────────────────

/// Relay bank behind [`ActuatorPort`], plus the alarm buzzer.
#[derive(Default)]
pub struct RelayAdapter {
    relays: RelayBank,
    buzzer: bool,
}

impl RelayAdapter {
    pub const fn new() -> Self {
        Self {
            relays: RelayBank::new(),
            buzzer: false,
        }
    }

    pub fn relays(&self) -> &RelayBank {
        &self.relays
    }

    /// Alarm buzzer output.  Only writes the pin on a change.
    pub fn set_buzzer(&mut self, on: bool) {
        if self.buzzer != on {
            hw_init::gpio_write(pins::ALARM_GPIO, on);
            self.buzzer = on;
        }
    }

    pub fn buzzer(&self) -> bool {
        self.buzzer
    }
}

impl ActuatorPort for RelayAdapter {
    fn set_heater(&mut self, on: bool) {
        self.relays.heater.set(on);
    }

    fn set_humidifier(&mut self, on: bool) {
        self.relays.humidifier.set(on);
    }

    fn set_turner(&mut self, on: bool) {
        self.relays.turner.set(on);
    }

    fn all_off(&mut self) {
        self.relays.all_off();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::sht31::crc8;
    use core::cell::RefCell;
    use embedded_hal::i2c::{ErrorKind, ErrorType, Operation};
    use embedded_hal_bus::i2c::RefCellDevice;

    /// Bus where only 0x44 answers; reads return one canned frame.
    struct OneSensorBus {
        frame: [u8; 6],
        transactions: usize,
    }

    impl ErrorType for OneSensorBus {
        type Error = ErrorKind;
    }

    impl I2c for OneSensorBus {
        fn transaction(&mut self, address: u8, operations: &mut [Operation<'_>]) -> Result<(), Self::Error> {
            self.transactions += 1;
            if address != pins::SHT31_ADDR_1 {
                return Err(ErrorKind::Other);
            }
            for op in operations {
                if let Operation::Read(buf) = op {
                    let n = buf.len().min(6);
                    buf[..n].copy_from_slice(&self.frame[..n]);
                }
            }
            Ok(())
        }
    }

    struct NoDelay;

    impl DelayNs for NoDelay {
        fn delay_ns(&mut self, _ns: u32) {}
    }

    fn bus() -> OneSensorBus {
        // T word 0x6666 -> 25.0 °C, RH word 0x8000 -> ~50 %.
        OneSensorBus {
            frame: [0x66, 0x66, crc8(&[0x66, 0x66]), 0x80, 0x00, crc8(&[0x80, 0x00])],
            transactions: 0,
        }
    }

    #[test]
    fn read_requires_init() {
        let mut sensors = SensorAdapter::new(bus(), NoDelay);
        assert_eq!(sensors.read_raw(SensorId::Primary), Err(SensorError::NotInitialised));
    }

    #[test]
    fn present_sensor_reads_and_absent_fails_init() {
        let mut sensors = SensorAdapter::new(bus(), NoDelay);
        assert!(!sensors.reinit(SensorId::Secondary));
        // Status read returns the first three frame bytes; CRC is valid.
        assert!(sensors.reinit(SensorId::Primary));
        let r = sensors.read_raw(SensorId::Primary).unwrap();
        assert!((r.temperature - 25.0).abs() < 0.01);
        assert!((r.humidity - 50.0).abs() < 0.01);
    }

    #[test]
    fn sensors_and_rtc_share_one_bus() {
        let shared = RefCell::new(bus());
        let mut sensors = SensorAdapter::new(RefCellDevice::new(&shared), NoDelay);
        let mut rtc = RtcAdapter::new(RefCellDevice::new(&shared));

        assert!(sensors.reinit(SensorId::Primary));
        // Nothing answers at 0x68.
        assert!(rtc.lost_power());
        assert_eq!(rtc.now(), Err(ClockError::BusError));
        assert!(sensors.read_raw(SensorId::Primary).is_ok());
        assert!(shared.borrow().transactions >= 5);
    }

    #[test]
    fn relays_follow_commands() {
        let mut out = RelayAdapter::new();
        out.set_heater(true);
        out.set_turner(true);
        assert!(out.relays().heater.is_on());
        out.all_off();
        assert!(!out.relays().heater.is_on());
        assert!(!out.relays().turner.is_on());
    }

    #[test]
    fn buzzer_tracks_last_command() {
        let mut out = RelayAdapter::new();
        assert!(!out.buzzer());
        out.set_buzzer(true);
        assert!(out.buzzer());
        out.set_buzzer(false);
        assert!(!out.buzzer());
    }
}
