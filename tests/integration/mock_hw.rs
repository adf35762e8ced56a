//! Mock adapters for integration tests.
//!
//! Records every actuator call so tests can assert on the full relay
//! history, and lets each test script sensor readings and the wall clock
//! without touching real I2C or GPIO.

use incubator::app::events::AppEvent;
use incubator::app::ports::{ActuatorPort, ClockPort, EventSink, SensorPort, StorageError, StoragePort};
use incubator::app::service::Ports;
use incubator::error::{ClockError, SensorError};
use incubator::sensors::{RawReading, SensorId};
use std::collections::HashMap;

// ── Actuator call record ──────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActuatorCall {
    Heater(bool),
    Humidifier(bool),
    Turner(bool),
    AllOff,
}

#[derive(Default)]
pub struct MockRelays {
    pub calls: Vec<ActuatorCall>,
    pub heater: bool,
    pub humidifier: bool,
    pub turner: bool,
}

impl ActuatorPort for MockRelays {
    fn set_heater(&mut self, on: bool) {
        self.heater = on;
        self.calls.push(ActuatorCall::Heater(on));
    }

    fn set_humidifier(&mut self, on: bool) {
        self.humidifier = on;
        self.calls.push(ActuatorCall::Humidifier(on));
    }

    fn set_turner(&mut self, on: bool) {
        self.turner = on;
        self.calls.push(ActuatorCall::Turner(on));
    }

    fn all_off(&mut self) {
        self.heater = false;
        self.humidifier = false;
        self.turner = false;
        self.calls.push(ActuatorCall::AllOff);
    }
}

// ── Scripted sensors ──────────────────────────────────────────

/// Two sensors whose next reading is set by the test.
pub struct MockSensors {
    pub readings: [Result<RawReading, SensorError>; 2],
    pub present: [bool; 2],
    pub reads: usize,
}

#[allow(dead_code)]
impl MockSensors {
    pub fn new(t1: f32, h1: f32, t2: f32, h2: f32) -> Self {
        Self {
            readings: [
                Ok(RawReading { temperature: t1, humidity: h1 }),
                Ok(RawReading { temperature: t2, humidity: h2 }),
            ],
            present: [true; 2],
            reads: 0,
        }
    }

    pub fn set(&mut self, id: SensorId, temperature: f32, humidity: f32) {
        self.readings[slot(id)] = Ok(RawReading { temperature, humidity });
    }

    pub fn fail(&mut self, id: SensorId, e: SensorError) {
        self.readings[slot(id)] = Err(e);
    }
}

fn slot(id: SensorId) -> usize {
    usize::from(id.number() - 1)
}

impl SensorPort for MockSensors {
    fn read_raw(&mut self, id: SensorId) -> Result<RawReading, SensorError> {
        self.reads += 1;
        self.readings[slot(id)]
    }

    fn reinit(&mut self, id: SensorId) -> bool {
        self.present[slot(id)]
    }
}

// ── Settable clock ────────────────────────────────────────────

pub struct MockClock {
    pub now: Option<u32>,
    pub lost_power: bool,
}

impl MockClock {
    pub fn at(unix: u32) -> Self {
        Self {
            now: Some(unix),
            lost_power: false,
        }
    }
}

impl ClockPort for MockClock {
    fn now(&mut self) -> Result<u32, ClockError> {
        self.now.ok_or(ClockError::BusError)
    }

    fn lost_power(&mut self) -> bool {
        self.lost_power
    }

    fn set_time(&mut self, unix: u32) -> Result<(), ClockError> {
        self.now = Some(unix);
        self.lost_power = false;
        Ok(())
    }
}

// ── In-memory storage ─────────────────────────────────────────

#[derive(Default)]
pub struct MockStorage {
    store: HashMap<String, Vec<u8>>,
    /// Every write fails with `Full` while set.
    pub full: bool,
}

#[allow(dead_code)]
impl MockStorage {
    pub fn get(&self, namespace: &str, key: &str) -> Option<&[u8]> {
        self.store.get(&format!("{}::{}", namespace, key)).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }
}

impl StoragePort for MockStorage {
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        match self.store.get(&format!("{}::{}", namespace, key)) {
            Some(v) if v.len() > buf.len() => Err(StorageError::BufferTooSmall),
            Some(v) => {
                buf[..v.len()].copy_from_slice(v);
                Ok(v.len())
            }
            None => Err(StorageError::NotFound),
        }
    }

    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        if self.full {
            return Err(StorageError::Full);
        }
        self.store.insert(format!("{}::{}", namespace, key), data.to_vec());
        Ok(())
    }

    fn exists(&self, namespace: &str, key: &str) -> bool {
        self.store.contains_key(&format!("{}::{}", namespace, key))
    }

    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError> {
        self.store.remove(&format!("{}::{}", namespace, key));
        Ok(())
    }
}

// ── Collecting sink ───────────────────────────────────────────

#[derive(Default)]
pub struct CollectingSink {
    pub events: Vec<AppEvent>,
}

#[allow(dead_code)]
impl CollectingSink {
    pub fn alarms(&self) -> Vec<String> {
        self.events
            .iter()
            .filter_map(|e| match e {
                AppEvent::Alarm(a) => Some(a.message.to_string()),
                _ => None,
            })
            .collect()
    }
}

impl EventSink for CollectingSink {
    fn emit(&mut self, event: &AppEvent) {
        self.events.push(event.clone());
    }
}

// ── Rig ───────────────────────────────────────────────────────

/// Every mock in one place; [`Rig::ports`] lends them to the service.
pub struct Rig {
    pub sensors: MockSensors,
    pub relays: MockRelays,
    pub clock: MockClock,
    pub storage: MockStorage,
    pub sink: CollectingSink,
}

/// 2024-03-15 12:34:56 UTC.
pub const T0: u32 = 1_710_506_096;

#[allow(dead_code)]
impl Rig {
    pub fn new() -> Self {
        Self {
            sensors: MockSensors::new(37.5, 55.0, 37.5, 55.0),
            relays: MockRelays::default(),
            clock: MockClock::at(T0),
            storage: MockStorage::default(),
            sink: CollectingSink::default(),
        }
    }

    pub fn ports(&mut self) -> Ports<'_> {
        Ports {
            sensors: &mut self.sensors,
            actuators: &mut self.relays,
            clock: &mut self.clock,
            storage: &mut self.storage,
            sink: &mut self.sink,
        }
    }
}
