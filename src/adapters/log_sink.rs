//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing structured application events to
//! the ESP-IDF logger (which goes to UART / USB-CDC in production).
//! A remote-link adapter would implement the same trait.

use log::{info, warn};

use crate::app::events::AppEvent;
use crate::app::ports::EventSink;

/// Adapter that logs every [`AppEvent`] to the serial console.
#[derive(Default)]
pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

fn on_off(on: bool) -> &'static str {
    if on { "ON" } else { "off" }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &AppEvent) {
        match event {
            AppEvent::Telemetry(t) => {
                info!(
                    "TELEM | day={} | T={:.1}/{:.1}\u{00b0}C H={:.1}/{:.1}% | \
                     s1={} s2={} | heat={} hum={} turn={} | pid={:.0} | \
                     faults=0b{:08b}",
                    t.day,
                    t.temperature,
                    t.target_temp,
                    t.humidity,
                    t.target_humidity,
                    if t.sensor1.valid { "OK" } else { "FAIL" },
                    if t.sensor2.valid { "OK" } else { "FAIL" },
                    on_off(t.heater),
                    on_off(t.humidifier),
                    on_off(t.turner),
                    t.pid_output,
                    t.fault_flags,
                );
            }
            AppEvent::Alarm(a) => {
                warn!("ALARM | {:?}/{:?} | {}", a.category, a.severity, a.message);
            }
            AppEvent::AlarmCleared => {
                info!("ALARM | cleared");
            }
            AppEvent::StageChanged(c) => {
                info!(
                    "STAGE | {} day {} | {:?} -> {} | T={:.1}\u{00b0}C H={:.0}% turner={}",
                    c.profile,
                    c.day,
                    c.from_stage.map(|s| s + 1),
                    c.to_stage + 1,
                    c.targets.temperature,
                    c.targets.humidity,
                    on_off(c.targets.motor_active),
                );
            }
            AppEvent::IncubationStarted { profile, total_days } => {
                info!("RUN | started {} ({} days)", profile, total_days);
            }
            AppEvent::IncubationStopped => {
                info!("RUN | stopped");
            }
            AppEvent::Turner(action) => {
                info!("TURN | {:?}", action);
            }
            AppEvent::FaultDetected(flags) => {
                warn!("FAULT | detected, flags=0b{:08b}", flags);
            }
            AppEvent::FaultCleared => {
                info!("FAULT | all cleared");
            }
            AppEvent::MemoryPressure(action) => {
                warn!("MEM | {:?}", action);
            }
            AppEvent::Started { outage, restored } => match outage {
                Some(o) => info!(
                    "START | outage {} s ({}..{}) | restored={}",
                    o.duration, o.start_time, o.end_time, restored
                ),
                None => info!("START | no outage | restored={}", restored),
            },
        }
    }
}
