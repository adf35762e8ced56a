//! Egg incubator firmware: main entry point.
//!
//! Hexagonal architecture with a cooperative, time-sliced main loop.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  SensorAdapter   RtcAdapter   RelayAdapter   NvsAdapter        │
//! │  (SHT31 ×2)      (DS3231)     (relays+buzzer)(Config+Storage)  │
//! │  LogEventSink    UptimeClock  console reader                   │
//! │  (EventSink)     (monotonic)  (JSON commands)                  │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │              AppService (pure logic)                   │    │
//! │  │  Fusion · Control · Profiles · Alarms · Recovery       │    │
//! │  └────────────────────────────────────────────────────────┘    │
//! │                                                                │
//! │  Scheduler (due-task list) · Watchdog · Memory guard           │
//! └────────────────────────────────────────────────────────────────┘
//! ```
#![deny(unused_must_use)]

// ── Module declarations ───────────────────────────────────────
pub mod config;
mod error;
mod pins;
mod clock;
mod safety;
mod scheduler;

pub mod app;
mod adapters;
mod drivers;
mod sensors;
mod control;
mod profile;
mod recovery;
mod alarm;
mod datalog;
mod store;
pub mod diagnostics;

// ── Imports ───────────────────────────────────────────────────
use std::cell::RefCell;
use std::io::BufRead;
use std::sync::mpsc;

use anyhow::Result;
use embedded_hal_bus::i2c::RefCellDevice;
use esp_idf_svc::hal::delay::{Delay, FreeRtos};
use esp_idf_svc::hal::i2c::{I2cConfig, I2cDriver};
use esp_idf_svc::hal::peripherals::Peripherals;
use esp_idf_svc::hal::units::Hertz;
use log::{info, warn};

use adapters::hardware::{RelayAdapter, RtcAdapter, SensorAdapter};
use adapters::log_sink::LogEventSink;
use adapters::nvs::NvsAdapter;
use adapters::time::UptimeClock;
use app::commands;
use app::ports::ConfigPort;
use app::service::{AppService, Ports};
use config::SystemConfig;
use diagnostics::{CrashLog, MemoryAction};

/// Longest the loop sleeps between passes; keeps console commands and the
/// watchdog responsive.
const MAX_IDLE_MS: u64 = 1_000;

/// Console lines longer than this are dropped unread.
const MAX_LINE_LEN: usize = 1_024;

// ── Console reader ────────────────────────────────────────────
//
// stdin blocks, so a small thread turns UART lines into channel messages
// and the main loop drains the channel without waiting.

fn spawn_console_reader() -> Result<mpsc::Receiver<String>> {
    let (tx, rx) = mpsc::channel();
    std::thread::Builder::new()
        .name("console".into())
        .stack_size(6 * 1024)
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { continue };
                let line = line.trim();
                if line.is_empty() || line.len() > MAX_LINE_LEN {
                    continue;
                }
                if tx.send(line.to_owned()).is_err() {
                    break;
                }
            }
        })?;
    Ok(rx)
}

// ── Main ──────────────────────────────────────────────────────

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("╔══════════════════════════════════════╗");
    info!("║  Incubator v{}                       ║", env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════╝");

    diagnostics::install_panic_handler();

    // ── 1b. Initialise hardware peripherals ───────────────────
    if let Err(e) = drivers::hw_init::init_peripherals() {
        // Relays in an unknown state: halt and let the watchdog reset us.
        log::error!("HAL init failed: {}, halting", e);
        #[allow(clippy::empty_loop)]
        loop {}
    }
    let watchdog = drivers::watchdog::Watchdog::new();
    let uptime = UptimeClock::new();

    // ── 2. Load config from NVS (or defaults) ─────────────────
    let mut nvs = match NvsAdapter::new() {
        Ok(n) => n,
        Err(e) => {
            warn!("NVS init failed ({}), running with defaults and no persistence", e);
            NvsAdapter::default()
        }
    };
    let config = match nvs.load() {
        Ok(cfg) => {
            info!("Config loaded from NVS");
            cfg
        }
        Err(e) => {
            warn!("NVS config load failed ({}), using defaults", e);
            SystemConfig::default()
        }
    };

    let mut crash_log = CrashLog::new();
    crash_log.init(&nvs);
    let crashes = crash_log.count(&nvs);
    if crashes > 0 {
        warn!("Diagnostics: {} crash record(s) in NVS", crashes);
    }

    // ── 3. Construct adapters ─────────────────────────────────
    let peripherals = Peripherals::take()?;
    let i2c = I2cDriver::new(
        peripherals.i2c0,
        peripherals.pins.gpio21,
        peripherals.pins.gpio22,
        &I2cConfig::new().baudrate(Hertz(pins::I2C_FREQ_HZ)),
    )?;
    let bus = RefCell::new(i2c);

    let mut sensors = SensorAdapter::new(RefCellDevice::new(&bus), Delay::new_default());
    let mut rtc = RtcAdapter::new(RefCellDevice::new(&bus));
    let mut relays = RelayAdapter::new();
    let mut log_sink = LogEventSink::new();

    // ── 4. Application service ────────────────────────────────
    let mut app = AppService::new(config, uptime.uptime_ms());
    let report = {
        let mut ports = Ports {
            sensors: &mut sensors,
            actuators: &mut relays,
            clock: &mut rtc,
            storage: &mut nvs,
            sink: &mut log_sink,
        };
        app.start(uptime.uptime_ms(), &mut ports)
    };
    info!(
        "Boot: sensors={} rtc_lost_power={} outage={:?} resumed={}",
        report.sensors_found, report.clock_lost_power, report.outage, report.restored
    );

    let console = match spawn_console_reader() {
        Ok(rx) => Some(rx),
        Err(e) => {
            warn!("Console reader not started ({}), commands disabled", e);
            None
        }
    };

    info!("System ready. Entering control loop.");

    // ── 5. Control loop ───────────────────────────────────────
    let mut shed_logged = false;
    loop {
        let now_ms = uptime.uptime_ms();
        let mut ports = Ports {
            sensors: &mut sensors,
            actuators: &mut relays,
            clock: &mut rtc,
            storage: &mut nvs,
            sink: &mut log_sink,
        };

        app.tick(now_ms, &mut ports);

        if let Some(rx) = &console {
            while let Ok(line) = rx.try_recv() {
                let reply = commands::handle_line(&mut app, &line, uptime.uptime_ms(), &mut ports);
                println!("{}", reply);
            }
        }

        match app.memory_action() {
            MemoryAction::Normal => shed_logged = false,
            MemoryAction::ShedNetwork => {
                if !shed_logged {
                    warn!("Memory: low heap, nothing optional left to shed");
                    shed_logged = true;
                }
            }
            MemoryAction::Restart => {
                warn!("Memory: heap exhausted, restarting");
                app.shutdown(uptime.uptime_ms(), &mut ports);
                // SAFETY: esp_restart never returns; state was flushed above.
                unsafe { esp_idf_svc::sys::esp_restart() };
            }
        }

        relays.set_buzzer(app.alarms().status().active);
        watchdog.feed();

        let idle = app.next_due_in(uptime.uptime_ms()).min(MAX_IDLE_MS);
        if idle > 0 {
            FreeRtos::delay_ms(idle as u32);
        }
    }
}
