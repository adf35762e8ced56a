//! Application service: the hexagonal core.
//!
//! [`AppService`] owns sensor fusion, the environmental controller, the
//! profile engine, recovery, alarms and the data log.  It exposes a
//! hardware-agnostic API; all I/O flows through the port references in
//! [`Ports`], so the whole service runs against mocks on the host.
//!
//! ```text
//!  SensorPort ──▶ ┌──────────────────────────────┐ ──▶ EventSink
//!  ClockPort  ──▶ │          AppService           │
//! ActuatorPort ◀──│ Fusion · Control · Profile    │
//! StoragePort ◀──▶│ Recovery · Alarm · DataLog    │
//!                 └──────────────────────────────┘
//! ```

use log::{info, warn};

use crate::alarm::{AlarmChange, AlarmEvaluator, AlarmNotification, AlarmType};
use crate::clock;
use crate::config::{AlarmThresholds, Calibration, IncubationSettings, SystemConfig, TurnerSettings};
use crate::control::{EnvironmentController, PowerSaveLevel};
use crate::datalog::{BackupBundle, DataLog, DataRecord};
use crate::diagnostics::{CrashLog, MemoryAction, RuntimeMetrics};
use crate::error::{Error, Result};
use crate::profile::{ProfileEngine, ProfileLibrary, ProfileType, StageTargets};
use crate::recovery::{self, OutageLog, PowerOutage, PowerRecovery, RecoverySnapshot};
use crate::scheduler::{Scheduler, Task};
use crate::sensors::{SensorData, SensorFusion};
use crate::store::{self, SettingsStore, keys};

use super::commands::SettingsUpdate;
use super::events::{AppEvent, TelemetryData};
use super::ports::{ActuatorPort, ClockPort, EventSink, SensorPort, StoragePort};

/// Operator-settable target ranges.
pub const TEMP_RANGE: core::ops::RangeInclusive<f32> = 30.0..=42.0;
pub const HUMIDITY_RANGE: core::ops::RangeInclusive<f32> = 30.0..=90.0;

/// Port references for one call into the service.
pub struct Ports<'a> {
    pub sensors: &'a mut dyn SensorPort,
    pub actuators: &'a mut dyn ActuatorPort,
    pub clock: &'a mut dyn ClockPort,
    pub storage: &'a mut dyn StoragePort,
    pub sink: &'a mut dyn EventSink,
}

/// What [`AppService::start`] found at boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootReport {
    pub sensors_found: bool,
    pub clock_lost_power: bool,
    pub outage: Option<PowerOutage>,
    pub restored: bool,
}

// ───────────────────────────────────────────────────────────────
// AppService
// ───────────────────────────────────────────────────────────────

pub struct AppService {
    config: SystemConfig,
    settings_store: SettingsStore,
    settings: IncubationSettings,
    fusion: SensorFusion,
    controller: EnvironmentController,
    profiles: ProfileEngine,
    recovery: PowerRecovery,
    alarms: AlarmEvaluator,
    datalog: DataLog,
    scheduler: Scheduler,
    boot_ms: u64,
    last_unix: u32,
    clock_ok: bool,
    control_cycles: u64,
    last_faults: u8,
    memory: MemoryAction,
}

impl AppService {
    /// Construct the service with factory defaults.
    ///
    /// Nothing is read from storage yet; call [`start`](Self::start) next.
    pub fn new(config: SystemConfig, now_ms: u64) -> Self {
        let settings = IncubationSettings::default();
        Self {
            settings_store: SettingsStore::new(),
            settings,
            fusion: SensorFusion::new(&config, Calibration::default()),
            controller: EnvironmentController::new(&config, &settings, TurnerSettings::default(), now_ms),
            profiles: ProfileEngine::default(),
            recovery: PowerRecovery::new(),
            alarms: AlarmEvaluator::new(AlarmThresholds::default(), config.alarm_interval_ms),
            datalog: DataLog::new(&config),
            scheduler: Scheduler::new(&config),
            boot_ms: now_ms,
            last_unix: 0,
            clock_ok: true,
            control_cycles: 0,
            last_faults: 0,
            memory: MemoryAction::Normal,
            config,
        }
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Boot sequence: probe sensors, load persisted documents, detect a
    /// power outage, repair the run from the recovery snapshot and bring
    /// the controller up on the resulting settings.
    pub fn start(&mut self, now_ms: u64, p: &mut Ports<'_>) -> BootReport {
        let sensors_found = self.fusion.begin(p.sensors);

        let clock_lost_power = p.clock.lost_power();
        if clock_lost_power {
            warn!("Clock: RTC lost power, time must be set");
        }
        let now = self.wall_clock(p.clock);

        let mut settings = self.settings_store.load(p.storage, now_ms);
        let turner: TurnerSettings = store::load_or_default(p.storage, keys::TURNER);
        let calibration: Calibration = store::load_or_default(p.storage, keys::CALIBRATION);
        let thresholds: AlarmThresholds = store::load_or_default(p.storage, keys::ALARM_THRESHOLDS);
        self.profiles.set_library(load_profile_library(p.storage));

        let outage = self
            .recovery
            .check_outage(p.storage, now, self.config.outage_threshold_secs);

        let snapshot = recovery::load_snapshot(p.storage);
        let restored = recovery::restore(snapshot.as_ref(), &mut settings);
        if restored {
            if let Err(e) = self.settings_store.save(p.storage, &settings, now_ms) {
                warn!("Recovery: restored settings not persisted: {}", e);
            }
        }

        self.settings = settings;
        self.fusion.set_calibration(calibration);
        self.alarms.set_thresholds(thresholds);
        self.controller = EnvironmentController::new(&self.config, &settings, turner, now_ms);
        let last_day = snapshot_day(snapshot.as_ref(), &settings);
        self.sync_profile(now, last_day, now_ms, p.storage);

        if let Err(e) = self.datalog.load(p.storage) {
            warn!("Store: data log unreadable: {}", e);
        }

        if let Some(o) = outage {
            let msg = format!("Power outage: {} s", o.duration);
            self.raise_alarm(AlarmType::PowerOutage, msg, now_ms, p.sink);
        }

        p.sink.emit(&AppEvent::Started { outage, restored });
        info!(
            "AppService started ({}, day {})",
            settings.profile_type,
            clock::incubation_day(settings.start_time, now)
        );
        BootReport {
            sensors_found,
            clock_lost_power,
            outage,
            restored,
        }
    }

    /// Re-read every persisted document and push it into the live
    /// subsystems (after a backup restore or external edit).
    pub fn reload(&mut self, now_ms: u64, storage: &mut dyn StoragePort) {
        self.settings_store.invalidate();
        let s = self.settings_store.load(storage, now_ms);
        let turner: TurnerSettings = store::load_or_default(storage, keys::TURNER);
        let calibration: Calibration = store::load_or_default(storage, keys::CALIBRATION);

        self.settings = s;
        self.controller.set_targets(s.target_temp, s.target_humidity);
        self.controller.set_pid_params(s.pid_kp, s.pid_ki, s.pid_kd);
        self.controller.set_hum_hysteresis(s.hum_hysteresis);
        self.controller.set_turner_settings(turner);
        self.controller.set_turner_enabled(s.motor_enabled);
        self.fusion.set_calibration(calibration);
        let last_day = snapshot_day(recovery::load_snapshot(storage).as_ref(), &s);
        self.sync_profile(self.last_unix, last_day, now_ms, storage);
        info!("AppService reloaded persisted state");
    }

    /// Drive every relay off and leave a fresh snapshot behind (before a
    /// deliberate restart).
    pub fn shutdown(&mut self, now_ms: u64, p: &mut Ports<'_>) {
        self.controller.all_off(now_ms, p.actuators);
        self.run_snapshot(p);
        if let Err(e) = self.datalog.flush(p.storage) {
            warn!("Store: final log flush failed: {}", e);
        }
        info!("AppService shut down");
    }

    // ── Per-iteration orchestration ───────────────────────────

    /// Run every task the scheduler reports as due.  Returns how many ran.
    pub fn tick(&mut self, now_ms: u64, p: &mut Ports<'_>) -> usize {
        let due = self.scheduler.due(now_ms);
        for &task in &due {
            match task {
                Task::Sensors => {
                    self.fusion.update(now_ms, p.sensors);
                }
                Task::Control => self.run_control(now_ms, p),
                Task::Alarm => self.run_alarms(now_ms, p.sink),
                Task::Profile => self.run_profile(now_ms, p),
                Task::DataLog => self.run_datalog(now_ms, p),
                Task::Snapshot => self.run_snapshot(p),
                Task::Housekeeping => self.run_housekeeping(now_ms, p),
            }
        }
        due.len()
    }

    /// Milliseconds the main loop may sleep before the next task is due.
    pub fn next_due_in(&self, now_ms: u64) -> u64 {
        self.scheduler.next_due_in(now_ms)
    }

    fn run_control(&mut self, now_ms: u64, p: &mut Ports<'_>) {
        let reading = self
            .fusion
            .is_valid()
            .then(|| (self.fusion.temperature(), self.fusion.humidity()));
        let outcome = self.controller.update(now_ms, reading, p.actuators);
        self.control_cycles += 1;
        self.scheduler
            .set_period(Task::Control, self.controller.control_interval_ms());

        if let Some(t) = outcome.critical_temp {
            let msg = format!("Critical high temperature: {t:.1}C");
            self.raise_alarm(AlarmType::HighTemp, msg, now_ms, p.sink);
        }
        if let Some(action) = outcome.turner {
            p.sink.emit(&AppEvent::Turner(action));
        }

        let faults = self.controller.safety_faults();
        if faults != self.last_faults {
            if faults == 0 {
                p.sink.emit(&AppEvent::FaultCleared);
            } else if faults & !self.last_faults != 0 {
                p.sink.emit(&AppEvent::FaultDetected(faults));
            }
            self.last_faults = faults;
        }
    }

    fn run_alarms(&mut self, now_ms: u64, sink: &mut dyn EventSink) {
        match self.alarms.update(now_ms, &self.fusion.data()) {
            Some(AlarmChange::Raised(status)) => {
                sink.emit(&AppEvent::Alarm(AlarmNotification::new(&status, self.last_unix)));
            }
            Some(AlarmChange::Cleared) => sink.emit(&AppEvent::AlarmCleared),
            None => {}
        }
    }

    fn raise_alarm(&mut self, kind: AlarmType, message: String, now_ms: u64, sink: &mut dyn EventSink) {
        if let Some(AlarmChange::Raised(status)) = self.alarms.raise(kind, message, now_ms) {
            sink.emit(&AppEvent::Alarm(AlarmNotification::new(&status, self.last_unix)));
        }
    }

    fn run_profile(&mut self, now_ms: u64, p: &mut Ports<'_>) {
        if !self.settings.is_active() {
            return;
        }
        let now = self.wall_clock(p.clock);
        if let Some(change) = self.profiles.update(self.settings.start_time, now) {
            self.apply_stage_targets(change.targets);
            self.persist_settings(now_ms, p.storage);
            p.sink.emit(&AppEvent::StageChanged(change));
        }
    }

    fn run_datalog(&mut self, now_ms: u64, p: &mut Ports<'_>) {
        if !self.fusion.is_valid() {
            return;
        }
        let relays = self.controller.relays();
        let rec = DataRecord {
            timestamp: self.wall_clock(p.clock),
            temperature: self.fusion.temperature(),
            humidity: self.fusion.humidity(),
            heater: relays.heater.on,
            humidifier: relays.humidifier.on,
        };
        if let Err(e) = self.datalog.record(p.storage, rec, now_ms) {
            warn!("Store: data log write failed: {}", e);
        }
    }

    fn run_snapshot(&mut self, p: &mut Ports<'_>) {
        let now = self.wall_clock(p.clock);
        let snap = RecoverySnapshot::capture(&self.settings, now);
        if let Err(e) = recovery::save_snapshot(p.storage, &snap) {
            warn!("Recovery: snapshot not written: {}", e);
        }
        if let Err(e) = self.recovery.heartbeat(p.storage, now) {
            warn!("Recovery: heartbeat not written: {}", e);
        }
    }

    fn run_housekeeping(&mut self, now_ms: u64, p: &mut Ports<'_>) {
        let metrics = self.metrics(now_ms, p.storage);
        if metrics.memory != self.memory {
            self.memory = metrics.memory;
            if metrics.memory != MemoryAction::Normal {
                warn!("Diagnostics: free heap {} B, {:?}", metrics.heap_free, metrics.memory);
                p.sink.emit(&AppEvent::MemoryPressure(metrics.memory));
            }
        }
        let now = self.wall_clock(p.clock);
        p.sink.emit(&AppEvent::Telemetry(self.telemetry(now)));
    }

    // ── Internal helpers ──────────────────────────────────────

    /// Unix time from the RTC, falling back to the last good reading.
    fn wall_clock(&mut self, clock: &mut dyn ClockPort) -> u32 {
        match clock.now() {
            Ok(t) => {
                if !self.clock_ok {
                    info!("Clock: RTC readable again");
                }
                self.clock_ok = true;
                self.last_unix = t;
                t
            }
            Err(e) => {
                if self.clock_ok {
                    warn!("Clock: {}; using last known time", e);
                }
                self.clock_ok = false;
                self.last_unix
            }
        }
    }

    /// Point the profile engine at the settings' run and prime its stage
    /// index.  A stage boundary crossed since `last_day` (the run day of the
    /// last snapshot) is applied and persisted here, before the first
    /// control cycle; within the same stage the stored targets stand.
    fn sync_profile(&mut self, now: u32, last_day: Option<u32>, now_ms: u64, storage: &mut dyn StoragePort) {
        if !self.settings.is_active() {
            self.profiles.set_active(ProfileType::None);
            return;
        }
        self.profiles.set_active(self.settings.profile_type);
        let Some(change) = self.profiles.update(self.settings.start_time, now) else {
            return;
        };
        let same_stage = last_day
            .and_then(|d| u16::try_from(d).ok())
            .and_then(|d| self.profiles.current_stage(d))
            .is_some_and(|l| !l.fallback && l.index == change.to_stage);
        if same_stage {
            return;
        }
        let t = change.targets;
        let s = &self.settings;
        if s.target_temp == t.temperature && s.target_humidity == t.humidity && s.motor_enabled == t.motor_active {
            return;
        }
        info!(
            "Profile: resuming {} on day {} with stage {} targets",
            change.profile,
            change.day,
            change.to_stage + 1
        );
        self.apply_stage_targets(t);
        self.persist_settings(now_ms, storage);
        self.save_snapshot_now(storage);
    }

    fn apply_stage_targets(&mut self, t: StageTargets) {
        self.settings.target_temp = t.temperature;
        self.settings.target_humidity = t.humidity;
        self.settings.motor_enabled = t.motor_active;
        self.controller.set_targets(t.temperature, t.humidity);
        self.controller.set_turner_enabled(t.motor_active);
    }

    fn persist_settings(&mut self, now_ms: u64, storage: &mut dyn StoragePort) {
        // The store logs the failure; the live settings stay authoritative.
        let _ = self.settings_store.save(storage, &self.settings, now_ms);
    }

    fn save_snapshot_now(&mut self, storage: &mut dyn StoragePort) {
        let snap = RecoverySnapshot::capture(&self.settings, self.last_unix);
        if let Err(e) = recovery::save_snapshot(storage, &snap) {
            warn!("Recovery: snapshot not written: {}", e);
        }
    }

    // ── Mutators (remote protocol / UI) ───────────────────────

    /// Begin a run of `profile`: first-stage targets, `start_time = now`.
    pub fn start_incubation(&mut self, profile: ProfileType, now_ms: u64, p: &mut Ports<'_>) -> Result<()> {
        if profile == ProfileType::None || self.profiles.library().get(profile).is_none() {
            return Err(Error::Rejected("Invalid profile type"));
        }
        let now = self.wall_clock(p.clock);
        if now == 0 {
            return Err(Error::Rejected("Clock not set"));
        }
        let (targets, total_days) = self
            .profiles
            .library()
            .get(profile)
            .and_then(|pr| Some((StageTargets::from(*pr.stages.first()?), pr.total_days)))
            .ok_or(Error::Rejected("Invalid profile type"))?;

        let next = IncubationSettings {
            profile_type: profile,
            total_days,
            start_time: now,
            target_temp: targets.temperature,
            target_humidity: targets.humidity,
            motor_enabled: targets.motor_active,
            ..self.settings
        };
        self.settings_store.save(p.storage, &next, now_ms)?;

        self.profiles.start(profile);
        self.settings = next;
        self.apply_stage_targets(targets);
        self.save_snapshot_now(p.storage);

        p.sink.emit(&AppEvent::IncubationStarted {
            profile,
            total_days,
        });
        Ok(())
    }

    pub fn stop_incubation(&mut self, now_ms: u64, p: &mut Ports<'_>) -> Result<()> {
        let next = IncubationSettings {
            profile_type: ProfileType::None,
            start_time: 0,
            ..self.settings
        };
        self.settings_store.save(p.storage, &next, now_ms)?;

        self.profiles.end();
        self.settings = next;
        self.save_snapshot_now(p.storage);
        p.sink.emit(&AppEvent::IncubationStopped);
        Ok(())
    }

    pub fn set_targets(&mut self, temp: f32, humidity: f32, now_ms: u64, storage: &mut dyn StoragePort) -> Result<()> {
        if !TEMP_RANGE.contains(&temp) || !HUMIDITY_RANGE.contains(&humidity) {
            return Err(Error::Rejected("Target out of range"));
        }
        self.settings.target_temp = temp;
        self.settings.target_humidity = humidity;
        self.controller.set_targets(temp, humidity);
        self.settings_store.save(storage, &self.settings, now_ms)
    }

    /// Apply a partial settings document.  Returns `Ok(false)` when it
    /// carried nothing to change.
    pub fn update_settings(
        &mut self,
        update: &SettingsUpdate,
        now_ms: u64,
        storage: &mut dyn StoragePort,
    ) -> Result<bool> {
        let mut s = self.settings;
        let mut touched = false;

        if let Some(t) = update.target_temp {
            if !TEMP_RANGE.contains(&t) {
                return Err(Error::Rejected("Target out of range"));
            }
            s.target_temp = t;
            touched = true;
        }
        if let Some(h) = update.target_humidity {
            if !HUMIDITY_RANGE.contains(&h) {
                return Err(Error::Rejected("Target out of range"));
            }
            s.target_humidity = h;
            touched = true;
        }
        if let Some(m) = update.motor_enabled {
            s.motor_enabled = m;
            touched = true;
        }
        if let (Some(kp), Some(ki), Some(kd)) = (update.pid_kp, update.pid_ki, update.pid_kd) {
            if kp < 0.0 || ki < 0.0 || kd < 0.0 {
                return Err(Error::Rejected("PID gains must be non-negative"));
            }
            s.pid_kp = kp;
            s.pid_ki = ki;
            s.pid_kd = kd;
            touched = true;
        }
        if let Some(h) = update.hum_hysteresis {
            if !(0.1..=20.0).contains(&h) {
                return Err(Error::Rejected("Hysteresis out of range"));
            }
            s.hum_hysteresis = h;
            touched = true;
        }
        if let Some(alarm) = &update.alarm {
            let mut t = self.alarms.thresholds();
            alarm.apply_to(&mut t);
            self.set_alarm_thresholds(t, storage)?;
            touched = true;
        }
        if !touched {
            return Ok(false);
        }

        self.settings = s;
        self.controller.set_targets(s.target_temp, s.target_humidity);
        self.controller.set_pid_params(s.pid_kp, s.pid_ki, s.pid_kd);
        self.controller.set_hum_hysteresis(s.hum_hysteresis);
        self.controller.set_turner_enabled(s.motor_enabled);
        self.settings_store.save(storage, &self.settings, now_ms)?;
        Ok(true)
    }

    pub fn set_turner_settings(&mut self, settings: TurnerSettings, storage: &mut dyn StoragePort) -> Result<()> {
        if settings.duration == 0 || settings.interval <= settings.duration {
            return Err(Error::Rejected("Interval must exceed duration"));
        }
        self.controller.set_turner_settings(settings);
        store::save_json(storage, keys::TURNER, &settings)
    }

    pub fn control_turner(&mut self, on: bool, now_ms: u64, actuators: &mut dyn ActuatorPort) {
        self.controller.manual_turner(on, now_ms, actuators);
    }

    /// Manual heater switch.  The safety supervisor may refuse it, and the
    /// next control cycle takes over again.
    pub fn control_heater(&mut self, on: bool, now_ms: u64, actuators: &mut dyn ActuatorPort) -> Result<()> {
        if self.controller.manual_heater(on, now_ms, actuators) {
            Ok(())
        } else {
            Err(Error::Rejected("Heater locked out by safety"))
        }
    }

    pub fn control_humidifier(&mut self, on: bool, now_ms: u64, actuators: &mut dyn ActuatorPort) {
        self.controller.manual_humidifier(on, now_ms, actuators);
    }

    /// Derive offsets that make the sensors read the given reference and
    /// persist them.
    pub fn calibrate(
        &mut self,
        ref_temp: f32,
        ref_humidity: f32,
        sensors: &mut dyn SensorPort,
        storage: &mut dyn StoragePort,
    ) -> Result<Calibration> {
        let cal = self
            .fusion
            .calibrate(sensors, ref_temp, ref_humidity)
            .ok_or(Error::Rejected("No valid sensor to calibrate"))?;
        store::save_json(storage, keys::CALIBRATION, &cal)?;
        Ok(cal)
    }

    pub fn set_time(&mut self, unix: u32, clock: &mut dyn ClockPort) -> Result<()> {
        clock.set_time(unix)?;
        self.last_unix = unix;
        self.clock_ok = true;
        info!("Clock: set to {}", unix);
        Ok(())
    }

    pub fn set_power_save(&mut self, level: PowerSaveLevel) {
        self.controller.set_power_save(level);
    }

    pub fn set_alarm_thresholds(&mut self, t: AlarmThresholds, storage: &mut dyn StoragePort) -> Result<()> {
        if t.low_temp >= t.high_temp || t.low_hum >= t.high_hum {
            return Err(Error::Rejected("Alarm low bound must be below high bound"));
        }
        self.alarms.set_thresholds(t);
        store::save_json(storage, keys::ALARM_THRESHOLDS, &t)
    }

    pub fn set_alarms_enabled(&mut self, enabled: bool, storage: &mut dyn StoragePort) -> Result<()> {
        self.alarms.set_enabled(enabled);
        store::save_json(storage, keys::ALARM_THRESHOLDS, &self.alarms.thresholds())
    }

    pub fn clear_alarm(&mut self, sink: &mut dyn EventSink) {
        if self.alarms.status().active {
            self.alarms.clear();
            sink.emit(&AppEvent::AlarmCleared);
        }
    }

    /// Replace one stage of a profile and persist the library.
    pub fn set_stage_override(
        &mut self,
        profile: ProfileType,
        stage: usize,
        targets: StageTargets,
        storage: &mut dyn StoragePort,
    ) -> Result<()> {
        if !self.profiles.set_stage_override(profile, stage, targets) {
            return Err(Error::Rejected("No such profile stage"));
        }
        let bytes = self.profiles.library().to_json()?;
        store::save_bytes(storage, keys::PROFILES, &bytes)
    }

    pub fn reset_sensor_errors(&mut self, now_ms: u64) {
        self.fusion.reset_error_counters(now_ms);
    }

    pub fn check_sensor_integrity(&mut self, sensors: &mut dyn SensorPort) -> bool {
        self.fusion.check_integrity(sensors)
    }

    /// Write the backup bundle.  Returns its size.
    pub fn backup(&self, storage: &mut dyn StoragePort) -> Result<usize> {
        BackupBundle::collect(storage, &self.datalog, self.recovery.outages())?.save(storage)
    }

    pub fn restore_backup(&mut self, now_ms: u64, storage: &mut dyn StoragePort) -> Result<()> {
        let bundle = BackupBundle::load(storage)?.ok_or(Error::Rejected("No backup found"))?;
        bundle.restore(storage)?;
        if !bundle.power_outages.is_empty() {
            let mut log = OutageLog::new();
            for o in &bundle.power_outages {
                log.push(*o);
            }
            self.recovery.replace_log(log, storage)?;
        }
        self.reload(now_ms, storage);
        Ok(())
    }

    /// Drop the data log and the outage history.
    pub fn clear_data(&mut self, storage: &mut dyn StoragePort) -> Result<()> {
        self.datalog.clear(storage)?;
        self.recovery.clear_log(storage)
    }

    // ── Queries ───────────────────────────────────────────────

    pub fn config(&self) -> &SystemConfig {
        &self.config
    }

    pub fn settings(&self) -> &IncubationSettings {
        &self.settings
    }

    pub fn sensor_data(&self) -> SensorData {
        self.fusion.data()
    }

    pub fn controller(&self) -> &EnvironmentController {
        &self.controller
    }

    pub fn profiles(&self) -> &ProfileEngine {
        &self.profiles
    }

    pub fn alarms(&self) -> &AlarmEvaluator {
        &self.alarms
    }

    pub fn datalog(&self) -> &DataLog {
        &self.datalog
    }

    pub fn recovery(&self) -> &PowerRecovery {
        &self.recovery
    }

    /// Last good wall-clock reading (Unix seconds).
    pub fn unix_time(&self) -> u32 {
        self.last_unix
    }

    pub fn incubation_day(&self) -> u32 {
        clock::incubation_day(self.settings.start_time, self.last_unix)
    }

    pub fn remaining_days(&self) -> u32 {
        self.profiles.remaining_days(self.settings.start_time, self.last_unix)
    }

    pub fn control_cycles(&self) -> u64 {
        self.control_cycles
    }

    pub fn memory_action(&self) -> MemoryAction {
        self.memory
    }

    pub fn uptime_secs(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.boot_ms) / 1000
    }

    pub fn telemetry(&self, now: u32) -> TelemetryData {
        let data = self.fusion.data();
        let relays = self.controller.relays();
        let (target_temp, target_humidity) = self.controller.targets();
        TelemetryData {
            temperature: data.temperature,
            humidity: data.humidity,
            sensor1: data.sensor1,
            sensor2: data.sensor2,
            valid: self.fusion.is_valid(),
            target_temp,
            target_humidity,
            heater: relays.heater.on,
            humidifier: relays.humidifier.on,
            turner: relays.turner.on,
            pid_output: self.controller.pid_output(),
            day: clock::incubation_day(self.settings.start_time, now),
            fault_flags: self.controller.safety_faults(),
        }
    }

    pub fn metrics(&self, now_ms: u64, storage: &dyn StoragePort) -> RuntimeMetrics {
        let crash_count = CrashLog::new().count(storage) as u32;
        RuntimeMetrics::collect(
            self.uptime_secs(now_ms),
            self.control_cycles,
            self.controller.safety_faults().count_ones(),
            crash_count,
            self.recovery.outages().len() as u32,
        )
    }
}

/// Persisted profile library, or the presets when absent or unreadable.
fn load_profile_library(storage: &dyn StoragePort) -> ProfileLibrary {
    match store::load_bytes(storage, keys::PROFILES) {
        Ok(Some(bytes)) => ProfileLibrary::from_json(&bytes).unwrap_or_else(|e| {
            warn!("Profile: stored library unreadable ({}), using presets", e);
            ProfileLibrary::presets()
        }),
        Ok(None) => ProfileLibrary::presets(),
        Err(e) => {
            warn!("Profile: library not readable ({}), using presets", e);
            ProfileLibrary::presets()
        }
    }
}

/// Run day recorded by the snapshot, when it describes the same run.
fn snapshot_day(snapshot: Option<&RecoverySnapshot>, settings: &IncubationSettings) -> Option<u32> {
    snapshot
        .filter(|s| s.incubation_active && s.profile_type == settings.profile_type && s.start_time == settings.start_time)
        .map(|s| s.current_day)
}
