//! Environmental controller.
//!
//! Owns the heater PID/PWM loop, the humidifier hysteresis loop, the egg
//! turner and the three relay states.  The controller is the single
//! writer of the relays; everything else reads [`RelayState`] snapshots.
//!
//! ```text
//!   fused T ─▶ HeaterControl ─▶ SafetySupervisor ─▶ heater relay
//!   fused H ─▶ HumidityControl ───────────────────▶ humidifier relay
//!   uptime  ─▶ Turner ────────────────────────────▶ turner relay
//! ```

pub mod heater;
pub mod humidity;
pub mod pid;
pub mod turner;

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use crate::app::ports::ActuatorPort;
use crate::config::{IncubationSettings, SystemConfig, TurnerSettings};
use crate::safety::{CRITICAL_MARGIN_C, HIGH_MARGIN_C, HeaterCheck, SafetySupervisor};
use heater::HeaterControl;
use humidity::HumidityControl;
use turner::{Turner, TurnerAction};

// ───────────────────────────────────────────────────────────────
// Power-save level
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum PowerSaveLevel {
    #[default]
    Disabled,
    Light,
    Medium,
    Aggressive,
}

impl PowerSaveLevel {
    /// `(kp, ki, kd)` multipliers applied to the configured gains.
    pub const fn gain_multipliers(self) -> (f32, f32, f32) {
        match self {
            Self::Disabled => (1.0, 1.0, 1.0),
            Self::Light => (0.8, 0.5, 0.8),
            Self::Medium => (0.5, 0.3, 0.5),
            Self::Aggressive => (0.3, 0.1, 0.3),
        }
    }

    /// Longest continuous heater run before a forced rest.
    pub const fn max_heater_run_ms(self) -> u64 {
        match self {
            Self::Disabled => 30 * 60_000,
            Self::Light => 25 * 60_000,
            Self::Medium => 20 * 60_000,
            Self::Aggressive => 15 * 60_000,
        }
    }

    /// Medium and aggressive cut actuators once close to setpoint.
    pub const fn trims_near_setpoint(self) -> bool {
        matches!(self, Self::Medium | Self::Aggressive)
    }
}

impl TryFrom<u8> for PowerSaveLevel {
    type Error = &'static str;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Self::Disabled),
            1 => Ok(Self::Light),
            2 => Ok(Self::Medium),
            3 => Ok(Self::Aggressive),
            _ => Err("power-save level must be 0..=3"),
        }
    }
}

impl From<PowerSaveLevel> for u8 {
    fn from(l: PowerSaveLevel) -> Self {
        l as u8
    }
}

// ───────────────────────────────────────────────────────────────
// Relay state
// ───────────────────────────────────────────────────────────────

/// One relay plus its usage statistics.  `on` implies `started_ms` is
/// the start of the current activation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RelayState {
    pub on: bool,
    pub started_ms: u64,
    pub total_on_ms: u64,
    pub activations: u32,
}

impl RelayState {
    /// Change state; returns `true` if it actually changed.  Turning off
    /// flushes the elapsed on-time into `total_on_ms`.
    pub fn switch(&mut self, on: bool, now_ms: u64) -> bool {
        if on == self.on {
            return false;
        }
        if on {
            self.started_ms = now_ms;
            self.activations = self.activations.saturating_add(1);
        } else {
            self.total_on_ms += now_ms.saturating_sub(self.started_ms);
        }
        self.on = on;
        true
    }

    pub fn on_for(&self, now_ms: u64) -> Option<u64> {
        self.on.then(|| now_ms.saturating_sub(self.started_ms))
    }

    /// Cumulative on-time including the running activation.
    pub fn total_on_ms_at(&self, now_ms: u64) -> u64 {
        self.total_on_ms + self.on_for(now_ms).unwrap_or(0)
    }
}

/// Snapshot of all three relays.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Relays {
    pub heater: RelayState,
    pub humidifier: RelayState,
    pub turner: RelayState,
}

// ───────────────────────────────────────────────────────────────
// Controller
// ───────────────────────────────────────────────────────────────

/// Notable outcomes of one [`EnvironmentController::update`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ControlOutcome {
    /// Temperature at which the critical cut-off fired this cycle.
    pub critical_temp: Option<f32>,
    pub max_run_cut: bool,
    pub turner: Option<TurnerAction>,
    /// Controller had no measurement and forced everything off.
    pub blind: bool,
}

pub struct EnvironmentController {
    heater: HeaterControl,
    humidity: HumidityControl,
    turner: Turner,
    safety: SafetySupervisor,
    relays: Relays,
    target_temp: f32,
    target_humidity: f32,
    base_gains: (f32, f32, f32),
    power_save: PowerSaveLevel,
    last_temperature: f32,
}

impl EnvironmentController {
    pub fn new(
        config: &SystemConfig,
        settings: &IncubationSettings,
        turner: TurnerSettings,
        now_ms: u64,
    ) -> Self {
        let gains = (settings.pid_kp, settings.pid_ki, settings.pid_kd);
        info!(
            "Control: targets {:.1}C / {:.1}%",
            settings.target_temp, settings.target_humidity
        );
        Self {
            heater: HeaterControl::new(config, gains.0, gains.1, gains.2, settings.target_temp, now_ms),
            humidity: HumidityControl::new(settings.hum_hysteresis, config.humidity_interval_ms),
            turner: Turner::new(turner, settings.motor_enabled, now_ms),
            safety: SafetySupervisor::new(),
            relays: Relays::default(),
            target_temp: settings.target_temp,
            target_humidity: settings.target_humidity,
            base_gains: gains,
            power_save: PowerSaveLevel::Disabled,
            last_temperature: settings.target_temp,
        }
    }

    /// One control pass.  `reading` is the fused `(temp, humidity)`, or
    /// `None` when fusion has no valid sensor.
    pub fn update(
        &mut self,
        now_ms: u64,
        reading: Option<(f32, f32)>,
        hw: &mut dyn ActuatorPort,
    ) -> ControlOutcome {
        let mut outcome = ControlOutcome::default();

        let Some((temp, hum)) = reading else {
            if self.relays.heater.on || self.relays.humidifier.on || !self.is_blind() {
                error!("Control: no valid measurement, heater and humidifier off");
            }
            self.safety.no_measurement();
            self.set_heater(false, now_ms, hw);
            self.set_humidifier(false, now_ms, hw);
            outcome.blind = true;
            outcome.turner = self.update_turner(now_ms, hw);
            return outcome;
        };
        self.last_temperature = temp;

        // Between PWM evaluations a running heater is still cut at the
        // critical line.
        let request = self.heater.evaluate(now_ms, temp).or_else(|| {
            (self.relays.heater.on && temp >= self.target_temp + CRITICAL_MARGIN_C).then_some(false)
        });
        if let Some(requested_on) = request {
            let verdict = self.safety.evaluate(&HeaterCheck {
                temperature: temp,
                target: self.target_temp,
                requested_on,
                on_for_ms: self.relays.heater.on_for(now_ms),
                power_save: self.power_save,
            });
            if verdict.max_run_cut {
                self.heater.rest(now_ms);
                outcome.max_run_cut = true;
            }
            if verdict.critical {
                outcome.critical_temp = Some(temp);
            }
            self.set_heater(verdict.heater_on, now_ms, hw);
        }

        if let Some(on) = self.humidity.evaluate(
            now_ms,
            hum,
            self.target_humidity,
            self.relays.humidifier.on,
            self.power_save,
        ) {
            self.set_humidifier(on, now_ms, hw);
        }

        outcome.turner = self.update_turner(now_ms, hw);
        outcome
    }

    fn is_blind(&self) -> bool {
        self.safety.has_fault(crate::error::SafetyFault::NoMeasurement)
    }

    fn update_turner(&mut self, now_ms: u64, hw: &mut dyn ActuatorPort) -> Option<TurnerAction> {
        let action = self.turner.update(now_ms);
        if action.is_some() {
            self.sync_turner(now_ms, hw);
        }
        action
    }

    fn sync_turner(&mut self, now_ms: u64, hw: &mut dyn ActuatorPort) {
        let on = self.turner.is_running();
        if self.relays.turner.switch(on, now_ms) {
            hw.set_turner(on);
        }
    }

    fn set_heater(&mut self, on: bool, now_ms: u64, hw: &mut dyn ActuatorPort) {
        if self.relays.heater.switch(on, now_ms) {
            hw.set_heater(on);
            debug!("Control: heater {}", if on { "ON" } else { "OFF" });
        }
    }

    fn set_humidifier(&mut self, on: bool, now_ms: u64, hw: &mut dyn ActuatorPort) {
        if self.relays.humidifier.switch(on, now_ms) {
            hw.set_humidifier(on);
            debug!("Control: humidifier {}", if on { "ON" } else { "OFF" });
        }
    }

    /// De-energise every relay.
    pub fn all_off(&mut self, now_ms: u64, hw: &mut dyn ActuatorPort) {
        self.relays.heater.switch(false, now_ms);
        self.relays.humidifier.switch(false, now_ms);
        self.relays.turner.switch(false, now_ms);
        if self.turner.is_running() {
            self.turner.manual(false, now_ms);
        }
        hw.all_off();
    }

    // ── Setters ───────────────────────────────────────────────────

    pub fn set_targets(&mut self, temp: f32, humidity: f32) {
        self.target_temp = temp;
        self.target_humidity = humidity;
        self.heater.set_target(temp);
        info!("Control: targets {:.1}C / {:.1}%", temp, humidity);
    }

    pub fn set_pid_params(&mut self, kp: f32, ki: f32, kd: f32) {
        self.base_gains = (kp, ki, kd);
        self.apply_gains();
        info!("Control: PID Kp={:.2} Ki={:.4} Kd={:.2}", kp, ki, kd);
    }

    pub fn set_power_save(&mut self, level: PowerSaveLevel) {
        self.power_save = level;
        self.apply_gains();
        info!("Control: power-save {:?}", level);
    }

    fn apply_gains(&mut self) {
        let (kp, ki, kd) = self.base_gains;
        let (mp, mi, md) = self.power_save.gain_multipliers();
        self.heater.set_tunings(kp * mp, ki * mi, kd * md);
    }

    pub fn set_hum_hysteresis(&mut self, h: f32) {
        self.humidity.set_hysteresis(h);
    }

    pub fn set_turner_settings(&mut self, settings: TurnerSettings) {
        self.turner.set_settings(settings);
    }

    pub fn set_turner_enabled(&mut self, enabled: bool) {
        self.turner.set_enabled(enabled);
    }

    /// Manual turner control; see [`Turner::manual`].
    pub fn manual_turner(&mut self, on: bool, now_ms: u64, hw: &mut dyn ActuatorPort) {
        self.turner.manual(on, now_ms);
        self.sync_turner(now_ms, hw);
    }

    /// Manual heater switch.  Switching on is refused while blind or above
    /// the over-temperature line; the next PWM evaluation takes over again.
    pub fn manual_heater(&mut self, on: bool, now_ms: u64, hw: &mut dyn ActuatorPort) -> bool {
        if on && (self.is_blind() || self.last_temperature > self.target_temp + HIGH_MARGIN_C) {
            warn!(
                "Control: manual heater refused at {:.1}C (target {:.1}C)",
                self.last_temperature, self.target_temp
            );
            return false;
        }
        self.set_heater(on, now_ms, hw);
        info!("Control: heater manually {}", if on { "ON" } else { "OFF" });
        true
    }

    /// Manual humidifier switch, held until the next hysteresis evaluation.
    pub fn manual_humidifier(&mut self, on: bool, now_ms: u64, hw: &mut dyn ActuatorPort) {
        self.set_humidifier(on, now_ms, hw);
        info!("Control: humidifier manually {}", if on { "ON" } else { "OFF" });
    }

    // ── Accessors ─────────────────────────────────────────────────

    pub fn relays(&self) -> Relays {
        self.relays
    }

    pub fn targets(&self) -> (f32, f32) {
        (self.target_temp, self.target_humidity)
    }

    pub fn power_save(&self) -> PowerSaveLevel {
        self.power_save
    }

    /// Gains as configured, before power-save scaling.
    pub fn pid_params(&self) -> (f32, f32, f32) {
        self.base_gains
    }

    /// Gains in effect after power-save scaling.
    pub fn effective_pid_params(&self) -> (f32, f32, f32) {
        self.heater.tunings()
    }

    pub fn hum_hysteresis(&self) -> f32 {
        self.humidity.hysteresis()
    }

    pub fn turner_settings(&self) -> TurnerSettings {
        self.turner.settings()
    }

    pub fn turner_enabled(&self) -> bool {
        self.turner.is_enabled()
    }

    pub fn turner_countdown_minutes(&self, now_ms: u64) -> u32 {
        self.turner.countdown_minutes(now_ms)
    }

    pub fn pid_output(&self) -> f32 {
        self.heater.output()
    }

    /// `target − last measured temperature`.
    pub fn temp_error(&self) -> f32 {
        self.target_temp - self.last_temperature
    }

    /// Current adaptive heater evaluation period (ms).
    pub fn control_interval_ms(&self) -> u32 {
        self.heater.interval_ms()
    }

    pub fn safety_faults(&self) -> u8 {
        self.safety.faults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Relay {
        heater: bool,
        humidifier: bool,
        turner: bool,
        writes: u32,
    }

    impl ActuatorPort for Relay {
        fn set_heater(&mut self, on: bool) {
            self.heater = on;
            self.writes += 1;
        }
        fn set_humidifier(&mut self, on: bool) {
            self.humidifier = on;
            self.writes += 1;
        }
        fn set_turner(&mut self, on: bool) {
            self.turner = on;
            self.writes += 1;
        }
        fn all_off(&mut self) {
            self.heater = false;
            self.humidifier = false;
            self.turner = false;
        }
    }

    fn controller() -> EnvironmentController {
        EnvironmentController::new(
            &SystemConfig::default(),
            &IncubationSettings::default(),
            TurnerSettings::default(),
            0,
        )
    }

    #[test]
    fn relay_stats_accumulate() {
        let mut r = RelayState::default();
        assert!(r.switch(true, 1_000));
        assert!(!r.switch(true, 2_000));
        assert!(r.switch(false, 4_000));
        assert_eq!(r.total_on_ms, 3_000);
        assert_eq!(r.activations, 1);
        r.switch(true, 5_000);
        assert_eq!(r.total_on_ms_at(6_000), 4_000);
    }

    #[test]
    fn critical_temperature_cuts_heater() {
        let mut c = controller();
        let mut hw = Relay::default();
        let out = c.update(0, Some((39.0, 65.0)), &mut hw);
        assert!(!hw.heater);
        assert_eq!(out.critical_temp, Some(39.0));
    }

    #[test]
    fn manual_heater_is_refused_when_too_hot_or_blind() {
        let mut c = controller();
        let mut hw = Relay::default();
        c.update(0, Some((38.5, 65.0)), &mut hw);
        assert!(!c.manual_heater(true, 50, &mut hw));
        assert!(!hw.heater);

        let mut c = controller();
        c.update(0, None, &mut hw);
        assert!(!c.manual_heater(true, 50, &mut hw));
        assert!(!c.relays().heater.on);
    }

    #[test]
    fn manual_heater_and_humidifier_switch_relays() {
        let mut c = controller();
        let mut hw = Relay::default();
        assert!(c.manual_heater(true, 10, &mut hw));
        assert!(hw.heater);
        assert!(c.relays().heater.on);
        assert!(c.manual_heater(false, 20, &mut hw));
        assert!(!hw.heater);

        c.manual_humidifier(true, 30, &mut hw);
        assert!(hw.humidifier);
        assert_eq!(c.relays().humidifier.activations, 1);
    }

    #[test]
    fn critical_cut_does_not_wait_for_next_window() {
        let mut c = controller();
        let mut hw = Relay::default();
        c.update(0, Some((35.0, 65.0)), &mut hw);
        assert!(hw.heater);
        // 100 ms later the PWM evaluation is not due yet.
        let out = c.update(100, Some((39.5, 65.0)), &mut hw);
        assert!(!hw.heater);
        assert_eq!(out.critical_temp, Some(39.5));
    }

    #[test]
    fn cold_chamber_heats_and_humidifies() {
        let mut c = controller();
        let mut hw = Relay::default();
        c.update(0, Some((35.0, 50.0)), &mut hw);
        assert!(hw.heater);
        assert!(hw.humidifier);
    }

    #[test]
    fn blind_controller_forces_off() {
        let mut c = controller();
        let mut hw = Relay::default();
        c.update(0, Some((35.0, 50.0)), &mut hw);
        let out = c.update(1_000, None, &mut hw);
        assert!(out.blind);
        assert!(!hw.heater);
        assert!(!hw.humidifier);
        assert_eq!(c.relays().heater.total_on_ms, 1_000);
    }

    #[test]
    fn max_run_cut_rests_heater() {
        let mut c = controller();
        let mut hw = Relay::default();
        let mut t = 0;
        let mut cut = false;
        // Far below target the under-band override keeps the heater on.
        while t <= 31 * 60_000 {
            cut |= c.update(t, Some((35.0, 65.0)), &mut hw).max_run_cut;
            t += 500;
        }
        assert!(cut);
    }

    #[test]
    fn power_save_scales_gains() {
        let mut c = controller();
        c.set_power_save(PowerSaveLevel::Medium);
        let (kp, ki, kd) = c.effective_pid_params();
        assert!((kp - 5.0).abs() < 1e-4);
        assert!((ki - 0.03).abs() < 1e-4);
        assert!((kd - 25.0).abs() < 1e-4);
        c.set_pid_params(20.0, 1.0, 10.0);
        assert!((c.effective_pid_params().0 - 10.0).abs() < 1e-4);
        assert_eq!(c.pid_params(), (20.0, 1.0, 10.0));
    }

    #[test]
    fn manual_turner_drives_relay() {
        let mut c = controller();
        let mut hw = Relay::default();
        c.manual_turner(true, 100, &mut hw);
        assert!(hw.turner);
        c.manual_turner(false, 200, &mut hw);
        assert!(!hw.turner);
        assert_eq!(c.turner_countdown_minutes(200), 120);
    }

    #[test]
    fn power_save_level_codes() {
        assert_eq!(PowerSaveLevel::try_from(2), Ok(PowerSaveLevel::Medium));
        assert!(PowerSaveLevel::try_from(4).is_err());
        assert_eq!(u8::from(PowerSaveLevel::Aggressive), 3);
    }
}
