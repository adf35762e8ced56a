//! Heater PID + time-proportioning PWM.
//!
//! ```text
//!   |<──────── window (5 s, 2.5 s near setpoint) ────────>|
//!   |████████ output ms ████████|________ off ____________|
//! ```
//!
//! The PID output is rate-limited against the previous cycle and then
//! read as "milliseconds on per window".  Safety overrides are applied by
//! the caller afterwards.

use super::pid::PidController;
use crate::config::SystemConfig;

/// Error below which the window is halved for finer resolution (°C).
pub const FINE_WINDOW_ERROR_C: f32 = 0.5;
/// Error above which the evaluation period is pinned to the minimum (°C).
pub const FAST_INTERVAL_ERROR_C: f32 = 1.0;
/// Rest enforced after a max-run cut-off before the PWM may re-enable.
pub const MAX_RUN_REST_MS: u64 = 10_000;

/// Evaluation period for a given absolute temperature error.
///
/// Linear from `max_ms` at zero error down to `min_ms` at
/// [`FAST_INTERVAL_ERROR_C`], `min_ms` beyond that.
pub fn adaptive_interval(error_abs: f32, min_ms: u32, max_ms: u32) -> u32 {
    if error_abs > FAST_INTERVAL_ERROR_C {
        return min_ms;
    }
    let span = max_ms.saturating_sub(min_ms) as f32;
    let frac = (error_abs / FAST_INTERVAL_ERROR_C).clamp(0.0, 1.0);
    max_ms - (span * frac) as u32
}

#[derive(Debug, Clone)]
pub struct HeaterControl {
    pid: PidController,
    window_ms: u32,
    max_step: f32,
    interval_min_ms: u32,
    interval_max_ms: u32,
    interval_ms: u32,
    window_start_ms: u64,
    last_eval_ms: Option<u64>,
    rest_until_ms: u64,
    output: f32,
}

impl HeaterControl {
    pub fn new(config: &SystemConfig, kp: f32, ki: f32, kd: f32, target: f32, now_ms: u64) -> Self {
        let mut pid = PidController::new(kp, ki, kd, target);
        pid.set_limits(0.0, config.pwm_window_ms as f32);
        Self {
            pid,
            window_ms: config.pwm_window_ms,
            max_step: config.max_output_step,
            interval_min_ms: config.control_interval_min_ms,
            interval_max_ms: config.control_interval_max_ms,
            interval_ms: config.control_interval_max_ms,
            window_start_ms: now_ms,
            last_eval_ms: None,
            rest_until_ms: 0,
            output: 0.0,
        }
    }

    pub fn set_target(&mut self, target: f32) {
        self.pid.set_target(target);
    }

    pub fn set_tunings(&mut self, kp: f32, ki: f32, kd: f32) {
        self.pid.set_tunings(kp, ki, kd);
    }

    pub fn tunings(&self) -> (f32, f32, f32) {
        self.pid.tunings()
    }

    /// Rate-limited output of the last evaluation (ms per window).
    pub fn output(&self) -> f32 {
        self.output
    }

    /// Current adaptive evaluation period.
    pub fn interval_ms(&self) -> u32 {
        self.interval_ms
    }

    pub fn is_due(&self, now_ms: u64) -> bool {
        self.last_eval_ms
            .is_none_or(|last| now_ms.saturating_sub(last) >= u64::from(self.interval_ms))
    }

    /// Hold the heater off for [`MAX_RUN_REST_MS`].
    pub fn rest(&mut self, now_ms: u64) {
        self.rest_until_ms = now_ms + MAX_RUN_REST_MS;
    }

    /// Run PID and PWM for one evaluation.  Returns the PWM request, or
    /// `None` when the adaptive period has not elapsed yet.
    pub fn evaluate(&mut self, now_ms: u64, temperature: f32) -> Option<bool> {
        let error_abs = (self.pid.target() - temperature).abs();
        self.interval_ms = adaptive_interval(error_abs, self.interval_min_ms, self.interval_max_ms);
        if !self.is_due(now_ms) {
            return None;
        }
        let dt = self
            .last_eval_ms
            .map_or(0.0, |last| now_ms.saturating_sub(last) as f32 / 1000.0);
        self.last_eval_ms = Some(now_ms);

        let raw = self.pid.compute(temperature, dt);
        self.output = raw.clamp(self.output - self.max_step, self.output + self.max_step);

        let window = if error_abs < FINE_WINDOW_ERROR_C {
            u64::from(self.window_ms / 2)
        } else {
            u64::from(self.window_ms)
        }
        .max(1);

        let elapsed = now_ms.saturating_sub(self.window_start_ms);
        if elapsed > window {
            self.window_start_ms += elapsed / window * window;
        }

        if now_ms < self.rest_until_ms {
            return Some(false);
        }
        let in_window = now_ms.saturating_sub(self.window_start_ms) as f32;
        Some(in_window < self.output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adaptive_interval_bounds() {
        assert_eq!(adaptive_interval(0.0, 500, 2_000), 2_000);
        assert_eq!(adaptive_interval(0.5, 500, 2_000), 1_250);
        assert_eq!(adaptive_interval(1.0, 500, 2_000), 500);
        assert_eq!(adaptive_interval(3.0, 500, 2_000), 500);
    }

    #[test]
    fn output_step_is_rate_limited() {
        let cfg = SystemConfig::default();
        let mut h = HeaterControl::new(&cfg, 10_000.0, 0.0, 0.0, 37.8, 0);
        h.evaluate(0, 30.0);
        assert_eq!(h.output(), 500.0);
        h.evaluate(500, 30.0);
        assert_eq!(h.output(), 1_000.0);
    }

    #[test]
    fn cold_start_requests_heat() {
        let cfg = SystemConfig::default();
        let mut h = HeaterControl::new(&cfg, 10_000.0, 0.0, 0.0, 37.8, 0);
        assert_eq!(h.evaluate(0, 30.0), Some(true));
    }

    #[test]
    fn not_due_returns_none() {
        let cfg = SystemConfig::default();
        let mut h = HeaterControl::new(&cfg, 10.0, 0.1, 50.0, 37.8, 0);
        assert!(h.evaluate(0, 37.8).is_some());
        assert!(h.evaluate(100, 37.8).is_none());
        assert!(h.evaluate(2_000, 37.8).is_some());
    }

    #[test]
    fn rest_holds_heater_off() {
        let cfg = SystemConfig::default();
        let mut h = HeaterControl::new(&cfg, 10_000.0, 0.0, 0.0, 37.8, 0);
        h.rest(0);
        assert_eq!(h.evaluate(0, 30.0), Some(false));
        assert_eq!(h.evaluate(10_000, 30.0), Some(true));
    }
}
