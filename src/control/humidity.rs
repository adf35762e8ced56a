//! Humidifier hysteresis control.
//!
//! ```text
//!        off ◀──────────────┐
//!   ──────────┬─────────────┼──────────▶ %RH
//!      on     target-h   target+h   off
//! ```
//!
//! Between the two thresholds the previous state is held.

use super::PowerSaveLevel;

/// Below `target - POWER_SAVE_BAND` the humidifier may run under
/// medium / aggressive power-save; above it, it is held off.
pub const POWER_SAVE_BAND: f32 = 5.0;

#[derive(Debug, Clone)]
pub struct HumidityControl {
    hysteresis: f32,
    interval_ms: u32,
    last_eval_ms: Option<u64>,
}

impl HumidityControl {
    pub fn new(hysteresis: f32, interval_ms: u32) -> Self {
        Self {
            hysteresis: hysteresis.max(0.0),
            interval_ms,
            last_eval_ms: None,
        }
    }

    pub fn hysteresis(&self) -> f32 {
        self.hysteresis
    }

    pub fn set_hysteresis(&mut self, h: f32) {
        self.hysteresis = h.max(0.0);
    }

    /// `Some(next_state)` when an evaluation is due, `None` otherwise.
    pub fn evaluate(
        &mut self,
        now_ms: u64,
        humidity: f32,
        target: f32,
        currently_on: bool,
        power_save: PowerSaveLevel,
    ) -> Option<bool> {
        if let Some(last) = self.last_eval_ms {
            if now_ms.saturating_sub(last) < u64::from(self.interval_ms) {
                return None;
            }
        }
        self.last_eval_ms = Some(now_ms);
        Some(decide(humidity, target, self.hysteresis, currently_on, power_save))
    }
}

/// Pure hysteresis decision.
pub fn decide(
    humidity: f32,
    target: f32,
    hysteresis: f32,
    currently_on: bool,
    power_save: PowerSaveLevel,
) -> bool {
    let mut on = if humidity < target - hysteresis {
        true
    } else if humidity > target + hysteresis {
        false
    } else {
        currently_on
    };
    if power_save.trims_near_setpoint() && humidity > target - POWER_SAVE_BAND {
        on = false;
    }
    on
}
