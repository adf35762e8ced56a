//! Heater safety supervisor.
//!
//! The supervisor runs **after** the PID/PWM decision on every heater
//! evaluation and may override it.  Overrides are applied in priority
//! order:
//!
//! 1. `temp >= target + 1.0` → critical cut-off, alarm raised.
//! 2. `temp >  target + 0.2` → cut-off.
//! 3. `temp <  target − 0.3` → forced on.
//! 4. Heater continuously on longer than the power-save run limit → cut-off.
//! 5. Medium / aggressive power-save and `temp > target − 0.2` → cut-off.
//!
//! Each active condition is tracked as a bit in a fault mask so set/clear
//! transitions are logged once, not every cycle.

use log::{debug, error, info, warn};

use crate::control::PowerSaveLevel;
use crate::error::SafetyFault;

pub const CRITICAL_MARGIN_C: f32 = 1.0;
pub const HIGH_MARGIN_C: f32 = 0.2;
pub const LOW_MARGIN_C: f32 = 0.3;
pub const POWER_SAVE_MARGIN_C: f32 = 0.2;

/// Inputs for one heater evaluation.
#[derive(Debug, Clone, Copy)]
pub struct HeaterCheck {
    pub temperature: f32,
    pub target: f32,
    /// What the PWM stage asked for.
    pub requested_on: bool,
    /// How long the relay has been continuously on, if it is on.
    pub on_for_ms: Option<u64>,
    pub power_save: PowerSaveLevel,
}

/// Supervisor verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaterVerdict {
    pub heater_on: bool,
    /// Critical over-temperature this cycle.
    pub critical: bool,
    /// The continuous-run limit cut the heater this cycle.
    pub max_run_cut: bool,
}

/// Safety supervisor.
#[derive(Debug, Default)]
pub struct SafetySupervisor {
    /// Latched fault bitmask.
    faults: u8,
}

impl SafetySupervisor {
    pub fn new() -> Self {
        Self { faults: 0 }
    }

    /// Apply every override to the PWM request and return the final
    /// heater state.
    pub fn evaluate(&mut self, c: &HeaterCheck) -> HeaterVerdict {
        self.clear_fault(SafetyFault::NoMeasurement);

        let critical = c.temperature >= c.target + CRITICAL_MARGIN_C;
        let over = !critical && c.temperature > c.target + HIGH_MARGIN_C;
        let under = !critical && !over && c.temperature < c.target - LOW_MARGIN_C;

        self.eval_fault(SafetyFault::CriticalOverTemp, critical);
        self.eval_fault(SafetyFault::OverTemp, over);
        self.eval_fault(SafetyFault::UnderTemp, under);

        let mut on = if critical || over {
            false
        } else if under {
            true
        } else {
            c.requested_on
        };

        let limit = c.power_save.max_heater_run_ms();
        let max_run_cut = on && c.on_for_ms.is_some_and(|t| t > limit);
        self.eval_fault(SafetyFault::MaxRunTime, max_run_cut);
        if max_run_cut {
            on = false;
        }

        let ps_cut = on
            && c.power_save.trims_near_setpoint()
            && c.temperature > c.target - POWER_SAVE_MARGIN_C;
        self.eval_fault(SafetyFault::PowerSaveCutoff, ps_cut);
        if ps_cut {
            on = false;
        }

        HeaterVerdict {
            heater_on: on,
            critical,
            max_run_cut,
        }
    }

    /// Record loss of every measurement.  Temperature faults are
    /// meaningless without a reading and are dropped.
    pub fn no_measurement(&mut self) {
        for f in [
            SafetyFault::CriticalOverTemp,
            SafetyFault::OverTemp,
            SafetyFault::UnderTemp,
            SafetyFault::MaxRunTime,
            SafetyFault::PowerSaveCutoff,
        ] {
            self.clear_fault(f);
        }
        self.eval_fault(SafetyFault::NoMeasurement, true);
    }

    /// Current fault bitmask.
    pub fn faults(&self) -> u8 {
        self.faults
    }

    /// True if **any** fault is active.
    pub fn has_faults(&self) -> bool {
        self.faults != 0
    }

    /// Check if a specific fault is active.
    pub fn has_fault(&self, fault: SafetyFault) -> bool {
        self.faults & fault.mask() != 0
    }

    // ── Internal ──────────────────────────────────────────────────

    /// Set or clear a fault bit based on a boolean condition.
    fn eval_fault(&mut self, fault: SafetyFault, condition: bool) {
        let active = self.faults & fault.mask() != 0;
        if condition && !active {
            match fault {
                SafetyFault::CriticalOverTemp | SafetyFault::NoMeasurement => {
                    error!("Control: SAFETY FAULT SET: {fault}")
                }
                SafetyFault::MaxRunTime => warn!("Control: SAFETY FAULT SET: {fault}"),
                _ => debug!("Control: heater override: {fault}"),
            }
            self.faults |= fault.mask();
        } else if !condition && active {
            match fault {
                SafetyFault::CriticalOverTemp | SafetyFault::NoMeasurement => {
                    info!("Control: SAFETY FAULT CLEARED: {fault}")
                }
                _ => debug!("Control: heater override cleared: {fault}"),
            }
            self.faults &= !fault.mask();
        }
    }

    /// Unconditionally clear a fault bit.
    fn clear_fault(&mut self, fault: SafetyFault) {
        self.eval_fault(fault, false);
    }
}
