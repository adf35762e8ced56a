//! PID controller for the heater duty.
//!
//! Output is expressed in milliseconds of heater on-time per PWM window,
//! so the limits are `0..=window`.  The integral term is accumulated in
//! output units and clamped to the limits (anti-windup); the derivative
//! acts on the measurement, not the error, so a setpoint change from a
//! profile stage transition does not kick the output.

/// PID controller
#[derive(Debug, Clone)]
pub struct PidController {
    kp: f32,
    ki: f32,
    kd: f32,
    setpoint: f32,
    integral: f32,
    last_input: Option<f32>,
    output_min: f32,
    output_max: f32,
    last_output: f32,
}

impl PidController {
    pub fn new(kp: f32, ki: f32, kd: f32, setpoint: f32) -> Self {
        Self {
            kp,
            ki,
            kd,
            setpoint,
            integral: 0.0,
            last_input: None,
            output_min: 0.0,
            output_max: 100.0,
            last_output: 0.0,
        }
    }

    /// Set output limits
    pub fn set_limits(&mut self, min: f32, max: f32) {
        if min >= max {
            return;
        }
        self.output_min = min;
        self.output_max = max;
        self.integral = self.integral.clamp(min, max);
    }

    pub fn set_tunings(&mut self, kp: f32, ki: f32, kd: f32) {
        if kp < 0.0 || ki < 0.0 || kd < 0.0 {
            return;
        }
        self.kp = kp;
        self.ki = ki;
        self.kd = kd;
    }

    pub fn tunings(&self) -> (f32, f32, f32) {
        (self.kp, self.ki, self.kd)
    }

    /// Update setpoint
    pub fn set_target(&mut self, setpoint: f32) {
        self.setpoint = setpoint;
    }

    pub fn target(&self) -> f32 {
        self.setpoint
    }

    /// Compute PID output given current measurement and the time since
    /// the previous call in seconds.
    pub fn compute(&mut self, measurement: f32, dt: f32) -> f32 {
        let error = self.setpoint - measurement;

        // Proportional
        let p = self.kp * error;

        // Integral, clamped to the output range
        if dt > 0.0 {
            self.integral = (self.integral + self.ki * error * dt).clamp(self.output_min, self.output_max);
        }

        // Derivative on measurement
        let d = match self.last_input {
            Some(prev) if dt > 0.0 => -self.kd * (measurement - prev) / dt,
            _ => 0.0,
        };
        self.last_input = Some(measurement);

        let output = (p + self.integral + d).clamp(self.output_min, self.output_max);
        self.last_output = output;
        output
    }

    pub fn last_output(&self) -> f32 {
        self.last_output
    }

    /// Reset controller state
    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.last_input = None;
        self.last_output = 0.0;
    }
}
