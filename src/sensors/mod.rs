//! Dual-sensor fusion.
//!
//! Two SHT31 channels are read through the [`SensorPort`], calibrated,
//! filtered and blended into one authoritative [`SensorData`] record.
//!
//! ```text
//!   raw ──▶ range gate ──▶ + offset ──▶ sanity gate ──▶ moving avg ──▶ channel
//!                                                                        │
//!   channel 1 ─┐                                                         │
//!              ├──▶ weighted blend (0.5/0.5, 0.7/0.3, passthrough) ──▶ fused
//!   channel 2 ─┘
//! ```
//!
//! A channel is invalidated only after [`MAX_CONSECUTIVE_ERRORS`] failed
//! reads in a row and becomes valid again on the next good read.  If no
//! channel is valid, [`SensorFusion::update`] returns `false` and the fused
//! values are kept for display only.

pub mod filter;

use log::{debug, error, info, warn};
use serde::Serialize;

use crate::app::ports::SensorPort;
use crate::config::{Calibration, SystemConfig};
use crate::error::SensorError;
use filter::MovingAverage;

/// Consecutive failed reads before a channel is marked invalid.
pub const MAX_CONSECUTIVE_ERRORS: u8 = 3;

/// Physical SHT31 instances on the shared I2C bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SensorId {
    /// Address 0x44.
    Primary,
    /// Address 0x45.
    Secondary,
}

impl SensorId {
    pub const BOTH: [Self; 2] = [Self::Primary, Self::Secondary];

    const fn index(self) -> usize {
        match self {
            Self::Primary => 0,
            Self::Secondary => 1,
        }
    }

    /// 1-based number used in logs and payloads.
    pub const fn number(self) -> u8 {
        self.index() as u8 + 1
    }
}

/// Unprocessed instrument output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawReading {
    pub temperature: f32,
    pub humidity: f32,
}

// ───────────────────────────────────────────────────────────────
// Per-channel state
// ───────────────────────────────────────────────────────────────

/// Filtered state of one sensor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ChannelReading {
    pub temperature: f32,
    pub humidity: f32,
    pub valid: bool,
    pub error_count: u8,
    pub recovery_attempts: u32,
}

impl Default for ChannelReading {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            humidity: 0.0,
            valid: false,
            error_count: 0,
            recovery_attempts: 0,
        }
    }
}

struct Channel {
    id: SensorId,
    reading: ChannelReading,
    last_raw: Option<RawReading>,
    temp_filter: MovingAverage,
    hum_filter: MovingAverage,
}

impl Channel {
    fn new(id: SensorId, window: u8) -> Self {
        Self {
            id,
            reading: ChannelReading::default(),
            last_raw: None,
            temp_filter: MovingAverage::new(window),
            hum_filter: MovingAverage::new(window),
        }
    }

    fn offsets(&self, cal: &Calibration) -> (f32, f32) {
        match self.id {
            SensorId::Primary => (cal.temp_offset1, cal.hum_offset1),
            SensorId::Secondary => (cal.temp_offset2, cal.hum_offset2),
        }
    }

    /// Gate, calibrate and filter one raw reading.
    fn accept(&mut self, raw: RawReading, cal: &Calibration) -> Result<(), SensorError> {
        if raw.temperature.is_nan() || raw.humidity.is_nan() {
            return Err(SensorError::NotANumber);
        }
        if !(raw.temperature > -40.0 && raw.temperature < 125.0)
            || !(0.0..=100.0).contains(&raw.humidity)
        {
            return Err(SensorError::OutOfRange);
        }
        self.last_raw = Some(raw);

        let (t_off, h_off) = self.offsets(cal);
        let t = raw.temperature + t_off;
        let h = raw.humidity + h_off;
        if t.abs() > 100.0 || h.abs() > 150.0 {
            return Err(SensorError::OutOfRange);
        }

        self.reading.temperature = self.temp_filter.push(t);
        self.reading.humidity = self.hum_filter.push(h).clamp(0.0, 100.0);
        Ok(())
    }

    fn record(&mut self, result: Result<RawReading, SensorError>, cal: &Calibration) {
        let n = self.id.number();
        match result.and_then(|raw| self.accept(raw, cal)) {
            Ok(()) => {
                if !self.reading.valid {
                    info!("Sensors: SHT31 #{} back online", n);
                }
                self.reading.error_count = 0;
                self.reading.valid = true;
                debug!(
                    "Sensors: SHT31 #{} T={:.1}C H={:.1}%",
                    n, self.reading.temperature, self.reading.humidity
                );
            }
            Err(e) => {
                self.reading.error_count = self.reading.error_count.saturating_add(1);
                if self.reading.error_count >= MAX_CONSECUTIVE_ERRORS {
                    if self.reading.valid {
                        error!("Sensors: SHT31 #{} invalid after {} failures ({})", n, self.reading.error_count, e);
                    }
                    self.reading.valid = false;
                } else {
                    warn!("Sensors: SHT31 #{} read failed ({}), keeping last value", n, e);
                }
            }
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Fused record
// ───────────────────────────────────────────────────────────────

/// Snapshot of both channels and the blended result.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SensorData {
    pub sensor1: ChannelReading,
    pub sensor2: ChannelReading,
    pub temperature: f32,
    pub humidity: f32,
    /// Uptime (ms) of the last successful fusion.
    pub timestamp_ms: u64,
}

impl SensorData {
    pub fn any_valid(&self) -> bool {
        self.sensor1.valid || self.sensor2.valid
    }

    pub fn both_valid(&self) -> bool {
        self.sensor1.valid && self.sensor2.valid
    }

    /// Absolute inter-sensor differences `(temp, humidity)`.
    pub fn divergence(&self) -> (f32, f32) {
        (
            (self.sensor1.temperature - self.sensor2.temperature).abs(),
            (self.sensor1.humidity - self.sensor2.humidity).abs(),
        )
    }
}

/// Blend weights `(w1, w2)` for two valid channels given their recent
/// error counts.
pub fn fusion_weights(errors1: u8, errors2: u8) -> (f32, f32) {
    match (errors1, errors2) {
        (e1, 0) if e1 > 0 => (0.3, 0.7),
        (0, e2) if e2 > 0 => (0.7, 0.3),
        _ => (0.5, 0.5),
    }
}

// ───────────────────────────────────────────────────────────────
// Fusion engine
// ───────────────────────────────────────────────────────────────

pub struct SensorFusion {
    channels: [Channel; 2],
    calibration: Calibration,
    read_interval_ms: u32,
    recovery_interval_ms: u32,
    divergence_temp: f32,
    divergence_hum: f32,
    last_read_ms: Option<u64>,
    last_recovery_ms: u64,
    temperature: f32,
    humidity: f32,
    fused_at_ms: u64,
    fused_valid: bool,
}

impl SensorFusion {
    pub fn new(config: &SystemConfig, calibration: Calibration) -> Self {
        Self {
            channels: [
                Channel::new(SensorId::Primary, config.filter_samples),
                Channel::new(SensorId::Secondary, config.filter_samples),
            ],
            calibration,
            read_interval_ms: config.sensor_read_interval_ms,
            recovery_interval_ms: config.sensor_recovery_interval_ms,
            divergence_temp: config.divergence_temp_c,
            divergence_hum: config.divergence_hum_pct,
            last_read_ms: None,
            last_recovery_ms: 0,
            temperature: 0.0,
            humidity: 0.0,
            fused_at_ms: 0,
            fused_valid: false,
        }
    }

    /// Probe both sensors once at boot.  Returns `true` if at least one
    /// answered.
    pub fn begin(&mut self, port: &mut dyn SensorPort) -> bool {
        let mut any = false;
        for ch in &mut self.channels {
            let ok = port.reinit(ch.id);
            if ok {
                info!("Sensors: SHT31 #{} found", ch.id.number());
            } else {
                error!("Sensors: SHT31 #{} not found", ch.id.number());
            }
            any |= ok;
        }
        any
    }

    pub fn calibration(&self) -> Calibration {
        self.calibration
    }

    pub fn set_calibration(&mut self, calibration: Calibration) {
        self.calibration = calibration;
    }

    /// Read both sensors (rate-limited to the configured interval), filter,
    /// check divergence and recompute the fused value.
    ///
    /// Returns `false` when no sensor is valid; the previous fused values
    /// are then retained for display only.
    pub fn update(&mut self, now_ms: u64, port: &mut dyn SensorPort) -> bool {
        if let Some(last) = self.last_read_ms {
            if now_ms.saturating_sub(last) < u64::from(self.read_interval_ms) {
                return self.fused_valid;
            }
        }
        self.last_read_ms = Some(now_ms);

        self.recovery_sweep(now_ms, port);

        let cal = self.calibration;
        for ch in &mut self.channels {
            let result = port.read_raw(ch.id);
            ch.record(result, &cal);
        }

        self.check_divergence();
        self.fuse(now_ms)
    }

    fn recovery_sweep(&mut self, now_ms: u64, port: &mut dyn SensorPort) {
        if now_ms.saturating_sub(self.last_recovery_ms) <= u64::from(self.recovery_interval_ms) {
            return;
        }
        self.last_recovery_ms = now_ms;
        for ch in &mut self.channels {
            if !ch.reading.valid && ch.reading.error_count >= MAX_CONSECUTIVE_ERRORS {
                ch.reading.recovery_attempts = ch.reading.recovery_attempts.saturating_add(1);
                let ok = port.reinit(ch.id);
                warn!(
                    "Sensors: SHT31 #{} re-init attempt {} ({})",
                    ch.id.number(),
                    ch.reading.recovery_attempts,
                    if ok { "ok" } else { "no answer" }
                );
            }
        }
    }

    fn check_divergence(&self) {
        let [c1, c2] = &self.channels;
        if !(c1.reading.valid && c2.reading.valid) {
            return;
        }
        let dt = (c1.reading.temperature - c2.reading.temperature).abs();
        let dh = (c1.reading.humidity - c2.reading.humidity).abs();
        if dt > self.divergence_temp {
            let (hot, cold) = if c1.reading.temperature > c2.reading.temperature {
                (c1, c2)
            } else {
                (c2, c1)
            };
            warn!(
                "Sensors: temperature divergence {:.1}C, SHT31 #{} reads high ({:.1}C vs {:.1}C)",
                dt,
                hot.id.number(),
                hot.reading.temperature,
                cold.reading.temperature
            );
        }
        if dh > self.divergence_hum {
            warn!("Sensors: humidity divergence {:.1}%", dh);
        }
    }

    fn fuse(&mut self, now_ms: u64) -> bool {
        let [c1, c2] = &self.channels;
        let (r1, r2) = (c1.reading, c2.reading);
        let fused = match (r1.valid, r2.valid) {
            (true, true) => {
                let (w1, w2) = fusion_weights(r1.error_count, r2.error_count);
                Some((
                    r1.temperature * w1 + r2.temperature * w2,
                    r1.humidity * w1 + r2.humidity * w2,
                ))
            }
            (true, false) => Some((r1.temperature, r1.humidity)),
            (false, true) => Some((r2.temperature, r2.humidity)),
            (false, false) => None,
        };

        match fused {
            Some((t, h)) => {
                self.temperature = t;
                self.humidity = h;
                self.fused_at_ms = now_ms;
                self.fused_valid = true;
            }
            None => {
                if self.fused_valid {
                    error!("Sensors: no valid sensor");
                }
                self.fused_valid = false;
            }
        }
        self.fused_valid
    }

    pub fn is_valid(&self) -> bool {
        self.fused_valid
    }

    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    pub fn humidity(&self) -> f32 {
        self.humidity
    }

    pub fn channel(&self, id: SensorId) -> ChannelReading {
        self.channels[id.index()].reading
    }

    pub fn data(&self) -> SensorData {
        SensorData {
            sensor1: self.channels[0].reading,
            sensor2: self.channels[1].reading,
            temperature: self.temperature,
            humidity: self.humidity,
            timestamp_ms: self.fused_at_ms,
        }
    }

    /// Live plausibility test (−10..60 °C, 0..100 %RH) of every currently
    /// valid sensor.  Failing sensors are invalidated.  Returns `true` if at
    /// least one passes.
    pub fn check_integrity(&mut self, port: &mut dyn SensorPort) -> bool {
        let mut any = false;
        for ch in &mut self.channels {
            let ok = ch.reading.valid
                && match port.read_raw(ch.id) {
                    Ok(r) => {
                        (-10.0..=60.0).contains(&r.temperature) && (0.0..=100.0).contains(&r.humidity)
                    }
                    Err(_) => false,
                };
            if !ok && ch.reading.valid {
                error!("Sensors: SHT31 #{} failed integrity test", ch.id.number());
            }
            ch.reading.valid = ok;
            any |= ok;
        }
        info!(
            "Sensors: integrity #1={} #2={}",
            self.channels[0].reading.valid, self.channels[1].reading.valid
        );
        self.fused_valid = any;
        any
    }

    pub fn reset_error_counters(&mut self, now_ms: u64) {
        for ch in &mut self.channels {
            ch.reading.error_count = 0;
            ch.reading.recovery_attempts = 0;
        }
        self.last_recovery_ms = now_ms;
        info!("Sensors: error counters reset");
    }

    /// Derive offsets that make each valid sensor read the given reference.
    ///
    /// Uses a fresh raw read where possible and the last accepted raw
    /// reading otherwise.  Returns `None` when no sensor could be
    /// calibrated; the stored calibration is left untouched in that case.
    pub fn calibrate(
        &mut self,
        port: &mut dyn SensorPort,
        ref_temp: f32,
        ref_hum: f32,
    ) -> Option<Calibration> {
        let mut cal = self.calibration;
        let mut any = false;
        for ch in &mut self.channels {
            if !ch.reading.valid {
                continue;
            }
            let raw = match port.read_raw(ch.id) {
                Ok(r) if !r.temperature.is_nan() && !r.humidity.is_nan() => Some(r),
                _ => ch.last_raw,
            };
            let Some(raw) = raw else { continue };
            let (t, h) = (ref_temp - raw.temperature, ref_hum - raw.humidity);
            match ch.id {
                SensorId::Primary => {
                    cal.temp_offset1 = t;
                    cal.hum_offset1 = h;
                }
                SensorId::Secondary => {
                    cal.temp_offset2 = t;
                    cal.hum_offset2 = h;
                }
            }
            // Old offsets are baked into the averaged history.
            ch.temp_filter.clear();
            ch.hum_filter.clear();
            info!("Sensors: SHT31 #{} calibrated T{:+.2} H{:+.2}", ch.id.number(), t, h);
            any = true;
        }
        if !any {
            warn!("Sensors: calibration skipped, no valid sensor");
            return None;
        }
        self.calibration = cal;
        Some(cal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Scripted port: each sensor returns the front of its queue, or the
    /// last element forever.
    struct Script {
        s1: std::vec::Vec<Result<RawReading, SensorError>>,
        s2: std::vec::Vec<Result<RawReading, SensorError>>,
        reinits: u32,
    }

    fn ok(t: f32, h: f32) -> Result<RawReading, SensorError> {
        Ok(RawReading {
            temperature: t,
            humidity: h,
        })
    }

    impl SensorPort for Script {
        fn read_raw(&mut self, id: SensorId) -> Result<RawReading, SensorError> {
            let q = match id {
                SensorId::Primary => &mut self.s1,
                SensorId::Secondary => &mut self.s2,
            };
            if q.len() > 1 { q.remove(0) } else { q[0] }
        }
        fn reinit(&mut self, _id: SensorId) -> bool {
            self.reinits += 1;
            true
        }
    }

    fn fusion() -> SensorFusion {
        SensorFusion::new(&SystemConfig::default(), Calibration::default())
    }

    #[test]
    fn equal_weights_when_both_clean() {
        let mut f = fusion();
        let mut p = Script { s1: vec![ok(37.0, 60.0)], s2: vec![ok(39.5, 61.0)], reinits: 0 };
        assert!(f.update(0, &mut p));
        assert!((f.temperature() - 38.25).abs() < 1e-4);
        assert!((f.humidity() - 60.5).abs() < 1e-4);
    }

    #[test]
    fn weights_favour_clean_sensor() {
        assert_eq!(fusion_weights(0, 0), (0.5, 0.5));
        assert_eq!(fusion_weights(1, 0), (0.3, 0.7));
        assert_eq!(fusion_weights(0, 2), (0.7, 0.3));
        assert_eq!(fusion_weights(1, 2), (0.5, 0.5));
    }

    #[test]
    fn invalid_after_three_failures_and_back_on_success() {
        let mut f = fusion();
        let mut p = Script {
            s1: vec![
                ok(37.0, 60.0),
                Err(SensorError::BusError),
                Err(SensorError::BusError),
                Err(SensorError::BusError),
                ok(37.0, 60.0),
            ],
            s2: vec![ok(37.0, 60.0)],
            reinits: 0,
        };
        let step = 2_000;
        f.update(0, &mut p);
        f.update(step, &mut p);
        f.update(2 * step, &mut p);
        assert!(f.channel(SensorId::Primary).valid);
        f.update(3 * step, &mut p);
        assert!(!f.channel(SensorId::Primary).valid);
        f.update(4 * step, &mut p);
        assert!(f.channel(SensorId::Primary).valid);
        assert_eq!(f.channel(SensorId::Primary).error_count, 0);
    }

    #[test]
    fn single_sensor_passthrough() {
        let mut f = fusion();
        let mut p = Script { s1: vec![Err(SensorError::BusError)], s2: vec![ok(36.0, 55.0)], reinits: 0 };
        for i in 0..3 {
            f.update(i * 2_000, &mut p);
        }
        assert!(!f.channel(SensorId::Primary).valid);
        assert_eq!(f.temperature(), f.channel(SensorId::Secondary).temperature);
    }

    #[test]
    fn no_valid_sensor_fails_and_keeps_last_values() {
        let mut f = fusion();
        let mut p = Script {
            s1: vec![ok(37.0, 60.0), Err(SensorError::NotANumber)],
            s2: vec![ok(37.0, 60.0), Err(SensorError::NotANumber)],
            reinits: 0,
        };
        assert!(f.update(0, &mut p));
        for i in 1..=3 {
            f.update(i * 2_000, &mut p);
        }
        assert!(!f.update(8_000, &mut p));
        assert_eq!(f.temperature(), 37.0);
    }

    #[test]
    fn rate_limited_reads() {
        let mut f = fusion();
        let mut p = Script { s1: vec![ok(37.0, 60.0), ok(30.0, 60.0)], s2: vec![ok(37.0, 60.0)], reinits: 0 };
        f.update(0, &mut p);
        f.update(500, &mut p);
        assert_eq!(f.channel(SensorId::Primary).temperature, 37.0);
    }

    #[test]
    fn offset_applied_and_sanity_gated() {
        let cal = Calibration { temp_offset1: 0.5, ..Default::default() };
        let mut f = SensorFusion::new(&SystemConfig::default(), cal);
        let mut p = Script { s1: vec![ok(37.0, 60.0)], s2: vec![ok(37.0, 60.0)], reinits: 0 };
        f.update(0, &mut p);
        assert!((f.channel(SensorId::Primary).temperature - 37.5).abs() < 1e-4);

        let bad = Calibration { hum_offset2: 200.0, ..Default::default() };
        f.set_calibration(bad);
        f.update(2_000, &mut p);
        assert_eq!(f.channel(SensorId::Secondary).error_count, 1);
    }

    #[test]
    fn raw_range_rejected_before_offset() {
        let mut f = fusion();
        let mut p = Script { s1: vec![ok(130.0, 50.0)], s2: vec![ok(37.0, 101.0)], reinits: 0 };
        f.update(0, &mut p);
        assert_eq!(f.channel(SensorId::Primary).error_count, 1);
        assert_eq!(f.channel(SensorId::Secondary).error_count, 1);
    }

    #[test]
    fn recovery_sweep_reinits_dead_sensor() {
        let mut cfg = SystemConfig::default();
        cfg.sensor_recovery_interval_ms = 10_000;
        let mut f = SensorFusion::new(&cfg, Calibration::default());
        let mut p = Script { s1: vec![Err(SensorError::BusError)], s2: vec![ok(37.0, 60.0)], reinits: 0 };
        for i in 0..3 {
            f.update(i * 2_000, &mut p);
        }
        f.update(20_000, &mut p);
        assert_eq!(p.reinits, 1);
        assert_eq!(f.channel(SensorId::Primary).recovery_attempts, 1);
    }

    #[test]
    fn calibrate_sets_offsets_from_reference() {
        let mut f = fusion();
        let mut p = Script { s1: vec![ok(37.0, 60.0)], s2: vec![ok(37.4, 62.0)], reinits: 0 };
        f.update(0, &mut p);
        let cal = f.calibrate(&mut p, 37.5, 65.0).unwrap();
        assert!((cal.temp_offset1 - 0.5).abs() < 1e-4);
        assert!((cal.hum_offset2 - 3.0).abs() < 1e-4);
        assert_eq!(f.calibration(), cal);
    }

    #[test]
    fn integrity_invalidates_implausible_sensor() {
        let mut f = fusion();
        let mut p = Script { s1: vec![ok(37.0, 60.0), ok(70.0, 60.0)], s2: vec![ok(37.0, 60.0)], reinits: 0 };
        f.update(0, &mut p);
        assert!(f.check_integrity(&mut p));
        assert!(!f.channel(SensorId::Primary).valid);
        assert!(f.channel(SensorId::Secondary).valid);
    }
}
