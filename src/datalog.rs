//! Time-series data log.
//!
//! Two views of the same samples:
//!
//! - an in-memory ring of the last [`MAX_RECORDS`] samples, feeding the
//!   statistics and graph queries;
//! - a CSV blob under `templog`, appended in batches.  Only samples that
//!   differ meaningfully from the last written one reach the blob.
//!
//! The backup bundle ties the persisted documents and the tail of the log
//! into a single JSON document.

use heapless::Vec as BoundedVec;
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::app::ports::StoragePort;
use crate::config::{Calibration, IncubationSettings, SystemConfig, TurnerSettings};
use crate::error::{CodecError, Error, Result};
use crate::recovery::{OutageLog, PowerOutage};
use crate::store::{self, keys};

pub const MAX_RECORDS: usize = 144;
/// Samples buffered before a forced flush.
pub const LOG_BUFFER_SIZE: usize = 10;
/// Upper bound on the CSV blob.
pub const MAX_LOG_BYTES: usize = 4_000;
pub const CSV_HEADER: &str = "timestamp,temperature,humidity,heater,humidifier";
/// Samples carried in a backup bundle.
pub const BACKUP_RECORDS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DataRecord {
    pub timestamp: u32,
    pub temperature: f32,
    pub humidity: f32,
    pub heater: bool,
    pub humidifier: bool,
}

impl DataRecord {
    fn to_csv(&self) -> String {
        format!(
            "{},{:.1},{:.1},{},{}",
            self.timestamp,
            self.temperature,
            self.humidity,
            u8::from(self.heater),
            u8::from(self.humidifier)
        )
    }

    fn from_csv(line: &str) -> Option<Self> {
        let mut f = line.trim().split(',');
        let rec = Self {
            timestamp: f.next()?.parse().ok()?,
            temperature: f.next()?.parse().ok()?,
            humidity: f.next()?.parse().ok()?,
            heater: f.next()?.trim() != "0",
            humidifier: f.next()?.trim() != "0",
        };
        f.next().is_none().then_some(rec)
    }
}

/// Append `rows` to a CSV blob, keeping the header and dropping the oldest
/// rows until the result fits in [`MAX_LOG_BYTES`].
pub fn append_csv(existing: &str, rows: &[DataRecord]) -> String {
    let mut lines: std::collections::VecDeque<String> = existing
        .lines()
        .filter(|l| !l.trim().is_empty() && *l != CSV_HEADER)
        .map(str::to_owned)
        .collect();
    lines.extend(rows.iter().map(DataRecord::to_csv));

    let mut len = CSV_HEADER.len() + 1 + lines.iter().map(|l| l.len() + 1).sum::<usize>();
    while len > MAX_LOG_BYTES {
        match lines.pop_front() {
            Some(l) => len -= l.len() + 1,
            None => break,
        }
    }

    let mut out = String::with_capacity(len);
    out.push_str(CSV_HEADER);
    out.push('\n');
    for l in lines {
        out.push_str(&l);
        out.push('\n');
    }
    out
}

// ───────────────────────────────────────────────────────────────
// Queries
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LogStats {
    pub count: usize,
    pub min_temp: f32,
    pub max_temp: f32,
    pub avg_temp: f32,
    pub min_hum: f32,
    pub max_hum: f32,
    pub avg_hum: f32,
    /// Share of samples with the heater on, in percent.
    pub heater_on_pct: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphSeries {
    Temperature,
    Humidity,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GraphPoint {
    pub time: u32,
    pub value: f32,
}

// ───────────────────────────────────────────────────────────────
// Data log
// ───────────────────────────────────────────────────────────────

pub struct DataLog {
    records: BoundedVec<DataRecord, MAX_RECORDS>,
    pending: BoundedVec<DataRecord, LOG_BUFFER_SIZE>,
    last_written: Option<DataRecord>,
    last_flush_ms: u64,
    min_temp_delta: f32,
    min_hum_delta: f32,
    max_silence_secs: u32,
    flush_interval_ms: u32,
}

impl DataLog {
    pub fn new(config: &SystemConfig) -> Self {
        Self {
            records: BoundedVec::new(),
            pending: BoundedVec::new(),
            last_written: None,
            last_flush_ms: 0,
            min_temp_delta: config.log_min_temp_delta,
            min_hum_delta: config.log_min_hum_delta,
            max_silence_secs: config.log_max_silence_secs,
            flush_interval_ms: config.log_flush_interval_ms,
        }
    }

    /// Rebuild the ring from the tail of the persisted CSV.
    pub fn load(&mut self, storage: &dyn StoragePort) -> Result<usize> {
        self.records.clear();
        let Some(bytes) = store::load_bytes(storage, keys::TEMP_LOG)? else {
            return Ok(0);
        };
        let text = core::str::from_utf8(&bytes).map_err(|_| Error::Codec(CodecError::Text))?;
        let mut parsed: Vec<DataRecord> = text.lines().filter_map(DataRecord::from_csv).collect();
        parsed.sort_by_key(|r| r.timestamp);
        let skip = parsed.len().saturating_sub(MAX_RECORDS);
        for rec in parsed.into_iter().skip(skip) {
            let _ = self.records.push(rec);
        }
        self.last_written = self.records.last().copied();
        info!("Store: {} log records loaded", self.records.len());
        Ok(self.records.len())
    }

    /// Whether `rec` differs enough from the last written sample to be
    /// persisted.
    pub fn is_significant(&self, rec: &DataRecord) -> bool {
        let Some(last) = self.last_written else {
            return true;
        };
        (rec.temperature - last.temperature).abs() >= self.min_temp_delta
            || (rec.humidity - last.humidity).abs() >= self.min_hum_delta
            || rec.heater != last.heater
            || rec.humidifier != last.humidifier
            || rec.timestamp.saturating_sub(last.timestamp) >= self.max_silence_secs
    }

    /// Record one sample.  Significant samples are queued for the CSV blob,
    /// which is flushed once the queue is full or the flush period elapsed.
    /// Returns `true` when the sample was queued.
    pub fn record(&mut self, storage: &mut dyn StoragePort, rec: DataRecord, now_ms: u64) -> Result<bool> {
        if self.records.is_full() {
            self.records.remove(0);
        }
        let _ = self.records.push(rec);

        if !self.is_significant(&rec) {
            return Ok(false);
        }
        let _ = self.pending.push(rec);
        self.last_written = Some(rec);

        if self.pending.is_full()
            || now_ms.saturating_sub(self.last_flush_ms) > u64::from(self.flush_interval_ms)
        {
            self.last_flush_ms = now_ms;
            self.flush(storage)?;
        }
        Ok(true)
    }

    /// Append queued samples to the CSV blob.  The queue is emptied even
    /// when the write fails.
    pub fn flush(&mut self, storage: &mut dyn StoragePort) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let rows: Vec<DataRecord> = self.pending.iter().copied().collect();
        self.pending.clear();

        let existing = match store::load_bytes(storage, keys::TEMP_LOG)? {
            Some(b) => String::from_utf8(b).unwrap_or_default(),
            None => String::new(),
        };
        let blob = append_csv(&existing, &rows);
        store::save_bytes(storage, keys::TEMP_LOG, blob.as_bytes()).inspect_err(|e| {
            warn!("Store: templog write failed ({}), {} samples lost", e, rows.len());
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[DataRecord] {
        &self.records
    }

    pub fn latest(&self) -> Option<&DataRecord> {
        self.records.last()
    }

    /// Min/max/avg over the ring, or over samples inside `range` (inclusive
    /// Unix seconds).  `None` when nothing matches.
    pub fn stats(&self, range: Option<(u32, u32)>) -> Option<LogStats> {
        let mut it = self
            .records
            .iter()
            .filter(|r| range.is_none_or(|(from, to)| (from..=to).contains(&r.timestamp)));
        let first = it.next()?;
        let mut s = LogStats {
            count: 1,
            min_temp: first.temperature,
            max_temp: first.temperature,
            avg_temp: first.temperature,
            min_hum: first.humidity,
            max_hum: first.humidity,
            avg_hum: first.humidity,
            heater_on_pct: 0,
        };
        let mut heater_on = usize::from(first.heater);
        for r in it {
            s.count += 1;
            s.min_temp = s.min_temp.min(r.temperature);
            s.max_temp = s.max_temp.max(r.temperature);
            s.avg_temp += r.temperature;
            s.min_hum = s.min_hum.min(r.humidity);
            s.max_hum = s.max_hum.max(r.humidity);
            s.avg_hum += r.humidity;
            heater_on += usize::from(r.heater);
        }
        s.avg_temp /= s.count as f32;
        s.avg_hum /= s.count as f32;
        s.heater_on_pct = (heater_on * 100 / s.count) as u8;
        Some(s)
    }

    /// At most `max_points` evenly strided samples, oldest first.
    pub fn graph(&self, series: GraphSeries, max_points: usize) -> Vec<GraphPoint> {
        let n = self.records.len();
        if n == 0 || max_points == 0 {
            return Vec::new();
        }
        let step = if n > max_points { n / max_points } else { 1 };
        (0..n.min(max_points))
            .map(|i| {
                let r = &self.records[(i * step).min(n - 1)];
                GraphPoint {
                    time: r.timestamp,
                    value: match series {
                        GraphSeries::Temperature => r.temperature,
                        GraphSeries::Humidity => r.humidity,
                    },
                }
            })
            .collect()
    }

    /// Drop the ring, the queue and the persisted log.
    pub fn clear(&mut self, storage: &mut dyn StoragePort) -> Result<()> {
        self.records.clear();
        self.pending.clear();
        self.last_written = None;
        store::delete(storage, keys::TEMP_LOG)?;
        info!("Store: data log cleared");
        Ok(())
    }
}

// ───────────────────────────────────────────────────────────────
// Backup bundle
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerInfo {
    pub last_on_time: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupBundle {
    pub settings: Option<IncubationSettings>,
    pub motor_settings: Option<TurnerSettings>,
    pub calibration: Option<Calibration>,
    pub power: Option<PowerInfo>,
    pub temp_hum_records: Vec<DataRecord>,
    pub power_outages: Vec<PowerOutage>,
}

impl BackupBundle {
    /// Assemble a bundle from the persisted documents and in-memory logs.
    pub fn collect(storage: &dyn StoragePort, log: &DataLog, outages: &OutageLog) -> Result<Self> {
        let records = log.records();
        Ok(Self {
            settings: store::load_json(storage, keys::SETTINGS)?,
            motor_settings: store::load_json(storage, keys::TURNER)?,
            calibration: store::load_json(storage, keys::CALIBRATION)?,
            power: Some(PowerInfo {
                last_on_time: store::load_power_on_time(storage).unwrap_or(0),
            }),
            temp_hum_records: records[records.len().saturating_sub(BACKUP_RECORDS)..].to_vec(),
            power_outages: outages.iter().copied().collect(),
        })
    }

    /// Write the bundle under `backup`.  Returns its size in bytes.
    pub fn save(&self, storage: &mut dyn StoragePort) -> Result<usize> {
        let bytes = serde_json::to_vec(self).map_err(|_| Error::Codec(CodecError::Json))?;
        store::save_bytes(storage, keys::BACKUP, &bytes)?;
        info!("Store: backup written ({} bytes)", bytes.len());
        Ok(bytes.len())
    }

    pub fn load(storage: &dyn StoragePort) -> Result<Option<Self>> {
        store::load_json(storage, keys::BACKUP)
    }

    /// Write every present section back to its own document.  Samples and
    /// outage records are informational and are not restored.
    pub fn restore(&self, storage: &mut dyn StoragePort) -> Result<()> {
        if let Some(mut s) = self.settings {
            s.clamp_to_limits();
            store::save_json(storage, keys::SETTINGS, &s)?;
        }
        if let Some(t) = &self.motor_settings {
            store::save_json(storage, keys::TURNER, t)?;
        }
        if let Some(c) = &self.calibration {
            store::save_json(storage, keys::CALIBRATION, c)?;
        }
        if let Some(p) = self.power {
            store::save_power_on_time(storage, p.last_on_time)?;
        }
        info!("Store: backup restored");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::ports::StorageError;
    use std::collections::HashMap;

    #[derive(Default)]
    struct Mem(HashMap<String, Vec<u8>>);

    impl StoragePort for Mem {
        fn read(&self, ns: &str, key: &str, buf: &mut [u8]) -> core::result::Result<usize, StorageError> {
            let v = self.0.get(&format!("{ns}::{key}")).ok_or(StorageError::NotFound)?;
            let n = v.len().min(buf.len());
            buf[..n].copy_from_slice(&v[..n]);
            Ok(n)
        }
        fn write(&mut self, ns: &str, key: &str, data: &[u8]) -> core::result::Result<(), StorageError> {
            self.0.insert(format!("{ns}::{key}"), data.to_vec());
            Ok(())
        }
        fn delete(&mut self, ns: &str, key: &str) -> core::result::Result<(), StorageError> {
            self.0.remove(&format!("{ns}::{key}"));
            Ok(())
        }
        fn exists(&self, ns: &str, key: &str) -> bool {
            self.0.contains_key(&format!("{ns}::{key}"))
        }
    }

    fn rec(ts: u32, t: f32, h: f32, heater: bool) -> DataRecord {
        DataRecord {
            timestamp: ts,
            temperature: t,
            humidity: h,
            heater,
            humidifier: false,
        }
    }

    fn blob(m: &Mem) -> String {
        String::from_utf8(m.0[&format!("{}::{}", store::NAMESPACE, keys::TEMP_LOG)].clone()).unwrap()
    }

    #[test]
    fn csv_row_format() {
        assert_eq!(rec(100, 37.54, 60.0, true).to_csv(), "100,37.5,60.0,1,0");
        assert_eq!(DataRecord::from_csv("100,37.5,60.0,1,0"), Some(rec(100, 37.5, 60.0, true)));
        assert_eq!(DataRecord::from_csv("garbage"), None);
    }

    #[test]
    fn dedup_rules() {
        let mut log = DataLog::new(&SystemConfig::default());
        let mut m = Mem::default();
        assert!(log.record(&mut m, rec(0, 37.5, 60.0, false), 0).unwrap());
        assert!(!log.record(&mut m, rec(10, 37.6, 60.5, false), 1).unwrap());
        assert!(log.record(&mut m, rec(20, 37.8, 60.0, false), 2).unwrap());
        assert!(log.record(&mut m, rec(30, 37.8, 60.0, true), 3).unwrap());
        assert!(log.record(&mut m, rec(630, 37.8, 60.0, true), 4).unwrap());
        assert_eq!(log.len(), 5);
    }

    #[test]
    fn flush_writes_header_and_rows() {
        let mut log = DataLog::new(&SystemConfig::default());
        let mut m = Mem::default();
        log.record(&mut m, rec(1, 37.5, 60.0, false), 0).unwrap();
        log.record(&mut m, rec(2, 38.0, 60.0, false), 70_000).unwrap();
        let text = blob(&m);
        assert!(text.starts_with(CSV_HEADER));
        assert_eq!(text.lines().count(), 3);
    }

    #[test]
    fn blob_is_capped_keeping_header() {
        let rows: Vec<DataRecord> = (0..400).map(|i| rec(1_700_000_000 + i, 37.5, 60.0, false)).collect();
        let out = append_csv("", &rows);
        assert!(out.len() <= MAX_LOG_BYTES);
        assert!(out.starts_with(CSV_HEADER));
        assert!(out.trim_end().ends_with(&rows[399].to_csv()));
    }

    #[test]
    fn load_keeps_newest_in_order() {
        let mut m = Mem::default();
        let rows: Vec<DataRecord> = (0..150).rev().map(|i| rec(i, 37.0, 60.0, false)).collect();
        m.write(store::NAMESPACE, keys::TEMP_LOG, append_csv("", &rows).as_bytes()).unwrap();
        let mut log = DataLog::new(&SystemConfig::default());
        assert_eq!(log.load(&m).unwrap(), MAX_RECORDS);
        assert_eq!(log.records()[0].timestamp, 6);
        assert_eq!(log.latest().unwrap().timestamp, 149);
    }

    #[test]
    fn stats_and_range() {
        let mut log = DataLog::new(&SystemConfig::default());
        let mut m = Mem::default();
        log.record(&mut m, rec(10, 37.0, 50.0, true), 0).unwrap();
        log.record(&mut m, rec(20, 38.0, 70.0, false), 0).unwrap();
        let s = log.stats(None).unwrap();
        assert_eq!(s.count, 2);
        assert_eq!(s.min_temp, 37.0);
        assert_eq!(s.max_hum, 70.0);
        assert!((s.avg_temp - 37.5).abs() < 1e-4);
        assert_eq!(s.heater_on_pct, 50);
        assert_eq!(log.stats(Some((15, 25))).unwrap().count, 1);
        assert!(log.stats(Some((100, 200))).is_none());
    }

    #[test]
    fn graph_downsamples() {
        let mut log = DataLog::new(&SystemConfig::default());
        let mut m = Mem::default();
        for i in 0..100 {
            log.record(&mut m, rec(i, 37.0 + i as f32 / 100.0, 60.0, false), 0).unwrap();
        }
        let pts = log.graph(GraphSeries::Temperature, 10);
        assert_eq!(pts.len(), 10);
        assert_eq!(pts[1].time, 10);
        assert_eq!(log.graph(GraphSeries::Humidity, 500).len(), 100);
    }

    #[test]
    fn clear_removes_everything() {
        let mut log = DataLog::new(&SystemConfig::default());
        let mut m = Mem::default();
        log.record(&mut m, rec(1, 37.0, 60.0, false), 0).unwrap();
        log.flush(&mut m).unwrap();
        log.clear(&mut m).unwrap();
        assert!(log.is_empty());
        assert!(!m.exists(store::NAMESPACE, keys::TEMP_LOG));
    }

    #[test]
    fn backup_restore_sections() {
        let mut m = Mem::default();
        let settings = IncubationSettings { start_time: 1_000, ..Default::default() };
        store::save_json(&mut m, keys::SETTINGS, &settings).unwrap();
        store::save_power_on_time(&mut m, 5_000).unwrap();
        let mut log = DataLog::new(&SystemConfig::default());
        for i in 0..15 {
            log.record(&mut m, rec(i, 37.0, 60.0, false), 0).unwrap();
        }
        let bundle = BackupBundle::collect(&m, &log, &OutageLog::new()).unwrap();
        assert_eq!(bundle.temp_hum_records.len(), BACKUP_RECORDS);
        assert_eq!(bundle.power, Some(PowerInfo { last_on_time: 5_000 }));
        bundle.save(&mut m).unwrap();

        let mut fresh = Mem::default();
        let loaded = BackupBundle::load(&m).unwrap().unwrap();
        loaded.restore(&mut fresh).unwrap();
        let back: IncubationSettings = store::load_json(&fresh, keys::SETTINGS).unwrap().unwrap();
        assert_eq!(back.start_time, 1_000);
        assert_eq!(store::load_power_on_time(&fresh).unwrap(), 5_000);
        assert!(!fresh.exists(store::NAMESPACE, keys::TURNER));
    }
}
