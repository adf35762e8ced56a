//! Power-loss recovery.
//!
//! The watchdog's forced restart is the system's only deadlock recovery,
//! so a reboot must never lose an incubation in progress.  Two mechanisms
//! make that safe:
//!
//! 1. **Outage detection.**  The last persisted power-on / heartbeat time
//!    is compared with the RTC at boot.  A gap longer than the threshold
//!    is recorded in a bounded binary ring.
//! 2. **Snapshot restore.**  A periodic [`RecoverySnapshot`] is compared
//!    with the persisted settings at boot; material divergence is repaired
//!    from the snapshot.  Restoring is idempotent.
//!
//! All of it is best-effort: storage failures are logged and the system
//! continues with its in-memory state.

use heapless::Vec as BoundedVec;
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::app::ports::StoragePort;
use crate::clock;
use crate::config::{self, IncubationSettings};
use crate::error::{CodecError, Result};
use crate::profile::ProfileType;
use crate::store::{self, keys};

pub const MAX_OUTAGES: usize = 10;
const OUTAGE_MAGIC: &[u8; 8] = b"POWEROUT";
const OUTAGE_RECORD_LEN: usize = 12;
const OUTAGE_HEADER_LEN: usize = 12;

pub const RESTORE_TEMP_TOLERANCE: f32 = 0.1;
pub const RESTORE_HUM_TOLERANCE: f32 = 1.0;

// ───────────────────────────────────────────────────────────────
// Outage log
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerOutage {
    pub start_time: u32,
    pub end_time: u32,
    pub duration: u32,
}

/// Classify the gap between the last persisted time and now.  Gaps up to
/// and including `threshold_secs` are ordinary reboots.
pub fn classify_gap(last: u32, now: u32, threshold_secs: u32) -> Option<PowerOutage> {
    if last == 0 || now <= last {
        return None;
    }
    let gap = now - last;
    (gap > threshold_secs).then_some(PowerOutage {
        start_time: last,
        end_time: now,
        duration: gap,
    })
}

/// Bounded outage history, oldest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutageLog {
    records: BoundedVec<PowerOutage, MAX_OUTAGES>,
}

impl OutageLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append, evicting the oldest record when full.
    pub fn push(&mut self, outage: PowerOutage) {
        if self.records.is_full() {
            self.records.remove(0);
        }
        // Cannot fail: a slot was just freed.
        let _ = self.records.push(outage);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PowerOutage> {
        self.records.iter()
    }

    pub fn last(&self) -> Option<&PowerOutage> {
        self.records.last()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// `POWEROUT` magic, max count (LE u32), then `{start, end, duration}`
    /// records of LE u32.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(OUTAGE_HEADER_LEN + self.len() * OUTAGE_RECORD_LEN);
        out.extend_from_slice(OUTAGE_MAGIC);
        out.extend_from_slice(&(MAX_OUTAGES as u32).to_le_bytes());
        for r in &self.records {
            out.extend_from_slice(&r.start_time.to_le_bytes());
            out.extend_from_slice(&r.end_time.to_le_bytes());
            out.extend_from_slice(&r.duration.to_le_bytes());
        }
        out
    }

    /// Decode a stored log.  A trailing partial record is ignored; more
    /// than [`MAX_OUTAGES`] records keep the newest.
    pub fn decode(bytes: &[u8]) -> core::result::Result<Self, CodecError> {
        if bytes.len() < OUTAGE_HEADER_LEN || &bytes[..8] != OUTAGE_MAGIC {
            return Err(CodecError::Binary);
        }
        let mut log = Self::new();
        for rec in bytes[OUTAGE_HEADER_LEN..].chunks_exact(OUTAGE_RECORD_LEN) {
            let word = |i: usize| u32::from_le_bytes([rec[i], rec[i + 1], rec[i + 2], rec[i + 3]]);
            log.push(PowerOutage {
                start_time: word(0),
                end_time: word(4),
                duration: word(8),
            });
        }
        Ok(log)
    }

    pub fn load(storage: &dyn StoragePort) -> Self {
        match store::load_bytes(storage, keys::OUTAGES) {
            Ok(Some(bytes)) => Self::decode(&bytes).unwrap_or_else(|e| {
                warn!("Recovery: outage log unreadable ({}), starting empty", e);
                Self::new()
            }),
            Ok(None) => Self::new(),
            Err(e) => {
                warn!("Recovery: outage log read failed: {}", e);
                Self::new()
            }
        }
    }

    pub fn save(&self, storage: &mut dyn StoragePort) -> Result<()> {
        store::save_bytes(storage, keys::OUTAGES, &self.encode())
    }
}

// ───────────────────────────────────────────────────────────────
// Snapshot
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoverySnapshot {
    pub incubation_active: bool,
    pub profile_type: ProfileType,
    pub start_time: u32,
    pub total_days: u16,
    pub current_day: u32,
    pub target_temp: f32,
    pub target_humidity: f32,
    pub motor_enabled: bool,
    pub save_time: u32,
}

impl Default for RecoverySnapshot {
    fn default() -> Self {
        Self {
            incubation_active: false,
            profile_type: ProfileType::None,
            start_time: 0,
            total_days: config::DEFAULT_TOTAL_DAYS,
            current_day: 0,
            target_temp: config::DEFAULT_TEMP,
            target_humidity: config::DEFAULT_HUMIDITY,
            motor_enabled: true,
            save_time: 0,
        }
    }
}

impl RecoverySnapshot {
    pub fn capture(settings: &IncubationSettings, now: u32) -> Self {
        Self {
            incubation_active: settings.is_active(),
            profile_type: settings.profile_type,
            start_time: settings.start_time,
            total_days: settings.total_days,
            current_day: clock::incubation_day(settings.start_time, now),
            target_temp: settings.target_temp,
            target_humidity: settings.target_humidity,
            motor_enabled: settings.motor_enabled,
            save_time: now,
        }
    }

    /// True when the snapshot describes an active run that the settings
    /// have lost or diverged from.
    pub fn needs_restore(&self, settings: &IncubationSettings) -> bool {
        if !self.incubation_active || self.profile_type == ProfileType::None {
            return false;
        }
        settings.start_time == 0
            || settings.profile_type != self.profile_type
            || (settings.target_temp - self.target_temp).abs() > RESTORE_TEMP_TOLERANCE
            || (settings.target_humidity - self.target_humidity).abs() > RESTORE_HUM_TOLERANCE
    }

    /// Copy the run identity from the snapshot into `settings`.  PID gains
    /// and hysteresis are left alone.
    pub fn apply_to(&self, settings: &mut IncubationSettings) {
        settings.profile_type = self.profile_type;
        settings.target_temp = self.target_temp;
        settings.target_humidity = self.target_humidity;
        settings.total_days = self.total_days;
        settings.start_time = self.start_time;
        settings.motor_enabled = self.motor_enabled;
    }
}

/// Restore `settings` from `snapshot` if needed.  Returns `true` when the
/// settings were changed and must be persisted and re-synced.
pub fn restore(snapshot: Option<&RecoverySnapshot>, settings: &mut IncubationSettings) -> bool {
    let Some(snap) = snapshot else {
        return false;
    };
    if !snap.needs_restore(settings) {
        return false;
    }
    snap.apply_to(settings);
    info!(
        "Recovery: restored {} run started {} (day {}/{})",
        settings.profile_type, settings.start_time, snap.current_day, settings.total_days
    );
    true
}

pub fn load_snapshot(storage: &dyn StoragePort) -> Option<RecoverySnapshot> {
    match store::load_json::<RecoverySnapshot>(storage, keys::RECOVERY) {
        Ok(s) => s,
        Err(e) => {
            warn!("Recovery: snapshot unreadable: {}", e);
            None
        }
    }
}

pub fn save_snapshot(storage: &mut dyn StoragePort, snapshot: &RecoverySnapshot) -> Result<()> {
    store::save_json(storage, keys::RECOVERY, snapshot)
}

// ───────────────────────────────────────────────────────────────
// Boot-time detector
// ───────────────────────────────────────────────────────────────

/// Outage state for this boot.
#[derive(Debug, Default)]
pub struct PowerRecovery {
    log: OutageLog,
    boot_outage: Option<PowerOutage>,
}

impl PowerRecovery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run the boot-time outage check.  The current time is persisted as
    /// the new power-on time whatever the outcome.
    pub fn check_outage(
        &mut self,
        storage: &mut dyn StoragePort,
        now: u32,
        threshold_secs: u32,
    ) -> Option<PowerOutage> {
        self.log = OutageLog::load(storage);

        let last = store::load_power_on_time(storage).unwrap_or_else(|e| {
            warn!("Recovery: power-on time unreadable: {}", e);
            0
        });
        if let Err(e) = store::save_power_on_time(storage, now) {
            warn!("Recovery: could not persist power-on time: {}", e);
        }

        if last == 0 {
            info!("Recovery: first boot, power-on time recorded");
            return None;
        }

        let outage = classify_gap(last, now, threshold_secs);
        match outage {
            Some(o) => {
                warn!("Recovery: power outage of {} s ({}..{})", o.duration, o.start_time, o.end_time);
                self.log.push(o);
                if let Err(e) = self.log.save(storage) {
                    warn!("Recovery: could not persist outage log: {}", e);
                }
            }
            None => info!("Recovery: short reset or reboot, no outage"),
        }
        self.boot_outage = outage;
        outage
    }

    /// Refresh the persisted power-on time so the next boot measures the
    /// gap from the last heartbeat rather than the last boot.
    pub fn heartbeat(&self, storage: &mut dyn StoragePort, now: u32) -> Result<()> {
        store::save_power_on_time(storage, now)
    }

    pub fn was_power_outage(&self) -> bool {
        self.boot_outage.is_some()
    }

    pub fn outage_duration(&self) -> u32 {
        self.boot_outage.map_or(0, |o| o.duration)
    }

    pub fn outages(&self) -> &OutageLog {
        &self.log
    }

    pub fn replace_log(&mut self, log: OutageLog, storage: &mut dyn StoragePort) -> Result<()> {
        self.log = log;
        self.log.save(storage)
    }

    pub fn clear_log(&mut self, storage: &mut dyn StoragePort) -> Result<()> {
        self.log.clear();
        store::delete(storage, keys::OUTAGES).map_err(|e| {
            warn!("Recovery: could not delete outage log: {}", e);
            e
        })
    }
}
