//! Typed document persistence over [`StoragePort`].
//!
//! Every persisted document lives under the `incubator` namespace as an
//! independent value: JSON for operator documents, a fixed binary layout
//! for the outage log, plain decimal text for the power-on time and CSV
//! for the time-series log.  Read failures never propagate into the
//! control core as panics; callers get a typed error or a default.

use log::{info, warn};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::app::ports::{StorageError, StoragePort};
use crate::config::IncubationSettings;
use crate::error::{CodecError, Error, Result};

pub const NAMESPACE: &str = "incubator";

/// Storage keys (NVS limits keys to 15 bytes).
pub mod keys {
    pub const SETTINGS: &str = "settings";
    pub const TURNER: &str = "turner";
    pub const CALIBRATION: &str = "calib";
    pub const ALARM_THRESHOLDS: &str = "alarm_thr";
    pub const PROFILES: &str = "profiles";
    pub const OUTAGES: &str = "outages";
    pub const POWER_ON: &str = "power_on";
    pub const RECOVERY: &str = "recovery";
    pub const TEMP_LOG: &str = "templog";
    pub const BACKUP: &str = "backup";
}

/// Largest value read back from storage.
pub const MAX_VALUE_LEN: usize = 8192;

/// Settings are re-read from storage at most this often.
pub const SETTINGS_CACHE_TTL_MS: u64 = 5_000;

// ───────────────────────────────────────────────────────────────
// Raw values
// ───────────────────────────────────────────────────────────────

/// Read a whole value.  `Ok(None)` when the key does not exist.
pub fn load_bytes(storage: &dyn StoragePort, key: &str) -> Result<Option<Vec<u8>>> {
    let mut buf = vec![0u8; MAX_VALUE_LEN];
    match storage.read(NAMESPACE, key, &mut buf) {
        Ok(n) => {
            buf.truncate(n);
            Ok(Some(buf))
        }
        Err(StorageError::NotFound) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn save_bytes(storage: &mut dyn StoragePort, key: &str, data: &[u8]) -> Result<()> {
    storage.write(NAMESPACE, key, data)?;
    Ok(())
}

pub fn delete(storage: &mut dyn StoragePort, key: &str) -> Result<()> {
    storage.delete(NAMESPACE, key)?;
    Ok(())
}

// ───────────────────────────────────────────────────────────────
// JSON documents
// ───────────────────────────────────────────────────────────────

/// Load a JSON document.  `Ok(None)` when absent, `Err` when unreadable
/// or malformed.
pub fn load_json<T: DeserializeOwned>(storage: &dyn StoragePort, key: &str) -> Result<Option<T>> {
    let Some(bytes) = load_bytes(storage, key)? else {
        return Ok(None);
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|_| Error::Codec(CodecError::Json))
}

pub fn save_json<T: Serialize>(storage: &mut dyn StoragePort, key: &str, doc: &T) -> Result<()> {
    let bytes = serde_json::to_vec(doc).map_err(|_| Error::Codec(CodecError::Json))?;
    save_bytes(storage, key, &bytes)
}

/// Load a document, falling back to its default.  A missing document is
/// created from the default; a corrupt one is logged and left in place.
pub fn load_or_default<T>(storage: &mut dyn StoragePort, key: &str) -> T
where
    T: DeserializeOwned + Serialize + Default,
{
    match load_json::<T>(storage, key) {
        Ok(Some(doc)) => doc,
        Ok(None) => {
            let doc = T::default();
            if let Err(e) = save_json(storage, key, &doc) {
                warn!("Store: could not write default {}: {}", key, e);
            } else {
                info!("Store: created default {}", key);
            }
            doc
        }
        Err(e) => {
            warn!("Store: {} unreadable ({}), using defaults", key, e);
            T::default()
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Power-on time (decimal text)
// ───────────────────────────────────────────────────────────────

/// Last persisted power-on / heartbeat time; 0 when never written.
pub fn load_power_on_time(storage: &dyn StoragePort) -> Result<u32> {
    let Some(bytes) = load_bytes(storage, keys::POWER_ON)? else {
        return Ok(0);
    };
    core::str::from_utf8(&bytes)
        .ok()
        .and_then(|s| s.trim().parse::<u32>().ok())
        .ok_or(Error::Codec(CodecError::Text))
}

pub fn save_power_on_time(storage: &mut dyn StoragePort, unix: u32) -> Result<()> {
    save_bytes(storage, keys::POWER_ON, format!("{unix}\n").as_bytes())
}

// ───────────────────────────────────────────────────────────────
// Settings with TTL cache
// ───────────────────────────────────────────────────────────────

/// Cached access to [`IncubationSettings`].
#[derive(Debug, Default)]
pub struct SettingsStore {
    cached: Option<(IncubationSettings, u64)>,
}

impl SettingsStore {
    pub fn new() -> Self {
        Self { cached: None }
    }

    /// Current settings; storage is consulted only when the cache is
    /// older than [`SETTINGS_CACHE_TTL_MS`].
    pub fn load(&mut self, storage: &mut dyn StoragePort, now_ms: u64) -> IncubationSettings {
        if let Some((s, at)) = self.cached {
            if now_ms.saturating_sub(at) < SETTINGS_CACHE_TTL_MS {
                return s;
            }
        }
        let mut s: IncubationSettings = load_or_default(storage, keys::SETTINGS);
        s.clamp_to_limits();
        self.cached = Some((s, now_ms));
        s
    }

    /// Persist and refresh the cache.  On write failure the cache is
    /// dropped so the next load re-reads storage.
    pub fn save(
        &mut self,
        storage: &mut dyn StoragePort,
        settings: &IncubationSettings,
        now_ms: u64,
    ) -> Result<()> {
        match save_json(storage, keys::SETTINGS, settings) {
            Ok(()) => {
                self.cached = Some((*settings, now_ms));
                Ok(())
            }
            Err(e) => {
                self.cached = None;
                warn!("Store: settings save failed: {}", e);
                Err(e)
            }
        }
    }

    pub fn invalidate(&mut self) {
        self.cached = None;
    }
}
