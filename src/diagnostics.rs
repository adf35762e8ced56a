//! Crash logging, runtime metrics and the heap guard.
//!
//! Up to 4 crash entries are kept in a storage ring under the "crash"
//! namespace.  Each entry records uptime, the wall-clock time, the
//! incubation day in progress and the panic message.  A panic hook writes
//! the entry before the chip resets, so the next boot can report why it
//! restarted.
//!
//! Runtime metrics feed the `get_system_status` reply.

use log::{error, warn};
use serde::{Deserialize, Serialize};

use crate::app::ports::StoragePort;

const CRASH_RING_SLOTS: usize = 4;
const CRASH_NAMESPACE: &str = "crash";
const CRASH_INDEX_KEY: &str = "crash_idx";

/// Free heap below which optional networking is shed (bytes).
pub const HEAP_SHED_BYTES: u32 = 20 * 1024;
/// Free heap below which the controller restarts (bytes).
pub const HEAP_RESTART_BYTES: u32 = 8 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrashEntry {
    pub uptime_secs: u64,
    /// Unix seconds when known, 0 otherwise.
    pub unix_time: u32,
    /// Incubation day at the time of the crash, 0 when idle.
    pub incubation_day: u16,
    pub reason: heapless::String<64>,
}

impl CrashEntry {
    pub fn new(uptime_secs: u64, unix_time: u32, incubation_day: u16, reason: &str) -> Self {
        let mut r = heapless::String::new();
        for c in reason.chars() {
            if r.push(c).is_err() {
                break;
            }
        }
        Self {
            uptime_secs,
            unix_time,
            incubation_day,
            reason: r,
        }
    }
}

/// Storage-backed ring buffer for crash entries.
#[derive(Default)]
pub struct CrashLog {
    write_index: usize,
}

impl CrashLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the write index, or default to 0.
    pub fn init(&mut self, storage: &dyn StoragePort) {
        let mut buf = [0u8; 4];
        if let Ok(4) = storage.read(CRASH_NAMESPACE, CRASH_INDEX_KEY, &mut buf) {
            self.write_index = u32::from_le_bytes(buf) as usize % CRASH_RING_SLOTS;
        }
    }

    /// Write an entry to the next ring slot and advance the index.
    pub fn write_entry(&mut self, storage: &mut dyn StoragePort, entry: &CrashEntry) {
        let slot_key = Self::slot_key(self.write_index);
        match postcard::to_allocvec(entry) {
            Ok(bytes) => {
                if let Err(e) = storage.write(CRASH_NAMESPACE, &slot_key, &bytes) {
                    warn!("Diagnostics: crash entry not stored: {}", e);
                }
            }
            Err(_) => warn!("Diagnostics: crash entry not encodable"),
        }

        self.write_index = (self.write_index + 1) % CRASH_RING_SLOTS;
        let idx_bytes = (self.write_index as u32).to_le_bytes();
        let _ = storage.write(CRASH_NAMESPACE, CRASH_INDEX_KEY, &idx_bytes);
    }

    /// Every stored entry, in slot order.
    pub fn read_all(&self, storage: &dyn StoragePort) -> heapless::Vec<CrashEntry, CRASH_RING_SLOTS> {
        let mut entries = heapless::Vec::new();
        for i in 0..CRASH_RING_SLOTS {
            let mut buf = [0u8; 128];
            if let Ok(len) = storage.read(CRASH_NAMESPACE, &Self::slot_key(i), &mut buf) {
                if let Ok(entry) = postcard::from_bytes::<CrashEntry>(&buf[..len]) {
                    let _ = entries.push(entry);
                }
            }
        }
        entries
    }

    pub fn clear(&mut self, storage: &mut dyn StoragePort) {
        for i in 0..CRASH_RING_SLOTS {
            let _ = storage.delete(CRASH_NAMESPACE, &Self::slot_key(i));
        }
        let _ = storage.delete(CRASH_NAMESPACE, CRASH_INDEX_KEY);
        self.write_index = 0;
    }

    pub fn count(&self, storage: &dyn StoragePort) -> usize {
        (0..CRASH_RING_SLOTS)
            .filter(|i| storage.exists(CRASH_NAMESPACE, &Self::slot_key(*i)))
            .count()
    }

    fn slot_key(index: usize) -> heapless::String<16> {
        let mut s = heapless::String::new();
        let _ = core::fmt::Write::write_fmt(&mut s, format_args!("e{}", index));
        s
    }
}

// ───────────────────────────────────────────────────────────────
// Heap guard
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryAction {
    Normal,
    /// Drop the remote link and other optional consumers.
    ShedNetwork,
    /// Not enough heap left to run safely.
    Restart,
}

pub fn memory_guard(heap_free: u32) -> MemoryAction {
    if heap_free < HEAP_RESTART_BYTES {
        MemoryAction::Restart
    } else if heap_free < HEAP_SHED_BYTES {
        MemoryAction::ShedNetwork
    } else {
        MemoryAction::Normal
    }
}

// ───────────────────────────────────────────────────────────────
// Runtime metrics
// ───────────────────────────────────────────────────────────────

/// Runtime snapshot collected on demand.
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeMetrics {
    pub uptime_secs: u64,
    pub control_cycles: u64,
    pub fault_count: u32,
    pub crash_count: u32,
    pub heap_free: u32,
    pub heap_min_free: u32,
    pub outage_count: u32,
    pub memory: MemoryAction,
}

impl RuntimeMetrics {
    #[cfg(target_os = "espidf")]
    pub fn collect(
        uptime_secs: u64,
        control_cycles: u64,
        fault_count: u32,
        crash_count: u32,
        outage_count: u32,
    ) -> Self {
        use esp_idf_svc::sys::*;
        // SAFETY: read-only heap statistics.
        let heap_free = unsafe { esp_get_free_heap_size() };
        let heap_min_free = unsafe { esp_get_minimum_free_heap_size() };

        Self {
            uptime_secs,
            control_cycles,
            fault_count,
            crash_count,
            heap_free,
            heap_min_free,
            outage_count,
            memory: memory_guard(heap_free),
        }
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn collect(
        uptime_secs: u64,
        control_cycles: u64,
        fault_count: u32,
        crash_count: u32,
        outage_count: u32,
    ) -> Self {
        // Heap "decays" slightly over time to model fragmentation.
        let base_free: u32 = 180_000;
        let decay = (uptime_secs / 60) as u32 * 64;
        let heap_free = base_free.saturating_sub(decay);
        let heap_min_free = (heap_free as f32 * 0.85) as u32;

        Self {
            uptime_secs,
            control_cycles,
            fault_count,
            crash_count,
            heap_free,
            heap_min_free,
            outage_count,
            memory: memory_guard(heap_free),
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Panic hook
// ───────────────────────────────────────────────────────────────

/// Install a panic hook that persists a [`CrashEntry`].
///
/// Must be called once during init, after storage is ready.
pub fn install_panic_handler() {
    std::panic::set_hook(Box::new(|info| {
        let reason = if let Some(msg) = info.payload().downcast_ref::<&str>() {
            *msg
        } else if let Some(msg) = info.payload().downcast_ref::<String>() {
            msg.as_str()
        } else {
            "unknown panic"
        };

        error!("PANIC: {}", reason);

        #[cfg(target_os = "espidf")]
        {
            // SAFETY: esp_timer_get_time reads a hardware counter.
            let uptime = (unsafe { esp_idf_svc::sys::esp_timer_get_time() }) as u64 / 1_000_000;
            let entry = CrashEntry::new(uptime, 0, 0, reason);

            // No nvs_flash_init here; the session opened in main is reused.
            match crate::adapters::nvs::NvsAdapter::new() {
                Ok(mut nvs) => {
                    let mut crash_log = CrashLog::new();
                    crash_log.init(&nvs);
                    crash_log.write_entry(&mut nvs, &entry);
                }
                Err(_) => error!("Panic handler: NVS unavailable, crash entry not persisted"),
            }
        }

        #[cfg(not(target_os = "espidf"))]
        {
            error!("Crash entry (simulation): {}", reason);
        }
    }));
}
