//! Fuzz target: crash-log ring
//!
//! Each input byte is one operation on the ring: write an entry, clear
//! the ring, or re-open it from storage as a fresh boot would.  Checks:
//! - No panics, whatever the reason text or field values
//! - `read_all` and `count` never exceed the 4 ring slots
//! - A clear leaves nothing to read
//!
//! cargo fuzz run fuzz_crash_log

#![no_main]

use std::collections::HashMap;

use incubator::app::ports::{StorageError, StoragePort};
use incubator::diagnostics::{CrashEntry, CrashLog};
use libfuzzer_sys::fuzz_target;

const SLOTS: usize = 4;

#[derive(Default)]
struct Flash(HashMap<(String, String), Vec<u8>>);

impl StoragePort for Flash {
    fn read(&self, ns: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        let v = self.0.get(&(ns.into(), key.into())).ok_or(StorageError::NotFound)?;
        if v.len() > buf.len() {
            return Err(StorageError::BufferTooSmall);
        }
        buf[..v.len()].copy_from_slice(v);
        Ok(v.len())
    }

    fn write(&mut self, ns: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        self.0.insert((ns.into(), key.into()), data.to_vec());
        Ok(())
    }

    fn delete(&mut self, ns: &str, key: &str) -> Result<(), StorageError> {
        self.0.remove(&(ns.into(), key.into()));
        Ok(())
    }

    fn exists(&self, ns: &str, key: &str) -> bool {
        self.0.contains_key(&(ns.into(), key.into()))
    }
}

fuzz_target!(|data: &[u8]| {
    let mut flash = Flash::default();
    let mut log = CrashLog::new();
    log.init(&flash);

    for (i, &op) in data.iter().enumerate() {
        match op % 8 {
            0 => {
                log.clear(&mut flash);
                assert!(log.read_all(&flash).is_empty(), "entries survived a clear");
            }
            1 => {
                log = CrashLog::new();
                log.init(&flash);
            }
            _ => {
                let tail = &data[i..data.len().min(i + 80)];
                let reason = String::from_utf8_lossy(tail);
                let entry = CrashEntry::new(i as u64, u32::from(op) << 20, u16::from(op >> 3), &reason);
                log.write_entry(&mut flash, &entry);
            }
        }
        assert!(log.read_all(&flash).len() <= SLOTS);
        assert!(log.count(&flash) <= SLOTS);
    }
});
