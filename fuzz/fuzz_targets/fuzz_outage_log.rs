//! Fuzz target: `OutageLog::decode`
//!
//! The outage log is read back from flash after arbitrary power cuts, so
//! decoding must survive any byte string.  Checks:
//! - No panics
//! - At most `MAX_OUTAGES` records survive a decode
//! - A decoded log re-encodes to something that decodes to the same log
//!
//! cargo fuzz run fuzz_outage_log

#![no_main]

use incubator::recovery::{MAX_OUTAGES, OutageLog};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(log) = OutageLog::decode(data) else {
        return;
    };
    assert!(log.len() <= MAX_OUTAGES, "decoded {} outages", log.len());

    let again = OutageLog::decode(&log.encode()).expect("own encoding decodes");
    assert_eq!(again, log);
});
