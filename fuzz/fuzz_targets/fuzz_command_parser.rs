//! Fuzz target: console command parser
//!
//! Feeds arbitrary lines into `commands::parse` and checks that it never
//! panics and that every rejection carries the `error` status.
//!
//! cargo fuzz run fuzz_command_parser

#![no_main]

use incubator::app::commands::parse;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(line) = core::str::from_utf8(data) else {
        return;
    };
    if let Err(reply) = parse(line) {
        assert_eq!(reply.status, "error");
        assert!(!reply.message.is_empty());
    }
});
