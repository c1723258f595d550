//! Fuzz target for the delimited frame accumulator.
//!
//! Run with: cargo +nightly fuzz run fuzz_frame_reader
//!
//! The first input byte picks a chunk size so split reads are covered too.
//! A frame that is accepted always carries a key exactly as long as its
//! message.

#![no_main]

use libfuzzer_sys::fuzz_target;
use otpdec_core::framing::DelimitedAccumulator;

const CAPACITY: usize = 4096;

fuzz_target!(|data: &[u8]| {
    let Some((&split, stream)) = data.split_first() else {
        return;
    };
    let chunk = usize::from(split).max(1);

    let mut acc = DelimitedAccumulator::new(CAPACITY);
    for piece in stream.chunks(chunk) {
        match acc.push(piece) {
            Ok(false) => {}
            Ok(true) => break,
            Err(_) => return,
        }
    }

    if let Ok(frame) = acc.finish() {
        assert_eq!(frame.message.len(), frame.key.len());
        assert!(!frame.message.contains(&b'\n'));
    }
});
