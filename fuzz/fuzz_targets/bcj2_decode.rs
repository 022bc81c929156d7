//! Fuzz target for the BCJ2 stream merger.
//!
//! The input is split into the four BCJ2 streams plus an output length; the
//! decoder must either fill the output exactly or return an error.
//!
//! Run with: cargo +nightly fuzz run bcj2_decode

#![no_main]

use libfuzzer_sys::fuzz_target;
use sevenz_decode::codec::bcj2;

fuzz_target!(|data: &[u8]| {
    if data.len() < 5 {
        return;
    }
    let out_len = usize::from(u16::from_le_bytes([data[0], data[1]]));
    let cuts = [data[2], data[3], data[4]].map(usize::from);
    let rest = &data[5..];

    let (main, rest) = rest.split_at(cuts[0].min(rest.len()));
    let (call, rest) = rest.split_at(cuts[1].min(rest.len()));
    let (jump, range) = rest.split_at(cuts[2].min(rest.len()));

    let mut output = vec![0u8; out_len];
    let _ = bcj2::decode(main, call, jump, range, &mut output);
});
