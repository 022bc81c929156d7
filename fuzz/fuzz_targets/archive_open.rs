//! Fuzz target for opening and extracting arbitrary bytes.
//!
//! Both allocators are capped so that hostile size fields end in
//! `OutOfMemory` instead of exhausting the fuzzer's memory.
//!
//! Run with: cargo +nightly fuzz run archive_open

#![no_main]

use std::sync::Arc;

use libfuzzer_sys::fuzz_target;
use sevenz_decode::{
    Allocators, Archive, BudgetAllocator, DecodeCache, MemorySource, OpenOptions, ResourceLimits,
};

fuzz_target!(|data: &[u8]| {
    let main = Arc::new(BudgetAllocator::new(64 << 20));
    let temp = Arc::new(BudgetAllocator::new(64 << 20));
    let options = OpenOptions::new().limits(
        ResourceLimits::new()
            .max_entries(100_000)
            .max_folder_unpack(64 << 20),
    );

    let Ok(mut archive) = Archive::open_with_options(
        MemorySource::new(data.to_vec()),
        Allocators::new(main.clone(), temp.clone()),
        options,
    ) else {
        assert_eq!(temp.in_use(), 0);
        return;
    };

    for entry in archive.list_files() {
        let _ = entry.name.len();
        let _ = entry.last_write_time.map(|t| t.as_unix_secs());
    }

    let mut cache = DecodeCache::new();
    for index in 0..archive.len() {
        if let Ok(bytes) = archive.extract(index, &mut cache) {
            let expected = archive.file(index).map(|f| f.size);
            assert_eq!(Some(bytes.len() as u64), expected);
        }
        assert_eq!(temp.in_use(), 0);
    }
    drop(cache);
    assert_eq!(main.in_use(), 0);
});
