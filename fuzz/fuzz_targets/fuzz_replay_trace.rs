#![no_main]
use blockfile_allocator::replay::{parse_trace, replay};
use blockfile_allocator::{AllocationStrategy, StrategyTuning};
use libfuzzer_sys::fuzz_target;

// Malformed traces must produce errors, never panics.
fuzz_target!(|data: &[u8]| {
    let Ok(events) = parse_trace(data) else {
        return;
    };
    for strategy in AllocationStrategy::ALL {
        let _ = replay(&events, strategy, StrategyTuning::default());
    }
});
