#![no_main]
use arbitrary::Arbitrary;
use blockfile_allocator::{AllocationStrategy, BlockAllocator, BlockPair, Tracer};
use libfuzzer_sys::fuzz_target;

#[derive(Arbitrary, Debug)]
struct Input {
    reserve: u64,
    alignment_units: u8,
    pairs: Vec<(u64, u64)>,
    strategy: u8,
    allocs: Vec<(u32, u8)>,
}

// Any persisted block list either loads into a valid allocator or is
// rejected; a loaded allocator keeps its invariants while allocating.
fuzz_target!(|input: Input| {
    let alignment = u64::from(input.alignment_units.max(1)) * 512;
    let pairs: Vec<BlockPair> = input.pairs.iter().map(|&p| p.into()).collect();

    let mut alloc = match BlockAllocator::create_from_existing_traced(
        input.reserve,
        alignment,
        &pairs,
        Tracer::disabled(),
    ) {
        Ok(alloc) => alloc,
        Err(_) => return,
    };
    assert!(alloc.validate().is_ok());

    let strategies = AllocationStrategy::ALL;
    alloc.set_strategy(strategies[input.strategy as usize % strategies.len()]);

    for (size, heat) in input.allocs {
        if let Ok(offset) = alloc.alloc_block(u64::from(size), u64::from(heat)) {
            assert_eq!(offset % alignment, 0);
        }
    }
    assert!(alloc.validate().is_ok());
});
