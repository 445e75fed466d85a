//! Block allocator for a single backing file
//!
//! The allocator keeps the live blocks of the file in a vector sorted by
//! offset. Allocation first tries the space right after the reserved
//! header, then asks the configured [`AllocationStrategy`] for an interior
//! gap, and finally appends after the last block. Every block offset is a
//! multiple of the alignment; sizes are exact.
//!
//! The allocator is not internally synchronized. Mutations take
//! `&mut self` and queries take `&self`; callers sharing an allocator
//! between threads wrap it in a lock.

pub mod block;
pub mod stats;
pub mod strategy;

pub use block::{align_up, BlockPair, MIN_ALIGNMENT};
pub use stats::FragmentationReport;
pub use strategy::{AllocationStrategy, StrategyTuning};

use crate::config::AllocatorConfig;
use crate::error::{AllocatorError, CorruptionKind, Result};
use crate::trace::{self, TraceEvent, Tracer};
use block::{checked_align_up, is_valid_alignment};
use tracing::{debug, trace};

/// Offset-addressed block allocator
#[derive(Debug)]
pub struct BlockAllocator {
    /// Header bytes at the start of the file; never handed out
    reserve_at_beginning: u64,

    /// Every block offset is a multiple of this
    alignment: u64,

    /// Live blocks, sorted by offset, non-overlapping
    blocks: Vec<BlockPair>,

    /// Reserve plus the sizes of all live blocks
    bytes_in_use: u64,

    strategy: AllocationStrategy,
    tuning: StrategyTuning,

    tracer: Tracer,
    instance: u64,
}

/// Check reserve/alignment and return the aligned end of the reserve
fn reserve_end(reserve_at_beginning: u64, alignment: u64) -> Result<u64> {
    if !is_valid_alignment(alignment) {
        return Err(AllocatorError::InvalidAlignment(alignment));
    }
    checked_align_up(reserve_at_beginning, alignment).ok_or(AllocatorError::AddressSpaceExhausted)
}

/// Check a sorted block list and return reserve + the sum of block sizes
fn check_layout(blocks: &[BlockPair], reserve_at_beginning: u64, alignment: u64) -> Result<u64> {
    let reserve_end = reserve_end(reserve_at_beginning, alignment)?;
    let mut total = reserve_at_beginning;
    let mut previous: Option<&BlockPair> = None;

    for bp in blocks {
        let overflow = CorruptionKind::Overflow {
            offset: bp.offset,
            size: bp.size,
        };

        if bp.size == 0 {
            return Err(CorruptionKind::ZeroSize { offset: bp.offset }.into());
        }
        if bp.checked_end().is_none() {
            return Err(overflow.into());
        }
        if bp.offset < reserve_end {
            return Err(CorruptionKind::BelowReserve {
                offset: bp.offset,
                reserve_end,
            }
            .into());
        }
        if bp.offset % alignment != 0 {
            return Err(CorruptionKind::Misaligned {
                offset: bp.offset,
                alignment,
            }
            .into());
        }
        if let Some(prev) = previous {
            if bp.offset <= prev.offset {
                return Err(CorruptionKind::Unsorted {
                    previous: prev.offset,
                    offset: bp.offset,
                }
                .into());
            }
            if prev.end() > bp.offset {
                return Err(CorruptionKind::Overlap {
                    previous: prev.offset,
                    previous_size: prev.size,
                    offset: bp.offset,
                }
                .into());
            }
        }

        total = total.checked_add(bp.size).ok_or(overflow)?;
        previous = Some(bp);
    }

    Ok(total)
}

impl BlockAllocator {
    /// Create an empty allocator traced through the process-wide tracer
    ///
    /// `alignment` must be a non-zero multiple of 512.
    pub fn create(reserve_at_beginning: u64, alignment: u64) -> Result<Self> {
        Self::create_traced(reserve_at_beginning, alignment, trace::global_tracer())
    }

    /// Create an empty allocator with an explicit tracer
    pub fn create_traced(reserve_at_beginning: u64, alignment: u64, tracer: Tracer) -> Result<Self> {
        reserve_end(reserve_at_beginning, alignment)?;

        let alloc = BlockAllocator {
            reserve_at_beginning,
            alignment,
            blocks: Vec::new(),
            bytes_in_use: reserve_at_beginning,
            strategy: AllocationStrategy::default(),
            tuning: StrategyTuning::default(),
            tracer,
            instance: trace::next_instance_id(),
        };

        debug!(
            "Created block allocator {:#x}: reserve {}, alignment {}",
            alloc.instance, reserve_at_beginning, alignment
        );
        alloc.tracer.record(|| TraceEvent::Create {
            instance: alloc.instance,
            reserve: reserve_at_beginning,
            alignment,
        });

        Ok(alloc)
    }

    /// Rebuild an allocator from a persisted, unsorted block list
    ///
    /// The list usually comes straight off disk, so every pair is checked:
    /// non-zero size, aligned offset at or past the aligned reserve, and no
    /// overlap with its neighbour once sorted. Any violation is returned as
    /// [`AllocatorError::Corrupt`].
    pub fn create_from_existing(
        reserve_at_beginning: u64,
        alignment: u64,
        pairs: &[BlockPair],
    ) -> Result<Self> {
        Self::create_from_existing_traced(
            reserve_at_beginning,
            alignment,
            pairs,
            trace::global_tracer(),
        )
    }

    /// [`create_from_existing`](Self::create_from_existing) with an explicit tracer
    pub fn create_from_existing_traced(
        reserve_at_beginning: u64,
        alignment: u64,
        pairs: &[BlockPair],
        tracer: Tracer,
    ) -> Result<Self> {
        reserve_end(reserve_at_beginning, alignment)?;

        let mut blocks = Vec::new();
        blocks
            .try_reserve_exact(pairs.len())
            .map_err(|_| AllocatorError::OutOfMemory(pairs.len()))?;
        blocks.extend_from_slice(pairs);
        blocks.sort_unstable();

        let bytes_in_use = check_layout(&blocks, reserve_at_beginning, alignment)?;

        let alloc = BlockAllocator {
            reserve_at_beginning,
            alignment,
            blocks,
            bytes_in_use,
            strategy: AllocationStrategy::default(),
            tuning: StrategyTuning::default(),
            tracer,
            instance: trace::next_instance_id(),
        };

        debug!(
            "Loaded block allocator {:#x}: {} blocks, {} bytes in use",
            alloc.instance,
            alloc.blocks.len(),
            alloc.bytes_in_use
        );
        alloc.tracer.record(|| TraceEvent::CreateFromBlockPairs {
            instance: alloc.instance,
            reserve: reserve_at_beginning,
            alignment,
            pairs: alloc.blocks.clone(),
        });

        Ok(alloc)
    }

    /// Create an empty allocator from configuration
    pub fn with_config(config: &AllocatorConfig, tracer: Tracer) -> Result<Self> {
        config.validate()?;
        let mut alloc =
            Self::create_traced(config.reserve_at_beginning, config.alignment, tracer)?;
        alloc.strategy = config.strategy;
        alloc.tuning = config.tuning;
        Ok(alloc)
    }

    /// Rebuild an allocator from a persisted block list using configuration
    pub fn from_existing_with_config(
        config: &AllocatorConfig,
        pairs: &[BlockPair],
        tracer: Tracer,
    ) -> Result<Self> {
        config.validate()?;
        let mut alloc = Self::create_from_existing_traced(
            config.reserve_at_beginning,
            config.alignment,
            pairs,
            tracer,
        )?;
        alloc.strategy = config.strategy;
        alloc.tuning = config.tuning;
        Ok(alloc)
    }

    /// Change the placement policy for future allocations
    pub fn set_strategy(&mut self, strategy: AllocationStrategy) {
        self.strategy = strategy;
    }

    /// Change the padded-fit and heat-zone knobs for future allocations
    pub fn set_tuning(&mut self, tuning: StrategyTuning) {
        self.tuning = tuning;
    }

    /// Allocate a block of exactly `size` bytes and return its offset
    ///
    /// `heat` hints how soon the block will be freed (higher = sooner); only
    /// the heat-zone strategy looks at it. Zero-sized blocks are rejected
    /// because they could share an offset with another block.
    pub fn alloc_block(&mut self, size: u64, heat: u64) -> Result<u64> {
        if size == 0 {
            return Err(AllocatorError::ZeroSizeBlock);
        }

        let bytes_in_use = self
            .bytes_in_use
            .checked_add(size)
            .ok_or(AllocatorError::AddressSpaceExhausted)?;
        self.blocks
            .try_reserve(1)
            .map_err(|_| AllocatorError::OutOfMemory(self.blocks.len() + 1))?;

        let end_of_reserve = align_up(self.reserve_at_beginning, self.alignment);
        let (index, offset) = match self.blocks.first() {
            None => (0, end_of_reserve),
            Some(first)
                if end_of_reserve
                    .checked_add(size)
                    .is_some_and(|end| end <= first.offset) =>
            {
                (0, end_of_reserve)
            }
            Some(_) => {
                let chosen =
                    self.strategy
                        .choose(&self.blocks, size, self.alignment, heat, &self.tuning);
                match chosen {
                    Some(i) => (i + 1, align_up(self.blocks[i].end(), self.alignment)),
                    None => {
                        let last = self.blocks[self.blocks.len() - 1];
                        let offset = checked_align_up(last.end(), self.alignment)
                            .ok_or(AllocatorError::AddressSpaceExhausted)?;
                        (self.blocks.len(), offset)
                    }
                }
            }
        };

        if offset.checked_add(size).is_none() {
            return Err(AllocatorError::AddressSpaceExhausted);
        }

        // Placement succeeded; usage is committed only now, so a failed
        // allocation never overstates it.
        self.bytes_in_use = bytes_in_use;
        self.blocks.insert(index, BlockPair::new(offset, size));
        self.debug_validate();

        trace!(
            "Allocator {:#x}: allocated {} bytes at {} (heat {})",
            self.instance,
            size,
            offset,
            heat
        );
        self.tracer.record(|| TraceEvent::Alloc {
            instance: self.instance,
            size,
            heat,
            offset,
        });

        Ok(offset)
    }

    /// Free the block starting exactly at `offset`
    pub fn free_block(&mut self, offset: u64) -> Result<()> {
        let index = self
            .find_block(offset)
            .ok_or(AllocatorError::NoSuchBlock(offset))?;

        self.bytes_in_use -= self.blocks[index].size;
        self.blocks.remove(index);
        self.debug_validate();

        trace!("Allocator {:#x}: freed block at {}", self.instance, offset);
        self.tracer.record(|| TraceEvent::Free {
            instance: self.instance,
            offset,
        });

        Ok(())
    }

    /// Size of the block starting exactly at `offset`
    pub fn block_size(&self, offset: u64) -> Result<u64> {
        self.find_block(offset)
            .map(|index| self.blocks[index].size)
            .ok_or(AllocatorError::NoSuchBlock(offset))
    }

    /// Index of the block starting exactly at `offset` (binary search)
    pub fn find_block(&self, offset: u64) -> Option<usize> {
        self.blocks
            .binary_search_by_key(&offset, |bp| bp.offset)
            .ok()
    }

    /// Smallest offset past every allocated byte
    ///
    /// The reserve (unaligned) when there are no blocks.
    pub fn allocated_limit(&self) -> u64 {
        match self.blocks.last() {
            Some(last) => last.end(),
            None => self.reserve_at_beginning,
        }
    }

    /// Block `n` in layout order, where block 0 is the reserve
    ///
    /// Returns `None` when `n` is past the last block.
    pub fn nth_block_in_layout_order(&self, n: u64) -> Option<BlockPair> {
        if n == 0 {
            return Some(BlockPair::new(0, self.reserve_at_beginning));
        }
        let index = usize::try_from(n - 1).ok()?;
        self.blocks.get(index).copied()
    }

    /// Full O(n) invariant check
    ///
    /// Blocks must be strictly ascending, non-overlapping, aligned, at or
    /// past the aligned reserve, non-empty; and the running byte count must
    /// match reserve plus the sum of block sizes.
    pub fn validate(&self) -> Result<()> {
        let computed = check_layout(&self.blocks, self.reserve_at_beginning, self.alignment)?;
        if computed != self.bytes_in_use {
            return Err(CorruptionKind::BytesInUseMismatch {
                recorded: self.bytes_in_use,
                computed,
            }
            .into());
        }
        Ok(())
    }

    fn debug_validate(&self) {
        if cfg!(debug_assertions) {
            if let Err(e) = self.validate() {
                panic!("block allocator {:#x} invariant violated: {}", self.instance, e);
            }
        }
    }

    /// Release the allocator
    ///
    /// Equivalent to dropping it; both record a destroy trace event.
    pub fn destroy(self) {
        drop(self);
    }

    /// Live blocks in offset order, e.g. for persisting to a file header
    pub fn blocks(&self) -> &[BlockPair] {
        &self.blocks
    }

    pub fn n_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Reserve plus the sizes of all live blocks
    pub fn bytes_in_use(&self) -> u64 {
        self.bytes_in_use
    }

    pub fn reserve(&self) -> u64 {
        self.reserve_at_beginning
    }

    pub fn alignment(&self) -> u64 {
        self.alignment
    }

    pub fn strategy(&self) -> AllocationStrategy {
        self.strategy
    }

    pub fn tuning(&self) -> StrategyTuning {
        self.tuning
    }

    /// Id naming this allocator in trace lines
    pub fn instance(&self) -> u64 {
        self.instance
    }
}

impl Drop for BlockAllocator {
    fn drop(&mut self) {
        debug!(
            "Destroying block allocator {:#x} ({} blocks)",
            self.instance,
            self.blocks.len()
        );
        let instance = self.instance;
        self.tracer.record(|| TraceEvent::Destroy { instance });
    }
}
