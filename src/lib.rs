//! # Blockfile Allocator - Block Placement for Single-File Storage
//!
//! `blockfile-allocator` decides where variable-sized blocks live inside one
//! backing file. It does not touch the file itself; it tracks which byte
//! ranges are in use and hands out offsets for new blocks.
//!
//! - **Aligned placement**: every block starts on a multiple of the
//!   configured alignment (512 bytes or a multiple of it)
//! - **Reserved header**: the first bytes of the file are never handed out
//! - **Pluggable strategies**: first fit, best fit, padded fit and
//!   heat-zone placement
//! - **Fragmentation reports** for compaction decisions
//! - **Tracing and replay**: record every call to a text trace and replay it
//!   under another strategy
//!
//! ## Quick Start
//!
//! ```rust
//! use blockfile_allocator::{BlockAllocator, Result};
//!
//! # fn main() -> Result<()> {
//! // 4 KiB header, 4 KiB alignment
//! let mut alloc = BlockAllocator::create(4096, 4096)?;
//!
//! let a = alloc.alloc_block(1000, 0)?;
//! let b = alloc.alloc_block(6000, 0)?;
//! assert_eq!((a, b), (4096, 8192));
//!
//! alloc.free_block(a)?;
//! assert_eq!(alloc.block_size(b)?, 6000);
//! # Ok(())
//! # }
//! ```
//!
//! ## Loading a Persisted Layout
//!
//! ```rust
//! use blockfile_allocator::{AllocationStrategy, BlockAllocator, BlockPair, FragmentationReport, Result};
//!
//! # fn main() -> Result<()> {
//! let pairs = [BlockPair::new(8192, 50), BlockPair::new(4096, 100)];
//! let mut alloc = BlockAllocator::create_from_existing(4096, 4096, &pairs)?;
//! alloc.set_strategy(AllocationStrategy::BestFit);
//!
//! let mut report = FragmentationReport::for_file(16384, alloc.bytes_in_use());
//! alloc.get_unused_statistics(&mut report)?;
//! assert_eq!(report.unused_bytes, 4096);
//! # Ok(())
//! # }
//! ```

pub mod allocator;
pub mod config;
pub mod error;
pub mod replay;
pub mod trace;

pub use allocator::{
    AllocationStrategy, BlockAllocator, BlockPair, FragmentationReport, StrategyTuning,
    MIN_ALIGNMENT,
};
pub use config::AllocatorConfig;
pub use error::{AllocatorError, CorruptionKind, Result};
pub use trace::{FileTraceSink, MemoryTraceSink, TraceEvent, TraceSink, Tracer};
