//! Fragmentation accounting
//!
//! Unused space is every gap the allocator could hand out without growing
//! the file: between the aligned reserve and the first block, between the
//! aligned end of each block and the next block, and between the aligned
//! end of the last block and the file size supplied by the caller.

use crate::allocator::block::align_up;
use crate::allocator::BlockAllocator;
use crate::error::{AllocatorError, Result};
use serde::{Deserialize, Serialize};

/// Fragmentation report exchanged with the compaction layer
///
/// `file_size_bytes`, `data_bytes` and `checkpoint_bytes_additional` are
/// inputs to [`BlockAllocator::get_unused_statistics`]; the `unused_*`
/// fields are filled in by it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentationReport {
    /// Size of the backing file (0 = ignore the trailing gap)
    pub file_size_bytes: u64,
    /// Bytes in use as tracked by the caller (reserve included)
    pub data_bytes: u64,
    /// Number of live blocks
    pub data_blocks: u64,
    /// Bytes in use that the caller accounts separately (e.g. blocks held
    /// by an in-progress checkpoint)
    pub checkpoint_bytes_additional: u64,
    /// Total bytes in gaps
    pub unused_bytes: u64,
    /// Number of non-empty gaps
    pub unused_blocks: u64,
    /// Size of the largest gap
    pub largest_unused_block: u64,
}

impl FragmentationReport {
    /// Report for a file of the given size, to be completed by the allocator
    pub fn for_file(file_size_bytes: u64, data_bytes: u64) -> Self {
        FragmentationReport {
            file_size_bytes,
            data_bytes,
            ..Default::default()
        }
    }

    fn record_gap(&mut self, free_space: u64) {
        if free_space == 0 {
            return;
        }
        self.unused_bytes += free_space;
        self.unused_blocks += 1;
        self.largest_unused_block = self.largest_unused_block.max(free_space);
    }

    /// Share of the file (0.0-1.0) that sits in gaps
    pub fn unused_ratio(&self) -> f64 {
        let total = self.file_size_bytes.max(self.data_bytes + self.unused_bytes);
        if total == 0 {
            return 0.0;
        }
        self.unused_bytes as f64 / total as f64
    }
}

impl BlockAllocator {
    /// Current usage with the unused-space fields computed for a zero-sized file
    pub fn get_statistics(&self) -> FragmentationReport {
        let mut report = FragmentationReport {
            data_bytes: self.bytes_in_use(),
            data_blocks: self.n_blocks() as u64,
            ..Default::default()
        };
        self.fill_unused(&mut report);
        report
    }

    /// Fill in the unused-space fields of `report`
    ///
    /// `report.data_bytes + report.checkpoint_bytes_additional` must equal
    /// the allocator's bytes in use; otherwise the caller and allocator
    /// disagree about what is live and the report would be meaningless.
    pub fn get_unused_statistics(&self, report: &mut FragmentationReport) -> Result<()> {
        let claimed = report
            .data_bytes
            .checked_add(report.checkpoint_bytes_additional);
        if claimed != Some(self.bytes_in_use()) {
            return Err(AllocatorError::StatisticsMismatch {
                in_use: self.bytes_in_use(),
                data_bytes: report.data_bytes,
                additional: report.checkpoint_bytes_additional,
            });
        }

        self.fill_unused(report);
        Ok(())
    }

    fn fill_unused(&self, report: &mut FragmentationReport) {
        report.unused_bytes = 0;
        report.unused_blocks = 0;
        report.largest_unused_block = 0;

        let alignment = self.alignment();
        let reserve_end = align_up(self.reserve(), alignment);
        let blocks = self.blocks();

        let tail_start = match (blocks.first(), blocks.last()) {
            (Some(first), Some(last)) => {
                report.record_gap(first.offset - reserve_end);
                for pair in blocks.windows(2) {
                    let end_of_this = align_up(pair[0].end(), alignment);
                    report.record_gap(pair[1].offset.saturating_sub(end_of_this));
                }
                align_up(last.end(), alignment)
            }
            _ => reserve_end,
        };

        report.record_gap(report.file_size_bytes.saturating_sub(tail_start));
    }
}
