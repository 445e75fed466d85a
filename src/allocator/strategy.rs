//! Placement strategies
//!
//! Each strategy is a pure function over the allocator's sorted block list.
//! It returns the index of the block *after which* the new block should be
//! placed, or `None` when no interior gap fits (the allocator then appends
//! after the last block). The new block always starts at the aligned end of
//! the chosen block.

use crate::allocator::block::{checked_align_up, BlockPair};
use crate::error::{AllocatorError, Result};
use serde::{de, Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Default padded-fit alignment (bytes)
pub const DEFAULT_PADDED_FIT_ALIGNMENT: u64 = 4096;

/// Default start of the hot zone, as a percentage of the allocated limit
pub const DEFAULT_HOT_ZONE_THRESHOLD_PERCENT: u8 = 85;

/// Placement policy used by `alloc_block`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AllocationStrategy {
    /// Earliest gap that fits
    #[default]
    FirstFit,
    /// Gap leaving the least slack
    BestFit,
    /// Earliest gap that fits with extra padding to spare
    PaddedFit,
    /// Hot blocks near the end of the file, cold blocks first-fit
    HeatZone,
}

impl AllocationStrategy {
    /// All strategies, in declaration order
    pub const ALL: [AllocationStrategy; 4] = [
        AllocationStrategy::FirstFit,
        AllocationStrategy::BestFit,
        AllocationStrategy::PaddedFit,
        AllocationStrategy::HeatZone,
    ];

    /// Stable name used in configuration and on the command line
    pub fn as_str(&self) -> &'static str {
        match self {
            AllocationStrategy::FirstFit => "first-fit",
            AllocationStrategy::BestFit => "best-fit",
            AllocationStrategy::PaddedFit => "padded-fit",
            AllocationStrategy::HeatZone => "heat-zone",
        }
    }

    /// Pick the block after which a block of `size` bytes should go
    pub fn choose(
        &self,
        blocks: &[BlockPair],
        size: u64,
        alignment: u64,
        heat: u64,
        tuning: &StrategyTuning,
    ) -> Option<usize> {
        match self {
            AllocationStrategy::FirstFit => first_fit(blocks, size, alignment),
            AllocationStrategy::BestFit => best_fit(blocks, size, alignment),
            AllocationStrategy::PaddedFit => {
                padded_fit(blocks, size, alignment, tuning.padded_fit_alignment)
            }
            AllocationStrategy::HeatZone => {
                heat_zone(blocks, size, alignment, heat, tuning.hot_zone_threshold())
            }
        }
    }
}

impl fmt::Display for AllocationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AllocationStrategy {
    type Err = AllocatorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "first-fit" | "first" => Ok(AllocationStrategy::FirstFit),
            "best-fit" | "best" => Ok(AllocationStrategy::BestFit),
            "padded-fit" | "padded" => Ok(AllocationStrategy::PaddedFit),
            "heat-zone" | "heat" => Ok(AllocationStrategy::HeatZone),
            _ => Err(AllocatorError::Config(format!(
                "Invalid strategy '{}'. Valid options: first-fit, best-fit, padded-fit, heat-zone",
                s
            ))),
        }
    }
}

/// Knobs for the padded-fit and heat-zone strategies
///
/// Values are only set through the `with_*` builders, which also check
/// values read from configuration files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StrategyTuning {
    /// Alignment applied to a block's end when testing whether a gap fits
    padded_fit_alignment: u64,

    /// Where the hot zone begins, as a percentage (1-99) of the allocated limit
    hot_zone_threshold_percent: u8,
}

impl Default for StrategyTuning {
    fn default() -> Self {
        StrategyTuning {
            padded_fit_alignment: DEFAULT_PADDED_FIT_ALIGNMENT,
            hot_zone_threshold_percent: DEFAULT_HOT_ZONE_THRESHOLD_PERCENT,
        }
    }
}

/// Unchecked tuning as written in a configuration file
#[derive(Deserialize)]
#[serde(default)]
struct TuningFields {
    padded_fit_alignment: u64,
    hot_zone_threshold_percent: u8,
}

impl Default for TuningFields {
    fn default() -> Self {
        let tuning = StrategyTuning::default();
        TuningFields {
            padded_fit_alignment: tuning.padded_fit_alignment,
            hot_zone_threshold_percent: tuning.hot_zone_threshold_percent,
        }
    }
}

impl<'de> Deserialize<'de> for StrategyTuning {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let fields = TuningFields::deserialize(deserializer)?;
        StrategyTuning::default()
            .with_padded_fit_alignment(fields.padded_fit_alignment)
            .with_hot_zone_threshold_percent(fields.hot_zone_threshold_percent)
            .map_err(de::Error::custom)
    }
}

impl StrategyTuning {
    /// Set the padded-fit alignment, rounded up to a power of two of at least 4096
    pub fn with_padded_fit_alignment(mut self, alignment: u64) -> Self {
        self.padded_fit_alignment = round_up_to_power_of_two(alignment);
        self
    }

    /// Set the hot zone threshold percentage (1 through 99)
    pub fn with_hot_zone_threshold_percent(mut self, percent: u8) -> Result<Self> {
        if !(1..=99).contains(&percent) {
            return Err(AllocatorError::Config(format!(
                "hot zone threshold {} out of range (expected 1 through 99)",
                percent
            )));
        }
        self.hot_zone_threshold_percent = percent;
        Ok(self)
    }

    /// Alignment used by the padded-fit gap test
    pub fn padded_fit_alignment(&self) -> u64 {
        self.padded_fit_alignment
    }

    pub fn hot_zone_threshold_percent(&self) -> u8 {
        self.hot_zone_threshold_percent
    }

    /// Hot zone threshold as a fraction
    pub fn hot_zone_threshold(&self) -> f64 {
        f64::from(self.hot_zone_threshold_percent) / 100.0
    }
}

/// Round up to a power of two, never below 4096
pub fn round_up_to_power_of_two(value: u64) -> u64 {
    value
        .max(DEFAULT_PADDED_FIT_ALIGNMENT)
        .checked_next_power_of_two()
        .unwrap_or(1 << 63)
}

/// Offset at which a block of `size` bytes fits after `blocks[i]`, if any
///
/// The gap is tested with `end` rounded to `fit_alignment`, which may be
/// coarser than the placement alignment.
fn fits_after(blocks: &[BlockPair], i: usize, size: u64, fit_alignment: u64) -> Option<u64> {
    let next = blocks.get(i + 1)?;
    let start = checked_align_up(blocks[i].end(), fit_alignment)?;
    let end = start.checked_add(size)?;
    (end <= next.offset).then_some(end)
}

fn first_fit_with(blocks: &[BlockPair], size: u64, fit_alignment: u64) -> Option<usize> {
    (0..blocks.len().saturating_sub(1)).find(|&i| fits_after(blocks, i, size, fit_alignment).is_some())
}

/// First gap (lowest offset) that holds `size` bytes
pub fn first_fit(blocks: &[BlockPair], size: u64, alignment: u64) -> Option<usize> {
    first_fit_with(blocks, size, alignment)
}

/// Gap that leaves the smallest hole after the new block
///
/// On equal holes the earliest gap wins.
pub fn best_fit(blocks: &[BlockPair], size: u64, alignment: u64) -> Option<usize> {
    let mut best: Option<(usize, u64)> = None;

    for i in 0..blocks.len().saturating_sub(1) {
        if let Some(end) = fits_after(blocks, i, size, alignment) {
            let hole = blocks[i + 1].offset - end;
            if best.map_or(true, |(_, best_hole)| hole < best_hole) {
                best = Some((i, hole));
            }
        }
    }

    best.map(|(i, _)| i)
}

/// First gap that still fits `size` bytes when the preceding block's end is
/// rounded up to `padded_alignment`
///
/// The new block is still placed at the normally aligned end.
pub fn padded_fit(
    blocks: &[BlockPair],
    size: u64,
    alignment: u64,
    padded_alignment: u64,
) -> Option<usize> {
    let fit_alignment = if padded_alignment == 0 {
        alignment
    } else {
        checked_align_up(padded_alignment, alignment)?
    };
    first_fit_with(blocks, size, fit_alignment)
}

/// Cluster hot (soon-to-be-freed) blocks at the end of the file
///
/// Cold allocations (`heat == 0`) are plain first fit. Hot allocations
/// first try the gaps inside the hot zone going forward, then the gaps
/// below it going backward, nearest the zone first.
pub fn heat_zone(
    blocks: &[BlockPair],
    size: u64,
    alignment: u64,
    heat: u64,
    threshold: f64,
) -> Option<usize> {
    let last = match blocks.last() {
        Some(last) if heat > 0 => last,
        _ => return first_fit(blocks, size, alignment),
    };

    let highest_offset = checked_align_up(last.end(), alignment)?;
    let hot_zone_offset = (threshold * highest_offset as f64) as u64;
    let boundary = blocks.partition_point(|bp| bp.offset < hot_zone_offset);

    let gaps = blocks.len() - 1;
    if let Some(i) = (boundary..gaps).find(|&i| fits_after(blocks, i, size, alignment).is_some()) {
        return Some(i);
    }

    (0..boundary.min(gaps))
        .rev()
        .find(|&i| fits_after(blocks, i, size, alignment).is_some())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(list: &[(u64, u64)]) -> Vec<BlockPair> {
        list.iter().map(|&p| BlockPair::from(p)).collect()
    }

    #[test]
    fn test_empty_and_single_block_never_fit() {
        let tuning = StrategyTuning::default();
        for strategy in AllocationStrategy::ALL {
            assert_eq!(strategy.choose(&[], 512, 512, 1, &tuning), None);
            assert_eq!(
                strategy.choose(&pairs(&[(0, 512)]), 512, 512, 1, &tuning),
                None
            );
        }
    }

    #[test]
    fn test_first_fit_picks_earliest_gap() {
        // gaps: 1024..2048 (1024 bytes), 3072..8192 (5120 bytes)
        let blocks = pairs(&[(0, 1024), (2048, 1024), (8192, 512)]);
        assert_eq!(first_fit(&blocks, 512, 512), Some(0));
        assert_eq!(first_fit(&blocks, 2048, 512), Some(1));
        assert_eq!(first_fit(&blocks, 8192, 512), None);
    }

    #[test]
    fn test_first_fit_respects_alignment() {
        // block 0 ends at 100; aligned end is 512, so a 512-byte block needs
        // the next block to start at 1024 or later
        let blocks = pairs(&[(0, 100), (1000, 10)]);
        assert_eq!(first_fit(&blocks, 512, 512), None);
        let blocks = pairs(&[(0, 100), (1024, 10)]);
        assert_eq!(first_fit(&blocks, 512, 512), Some(0));
    }

    #[test]
    fn test_best_fit_picks_smallest_gap() {
        // gaps: 4096 bytes after block 0, 1024 bytes after block 1
        let blocks = pairs(&[(0, 512), (4608, 512), (6144, 512)]);
        assert_eq!(first_fit(&blocks, 1024, 512), Some(0));
        assert_eq!(best_fit(&blocks, 1024, 512), Some(1));
        assert_eq!(best_fit(&blocks, 2048, 512), Some(0));
    }

    #[test]
    fn test_best_fit_tie_goes_to_earliest() {
        let blocks = pairs(&[(0, 512), (2048, 512), (4096, 512)]);
        assert_eq!(best_fit(&blocks, 512, 512), Some(0));
    }

    #[test]
    fn test_padded_fit_requires_slack() {
        // block 0 ends at 512; padded to 4096 the gap up to 4608 holds 512
        let blocks = pairs(&[(0, 512), (4608, 512), (16384, 512)]);
        assert_eq!(first_fit(&blocks, 1024, 512), Some(0));
        assert_eq!(padded_fit(&blocks, 1024, 512, 4096), Some(1));
        assert_eq!(padded_fit(&blocks, 512, 512, 4096), Some(0));
    }

    #[test]
    fn test_heat_zone_cold_is_first_fit() {
        let blocks = pairs(&[(0, 512), (4096, 512), (8192, 512), (16384, 512)]);
        assert_eq!(heat_zone(&blocks, 512, 512, 0, 0.85), first_fit(&blocks, 512, 512));
    }

    #[test]
    fn test_heat_zone_hot_prefers_high_gaps() {
        // limit is 100352; hot zone starts at 85% = 85299
        let blocks = pairs(&[(0, 512), (4096, 512), (90112, 512), (99840, 512)]);
        assert_eq!(heat_zone(&blocks, 512, 512, 1, 0.85), Some(2));
        assert_eq!(first_fit(&blocks, 512, 512), Some(0));
    }

    #[test]
    fn test_heat_zone_hot_falls_back_backwards() {
        // the hot zone (blocks 3 and 4) is packed, so the cold zone is
        // scanned from the boundary downwards: gap of 512 after block 1,
        // gap of 3584 after block 0
        let blocks = pairs(&[
            (0, 512),
            (4096, 4096),
            (8704, 81408),
            (90112, 9728),
            (99840, 512),
        ]);
        assert_eq!(first_fit(&blocks, 512, 512), Some(0));
        assert_eq!(heat_zone(&blocks, 512, 512, 1, 0.85), Some(1));
        assert_eq!(heat_zone(&blocks, 3584, 512, 1, 0.85), Some(0));
        assert_eq!(heat_zone(&blocks, 1 << 20, 512, 1, 0.85), None);
    }

    #[test]
    fn test_single_gap_all_strategies_agree() {
        let blocks = pairs(&[(0, 512), (8192, 512)]);
        let tuning = StrategyTuning::default();
        for strategy in AllocationStrategy::ALL {
            for heat in [0, 7] {
                assert_eq!(strategy.choose(&blocks, 1024, 512, heat, &tuning), Some(0));
            }
        }
    }

    #[test]
    fn test_strategy_names_round_trip() {
        for strategy in AllocationStrategy::ALL {
            assert_eq!(strategy.as_str().parse::<AllocationStrategy>().unwrap(), strategy);
        }
        assert_eq!(
            "BEST_FIT".parse::<AllocationStrategy>().unwrap(),
            AllocationStrategy::BestFit
        );
        assert!("worst-fit".parse::<AllocationStrategy>().is_err());
    }

    #[test]
    fn test_tuning() {
        let tuning = StrategyTuning::default().with_padded_fit_alignment(5000);
        assert_eq!(tuning.padded_fit_alignment(), 8192);
        assert_eq!(
            StrategyTuning::default().with_padded_fit_alignment(1).padded_fit_alignment(),
            4096
        );
        assert_eq!(
            StrategyTuning::default().with_padded_fit_alignment(0).padded_fit_alignment(),
            4096
        );
        assert!(StrategyTuning::default().with_hot_zone_threshold_percent(0).is_err());
        assert!(StrategyTuning::default().with_hot_zone_threshold_percent(100).is_err());
        let tuning = StrategyTuning::default()
            .with_hot_zone_threshold_percent(50)
            .unwrap();
        assert!((tuning.hot_zone_threshold() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_tuning_deserialization_is_checked() {
        let tuning: StrategyTuning =
            serde_json::from_str(r#"{"padded_fit_alignment": 5000}"#).unwrap();
        assert_eq!(tuning.padded_fit_alignment(), 8192);
        assert_eq!(tuning.hot_zone_threshold_percent(), 85);

        let zero: StrategyTuning =
            serde_json::from_str(r#"{"padded_fit_alignment": 0}"#).unwrap();
        assert_eq!(zero.padded_fit_alignment(), 4096);

        for percent in [0, 100, 250] {
            let json = format!(r#"{{"hot_zone_threshold_percent": {}}}"#, percent);
            assert!(serde_json::from_str::<StrategyTuning>(&json).is_err(), "{}", percent);
        }

        let written = serde_json::to_string(&tuning).unwrap();
        assert_eq!(serde_json::from_str::<StrategyTuning>(&written).unwrap(), tuning);
    }
}
