//! Trace replay
//!
//! Rebuilds every allocator seen in a trace and re-executes its calls under
//! a chosen placement strategy, so strategies can be compared on real
//! workloads. Offsets in the trace are the ones the recorded run handed
//! out; replay keeps a per-allocator map from recorded to replayed offsets
//! so later frees hit the right block.

use crate::allocator::{AllocationStrategy, BlockAllocator, FragmentationReport, StrategyTuning};
use crate::error::{AllocatorError, Result};
use crate::trace::{TraceEvent, Tracer};
use serde::Serialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::{debug, info};

/// Outcome of replaying one allocator instance
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstanceReport {
    /// Instance id from the trace
    pub instance: u64,
    pub strategy: AllocationStrategy,
    pub allocs: u64,
    pub frees: u64,
    /// Blocks live when the report was taken
    pub live_blocks: u64,
    /// True when the trace destroyed the allocator
    pub destroyed: bool,
    /// Highest allocated limit seen during replay
    pub peak_allocated_limit: u64,
    /// Allocated limit when the report was taken
    pub final_allocated_limit: u64,
    /// Fragmentation when the report was taken (file size = allocated limit)
    pub fragmentation: FragmentationReport,
}

/// Outcome of replaying a whole trace under one strategy
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplayReport {
    pub strategy: AllocationStrategy,
    pub events: usize,
    pub instances: Vec<InstanceReport>,
}

impl ReplayReport {
    /// Sum of unused bytes over every instance
    pub fn total_unused_bytes(&self) -> u64 {
        self.instances
            .iter()
            .map(|r| r.fragmentation.unused_bytes)
            .sum()
    }

    /// Sum of peak allocated limits over every instance
    pub fn total_peak_allocated_limit(&self) -> u64 {
        self.instances.iter().map(|r| r.peak_allocated_limit).sum()
    }
}

/// Parse a trace, one event per line; blank lines are skipped
pub fn parse_trace(reader: impl BufRead) -> Result<Vec<TraceEvent>> {
    let mut events = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let event = line
            .parse::<TraceEvent>()
            .map_err(|reason| AllocatorError::TraceParse {
                line: index + 1,
                reason,
            })?;
        events.push(event);
    }
    Ok(events)
}

/// Parse a trace file
pub fn parse_trace_file(path: impl AsRef<Path>) -> Result<Vec<TraceEvent>> {
    let file = File::open(path.as_ref())?;
    parse_trace(BufReader::new(file))
}

struct ReplayedAllocator {
    allocator: BlockAllocator,
    /// Recorded offset -> replayed offset, for live blocks
    offsets: HashMap<u64, u64>,
    allocs: u64,
    frees: u64,
    peak_allocated_limit: u64,
}

impl ReplayedAllocator {
    fn new(mut allocator: BlockAllocator, strategy: AllocationStrategy, tuning: StrategyTuning) -> Self {
        allocator.set_strategy(strategy);
        allocator.set_tuning(tuning);
        let offsets = allocator
            .blocks()
            .iter()
            .map(|bp| (bp.offset, bp.offset))
            .collect();
        let peak_allocated_limit = allocator.allocated_limit();
        ReplayedAllocator {
            allocator,
            offsets,
            allocs: 0,
            frees: 0,
            peak_allocated_limit,
        }
    }

    fn report(&self, instance: u64, destroyed: bool) -> InstanceReport {
        let limit = self.allocator.allocated_limit();
        // The tail past the allocated limit is never a gap, so the
        // zero-sized-file statistics already describe this file size.
        let fragmentation = FragmentationReport {
            file_size_bytes: limit,
            ..self.allocator.get_statistics()
        };

        InstanceReport {
            instance,
            strategy: self.allocator.strategy(),
            allocs: self.allocs,
            frees: self.frees,
            live_blocks: self.allocator.n_blocks() as u64,
            destroyed,
            peak_allocated_limit: self.peak_allocated_limit,
            final_allocated_limit: limit,
            fragmentation,
        }
    }
}

fn unknown_instance(instance: u64, keyword: &str) -> AllocatorError {
    AllocatorError::ReplayMismatch(format!(
        "{} for allocator {:#x}, which is not live",
        keyword, instance
    ))
}

/// Replay `events` with every allocator using `strategy`
pub fn replay(
    events: &[TraceEvent],
    strategy: AllocationStrategy,
    tuning: StrategyTuning,
) -> Result<ReplayReport> {
    info!("Replaying {} trace events with {}", events.len(), strategy);

    let mut live: HashMap<u64, ReplayedAllocator> = HashMap::new();
    let mut instances = Vec::new();

    for event in events {
        let instance = event.instance();
        match event {
            TraceEvent::Create {
                reserve, alignment, ..
            }
            | TraceEvent::CreateFromBlockPairs {
                reserve, alignment, ..
            } => {
                if live.contains_key(&instance) {
                    return Err(AllocatorError::ReplayMismatch(format!(
                        "allocator {:#x} created while still live",
                        instance
                    )));
                }
                let allocator = match event {
                    TraceEvent::CreateFromBlockPairs { pairs, .. } => {
                        BlockAllocator::create_from_existing_traced(
                            *reserve,
                            *alignment,
                            pairs,
                            Tracer::disabled(),
                        )?
                    }
                    _ => BlockAllocator::create_traced(*reserve, *alignment, Tracer::disabled())?,
                };
                live.insert(instance, ReplayedAllocator::new(allocator, strategy, tuning));
            }
            TraceEvent::Alloc {
                size, heat, offset, ..
            } => {
                let state = live
                    .get_mut(&instance)
                    .ok_or_else(|| unknown_instance(instance, event.keyword()))?;
                if state.offsets.contains_key(offset) {
                    return Err(AllocatorError::ReplayMismatch(format!(
                        "allocator {:#x} allocated offset {} twice",
                        instance, offset
                    )));
                }
                let replayed = state.allocator.alloc_block(*size, *heat)?;
                state.offsets.insert(*offset, replayed);
                state.allocs += 1;
                state.peak_allocated_limit = state
                    .peak_allocated_limit
                    .max(state.allocator.allocated_limit());
            }
            TraceEvent::Free { offset, .. } => {
                let state = live
                    .get_mut(&instance)
                    .ok_or_else(|| unknown_instance(instance, event.keyword()))?;
                let replayed = state.offsets.remove(offset).ok_or_else(|| {
                    AllocatorError::ReplayMismatch(format!(
                        "allocator {:#x} freed offset {} that is not allocated",
                        instance, offset
                    ))
                })?;
                state.allocator.free_block(replayed)?;
                state.frees += 1;
            }
            TraceEvent::Destroy { .. } => {
                let state = live
                    .remove(&instance)
                    .ok_or_else(|| unknown_instance(instance, event.keyword()))?;
                debug!(
                    "Allocator {:#x} destroyed after {} allocs, {} frees",
                    instance, state.allocs, state.frees
                );
                instances.push(state.report(instance, true));
            }
        }
    }

    let mut remaining: Vec<_> = live.into_iter().collect();
    remaining.sort_by_key(|(instance, _)| *instance);
    instances.extend(
        remaining
            .iter()
            .map(|(instance, state)| state.report(*instance, false)),
    );

    Ok(ReplayReport {
        strategy,
        events: events.len(),
        instances,
    })
}

/// Replay `events` once per strategy
pub fn replay_all(events: &[TraceEvent], tuning: StrategyTuning) -> Result<Vec<ReplayReport>> {
    AllocationStrategy::ALL
        .iter()
        .map(|&strategy| replay(events, strategy, tuning))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::BlockPair;
    use crate::trace::MemoryTraceSink;
    use std::sync::Arc;

    fn events(text: &str) -> Vec<TraceEvent> {
        parse_trace(text.as_bytes()).unwrap()
    }

    #[test]
    fn test_parse_trace_reports_line_number() {
        let text = "ba_trace_create 0x1 0 512\n\nba_trace_alloc 0x1 nope 0 0\n";
        match parse_trace(text.as_bytes()) {
            Err(AllocatorError::TraceParse { line, .. }) => assert_eq!(line, 3),
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_replay_simple_trace() {
        let trace = events(
            "ba_trace_create 0x1 4096 512\n\
             ba_trace_alloc 0x1 1000 0 4096\n\
             ba_trace_alloc 0x1 1000 0 5120\n\
             ba_trace_free 0x1 4096\n\
             ba_trace_destroy 0x1\n",
        );
        let report = replay(&trace, AllocationStrategy::FirstFit, StrategyTuning::default()).unwrap();

        assert_eq!(report.events, 5);
        assert_eq!(report.instances.len(), 1);
        let inst = &report.instances[0];
        assert_eq!(inst.instance, 1);
        assert_eq!((inst.allocs, inst.frees, inst.live_blocks), (2, 1, 1));
        assert!(inst.destroyed);
        assert_eq!(inst.peak_allocated_limit, 6120);
        assert_eq!(inst.final_allocated_limit, 6120);
        // the first block's slot (4096..5120) is free again
        assert_eq!(inst.fragmentation.unused_bytes, 1024);
        assert_eq!(inst.fragmentation.unused_blocks, 1);
    }

    #[test]
    fn test_replay_maps_offsets_across_strategies() {
        // The recorded run used first fit. Padded fit places both requests
        // at different offsets, and the frees must still find them.
        let trace = events(
            "ba_trace_create_from_blockpairs 0x9 0 512 [0 512] [1536 512] [4096 512]\n\
             ba_trace_alloc 0x9 512 0 512\n\
             ba_trace_alloc 0x9 1024 0 2048\n\
             ba_trace_free 0x9 2048\n\
             ba_trace_free 0x9 512\n",
        );

        for report in replay_all(&trace, StrategyTuning::default()).unwrap() {
            let inst = &report.instances[0];
            assert_eq!(inst.strategy, report.strategy);
            assert_eq!(inst.allocs, 2);
            assert_eq!(inst.frees, 2);
            assert_eq!(inst.live_blocks, 3);
            assert!(!inst.destroyed);
        }
    }

    #[test]
    fn test_replay_instance_reuse_after_destroy() {
        let trace = events(
            "ba_trace_create 0x5 0 512\n\
             ba_trace_alloc 0x5 100 0 0\n\
             ba_trace_destroy 0x5\n\
             ba_trace_create 0x5 0 512\n\
             ba_trace_destroy 0x5\n",
        );
        let report = replay(&trace, AllocationStrategy::BestFit, StrategyTuning::default()).unwrap();
        assert_eq!(report.instances.len(), 2);
        assert_eq!(report.instances[0].allocs, 1);
        assert_eq!(report.instances[1].allocs, 0);
    }

    #[test]
    fn test_replay_mismatches() {
        let tuning = StrategyTuning::default();
        let bad = [
            "ba_trace_alloc 0x1 100 0 0\n",
            "ba_trace_create 0x1 0 512\nba_trace_free 0x1 0\n",
            "ba_trace_create 0x1 0 512\nba_trace_create 0x1 0 512\n",
            "ba_trace_create 0x1 0 512\nba_trace_alloc 0x1 10 0 0\nba_trace_alloc 0x1 10 0 0\n",
            "ba_trace_destroy 0x1\n",
        ];
        for text in bad {
            let result = replay(&events(text), AllocationStrategy::FirstFit, tuning);
            assert!(
                matches!(result, Err(AllocatorError::ReplayMismatch(_))),
                "trace {:?} gave {:?}",
                text,
                result
            );
        }
    }

    #[test]
    fn test_replay_surfaces_allocator_errors() {
        let trace = events("ba_trace_create 0x1 0 100\n");
        assert!(matches!(
            replay(&trace, AllocationStrategy::FirstFit, StrategyTuning::default()),
            Err(AllocatorError::InvalidAlignment(100))
        ));
    }

    #[test]
    fn test_replay_of_recorded_trace_reproduces_layout() {
        let sink = Arc::new(MemoryTraceSink::new());
        let pairs = [BlockPair::new(8192, 100)];
        let mut alloc =
            BlockAllocator::create_from_existing_traced(4096, 4096, &pairs, Tracer::new(sink.clone()))
                .unwrap();
        let a = alloc.alloc_block(5000, 0).unwrap();
        let _b = alloc.alloc_block(100, 1).unwrap();
        alloc.free_block(a).unwrap();
        let _c = alloc.alloc_block(3000, 0).unwrap();
        let expected_limit = alloc.allocated_limit();
        let expected_unused = {
            let mut report = FragmentationReport::for_file(expected_limit, alloc.bytes_in_use());
            alloc.get_unused_statistics(&mut report).unwrap();
            report.unused_bytes
        };
        drop(alloc);

        let text = sink.lines().join("\n");
        let report = replay(
            &events(&text),
            AllocationStrategy::FirstFit,
            StrategyTuning::default(),
        )
        .unwrap();
        let inst = &report.instances[0];
        assert!(inst.destroyed);
        assert_eq!(inst.final_allocated_limit, expected_limit);
        assert_eq!(inst.fragmentation.unused_bytes, expected_unused);
    }
}
