//! Block allocator trace replay
//!
//! Replays a `BA_TRACE_PATH` trace under one or every placement strategy
//! and prints how much of each file ends up in gaps.

use anyhow::Context;
use blockfile_allocator::replay::{self, ReplayReport};
use blockfile_allocator::{AllocationStrategy, AllocatorConfig};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "ba-replay")]
#[command(about = "Replay a block allocator trace and compare placement strategies")]
struct Args {
    /// Trace file written with BA_TRACE_PATH
    trace: PathBuf,

    /// Strategy to replay with (first-fit, best-fit, padded-fit, heat-zone)
    #[arg(short, long, conflicts_with = "all")]
    strategy: Option<AllocationStrategy>,

    /// Replay once per strategy
    #[arg(short, long)]
    all: bool,

    /// Allocator configuration (TOML) supplying strategy tuning
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print JSON instead of a table
    #[arg(long)]
    json: bool,
}

fn print_table(report: &ReplayReport) {
    println!("strategy: {}", report.strategy);
    println!(
        "{:>18} {:>8} {:>8} {:>8} {:>14} {:>14} {:>8} {:>8}",
        "instance", "allocs", "frees", "live", "peak limit", "unused bytes", "gaps", "unused%"
    );
    for inst in &report.instances {
        println!(
            "{:>18} {:>8} {:>8} {:>8} {:>14} {:>14} {:>8} {:>7.1}%",
            format!("{:#x}", inst.instance),
            inst.allocs,
            inst.frees,
            inst.live_blocks,
            inst.peak_allocated_limit,
            inst.fragmentation.unused_bytes,
            inst.fragmentation.unused_blocks,
            inst.fragmentation.unused_ratio() * 100.0
        );
    }
    println!(
        "total: peak limit {}, unused bytes {}",
        report.total_peak_allocated_limit(),
        report.total_unused_bytes()
    );
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => AllocatorConfig::from_file(path)
            .with_context(|| format!("loading configuration {:?}", path))?,
        None => AllocatorConfig::default(),
    }
    .with_env_overrides();

    let events = replay::parse_trace_file(&args.trace)
        .with_context(|| format!("reading trace {:?}", args.trace))?;
    info!("Loaded {} events from {:?}", events.len(), args.trace);

    let reports = if args.all {
        replay::replay_all(&events, config.tuning)?
    } else {
        let strategy = args.strategy.unwrap_or(config.strategy);
        vec![replay::replay(&events, strategy, config.tuning)?]
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        for (i, report) in reports.iter().enumerate() {
            if i > 0 {
                println!();
            }
            print_table(report);
        }
    }

    Ok(())
}
