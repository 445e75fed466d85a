//! Process-wide tracing enabled through `BA_TRACE_PATH`
//!
//! Kept in its own test binary: the global tracer reads the variable once,
//! so it must be set before any allocator in the process is created.

use blockfile_allocator::trace::{global_tracer, TRACE_PATH_ENV};
use blockfile_allocator::{BlockAllocator, BlockPair};
use tempfile::tempdir;

#[test]
fn test_trace_path_env_traces_untraced_constructors() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("global.trace");
    std::env::set_var(TRACE_PATH_ENV, &path);

    let mut alloc = BlockAllocator::create(4096, 512).unwrap();
    let id = alloc.instance();
    let offset = alloc.alloc_block(100, 2).unwrap();
    assert_eq!(offset, 4096);
    alloc.free_block(offset).unwrap();
    alloc.destroy();

    let loaded =
        BlockAllocator::create_from_existing(4096, 4096, &[BlockPair::new(8192, 50)]).unwrap();
    let loaded_id = loaded.instance();
    drop(loaded);

    assert!(global_tracer().is_enabled());

    let text = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(
        lines,
        vec![
            format!("ba_trace_create {:#x} 4096 512", id),
            format!("ba_trace_alloc {:#x} 100 2 4096", id),
            format!("ba_trace_free {:#x} 4096", id),
            format!("ba_trace_destroy {:#x}", id),
            format!(
                "ba_trace_create_from_blockpairs {:#x} 4096 4096 [8192 50]",
                loaded_id
            ),
            format!("ba_trace_destroy {:#x}", loaded_id),
        ]
    );
}
