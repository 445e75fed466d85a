//! Allocation tracing for offline replay
//!
//! Every allocator lifecycle operation can be appended to a trace sink as
//! one text line (see [`event`] for the format). Tracing is off unless a
//! sink is supplied: a disabled [`Tracer`] costs one `Option` check and
//! never renders a line.
//!
//! Trace writes are best-effort. A failed write is logged and the
//! allocator operation that caused it still succeeds.

mod event;
mod sink;

pub use event::TraceEvent;
pub use sink::{FileTraceSink, MemoryTraceSink, TraceSink};

use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::{error, info, warn};

/// Environment variable naming the process-wide trace file
pub const TRACE_PATH_ENV: &str = "BA_TRACE_PATH";

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);
static GLOBAL_TRACER: OnceLock<Tracer> = OnceLock::new();

/// Process-unique id naming an allocator in trace lines
pub(crate) fn next_instance_id() -> u64 {
    NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed)
}

/// Handle to an optional trace sink
///
/// Cloning is cheap; clones share the sink.
#[derive(Clone, Default)]
pub struct Tracer {
    sink: Option<Arc<dyn TraceSink>>,
}

impl Tracer {
    /// Tracer that records nothing
    pub fn disabled() -> Self {
        Tracer { sink: None }
    }

    /// Tracer writing to `sink`
    pub fn new(sink: Arc<dyn TraceSink>) -> Self {
        Tracer { sink: Some(sink) }
    }

    /// Tracer writing to a freshly truncated file
    pub fn to_file(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let sink = FileTraceSink::create(path)?;
        Ok(Tracer::new(Arc::new(sink)))
    }

    pub fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    /// Record an event; `event` is only built when tracing is enabled
    pub fn record(&self, event: impl FnOnce() -> TraceEvent) {
        let Some(sink) = &self.sink else {
            return;
        };

        let event = event();
        if let Err(e) = sink.write_line(&event.to_string()) {
            warn!(
                "Failed to write {} trace for allocator {:#x}: {}",
                event.keyword(),
                event.instance(),
                e
            );
        }
    }
}

impl fmt::Debug for Tracer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracer")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

/// Process-wide tracer configured from `BA_TRACE_PATH`
///
/// The variable is read once, on first use. If it is unset the tracer is
/// disabled; if the file cannot be opened the failure is logged and the
/// tracer is disabled.
pub fn global_tracer() -> Tracer {
    GLOBAL_TRACER
        .get_or_init(|| match std::env::var_os(TRACE_PATH_ENV) {
            Some(path) if !path.is_empty() => tracer_for_path(Path::new(&path)),
            _ => Tracer::disabled(),
        })
        .clone()
}

/// Open a file tracer, falling back to a disabled one on failure
pub(crate) fn tracer_for_path(path: &Path) -> Tracer {
    match Tracer::to_file(path) {
        Ok(tracer) => {
            info!("Block allocator tracing enabled, path: {}", path.display());
            tracer
        }
        Err(e) => {
            error!(
                "Block allocator trace path {} could not be opened for writing: {}",
                path.display(),
                e
            );
            Tracer::disabled()
        }
    }
}
