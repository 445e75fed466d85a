//! Trace sinks
//!
//! A sink owns its own lock. It protects only the sink's output, never
//! any allocator state, so traces from many allocators can interleave
//! line by line.

use parking_lot::Mutex;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Destination for rendered trace lines
pub trait TraceSink: Send + Sync {
    /// Append one line (without trailing newline) and make it durable as
    /// far as the sink can
    fn write_line(&self, line: &str) -> io::Result<()>;
}

/// Writes trace lines to a file, flushing after every line
pub struct FileTraceSink {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl FileTraceSink {
    /// Create (or truncate) the trace file at `path`
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)?;
        Ok(FileTraceSink {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    /// Path of the trace file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TraceSink for FileTraceSink {
    fn write_line(&self, line: &str) -> io::Result<()> {
        let mut writer = self.writer.lock();
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()
    }
}

impl std::fmt::Debug for FileTraceSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileTraceSink")
            .field("path", &self.path)
            .finish()
    }
}

/// Keeps trace lines in memory
#[derive(Debug, Default)]
pub struct MemoryTraceSink {
    lines: Mutex<Vec<String>>,
}

impl MemoryTraceSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every line written so far
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    /// Remove and return every line written so far
    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.lines.lock())
    }
}

impl TraceSink for MemoryTraceSink {
    fn write_line(&self, line: &str) -> io::Result<()> {
        self.lines.lock().push(line.to_string());
        Ok(())
    }
}
