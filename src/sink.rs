//! Delivery sinks. The drain worker owns exactly one sink; the pipeline
//! never requires multi-writer safety from it.

use std::fs::OpenOptions;
use std::io::{self, BufWriter, Stdout, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::Mutex;

use crate::config::{Config, SinkKind};

/// Write/flush/ready capability set for a delivery destination.
pub trait Sink: Send {
    fn write_line(&mut self, line: &str) -> io::Result<()>;
    fn flush(&mut self) -> io::Result<()>;
    fn is_ready(&self) -> bool;
}

/// Line-buffered file writer. After the first I/O failure the sink reports
/// itself not ready and the drain worker backs off.
pub struct FileSink {
    writer: BufWriter<std::fs::File>,
    path: PathBuf,
    healthy: bool,
}

impl FileSink {
    /// Open `path` for appending, creating it if missing.
    pub fn append(path: impl Into<PathBuf>) -> io::Result<Self> {
        Self::open(path.into(), true)
    }

    /// Open `path` truncated.
    pub fn create(path: impl Into<PathBuf>) -> io::Result<Self> {
        Self::open(path.into(), false)
    }

    fn open(path: PathBuf, append: bool) -> io::Result<Self> {
        let mut options = OpenOptions::new();
        options.write(true).create(true);
        if append {
            options.append(true);
        } else {
            options.truncate(true);
        }
        let file = options.open(&path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path,
            healthy: true,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn track<T>(&mut self, result: io::Result<T>) -> io::Result<T> {
        if result.is_err() {
            self.healthy = false;
        }
        result
    }
}

impl Sink for FileSink {
    fn write_line(&mut self, line: &str) -> io::Result<()> {
        let result = writeln!(self.writer, "{line}");
        self.track(result)
    }

    fn flush(&mut self) -> io::Result<()> {
        let result = self.writer.flush();
        self.track(result)
    }

    fn is_ready(&self) -> bool {
        self.healthy
    }
}

/// Writes lines to stdout.
pub struct ConsoleSink {
    out: Stdout,
}

impl ConsoleSink {
    pub fn new() -> Self {
        Self { out: io::stdout() }
    }
}

impl Default for ConsoleSink {
    fn default() -> Self {
        Self::new()
    }
}

impl Sink for ConsoleSink {
    fn write_line(&mut self, line: &str) -> io::Result<()> {
        writeln!(self.out.lock(), "{line}")
    }

    fn flush(&mut self) -> io::Result<()> {
        self.out.lock().flush()
    }

    fn is_ready(&self) -> bool {
        true
    }
}

/// In-memory sink. Cloning shares the underlying line store, so a test can
/// keep one handle while the drain worker owns the other.
#[derive(Clone)]
pub struct MemorySink {
    lines: Arc<Mutex<Vec<String>>>,
    ready: Arc<AtomicBool>,
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySink {
    pub fn new() -> Self {
        Self {
            lines: Arc::new(Mutex::new(Vec::new())),
            ready: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lines.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.lock().is_empty()
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Relaxed);
    }
}

impl Sink for MemorySink {
    fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.lines.lock().push(line.to_string());
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }
}

/// Build the configured sink.
pub fn build_sink(cfg: &Config) -> Result<Box<dyn Sink>> {
    match cfg.sink {
        SinkKind::File => {
            let sink = FileSink::append(&cfg.sink_path)
                .with_context(|| format!("opening sink file {}", cfg.sink_path.display()))?;
            Ok(Box::new(sink))
        }
        SinkKind::Console => Ok(Box::new(ConsoleSink::new())),
    }
}
