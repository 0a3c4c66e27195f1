//! Intake workers: pull raw frames off the bus, decode and parse them,
//! and route records between the priority and dead-letter buffers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{error, info, warn};

use crate::bus::{Bus, BusError};
use crate::dead_letter::DeadLetterBuffer;
use crate::level::LogLevel;
use crate::priority_buffer::PriorityBuffer;
use crate::record::Record;

/// Staged records are flushed to the priority buffer at this count.
pub const FLUSH_BATCH_SIZE: usize = 50;

/// Records at or below INFO are demoted to the dead-letter buffer while
/// the priority buffer is deeper than this. A depth signal complements the
/// byte budget: it catches bursts of many small low-value records.
pub const LOW_PRIORITY_DIVERT_DEPTH: usize = 1000;

/// Bounded bus receive; on timeout the worker re-checks its stop flag.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(1);

/// Opens one bus handle per worker index.
pub type BusFactory = Box<dyn Fn(usize) -> anyhow::Result<Box<dyn Bus>> + Send + Sync>;

/// Decode a raw frame to text. Frames with an even byte length of at
/// least 2 are taken as UTF-16 LE and stripped of trailing NUL/space;
/// anything else is taken as UTF-8 with trailing NULs stripped. Empty
/// payloads decode to `None` and are discarded.
pub fn decode_frame(frame: &[u8]) -> Option<String> {
    if frame.is_empty() {
        return None;
    }
    let mut text = if frame.len() >= 2 && frame.len() % 2 == 0 {
        let wide: Vec<u16> = frame
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        let mut text = String::from_utf16_lossy(&wide);
        while text.ends_with('\0') || text.ends_with(' ') {
            text.pop();
        }
        text
    } else {
        String::from_utf8_lossy(frame).into_owned()
    };
    while text.ends_with('\0') {
        text.pop();
    }
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// One intake consumer: a thread, its cancel flag, and a name for logs.
pub struct IntakeWorker {
    name: String,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl IntakeWorker {
    pub fn new(index: usize) -> Self {
        Self {
            name: format!("intake-{index}"),
            stop: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Launch the worker thread. The worker must be stopped explicitly;
    /// dropping a started worker without stopping it leaks the thread.
    pub fn start(
        &mut self,
        bus: Box<dyn Bus>,
        priority: Arc<PriorityBuffer>,
        dead_letter: Arc<DeadLetterBuffer>,
    ) {
        self.stop.store(false, Ordering::Relaxed);
        let stop = Arc::clone(&self.stop);
        let name = self.name.clone();
        let spawned = thread::Builder::new().name(self.name.clone()).spawn(move || {
            intake_loop(&name, bus, &priority, &dead_letter, &stop);
        });
        match spawned {
            Ok(handle) => self.handle = Some(handle),
            Err(err) => error!("{}: failed to spawn intake thread: {err}", self.name),
        }
    }

    /// Request a cooperative stop; observed at the next loop boundary.
    pub fn signal_stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    /// Wait for the worker thread to finish. Safe to call when never
    /// started or already joined.
    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("{}: intake worker panicked", self.name);
            }
        }
    }
}

fn intake_loop(
    name: &str,
    mut bus: Box<dyn Bus>,
    priority: &PriorityBuffer,
    dead_letter: &DeadLetterBuffer,
    stop: &AtomicBool,
) {
    let mut staged: Vec<Record> = Vec::with_capacity(FLUSH_BATCH_SIZE);
    info!("{name}: started");

    while !stop.load(Ordering::Relaxed) {
        let frame = match bus.recv(RECV_TIMEOUT) {
            Ok(frame) => frame,
            Err(BusError::Timeout) => continue,
            Err(err) if err.is_fatal() => {
                error!("{name}: fatal bus error, exiting: {err}");
                break;
            }
            Err(err) => {
                warn!("{name}: transient bus error: {err}");
                continue;
            }
        };

        let Some(line) = decode_frame(&frame) else {
            continue;
        };
        let record = match Record::parse(&line) {
            Ok(record) => record,
            Err(err) => {
                warn!("{name}: dropping frame: {err}");
                continue;
            }
        };

        // Demote low-value records while the primary is deep.
        if record.level() <= LogLevel::Info && priority.size() > LOW_PRIORITY_DIVERT_DEPTH {
            dead_letter.enqueue(record);
            continue;
        }

        staged.push(record);
        if staged.len() >= FLUSH_BATCH_SIZE {
            flush_staged(name, priority, &mut staged);
        }
    }

    if !staged.is_empty() {
        info!("{name}: flushing {} leftover records", staged.len());
        flush_staged(name, priority, &mut staged);
    }
    info!("{name}: exited");
}

fn flush_staged(name: &str, priority: &PriorityBuffer, staged: &mut Vec<Record>) {
    let total = staged.len();
    let admitted = priority.enqueue_batch(std::mem::take(staged));
    if admitted < total {
        warn!("{name}: priority buffer rejected {} records", total - admitted);
    }
}

/// Owns and lifecycle-manages the intake worker set. All workers share
/// the same two buffers; each gets its own bus handle from the factory.
pub struct IntakePool {
    priority: Arc<PriorityBuffer>,
    dead_letter: Arc<DeadLetterBuffer>,
    bus_factory: BusFactory,
    count: usize,
    workers: Vec<IntakeWorker>,
    running: bool,
}

impl IntakePool {
    pub fn new(
        count: usize,
        bus_factory: BusFactory,
        priority: Arc<PriorityBuffer>,
        dead_letter: Arc<DeadLetterBuffer>,
    ) -> Self {
        Self {
            priority,
            dead_letter,
            bus_factory,
            count,
            workers: Vec::new(),
            running: false,
        }
    }

    /// Launch all workers. Idempotent: a second call while running is a
    /// no-op. A worker whose bus fails to open is logged and skipped.
    pub fn start(&mut self) {
        if self.running {
            return;
        }
        self.running = true;
        for index in 0..self.count {
            let bus = match (self.bus_factory)(index) {
                Ok(bus) => bus,
                Err(err) => {
                    error!("intake-{index}: failed to open bus: {err:?}");
                    continue;
                }
            };
            let mut worker = IntakeWorker::new(index);
            worker.start(bus, Arc::clone(&self.priority), Arc::clone(&self.dead_letter));
            self.workers.push(worker);
        }
    }

    /// Signal every worker, then wait for each to finish. Safe to call
    /// more than once.
    pub fn stop(&mut self) {
        for worker in &self.workers {
            worker.signal_stop();
        }
        for worker in &mut self.workers {
            worker.join();
        }
        self.workers.clear();
        self.running = false;
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}
