//! Drain worker: the single consumer that merges the priority stream,
//! opportunistically drains the dead-letter buffer, tags late records,
//! and writes through the sink.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{DateTime, Local};
use tracing::{error, info, warn};

use crate::dead_letter::DeadLetterBuffer;
use crate::priority_buffer::{PriorityBuffer, DEFAULT_OVERLOAD_THRESHOLD};
use crate::record::Record;
use crate::sink::Sink;

/// Records dequeued from the priority buffer per lock acquisition.
pub const DRAIN_BATCH_SIZE: usize = 20;

/// A record lagging the latest seen timestamp by more than this is tagged.
pub const BACKLOG_THRESHOLD_MS: i64 = 200;

/// Pause before re-probing a sink that is not ready.
pub const SINK_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Prefix for late records off the primary stream.
pub const BACKLOG_TAG: &str = "[BACKLOG]";

/// Prefix for records recovered from the dead-letter buffer.
pub const DEAD_LETTER_TAG: &str = "[BACKLOG.DLQ]";

/// The drain consumer thread. Relies on the priority buffer's `shutdown`
/// to break out of a blocking wait, so stop it only after the buffer has
/// been shut down (the supervisor enforces this order).
pub struct DrainWorker {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl DrainWorker {
    pub fn new() -> Self {
        Self {
            stop: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    pub fn start(
        &mut self,
        priority: Arc<PriorityBuffer>,
        dead_letter: Arc<DeadLetterBuffer>,
        sink: Box<dyn Sink>,
    ) {
        self.stop.store(false, Ordering::Relaxed);
        let stop = Arc::clone(&self.stop);
        let spawned = thread::Builder::new()
            .name("drain".to_string())
            .spawn(move || {
                drain_loop(&priority, &dead_letter, sink, &stop);
            });
        match spawned {
            Ok(handle) => self.handle = Some(handle),
            Err(err) => error!("drain: failed to spawn thread: {err}"),
        }
    }

    pub fn signal_stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    /// Signal and join. Safe to call when never started or already stopped.
    pub fn stop(&mut self) {
        self.signal_stop();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("drain: worker panicked");
            }
        }
    }
}

impl Default for DrainWorker {
    fn default() -> Self {
        Self::new()
    }
}

fn drain_loop(
    priority: &PriorityBuffer,
    dead_letter: &DeadLetterBuffer,
    mut sink: Box<dyn Sink>,
    stop: &AtomicBool,
) {
    let mut latest_seen: Option<DateTime<Local>> = None;
    info!("drain: started");

    while !stop.load(Ordering::Relaxed) || !priority.is_empty() {
        if !sink.is_ready() {
            if stop.load(Ordering::Relaxed) {
                break;
            }
            thread::sleep(SINK_RETRY_DELAY);
            continue;
        }

        let batch = priority.dequeue_batch(DRAIN_BATCH_SIZE);
        // An empty batch means the buffer was shut down and fully drained.
        if batch.is_empty() {
            break;
        }

        for record in &batch {
            emit(sink.as_mut(), &mut latest_seen, record);
        }

        // Only consume the secondary stream while the primary is healthy.
        if !priority.is_overloaded(DEFAULT_OVERLOAD_THRESHOLD) && !dead_letter.is_empty() {
            if let Some(dead) = dead_letter.dequeue() {
                let line = format!("{DEAD_LETTER_TAG}{}", dead.render());
                if let Err(err) = sink.write_line(&line) {
                    warn!("drain: sink write failed: {err}");
                }
            }
        }

        if let Err(err) = sink.flush() {
            warn!("drain: sink flush failed: {err}");
        }
    }

    if let Err(err) = sink.flush() {
        warn!("drain: final flush failed: {err}");
    }
    info!("drain: exited");
}

/// Write one primary-stream record, tagging it when it lags the latest
/// timestamp already delivered. `latest_seen` starts unset so the first
/// record can never be tagged.
fn emit(sink: &mut dyn Sink, latest_seen: &mut Option<DateTime<Local>>, record: &Record) {
    let ts = record.timestamp();
    let late = latest_seen.is_some_and(|latest| {
        latest.signed_duration_since(ts) > chrono::Duration::milliseconds(BACKLOG_THRESHOLD_MS)
    });

    let line = if late {
        format!("{BACKLOG_TAG}{}", record.render())
    } else {
        record.render()
    };
    if let Err(err) = sink.write_line(&line) {
        warn!("drain: sink write failed: {err}");
    }

    if latest_seen.map_or(true, |latest| latest < ts) {
        *latest_seen = Some(ts);
    }
}
