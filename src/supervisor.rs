//! Pipeline supervisor: owns the shared buffers, the intake pool, and the
//! drain worker, and starts/stops them in the order the hand-off requires.

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::Config;
use crate::dead_letter::DeadLetterBuffer;
use crate::drain::DrainWorker;
use crate::intake::{BusFactory, IntakePool};
use crate::priority_buffer::PriorityBuffer;
use crate::sink::Sink;

/// Control surface for the whole pipeline. The pipeline runs once: after
/// `stop`, a further `start` is a no-op.
pub struct Supervisor {
    priority: Arc<PriorityBuffer>,
    dead_letter: Arc<DeadLetterBuffer>,
    pool: IntakePool,
    drain: DrainWorker,
    sink: Option<Box<dyn Sink>>,
    running: bool,
}

impl Supervisor {
    pub fn new(cfg: &Config, bus_factory: BusFactory, sink: Box<dyn Sink>) -> Self {
        let priority = Arc::new(PriorityBuffer::new(cfg.priority_capacity_bytes));
        let dead_letter = Arc::new(DeadLetterBuffer::with_capacity_mb(cfg.dead_letter_capacity_mb));
        let pool = IntakePool::new(
            cfg.intake_workers,
            bus_factory,
            Arc::clone(&priority),
            Arc::clone(&dead_letter),
        );
        Self {
            priority,
            dead_letter,
            pool,
            drain: DrainWorker::new(),
            sink: Some(sink),
            running: false,
        }
    }

    /// Start the intake pool, then the drain worker. Idempotent.
    pub fn start(&mut self) {
        if self.running {
            return;
        }
        let Some(sink) = self.sink.take() else {
            warn!("supervisor: pipeline already ran, start ignored");
            return;
        };
        self.running = true;
        self.pool.start();
        self.drain
            .start(Arc::clone(&self.priority), Arc::clone(&self.dead_letter), sink);
        info!(
            "supervisor: pipeline started ({} intake workers)",
            self.pool.worker_count()
        );
    }

    /// Stop the pool so no producer is left, shut the priority buffer down
    /// to wake the drain, then stop the drain. Safe to call twice.
    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        self.pool.stop();
        self.priority.shutdown();
        self.drain.stop();
        self.running = false;
        info!("supervisor: pipeline stopped");
    }

    pub fn priority(&self) -> &Arc<PriorityBuffer> {
        &self.priority
    }

    pub fn dead_letter(&self) -> &Arc<DeadLetterBuffer> {
        &self.dead_letter
    }
}

impl Drop for Supervisor {
    // Explicit stop is the contract; this keeps a dropped pipeline from
    // leaking its threads.
    fn drop(&mut self) {
        self.stop();
    }
}
