//! Work distribution primitives for the batch worker pool

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam::channel::{self, Receiver};
use serde::Serialize;
use tracing::{debug, info};

use super::task::ImageTask;

/// Default pool size: 80% of logical CPUs, at least one
pub fn default_worker_count() -> usize {
    ((num_cpus::get() as f64 * 0.8).floor() as usize).max(1)
}

/// How a batch ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BatchStatus {
    Completed,
    Cancelled,
    TimedOut,
}

const RUNNING: u8 = 0;
const CANCELLED: u8 = 1;
const TIMED_OUT: u8 = 2;

/// Batch-wide stop signal, checked by workers between tasks
///
/// Clones share state. The first stop reason wins.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    state: Arc<AtomicU8>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop dispatching new tasks
    pub fn cancel(&self) {
        if self
            .state
            .compare_exchange(RUNNING, CANCELLED, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            info!("Cancellation requested, finishing in-flight tasks");
        }
    }

    /// Stop dispatching because the batch deadline passed
    pub fn time_out(&self) {
        if self
            .state
            .compare_exchange(RUNNING, TIMED_OUT, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            info!("Batch timeout reached, finishing in-flight tasks");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::SeqCst) != RUNNING
    }

    /// Final status implied by the token
    pub fn status(&self) -> BatchStatus {
        match self.state.load(Ordering::SeqCst) {
            CANCELLED => BatchStatus::Cancelled,
            TIMED_OUT => BatchStatus::TimedOut,
            _ => BatchStatus::Completed,
        }
    }

    /// Re-arm the token for another batch
    pub fn reset(&self) {
        self.state.store(RUNNING, Ordering::SeqCst);
    }
}

/// FIFO queue of tasks shared by all workers
///
/// Every task is handed to exactly one worker; tasks come out in the order
/// they were enumerated.
pub struct WorkQueue {
    receiver: Receiver<ImageTask>,
    dispatched: AtomicUsize,
    total: usize,
}

impl WorkQueue {
    /// Queue all tasks up front
    pub fn new(tasks: Vec<ImageTask>) -> Self {
        let total = tasks.len();
        let (sender, receiver) = channel::unbounded();
        for task in tasks {
            // The receiver is alive, so sending cannot fail
            let _ = sender.send(task);
        }
        debug!("Queued {} tasks", total);

        Self {
            receiver,
            dispatched: AtomicUsize::new(0),
            total,
        }
    }

    /// Take the next task, or `None` once the queue is drained
    pub fn next(&self) -> Option<ImageTask> {
        let task = self.receiver.try_recv().ok()?;
        self.dispatched.fetch_add(1, Ordering::Relaxed);
        Some(task)
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn dispatched(&self) -> usize {
        self.dispatched.load(Ordering::Relaxed)
    }

    /// Tasks never handed to a worker
    pub fn remaining(&self) -> usize {
        self.receiver.len()
    }
}
