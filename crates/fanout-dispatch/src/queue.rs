//! Per-channel intake queue feeding the worker pool.
//!
//! Two tiers: a FIFO of ready tasks (admission order is recipient-list
//! order) and a deferred heap keyed by `next_eligible` for backoff and
//! governor rechecks. `pop` promotes due deferred tasks first, then
//! hands out exactly one task per call. That transfer is the ownership
//! boundary between the queue and a worker.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use fanout_core::types::SendTask;

struct Deferred {
    at: DateTime<Utc>,
    /// Tie-breaker preserving defer order for equal deadlines.
    seq: u64,
    task: SendTask,
}

impl PartialEq for Deferred {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}
impl Eq for Deferred {}
impl Ord for Deferred {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.at.cmp(&other.at).then_with(|| self.seq.cmp(&other.seq))
    }
}
impl PartialOrd for Deferred {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

struct QueueState {
    ready: VecDeque<SendTask>,
    deferred: BinaryHeap<Reverse<Deferred>>,
    seq: u64,
}

/// A channel's intake queue.
pub struct IntakeQueue {
    inner: Mutex<QueueState>,
}

impl IntakeQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueState {
                ready: VecDeque::new(),
                deferred: BinaryHeap::new(),
                seq: 0,
            }),
        }
    }

    /// Admit tasks in order (campaign activation).
    pub async fn push_all(&self, tasks: Vec<SendTask>) {
        let mut state = self.inner.lock().await;
        for task in tasks {
            state.ready.push_back(task);
        }
    }

    /// Park a task until `at` (retry backoff or governor recheck).
    pub async fn defer(&self, task: SendTask, at: DateTime<Utc>) {
        let mut state = self.inner.lock().await;
        let seq = state.seq;
        state.seq += 1;
        state.deferred.push(Reverse(Deferred { at, seq, task }));
    }

    /// Hand the next runnable task to the calling worker. Due deferred
    /// tasks are promoted ahead of the FIFO so retries are not starved.
    pub async fn pop(&self) -> Option<SendTask> {
        let now = Utc::now();
        let mut state = self.inner.lock().await;
        if let Some(Reverse(d)) = state.deferred.peek() {
            if d.at <= now {
                let Reverse(d) = state.deferred.pop()?;
                return Some(d.task);
            }
        }
        state.ready.pop_front()
    }

    /// Tasks waiting in either tier.
    pub async fn len(&self) -> usize {
        let state = self.inner.lock().await;
        state.ready.len() + state.deferred.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for IntakeQueue {
    fn default() -> Self {
        Self::new()
    }
}
