//! Progress aggregation: live campaign counters and terminal detection.
//!
//! Each task gets exactly one terminal transition; the per-campaign
//! task-id set enforces it regardless of worker races. Counters are
//! monotonic and `sent + failed + skipped + pending == total` holds
//! after every update.

use std::collections::{HashMap, HashSet};

use tokio::sync::Mutex;
use uuid::Uuid;

use fanout_core::types::{ProgressSnapshot, SendTask, TaskState};

/// How a task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalKind {
    Sent,
    Failed,
    Skipped,
}

/// Result of recording one terminal transition.
#[derive(Debug, Clone, Copy)]
pub struct Transition {
    pub snapshot: ProgressSnapshot,
    /// True when this transition emptied the campaign's pending set.
    pub is_final: bool,
}

struct CampaignProgress {
    snapshot: ProgressSnapshot,
    terminal: HashSet<Uuid>,
}

/// Aggregates task outcomes into campaign counters.
pub struct ProgressAggregator {
    inner: Mutex<HashMap<Uuid, CampaignProgress>>,
}

impl ProgressAggregator {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Start tracking a campaign.
    pub async fn register(&self, campaign_id: Uuid, total: u64) {
        let mut inner = self.inner.lock().await;
        inner.entry(campaign_id).or_insert_with(|| CampaignProgress {
            snapshot: ProgressSnapshot::new(total),
            terminal: HashSet::new(),
        });
    }

    /// Restore tracking from persisted task rows: already-terminal
    /// tasks count immediately, the rest stay pending.
    pub async fn register_tasks(&self, campaign_id: Uuid, tasks: &[SendTask]) {
        let mut progress = CampaignProgress {
            snapshot: ProgressSnapshot::new(tasks.len() as u64),
            terminal: HashSet::new(),
        };
        for task in tasks {
            let kind = match task.state {
                TaskState::Succeeded => TerminalKind::Sent,
                TaskState::FailedPermanent => TerminalKind::Failed,
                TaskState::Skipped => TerminalKind::Skipped,
                _ => continue,
            };
            progress.terminal.insert(task.id);
            apply(&mut progress.snapshot, kind);
        }
        self.inner.lock().await.insert(campaign_id, progress);
    }

    /// Record a task's terminal transition. Returns `None` for unknown
    /// campaigns and for tasks already counted (double transitions are
    /// dropped, not double-counted).
    pub async fn record(
        &self,
        campaign_id: Uuid,
        task_id: Uuid,
        kind: TerminalKind,
    ) -> Option<Transition> {
        let mut inner = self.inner.lock().await;
        let progress = inner.get_mut(&campaign_id)?;
        if !progress.terminal.insert(task_id) {
            tracing::warn!(%campaign_id, %task_id, "duplicate terminal transition dropped");
            return None;
        }
        apply(&mut progress.snapshot, kind);
        debug_assert_eq!(
            progress.snapshot.sent
                + progress.snapshot.failed
                + progress.snapshot.skipped
                + progress.snapshot.pending,
            progress.snapshot.total
        );
        Some(Transition {
            snapshot: progress.snapshot,
            is_final: progress.snapshot.is_done(),
        })
    }

    /// Consistent point-in-time counters for a campaign.
    pub async fn snapshot(&self, campaign_id: Uuid) -> Option<ProgressSnapshot> {
        self.inner
            .lock()
            .await
            .get(&campaign_id)
            .map(|p| p.snapshot)
    }
}

impl Default for ProgressAggregator {
    fn default() -> Self {
        Self::new()
    }
}

fn apply(snapshot: &mut ProgressSnapshot, kind: TerminalKind) {
    snapshot.pending = snapshot.pending.saturating_sub(1);
    match kind {
        TerminalKind::Sent => snapshot.sent += 1,
        TerminalKind::Failed => snapshot.failed += 1,
        TerminalKind::Skipped => snapshot.skipped += 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_counters_balance_after_each_transition() {
        let agg = ProgressAggregator::new();
        let cid = Uuid::new_v4();
        agg.register(cid, 3).await;

        for kind in [TerminalKind::Sent, TerminalKind::Failed, TerminalKind::Sent] {
            let t = agg.record(cid, Uuid::new_v4(), kind).await.unwrap();
            let s = t.snapshot;
            assert_eq!(s.sent + s.failed + s.skipped + s.pending, s.total);
        }
        let s = agg.snapshot(cid).await.unwrap();
        assert_eq!((s.sent, s.failed, s.pending), (2, 1, 0));
    }

    #[tokio::test]
    async fn test_final_flag_fires_once() {
        let agg = ProgressAggregator::new();
        let cid = Uuid::new_v4();
        agg.register(cid, 2).await;

        let t1 = agg.record(cid, Uuid::new_v4(), TerminalKind::Sent).await.unwrap();
        assert!(!t1.is_final);
        let t2 = agg.record(cid, Uuid::new_v4(), TerminalKind::Sent).await.unwrap();
        assert!(t2.is_final);
    }

    #[tokio::test]
    async fn test_double_transition_is_dropped() {
        let agg = ProgressAggregator::new();
        let cid = Uuid::new_v4();
        let tid = Uuid::new_v4();
        agg.register(cid, 2).await;

        assert!(agg.record(cid, tid, TerminalKind::Sent).await.is_some());
        assert!(agg.record(cid, tid, TerminalKind::Failed).await.is_none());
        let s = agg.snapshot(cid).await.unwrap();
        assert_eq!((s.sent, s.failed, s.pending), (1, 0, 1));
    }

    #[tokio::test]
    async fn test_unknown_campaign_is_ignored() {
        let agg = ProgressAggregator::new();
        assert!(agg
            .record(Uuid::new_v4(), Uuid::new_v4(), TerminalKind::Sent)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_register_tasks_restores_counts() {
        let agg = ProgressAggregator::new();
        let cid = Uuid::new_v4();
        let mut tasks: Vec<SendTask> = (0..4).map(|i| SendTask::new(cid, format!("r{i}"))).collect();
        tasks[0].state = TaskState::Succeeded;
        tasks[1].state = TaskState::FailedPermanent;

        agg.register_tasks(cid, &tasks).await;
        let s = agg.snapshot(cid).await.unwrap();
        assert_eq!((s.sent, s.failed, s.pending), (1, 1, 2));

        // The restored terminals still refuse double counting.
        assert!(agg.record(cid, tasks[0].id, TerminalKind::Sent).await.is_none());
    }
}
