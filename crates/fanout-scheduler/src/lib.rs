//! # Fanout Scheduler
//! One cooperative loop that wakes at the next campaign deadline.
//!
//! Scheduled campaigns sit in a min-heap keyed by `fire_at`. The loop
//! sleeps until the earliest deadline, fires the activation callback,
//! and re-arms. Inserting an earlier deadline wakes the loop via
//! `Notify`. Activation is idempotent on the callback side, so a
//! duplicate fire after a crash/reload is harmless.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// One armed deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Entry {
    fire_at: DateTime<Utc>,
    campaign_id: Uuid,
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.fire_at
            .cmp(&other.fire_at)
            .then_with(|| self.campaign_id.cmp(&other.campaign_id))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// The deadline scheduler. Shared between the producer side
/// (campaign creation) and the single consumer loop.
pub struct Scheduler {
    heap: Mutex<BinaryHeap<Reverse<Entry>>>,
    notify: Notify,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
            notify: Notify::new(),
        }
    }

    /// Arm a campaign deadline. Wakes the loop if this deadline is now
    /// the earliest.
    pub async fn schedule(&self, campaign_id: Uuid, fire_at: DateTime<Utc>) {
        let mut heap = self.heap.lock().await;
        heap.push(Reverse(Entry {
            fire_at,
            campaign_id,
        }));
        tracing::info!(%campaign_id, %fire_at, "campaign scheduled");
        drop(heap);
        self.notify.notify_one();
    }

    /// Earliest armed deadline, if any.
    pub async fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.heap.lock().await.peek().map(|Reverse(e)| e.fire_at)
    }

    /// Number of armed deadlines.
    pub async fn armed(&self) -> usize {
        self.heap.lock().await.len()
    }

    /// Pop every entry whose deadline has passed.
    async fn take_due(&self, now: DateTime<Utc>) -> Vec<Uuid> {
        let mut heap = self.heap.lock().await;
        let mut due = Vec::new();
        while let Some(&Reverse(e)) = heap.peek() {
            if e.fire_at > now {
                break;
            }
            heap.pop();
            due.push(e.campaign_id);
        }
        due
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawn the scheduler loop. `activate` is called once per fired
/// campaign; it must tolerate already-active campaigns (idempotence is
/// the activation side's contract).
pub fn spawn_scheduler<F, Fut>(scheduler: Arc<Scheduler>, activate: F) -> JoinHandle<()>
where
    F: Fn(Uuid) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        tracing::info!("Scheduler loop started");
        loop {
            let now = Utc::now();
            for campaign_id in scheduler.take_due(now).await {
                tracing::info!(%campaign_id, "campaign deadline reached");
                activate(campaign_id).await;
            }

            match scheduler.next_deadline().await {
                Some(at) => {
                    let wait = (at - Utc::now())
                        .to_std()
                        .unwrap_or(std::time::Duration::ZERO);
                    tokio::select! {
                        _ = tokio::time::sleep(wait) => {}
                        _ = scheduler.notify.notified() => {}
                    }
                }
                None => scheduler.notify.notified().await,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_due_entries_pop_in_deadline_order() {
        let s = Scheduler::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let now = Utc::now();
        s.schedule(b, now - chrono::Duration::seconds(1)).await;
        s.schedule(a, now - chrono::Duration::seconds(2)).await;

        let due = s.take_due(now).await;
        assert_eq!(due, vec![a, b]);
        assert_eq!(s.armed().await, 0);
    }

    #[tokio::test]
    async fn test_future_entries_stay_armed() {
        let s = Scheduler::new();
        s.schedule(Uuid::new_v4(), Utc::now() + chrono::Duration::hours(1))
            .await;
        assert!(s.take_due(Utc::now()).await.is_empty());
        assert_eq!(s.armed().await, 1);
    }

    #[tokio::test]
    async fn test_loop_fires_near_deadline() {
        let s = Arc::new(Scheduler::new());
        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = fired.clone();
        let handle = spawn_scheduler(s.clone(), move |_id| {
            let fired = fired2.clone();
            async move {
                fired.fetch_add(1, Ordering::SeqCst);
            }
        });

        s.schedule(Uuid::new_v4(), Utc::now() + chrono::Duration::milliseconds(30))
            .await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        handle.abort();
    }

    #[tokio::test]
    async fn test_earlier_insert_wakes_loop() {
        let s = Arc::new(Scheduler::new());
        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = fired.clone();
        let handle = spawn_scheduler(s.clone(), move |_id| {
            let fired = fired2.clone();
            async move {
                fired.fetch_add(1, Ordering::SeqCst);
            }
        });

        // Loop is parked on a one-hour deadline; the later insert is due
        // almost immediately and must preempt it.
        s.schedule(Uuid::new_v4(), Utc::now() + chrono::Duration::hours(1))
            .await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        s.schedule(Uuid::new_v4(), Utc::now() + chrono::Duration::milliseconds(20))
            .await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        handle.abort();
    }
}
