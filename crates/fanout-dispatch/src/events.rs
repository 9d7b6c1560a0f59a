//! Event publishing: per-campaign broadcast streams for dashboards.
//!
//! Delivery is best-effort and at-least-once. A subscriber that lags
//! past the buffer misses events and should resync with a direct
//! snapshot read instead of replaying.
//!
//! Workers record counter transitions and publish outside the
//! aggregator lock, so two workers can arrive here in the opposite
//! order they recorded in. Each stream therefore remembers the highest
//! `done()` it has seen and drops anything older: the stream a
//! subscriber observes is monotonic even though arrival order is not.

use std::collections::HashMap;

use tokio::sync::{broadcast, Mutex};
use uuid::Uuid;

use fanout_core::config::EventsConfig;
use fanout_core::types::{Event, EventKind, ProgressSnapshot};

struct Stream {
    tx: broadcast::Sender<Event>,
    /// Highest `done()` observed for this campaign.
    last_done: u64,
}

/// Fans campaign events out to however many subscribers are attached.
pub struct EventPublisher {
    channels: Mutex<HashMap<Uuid, Stream>>,
    stride: u64,
    buffer: usize,
}

impl EventPublisher {
    pub fn new(config: &EventsConfig) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            stride: config.progress_stride.max(1),
            buffer: config.buffer.max(1),
        }
    }

    /// Attach a subscriber to a campaign's event stream. Dropping the
    /// receiver unsubscribes. The caller is responsible for only
    /// handing out streams for campaigns it is tracking.
    pub async fn subscribe(&self, campaign_id: Uuid) -> broadcast::Receiver<Event> {
        let mut channels = self.channels.lock().await;
        let buffer = self.buffer;
        channels
            .entry(campaign_id)
            .or_insert_with(|| Stream {
                tx: broadcast::channel(buffer).0,
                last_done: 0,
            })
            .tx
            .subscribe()
    }

    /// Drop a campaign's stream (after its terminal event is out).
    pub async fn close(&self, campaign_id: Uuid) {
        self.channels.lock().await.remove(&campaign_id);
    }

    pub async fn publish_started(&self, campaign_id: Uuid, snapshot: ProgressSnapshot) {
        let mut channels = self.channels.lock().await;
        if let Some(stream) = channels.get_mut(&campaign_id) {
            stream.last_done = stream.last_done.max(snapshot.done());
            let _ = stream
                .tx
                .send(Event::now(campaign_id, EventKind::Started, snapshot));
        }
    }

    /// Emit a `progress` event if this snapshot advances the stream and
    /// lands on the stride. The final snapshot always emits; stale
    /// snapshots (overtaken by a more advanced one) never do.
    pub async fn publish_progress(&self, campaign_id: Uuid, snapshot: ProgressSnapshot) {
        let mut channels = self.channels.lock().await;
        let Some(stream) = channels.get_mut(&campaign_id) else {
            return;
        };
        let done = snapshot.done();
        if done <= stream.last_done {
            return;
        }
        stream.last_done = done;
        if snapshot.is_done() || done % self.stride == 0 {
            let _ = stream
                .tx
                .send(Event::now(campaign_id, EventKind::Progress, snapshot));
        }
    }

    pub async fn publish_terminal(
        &self,
        campaign_id: Uuid,
        kind: EventKind,
        snapshot: ProgressSnapshot,
    ) {
        let channels = self.channels.lock().await;
        if let Some(stream) = channels.get(&campaign_id) {
            // A send error only means nobody is listening right now.
            let _ = stream.tx.send(Event::now(campaign_id, kind, snapshot));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(stride: u64) -> EventsConfig {
        EventsConfig {
            progress_stride: stride,
            buffer: 64,
        }
    }

    fn snap(total: u64, sent: u64) -> ProgressSnapshot {
        ProgressSnapshot {
            total,
            sent,
            failed: 0,
            skipped: 0,
            pending: total - sent,
        }
    }

    #[tokio::test]
    async fn test_subscriber_sees_full_stream() {
        let p = EventPublisher::new(&config(1));
        let cid = Uuid::new_v4();
        let mut rx = p.subscribe(cid).await;

        p.publish_started(cid, snap(2, 0)).await;
        p.publish_progress(cid, snap(2, 1)).await;
        p.publish_progress(cid, snap(2, 2)).await;
        p.publish_terminal(cid, EventKind::Completed, snap(2, 2)).await;

        let kinds: Vec<EventKind> = [
            rx.recv().await.unwrap().kind,
            rx.recv().await.unwrap().kind,
            rx.recv().await.unwrap().kind,
            rx.recv().await.unwrap().kind,
        ]
        .into();
        assert_eq!(
            kinds,
            vec![
                EventKind::Started,
                EventKind::Progress,
                EventKind::Progress,
                EventKind::Completed
            ]
        );
    }

    #[tokio::test]
    async fn test_overtaken_snapshot_is_dropped() {
        let p = EventPublisher::new(&config(1));
        let cid = Uuid::new_v4();
        let mut rx = p.subscribe(cid).await;

        // Two workers raced: the done=2 snapshot reached the publisher
        // before the done=1 one. The stale snapshot must not emit.
        p.publish_progress(cid, snap(3, 2)).await;
        p.publish_progress(cid, snap(3, 1)).await;
        p.publish_progress(cid, snap(3, 3)).await;

        assert_eq!(rx.recv().await.unwrap().snapshot.sent, 2);
        assert_eq!(rx.recv().await.unwrap().snapshot.sent, 3);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_duplicate_done_count_is_dropped() {
        let p = EventPublisher::new(&config(1));
        let cid = Uuid::new_v4();
        let mut rx = p.subscribe(cid).await;

        p.publish_progress(cid, snap(3, 1)).await;
        p.publish_progress(cid, snap(3, 1)).await;

        assert_eq!(rx.recv().await.unwrap().snapshot.sent, 1);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_stride_skips_intermediate_progress() {
        let p = EventPublisher::new(&config(2));
        let cid = Uuid::new_v4();
        let mut rx = p.subscribe(cid).await;

        // done = 1 (skipped), 2 (emitted), 3 = final (emitted).
        p.publish_progress(cid, snap(3, 1)).await;
        p.publish_progress(cid, snap(3, 2)).await;
        p.publish_progress(cid, snap(3, 3)).await;

        assert_eq!(rx.recv().await.unwrap().snapshot.sent, 2);
        assert_eq!(rx.recv().await.unwrap().snapshot.sent, 3);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_fine() {
        let p = EventPublisher::new(&config(1));
        let cid = Uuid::new_v4();
        // No channel entry at all: silently dropped.
        p.publish_started(cid, snap(1, 0)).await;
        // Channel exists but the only receiver is gone.
        let rx = p.subscribe(cid).await;
        drop(rx);
        p.publish_progress(cid, snap(1, 1)).await;
    }

    #[tokio::test]
    async fn test_events_are_per_campaign() {
        let p = EventPublisher::new(&config(1));
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut rx_a = p.subscribe(a).await;
        let _rx_b = p.subscribe(b).await;

        p.publish_started(b, snap(1, 0)).await;
        p.publish_started(a, snap(2, 0)).await;

        let ev = rx_a.recv().await.unwrap();
        assert_eq!(ev.campaign_id, a);
        assert_eq!(ev.snapshot.total, 2);
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_close_drops_the_stream_entry() {
        let p = EventPublisher::new(&config(1));
        let cid = Uuid::new_v4();
        let mut rx = p.subscribe(cid).await;
        p.publish_started(cid, snap(1, 0)).await;
        p.close(cid).await;

        // Buffered events drain, then the stream reports closed.
        assert_eq!(rx.recv().await.unwrap().kind, EventKind::Started);
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
    }
}
