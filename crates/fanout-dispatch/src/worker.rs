//! Per-channel worker pool.
//!
//! A small fixed number of workers per channel pull tasks from the
//! channel's intake queue, acquire a pacing grant from the rate
//! governor, sleep out the grant delay, then hand the send to the
//! channel adapter and classify the result. Failures route through the
//! retry policy: transient outcomes with attempts left go back into the
//! queue's deferred tier, everything else goes terminal.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;

use fanout_core::error::FanoutError;
use fanout_core::traits::ChannelAdapter;
use fanout_core::types::{ChannelKind, SendOutcome, SendTask, TaskState};

use crate::campaign::CampaignManager;
use crate::progress::TerminalKind;
use crate::retry::{Disposition, RetryPolicy};

/// Spawn the worker pool for one channel. Returns a handle per worker;
/// workers exit once `shutdown` flips to true and their queue drains of
/// immediately-runnable tasks.
pub fn spawn_channel_workers(
    manager: Arc<CampaignManager>,
    channel: ChannelKind,
    adapter: Arc<dyn ChannelAdapter>,
    shutdown: watch::Receiver<bool>,
) -> Vec<tokio::task::JoinHandle<()>> {
    let count = manager.dispatch_config().workers_per_channel.max(1);
    (0..count)
        .map(|n| {
            let worker = Worker {
                manager: Arc::clone(&manager),
                channel,
                adapter: Arc::clone(&adapter),
                retry: RetryPolicy::new(manager.retry_config().clone()),
            };
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                tracing::debug!(%channel, worker = n, "worker started");
                worker.run(shutdown).await;
                tracing::debug!(%channel, worker = n, "worker stopped");
            })
        })
        .collect()
}

struct Worker {
    manager: Arc<CampaignManager>,
    channel: ChannelKind,
    adapter: Arc<dyn ChannelAdapter>,
    retry: RetryPolicy,
}

impl Worker {
    async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let queue = self.manager.queue(self.channel);
        let idle = Duration::from_millis(self.manager.dispatch_config().idle_poll_ms.max(10));
        loop {
            if *shutdown.borrow() {
                return;
            }
            let Some(task) = queue.pop().await else {
                // Nothing runnable right now. Wake on shutdown too.
                tokio::select! {
                    _ = tokio::time::sleep(idle) => {}
                    _ = shutdown.changed() => {}
                }
                continue;
            };
            self.dispatch(task, &mut shutdown).await;
        }
    }

    /// Run one task through governance, the adapter and classification.
    async fn dispatch(&self, mut task: SendTask, shutdown: &mut watch::Receiver<bool>) {
        let Some(ctx) = self.manager.dispatch_context(task.campaign_id).await else {
            tracing::warn!(task_id = %task.id, "task for unknown campaign dropped");
            return;
        };
        // Checked before spending a governor grant on a dead campaign.
        if ctx.cancelled {
            self.manager
                .complete_task(&task, TerminalKind::Skipped, None)
                .await;
            return;
        }

        let grant = match self.manager.governor().try_acquire(&ctx.key).await {
            Ok(grant) => grant,
            Err(FanoutError::CooldownActive { until }) => {
                // Park and recheck; workers never block on a cooldown.
                let recheck = Duration::from_millis(
                    self.manager.dispatch_config().governor_recheck_ms.max(100),
                );
                let at = (Utc::now() + chrono::Duration::from_std(recheck).unwrap_or_default())
                    .min(until.max(Utc::now()));
                tracing::debug!(key = %ctx.key, task_id = %task.id, %until, "send parked by governor");
                self.manager.defer_task(self.channel, task, at).await;
                return;
            }
            Err(e) => {
                tracing::error!(key = %ctx.key, "governor error: {e}");
                self.manager
                    .complete_task(&task, TerminalKind::Failed, Some(e.to_string()))
                    .await;
                return;
            }
        };

        // The grant delay is what spaces sends apart. Shutdown aborts
        // the wait and requeues the task untouched.
        tokio::select! {
            _ = tokio::time::sleep(grant.delay) => {}
            _ = shutdown.changed() => {
                self.manager.defer_task(self.channel, task, Utc::now()).await;
                return;
            }
        }

        task.state = TaskState::InFlight;
        task.attempts += 1;
        let outcome = match self.adapter.send(&task.recipient, &ctx.content).await {
            Ok(outcome) => outcome,
            Err(e) => {
                // Adapter faults are internal bugs, not recipient
                // problems. Surface loudly, then treat as transient so
                // the recipient still gets its retries.
                tracing::error!(
                    channel = %self.channel,
                    task_id = %task.id,
                    "adapter failure: {e}"
                );
                SendOutcome::Transient {
                    detail: format!("internal: {e}"),
                }
            }
        };

        // A cancellation that landed while the send was in flight: the
        // attempt's own outcome stands, but no retries are spawned.
        let cancelled = self.manager.is_cancelled(task.campaign_id).await;
        match self.retry.classify(&outcome, task.attempts) {
            Disposition::Succeed { message_id } => {
                tracing::debug!(
                    channel = %self.channel,
                    recipient = %task.recipient,
                    %message_id,
                    "message delivered"
                );
                self.manager
                    .complete_task(&task, TerminalKind::Sent, None)
                    .await;
            }
            Disposition::Retry { delay, detail } if !cancelled => {
                tracing::debug!(
                    channel = %self.channel,
                    recipient = %task.recipient,
                    attempts = task.attempts,
                    delay_ms = delay.as_millis() as u64,
                    "transient failure, retry scheduled: {detail}"
                );
                let at = Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default();
                self.manager.retry_task(task, at, detail).await;
            }
            Disposition::Retry { detail, .. } | Disposition::Fail { detail } => {
                tracing::warn!(
                    channel = %self.channel,
                    recipient = %task.recipient,
                    attempts = task.attempts,
                    "send failed: {detail}"
                );
                self.manager
                    .complete_task(&task, TerminalKind::Failed, Some(detail))
                    .await;
            }
        }
    }
}
