//! Campaign manager — owns campaign lifecycle from creation to terminal
//! state.
//!
//! Campaigns are mutated only through this type: creation validates and
//! stages tasks, activation admits them to the channel's intake queue,
//! workers report outcomes back through [`CampaignManager::complete_task`]
//! and [`CampaignManager::retry_task`], and finalization runs exactly
//! once when the last task goes terminal.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, Mutex};
use uuid::Uuid;

use fanout_core::config::FanoutConfig;
use fanout_core::error::{FanoutError, Result};
use fanout_core::types::{
    Campaign, CampaignMode, CampaignState, ChannelKind, Event, EventKind, MessageContent,
    ProgressSnapshot, SendTask, TaskState,
};
use fanout_governor::{GovernorKey, RateGovernor};
use fanout_scheduler::Scheduler;

use crate::events::EventPublisher;
use crate::progress::{ProgressAggregator, TerminalKind};
use crate::queue::IntakeQueue;
use crate::store::CampaignStore;

/// Everything a caller supplies to create a campaign. Recipients arrive
/// already resolved and deduplicated from the contacts subsystem.
#[derive(Debug, Clone)]
pub struct CampaignSpec {
    pub channel: ChannelKind,
    pub account_id: String,
    pub content: MessageContent,
    pub recipients: Vec<String>,
    pub mode: CampaignMode,
}

/// What a worker needs to dispatch one task.
#[derive(Debug, Clone)]
pub struct DispatchContext {
    pub content: MessageContent,
    pub key: GovernorKey,
    pub cancelled: bool,
}

struct CampaignEntry {
    campaign: Campaign,
    /// Tasks created at campaign creation, waiting for activation.
    staged: Vec<SendTask>,
    /// All task rows, updated on terminal transitions for persistence.
    tasks: Vec<SendTask>,
}

/// Top-level orchestrator. One instance serves all channels.
pub struct CampaignManager {
    config: FanoutConfig,
    campaigns: Mutex<HashMap<Uuid, CampaignEntry>>,
    queues: HashMap<ChannelKind, Arc<IntakeQueue>>,
    governor: Arc<RateGovernor>,
    scheduler: Arc<Scheduler>,
    aggregator: ProgressAggregator,
    publisher: EventPublisher,
    store: Option<CampaignStore>,
}

impl CampaignManager {
    pub fn new(
        config: FanoutConfig,
        governor: Arc<RateGovernor>,
        scheduler: Arc<Scheduler>,
        store: Option<CampaignStore>,
    ) -> Self {
        let queues = ChannelKind::ALL
            .into_iter()
            .map(|k| (k, Arc::new(IntakeQueue::new())))
            .collect();
        let publisher = EventPublisher::new(&config.events);
        Self {
            config,
            campaigns: Mutex::new(HashMap::new()),
            queues,
            governor,
            scheduler,
            aggregator: ProgressAggregator::new(),
            publisher,
            store,
        }
    }

    /// Validate and persist a campaign, staging one task per recipient.
    /// Immediate campaigns are activated before this returns; scheduled
    /// ones are armed on the scheduler.
    pub async fn create_campaign(self: &Arc<Self>, spec: CampaignSpec) -> Result<Uuid> {
        self.validate(&spec)?;

        // Daily cap / cooldown probe happens before anything is created,
        // so a rejected request leaves no campaign or task rows behind.
        let key = GovernorKey::new(spec.channel, spec.account_id.clone());
        self.governor.admit_bulk(&key).await?;

        let id = Uuid::new_v4();
        let campaign = Campaign {
            id,
            channel: spec.channel,
            account_id: spec.account_id,
            content: spec.content,
            recipients: spec.recipients,
            mode: spec.mode,
            state: match spec.mode {
                CampaignMode::Immediate => CampaignState::Queued,
                CampaignMode::Scheduled { .. } => CampaignState::Scheduled,
            },
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        };
        let tasks: Vec<SendTask> = campaign
            .recipients
            .iter()
            .map(|r| SendTask::new(id, r.clone()))
            .collect();

        self.aggregator.register(id, campaign.total()).await;
        self.persist(&campaign, &tasks);
        tracing::info!(
            campaign_id = %id,
            channel = %campaign.channel,
            recipients = campaign.recipients.len(),
            "campaign created"
        );

        let mode = campaign.mode;
        {
            let mut campaigns = self.campaigns.lock().await;
            campaigns.insert(
                id,
                CampaignEntry {
                    campaign,
                    staged: tasks.clone(),
                    tasks,
                },
            );
        }

        match mode {
            CampaignMode::Immediate => self.activate(id).await,
            CampaignMode::Scheduled { fire_at } => self.scheduler.schedule(id, fire_at).await,
        }
        Ok(id)
    }

    fn validate(&self, spec: &CampaignSpec) -> Result<()> {
        if spec.recipients.is_empty() {
            return Err(FanoutError::Validation("recipient list is empty".into()));
        }
        let mut seen = std::collections::HashSet::new();
        for r in &spec.recipients {
            if !seen.insert(r.as_str()) {
                return Err(FanoutError::Validation(format!(
                    "duplicate recipient: {r}"
                )));
            }
        }
        if spec.content.is_empty() {
            return Err(FanoutError::Validation("message content is empty".into()));
        }
        let cap = self.config.governor.max_recipients_per_run;
        if spec.recipients.len() > cap {
            return Err(FanoutError::Validation(format!(
                "recipient set exceeds per-run cap of {cap}"
            )));
        }
        if let CampaignMode::Scheduled { fire_at } = spec.mode {
            if fire_at <= Utc::now() {
                return Err(FanoutError::Validation(
                    "fire_at must be in the future".into(),
                ));
            }
        }
        Ok(())
    }

    /// Move a campaign into `Processing` and admit its tasks to the
    /// channel queue. Idempotent: anything not `Queued`/`Scheduled` is
    /// left alone, so a duplicate timer fire is a no-op.
    pub async fn activate(self: &Arc<Self>, id: Uuid) {
        let (channel, staged, snapshot, doc) = {
            let mut campaigns = self.campaigns.lock().await;
            let Some(entry) = campaigns.get_mut(&id) else {
                tracing::warn!(campaign_id = %id, "activate: unknown campaign");
                return;
            };
            if !matches!(
                entry.campaign.state,
                CampaignState::Queued | CampaignState::Scheduled
            ) {
                return;
            }
            entry.campaign.state = CampaignState::Processing;
            entry.campaign.started_at = Some(Utc::now());
            let staged = std::mem::take(&mut entry.staged);
            (
                entry.campaign.channel,
                staged,
                ProgressSnapshot::new(entry.campaign.total()),
                (entry.campaign.clone(), entry.tasks.clone()),
            )
        };

        tracing::info!(campaign_id = %id, tasks = staged.len(), "campaign activated");
        // A reloaded campaign may already have terminal counts.
        let snapshot = self.aggregator.snapshot(id).await.unwrap_or(snapshot);
        self.publisher.publish_started(id, snapshot).await;
        self.queue(channel).push_all(staged).await;
        self.persist(&doc.0, &doc.1);
    }

    /// Cancel a campaign. Staged tasks are skipped immediately; queued
    /// tasks are skipped by the worker that pops them; in-flight sends
    /// finish but never spawn retries.
    pub async fn cancel_campaign(self: &Arc<Self>, id: Uuid) -> Result<()> {
        let staged = {
            let mut campaigns = self.campaigns.lock().await;
            let entry = campaigns
                .get_mut(&id)
                .ok_or_else(|| FanoutError::Validation(format!("unknown campaign: {id}")))?;
            if !entry.campaign.state.is_cancellable() {
                return Err(FanoutError::Validation(format!(
                    "campaign is not cancellable in state {:?}",
                    entry.campaign.state
                )));
            }
            entry.campaign.state = CampaignState::Cancelled;
            std::mem::take(&mut entry.staged)
        };
        tracing::info!(campaign_id = %id, "campaign cancelled");

        for task in staged {
            self.complete_task(&task, TerminalKind::Skipped, None).await;
        }
        self.persist_campaign(id).await;
        Ok(())
    }

    /// Consistent counters for a campaign.
    pub async fn snapshot(&self, id: Uuid) -> Result<ProgressSnapshot> {
        self.aggregator
            .snapshot(id)
            .await
            .ok_or_else(|| FanoutError::Validation(format!("unknown campaign: {id}")))
    }

    /// Current lifecycle state.
    pub async fn campaign_state(&self, id: Uuid) -> Option<CampaignState> {
        self.campaigns
            .lock()
            .await
            .get(&id)
            .map(|e| e.campaign.state)
    }

    /// Attach a real-time subscriber to a campaign's event stream.
    /// Unknown and already-finished campaigns are refused; their state
    /// is only reachable through [`CampaignManager::snapshot`]. The
    /// stream entry is reaped when the campaign finalizes.
    pub async fn subscribe(&self, id: Uuid) -> Result<broadcast::Receiver<Event>> {
        match self.campaign_state(id).await {
            None => Err(FanoutError::Validation(format!("unknown campaign: {id}"))),
            Some(state) if state.is_terminal() => Err(FanoutError::Validation(format!(
                "campaign {id} already finished"
            ))),
            Some(_) => Ok(self.publisher.subscribe(id).await),
        }
    }

    /// Administrative override for the rate governor.
    pub async fn reset_governor(&self, key: &GovernorKey) {
        self.governor.reset(key).await;
    }

    // ── Worker-facing surface ────────────────────────────────────

    pub fn queue(&self, channel: ChannelKind) -> Arc<IntakeQueue> {
        // The map is built over ChannelKind::ALL and never mutated.
        Arc::clone(&self.queues[&channel])
    }

    pub fn governor(&self) -> &Arc<RateGovernor> {
        &self.governor
    }

    pub fn dispatch_config(&self) -> &fanout_core::config::DispatchConfig {
        &self.config.dispatch
    }

    pub fn retry_config(&self) -> &fanout_core::config::RetryConfig {
        &self.config.retry
    }

    /// Context for dispatching one task, or `None` if the campaign is
    /// gone.
    pub async fn dispatch_context(&self, campaign_id: Uuid) -> Option<DispatchContext> {
        let campaigns = self.campaigns.lock().await;
        let entry = campaigns.get(&campaign_id)?;
        Some(DispatchContext {
            content: entry.campaign.content.clone(),
            key: GovernorKey::new(entry.campaign.channel, entry.campaign.account_id.clone()),
            cancelled: entry.campaign.state == CampaignState::Cancelled,
        })
    }

    pub async fn is_cancelled(&self, campaign_id: Uuid) -> bool {
        matches!(
            self.campaign_state(campaign_id).await,
            Some(CampaignState::Cancelled)
        )
    }

    /// Record a task's terminal transition and finalize the campaign if
    /// it was the last one.
    pub async fn complete_task(
        self: &Arc<Self>,
        task: &SendTask,
        kind: TerminalKind,
        detail: Option<String>,
    ) {
        let state = match kind {
            TerminalKind::Sent => TaskState::Succeeded,
            TerminalKind::Failed => TaskState::FailedPermanent,
            TerminalKind::Skipped => TaskState::Skipped,
        };
        self.update_task_row(task, state, detail).await;

        let Some(transition) = self.aggregator.record(task.campaign_id, task.id, kind).await
        else {
            return;
        };
        self.publisher
            .publish_progress(task.campaign_id, transition.snapshot)
            .await;
        if transition.is_final {
            self.finalize(task.campaign_id, transition.snapshot).await;
        }
    }

    /// Park a task for a retry: state `RetryWait`, eligible again at
    /// `at`.
    pub async fn retry_task(&self, mut task: SendTask, at: chrono::DateTime<Utc>, detail: String) {
        task.state = TaskState::RetryWait;
        task.next_eligible = Some(at);
        task.last_error = Some(detail);
        let channel = {
            let campaigns = self.campaigns.lock().await;
            campaigns.get(&task.campaign_id).map(|e| e.campaign.channel)
        };
        if let Some(channel) = channel {
            self.queue(channel).defer(task, at).await;
        }
    }

    /// Re-queue a task untouched after a governor rejection.
    pub async fn defer_task(&self, channel: ChannelKind, task: SendTask, at: chrono::DateTime<Utc>) {
        self.queue(channel).defer(task, at).await;
    }

    // ── Internals ────────────────────────────────────────────────

    async fn update_task_row(&self, task: &SendTask, state: TaskState, detail: Option<String>) {
        let mut campaigns = self.campaigns.lock().await;
        if let Some(entry) = campaigns.get_mut(&task.campaign_id) {
            if let Some(row) = entry.tasks.iter_mut().find(|t| t.id == task.id) {
                row.state = state;
                row.attempts = task.attempts.max(row.attempts);
                if detail.is_some() {
                    row.last_error = detail;
                }
            }
        }
    }

    async fn finalize(self: &Arc<Self>, id: Uuid, snapshot: ProgressSnapshot) {
        let (terminal, key) = {
            let mut campaigns = self.campaigns.lock().await;
            let Some(entry) = campaigns.get_mut(&id) else {
                return;
            };
            let terminal = if entry.campaign.state == CampaignState::Cancelled {
                CampaignState::Cancelled
            } else if snapshot.failed == snapshot.total {
                CampaignState::Failed
            } else {
                CampaignState::Completed
            };
            entry.campaign.state = terminal;
            entry.campaign.finished_at = Some(Utc::now());
            (
                terminal,
                GovernorKey::new(entry.campaign.channel, entry.campaign.account_id.clone()),
            )
        };

        tracing::info!(
            campaign_id = %id,
            state = ?terminal,
            sent = snapshot.sent,
            failed = snapshot.failed,
            "campaign finished"
        );
        match terminal {
            CampaignState::Completed => {
                self.publisher
                    .publish_terminal(id, EventKind::Completed, snapshot)
                    .await;
            }
            CampaignState::Failed => {
                self.publisher
                    .publish_terminal(id, EventKind::Failed, snapshot)
                    .await;
            }
            // Cancellation is visible via snapshot, not a terminal event.
            _ => {}
        }
        self.governor.complete_bulk(&key).await;
        self.persist_campaign(id).await;
        self.publisher.close(id).await;
    }

    async fn persist_campaign(&self, id: Uuid) {
        let doc = {
            let campaigns = self.campaigns.lock().await;
            campaigns
                .get(&id)
                .map(|e| (e.campaign.clone(), e.tasks.clone()))
        };
        if let Some((campaign, tasks)) = doc {
            self.persist(&campaign, &tasks);
        }
    }

    fn persist(&self, campaign: &Campaign, tasks: &[SendTask]) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save(campaign, tasks) {
                tracing::warn!("Failed to save campaign {}: {e}", campaign.id);
            }
        }
    }

    /// Reload persisted campaigns after a restart. Terminal campaigns
    /// come back read-only (snapshots keep working); unfinished ones
    /// have their non-terminal tasks reset to pending and are either
    /// re-armed on the scheduler or re-activated.
    pub async fn reload(self: &Arc<Self>) {
        let docs = match &self.store {
            Some(store) => store.load_all(),
            None => return,
        };
        for doc in docs {
            let mut campaign = doc.campaign;
            let mut tasks = doc.tasks;
            let id = campaign.id;
            self.aggregator.register_tasks(id, &tasks).await;

            if campaign.state.is_terminal() {
                let mut campaigns = self.campaigns.lock().await;
                campaigns.insert(
                    id,
                    CampaignEntry {
                        campaign,
                        staged: Vec::new(),
                        tasks,
                    },
                );
                continue;
            }

            for task in tasks.iter_mut() {
                if !task.state.is_terminal() {
                    task.state = TaskState::Pending;
                    task.next_eligible = None;
                }
            }
            let staged: Vec<SendTask> = tasks
                .iter()
                .filter(|t| !t.state.is_terminal())
                .cloned()
                .collect();

            // Crashed between the last task and finalization: nothing
            // left to dispatch, so finalize straight away.
            if staged.is_empty() {
                let snapshot = self.aggregator.snapshot(id).await;
                {
                    let mut campaigns = self.campaigns.lock().await;
                    campaigns.insert(
                        id,
                        CampaignEntry {
                            campaign,
                            staged,
                            tasks,
                        },
                    );
                }
                if let Some(snapshot) = snapshot {
                    self.finalize(id, snapshot).await;
                }
                continue;
            }
            let fire_at = campaign.fire_at();
            let reschedule = matches!(campaign.state, CampaignState::Scheduled)
                && fire_at.is_some_and(|at| at > Utc::now());
            if !reschedule {
                // Interrupted mid-run (or past its deadline): activate
                // again as soon as workers are up.
                campaign.state = CampaignState::Queued;
            }
            tracing::info!(campaign_id = %id, staged = staged.len(), "campaign reloaded");
            {
                let mut campaigns = self.campaigns.lock().await;
                campaigns.insert(
                    id,
                    CampaignEntry {
                        campaign,
                        staged,
                        tasks,
                    },
                );
            }
            if reschedule {
                if let Some(at) = fire_at {
                    self.scheduler.schedule(id, at).await;
                }
            } else {
                self.activate(id).await;
            }
        }
    }
}
