//! # Fanout Dispatch
//! The engine that turns one campaign into many governed sends.
//!
//! [`Engine`] wires the pieces together: the [`campaign::CampaignManager`]
//! owns campaign state and per-channel intake queues, the scheduler fires
//! deferred campaigns, and a small worker pool per channel paces sends
//! through the rate governor and the channel adapters.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use uuid::Uuid;

use fanout_core::config::FanoutConfig;
use fanout_core::error::Result;
use fanout_core::traits::ChannelAdapter;
use fanout_core::types::{CampaignState, ChannelKind, Event, ProgressSnapshot};
use fanout_governor::{GovernorKey, GovernorStore, RateGovernor};
use fanout_scheduler::{spawn_scheduler, Scheduler};

pub mod campaign;
pub mod events;
pub mod progress;
pub mod queue;
pub mod retry;
pub mod store;
pub mod worker;

pub use campaign::{CampaignManager, CampaignSpec};
pub use store::CampaignStore;

/// The assembled dispatch engine. Construct with [`EngineBuilder`],
/// then [`Engine::start`] to bring up the scheduler and workers.
pub struct Engine {
    manager: Arc<CampaignManager>,
    scheduler: Arc<Scheduler>,
    adapters: HashMap<ChannelKind, Arc<dyn ChannelAdapter>>,
    shutdown: watch::Sender<bool>,
    scheduler_handle: Option<tokio::task::JoinHandle<()>>,
    worker_handles: Vec<tokio::task::JoinHandle<()>>,
}

/// Builder for [`Engine`]. Only channels registered with an adapter
/// get workers; campaigns for anything else fail validation upstream.
pub struct EngineBuilder {
    config: FanoutConfig,
    adapters: HashMap<ChannelKind, Arc<dyn ChannelAdapter>>,
    persist: Option<std::path::PathBuf>,
}

impl EngineBuilder {
    pub fn new(config: FanoutConfig) -> Self {
        Self {
            config,
            adapters: HashMap::new(),
            persist: None,
        }
    }

    pub fn adapter(mut self, adapter: Arc<dyn ChannelAdapter>) -> Self {
        self.adapters.insert(adapter.channel(), adapter);
        self
    }

    /// Persist governor slots and campaign documents under `~/.fanout`.
    pub fn persistent(self) -> Self {
        self.persist_at(FanoutConfig::home_dir())
    }

    /// Persist under a specific directory instead of `~/.fanout`.
    pub fn persist_at(mut self, dir: impl Into<std::path::PathBuf>) -> Self {
        self.persist = Some(dir.into());
        self
    }

    pub fn build(self) -> Engine {
        let governor = if let Some(dir) = &self.persist {
            Arc::new(RateGovernor::with_store(
                self.config.governor.clone(),
                GovernorStore::new(&dir.join("governor")),
            ))
        } else {
            Arc::new(RateGovernor::new(self.config.governor.clone()))
        };
        let store = self
            .persist
            .as_deref()
            .map(|dir| CampaignStore::new(&dir.join("campaigns")));
        let scheduler = Arc::new(Scheduler::new());
        let manager = Arc::new(CampaignManager::new(
            self.config,
            governor,
            Arc::clone(&scheduler),
            store,
        ));
        let (shutdown, _) = watch::channel(false);
        Engine {
            manager,
            scheduler,
            adapters: self.adapters,
            shutdown,
            scheduler_handle: None,
            worker_handles: Vec::new(),
        }
    }
}

impl Engine {
    /// Spawn the scheduler loop and the per-channel worker pools, then
    /// reload any persisted campaigns.
    pub async fn start(&mut self) {
        let activate_mgr = Arc::clone(&self.manager);
        self.scheduler_handle = Some(spawn_scheduler(
            Arc::clone(&self.scheduler),
            move |id| {
                let mgr = Arc::clone(&activate_mgr);
                async move { mgr.activate(id).await }
            },
        ));
        for (&channel, adapter) in &self.adapters {
            let handles = worker::spawn_channel_workers(
                Arc::clone(&self.manager),
                channel,
                Arc::clone(adapter),
                self.shutdown.subscribe(),
            );
            self.worker_handles.extend(handles);
        }
        self.manager.reload().await;
        tracing::info!(channels = self.adapters.len(), "dispatch engine started");
    }

    /// Stop the workers. In-flight grant waits are abandoned and their
    /// tasks requeued, so a restart picks them back up.
    pub async fn shutdown(&mut self) {
        let _ = self.shutdown.send(true);
        for handle in self.worker_handles.drain(..) {
            let _ = handle.await;
        }
        if let Some(handle) = self.scheduler_handle.take() {
            handle.abort();
            let _ = handle.await;
        }
        tracing::info!("dispatch engine stopped");
    }

    /// Verify adapter credentials up front rather than on the first send.
    pub async fn connect_all(&self) -> Result<()> {
        for adapter in self.adapters.values() {
            adapter.connect().await?;
            tracing::info!(channel = %adapter.channel(), "channel connected");
        }
        Ok(())
    }

    pub fn manager(&self) -> &Arc<CampaignManager> {
        &self.manager
    }

    pub async fn create_campaign(&self, spec: CampaignSpec) -> Result<Uuid> {
        self.manager.create_campaign(spec).await
    }

    pub async fn cancel_campaign(&self, id: Uuid) -> Result<()> {
        self.manager.cancel_campaign(id).await
    }

    pub async fn snapshot(&self, id: Uuid) -> Result<ProgressSnapshot> {
        self.manager.snapshot(id).await
    }

    pub async fn campaign_state(&self, id: Uuid) -> Option<CampaignState> {
        self.manager.campaign_state(id).await
    }

    pub async fn subscribe(&self, id: Uuid) -> Result<broadcast::Receiver<Event>> {
        self.manager.subscribe(id).await
    }

    pub async fn reset_governor(&self, key: &GovernorKey) {
        self.manager.reset_governor(key).await;
    }
}
