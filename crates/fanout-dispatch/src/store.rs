//! File-based campaign store — one JSON document per campaign.
//! Written on lifecycle changes (create, activate, cancel, finish),
//! not on every task transition; a reload treats non-terminal tasks as
//! pending again and re-dispatches them.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use fanout_core::error::Result;
use fanout_core::types::{Campaign, SendTask};

/// The persisted rows for one campaign.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignDoc {
    pub campaign: Campaign,
    pub tasks: Vec<SendTask>,
}

/// File-based campaign store.
pub struct CampaignStore {
    path: PathBuf,
}

impl CampaignStore {
    /// Create a store at the given directory.
    pub fn new(dir: &Path) -> Self {
        std::fs::create_dir_all(dir).ok();
        Self {
            path: dir.to_path_buf(),
        }
    }

    /// Default store path (~/.fanout/campaigns).
    pub fn default_path() -> PathBuf {
        fanout_core::FanoutConfig::home_dir().join("campaigns")
    }

    fn file(&self, id: Uuid) -> PathBuf {
        self.path.join(format!("{id}.json"))
    }

    /// Save one campaign with its task rows.
    pub fn save(&self, campaign: &Campaign, tasks: &[SendTask]) -> Result<()> {
        let doc = CampaignDoc {
            campaign: campaign.clone(),
            tasks: tasks.to_vec(),
        };
        let json = serde_json::to_string_pretty(&doc)?;
        std::fs::write(self.file(campaign.id), &json)?;
        tracing::debug!("Saved campaign {} ({} tasks)", campaign.id, tasks.len());
        Ok(())
    }

    /// Load every stored campaign. Unparseable files are skipped with a
    /// warning rather than failing the whole reload.
    pub fn load_all(&self) -> Vec<CampaignDoc> {
        let entries = match std::fs::read_dir(&self.path) {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!("Failed to read campaign store: {e}");
                return Vec::new();
            }
        };
        let mut docs = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match std::fs::read_to_string(&path) {
                Ok(json) => match serde_json::from_str::<CampaignDoc>(&json) {
                    Ok(doc) => docs.push(doc),
                    Err(e) => tracing::warn!("Skipping {}: {e}", path.display()),
                },
                Err(e) => tracing::warn!("Skipping {}: {e}", path.display()),
            }
        }
        docs
    }

    /// Remove a campaign document.
    pub fn remove(&self, id: Uuid) {
        std::fs::remove_file(self.file(id)).ok();
    }
}
