//! File-based governor state store.
//! Slots saved as one JSON file; only written when limits change
//! (bulk admission/completion/reset), never on per-send grants.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use fanout_core::error::Result;

use crate::{GovernorKey, SlotState};

/// One persisted slot row.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedSlot {
    key: GovernorKey,
    state: SlotState,
}

/// File-based governor store.
pub struct GovernorStore {
    path: PathBuf,
}

impl GovernorStore {
    /// Create a store at the given directory.
    pub fn new(dir: &Path) -> Self {
        std::fs::create_dir_all(dir).ok();
        Self {
            path: dir.to_path_buf(),
        }
    }

    /// Save all slots to disk.
    pub fn save(&self, slots: &HashMap<GovernorKey, SlotState>) -> Result<()> {
        let rows: Vec<PersistedSlot> = slots
            .iter()
            .map(|(key, state)| PersistedSlot {
                key: key.clone(),
                state: state.clone(),
            })
            .collect();
        let file = self.path.join("slots.json");
        let json = serde_json::to_string_pretty(&rows)?;
        std::fs::write(&file, &json)?;
        tracing::debug!("Saved {} governor slots to {}", rows.len(), file.display());
        Ok(())
    }

    /// Load slots from disk. Missing or corrupt files yield an empty map.
    pub fn load(&self) -> HashMap<GovernorKey, SlotState> {
        let file = self.path.join("slots.json");
        if !file.exists() {
            return HashMap::new();
        }
        match std::fs::read_to_string(&file) {
            Ok(json) => match serde_json::from_str::<Vec<PersistedSlot>>(&json) {
                Ok(rows) => rows.into_iter().map(|r| (r.key, r.state)).collect(),
                Err(e) => {
                    tracing::warn!("Failed to parse slots.json: {e}");
                    HashMap::new()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read slots.json: {e}");
                HashMap::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use fanout_core::types::ChannelKind;

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = std::env::temp_dir().join("fanout-test-governor-store");
        std::fs::remove_dir_all(&dir).ok();
        let store = GovernorStore::new(&dir);

        let key = GovernorKey::new(ChannelKind::Instagram, "ig-1");
        let mut slots = HashMap::new();
        slots.insert(
            key.clone(),
            SlotState {
                next_free: Utc::now(),
                cooldown_until: Some(Utc::now()),
                daily_count: 2,
                daily_date: chrono::Local::now().date_naive(),
                active_runs: 0,
            },
        );
        store.save(&slots).unwrap();

        let loaded = store.load();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.get(&key).unwrap().daily_count, 2);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_missing_file_loads_empty() {
        let dir = std::env::temp_dir().join("fanout-test-governor-empty");
        std::fs::remove_dir_all(&dir).ok();
        let store = GovernorStore::new(&dir);
        assert!(store.load().is_empty());
        std::fs::remove_dir_all(&dir).ok();
    }
}
