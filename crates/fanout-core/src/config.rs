//! Fanout configuration system.
//!
//! One TOML file (`~/.fanout/config.toml`) configures the whole engine.
//! Every policy value the rate governor and retry logic use lives here.
//! The anti-ban constants are product policy, not algorithm invariants,
//! so operators can tune them without a rebuild.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{FanoutError, Result};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FanoutConfig {
    #[serde(default)]
    pub governor: GovernorConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub events: EventsConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
}

impl FanoutConfig {
    /// Load config from the default path (~/.fanout/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| FanoutError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| FanoutError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| FanoutError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the fanout home directory (~/.fanout).
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".fanout")
    }
}

/// Anti-ban rate governance policy, per channel account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernorConfig {
    /// Minimum randomized delay before every send, milliseconds.
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,
    /// Maximum randomized delay before every send, milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Bulk runs allowed per account per local day.
    #[serde(default = "default_daily_cap")]
    pub daily_cap: u32,
    /// Cooldown after each bulk run, seconds.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    /// Hard recipient cap per bulk run.
    #[serde(default = "default_max_recipients")]
    pub max_recipients_per_run: usize,
}

fn default_min_delay_ms() -> u64 { 5_000 }
fn default_max_delay_ms() -> u64 { 12_000 }
fn default_daily_cap() -> u32 { 3 }
fn default_cooldown_secs() -> u64 { 2 * 60 * 60 }
fn default_max_recipients() -> usize { 200 }

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: default_min_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            daily_cap: default_daily_cap(),
            cooldown_secs: default_cooldown_secs(),
            max_recipients_per_run: default_max_recipients(),
        }
    }
}

impl GovernorConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

/// Worker pool sizing and queue behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Simultaneous in-flight sends per channel.
    #[serde(default = "default_workers_per_channel")]
    pub workers_per_channel: usize,
    /// How long a worker parks the queue when the governor rejects,
    /// milliseconds.
    #[serde(default = "default_recheck_ms")]
    pub governor_recheck_ms: u64,
    /// Idle poll interval when the intake queue is empty, milliseconds.
    #[serde(default = "default_idle_poll_ms")]
    pub idle_poll_ms: u64,
}

fn default_workers_per_channel() -> usize { 2 }
fn default_recheck_ms() -> u64 { 30_000 }
fn default_idle_poll_ms() -> u64 { 250 }

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers_per_channel: default_workers_per_channel(),
            governor_recheck_ms: default_recheck_ms(),
            idle_poll_ms: default_idle_poll_ms(),
        }
    }
}

/// Retry/backoff policy for transient send failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per task, first try included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Backoff base, milliseconds. Doubled per attempt.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Backoff ceiling, milliseconds.
    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,
    /// Uniform jitter added on top, milliseconds.
    #[serde(default = "default_backoff_jitter_ms")]
    pub backoff_jitter_ms: u64,
}

fn default_max_attempts() -> u32 { 3 }
fn default_backoff_base_ms() -> u64 { 2_000 }
fn default_backoff_cap_ms() -> u64 { 60_000 }
fn default_backoff_jitter_ms() -> u64 { 500 }

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
            backoff_jitter_ms: default_backoff_jitter_ms(),
        }
    }
}

/// Event publishing cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Emit a `progress` event every N-th terminal task transition.
    /// The final transition always emits.
    #[serde(default = "default_progress_stride")]
    pub progress_stride: u64,
    /// Broadcast channel capacity per campaign; slow subscribers lag.
    #[serde(default = "default_event_buffer")]
    pub buffer: usize,
}

fn default_progress_stride() -> u64 { 1 }
fn default_event_buffer() -> usize { 256 }

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            progress_stride: default_progress_stride(),
            buffer: default_event_buffer(),
        }
    }
}

/// Platform adapter credentials, supplied by the integration settings
/// store in production and mirrored here for the standalone daemon.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelsConfig {
    #[serde(default)]
    pub whatsapp: WhatsAppConfig,
    #[serde(default)]
    pub messenger: MessengerConfig,
    #[serde(default)]
    pub instagram: InstagramConfig,
}

/// WhatsApp Business Cloud API credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhatsAppConfig {
    /// Facebook Graph API access token.
    #[serde(default)]
    pub access_token: String,
    /// WhatsApp Phone Number ID.
    #[serde(default)]
    pub phone_number_id: String,
    #[serde(default = "default_graph_version")]
    pub api_version: String,
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            access_token: String::new(),
            phone_number_id: String::new(),
            api_version: default_graph_version(),
        }
    }
}

/// Facebook Messenger Platform credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessengerConfig {
    #[serde(default)]
    pub page_access_token: String,
    #[serde(default = "default_graph_version")]
    pub api_version: String,
}

impl Default for MessengerConfig {
    fn default() -> Self {
        Self {
            page_access_token: String::new(),
            api_version: default_graph_version(),
        }
    }
}

/// Instagram Direct (Graph API messenger family) credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstagramConfig {
    #[serde(default)]
    pub access_token: String,
    /// Instagram professional account ID.
    #[serde(default)]
    pub ig_account_id: String,
    #[serde(default = "default_graph_version")]
    pub api_version: String,
}

impl Default for InstagramConfig {
    fn default() -> Self {
        Self {
            access_token: String::new(),
            ig_account_id: String::new(),
            api_version: default_graph_version(),
        }
    }
}

fn default_graph_version() -> String { "v21.0".into() }
