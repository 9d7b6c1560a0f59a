//! Domain types — campaigns, send tasks, events and progress snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A messaging platform we dispatch to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    #[serde(rename = "whatsapp")]
    WhatsApp,
    Messenger,
    Instagram,
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelKind::WhatsApp => write!(f, "whatsapp"),
            ChannelKind::Messenger => write!(f, "messenger"),
            ChannelKind::Instagram => write!(f, "instagram"),
        }
    }
}

impl ChannelKind {
    pub const ALL: [ChannelKind; 3] = [
        ChannelKind::WhatsApp,
        ChannelKind::Messenger,
        ChannelKind::Instagram,
    ];
}

impl std::str::FromStr for ChannelKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "whatsapp" | "wa" => Ok(ChannelKind::WhatsApp),
            "messenger" | "fb" => Ok(ChannelKind::Messenger),
            "instagram" | "ig" => Ok(ChannelKind::Instagram),
            other => Err(format!(
                "unknown channel '{other}' (expected whatsapp, messenger or instagram)"
            )),
        }
    }
}

/// What gets sent to every recipient of a campaign.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageContent {
    Text { body: String },
    /// Media is pre-uploaded by an external collaborator; we only carry
    /// the handle.
    Media { url: String, caption: Option<String> },
}

impl MessageContent {
    pub fn text(body: impl Into<String>) -> Self {
        MessageContent::Text { body: body.into() }
    }

    /// Empty content is a validation failure at campaign creation.
    pub fn is_empty(&self) -> bool {
        match self {
            MessageContent::Text { body } => body.trim().is_empty(),
            MessageContent::Media { url, .. } => url.trim().is_empty(),
        }
    }
}

/// Normalized result of one platform send attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SendOutcome {
    /// The platform accepted the message.
    Delivered { message_id: String },
    /// Worth retrying: timeouts, 5xx, platform-side rate limiting.
    Transient { detail: String },
    /// Not worth retrying: bad recipient, rejected payload, dead
    /// credentials.
    Permanent { detail: String },
}

/// When a campaign fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum CampaignMode {
    Immediate,
    Scheduled { fire_at: DateTime<Utc> },
}

/// Campaign lifecycle. `Processing` begins when the scheduler activates
/// the first task; a terminal state is reached once every task is
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignState {
    Queued,
    Scheduled,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl CampaignState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CampaignState::Completed | CampaignState::Failed | CampaignState::Cancelled
        )
    }

    /// States from which cancellation is allowed.
    pub fn is_cancellable(&self) -> bool {
        matches!(
            self,
            CampaignState::Queued | CampaignState::Scheduled | CampaignState::Processing
        )
    }
}

/// One broadcast request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: Uuid,
    pub channel: ChannelKind,
    /// Channel account the sends are attributed to (rate-governance key).
    pub account_id: String,
    pub content: MessageContent,
    /// Already resolved and deduplicated by the contacts subsystem.
    pub recipients: Vec<String>,
    pub mode: CampaignMode,
    pub state: CampaignState,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Campaign {
    pub fn total(&self) -> u64 {
        self.recipients.len() as u64
    }

    pub fn fire_at(&self) -> Option<DateTime<Utc>> {
        match self.mode {
            CampaignMode::Scheduled { fire_at } => Some(fire_at),
            CampaignMode::Immediate => None,
        }
    }
}

/// Per-task state. A task reaches exactly one terminal state
/// (`Succeeded`, `FailedPermanent` or `Skipped`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    InFlight,
    RetryWait,
    Succeeded,
    FailedPermanent,
    /// Terminal state for tasks cancelled before they went in flight.
    Skipped,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Succeeded | TaskState::FailedPermanent | TaskState::Skipped
        )
    }
}

/// The unit of work: one campaign message to one recipient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendTask {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub recipient: String,
    pub state: TaskState,
    pub attempts: u32,
    pub last_error: Option<String>,
    /// Earliest time the task may re-enter the intake queue (backoff).
    pub next_eligible: Option<DateTime<Utc>>,
}

impl SendTask {
    pub fn new(campaign_id: Uuid, recipient: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            campaign_id,
            recipient: recipient.into(),
            state: TaskState::Pending,
            attempts: 0,
            last_error: None,
            next_eligible: None,
        }
    }
}

/// A consistent point-in-time read of a campaign's counters.
/// Invariant: `sent + failed + skipped + pending == total`; `skipped`
/// is only ever non-zero for cancelled campaigns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub total: u64,
    pub sent: u64,
    pub failed: u64,
    #[serde(default)]
    pub skipped: u64,
    pub pending: u64,
}

impl ProgressSnapshot {
    pub fn new(total: u64) -> Self {
        Self {
            total,
            sent: 0,
            failed: 0,
            skipped: 0,
            pending: total,
        }
    }

    pub fn is_done(&self) -> bool {
        self.pending == 0
    }

    /// Terminal transitions recorded so far.
    pub fn done(&self) -> u64 {
        self.sent + self.failed + self.skipped
    }
}

/// Kinds of events published per campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Started,
    Progress,
    Completed,
    Failed,
}

/// An immutable progress event, ordered by emission time per campaign.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub campaign_id: Uuid,
    pub kind: EventKind,
    pub snapshot: ProgressSnapshot,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn now(campaign_id: Uuid, kind: EventKind, snapshot: ProgressSnapshot) -> Self {
        Self {
            campaign_id,
            kind,
            snapshot,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_invariant_at_creation() {
        let s = ProgressSnapshot::new(5);
        assert_eq!(s.sent + s.failed + s.skipped + s.pending, s.total);
        assert_eq!(s.done(), 0);
        assert!(!s.is_done());
    }

    #[test]
    fn test_terminal_states() {
        assert!(TaskState::Succeeded.is_terminal());
        assert!(TaskState::Skipped.is_terminal());
        assert!(!TaskState::RetryWait.is_terminal());
        assert!(CampaignState::Cancelled.is_terminal());
        assert!(CampaignState::Processing.is_cancellable());
        assert!(!CampaignState::Completed.is_cancellable());
    }

    #[test]
    fn test_empty_content_detection() {
        assert!(MessageContent::text("  ").is_empty());
        assert!(!MessageContent::text("hello").is_empty());
        let media = MessageContent::Media {
            url: "https://cdn.example.com/x.jpg".into(),
            caption: None,
        };
        assert!(!media.is_empty());
    }

    #[test]
    fn test_channel_kind_serde_names() {
        assert_eq!(
            serde_json::to_string(&ChannelKind::WhatsApp).unwrap(),
            "\"whatsapp\""
        );
        assert_eq!(
            serde_json::to_string(&ChannelKind::Instagram).unwrap(),
            "\"instagram\""
        );
        assert_eq!(ChannelKind::Messenger.to_string(), "messenger");
    }
}
