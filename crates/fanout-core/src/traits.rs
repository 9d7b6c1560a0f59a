//! The `ChannelAdapter` seam between dispatch and the platform clients.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{ChannelKind, MessageContent, SendOutcome};

/// A platform client that can deliver one message to one recipient.
///
/// Implementations normalize platform responses into [`SendOutcome`];
/// `Err(_)` is reserved for faults the adapter could not classify
/// (transport setup, response decoding), which the dispatch workers
/// treat as transient.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// Which platform this adapter speaks to.
    fn channel(&self) -> ChannelKind;

    /// Verify configuration/credentials before first use.
    async fn connect(&self) -> Result<()>;

    /// Deliver `content` to `recipient`. Never called concurrently
    /// beyond the worker pool's configured limit.
    async fn send(&self, recipient: &str, content: &MessageContent) -> Result<SendOutcome>;
}
