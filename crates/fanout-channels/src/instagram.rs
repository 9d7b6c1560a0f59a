//! Instagram Direct adapter (Graph API messenger family).
//!
//! Instagram professional accounts send DMs through the same
//! `me/messages` Send API as Messenger, with
//! `messaging_product=instagram` on the payload.

use async_trait::async_trait;

use fanout_core::config::InstagramConfig;
use fanout_core::error::{FanoutError, Result};
use fanout_core::traits::ChannelAdapter;
use fanout_core::types::{ChannelKind, MessageContent, SendOutcome};

use crate::outbound;

pub struct InstagramAdapter {
    config: InstagramConfig,
    client: reqwest::Client,
}

impl InstagramAdapter {
    pub fn new(config: InstagramConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn messages_url(&self) -> String {
        format!(
            "https://graph.facebook.com/{}/me/messages",
            self.config.api_version
        )
    }

    /// Build the Send API payload for one IGSID.
    fn message_payload(igsid: &str, content: &MessageContent) -> serde_json::Value {
        let message = match content {
            MessageContent::Text { body } => serde_json::json!({ "text": body }),
            MessageContent::Media { url, .. } => serde_json::json!({
                "attachment": {
                    "type": "image",
                    "payload": { "url": url }
                }
            }),
        };
        serde_json::json!({
            "messaging_product": "instagram",
            "recipient": { "id": igsid },
            "message": message,
        })
    }
}

#[async_trait]
impl ChannelAdapter for InstagramAdapter {
    fn channel(&self) -> ChannelKind {
        ChannelKind::Instagram
    }

    async fn connect(&self) -> Result<()> {
        if self.config.access_token.is_empty() {
            return Err(FanoutError::Config(
                "Instagram access_token not configured".into(),
            ));
        }
        if self.config.ig_account_id.is_empty() {
            return Err(FanoutError::Config(
                "Instagram ig_account_id not configured".into(),
            ));
        }
        let url = format!(
            "https://graph.facebook.com/{}/{}",
            self.config.api_version, self.config.ig_account_id
        );
        outbound::verify_graph_object(&self.client, &url, &self.config.access_token, "Instagram")
            .await?;
        tracing::info!(
            "Instagram Direct: connected (account={})",
            self.config.ig_account_id
        );
        Ok(())
    }

    async fn send(&self, recipient: &str, content: &MessageContent) -> Result<SendOutcome> {
        let payload = Self::message_payload(recipient, content);
        outbound::post_graph(
            &self.client,
            &self.messages_url(),
            &self.config.access_token,
            &payload,
        )
        .await
    }
}
