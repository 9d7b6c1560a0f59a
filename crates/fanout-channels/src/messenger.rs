//! Facebook Messenger Platform adapter.
//!
//! Sends via the page's `me/messages` endpoint with a Page Access Token.
//! Broadcasts use the MESSAGE_TAG type so delivery works outside the
//! 24-hour standard messaging window.

use async_trait::async_trait;

use fanout_core::config::MessengerConfig;
use fanout_core::error::{FanoutError, Result};
use fanout_core::traits::ChannelAdapter;
use fanout_core::types::{ChannelKind, MessageContent, SendOutcome};

use crate::outbound;

pub struct MessengerAdapter {
    config: MessengerConfig,
    client: reqwest::Client,
}

impl MessengerAdapter {
    pub fn new(config: MessengerConfig) -> Self {
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

    /// Build the Send API payload for one PSID.
    fn message_payload(psid: &str, content: &MessageContent) -> serde_json::Value {
        let message = match content {
            MessageContent::Text { body } => serde_json::json!({ "text": body }),
            MessageContent::Media { url, caption } => {
                let attachment = serde_json::json!({
                    "type": "image",
                    "payload": { "url": url, "is_reusable": true }
                });
                match caption {
                    Some(c) if !c.is_empty() => serde_json::json!({
                        "attachment": attachment,
                        "text": c,
                    }),
                    _ => serde_json::json!({ "attachment": attachment }),
                }
            }
        };
        serde_json::json!({
            "recipient": { "id": psid },
            "messaging_type": "MESSAGE_TAG",
            "tag": "CONFIRMED_EVENT_UPDATE",
            "message": message,
        })
    }
}

#[async_trait]
impl ChannelAdapter for MessengerAdapter {
    fn channel(&self) -> ChannelKind {
        ChannelKind::Messenger
    }

    async fn connect(&self) -> Result<()> {
        if self.config.page_access_token.is_empty() {
            return Err(FanoutError::Config(
                "Messenger page_access_token not configured".into(),
            ));
        }
        let url = format!("https://graph.facebook.com/{}/me", self.config.api_version);
        outbound::verify_graph_object(
            &self.client,
            &url,
            &self.config.page_access_token,
            "Messenger",
        )
        .await?;
        tracing::info!("Messenger: connected");
        Ok(())
    }

    async fn send(&self, recipient: &str, content: &MessageContent) -> Result<SendOutcome> {
        let payload = Self::message_payload(recipient, content);
        outbound::post_graph(
            &self.client,
            &self.messages_url(),
            &self.config.page_access_token,
            &payload,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_payload_shape() {
        let p = MessengerAdapter::message_payload("psid-1", &MessageContent::text("hello"));
        assert_eq!(p["recipient"]["id"], "psid-1");
        assert_eq!(p["message"]["text"], "hello");
        assert_eq!(p["messaging_type"], "MESSAGE_TAG");
    }

    #[test]
    fn test_media_payload_carries_caption() {
        let content = MessageContent::Media {
            url: "https://cdn.example.com/x.png".into(),
            caption: Some("look".into()),
        };
        let p = MessengerAdapter::message_payload("psid-2", &content);
        assert_eq!(
            p["message"]["attachment"]["payload"]["url"],
            "https://cdn.example.com/x.png"
        );
        assert_eq!(p["message"]["text"], "look");
    }

    #[tokio::test]
    async fn test_connect_requires_token() {
        let adapter = MessengerAdapter::new(MessengerConfig::default());
        assert!(matches!(
            adapter.connect().await.unwrap_err(),
            FanoutError::Config(_)
        ));
    }
}
