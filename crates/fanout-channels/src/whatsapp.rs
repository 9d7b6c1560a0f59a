//! WhatsApp Business Cloud API adapter.
//!
//! Uses the official WhatsApp Business Platform (Cloud API).
//! Requires: Access Token + Phone Number ID from Meta Business Suite.

use async_trait::async_trait;

use fanout_core::config::WhatsAppConfig;
use fanout_core::error::{FanoutError, Result};
use fanout_core::traits::ChannelAdapter;
use fanout_core::types::{ChannelKind, MessageContent, SendOutcome};

use crate::outbound;

pub struct WhatsAppAdapter {
    config: WhatsAppConfig,
    client: reqwest::Client,
}

impl WhatsAppAdapter {
    pub fn new(config: WhatsAppConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn messages_url(&self) -> String {
        format!(
            "https://graph.facebook.com/{}/{}/messages",
            self.config.api_version, self.config.phone_number_id
        )
    }

    /// Build the Cloud API message payload for one recipient.
    fn message_payload(to: &str, content: &MessageContent) -> serde_json::Value {
        match content {
            MessageContent::Text { body } => serde_json::json!({
                "messaging_product": "whatsapp",
                "recipient_type": "individual",
                "to": to,
                "type": "text",
                "text": { "preview_url": false, "body": body }
            }),
            MessageContent::Media { url, caption } => serde_json::json!({
                "messaging_product": "whatsapp",
                "recipient_type": "individual",
                "to": to,
                "type": "image",
                "image": { "link": url, "caption": caption.clone().unwrap_or_default() }
            }),
        }
    }
}

#[async_trait]
impl ChannelAdapter for WhatsAppAdapter {
    fn channel(&self) -> ChannelKind {
        ChannelKind::WhatsApp
    }

    async fn connect(&self) -> Result<()> {
        if self.config.access_token.is_empty() {
            return Err(FanoutError::Config(
                "WhatsApp access_token not configured".into(),
            ));
        }
        if self.config.phone_number_id.is_empty() {
            return Err(FanoutError::Config(
                "WhatsApp phone_number_id not configured".into(),
            ));
        }
        let url = format!(
            "https://graph.facebook.com/{}/{}",
            self.config.api_version, self.config.phone_number_id
        );
        outbound::verify_graph_object(&self.client, &url, &self.config.access_token, "WhatsApp")
            .await?;
        tracing::info!(
            "WhatsApp Business: connected (phone_id={})",
            self.config.phone_number_id
        );
        Ok(())
    }

    async fn send(&self, recipient: &str, content: &MessageContent) -> Result<SendOutcome> {
        let payload = Self::message_payload(recipient, content);
        let outcome = outbound::post_graph(
            &self.client,
            &self.messages_url(),
            &self.config.access_token,
            &payload,
        )
        .await?;
        if let SendOutcome::Delivered { message_id } = &outcome {
            tracing::debug!("WhatsApp message sent: {} → {}", message_id, recipient);
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_payload_shape() {
        let p = WhatsAppAdapter::message_payload("+84901234567", &MessageContent::text("xin chào"));
        assert_eq!(p["messaging_product"], "whatsapp");
        assert_eq!(p["to"], "+84901234567");
        assert_eq!(p["type"], "text");
        assert_eq!(p["text"]["body"], "xin chào");
    }

    #[test]
    fn test_media_payload_shape() {
        let content = MessageContent::Media {
            url: "https://cdn.example.com/promo.jpg".into(),
            caption: Some("Sale ends Sunday".into()),
        };
        let p = WhatsAppAdapter::message_payload("+84901234567", &content);
        assert_eq!(p["type"], "image");
        assert_eq!(p["image"]["link"], "https://cdn.example.com/promo.jpg");
        assert_eq!(p["image"]["caption"], "Sale ends Sunday");
    }

    #[tokio::test]
    async fn test_connect_requires_credentials() {
        let adapter = WhatsAppAdapter::new(WhatsAppConfig::default());
        let err = adapter.connect().await.unwrap_err();
        assert!(matches!(err, FanoutError::Config(_)));
    }
}
