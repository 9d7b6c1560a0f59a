//! # Fanout Channels
//! Channel adapter implementations for the three supported platforms.
//!
//! All three speak Facebook Graph API dialects; the shared
//! request/normalization plumbing lives in [`outbound`].

pub mod instagram;
pub mod messenger;
pub mod outbound;
pub mod whatsapp;

pub use instagram::InstagramAdapter;
pub use messenger::MessengerAdapter;
pub use whatsapp::WhatsAppAdapter;

use std::sync::Arc;

use fanout_core::config::ChannelsConfig;
use fanout_core::traits::ChannelAdapter;
use fanout_core::types::ChannelKind;

/// Build the adapter for one channel from config. Returns `None` when
/// the channel has no credentials configured.
pub fn adapter_from_config(
    kind: ChannelKind,
    config: &ChannelsConfig,
) -> Option<Arc<dyn ChannelAdapter>> {
    match kind {
        ChannelKind::WhatsApp => {
            if config.whatsapp.access_token.is_empty() {
                return None;
            }
            Some(Arc::new(WhatsAppAdapter::new(config.whatsapp.clone())))
        }
        ChannelKind::Messenger => {
            if config.messenger.page_access_token.is_empty() {
                return None;
            }
            Some(Arc::new(MessengerAdapter::new(config.messenger.clone())))
        }
        ChannelKind::Instagram => {
            if config.instagram.access_token.is_empty() {
                return None;
            }
            Some(Arc::new(InstagramAdapter::new(config.instagram.clone())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fanout_core::config::ChannelsConfig;

    #[test]
    fn test_unconfigured_channels_yield_no_adapter() {
        let config = ChannelsConfig::default();
        for kind in ChannelKind::ALL {
            assert!(adapter_from_config(kind, &config).is_none());
        }
    }

    #[test]
    fn test_configured_whatsapp_builds() {
        let mut config = ChannelsConfig::default();
        config.whatsapp.access_token = "tok".into();
        config.whatsapp.phone_number_id = "123".into();
        let adapter = adapter_from_config(ChannelKind::WhatsApp, &config).unwrap();
        assert_eq!(adapter.channel(), ChannelKind::WhatsApp);
    }
}
