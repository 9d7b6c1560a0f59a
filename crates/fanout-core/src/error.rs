//! Error taxonomy for the fanout engine.
//!
//! The split matters for callers: `Validation` and `CooldownActive` are
//! surfaced synchronously at campaign creation, everything else is an
//! operational condition handled inside the engine.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, FanoutError>;

#[derive(Debug, Error)]
pub enum FanoutError {
    /// The caller supplied a bad campaign definition. The campaign is
    /// never created.
    #[error("validation failed: {0}")]
    Validation(String),

    /// An anti-ban limit is active for the requested channel account.
    #[error("cooldown active until {until}")]
    CooldownActive { until: DateTime<Utc> },

    /// A platform adapter failed in a way it could not classify itself
    /// (transport setup, response decoding). Workers treat this as a
    /// transient outcome but log it distinctly.
    #[error("channel error: {0}")]
    Channel(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FanoutError {
    /// True for errors a caller can fix by changing the request.
    pub fn is_caller_fault(&self) -> bool {
        matches!(self, FanoutError::Validation(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_detail() {
        let e = FanoutError::Validation("recipients empty".into());
        assert!(e.to_string().contains("recipients empty"));
        assert!(e.is_caller_fault());
    }

    #[test]
    fn test_cooldown_carries_expiry() {
        let until = Utc::now();
        let e = FanoutError::CooldownActive { until };
        assert!(!e.is_caller_fault());
        assert!(e.to_string().starts_with("cooldown active"));
    }
}
