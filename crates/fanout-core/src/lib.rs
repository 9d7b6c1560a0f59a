//! # Fanout Core
//! Shared domain types, errors, traits and configuration.
//!
//! Everything the other fanout crates agree on lives here: the error
//! taxonomy, the campaign/task data model, the `ChannelAdapter` trait
//! and the TOML configuration tree.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::FanoutConfig;
pub use error::{FanoutError, Result};
