//! # ReachClaw Core
//!
//! Shared foundation for the outreach automation engine: configuration,
//! the error taxonomy used across all crates, and the traits that external
//! collaborators (platform bridge, content generator) implement.

pub mod config;
pub mod error;
pub mod traits;

pub use config::ReachClawConfig;
pub use error::{ReachClawError, Result};
