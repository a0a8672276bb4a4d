//! Collaborator traits at the engine's external seams.
//!
//! The engine only ever talks to the outside world through these two traits,
//! which keeps the executor testable with scripted implementations.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Current platform-side relationship with a profile, used for the
/// idempotency re-check before sending a connection request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    NotConnected,
    RequestPending,
    Connected,
}

/// External platform automation bridge.
///
/// Every call is a real action against the third-party platform and may be
/// slow; callers wrap these in a timeout. Implementations classify outcomes
/// into `ReachClawError::Transient` vs `ReachClawError::Permanent`.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Re-check the relationship with a profile before acting on it.
    async fn connection_state(&self, profile_url: &str) -> Result<ConnectionState>;

    /// Send a connection request, optionally with a note.
    async fn send_connection_request(&self, profile_url: &str, note: Option<&str>) -> Result<()>;

    async fn like_post(&self, post_url: &str) -> Result<()>;

    async fn comment_on_post(&self, post_url: &str, text: &str) -> Result<()>;

    async fn follow_profile(&self, profile_url: &str) -> Result<()>;

    async fn send_message(&self, profile_url: &str, text: &str) -> Result<()>;

    async fn share_post(&self, post_url: &str, commentary: Option<&str>) -> Result<()>;

    /// Publish a post on the operator's own feed. Returns the platform-side
    /// post id.
    async fn publish_post(&self, title: &str, body: &str, hashtags: &[String]) -> Result<String>;
}

/// Generated post or comment text plus suggested hashtags.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneratedContent {
    pub content: String,
    pub hashtags: Vec<String>,
}

/// AI content generation collaborator.
///
/// Treated as slow and unreliable: a failure surfaces an operator-actionable
/// error and leaves content empty, it never blocks the task queue.
#[async_trait]
pub trait ContentProvider: Send + Sync {
    /// Generate post content for a topic.
    async fn generate_post(&self, topic: &str, tone: &str, length: &str)
    -> Result<GeneratedContent>;

    /// Generate a comment responding to the given post content.
    async fn generate_comment(&self, post_content: &str, tone: &str) -> Result<GeneratedContent>;
}
