//! Domain entities: the data model shared by the store, engine, and gateway.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use reachclaw_core::error::{ReachClawError, Result};

// ── Target contacts ──────────────────────────────

/// Connection status of a target contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactStatus {
    Pending,
    Connected,
    Rejected,
    Ignored,
}

impl ContactStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContactStatus::Pending => "pending",
            ContactStatus::Connected => "connected",
            ContactStatus::Rejected => "rejected",
            ContactStatus::Ignored => "ignored",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(ContactStatus::Pending),
            "connected" => Ok(ContactStatus::Connected),
            "rejected" => Ok(ContactStatus::Rejected),
            "ignored" => Ok(ContactStatus::Ignored),
            other => Err(ReachClawError::Validation(format!(
                "unknown contact status: {other}"
            ))),
        }
    }
}

/// A target contact found via search/import.
///
/// The engine owns `status`, `error_message`, and `last_contacted`; the
/// operator owns display attributes, `notes`, and `tags`. Never hard-deleted
/// while interactions reference it: `deleted` soft-flags the row and pending
/// interactions are cascade-cancelled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub id: i64,
    pub profile_url: String,
    pub name: String,
    pub title: String,
    pub company: String,
    pub location: String,
    pub industry: String,
    /// 1st, 2nd, 3rd.
    pub connection_degree: String,
    pub status: ContactStatus,
    pub keywords: String,
    pub tags: Vec<String>,
    pub notes: String,
    pub error_message: Option<String>,
    pub last_contacted: Option<DateTime<Utc>>,
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ── Interactions (unified task records) ──────────────────────────────

/// What kind of external action an interaction performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionType {
    Like,
    Comment,
    Follow,
    ConnectionRequest,
    Message,
    Share,
}

impl InteractionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InteractionType::Like => "like",
            InteractionType::Comment => "comment",
            InteractionType::Follow => "follow",
            InteractionType::ConnectionRequest => "connection_request",
            InteractionType::Message => "message",
            InteractionType::Share => "share",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "like" => Ok(InteractionType::Like),
            "comment" => Ok(InteractionType::Comment),
            "follow" => Ok(InteractionType::Follow),
            "connection_request" => Ok(InteractionType::ConnectionRequest),
            "message" => Ok(InteractionType::Message),
            "share" => Ok(InteractionType::Share),
            other => Err(ReachClawError::Validation(format!(
                "unknown interaction type: {other}"
            ))),
        }
    }

    /// The daily rate-limit category this action consumes.
    pub fn category(&self) -> RateCategory {
        match self {
            InteractionType::ConnectionRequest => RateCategory::Connection,
            InteractionType::Message => RateCategory::Message,
            _ => RateCategory::Interaction,
        }
    }

    /// Comment and message bodies must be non-empty before execution.
    pub fn requires_content(&self) -> bool {
        matches!(self, InteractionType::Comment | InteractionType::Message)
    }
}

/// Rate-limit dimension an action belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateCategory {
    Connection,
    Interaction,
    Message,
}

impl RateCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateCategory::Connection => "connection",
            RateCategory::Interaction => "interaction",
            RateCategory::Message => "message",
        }
    }
}

/// Task state machine.
///
/// `pending` and `in_flight` are the only non-terminal states. `failed` may
/// be reopened to `pending` solely by operator retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionStatus {
    Pending,
    InFlight,
    Completed,
    Failed,
}

impl InteractionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InteractionStatus::Pending => "pending",
            InteractionStatus::InFlight => "in_flight",
            InteractionStatus::Completed => "completed",
            InteractionStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(InteractionStatus::Pending),
            "in_flight" => Ok(InteractionStatus::InFlight),
            "completed" => Ok(InteractionStatus::Completed),
            "failed" => Ok(InteractionStatus::Failed),
            other => Err(ReachClawError::Validation(format!(
                "unknown interaction status: {other}"
            ))),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, InteractionStatus::Completed | InteractionStatus::Failed)
    }

    /// Exhaustive transition table. `operator_retry` unlocks the single
    /// failed → pending edge.
    pub fn can_transition(self, to: InteractionStatus, operator_retry: bool) -> bool {
        use InteractionStatus::*;
        match (self, to) {
            (Pending, InFlight) => true,
            (InFlight, Completed) | (InFlight, Pending) | (InFlight, Failed) => true,
            (Failed, Pending) => operator_retry,
            _ => false,
        }
    }
}

/// An interaction: one scheduled external action plus its outcome record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interaction {
    pub id: i64,
    #[serde(rename = "type")]
    pub itype: InteractionType,
    /// Contact this action targets, if any.
    pub target_id: Option<i64>,
    /// Platform object URL for like/comment/share, profile URL otherwise.
    pub target_url: String,
    pub content: Option<String>,
    pub status: InteractionStatus,
    /// Absent means "execute immediately".
    pub scheduled_for: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Non-null iff `status = failed`.
    pub error_message: Option<String>,
    pub attempt_count: u32,
    pub notes: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lease_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lease_expires_at: Option<DateTime<Utc>>,
}

impl Interaction {
    /// Per-target serialization key: contact id when known, else the URL.
    pub fn target_key(&self) -> String {
        match self.target_id {
            Some(id) => format!("contact:{id}"),
            None => format!("url:{}", self.target_url),
        }
    }

    /// Pre-enqueue validation: content rules and target presence.
    pub fn validate_for_enqueue(
        itype: InteractionType,
        target_url: &str,
        content: Option<&str>,
    ) -> Result<()> {
        if target_url.trim().is_empty() {
            return Err(ReachClawError::Validation("target is required".into()));
        }
        if itype.requires_content() && content.map_or(true, |c| c.trim().is_empty()) {
            return Err(ReachClawError::Validation(format!(
                "{} requires non-empty content",
                itype.as_str()
            )));
        }
        Ok(())
    }
}

// ── Posts ──────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostStatus {
    Draft,
    Scheduled,
    Published,
    Failed,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Draft => "draft",
            PostStatus::Scheduled => "scheduled",
            PostStatus::Published => "published",
            PostStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "draft" => Ok(PostStatus::Draft),
            "scheduled" => Ok(PostStatus::Scheduled),
            "published" => Ok(PostStatus::Published),
            "failed" => Ok(PostStatus::Failed),
            other => Err(ReachClawError::Validation(format!(
                "unknown post status: {other}"
            ))),
        }
    }
}

/// A post draft or scheduled/published feed post.
///
/// `published_at` is set exactly once, on successful publish. Hashtag order
/// is preserved for rendering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub hashtags: Vec<String>,
    pub status: PostStatus,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub published_at: Option<DateTime<Utc>>,
    /// Platform-side post id once published.
    pub platform_post_id: Option<String>,
    pub ai_generated: bool,
    pub ai_prompt: Option<String>,
    pub error_message: Option<String>,
    pub attempt_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Post {
    /// Validation at creation time: a scheduled post needs a future time.
    pub fn validate_new(
        title: &str,
        content: &str,
        status: PostStatus,
        scheduled_for: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if title.trim().is_empty() {
            return Err(ReachClawError::Validation("title is required".into()));
        }
        if content.trim().is_empty() {
            return Err(ReachClawError::Validation("content is required".into()));
        }
        match status {
            PostStatus::Scheduled => match scheduled_for {
                Some(t) if t > now => Ok(()),
                Some(_) => Err(ReachClawError::Validation(
                    "scheduled_for must be in the future".into(),
                )),
                None => Err(ReachClawError::Validation(
                    "scheduled posts require scheduled_for".into(),
                )),
            },
            PostStatus::Draft => Ok(()),
            PostStatus::Published | PostStatus::Failed => Err(ReachClawError::Validation(
                "posts are created as draft or scheduled".into(),
            )),
        }
    }
}
