//! Single-task execution with idempotent retry.
//!
//! Every attempt is wrapped in a call timeout and classified: retryable
//! failures requeue the task with exponential backoff, terminal failures
//! mark it failed with the operator-visible error. Connection requests
//! re-check on-platform state before sending, so a retry after a crashed
//! attempt can never deliver the same request twice.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use rand::Rng;

use reachclaw_core::config::EngineConfig;
use reachclaw_core::error::{ReachClawError, Result};
use reachclaw_core::traits::{ConnectionState, PlatformClient};
use reachclaw_store::{EngineDb, Interaction, InteractionType};

/// Delay before attempt `attempt + 1`: base doubled per attempt, capped,
/// plus a random jitter fraction so retries from one burst spread out.
pub fn backoff_delay(cfg: &EngineConfig, attempt: u32) -> Duration {
    let factor = 1u64.checked_shl(attempt.min(16)).unwrap_or(u64::MAX);
    let capped = cfg
        .retry_base_secs
        .saturating_mul(factor)
        .min(cfg.retry_cap_secs);
    let jitter_max = (capped as f64 * cfg.jitter_factor) as i64;
    let jitter = if jitter_max > 0 {
        rand::thread_rng().gen_range(0..=jitter_max)
    } else {
        0
    };
    Duration::seconds(capped as i64 + jitter)
}

pub struct Executor {
    db: Arc<EngineDb>,
    platform: Arc<dyn PlatformClient>,
    cfg: EngineConfig,
}

impl Executor {
    pub fn new(db: Arc<EngineDb>, platform: Arc<dyn PlatformClient>, cfg: EngineConfig) -> Self {
        Self { db, platform, cfg }
    }

    /// Run one claimed interaction to an outcome and persist it.
    pub async fn execute(&self, task: &Interaction, now: DateTime<Utc>) -> Result<()> {
        let token = task
            .lease_token
            .as_deref()
            .ok_or_else(|| ReachClawError::Conflict(format!("interaction {} has no lease", task.id)))?;

        match self.attempt(task).await {
            Ok(()) => {
                tracing::info!("✅ {} #{} done ({})", task.itype.as_str(), task.id, task.target_url);
                self.db.complete_interaction(task.id, token, now)
            }
            Err(e) if e.is_retryable() && task.attempt_count + 1 < self.cfg.max_attempts => {
                let mut next = now + backoff_delay(&self.cfg, task.attempt_count);
                if let ReachClawError::RateLimited { retry_after } = &e {
                    next = next.max(*retry_after);
                }
                tracing::warn!(
                    "🔁 {} #{} attempt {} failed, retrying at {next}: {e}",
                    task.itype.as_str(),
                    task.id,
                    task.attempt_count + 1
                );
                self.db.requeue_interaction(task.id, token, next)
            }
            Err(e) => {
                tracing::error!("❌ {} #{} failed permanently: {e}", task.itype.as_str(), task.id);
                self.db.fail_interaction(task.id, token, &e.to_string())
            }
        }
    }

    /// One platform attempt, timeout-bounded.
    async fn attempt(&self, task: &Interaction) -> Result<()> {
        // A send that succeeded on-platform but never got its ack recorded
        // must not repeat. That includes a crash inside a first attempt, so
        // the check runs on every attempt; the platform state is the truth.
        if task.itype == InteractionType::ConnectionRequest {
            match self.call(self.platform.connection_state(&task.target_url)).await? {
                ConnectionState::Connected | ConnectionState::RequestPending => {
                    tracing::info!(
                        "↩️ Connection request #{} already delivered, skipping resend",
                        task.id
                    );
                    return Ok(());
                }
                ConnectionState::NotConnected => {}
            }
        }

        let content = task.content.as_deref();
        match task.itype {
            InteractionType::Like => self.call(self.platform.like_post(&task.target_url)).await,
            InteractionType::Comment => {
                let text = content.ok_or_else(|| {
                    ReachClawError::Validation(format!("comment #{} lost its content", task.id))
                })?;
                self.call(self.platform.comment_on_post(&task.target_url, text)).await
            }
            InteractionType::Follow => {
                self.call(self.platform.follow_profile(&task.target_url)).await
            }
            InteractionType::ConnectionRequest => {
                self.call(self.platform.send_connection_request(&task.target_url, content))
                    .await
            }
            InteractionType::Message => {
                let text = content.ok_or_else(|| {
                    ReachClawError::Validation(format!("message #{} lost its content", task.id))
                })?;
                self.call(self.platform.send_message(&task.target_url, text)).await
            }
            InteractionType::Share => {
                self.call(self.platform.share_post(&task.target_url, content)).await
            }
        }
    }

    async fn call<T>(&self, fut: impl std::future::Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(StdDuration::from_secs(self.cfg.call_timeout_secs), fut)
            .await
            .map_err(|_| {
                ReachClawError::Transient(format!(
                    "platform call exceeded {}s",
                    self.cfg.call_timeout_secs
                ))
            })?
    }
}
