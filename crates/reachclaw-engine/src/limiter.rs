//! Policy snapshots and quota admission.
//!
//! The active policy is an immutable versioned snapshot. The coordinator
//! refreshes it from the store between ticks, so a settings change never
//! rewrites the rules under a batch that is already half-executed.

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};

use reachclaw_core::config::RateLimitConfig;
use reachclaw_core::error::{ReachClawError, Result};
use reachclaw_store::{EngineDb, RateCategory, Reservation};

/// An immutable view of the rate policy at a point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicySnapshot {
    pub version: u64,
    pub policy: RateLimitConfig,
}

/// Admission control over the store's counter tables.
pub struct RateLimiter {
    db: Arc<EngineDb>,
    snapshot: RwLock<PolicySnapshot>,
}

impl RateLimiter {
    pub fn new(db: Arc<EngineDb>, initial: RateLimitConfig) -> Self {
        Self {
            db,
            snapshot: RwLock::new(PolicySnapshot {
                version: 1,
                policy: initial,
            }),
        }
    }

    /// The snapshot in effect right now.
    pub fn current(&self) -> Result<PolicySnapshot> {
        self.snapshot
            .read()
            .map(|s| s.clone())
            .map_err(|e| ReachClawError::Storage(e.to_string()))
    }

    /// Swap in a new policy if it differs from the active one. Returns the
    /// new version when a swap happened.
    pub fn reload(&self, policy: RateLimitConfig) -> Result<Option<u64>> {
        let mut guard = self
            .snapshot
            .write()
            .map_err(|e| ReachClawError::Storage(e.to_string()))?;
        if guard.policy == policy {
            return Ok(None);
        }
        let version = guard.version + 1;
        *guard = PolicySnapshot { version, policy };
        tracing::info!("🔧 Rate policy reloaded (v{version})");
        Ok(Some(version))
    }

    /// Check and consume quota for one action under the current snapshot.
    pub fn reserve(
        &self,
        category: Option<RateCategory>,
        target_key: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Reservation> {
        let snapshot = self.current()?;
        self.db.reserve(&snapshot.policy, category, target_key, now)
    }
}
