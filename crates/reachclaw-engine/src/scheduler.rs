//! Batch selection.
//!
//! Thin wall-clock wrapper over the store's claim queries. All ordering and
//! lease semantics live in SQL so they hold across process restarts; this
//! layer only decides how much to pull per tick.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use reachclaw_core::config::EngineConfig;
use reachclaw_core::error::Result;
use reachclaw_store::{EngineDb, Interaction, Post};

pub struct Scheduler {
    db: Arc<EngineDb>,
    batch_size: usize,
    lease_secs: u64,
}

impl Scheduler {
    pub fn new(db: Arc<EngineDb>, cfg: &EngineConfig) -> Self {
        Self {
            db,
            batch_size: cfg.batch_size,
            lease_secs: cfg.lease_timeout_secs,
        }
    }

    /// Claim the next batch of due interactions, leased to this process.
    pub fn next_batch(&self, now: DateTime<Utc>) -> Result<Vec<Interaction>> {
        let batch = self
            .db
            .claim_due_interactions(now, self.batch_size, self.lease_secs)?;
        if !batch.is_empty() {
            tracing::debug!("📥 Claimed {} interaction(s)", batch.len());
        }
        Ok(batch)
    }

    /// Claim scheduled posts whose publish time has arrived.
    pub fn due_posts(&self, now: DateTime<Utc>) -> Result<Vec<Post>> {
        self.db.claim_due_posts(now, self.batch_size, self.lease_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use reachclaw_store::InteractionType;

    #[test]
    fn test_batch_size_is_respected() {
        let db = Arc::new(EngineDb::open_in_memory().unwrap());
        let cfg = EngineConfig {
            batch_size: 2,
            ..Default::default()
        };
        for i in 0..5 {
            db.enqueue_interaction(
                InteractionType::Like,
                None,
                &format!("https://x/p/{i}"),
                None,
                None,
                "",
            )
            .unwrap();
        }
        let scheduler = Scheduler::new(db, &cfg);
        let now = Utc::now();
        assert_eq!(scheduler.next_batch(now).unwrap().len(), 2);
        assert_eq!(scheduler.next_batch(now).unwrap().len(), 2);
        assert_eq!(scheduler.next_batch(now).unwrap().len(), 1);
        assert!(scheduler.next_batch(now).unwrap().is_empty());
    }

    #[test]
    fn test_future_work_stays_queued() {
        let db = Arc::new(EngineDb::open_in_memory().unwrap());
        let now = Utc::now();
        db.enqueue_interaction(
            InteractionType::Like,
            None,
            "https://x/p/1",
            None,
            Some(now + Duration::minutes(10)),
            "",
        )
        .unwrap();
        let scheduler = Scheduler::new(db, &EngineConfig::default());
        assert!(scheduler.next_batch(now).unwrap().is_empty());
        assert_eq!(
            scheduler
                .next_batch(now + Duration::minutes(11))
                .unwrap()
                .len(),
            1
        );
    }
}
