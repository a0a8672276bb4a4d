//! The control loop.
//!
//! One tick: refresh the rate policy from the store, publish due posts,
//! claim a batch of due interactions, and drive each through admission and
//! execution. Tasks against different targets run concurrently; tasks
//! against the same target are serialized behind a per-target async mutex,
//! which also spans ticks so a retry can never overlap a newer task for the
//! same contact.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::sync::Mutex;

use reachclaw_core::config::EngineConfig;
use reachclaw_core::error::{ReachClawError, Result};
use reachclaw_core::traits::PlatformClient;
use reachclaw_store::{EngineDb, Interaction, Post, Reservation};

use crate::executor::{Executor, backoff_delay};
use crate::limiter::RateLimiter;
use crate::scheduler::Scheduler;

pub struct Coordinator {
    db: Arc<EngineDb>,
    platform: Arc<dyn PlatformClient>,
    scheduler: Scheduler,
    executor: Executor,
    limiter: RateLimiter,
    cfg: EngineConfig,
    target_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Coordinator {
    pub fn new(db: Arc<EngineDb>, platform: Arc<dyn PlatformClient>, cfg: EngineConfig) -> Result<Self> {
        let initial_policy = db.rate_limit_config()?;
        Ok(Self {
            scheduler: Scheduler::new(db.clone(), &cfg),
            executor: Executor::new(db.clone(), platform.clone(), cfg.clone()),
            limiter: RateLimiter::new(db.clone(), initial_policy),
            db,
            platform,
            cfg,
            target_locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Spawn the control loop on the runtime.
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    async fn run(&self) {
        tracing::info!(
            "🦀 Engine loop started (tick every {}s, batch {})",
            self.cfg.tick_interval_secs,
            self.cfg.batch_size
        );
        let mut ticker =
            tokio::time::interval(StdDuration::from_secs(self.cfg.tick_interval_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match self.tick(Utc::now()).await {
                Ok(0) => {}
                Ok(n) => tracing::debug!("Tick processed {n} item(s)"),
                Err(e) => {
                    // likely the store; back off before touching it again
                    tracing::error!(
                        "⚠️ Tick aborted, backing off {}s: {e}",
                        self.cfg.storage_backoff_secs
                    );
                    tokio::time::sleep(StdDuration::from_secs(self.cfg.storage_backoff_secs)).await;
                }
            }
        }
    }

    /// One pass over due work. Storage errors abort the whole tick; claimed
    /// leases simply expire and the work is retried later.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<usize> {
        self.limiter.reload(self.db.rate_limit_config()?)?;

        let mut processed = 0;
        for post in self.scheduler.due_posts(now)? {
            if let Err(e) = self.publish_post(&post, now).await {
                tracing::error!("Post #{} publish bookkeeping failed: {e}", post.id);
            }
            processed += 1;
        }

        let batch = self.scheduler.next_batch(now)?;
        processed += batch.len();
        let outcomes = join_all(
            batch
                .into_iter()
                .map(|task| self.process_interaction(task, now)),
        )
        .await;
        for e in outcomes.into_iter().filter_map(|r| r.err()) {
            tracing::error!("Interaction bookkeeping failed: {e}");
        }

        // Drop lock entries nobody holds anymore, otherwise the map grows by
        // one entry per target ever seen.
        self.target_locks
            .lock()
            .await
            .retain(|_, lock| Arc::strong_count(lock) > 1);
        Ok(processed)
    }

    /// Lock per target while the same connection is allocated, serializing
    /// tasks against one contact even across concurrent batches.
    async fn target_lock(&self, key: &str) -> Arc<Mutex<()>> {
        let mut map = self.target_locks.lock().await;
        map.entry(key.to_string()).or_default().clone()
    }

    async fn process_interaction(&self, task: Interaction, now: DateTime<Utc>) -> Result<()> {
        let key = task.target_key();
        let lock = self.target_lock(&key).await;
        let _guard = lock.lock().await;

        let token = task.lease_token.as_deref().ok_or_else(|| {
            ReachClawError::Conflict(format!("interaction {} has no lease", task.id))
        })?;
        match self
            .limiter
            .reserve(Some(task.itype.category()), Some(&key), now)?
        {
            Reservation::Allowed => self.executor.execute(&task, now).await,
            Reservation::Denied { retry_after } => {
                tracing::debug!(
                    "⏳ {} #{} deferred to {retry_after} by rate policy",
                    task.itype.as_str(),
                    task.id
                );
                self.db.release_interaction(task.id, token, Some(retry_after))
            }
        }
    }

    /// Publish one claimed post. Posts bypass the daily interaction budgets
    /// but still count against the hourly request budget.
    async fn publish_post(&self, post: &Post, now: DateTime<Utc>) -> Result<()> {
        match self.limiter.reserve(None, None, now)? {
            Reservation::Denied { retry_after } => {
                tracing::debug!("⏳ Post #{} deferred to {retry_after} by rate policy", post.id);
                self.db.release_post(post.id, retry_after)
            }
            Reservation::Allowed => {
                let call = self
                    .platform
                    .publish_post(&post.title, &post.content, &post.hashtags);
                let result = tokio::time::timeout(
                    StdDuration::from_secs(self.cfg.call_timeout_secs),
                    call,
                )
                .await
                .map_err(|_| {
                    ReachClawError::Transient(format!(
                        "publish exceeded {}s",
                        self.cfg.call_timeout_secs
                    ))
                })
                .and_then(|r| r);

                match result {
                    Ok(platform_post_id) => {
                        tracing::info!("📣 Post #{} published as {platform_post_id}", post.id);
                        self.db.complete_post_publish(post.id, &platform_post_id, now)
                    }
                    Err(e) if e.is_retryable() && post.attempt_count + 1 < self.cfg.max_attempts => {
                        let next = now + backoff_delay(&self.cfg, post.attempt_count);
                        tracing::warn!("🔁 Post #{} publish failed, retrying at {next}: {e}", post.id);
                        self.db.requeue_post(post.id, next)
                    }
                    Err(e) => {
                        tracing::error!("❌ Post #{} publish failed permanently: {e}", post.id);
                        self.db.fail_post(post.id, &e.to_string())
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Duration;
    use reachclaw_core::config::RateLimitConfig;
    use reachclaw_core::traits::ConnectionState;
    use reachclaw_store::{InteractionStatus, InteractionType, PostStatus};
    use std::collections::HashSet;
    use std::sync::Mutex as StdMutex;

    /// Platform stub that fails the whole test if two calls for the same
    /// target ever overlap in time.
    struct ProbePlatform {
        active: StdMutex<HashSet<String>>,
        overlaps: StdMutex<u32>,
    }

    impl ProbePlatform {
        fn new() -> Self {
            Self {
                active: StdMutex::new(HashSet::new()),
                overlaps: StdMutex::new(0),
            }
        }

        async fn touch(&self, target: &str) -> Result<()> {
            if !self.active.lock().unwrap().insert(target.to_string()) {
                *self.overlaps.lock().unwrap() += 1;
            }
            tokio::time::sleep(StdDuration::from_millis(2)).await;
            self.active.lock().unwrap().remove(target);
            Ok(())
        }
    }

    #[async_trait]
    impl PlatformClient for ProbePlatform {
        async fn connection_state(&self, _p: &str) -> Result<ConnectionState> {
            Ok(ConnectionState::NotConnected)
        }
        async fn send_connection_request(&self, p: &str, _n: Option<&str>) -> Result<()> {
            self.touch(p).await
        }
        async fn like_post(&self, p: &str) -> Result<()> {
            self.touch(p).await
        }
        async fn comment_on_post(&self, p: &str, _t: &str) -> Result<()> {
            self.touch(p).await
        }
        async fn follow_profile(&self, p: &str) -> Result<()> {
            self.touch(p).await
        }
        async fn send_message(&self, p: &str, _t: &str) -> Result<()> {
            self.touch(p).await
        }
        async fn share_post(&self, p: &str, _c: Option<&str>) -> Result<()> {
            self.touch(p).await
        }
        async fn publish_post(&self, t: &str, _b: &str, _h: &[String]) -> Result<String> {
            self.touch(t).await.map(|_| format!("urn:pf:{t}"))
        }
    }

    fn open_policy() -> serde_json::Value {
        serde_json::json!({
            "rate_limiting": {
                "max_connections_per_day": 0,
                "max_interactions_per_day": 0,
                "max_messages_per_day": 0,
                "max_requests_per_hour": 0,
                "interaction_interval_minutes": 0,
            }
        })
    }

    fn coordinator(db: Arc<EngineDb>, batch_size: usize) -> (Arc<ProbePlatform>, Coordinator) {
        let cfg = EngineConfig {
            batch_size,
            jitter_factor: 0.0,
            ..Default::default()
        };
        let probe = Arc::new(ProbePlatform::new());
        let coord = Coordinator::new(db, probe.clone(), cfg).unwrap();
        (probe, coord)
    }

    #[tokio::test]
    async fn test_same_target_tasks_never_overlap() {
        let db = Arc::new(EngineDb::open_in_memory().unwrap());
        db.put_settings(&open_policy()).unwrap();
        for i in 0..100 {
            db.enqueue_interaction(
                InteractionType::Like,
                None,
                &format!("https://x/p/{}", i % 10),
                None,
                None,
                "",
            )
            .unwrap();
        }
        let (probe, coord) = coordinator(db.clone(), 100);
        let now = Utc::now();
        assert_eq!(coord.tick(now).await.unwrap(), 100);

        assert_eq!(*probe.overlaps.lock().unwrap(), 0);
        let done = db.list_interactions(Some(InteractionStatus::Completed)).unwrap();
        assert_eq!(done.len(), 100);
        let completed_per_target = done.iter().filter(|t| t.target_url.ends_with("/p/3")).count();
        assert_eq!(completed_per_target, 10);

        // no task holds a target lock anymore, so the map must be swept clean
        assert!(coord.target_locks.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_denied_task_is_deferred_not_failed() {
        let db = Arc::new(EngineDb::open_in_memory().unwrap());
        db.put_settings(&serde_json::json!({
            "rate_limiting": {
                "max_connections_per_day": 0,
                "max_interactions_per_day": 1,
                "max_messages_per_day": 0,
                "max_requests_per_hour": 0,
                "interaction_interval_minutes": 0,
            }
        }))
        .unwrap();
        db.enqueue_interaction(InteractionType::Like, None, "https://x/p/1", None, None, "")
            .unwrap();
        db.enqueue_interaction(InteractionType::Like, None, "https://x/p/2", None, None, "")
            .unwrap();

        let (_probe, coord) = coordinator(db.clone(), 10);
        let now = Utc::now();
        coord.tick(now).await.unwrap();

        let all = db.list_interactions(None).unwrap();
        let completed = all.iter().filter(|t| t.status == InteractionStatus::Completed).count();
        let pending: Vec<_> = all
            .iter()
            .filter(|t| t.status == InteractionStatus::Pending)
            .collect();
        assert_eq!(completed, 1);
        assert_eq!(pending.len(), 1);
        // deferral carries no attempt and no error, only a later due time
        assert_eq!(pending[0].attempt_count, 0);
        assert!(pending[0].error_message.is_none());
        let due = pending[0].scheduled_for.unwrap();
        assert!(due > now);

        // the next day's budget admits the carried-over task
        coord.tick(due).await.unwrap();
        let after = db.list_interactions(Some(InteractionStatus::Completed)).unwrap();
        assert_eq!(after.len(), 2);
    }

    #[tokio::test]
    async fn test_policy_hot_reload_between_ticks() {
        let db = Arc::new(EngineDb::open_in_memory().unwrap());
        db.put_settings(&open_policy()).unwrap();
        let (_probe, coord) = coordinator(db.clone(), 10);
        let now = Utc::now();
        coord.tick(now).await.unwrap();
        let v1 = coord.limiter().current().unwrap().version;

        let mut tightened = RateLimitConfig::default();
        tightened.max_connections_per_day = 1;
        db.put_settings(&serde_json::json!({ "rate_limiting": tightened })).unwrap();
        coord.tick(now).await.unwrap();
        let snap = coord.limiter().current().unwrap();
        assert!(snap.version > v1);
        assert_eq!(snap.policy.max_connections_per_day, 1);
    }

    #[tokio::test]
    async fn test_scheduled_post_publishes_once_due() {
        let db = Arc::new(EngineDb::open_in_memory().unwrap());
        db.put_settings(&open_policy()).unwrap();
        let now = Utc::now();
        let post = db
            .create_post(
                "Hello",
                "First post.",
                &[],
                PostStatus::Scheduled,
                Some(now + Duration::minutes(5)),
                false,
                None,
            )
            .unwrap();

        let (_probe, coord) = coordinator(db.clone(), 10);
        coord.tick(now).await.unwrap();
        assert_eq!(db.get_post(post.id).unwrap().status, PostStatus::Scheduled);

        coord.tick(now + Duration::minutes(6)).await.unwrap();
        let published = db.get_post(post.id).unwrap();
        assert_eq!(published.status, PostStatus::Published);
        assert!(published.platform_post_id.unwrap().contains("Hello"));
    }
}
