//! SQLite-backed entity store.
//!
//! One `Mutex<Connection>` in WAL mode. Every engine-triggered mutation is a
//! guarded UPDATE whose WHERE clause encodes the legal state transition, so
//! an illegal transition affects zero rows and surfaces as a conflict instead
//! of corrupting state. Quota consumption happens only inside `reserve`,
//! which checks and increments all applicable counters in one transaction.

use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};
use rusqlite::{Connection, params};
use std::path::Path;
use std::sync::Mutex;

use reachclaw_core::config::RateLimitConfig;
use reachclaw_core::error::{ReachClawError, Result};

use crate::entities::{
    Contact, ContactStatus, Interaction, InteractionStatus, InteractionType, Post, PostStatus,
    RateCategory,
};

/// Outcome of a quota reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reservation {
    Allowed,
    /// Earliest instant every currently-violated ceiling admits the action.
    Denied { retry_after: DateTime<Utc> },
}

/// The engine database.
pub struct EngineDb {
    conn: Mutex<Connection>,
}

fn storage<E: std::fmt::Display>(e: E) -> ReachClawError {
    ReachClawError::Storage(e.to_string())
}

/// A corrupt stored timestamp is a storage fault, not a value to guess at:
/// defaulting here could silently re-order the queue.
fn parse_dt(s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn parse_dt_opt(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|d| d.with_timezone(&Utc))
}

/// UTC day window key, e.g. "2026-08-26".
fn day_key(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%d").to_string()
}

/// UTC hour window key, e.g. "2026-08-26T14".
fn hour_key(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%dT%H").to_string()
}

fn next_day_start(now: DateTime<Utc>) -> DateTime<Utc> {
    let d = now.date_naive() + Duration::days(1);
    Utc.with_ymd_and_hms(d.year(), d.month(), d.day(), 0, 0, 0)
        .single()
        .unwrap_or(now + Duration::days(1))
}

fn next_hour_start(now: DateTime<Utc>) -> DateTime<Utc> {
    (now + Duration::hours(1))
        .with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(now + Duration::hours(1))
}

/// Synthetic counter category for the hourly all-actions budget.
const REQUESTS: &str = "requests";

impl EngineDb {
    /// Open or create the database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(storage)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .ok();
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    /// In-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(storage)?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock().map_err(storage)?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS contacts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                profile_url TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL DEFAULT '',
                title TEXT NOT NULL DEFAULT '',
                company TEXT NOT NULL DEFAULT '',
                location TEXT NOT NULL DEFAULT '',
                industry TEXT NOT NULL DEFAULT '',
                connection_degree TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL DEFAULT 'pending',
                keywords TEXT NOT NULL DEFAULT '',
                tags_json TEXT NOT NULL DEFAULT '[]',
                notes TEXT NOT NULL DEFAULT '',
                error_message TEXT,
                last_contacted TEXT,
                deleted INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS interactions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                itype TEXT NOT NULL,
                target_id INTEGER,
                target_url TEXT NOT NULL,
                content TEXT,
                status TEXT NOT NULL DEFAULT 'pending',
                scheduled_for TEXT,
                created_at TEXT NOT NULL,
                completed_at TEXT,
                error_message TEXT,
                attempt_count INTEGER NOT NULL DEFAULT 0,
                notes TEXT NOT NULL DEFAULT '',
                lease_token TEXT,
                lease_expires_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_interactions_due
                ON interactions (status, scheduled_for, created_at);

            CREATE TABLE IF NOT EXISTS posts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                content TEXT NOT NULL,
                hashtags_json TEXT NOT NULL DEFAULT '[]',
                status TEXT NOT NULL DEFAULT 'draft',
                scheduled_for TEXT,
                published_at TEXT,
                platform_post_id TEXT,
                ai_generated INTEGER NOT NULL DEFAULT 0,
                ai_prompt TEXT,
                error_message TEXT,
                attempt_count INTEGER NOT NULL DEFAULT 0,
                lease_token TEXT,
                lease_expires_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS rate_counters (
                category TEXT NOT NULL,
                window_key TEXT NOT NULL,
                count INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (category, window_key)
            );

            -- last action instant per target, for minimum spacing
            CREATE TABLE IF NOT EXISTS target_actions (
                target_key TEXT PRIMARY KEY,
                last_action_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL DEFAULT '',
                updated_at TEXT NOT NULL
            );
        ",
        )
        .map_err(storage)?;
        Ok(())
    }

    // ── Contacts ──────────────────────────────

    fn row_to_contact(row: &rusqlite::Row<'_>) -> rusqlite::Result<Contact> {
        let status: String = row.get(8)?;
        let tags_json: String = row.get(10)?;
        Ok(Contact {
            id: row.get(0)?,
            profile_url: row.get(1)?,
            name: row.get(2)?,
            title: row.get(3)?,
            company: row.get(4)?,
            location: row.get(5)?,
            industry: row.get(6)?,
            connection_degree: row.get(7)?,
            status: ContactStatus::parse(&status).unwrap_or(ContactStatus::Pending),
            keywords: row.get(9)?,
            tags: serde_json::from_str(&tags_json).unwrap_or_default(),
            notes: row.get(11)?,
            error_message: row.get(12)?,
            last_contacted: parse_dt_opt(row.get(13)?),
            deleted: row.get::<_, i32>(14)? != 0,
            created_at: parse_dt(&row.get::<_, String>(15)?)?,
            updated_at: parse_dt(&row.get::<_, String>(16)?)?,
        })
    }

    const CONTACT_COLS: &'static str = "id, profile_url, name, title, company, location, industry, \
         connection_degree, status, keywords, tags_json, notes, error_message, last_contacted, \
         deleted, created_at, updated_at";

    /// Create a contact from search/import. Duplicate profile URLs conflict.
    #[allow(clippy::too_many_arguments)]
    pub fn create_contact(
        &self,
        profile_url: &str,
        name: &str,
        title: &str,
        company: &str,
        location: &str,
        industry: &str,
        connection_degree: &str,
        keywords: &str,
        tags: &[String],
    ) -> Result<Contact> {
        if profile_url.trim().is_empty() {
            return Err(ReachClawError::Validation("profile_url is required".into()));
        }
        let conn = self.conn.lock().map_err(storage)?;
        let now = Utc::now().to_rfc3339();
        let tags_json = serde_json::to_string(tags).unwrap_or_else(|_| "[]".into());
        let res = conn.execute(
            "INSERT INTO contacts (profile_url, name, title, company, location, industry,
             connection_degree, keywords, tags_json, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
            params![
                profile_url,
                name,
                title,
                company,
                location,
                industry,
                connection_degree,
                keywords,
                tags_json,
                now
            ],
        );
        match res {
            Ok(_) => {
                let id = conn.last_insert_rowid();
                drop(conn);
                self.get_contact(id)
            }
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(ReachClawError::Conflict(format!(
                    "contact already exists: {profile_url}"
                )))
            }
            Err(e) => Err(storage(e)),
        }
    }

    pub fn get_contact(&self, id: i64) -> Result<Contact> {
        let conn = self.conn.lock().map_err(storage)?;
        conn.query_row(
            &format!("SELECT {} FROM contacts WHERE id=?1", Self::CONTACT_COLS),
            params![id],
            Self::row_to_contact,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => {
                ReachClawError::NotFound(format!("contact {id}"))
            }
            other => storage(other),
        })
    }

    /// List non-deleted contacts, newest first.
    pub fn list_contacts(&self) -> Result<Vec<Contact>> {
        let conn = self.conn.lock().map_err(storage)?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM contacts WHERE deleted=0 ORDER BY created_at DESC",
                Self::CONTACT_COLS
            ))
            .map_err(storage)?;
        let rows = stmt
            .query_map([], Self::row_to_contact)
            .map_err(storage)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Filtered search over non-deleted contacts. Empty filters match all.
    pub fn search_contacts(
        &self,
        q: &str,
        industry: &str,
        location: &str,
        status: Option<ContactStatus>,
    ) -> Result<Vec<Contact>> {
        let conn = self.conn.lock().map_err(storage)?;
        let like = format!("%{q}%");
        let industry_like = format!("%{industry}%");
        let location_like = format!("%{location}%");
        let status_s = status.map(|s| s.as_str().to_string()).unwrap_or_default();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM contacts WHERE deleted=0
                 AND (?1 = '' OR name LIKE ?2 OR title LIKE ?2 OR company LIKE ?2 OR keywords LIKE ?2)
                 AND (?3 = '' OR industry LIKE ?4)
                 AND (?5 = '' OR location LIKE ?6)
                 AND (?7 = '' OR status = ?7)
                 ORDER BY created_at DESC",
                Self::CONTACT_COLS
            ))
            .map_err(storage)?;
        let rows = stmt
            .query_map(
                params![q, like, industry, industry_like, location, location_like, status_s],
                Self::row_to_contact,
            )
            .map_err(storage)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Operator edit of display fields, notes, and tags. The engine-owned
    /// fields (status, error_message, last_contacted) are not touched here.
    #[allow(clippy::too_many_arguments)]
    pub fn update_contact(
        &self,
        id: i64,
        name: Option<&str>,
        title: Option<&str>,
        company: Option<&str>,
        location: Option<&str>,
        industry: Option<&str>,
        notes: Option<&str>,
        tags: Option<&[String]>,
        status: Option<ContactStatus>,
    ) -> Result<Contact> {
        let existing = self.get_contact(id)?;
        if existing.deleted {
            return Err(ReachClawError::NotFound(format!("contact {id}")));
        }
        let conn = self.conn.lock().map_err(storage)?;
        let tags_json = serde_json::to_string(tags.unwrap_or(&existing.tags))
            .unwrap_or_else(|_| "[]".into());
        conn.execute(
            "UPDATE contacts SET name=?1, title=?2, company=?3, location=?4, industry=?5,
             notes=?6, tags_json=?7, status=?8, updated_at=?9 WHERE id=?10 AND deleted=0",
            params![
                name.unwrap_or(&existing.name),
                title.unwrap_or(&existing.title),
                company.unwrap_or(&existing.company),
                location.unwrap_or(&existing.location),
                industry.unwrap_or(&existing.industry),
                notes.unwrap_or(&existing.notes),
                tags_json,
                status.unwrap_or(existing.status).as_str(),
                Utc::now().to_rfc3339(),
                id
            ],
        )
        .map_err(storage)?;
        drop(conn);
        self.get_contact(id)
    }

    /// Soft-delete a contact and cancel its pending interactions, in one
    /// transaction. In-flight interactions are left to finish.
    pub fn delete_contact(&self, id: i64) -> Result<usize> {
        let mut conn = self.conn.lock().map_err(storage)?;
        let tx = conn.transaction().map_err(storage)?;
        let changed = tx
            .execute(
                "UPDATE contacts SET deleted=1, updated_at=?1 WHERE id=?2 AND deleted=0",
                params![Utc::now().to_rfc3339(), id],
            )
            .map_err(storage)?;
        if changed == 0 {
            return Err(ReachClawError::NotFound(format!("contact {id}")));
        }
        let cancelled = tx
            .execute(
                "DELETE FROM interactions WHERE target_id=?1 AND status='pending'",
                params![id],
            )
            .map_err(storage)?;
        tx.commit().map_err(storage)?;
        if cancelled > 0 {
            tracing::info!("🗑️ Contact {id} deleted, {cancelled} pending interaction(s) cancelled");
        }
        Ok(cancelled)
    }

    // ── Interactions ──────────────────────────────

    fn row_to_interaction(row: &rusqlite::Row<'_>) -> rusqlite::Result<Interaction> {
        let itype: String = row.get(1)?;
        let status: String = row.get(5)?;
        Ok(Interaction {
            id: row.get(0)?,
            itype: InteractionType::parse(&itype).unwrap_or(InteractionType::Like),
            target_id: row.get(2)?,
            target_url: row.get(3)?,
            content: row.get(4)?,
            status: InteractionStatus::parse(&status).unwrap_or(InteractionStatus::Pending),
            scheduled_for: parse_dt_opt(row.get(6)?),
            created_at: parse_dt(&row.get::<_, String>(7)?)?,
            completed_at: parse_dt_opt(row.get(8)?),
            error_message: row.get(9)?,
            attempt_count: row.get(10)?,
            notes: row.get(11)?,
            lease_token: row.get(12)?,
            lease_expires_at: parse_dt_opt(row.get(13)?),
        })
    }

    const INTERACTION_COLS: &'static str = "id, itype, target_id, target_url, content, status, \
         scheduled_for, created_at, completed_at, error_message, attempt_count, notes, \
         lease_token, lease_expires_at";

    /// Validate and enqueue a new interaction as `pending`.
    pub fn enqueue_interaction(
        &self,
        itype: InteractionType,
        target_id: Option<i64>,
        target_url: &str,
        content: Option<&str>,
        scheduled_for: Option<DateTime<Utc>>,
        notes: &str,
    ) -> Result<Interaction> {
        Interaction::validate_for_enqueue(itype, target_url, content)?;
        if let Some(cid) = target_id {
            // reject enqueues against deleted contacts
            let contact = self.get_contact(cid)?;
            if contact.deleted {
                return Err(ReachClawError::Validation(format!(
                    "contact {cid} is deleted"
                )));
            }
        }
        let conn = self.conn.lock().map_err(storage)?;
        conn.execute(
            "INSERT INTO interactions (itype, target_id, target_url, content, scheduled_for, created_at, notes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                itype.as_str(),
                target_id,
                target_url,
                content,
                scheduled_for.map(|t| t.to_rfc3339()),
                Utc::now().to_rfc3339(),
                notes
            ],
        )
        .map_err(storage)?;
        let id = conn.last_insert_rowid();
        drop(conn);
        self.get_interaction(id)
    }

    pub fn get_interaction(&self, id: i64) -> Result<Interaction> {
        let conn = self.conn.lock().map_err(storage)?;
        conn.query_row(
            &format!(
                "SELECT {} FROM interactions WHERE id=?1",
                Self::INTERACTION_COLS
            ),
            params![id],
            Self::row_to_interaction,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => {
                ReachClawError::NotFound(format!("interaction {id}"))
            }
            other => storage(other),
        })
    }

    /// List interactions, optionally filtered by status, newest first.
    pub fn list_interactions(&self, status: Option<InteractionStatus>) -> Result<Vec<Interaction>> {
        let conn = self.conn.lock().map_err(storage)?;
        let status_s = status.map(|s| s.as_str().to_string()).unwrap_or_default();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM interactions WHERE (?1 = '' OR status = ?1)
                 ORDER BY created_at DESC",
                Self::INTERACTION_COLS
            ))
            .map_err(storage)?;
        let rows = stmt
            .query_map(params![status_s], Self::row_to_interaction)
            .map_err(storage)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Content edit, allowed only while pending (checked in the UPDATE's
    /// WHERE clause, so a concurrent claim loses no writes).
    pub fn update_interaction_content(&self, id: i64, content: &str) -> Result<Interaction> {
        let existing = self.get_interaction(id)?;
        if existing.itype.requires_content() && content.trim().is_empty() {
            return Err(ReachClawError::Validation(format!(
                "{} requires non-empty content",
                existing.itype.as_str()
            )));
        }
        let conn = self.conn.lock().map_err(storage)?;
        let changed = conn
            .execute(
                "UPDATE interactions SET content=?1 WHERE id=?2 AND status='pending'",
                params![content, id],
            )
            .map_err(storage)?;
        drop(conn);
        if changed == 0 {
            return Err(ReachClawError::Conflict(format!(
                "interaction {id} is {} and can no longer be edited",
                existing.status.as_str()
            )));
        }
        self.get_interaction(id)
    }

    /// Operator cancel of a pending interaction.
    pub fn delete_interaction(&self, id: i64) -> Result<()> {
        let existing = self.get_interaction(id)?;
        let conn = self.conn.lock().map_err(storage)?;
        let changed = conn
            .execute(
                "DELETE FROM interactions WHERE id=?1 AND status='pending'",
                params![id],
            )
            .map_err(storage)?;
        if changed == 0 {
            return Err(ReachClawError::Conflict(format!(
                "interaction {id} is {} and cannot be cancelled",
                existing.status.as_str()
            )));
        }
        Ok(())
    }

    /// Operator-initiated retry: the only legal failed → pending edge.
    /// Resets the attempt counter and clears the error.
    pub fn retry_interaction(&self, id: i64) -> Result<Interaction> {
        let existing = self.get_interaction(id)?;
        let conn = self.conn.lock().map_err(storage)?;
        let changed = conn
            .execute(
                "UPDATE interactions SET status='pending', attempt_count=0, error_message=NULL,
                 scheduled_for=NULL WHERE id=?1 AND status='failed'",
                params![id],
            )
            .map_err(storage)?;
        drop(conn);
        if changed == 0 {
            return Err(ReachClawError::Conflict(format!(
                "interaction {id} is {}, only failed interactions can be retried",
                existing.status.as_str()
            )));
        }
        self.get_interaction(id)
    }

    /// Revert expired leases, then claim up to `limit` due pending
    /// interactions in scheduling order, flipping them to `in_flight` with a
    /// fresh lease. One transaction, so a crashed sibling can never
    /// double-claim.
    ///
    /// Ordering: immediate tasks first, then `scheduled_for` ascending
    /// (past-due included), ties broken by `created_at` (FIFO).
    pub fn claim_due_interactions(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        lease_secs: u64,
    ) -> Result<Vec<Interaction>> {
        let mut conn = self.conn.lock().map_err(storage)?;
        let tx = conn.transaction().map_err(storage)?;

        let reverted = tx
            .execute(
                "UPDATE interactions SET status='pending', lease_token=NULL, lease_expires_at=NULL
                 WHERE status='in_flight' AND lease_expires_at < ?1",
                params![now.to_rfc3339()],
            )
            .map_err(storage)?;
        if reverted > 0 {
            tracing::warn!("⏱️ Reverted {reverted} expired lease(s) to pending");
        }

        let ids: Vec<i64> = {
            let mut stmt = tx
                .prepare(
                    "SELECT id FROM interactions
                     WHERE status='pending' AND (scheduled_for IS NULL OR scheduled_for <= ?1)
                     ORDER BY CASE WHEN scheduled_for IS NULL THEN 0 ELSE 1 END,
                              scheduled_for ASC, created_at ASC
                     LIMIT ?2",
                )
                .map_err(storage)?;
            stmt.query_map(params![now.to_rfc3339(), limit as i64], |row| row.get(0))
                .map_err(storage)?
                .filter_map(|r| r.ok())
                .collect()
        };

        let expires = (now + Duration::seconds(lease_secs as i64)).to_rfc3339();
        let mut claimed = Vec::with_capacity(ids.len());
        for id in ids {
            let token = uuid::Uuid::new_v4().to_string();
            tx.execute(
                "UPDATE interactions SET status='in_flight', lease_token=?1, lease_expires_at=?2
                 WHERE id=?3 AND status='pending'",
                params![token, expires, id],
            )
            .map_err(storage)?;
            claimed.push(id);
        }
        tx.commit().map_err(storage)?;
        drop(conn);

        claimed.into_iter().map(|id| self.get_interaction(id)).collect()
    }

    /// Apply a successful outcome. Updates the associated contact (connect
    /// outcome, last_contacted) in the same transaction.
    pub fn complete_interaction(
        &self,
        id: i64,
        lease_token: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let task = self.get_interaction(id)?;
        let mut conn = self.conn.lock().map_err(storage)?;
        let tx = conn.transaction().map_err(storage)?;
        let changed = tx
            .execute(
                "UPDATE interactions SET status='completed', completed_at=?1, error_message=NULL,
                 lease_token=NULL, lease_expires_at=NULL
                 WHERE id=?2 AND status='in_flight' AND lease_token=?3",
                params![now.to_rfc3339(), id, lease_token],
            )
            .map_err(storage)?;
        if changed == 0 {
            return Err(ReachClawError::Conflict(format!(
                "interaction {id}: lease lost or not in flight"
            )));
        }
        if let Some(cid) = task.target_id {
            if task.itype == InteractionType::ConnectionRequest {
                tx.execute(
                    "UPDATE contacts SET status='connected', error_message=NULL,
                     last_contacted=?1, updated_at=?1 WHERE id=?2",
                    params![now.to_rfc3339(), cid],
                )
                .map_err(storage)?;
            } else {
                tx.execute(
                    "UPDATE contacts SET last_contacted=?1, updated_at=?1 WHERE id=?2",
                    params![now.to_rfc3339(), cid],
                )
                .map_err(storage)?;
            }
        }
        tx.commit().map_err(storage)?;
        Ok(())
    }

    /// Requeue after a retryable failure: attempt_count+1, next eligibility
    /// pushed out by the caller-computed backoff. error_message stays NULL
    /// because the task is pending again, not failed.
    pub fn requeue_interaction(
        &self,
        id: i64,
        lease_token: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn.lock().map_err(storage)?;
        let changed = conn
            .execute(
                "UPDATE interactions SET status='pending', attempt_count=attempt_count+1,
                 scheduled_for=?1, error_message=NULL, lease_token=NULL, lease_expires_at=NULL
                 WHERE id=?2 AND status='in_flight' AND lease_token=?3",
                params![next_attempt_at.to_rfc3339(), id, lease_token],
            )
            .map_err(storage)?;
        if changed == 0 {
            return Err(ReachClawError::Conflict(format!(
                "interaction {id}: lease lost or not in flight"
            )));
        }
        Ok(())
    }

    /// Return a claimed task to pending without consuming an attempt
    /// (rate-limit denial path). `retry_after` pushes the next look.
    pub fn release_interaction(
        &self,
        id: i64,
        lease_token: &str,
        retry_after: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let conn = self.conn.lock().map_err(storage)?;
        let changed = conn
            .execute(
                "UPDATE interactions SET status='pending', lease_token=NULL, lease_expires_at=NULL,
                 scheduled_for=COALESCE(?1, scheduled_for)
                 WHERE id=?2 AND status='in_flight' AND lease_token=?3",
                params![retry_after.map(|t| t.to_rfc3339()), id, lease_token],
            )
            .map_err(storage)?;
        if changed == 0 {
            return Err(ReachClawError::Conflict(format!(
                "interaction {id}: lease lost or not in flight"
            )));
        }
        Ok(())
    }

    /// Terminal failure. Sets the operator-visible error, and mirrors it to
    /// the contact for failed connection requests.
    pub fn fail_interaction(&self, id: i64, lease_token: &str, error: &str) -> Result<()> {
        let task = self.get_interaction(id)?;
        let mut conn = self.conn.lock().map_err(storage)?;
        let tx = conn.transaction().map_err(storage)?;
        let changed = tx
            .execute(
                "UPDATE interactions SET status='failed', error_message=?1,
                 lease_token=NULL, lease_expires_at=NULL
                 WHERE id=?2 AND status='in_flight' AND lease_token=?3",
                params![error, id, lease_token],
            )
            .map_err(storage)?;
        if changed == 0 {
            return Err(ReachClawError::Conflict(format!(
                "interaction {id}: lease lost or not in flight"
            )));
        }
        if task.itype == InteractionType::ConnectionRequest {
            if let Some(cid) = task.target_id {
                tx.execute(
                    "UPDATE contacts SET error_message=?1, updated_at=?2 WHERE id=?3",
                    params![error, Utc::now().to_rfc3339(), cid],
                )
                .map_err(storage)?;
            }
        }
        tx.commit().map_err(storage)?;
        Ok(())
    }

    // ── Rate counters ──────────────────────────────

    /// Atomically check all applicable ceilings and either consume quota or
    /// report the earliest instant the action becomes admissible.
    ///
    /// Ceilings are AND-combined: the hourly request budget, the daily
    /// category budget, and per-target minimum spacing must all admit the
    /// action. A ceiling of 0 means unlimited. `category=None` (post
    /// publishing) consumes only the hourly budget.
    pub fn reserve(
        &self,
        policy: &RateLimitConfig,
        category: Option<RateCategory>,
        target_key: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Reservation> {
        let mut conn = self.conn.lock().map_err(storage)?;
        let tx = conn.transaction().map_err(storage)?;

        let counter = |tx: &rusqlite::Transaction<'_>, cat: &str, key: &str| -> Result<u32> {
            tx.query_row(
                "SELECT count FROM rate_counters WHERE category=?1 AND window_key=?2",
                params![cat, key],
                |row| row.get(0),
            )
            .map_or_else(
                |e| match e {
                    rusqlite::Error::QueryReturnedNoRows => Ok(0),
                    other => Err(storage(other)),
                },
                Ok,
            )
        };

        let mut blocked_until: Option<DateTime<Utc>> = None;
        let mut block = |until: DateTime<Utc>| {
            blocked_until = Some(match blocked_until {
                Some(existing) if existing >= until => existing,
                _ => until,
            });
        };

        // Hourly all-actions budget.
        let hkey = hour_key(now);
        if policy.max_requests_per_hour > 0
            && counter(&tx, REQUESTS, &hkey)? >= policy.max_requests_per_hour
        {
            block(next_hour_start(now));
        }

        // Daily category budget.
        let dkey = day_key(now);
        if let Some(cat) = category {
            let ceiling = match cat {
                RateCategory::Connection => policy.max_connections_per_day,
                RateCategory::Interaction => policy.max_interactions_per_day,
                RateCategory::Message => policy.max_messages_per_day,
            };
            if ceiling > 0 && counter(&tx, cat.as_str(), &dkey)? >= ceiling {
                block(next_day_start(now));
            }
        }

        // Per-target minimum spacing, regardless of category.
        if let Some(key) = target_key {
            if policy.interaction_interval_minutes > 0 {
                let last: Option<String> = tx
                    .query_row(
                        "SELECT last_action_at FROM target_actions WHERE target_key=?1",
                        params![key],
                        |row| row.get(0),
                    )
                    .map_or_else(
                        |e| match e {
                            rusqlite::Error::QueryReturnedNoRows => Ok(None),
                            other => Err(storage(other)),
                        },
                        |v| Ok(Some(v)),
                    )?;
                if let Some(last) = last.map(|s| parse_dt(&s)).transpose().map_err(storage)? {
                    let earliest =
                        last + Duration::minutes(policy.interaction_interval_minutes as i64);
                    if earliest > now {
                        block(earliest);
                    }
                }
            }
        }

        if let Some(retry_after) = blocked_until {
            // soft counter only; quota counters stay untouched on denial
            tx.execute(
                "INSERT INTO rate_counters (category, window_key, count) VALUES ('denied', ?1, 1)
                 ON CONFLICT(category, window_key) DO UPDATE SET count=count+1",
                params![dkey],
            )
            .map_err(storage)?;
            tx.commit().map_err(storage)?;
            return Ok(Reservation::Denied { retry_after });
        }

        // Admitted: bump every applicable counter in the same transaction.
        let bump = |tx: &rusqlite::Transaction<'_>, cat: &str, key: &str| -> Result<()> {
            tx.execute(
                "INSERT INTO rate_counters (category, window_key, count) VALUES (?1, ?2, 1)
                 ON CONFLICT(category, window_key) DO UPDATE SET count=count+1",
                params![cat, key],
            )
            .map_err(storage)?;
            Ok(())
        };
        bump(&tx, REQUESTS, &hkey)?;
        if let Some(cat) = category {
            bump(&tx, cat.as_str(), &dkey)?;
        }
        if let Some(key) = target_key {
            tx.execute(
                "INSERT INTO target_actions (target_key, last_action_at) VALUES (?1, ?2)
                 ON CONFLICT(target_key) DO UPDATE SET last_action_at=?2",
                params![key, now.to_rfc3339()],
            )
            .map_err(storage)?;
        }
        tx.commit().map_err(storage)?;
        Ok(Reservation::Allowed)
    }

    /// Re-derive the current day's and hour's counters from completed
    /// actions. Used at startup so a lost counter table never under-counts.
    pub fn recover_counters(&self, now: DateTime<Utc>) -> Result<()> {
        let mut conn = self.conn.lock().map_err(storage)?;
        let tx = conn.transaction().map_err(storage)?;
        let dkey = day_key(now);
        let hkey = hour_key(now);
        let day_start = format!("{dkey}T00:00:00");
        let hour_start = format!("{hkey}:00:00");

        tx.execute("DELETE FROM rate_counters", [])
            .map_err(storage)?;

        for cat in [
            RateCategory::Connection,
            RateCategory::Interaction,
            RateCategory::Message,
        ] {
            let count: i64 = tx
                .query_row(
                    "SELECT COUNT(*) FROM interactions i
                     WHERE i.status='completed' AND i.completed_at >= ?1
                     AND i.itype IN (SELECT value FROM json_each(?2))",
                    params![day_start, category_types_json(cat)],
                    |row| row.get(0),
                )
                .map_err(storage)?;
            if count > 0 {
                tx.execute(
                    "INSERT INTO rate_counters (category, window_key, count) VALUES (?1, ?2, ?3)",
                    params![cat.as_str(), dkey, count],
                )
                .map_err(storage)?;
            }
        }

        let hour_count: i64 = tx
            .query_row(
                "SELECT (SELECT COUNT(*) FROM interactions WHERE status='completed' AND completed_at >= ?1)
                      + (SELECT COUNT(*) FROM posts WHERE status='published' AND published_at >= ?1)",
                params![hour_start],
                |row| row.get(0),
            )
            .map_err(storage)?;
        if hour_count > 0 {
            tx.execute(
                "INSERT INTO rate_counters (category, window_key, count) VALUES (?1, ?2, ?3)",
                params![REQUESTS, hkey, hour_count],
            )
            .map_err(storage)?;
        }

        tx.commit().map_err(storage)?;
        tracing::info!("♻️ Rate counters recovered for {dkey} / {hkey}");
        Ok(())
    }

    /// Current count for a category window, for tests and stats.
    pub fn counter_value(&self, category: &str, window_key: &str) -> Result<u32> {
        let conn = self.conn.lock().map_err(storage)?;
        conn.query_row(
            "SELECT count FROM rate_counters WHERE category=?1 AND window_key=?2",
            params![category, window_key],
            |row| row.get(0),
        )
        .map_or_else(
            |e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(0),
                other => Err(storage(other)),
            },
            Ok,
        )
    }

    // ── Posts ──────────────────────────────

    fn row_to_post(row: &rusqlite::Row<'_>) -> rusqlite::Result<Post> {
        let status: String = row.get(4)?;
        let hashtags_json: String = row.get(3)?;
        Ok(Post {
            id: row.get(0)?,
            title: row.get(1)?,
            content: row.get(2)?,
            hashtags: serde_json::from_str(&hashtags_json).unwrap_or_default(),
            status: PostStatus::parse(&status).unwrap_or(PostStatus::Draft),
            scheduled_for: parse_dt_opt(row.get(5)?),
            published_at: parse_dt_opt(row.get(6)?),
            platform_post_id: row.get(7)?,
            ai_generated: row.get::<_, i32>(8)? != 0,
            ai_prompt: row.get(9)?,
            error_message: row.get(10)?,
            attempt_count: row.get(11)?,
            created_at: parse_dt(&row.get::<_, String>(12)?)?,
            updated_at: parse_dt(&row.get::<_, String>(13)?)?,
        })
    }

    const POST_COLS: &'static str = "id, title, content, hashtags_json, status, scheduled_for, \
         published_at, platform_post_id, ai_generated, ai_prompt, error_message, attempt_count, \
         created_at, updated_at";

    /// Create a draft or scheduled post.
    pub fn create_post(
        &self,
        title: &str,
        content: &str,
        hashtags: &[String],
        status: PostStatus,
        scheduled_for: Option<DateTime<Utc>>,
        ai_generated: bool,
        ai_prompt: Option<&str>,
    ) -> Result<Post> {
        let now = Utc::now();
        Post::validate_new(title, content, status, scheduled_for, now)?;
        let conn = self.conn.lock().map_err(storage)?;
        let hashtags_json = serde_json::to_string(hashtags).unwrap_or_else(|_| "[]".into());
        conn.execute(
            "INSERT INTO posts (title, content, hashtags_json, status, scheduled_for,
             ai_generated, ai_prompt, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
            params![
                title,
                content,
                hashtags_json,
                status.as_str(),
                scheduled_for.map(|t| t.to_rfc3339()),
                ai_generated as i32,
                ai_prompt,
                now.to_rfc3339()
            ],
        )
        .map_err(storage)?;
        let id = conn.last_insert_rowid();
        drop(conn);
        self.get_post(id)
    }

    pub fn get_post(&self, id: i64) -> Result<Post> {
        let conn = self.conn.lock().map_err(storage)?;
        conn.query_row(
            &format!("SELECT {} FROM posts WHERE id=?1", Self::POST_COLS),
            params![id],
            Self::row_to_post,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => ReachClawError::NotFound(format!("post {id}")),
            other => storage(other),
        })
    }

    pub fn list_posts(&self, status: Option<PostStatus>) -> Result<Vec<Post>> {
        let conn = self.conn.lock().map_err(storage)?;
        let status_s = status.map(|s| s.as_str().to_string()).unwrap_or_default();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM posts WHERE (?1 = '' OR status = ?1) ORDER BY created_at DESC",
                Self::POST_COLS
            ))
            .map_err(storage)?;
        let rows = stmt
            .query_map(params![status_s], Self::row_to_post)
            .map_err(storage)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Operator edit of a draft or scheduled post. Published posts are
    /// immutable.
    pub fn update_post(
        &self,
        id: i64,
        title: Option<&str>,
        content: Option<&str>,
        hashtags: Option<&[String]>,
        status: Option<PostStatus>,
        scheduled_for: Option<Option<DateTime<Utc>>>,
    ) -> Result<Post> {
        let existing = self.get_post(id)?;
        if matches!(existing.status, PostStatus::Published) {
            return Err(ReachClawError::Conflict(format!(
                "post {id} is published and immutable"
            )));
        }
        let new_status = status.unwrap_or(existing.status);
        let new_sched = scheduled_for.unwrap_or(existing.scheduled_for);
        if new_status == PostStatus::Scheduled {
            match new_sched {
                Some(t) if t > Utc::now() => {}
                _ => {
                    return Err(ReachClawError::Validation(
                        "scheduled posts require a future scheduled_for".into(),
                    ));
                }
            }
        }
        // Reopening a failed post starts a fresh attempt history; any other
        // edit keeps the error text visible.
        let reopened = existing.status == PostStatus::Failed && new_status != PostStatus::Failed;
        let (error_message, attempt_count) = if reopened {
            (None, 0)
        } else {
            (existing.error_message.clone(), existing.attempt_count)
        };
        let conn = self.conn.lock().map_err(storage)?;
        let hashtags_json = serde_json::to_string(hashtags.unwrap_or(&existing.hashtags))
            .unwrap_or_else(|_| "[]".into());
        let changed = conn
            .execute(
                "UPDATE posts SET title=?1, content=?2, hashtags_json=?3, status=?4,
                 scheduled_for=?5, error_message=?6, attempt_count=?7, updated_at=?8
                 WHERE id=?9 AND status IN ('draft','scheduled','failed') AND lease_token IS NULL",
                params![
                    title.unwrap_or(&existing.title),
                    content.unwrap_or(&existing.content),
                    hashtags_json,
                    new_status.as_str(),
                    new_sched.map(|t| t.to_rfc3339()),
                    error_message,
                    attempt_count,
                    Utc::now().to_rfc3339(),
                    id
                ],
            )
            .map_err(storage)?;
        drop(conn);
        if changed == 0 {
            return Err(ReachClawError::Conflict(format!(
                "post {id} is being published right now"
            )));
        }
        self.get_post(id)
    }

    /// Remove a draft or scheduled post. Published and failed posts stay as
    /// history.
    pub fn delete_post(&self, id: i64) -> Result<()> {
        let existing = self.get_post(id)?;
        if !matches!(existing.status, PostStatus::Draft | PostStatus::Scheduled) {
            return Err(ReachClawError::Conflict(format!(
                "post {id} is {} and cannot be deleted",
                existing.status.as_str()
            )));
        }
        let conn = self.conn.lock().map_err(storage)?;
        let changed = conn
            .execute(
                "DELETE FROM posts
                 WHERE id=?1 AND status IN ('draft','scheduled') AND lease_token IS NULL",
                params![id],
            )
            .map_err(storage)?;
        if changed == 0 {
            return Err(ReachClawError::Conflict(format!(
                "post {id} is being published right now"
            )));
        }
        Ok(())
    }

    /// Claim due scheduled posts for publishing, lease-guarded like
    /// interaction claims.
    pub fn claim_due_posts(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        lease_secs: u64,
    ) -> Result<Vec<Post>> {
        let mut conn = self.conn.lock().map_err(storage)?;
        let tx = conn.transaction().map_err(storage)?;
        tx.execute(
            "UPDATE posts SET lease_token=NULL, lease_expires_at=NULL
             WHERE lease_expires_at IS NOT NULL AND lease_expires_at < ?1",
            params![now.to_rfc3339()],
        )
        .map_err(storage)?;

        let ids: Vec<i64> = {
            let mut stmt = tx
                .prepare(
                    "SELECT id FROM posts
                     WHERE status='scheduled' AND scheduled_for <= ?1 AND lease_token IS NULL
                     ORDER BY scheduled_for ASC, created_at ASC LIMIT ?2",
                )
                .map_err(storage)?;
            stmt.query_map(params![now.to_rfc3339(), limit as i64], |row| row.get(0))
                .map_err(storage)?
                .filter_map(|r| r.ok())
                .collect()
        };

        let expires = (now + Duration::seconds(lease_secs as i64)).to_rfc3339();
        for id in &ids {
            let token = uuid::Uuid::new_v4().to_string();
            tx.execute(
                "UPDATE posts SET lease_token=?1, lease_expires_at=?2 WHERE id=?3",
                params![token, expires, id],
            )
            .map_err(storage)?;
        }
        tx.commit().map_err(storage)?;
        drop(conn);
        ids.into_iter().map(|id| self.get_post(id)).collect()
    }

    /// Successful publish. `published_at` is written exactly once.
    pub fn complete_post_publish(
        &self,
        id: i64,
        platform_post_id: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn.lock().map_err(storage)?;
        let changed = conn
            .execute(
                "UPDATE posts SET status='published',
                 published_at=COALESCE(published_at, ?1), platform_post_id=?2,
                 error_message=NULL, lease_token=NULL, lease_expires_at=NULL, updated_at=?1
                 WHERE id=?3 AND status='scheduled'",
                params![now.to_rfc3339(), platform_post_id, id],
            )
            .map_err(storage)?;
        if changed == 0 {
            return Err(ReachClawError::Conflict(format!(
                "post {id} is not scheduled"
            )));
        }
        Ok(())
    }

    /// Release a claimed post without consuming an attempt (rate-limit
    /// denial), pushing the publish time to when quota frees up.
    pub fn release_post(&self, id: i64, retry_after: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock().map_err(storage)?;
        let changed = conn
            .execute(
                "UPDATE posts SET scheduled_for=?1, lease_token=NULL, lease_expires_at=NULL,
                 updated_at=?2 WHERE id=?3 AND status='scheduled'",
                params![retry_after.to_rfc3339(), Utc::now().to_rfc3339(), id],
            )
            .map_err(storage)?;
        if changed == 0 {
            return Err(ReachClawError::Conflict(format!(
                "post {id} is not scheduled"
            )));
        }
        Ok(())
    }

    /// Push a scheduled post's publish attempt out after a retryable failure.
    pub fn requeue_post(&self, id: i64, next_attempt_at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock().map_err(storage)?;
        let changed = conn
            .execute(
                "UPDATE posts SET attempt_count=attempt_count+1, scheduled_for=?1,
                 lease_token=NULL, lease_expires_at=NULL, updated_at=?2
                 WHERE id=?3 AND status='scheduled'",
                params![
                    next_attempt_at.to_rfc3339(),
                    Utc::now().to_rfc3339(),
                    id
                ],
            )
            .map_err(storage)?;
        if changed == 0 {
            return Err(ReachClawError::Conflict(format!(
                "post {id} is not scheduled"
            )));
        }
        Ok(())
    }

    /// Terminal publish failure.
    pub fn fail_post(&self, id: i64, error: &str) -> Result<()> {
        let conn = self.conn.lock().map_err(storage)?;
        let changed = conn
            .execute(
                "UPDATE posts SET status='failed', error_message=?1,
                 lease_token=NULL, lease_expires_at=NULL, updated_at=?2
                 WHERE id=?3 AND status='scheduled'",
                params![error, Utc::now().to_rfc3339(), id],
            )
            .map_err(storage)?;
        if changed == 0 {
            return Err(ReachClawError::Conflict(format!(
                "post {id} is not scheduled"
            )));
        }
        Ok(())
    }

    // ── Settings ──────────────────────────────

    /// Get the settings JSON document, if any has been saved.
    pub fn get_settings(&self) -> Result<Option<serde_json::Value>> {
        let conn = self.conn.lock().map_err(storage)?;
        match conn.query_row(
            "SELECT value FROM settings WHERE key='settings'",
            [],
            |row| row.get::<_, String>(0),
        ) {
            Ok(v) => Ok(serde_json::from_str(&v).ok()),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(storage(e)),
        }
    }

    /// Persist the settings JSON document.
    pub fn put_settings(&self, doc: &serde_json::Value) -> Result<()> {
        let conn = self.conn.lock().map_err(storage)?;
        conn.execute(
            "INSERT INTO settings (key, value, updated_at) VALUES ('settings', ?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value=?1, updated_at=?2",
            params![doc.to_string(), Utc::now().to_rfc3339()],
        )
        .map_err(storage)?;
        Ok(())
    }

    /// Typed extraction of the rate_limiting subsection, falling back to
    /// defaults for anything missing.
    pub fn rate_limit_config(&self) -> Result<RateLimitConfig> {
        let doc = self.get_settings()?;
        Ok(doc
            .and_then(|d| d.get("rate_limiting").cloned())
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default())
    }

    // ── Stats ──────────────────────────────

    /// Read-only aggregation over interactions, posts, and contacts since
    /// the given instant (all time when absent).
    pub fn stats_since(&self, since: Option<DateTime<Utc>>) -> Result<serde_json::Value> {
        let conn = self.conn.lock().map_err(storage)?;
        let since_s = since
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "1970-01-01T00:00:00+00:00".into());

        let count = |sql: &str| -> Result<i64> {
            conn.query_row(sql, params![since_s], |row| row.get(0))
                .map_err(storage)
        };

        let denials_today: i64 = conn
            .query_row(
                "SELECT count FROM rate_counters WHERE category='denied' AND window_key=?1",
                params![day_key(Utc::now())],
                |row| row.get(0),
            )
            .map_or_else(
                |e| match e {
                    rusqlite::Error::QueryReturnedNoRows => Ok(0),
                    other => Err(storage(other)),
                },
                Ok,
            )?;

        let mut by_type = serde_json::Map::new();
        for itype in [
            InteractionType::Like,
            InteractionType::Comment,
            InteractionType::Follow,
            InteractionType::ConnectionRequest,
            InteractionType::Message,
            InteractionType::Share,
        ] {
            let n: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM interactions
                     WHERE itype=?1 AND status='completed' AND completed_at >= ?2",
                    params![itype.as_str(), since_s],
                    |row| row.get(0),
                )
                .map_err(storage)?;
            by_type.insert(itype.as_str().into(), serde_json::json!(n));
        }

        Ok(serde_json::json!({
            "interactions": {
                "completed": count("SELECT COUNT(*) FROM interactions WHERE status='completed' AND completed_at >= ?1")?,
                "failed": count("SELECT COUNT(*) FROM interactions WHERE status='failed' AND created_at >= ?1")?,
                "pending": count("SELECT COUNT(*) FROM interactions WHERE status IN ('pending','in_flight') AND created_at >= ?1")?,
                "by_type": by_type,
            },
            "posts": {
                "published": count("SELECT COUNT(*) FROM posts WHERE status='published' AND published_at >= ?1")?,
                "scheduled": count("SELECT COUNT(*) FROM posts WHERE status='scheduled' AND created_at >= ?1")?,
                "drafts": count("SELECT COUNT(*) FROM posts WHERE status='draft' AND created_at >= ?1")?,
            },
            "contacts": {
                "total": count("SELECT COUNT(*) FROM contacts WHERE deleted=0 AND created_at >= ?1")?,
                "connected": count("SELECT COUNT(*) FROM contacts WHERE deleted=0 AND status='connected' AND updated_at >= ?1")?,
                "pending": count("SELECT COUNT(*) FROM contacts WHERE deleted=0 AND status='pending' AND created_at >= ?1")?,
            },
            "rate": {
                "denials_today": denials_today,
            },
        }))
    }
}

/// JSON array of interaction type names belonging to a category, for the
/// counter-recovery query.
fn category_types_json(cat: RateCategory) -> &'static str {
    match cat {
        RateCategory::Connection => r#"["connection_request"]"#,
        RateCategory::Message => r#"["message"]"#,
        RateCategory::Interaction => r#"["like","comment","follow","share"]"#,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db() -> EngineDb {
        EngineDb::open_in_memory().unwrap()
    }

    fn add_contact(db: &EngineDb, url: &str) -> Contact {
        db.create_contact(url, "Ada", "Engineer", "Acme", "Berlin", "Software", "2nd", "rust", &[])
            .unwrap()
    }

    fn unlimited() -> RateLimitConfig {
        RateLimitConfig {
            max_connections_per_day: 0,
            max_interactions_per_day: 0,
            max_messages_per_day: 0,
            max_requests_per_hour: 0,
            interaction_interval_minutes: 0,
        }
    }

    #[test]
    fn test_contact_crud_and_duplicate() {
        let db = db();
        let c = add_contact(&db, "https://x/in/ada");
        assert_eq!(c.status, ContactStatus::Pending);
        assert!(matches!(
            db.create_contact("https://x/in/ada", "", "", "", "", "", "", "", &[]),
            Err(ReachClawError::Conflict(_))
        ));

        let updated = db
            .update_contact(c.id, Some("Ada L."), None, None, None, None, Some("vip"), None, None)
            .unwrap();
        assert_eq!(updated.name, "Ada L.");
        assert_eq!(updated.notes, "vip");
    }

    #[test]
    fn test_delete_contact_cancels_pending() {
        let db = db();
        let c = add_contact(&db, "https://x/in/ada");
        db.enqueue_interaction(
            InteractionType::ConnectionRequest,
            Some(c.id),
            &c.profile_url,
            None,
            None,
            "",
        )
        .unwrap();
        let cancelled = db.delete_contact(c.id).unwrap();
        assert_eq!(cancelled, 1);
        assert!(db.list_interactions(None).unwrap().is_empty());
        // soft-deleted contacts no longer accept enqueues
        assert!(
            db.enqueue_interaction(
                InteractionType::Like,
                Some(c.id),
                "https://x/p/1",
                None,
                None,
                ""
            )
            .is_err()
        );
    }

    #[test]
    fn test_enqueue_rejects_empty_comment() {
        let db = db();
        let err = db
            .enqueue_interaction(InteractionType::Comment, None, "https://x/p/7", Some(""), None, "")
            .unwrap_err();
        assert!(matches!(err, ReachClawError::Validation(_)));
    }

    #[test]
    fn test_claim_ordering_immediate_then_due_then_fifo() {
        let db = db();
        let now = Utc::now();
        let later = now + Duration::hours(1);
        let past = now - Duration::hours(1);

        let future = db
            .enqueue_interaction(InteractionType::Like, None, "https://x/p/future", None, Some(later), "")
            .unwrap();
        let catchup = db
            .enqueue_interaction(InteractionType::Like, None, "https://x/p/past", None, Some(past), "")
            .unwrap();
        let immediate = db
            .enqueue_interaction(InteractionType::Like, None, "https://x/p/now", None, None, "")
            .unwrap();

        let claimed = db.claim_due_interactions(now, 10, 300).unwrap();
        let ids: Vec<i64> = claimed.iter().map(|t| t.id).collect();
        // future task not eligible; immediate sorts before the past-due one
        assert_eq!(ids, vec![immediate.id, catchup.id]);
        assert!(claimed.iter().all(|t| t.status == InteractionStatus::InFlight));
        assert!(claimed.iter().all(|t| t.lease_token.is_some()));
        let _ = future;

        // second claim sees nothing: both are leased
        assert!(db.claim_due_interactions(now, 10, 300).unwrap().is_empty());
    }

    #[test]
    fn test_lease_expiry_reverts_to_pending() {
        let db = db();
        let now = Utc::now();
        db.enqueue_interaction(InteractionType::Like, None, "https://x/p/1", None, None, "")
            .unwrap();
        let claimed = db.claim_due_interactions(now, 10, 60).unwrap();
        assert_eq!(claimed.len(), 1);

        // before expiry: not reclaimable
        assert!(db.claim_due_interactions(now + Duration::seconds(30), 10, 60).unwrap().is_empty());
        // after expiry: claimable again
        let reclaimed = db
            .claim_due_interactions(now + Duration::seconds(120), 10, 60)
            .unwrap();
        assert_eq!(reclaimed.len(), 1);
        assert_eq!(reclaimed[0].id, claimed[0].id);
        assert_ne!(reclaimed[0].lease_token, claimed[0].lease_token);
    }

    #[test]
    fn test_connect_completion_updates_contact() {
        let db = db();
        let c = add_contact(&db, "https://x/in/ada");
        db.enqueue_interaction(
            InteractionType::ConnectionRequest,
            Some(c.id),
            &c.profile_url,
            None,
            None,
            "",
        )
        .unwrap();
        let now = Utc::now();
        let task = db.claim_due_interactions(now, 1, 300).unwrap().remove(0);
        db.complete_interaction(task.id, task.lease_token.as_deref().unwrap(), now)
            .unwrap();

        let done = db.get_interaction(task.id).unwrap();
        assert_eq!(done.status, InteractionStatus::Completed);
        assert!(done.error_message.is_none());
        assert!(done.completed_at.is_some());

        let contact = db.get_contact(c.id).unwrap();
        assert_eq!(contact.status, ContactStatus::Connected);
        assert!(contact.last_contacted.is_some());
    }

    #[test]
    fn test_failed_iff_error_message() {
        let db = db();
        let c = add_contact(&db, "https://x/in/ada");
        db.enqueue_interaction(
            InteractionType::ConnectionRequest,
            Some(c.id),
            &c.profile_url,
            None,
            None,
            "",
        )
        .unwrap();
        let now = Utc::now();
        let task = db.claim_due_interactions(now, 1, 300).unwrap().remove(0);
        let token = task.lease_token.clone().unwrap();

        db.fail_interaction(task.id, &token, "profile no longer reachable")
            .unwrap();
        let failed = db.get_interaction(task.id).unwrap();
        assert_eq!(failed.status, InteractionStatus::Failed);
        assert_eq!(
            failed.error_message.as_deref(),
            Some("profile no longer reachable")
        );
        // connect failure mirrored to the contact
        assert!(db.get_contact(c.id).unwrap().error_message.is_some());

        // operator retry clears error and resets attempts
        let reopened = db.retry_interaction(task.id).unwrap();
        assert_eq!(reopened.status, InteractionStatus::Pending);
        assert_eq!(reopened.attempt_count, 0);
        assert!(reopened.error_message.is_none());
        // a second retry on a now-pending task conflicts
        assert!(db.retry_interaction(task.id).is_err());
    }

    #[test]
    fn test_requeue_increments_attempts_and_backoff_time() {
        let db = db();
        db.enqueue_interaction(InteractionType::Like, None, "https://x/p/1", None, None, "")
            .unwrap();
        let now = Utc::now();
        let task = db.claim_due_interactions(now, 1, 300).unwrap().remove(0);
        let next = now + Duration::seconds(120);
        db.requeue_interaction(task.id, task.lease_token.as_deref().unwrap(), next)
            .unwrap();

        let requeued = db.get_interaction(task.id).unwrap();
        assert_eq!(requeued.status, InteractionStatus::Pending);
        assert_eq!(requeued.attempt_count, 1);
        assert!(requeued.error_message.is_none());
        assert!(requeued.scheduled_for.unwrap() >= next - Duration::seconds(1));
        // not eligible before the backoff elapses
        assert!(db.claim_due_interactions(now, 10, 300).unwrap().is_empty());
    }

    #[test]
    fn test_stale_lease_token_conflicts() {
        let db = db();
        db.enqueue_interaction(InteractionType::Like, None, "https://x/p/1", None, None, "")
            .unwrap();
        let task = db.claim_due_interactions(Utc::now(), 1, 300).unwrap().remove(0);
        assert!(matches!(
            db.complete_interaction(task.id, "wrong-token", Utc::now()),
            Err(ReachClawError::Conflict(_))
        ));
    }

    #[test]
    fn test_edit_content_only_while_pending() {
        let db = db();
        let task = db
            .enqueue_interaction(
                InteractionType::Comment,
                None,
                "https://x/p/1",
                Some("draft text"),
                None,
                "",
            )
            .unwrap();
        db.update_interaction_content(task.id, "better text").unwrap();

        db.claim_due_interactions(Utc::now(), 1, 300).unwrap();
        assert!(matches!(
            db.update_interaction_content(task.id, "too late"),
            Err(ReachClawError::Conflict(_))
        ));
    }

    #[test]
    fn test_reserve_daily_ceiling() {
        let db = db();
        let mut policy = unlimited();
        policy.max_connections_per_day = 1;
        let now = Utc::now();

        assert_eq!(
            db.reserve(&policy, Some(RateCategory::Connection), Some("contact:1"), now)
                .unwrap(),
            Reservation::Allowed
        );
        match db
            .reserve(&policy, Some(RateCategory::Connection), Some("contact:2"), now)
            .unwrap()
        {
            Reservation::Denied { retry_after } => {
                assert_eq!(retry_after, next_day_start(now));
            }
            Reservation::Allowed => panic!("second connection must be denied"),
        }
        // other categories unaffected
        assert_eq!(
            db.reserve(&policy, Some(RateCategory::Interaction), Some("contact:3"), now)
                .unwrap(),
            Reservation::Allowed
        );
        // next day admits again
        assert_eq!(
            db.reserve(
                &policy,
                Some(RateCategory::Connection),
                Some("contact:4"),
                next_day_start(now)
            )
            .unwrap(),
            Reservation::Allowed
        );
    }

    #[test]
    fn test_reserve_never_exceeds_ceiling_property() {
        let db = db();
        let mut policy = unlimited();
        policy.max_interactions_per_day = 7;
        let now = Utc::now();
        let dkey = day_key(now);

        let mut allowed = 0;
        for i in 0..25 {
            let r = db
                .reserve(
                    &policy,
                    Some(RateCategory::Interaction),
                    Some(&format!("contact:{i}")),
                    now,
                )
                .unwrap();
            if r == Reservation::Allowed {
                allowed += 1;
            }
            assert!(db.counter_value("interaction", &dkey).unwrap() <= 7);
        }
        assert_eq!(allowed, 7);
    }

    #[test]
    fn test_reserve_hourly_budget_and_zero_means_unlimited() {
        let db = db();
        let mut policy = unlimited();
        policy.max_requests_per_hour = 2;
        let now = Utc::now();

        assert_eq!(db.reserve(&policy, None, None, now).unwrap(), Reservation::Allowed);
        assert_eq!(db.reserve(&policy, None, None, now).unwrap(), Reservation::Allowed);
        assert!(matches!(
            db.reserve(&policy, None, None, now).unwrap(),
            Reservation::Denied { .. }
        ));

        // ceiling 0 is unlimited, never always-deny
        let open = unlimited();
        for _ in 0..50 {
            assert_eq!(db.reserve(&open, None, None, now).unwrap(), Reservation::Allowed);
        }
    }

    #[test]
    fn test_reserve_per_target_spacing() {
        let db = db();
        let mut policy = unlimited();
        policy.interaction_interval_minutes = 30;
        let now = Utc::now();

        assert_eq!(
            db.reserve(&policy, Some(RateCategory::Interaction), Some("contact:1"), now)
                .unwrap(),
            Reservation::Allowed
        );
        // same target, different category: still blocked by spacing
        match db
            .reserve(&policy, Some(RateCategory::Message), Some("contact:1"), now)
            .unwrap()
        {
            Reservation::Denied { retry_after } => {
                assert_eq!(retry_after, now + Duration::minutes(30));
            }
            Reservation::Allowed => panic!("spacing must deny"),
        }
        // other targets unaffected
        assert_eq!(
            db.reserve(&policy, Some(RateCategory::Message), Some("contact:2"), now)
                .unwrap(),
            Reservation::Allowed
        );
        // after the interval the same target is admitted
        assert_eq!(
            db.reserve(
                &policy,
                Some(RateCategory::Interaction),
                Some("contact:1"),
                now + Duration::minutes(31)
            )
            .unwrap(),
            Reservation::Allowed
        );
    }

    #[test]
    fn test_reserve_denied_consumes_nothing() {
        let db = db();
        let mut policy = unlimited();
        policy.max_requests_per_hour = 1;
        policy.interaction_interval_minutes = 30;
        let now = Utc::now();
        let hkey = hour_key(now);

        assert_eq!(
            db.reserve(&policy, Some(RateCategory::Interaction), Some("contact:1"), now)
                .unwrap(),
            Reservation::Allowed
        );
        // denied by the hourly budget: neither counters nor spacing advance
        assert!(matches!(
            db.reserve(&policy, Some(RateCategory::Interaction), Some("contact:2"), now)
                .unwrap(),
            Reservation::Denied { .. }
        ));
        assert_eq!(db.counter_value(REQUESTS, &hkey).unwrap(), 1);
        assert_eq!(db.counter_value("interaction", &day_key(now)).unwrap(), 1);
        assert_eq!(db.counter_value("denied", &day_key(now)).unwrap(), 1);
    }

    #[test]
    fn test_counter_recovery_from_completed_actions() {
        let db = db();
        let now = Utc::now();
        for i in 0..3 {
            let t = db
                .enqueue_interaction(
                    InteractionType::Like,
                    None,
                    &format!("https://x/p/{i}"),
                    None,
                    None,
                    "",
                )
                .unwrap();
            let claimed = db.claim_due_interactions(now, 1, 300).unwrap().remove(0);
            db.complete_interaction(t.id, claimed.lease_token.as_deref().unwrap(), now)
                .unwrap();
        }

        // simulate counter loss
        {
            let conn = db.conn.lock().unwrap();
            conn.execute("DELETE FROM rate_counters", []).unwrap();
        }
        db.recover_counters(now).unwrap();
        assert_eq!(db.counter_value("interaction", &day_key(now)).unwrap(), 3);
        assert_eq!(db.counter_value(REQUESTS, &hour_key(now)).unwrap(), 3);
    }

    #[test]
    fn test_post_lifecycle_published_at_once() {
        let db = db();
        let now = Utc::now();
        let post = db
            .create_post(
                "Launch",
                "We shipped.",
                &["#rust".into(), "#launch".into()],
                PostStatus::Scheduled,
                Some(now + Duration::seconds(1)),
                false,
                None,
            )
            .unwrap();
        assert_eq!(post.hashtags, vec!["#rust", "#launch"]);

        let due = db.claim_due_posts(now + Duration::hours(1), 5, 300).unwrap();
        assert_eq!(due.len(), 1);
        db.complete_post_publish(post.id, "urn:pf:123", now + Duration::hours(1))
            .unwrap();

        let published = db.get_post(post.id).unwrap();
        assert_eq!(published.status, PostStatus::Published);
        let first_published_at = published.published_at.unwrap();
        assert!(first_published_at >= published.created_at);
        assert!(published.scheduled_for.unwrap() <= first_published_at);

        // published posts are immutable; publish cannot happen twice
        assert!(db.update_post(post.id, Some("x"), None, None, None, None).is_err());
        assert!(db.complete_post_publish(post.id, "urn:pf:456", Utc::now()).is_err());
    }

    #[test]
    fn test_post_publish_retry_then_fail() {
        let db = db();
        let now = Utc::now();
        let post = db
            .create_post("T", "C", &[], PostStatus::Scheduled, Some(now + Duration::seconds(1)), false, None)
            .unwrap();
        let later = now + Duration::hours(1);
        assert_eq!(db.claim_due_posts(later, 5, 300).unwrap().len(), 1);
        db.requeue_post(post.id, later + Duration::minutes(5)).unwrap();
        assert_eq!(db.get_post(post.id).unwrap().attempt_count, 1);

        assert_eq!(db.claim_due_posts(later + Duration::hours(1), 5, 300).unwrap().len(), 1);
        db.fail_post(post.id, "bridge rejected payload").unwrap();
        let failed = db.get_post(post.id).unwrap();
        assert_eq!(failed.status, PostStatus::Failed);
        assert!(failed.error_message.is_some());
        assert!(failed.published_at.is_none());
    }

    #[test]
    fn test_failed_post_edit_keeps_error_until_reopened() {
        let db = db();
        let now = Utc::now();
        let post = db
            .create_post("T", "C", &[], PostStatus::Scheduled, Some(now + Duration::seconds(1)), false, None)
            .unwrap();
        assert_eq!(db.claim_due_posts(now + Duration::hours(1), 5, 300).unwrap().len(), 1);
        db.requeue_post(post.id, now + Duration::hours(2)).unwrap();
        assert_eq!(db.claim_due_posts(now + Duration::hours(3), 5, 300).unwrap().len(), 1);
        db.fail_post(post.id, "bridge rejected payload").unwrap();

        // a content edit leaves the failure record intact
        let edited = db
            .update_post(post.id, None, Some("C2"), None, None, None)
            .unwrap();
        assert_eq!(edited.status, PostStatus::Failed);
        assert_eq!(edited.error_message.as_deref(), Some("bridge rejected payload"));
        assert_eq!(edited.attempt_count, 1);

        // rescheduling reopens the post with a clean slate
        let reopened = db
            .update_post(
                post.id,
                None,
                None,
                None,
                Some(PostStatus::Scheduled),
                Some(Some(Utc::now() + Duration::hours(4))),
            )
            .unwrap();
        assert_eq!(reopened.status, PostStatus::Scheduled);
        assert!(reopened.error_message.is_none());
        assert_eq!(reopened.attempt_count, 0);
    }

    #[test]
    fn test_delete_post_draft_and_scheduled_only() {
        let db = db();
        let now = Utc::now();
        let draft = db
            .create_post("T", "C", &[], PostStatus::Draft, None, false, None)
            .unwrap();
        db.delete_post(draft.id).unwrap();
        assert!(matches!(
            db.get_post(draft.id),
            Err(ReachClawError::NotFound(_))
        ));

        let post = db
            .create_post("T", "C", &[], PostStatus::Scheduled, Some(now + Duration::seconds(1)), false, None)
            .unwrap();
        // claimed for publishing: deletion must wait for the lease
        assert_eq!(db.claim_due_posts(now + Duration::hours(1), 5, 300).unwrap().len(), 1);
        assert!(matches!(db.delete_post(post.id), Err(ReachClawError::Conflict(_))));
        db.complete_post_publish(post.id, "urn:pf:1", now + Duration::hours(1))
            .unwrap();
        assert!(matches!(db.delete_post(post.id), Err(ReachClawError::Conflict(_))));
    }

    #[test]
    fn test_corrupt_timestamp_is_a_storage_error() {
        let db = db();
        let t = db
            .enqueue_interaction(InteractionType::Like, None, "https://x/p/1", None, None, "")
            .unwrap();
        db.conn
            .lock()
            .unwrap()
            .execute(
                "UPDATE interactions SET created_at='not-a-timestamp' WHERE id=?1",
                params![t.id],
            )
            .unwrap();
        assert!(matches!(
            db.get_interaction(t.id),
            Err(ReachClawError::Storage(_))
        ));
    }

    #[test]
    fn test_settings_roundtrip_and_rate_limit_extraction() {
        let db = db();
        assert!(db.get_settings().unwrap().is_none());
        assert_eq!(db.rate_limit_config().unwrap(), RateLimitConfig::default());

        db.put_settings(&serde_json::json!({
            "rate_limiting": {
                "max_connections_per_day": 3,
                "max_interactions_per_day": 10,
                "max_messages_per_day": 2,
                "max_requests_per_hour": 20,
                "interaction_interval_minutes": 15,
            },
            "post_topics": ["rust", "growth"],
        }))
        .unwrap();
        let policy = db.rate_limit_config().unwrap();
        assert_eq!(policy.max_connections_per_day, 3);
        assert_eq!(policy.interaction_interval_minutes, 15);
    }

    #[test]
    fn test_stats_shape() {
        let db = db();
        let now = Utc::now();
        let t = db
            .enqueue_interaction(InteractionType::Like, None, "https://x/p/1", None, None, "")
            .unwrap();
        let claimed = db.claim_due_interactions(now, 1, 300).unwrap().remove(0);
        db.complete_interaction(t.id, claimed.lease_token.as_deref().unwrap(), now)
            .unwrap();

        let stats = db.stats_since(None).unwrap();
        assert_eq!(stats["interactions"]["completed"], 1);
        assert_eq!(stats["interactions"]["by_type"]["like"], 1);
        assert_eq!(stats["posts"]["published"], 0);

        // a "since the future" window sees nothing
        let empty = db.stats_since(Some(now + Duration::hours(1))).unwrap();
        assert_eq!(empty["interactions"]["completed"], 0);
    }
}
