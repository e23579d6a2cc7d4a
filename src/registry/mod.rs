//! Session registry (spec.md §4.6): authoritative record of every vended
//! session, backed by SQLite via [`crate::db::Database`].
//!
//! Callers, not this module, decide the fail-open/fail-closed posture: a
//! revocation check on the issuance path should treat any `Err` here as
//! `deny` (spec.md §4.6), while a post-issuance touch should log and
//! continue. This module only guarantees the SQL-level semantics the
//! invariants require.

pub mod model;

use crate::db::Database;
pub use model::{SessionRecord, SessionStatus};
use rusqlite::params;

#[derive(Clone)]
pub struct SessionRegistry {
    db: Database,
}

impl SessionRegistry {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Conditional insert keyed on `session_id`. Returns `true` if this call
    /// created the row, `false` if a row with that id already existed
    /// (concurrent `Create` calls with the same id result in at most one
    /// success, spec.md §4.6 "Concurrency").
    pub async fn create(&self, record: SessionRecord) -> anyhow::Result<bool> {
        self.db
            .with_conn(move |conn| {
                let changed = conn.execute(
                    r#"
                    INSERT INTO sessions (
                        session_id, source_identity_fingerprint, user, profile, mode,
                        device_id, status, created_at, last_access_at, expires_at,
                        request_count, server_instance_id
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                    ON CONFLICT(session_id) DO NOTHING
                    "#,
                    params![
                        record.session_id,
                        record.source_identity_fingerprint,
                        record.user,
                        record.profile,
                        record.mode.as_str(),
                        record.device_id,
                        record.status.as_str(),
                        record.created_at.to_rfc3339(),
                        record.last_access_at.to_rfc3339(),
                        record.expires_at.to_rfc3339(),
                        record.request_count,
                        record.server_instance_id,
                    ],
                )?;
                Ok(changed > 0)
            })
            .await
    }

    /// Strongly consistent read by primary key.
    pub async fn get(&self, session_id: &str) -> anyhow::Result<Option<SessionRecord>> {
        let session_id = session_id.to_string();
        self.db
            .with_conn(move |conn| {
                let mut stmt = conn.prepare("SELECT * FROM sessions WHERE session_id = ?1")?;
                let mut rows = stmt.query(params![session_id])?;
                match rows.next()? {
                    Some(row) => Ok(Some(SessionRecord::from_row(row)?)),
                    None => Ok(None),
                }
            })
            .await
    }

    /// Increment `request_count` and bump `last_access_at`. No-op if the
    /// session is not currently active (spec.md §4.6).
    pub async fn touch(&self, session_id: &str, now: chrono::DateTime<chrono::Utc>) -> anyhow::Result<()> {
        let session_id = session_id.to_string();
        self.db
            .with_conn(move |conn| {
                conn.execute(
                    "UPDATE sessions SET request_count = request_count + 1, last_access_at = ?2 WHERE session_id = ?1 AND status = 'active'",
                    params![session_id, now.to_rfc3339()],
                )?;
                Ok(())
            })
            .await
    }

    /// `active -> revoked`; idempotent; terminal. Never resurrects an
    /// already-expired or already-revoked record.
    pub async fn revoke(&self, session_id: &str) -> anyhow::Result<()> {
        let session_id = session_id.to_string();
        self.db
            .with_conn(move |conn| {
                conn.execute(
                    "UPDATE sessions SET status = 'revoked' WHERE session_id = ?1 AND status = 'active'",
                    params![session_id],
                )?;
                Ok(())
            })
            .await
    }

    /// `active -> expired`; terminal.
    pub async fn expire(&self, session_id: &str) -> anyhow::Result<()> {
        let session_id = session_id.to_string();
        self.db
            .with_conn(move |conn| {
                conn.execute(
                    "UPDATE sessions SET status = 'expired' WHERE session_id = ?1 AND status = 'active'",
                    params![session_id],
                )?;
                Ok(())
            })
            .await
    }

    pub async fn list_by_user(&self, user: &str) -> anyhow::Result<Vec<SessionRecord>> {
        let user = user.to_string();
        self.db
            .with_conn(move |conn| {
                let mut stmt = conn.prepare("SELECT * FROM sessions WHERE user = ?1 ORDER BY created_at DESC")?;
                let rows = stmt.query_map(params![user], |row| SessionRecord::from_row(row))?;
                rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
            })
            .await
    }

    pub async fn list_by_profile(&self, profile: &str) -> anyhow::Result<Vec<SessionRecord>> {
        let profile = profile.to_string();
        self.db
            .with_conn(move |conn| {
                let mut stmt = conn.prepare("SELECT * FROM sessions WHERE profile = ?1 ORDER BY created_at DESC")?;
                let rows = stmt.query_map(params![profile], |row| SessionRecord::from_row(row))?;
                rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
            })
            .await
    }

    pub async fn list_by_status(&self, status: SessionStatus) -> anyhow::Result<Vec<SessionRecord>> {
        let status = status.as_str();
        self.db
            .with_conn(move |conn| {
                let mut stmt = conn.prepare("SELECT * FROM sessions WHERE status = ?1 ORDER BY created_at DESC")?;
                let rows = stmt.query_map(params![status], |row| SessionRecord::from_row(row))?;
                rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
            })
            .await
    }

    pub async fn list_by_time_range(
        &self,
        start: chrono::DateTime<chrono::Utc>,
        end: chrono::DateTime<chrono::Utc>,
    ) -> anyhow::Result<Vec<SessionRecord>> {
        let (start, end) = (start.to_rfc3339(), end.to_rfc3339());
        self.db
            .with_conn(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT * FROM sessions WHERE created_at >= ?1 AND created_at < ?2 ORDER BY created_at ASC",
                )?;
                let rows = stmt.query_map(params![start, end], |row| SessionRecord::from_row(row))?;
                rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
            })
            .await
    }

    /// Most recent session issued for this `(user, profile)` pair, if any.
    /// Consulted on the vending path so a revoked session blocks reissuance
    /// rather than being silently superseded (spec.md §4.6, §4.7).
    pub async fn find_latest_by_user_and_profile(
        &self,
        user: &str,
        profile: &str,
    ) -> anyhow::Result<Option<SessionRecord>> {
        let (user, profile) = (user.to_string(), profile.to_string());
        self.db
            .with_conn(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT * FROM sessions WHERE user = ?1 AND profile = ?2 ORDER BY created_at DESC LIMIT 1",
                )?;
                let mut rows = stmt.query(params![user, profile])?;
                match rows.next()? {
                    Some(row) => Ok(Some(SessionRecord::from_row(row)?)),
                    None => Ok(None),
                }
            })
            .await
    }

    /// Used by the remote-server authorizer to map a cloud-audit-visible
    /// fingerprint back to its session (spec.md §4.6).
    pub async fn find_by_source_identity(&self, fingerprint: &str) -> anyhow::Result<Option<SessionRecord>> {
        let fingerprint = fingerprint.to_string();
        self.db
            .with_conn(move |conn| {
                let mut stmt =
                    conn.prepare("SELECT * FROM sessions WHERE source_identity_fingerprint = ?1 LIMIT 1")?;
                let mut rows = stmt.query(params![fingerprint])?;
                match rows.next()? {
                    Some(row) => Ok(Some(SessionRecord::from_row(row)?)),
                    None => Ok(None),
                }
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::model::Mode;
    use chrono::{Duration as ChronoDuration, Utc};

    async fn test_registry() -> (SessionRegistry, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("broker.db")).unwrap();
        (SessionRegistry::new(db), dir)
    }

    fn sample_record(session_id: &str, user: &str) -> SessionRecord {
        let now = Utc::now();
        SessionRecord {
            session_id: session_id.to_string(),
            source_identity_fingerprint: format!("sentinel:{user}:direct:abcd1234"),
            user: user.to_string(),
            profile: "dev".to_string(),
            mode: Mode::Cli,
            device_id: None,
            status: SessionStatus::Active,
            created_at: now,
            last_access_at: now,
            expires_at: now + ChronoDuration::hours(1),
            request_count: 0,
            server_instance_id: None,
        }
    }

    #[tokio::test]
    async fn create_is_conditional_on_session_id() {
        let (registry, _dir) = test_registry().await;
        let record = sample_record("s1", "alice");
        assert!(registry.create(record.clone()).await.unwrap());
        assert!(!registry.create(record).await.unwrap(), "second create with same id must not succeed");
    }

    #[tokio::test]
    async fn revoke_is_terminal_and_idempotent() {
        let (registry, _dir) = test_registry().await;
        registry.create(sample_record("s1", "alice")).await.unwrap();
        registry.revoke("s1").await.unwrap();
        let got = registry.get("s1").await.unwrap().unwrap();
        assert_eq!(got.status, SessionStatus::Revoked);

        // idempotent: calling again does not error and does not change state
        registry.revoke("s1").await.unwrap();
        let got2 = registry.get("s1").await.unwrap().unwrap();
        assert_eq!(got2.status, SessionStatus::Revoked);
    }

    #[tokio::test]
    async fn touch_after_revoke_is_a_no_op() {
        let (registry, _dir) = test_registry().await;
        registry.create(sample_record("s1", "alice")).await.unwrap();
        registry.revoke("s1").await.unwrap();
        registry.touch("s1", Utc::now()).await.unwrap();
        let got = registry.get("s1").await.unwrap().unwrap();
        assert_eq!(got.status, SessionStatus::Revoked);
        assert_eq!(got.request_count, 0, "touch on a revoked session must not bump the counter");
    }

    #[tokio::test]
    async fn touch_increments_count_while_active() {
        let (registry, _dir) = test_registry().await;
        registry.create(sample_record("s1", "alice")).await.unwrap();
        registry.touch("s1", Utc::now()).await.unwrap();
        registry.touch("s1", Utc::now()).await.unwrap();
        let got = registry.get("s1").await.unwrap().unwrap();
        assert_eq!(got.request_count, 2);
    }

    #[tokio::test]
    async fn find_by_source_identity_round_trips() {
        let (registry, _dir) = test_registry().await;
        let record = sample_record("s1", "alice");
        let fp = record.source_identity_fingerprint.clone();
        registry.create(record).await.unwrap();
        let found = registry.find_by_source_identity(&fp).await.unwrap();
        assert_eq!(found.unwrap().session_id, "s1");
    }

    #[tokio::test]
    async fn find_latest_by_user_and_profile_returns_most_recent_revoked_session() {
        let (registry, _dir) = test_registry().await;
        registry.create(sample_record("s1", "alice")).await.unwrap();
        registry.revoke("s1").await.unwrap();

        let found = registry.find_latest_by_user_and_profile("alice", "dev").await.unwrap();
        assert_eq!(found.unwrap().status, SessionStatus::Revoked);

        assert!(registry.find_latest_by_user_and_profile("alice", "prod").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_by_user_and_status() {
        let (registry, _dir) = test_registry().await;
        registry.create(sample_record("s1", "alice")).await.unwrap();
        registry.create(sample_record("s2", "alice")).await.unwrap();
        registry.create(sample_record("s3", "bob")).await.unwrap();
        registry.revoke("s2").await.unwrap();

        let alice_sessions = registry.list_by_user("alice").await.unwrap();
        assert_eq!(alice_sessions.len(), 2);

        let active = registry.list_by_status(SessionStatus::Active).await.unwrap();
        assert_eq!(active.len(), 2);
        let revoked = registry.list_by_status(SessionStatus::Revoked).await.unwrap();
        assert_eq!(revoked.len(), 1);
    }
}
