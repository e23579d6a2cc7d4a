//! Break-glass emergency bypass workflow (spec.md §4.5).

pub mod model;

use crate::db::Database;
use crate::policy::model::{BreakglassConfig, Policy};
pub use model::{BreakglassRecord, BreakglassState, ReasonCode};
use chrono::{DateTime, Utc};
use rusqlite::params;

/// Why an invocation was rejected, in the order spec.md §4.5 evaluates
/// preconditions. The first failing precondition is returned; later ones
/// are never checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakglassDenial {
    NotPermitted,
    Cooldown,
    UserQuotaExceeded,
    ProfileQuotaExceeded,
    AlreadyActive,
}

#[derive(Clone)]
pub struct BreakglassStore {
    db: Database,
}

impl BreakglassStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Evaluate the five invocation preconditions in order and, if all
    /// pass, create a new `active` event. The per-invocation quota window
    /// used for preconditions 3 and 4 is the policy's configured cooldown
    /// duration.
    pub async fn invoke(
        &self,
        policy: &Policy,
        invoker: &str,
        profile: &str,
        reason: ReasonCode,
        justification: &str,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Result<BreakglassRecord, BreakglassDenial>> {
        let config = match &policy.breakglass {
            Some(c) => c,
            None => return Ok(Err(BreakglassDenial::NotPermitted)),
        };

        if !permitted(config, invoker, reason) {
            return Ok(Err(BreakglassDenial::NotPermitted));
        }

        let window_start = now - chrono::Duration::from_std(config.cooldown).unwrap_or_default();

        if let Some(last) = self.last_event_by_invoker(invoker).await? {
            if now - last.started_at < chrono::Duration::from_std(config.cooldown).unwrap_or_default() {
                return Ok(Err(BreakglassDenial::Cooldown));
            }
        }

        let user_active_count = self.count_active_events_by_invoker(invoker, window_start).await?;
        if user_active_count >= config.user_quota as i64 {
            return Ok(Err(BreakglassDenial::UserQuotaExceeded));
        }

        let profile_active_count = self.count_active_events_for_profile(profile, window_start).await?;
        if profile_active_count >= config.profile_quota as i64 {
            return Ok(Err(BreakglassDenial::ProfileQuotaExceeded));
        }

        if self.find_active_by_invoker_and_profile(invoker, profile).await?.is_some() {
            return Ok(Err(BreakglassDenial::AlreadyActive));
        }

        let severity_flag = config
            .escalation_threshold
            .map(|threshold| user_active_count + 1 > threshold as i64)
            .unwrap_or(false);

        let event_id = model::new_event_id();
        let max_duration = std::cmp::min(config.max_duration, std::time::Duration::from_secs(4 * 3600));
        let expires_at = now + chrono::Duration::from_std(max_duration).unwrap_or_default();

        let record = BreakglassRecord {
            event_id: event_id.clone(),
            invoker: invoker.to_string(),
            profile: profile.to_string(),
            reason_code: reason,
            justification: justification.to_string(),
            state: BreakglassState::Active,
            started_at: now,
            expires_at,
            closed_at: None,
            closer: None,
            severity_flag,
        };

        let to_insert = record.clone();
        self.db
            .with_conn(move |conn| {
                conn.execute(
                    r#"
                    INSERT INTO breakglass_events (
                        event_id, invoker, profile, reason_code, justification, state,
                        started_at, expires_at, closed_at, closer, severity_flag
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                    ON CONFLICT(event_id) DO NOTHING
                    "#,
                    params![
                        to_insert.event_id,
                        to_insert.invoker,
                        to_insert.profile,
                        to_insert.reason_code.as_str(),
                        to_insert.justification,
                        to_insert.state.as_str(),
                        to_insert.started_at.to_rfc3339(),
                        to_insert.expires_at.to_rfc3339(),
                        to_insert.closed_at.map(|d| d.to_rfc3339()),
                        to_insert.closer,
                        to_insert.severity_flag as i64,
                    ],
                )?;
                Ok(())
            })
            .await?;

        crate::metrics::record_breakglass_invocation(profile, record.severity_flag);
        Ok(Ok(record))
    }

    pub async fn get(&self, event_id: &str) -> anyhow::Result<Option<BreakglassRecord>> {
        let event_id = event_id.to_string();
        self.db
            .with_conn(move |conn| {
                let mut stmt = conn.prepare("SELECT * FROM breakglass_events WHERE event_id = ?1")?;
                let mut rows = stmt.query(params![event_id])?;
                match rows.next()? {
                    Some(row) => Ok(Some(BreakglassRecord::from_row(row)?)),
                    None => Ok(None),
                }
            })
            .await
    }

    /// Explicit closure, requiring the closer's identity and a post-hoc
    /// note (spec.md §4.5).
    pub async fn close(&self, event_id: &str, closer: &str, note: &str, now: DateTime<Utc>) -> anyhow::Result<bool> {
        let event_id = event_id.to_string();
        let closer = closer.to_string();
        let note = note.to_string();
        self.db
            .with_conn(move |conn| {
                let changed = conn.execute(
                    "UPDATE breakglass_events SET state = 'closed', closed_at = ?2, closer = ?3, justification = justification || ' | closed: ' || ?4 WHERE event_id = ?1 AND state = 'active'",
                    params![event_id, now.to_rfc3339(), closer, note],
                )?;
                Ok(changed > 0)
            })
            .await
    }

    /// TTL-driven expiry sweep: marks overdue `active` events as `expired`.
    pub async fn expire_overdue(&self, now: DateTime<Utc>) -> anyhow::Result<usize> {
        let now_s = now.to_rfc3339();
        self.db
            .with_conn(move |conn| {
                let n = conn.execute(
                    "UPDATE breakglass_events SET state = 'expired' WHERE state = 'active' AND expires_at <= ?1",
                    params![now_s],
                )?;
                Ok(n)
            })
            .await
    }

    pub async fn find_active_by_invoker_and_profile(
        &self,
        invoker: &str,
        profile: &str,
    ) -> anyhow::Result<Option<BreakglassRecord>> {
        let (invoker, profile) = (invoker.to_string(), profile.to_string());
        self.db
            .with_conn(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT * FROM breakglass_events WHERE invoker = ?1 AND profile = ?2 AND state = 'active' LIMIT 1",
                )?;
                let mut rows = stmt.query(params![invoker, profile])?;
                match rows.next()? {
                    Some(row) => Ok(Some(BreakglassRecord::from_row(row)?)),
                    None => Ok(None),
                }
            })
            .await
    }

    async fn last_event_by_invoker(&self, invoker: &str) -> anyhow::Result<Option<BreakglassRecord>> {
        let invoker = invoker.to_string();
        self.db
            .with_conn(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT * FROM breakglass_events WHERE invoker = ?1 ORDER BY started_at DESC LIMIT 1",
                )?;
                let mut rows = stmt.query(params![invoker])?;
                match rows.next()? {
                    Some(row) => Ok(Some(BreakglassRecord::from_row(row)?)),
                    None => Ok(None),
                }
            })
            .await
    }

    async fn count_active_events_by_invoker(&self, invoker: &str, since: DateTime<Utc>) -> anyhow::Result<i64> {
        let (invoker, since) = (invoker.to_string(), since.to_rfc3339());
        self.db
            .with_conn(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM breakglass_events WHERE invoker = ?1 AND state = 'active' AND started_at >= ?2",
                    params![invoker, since],
                    |row| row.get(0),
                )?;
                Ok(count)
            })
            .await
    }

    async fn count_active_events_for_profile(&self, profile: &str, since: DateTime<Utc>) -> anyhow::Result<i64> {
        let (profile, since) = (profile.to_string(), since.to_rfc3339());
        self.db
            .with_conn(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM breakglass_events WHERE profile = ?1 AND state = 'active' AND started_at >= ?2",
                    params![profile, since],
                    |row| row.get(0),
                )?;
                Ok(count)
            })
            .await
    }
}

fn permitted(config: &BreakglassConfig, invoker: &str, reason: ReasonCode) -> bool {
    let user_ok = config.allowed_users.is_empty() || config.allowed_users.iter().any(|u| u == invoker);
    let reason_ok = config.allowed_reasons.is_empty() || config.allowed_reasons.iter().any(|r| r == reason.as_str());
    user_ok && reason_ok
}

/// Compute the vended session's TTL as the minimum of the requested
/// duration, the policy's `max_server_duration`, the 4h absolute cap, and
/// the break-glass record's remaining lifetime (spec.md §4.5 "Duration
/// capping").
pub fn cap_duration(
    requested: std::time::Duration,
    policy: &Policy,
    record: &BreakglassRecord,
    now: DateTime<Utc>,
) -> std::time::Duration {
    let remaining = (record.expires_at - now).to_std().unwrap_or_default();
    let four_hours = std::time::Duration::from_secs(4 * 3600);
    requested
        .min(policy.max_server_duration)
        .min(four_hours)
        .min(remaining)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn test_store() -> (BreakglassStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("broker.db")).unwrap();
        (BreakglassStore::new(db), dir)
    }

    fn policy_with_breakglass(cooldown_secs: u64, user_quota: u32, profile_quota: u32) -> Policy {
        Policy {
            rules: vec![],
            max_server_duration: Duration::from_secs(3600),
            session_table: None,
            approvals: None,
            breakglass: Some(BreakglassConfig {
                cooldown: Duration::from_secs(cooldown_secs),
                user_quota,
                profile_quota,
                allowed_users: vec![],
                allowed_reasons: vec![],
                max_duration: Duration::from_secs(3600),
                escalation_threshold: None,
            }),
        }
    }

    #[tokio::test]
    async fn e5_rate_limit_scenario() {
        let (store, _dir) = test_store().await;
        let policy = policy_with_breakglass(3600, 2, 10);
        let now = Utc::now();

        let e1 = store
            .invoke(&policy, "bob", "prod-a", ReasonCode::Incident, "j1", now)
            .await
            .unwrap();
        assert!(e1.is_ok());
        let e2 = store
            .invoke(&policy, "bob", "prod-b", ReasonCode::Incident, "j2", now)
            .await
            .unwrap();
        assert!(e2.is_ok());

        let e3 = store
            .invoke(&policy, "bob", "prod-c", ReasonCode::Incident, "j3", now)
            .await
            .unwrap();
        assert_eq!(e3, Err(BreakglassDenial::UserQuotaExceeded));

        // e1 and e2 remain active
        let e1_rec = store.get(&e1.unwrap().event_id).await.unwrap().unwrap();
        let e2_rec = store.get(&e2.unwrap().event_id).await.unwrap().unwrap();
        assert_eq!(e1_rec.state, BreakglassState::Active);
        assert_eq!(e2_rec.state, BreakglassState::Active);
    }

    #[tokio::test]
    async fn stacking_prevention_blocks_same_invoker_profile() {
        let (store, _dir) = test_store().await;
        let policy = policy_with_breakglass(1, 10, 10);
        let now = Utc::now();
        store.invoke(&policy, "bob", "prod", ReasonCode::Incident, "j1", now).await.unwrap().unwrap();
        let second = store.invoke(&policy, "bob", "prod", ReasonCode::Incident, "j2", now).await.unwrap();
        assert_eq!(second, Err(BreakglassDenial::AlreadyActive));
    }

    #[tokio::test]
    async fn no_breakglass_config_is_not_permitted() {
        let (store, _dir) = test_store().await;
        let policy = Policy {
            rules: vec![],
            max_server_duration: Duration::from_secs(3600),
            session_table: None,
            approvals: None,
            breakglass: None,
        };
        let result = store
            .invoke(&policy, "bob", "prod", ReasonCode::Incident, "j1", Utc::now())
            .await
            .unwrap();
        assert_eq!(result, Err(BreakglassDenial::NotPermitted));
    }

    #[tokio::test]
    async fn close_requires_active_state() {
        let (store, _dir) = test_store().await;
        let policy = policy_with_breakglass(1, 10, 10);
        let now = Utc::now();
        let rec = store.invoke(&policy, "bob", "prod", ReasonCode::Incident, "j1", now).await.unwrap().unwrap();
        assert!(store.close(&rec.event_id, "closer", "resolved", now).await.unwrap());
        assert!(!store.close(&rec.event_id, "closer", "again", now).await.unwrap());
    }
}
