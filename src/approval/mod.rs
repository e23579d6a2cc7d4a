//! Approval request/approve/deny state machine (spec.md §4.4).

pub mod model;

use crate::db::Database;
use crate::policy::model::{ApprovalsConfig, Policy};
pub use model::{ApprovalRecord, ApprovalState};
use rusqlite::params;

#[derive(Clone)]
pub struct ApprovalStore {
    db: Database,
}

/// Simple `*`-wildcard glob match used for approver-profile routing
/// (spec.md §4.4 "glob on profile name"). No other wildcard metacharacters
/// are recognised.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == text;
    }
    let mut pos = 0;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            if !text[pos..].starts_with(part) {
                return false;
            }
            pos += part.len();
        } else if i == parts.len() - 1 {
            if !text[pos..].ends_with(part) {
                return false;
            }
        } else {
            match text[pos..].find(part) {
                Some(found) => pos += found + part.len(),
                None => return false,
            }
        }
    }
    true
}

/// Approver-routing lookup: is `candidate` listed (directly or via a
/// profile glob) as an approver for `profile`?
pub fn is_approver(config: &ApprovalsConfig, profile: &str, candidate: &str) -> bool {
    config.approvers.iter().any(|(glob, approvers)| {
        glob_match(glob, profile) && approvers.iter().any(|a| a == "*" || a == candidate)
    })
}

impl ApprovalStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a pending approval request, or — if the policy's
    /// auto-approve predicates are satisfied — insert it already
    /// `approved` with `approver = "auto"` (spec.md §4.4).
    pub async fn create(
        &self,
        policy: &Policy,
        requester: &str,
        profile: &str,
        justification: &str,
        now: chrono::DateTime<chrono::Utc>,
        request_ttl: std::time::Duration,
    ) -> anyhow::Result<ApprovalRecord> {
        let request_id = model::new_request_id();
        let expires_at = now + chrono::Duration::from_std(request_ttl).unwrap_or_default();
        let max_session_duration = policy.max_server_duration;

        let auto_approved = policy
            .approvals
            .as_ref()
            .map(|a| auto_approve_matches(a, requester, profile, now))
            .unwrap_or(false);

        let (state, approver, approved_at) = if auto_approved {
            (ApprovalState::Approved, Some("auto".to_string()), Some(now))
        } else {
            (ApprovalState::Pending, None, None)
        };

        let record = ApprovalRecord {
            request_id: request_id.clone(),
            requester: requester.to_string(),
            profile: profile.to_string(),
            justification: justification.to_string(),
            state,
            requested_at: now,
            approved_at,
            approver,
            expires_at,
            max_session_duration,
        };

        let to_insert = record.clone_for_insert();
        self.db
            .with_conn(move |conn| {
                conn.execute(
                    r#"
                    INSERT INTO approvals (
                        request_id, requester, profile, justification, state,
                        requested_at, approved_at, approver, expires_at, max_session_duration_secs
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                    ON CONFLICT(request_id) DO NOTHING
                    "#,
                    params![
                        to_insert.request_id,
                        to_insert.requester,
                        to_insert.profile,
                        to_insert.justification,
                        to_insert.state.as_str(),
                        to_insert.requested_at.to_rfc3339(),
                        to_insert.approved_at.map(|d| d.to_rfc3339()),
                        to_insert.approver,
                        to_insert.expires_at.to_rfc3339(),
                        to_insert.max_session_duration.as_secs() as i64,
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(record)
    }

    pub async fn get(&self, request_id: &str) -> anyhow::Result<Option<ApprovalRecord>> {
        let request_id = request_id.to_string();
        self.db
            .with_conn(move |conn| {
                let mut stmt = conn.prepare("SELECT * FROM approvals WHERE request_id = ?1")?;
                let mut rows = stmt.query(params![request_id])?;
                match rows.next()? {
                    Some(row) => Ok(Some(ApprovalRecord::from_row(row)?)),
                    None => Ok(None),
                }
            })
            .await
    }

    /// `pending -> approved`. The caller must already have verified
    /// `approver` is permitted for `profile` via [`is_approver`].
    pub async fn approve(
        &self,
        request_id: &str,
        approver: &str,
        now: chrono::DateTime<chrono::Utc>,
    ) -> anyhow::Result<bool> {
        let request_id = request_id.to_string();
        let approver = approver.to_string();
        self.db
            .with_conn(move |conn| {
                let changed = conn.execute(
                    "UPDATE approvals SET state = 'approved', approver = ?2, approved_at = ?3 WHERE request_id = ?1 AND state = 'pending'",
                    params![request_id, approver, now.to_rfc3339()],
                )?;
                Ok(changed > 0)
            })
            .await
    }

    /// `pending -> denied`.
    pub async fn deny(&self, request_id: &str, approver: &str) -> anyhow::Result<bool> {
        let request_id = request_id.to_string();
        let approver = approver.to_string();
        self.db
            .with_conn(move |conn| {
                let changed = conn.execute(
                    "UPDATE approvals SET state = 'denied', approver = ?2 WHERE request_id = ?1 AND state = 'pending'",
                    params![request_id, approver],
                )?;
                Ok(changed > 0)
            })
            .await
    }

    /// `pending -> cancelled`. Caller must be the original requester.
    pub async fn cancel(&self, request_id: &str, caller: &str) -> anyhow::Result<bool> {
        let request_id = request_id.to_string();
        let caller = caller.to_string();
        self.db
            .with_conn(move |conn| {
                let changed = conn.execute(
                    "UPDATE approvals SET state = 'cancelled' WHERE request_id = ?1 AND requester = ?2 AND state = 'pending'",
                    params![request_id, caller],
                )?;
                Ok(changed > 0)
            })
            .await
    }

    /// TTL-driven `pending -> expired`.
    pub async fn expire(&self, request_id: &str) -> anyhow::Result<bool> {
        let request_id = request_id.to_string();
        self.db
            .with_conn(move |conn| {
                let changed = conn.execute(
                    "UPDATE approvals SET state = 'expired' WHERE request_id = ?1 AND state = 'pending'",
                    params![request_id],
                )?;
                Ok(changed > 0)
            })
            .await
    }

    /// The most recent non-expired `approved` record for `(user, profile)`
    /// (spec.md §4.4 "Lookup for vending").
    pub async fn find_approved_request(
        &self,
        user: &str,
        profile: &str,
        now: chrono::DateTime<chrono::Utc>,
    ) -> anyhow::Result<Option<ApprovalRecord>> {
        let (user, profile, now_s) = (user.to_string(), profile.to_string(), now.to_rfc3339());
        self.db
            .with_conn(move |conn| {
                let mut stmt = conn.prepare(
                    r#"
                    SELECT * FROM approvals
                    WHERE requester = ?1 AND profile = ?2 AND state = 'approved' AND expires_at > ?3
                    ORDER BY approved_at DESC LIMIT 1
                    "#,
                )?;
                let mut rows = stmt.query(params![user, profile, now_s])?;
                match rows.next()? {
                    Some(row) => Ok(Some(ApprovalRecord::from_row(row)?)),
                    None => Ok(None),
                }
            })
            .await
    }
}

fn auto_approve_matches(
    config: &ApprovalsConfig,
    requester: &str,
    profile: &str,
    now: chrono::DateTime<chrono::Utc>,
) -> bool {
    config.auto_approve.iter().any(|rule| {
        let users_ok = rule.users.as_ref().map(|u| u.iter().any(|x| x == requester)).unwrap_or(true);
        let profiles_ok = rule.profiles.as_ref().map(|p| p.iter().any(|x| x == profile)).unwrap_or(true);
        let time_ok = rule
            .time_window
            .as_ref()
            .map(|tw| time_window_matches(tw, now))
            .unwrap_or(true);
        users_ok && profiles_ok && time_ok
    })
}

fn time_window_matches(tw: &crate::policy::model::TimeWindow, now: chrono::DateTime<chrono::Utc>) -> bool {
    use chrono::{Timelike, Datelike};
    if let Some(weekdays) = &tw.weekdays {
        let today = crate::policy::model::Weekday::from_chrono(now.weekday());
        if !weekdays.contains(&today) {
            return false;
        }
    }
    if let Some(hours) = &tw.hours {
        if !hours.contains(now.hour() as u8) {
            return false;
        }
    }
    true
}

impl ApprovalRecord {
    fn clone_for_insert(&self) -> ApprovalRecord {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::model::Policy;
    use chrono::Utc;
    use std::time::Duration;

    async fn test_store() -> (ApprovalStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("broker.db")).unwrap();
        (ApprovalStore::new(db), dir)
    }

    fn bare_policy() -> Policy {
        Policy {
            rules: vec![],
            max_server_duration: Duration::from_secs(3600),
            session_table: None,
            approvals: None,
            breakglass: None,
        }
    }

    #[test]
    fn glob_matches_wildcard_suffix() {
        assert!(glob_match("prod-*", "prod-east"));
        assert!(!glob_match("prod-*", "dev-east"));
        assert!(glob_match("*", "anything"));
        assert!(glob_match("exact", "exact"));
        assert!(!glob_match("exact", "exactly"));
    }

    #[tokio::test]
    async fn create_without_auto_approve_is_pending() {
        let (store, _dir) = test_store().await;
        let rec = store
            .create(&bare_policy(), "alice", "prod", "need access", Utc::now(), Duration::from_secs(3600))
            .await
            .unwrap();
        assert_eq!(rec.state, ApprovalState::Pending);
        assert_eq!(rec.request_id.len(), 8);
    }

    #[tokio::test]
    async fn approve_then_find_approved_request() {
        let (store, _dir) = test_store().await;
        let rec = store
            .create(&bare_policy(), "alice", "prod", "need access", Utc::now(), Duration::from_secs(3600))
            .await
            .unwrap();
        assert!(store.approve(&rec.request_id, "boss", Utc::now()).await.unwrap());

        let found = store.find_approved_request("alice", "prod", Utc::now()).await.unwrap();
        assert!(found.is_some());
        assert_eq!(found.unwrap().approver.as_deref(), Some("boss"));
    }

    #[tokio::test]
    async fn terminal_state_rejects_further_transitions() {
        let (store, _dir) = test_store().await;
        let rec = store
            .create(&bare_policy(), "alice", "prod", "need access", Utc::now(), Duration::from_secs(3600))
            .await
            .unwrap();
        assert!(store.deny(&rec.request_id, "boss").await.unwrap());
        // a denied request can never transition to approved
        assert!(!store.approve(&rec.request_id, "boss", Utc::now()).await.unwrap());
    }

    #[tokio::test]
    async fn cancel_requires_matching_requester() {
        let (store, _dir) = test_store().await;
        let rec = store
            .create(&bare_policy(), "alice", "prod", "need access", Utc::now(), Duration::from_secs(3600))
            .await
            .unwrap();
        assert!(!store.cancel(&rec.request_id, "mallory").await.unwrap());
        assert!(store.cancel(&rec.request_id, "alice").await.unwrap());
    }
}
