//! Session record types (spec.md §3).

use crate::policy::model::Mode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Expired,
    Revoked,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Expired => "expired",
            SessionStatus::Revoked => "revoked",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "active" => Some(SessionStatus::Active),
            "expired" => Some(SessionStatus::Expired),
            "revoked" => Some(SessionStatus::Revoked),
            _ => None,
        }
    }
}

/// One vended credential session (spec.md §3 "Session record").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub source_identity_fingerprint: String,
    pub user: String,
    pub profile: String,
    pub mode: Mode,
    pub device_id: Option<String>,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub last_access_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub request_count: i64,
    pub server_instance_id: Option<String>,
}

impl SessionRecord {
    pub(crate) fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        let mode_raw: String = row.get("mode")?;
        let status_raw: String = row.get("status")?;
        Ok(SessionRecord {
            session_id: row.get("session_id")?,
            source_identity_fingerprint: row.get("source_identity_fingerprint")?,
            user: row.get("user")?,
            profile: row.get("profile")?,
            mode: Mode::parse(&mode_raw).unwrap_or(Mode::Cli),
            device_id: row.get("device_id")?,
            status: SessionStatus::parse(&status_raw).unwrap_or(SessionStatus::Expired),
            created_at: parse_rfc3339(&row.get::<_, String>("created_at")?),
            last_access_at: parse_rfc3339(&row.get::<_, String>("last_access_at")?),
            expires_at: parse_rfc3339(&row.get::<_, String>("expires_at")?),
            request_count: row.get("request_count")?,
            server_instance_id: row.get("server_instance_id")?,
        })
    }
}

fn parse_rfc3339(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
