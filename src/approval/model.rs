//! Approval record types (spec.md §3, §4.4).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalState {
    Pending,
    Approved,
    Denied,
    Expired,
    Cancelled,
}

impl ApprovalState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalState::Pending => "pending",
            ApprovalState::Approved => "approved",
            ApprovalState::Denied => "denied",
            ApprovalState::Expired => "expired",
            ApprovalState::Cancelled => "cancelled",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(ApprovalState::Pending),
            "approved" => Some(ApprovalState::Approved),
            "denied" => Some(ApprovalState::Denied),
            "expired" => Some(ApprovalState::Expired),
            "cancelled" => Some(ApprovalState::Cancelled),
            _ => None,
        }
    }

    /// Terminal states are sinks: `approved`, `denied`, `expired`,
    /// `cancelled` (spec.md §3).
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ApprovalState::Pending)
    }
}

/// PK: `request_id` (8 hex chars, spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub request_id: String,
    pub requester: String,
    pub profile: String,
    pub justification: String,
    pub state: ApprovalState,
    pub requested_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub approver: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub max_session_duration: std::time::Duration,
}

impl ApprovalRecord {
    pub(crate) fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        let state_raw: String = row.get("state")?;
        let approved_at: Option<String> = row.get("approved_at")?;
        Ok(ApprovalRecord {
            request_id: row.get("request_id")?,
            requester: row.get("requester")?,
            profile: row.get("profile")?,
            justification: row.get("justification")?,
            state: ApprovalState::parse(&state_raw).unwrap_or(ApprovalState::Expired),
            requested_at: parse_rfc3339(&row.get::<_, String>("requested_at")?),
            approved_at: approved_at.map(|s| parse_rfc3339(&s)),
            approver: row.get("approver")?,
            expires_at: parse_rfc3339(&row.get::<_, String>("expires_at")?),
            max_session_duration: std::time::Duration::from_secs(row.get::<_, i64>("max_session_duration_secs")? as u64),
        })
    }
}

fn parse_rfc3339(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// Generate a fresh 8-hex-char approval/request id (spec.md §3).
pub fn new_request_id() -> String {
    use rand::RngCore;
    let mut buf = [0u8; 4];
    rand::rng().fill_bytes(&mut buf);
    hex::encode(buf)
}
