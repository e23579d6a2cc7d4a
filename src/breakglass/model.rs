//! Break-glass record types (spec.md §3, §4.5).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    Incident,
    Maintenance,
    Security,
    Recovery,
    Other,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::Incident => "incident",
            ReasonCode::Maintenance => "maintenance",
            ReasonCode::Security => "security",
            ReasonCode::Recovery => "recovery",
            ReasonCode::Other => "other",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "incident" => Some(ReasonCode::Incident),
            "maintenance" => Some(ReasonCode::Maintenance),
            "security" => Some(ReasonCode::Security),
            "recovery" => Some(ReasonCode::Recovery),
            "other" => Some(ReasonCode::Other),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakglassState {
    Active,
    Closed,
    Expired,
}

impl BreakglassState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakglassState::Active => "active",
            BreakglassState::Closed => "closed",
            BreakglassState::Expired => "expired",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "active" => Some(BreakglassState::Active),
            "closed" => Some(BreakglassState::Closed),
            "expired" => Some(BreakglassState::Expired),
            _ => None,
        }
    }
}

/// PK: `event_id` (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakglassRecord {
    pub event_id: String,
    pub invoker: String,
    pub profile: String,
    pub reason_code: ReasonCode,
    pub justification: String,
    pub state: BreakglassState,
    pub started_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub closer: Option<String>,
    pub severity_flag: bool,
}

impl BreakglassRecord {
    pub(crate) fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        let state_raw: String = row.get("state")?;
        let reason_raw: String = row.get("reason_code")?;
        let closed_at: Option<String> = row.get("closed_at")?;
        Ok(BreakglassRecord {
            event_id: row.get("event_id")?,
            invoker: row.get("invoker")?,
            profile: row.get("profile")?,
            reason_code: ReasonCode::parse(&reason_raw).unwrap_or(ReasonCode::Other),
            justification: row.get("justification")?,
            state: BreakglassState::parse(&state_raw).unwrap_or(BreakglassState::Expired),
            started_at: parse_rfc3339(&row.get::<_, String>("started_at")?),
            expires_at: parse_rfc3339(&row.get::<_, String>("expires_at")?),
            closed_at: closed_at.map(|s| parse_rfc3339(&s)),
            closer: row.get("closer")?,
            severity_flag: row.get::<_, i64>("severity_flag")? != 0,
        })
    }
}

fn parse_rfc3339(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

pub fn new_event_id() -> String {
    use rand::RngCore;
    let mut buf = [0u8; 8];
    rand::rng().fill_bytes(&mut buf);
    hex::encode(buf)
}
