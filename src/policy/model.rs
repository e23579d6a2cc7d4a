//! Policy document types (spec.md §3, §6.2).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// The outcome a matching rule prescribes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Effect {
    Allow,
    Deny,
    RequireApproval,
    RequireBreakglass,
    RequireServer,
    RequireServerSession,
}

impl Effect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Effect::Allow => "allow",
            Effect::Deny => "deny",
            Effect::RequireApproval => "require_approval",
            Effect::RequireBreakglass => "require_breakglass",
            Effect::RequireServer => "require_server",
            Effect::RequireServerSession => "require_server_session",
        }
    }
}

/// How the caller is consuming the vended credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Cli,
    CredentialProcess,
    Server,
    RemoteServer,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Cli => "cli",
            Mode::CredentialProcess => "credential_process",
            Mode::Server => "server",
            Mode::RemoteServer => "remote_server",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "cli" => Some(Mode::Cli),
            "credential_process" => Some(Mode::CredentialProcess),
            "server" => Some(Mode::Server),
            "remote_server" => Some(Mode::RemoteServer),
            _ => None,
        }
    }

    pub fn is_server_mode(&self) -> bool {
        matches!(self, Mode::Server | Mode::RemoteServer)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Weekday {
    Mon,
    Tue,
    Wed,
    Thu,
    Fri,
    Sat,
    Sun,
}

impl Weekday {
    pub fn from_chrono(w: chrono::Weekday) -> Self {
        match w {
            chrono::Weekday::Mon => Weekday::Mon,
            chrono::Weekday::Tue => Weekday::Tue,
            chrono::Weekday::Wed => Weekday::Wed,
            chrono::Weekday::Thu => Weekday::Thu,
            chrono::Weekday::Fri => Weekday::Fri,
            chrono::Weekday::Sat => Weekday::Sat,
            chrono::Weekday::Sun => Weekday::Sun,
        }
    }
}

/// Inclusive-start, exclusive-end hour range (spec.md §4.3: `[start, end)`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HourRange {
    pub start: u8,
    pub end: u8,
}

impl HourRange {
    pub fn contains(&self, hour: u8) -> bool {
        self.start <= hour && hour < self.end
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weekdays: Option<Vec<Weekday>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hours: Option<HourRange>,
}

/// Device posture requirements. Every field present must hold; a missing
/// field is not checked (spec.md §4.3).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConditions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub require_mdm: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub require_encryption: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub require_mdm_compliant: Option<bool>,
}

impl DeviceConditions {
    pub fn is_empty(&self) -> bool {
        self.require_mdm.is_none()
            && self.require_encryption.is_none()
            && self.require_mdm_compliant.is_none()
    }
}

/// One entry in the policy's ordered rule list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub effect: Effect,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profiles: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub users: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modes: Option<Vec<Mode>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_window: Option<TimeWindow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceConditions>,
}

impl Rule {
    /// Stable digest used in Decision records so a rule can be identified
    /// even across file edits that don't change its semantics (spec.md §3
    /// `matched_rule_digest`).
    pub fn digest(&self) -> String {
        use sha2::{Digest, Sha256};
        let canonical = serde_json::to_string(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        hex::encode(&hasher.finalize()[..8])
    }
}

/// An auto-approve predicate (spec.md §4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoApproveRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub users: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profiles: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_window: Option<TimeWindow>,
    #[serde(default, with = "duration_opt", skip_serializing_if = "Option::is_none")]
    pub max_duration: Option<Duration>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApprovalsConfig {
    /// Profile glob -> list of approvers who may approve requests for it.
    #[serde(default)]
    pub approvers: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub auto_approve: Vec<AutoApproveRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakglassConfig {
    #[serde(with = "duration_mod")]
    pub cooldown: Duration,
    pub user_quota: u32,
    pub profile_quota: u32,
    #[serde(default)]
    pub allowed_users: Vec<String>,
    #[serde(default)]
    pub allowed_reasons: Vec<String>,
    #[serde(with = "duration_mod")]
    pub max_duration: Duration,
    /// Invocation count within the quota window beyond which `severity_flag`
    /// is set (advisory; does not block the request).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalation_threshold: Option<u32>,
}

/// The full authorization configuration document (spec.md §6.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub rules: Vec<Rule>,
    #[serde(with = "duration_mod")]
    pub max_server_duration: Duration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_table: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approvals: Option<ApprovalsConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breakglass: Option<BreakglassConfig>,
}

impl Policy {
    pub fn profiles(&self) -> Vec<String> {
        let mut seen = std::collections::BTreeSet::new();
        for rule in &self.rules {
            if let Some(profiles) = &rule.profiles {
                seen.extend(profiles.iter().cloned());
            }
        }
        seen.into_iter().collect()
    }
}

/// Parse durations like `1h`, `30m`, `45s`, `4h` from the policy document.
/// The corpus has no `humantime`-style dependency in play here, so this is
/// a narrow hand-rolled parser limited to the three units the schema uses.
pub fn parse_duration(raw: &str) -> Result<Duration, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err("empty duration".to_string());
    }
    let (num_part, unit) = raw.split_at(raw.len() - 1);
    let n: u64 = num_part
        .parse()
        .map_err(|_| format!("invalid duration: {raw}"))?;
    match unit {
        "s" => Ok(Duration::from_secs(n)),
        "m" => Ok(Duration::from_secs(n * 60)),
        "h" => Ok(Duration::from_secs(n * 3600)),
        _ => Err(format!("unsupported duration unit in: {raw}")),
    }
}

pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs % 3600 == 0 && secs != 0 {
        format!("{}h", secs / 3600)
    } else if secs % 60 == 0 && secs != 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{secs}s")
    }
}

pub(crate) mod duration_mod {
    use super::{format_duration, parse_duration};
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format_duration(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(d)?;
        parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

pub(crate) mod duration_opt {
    use super::{format_duration, parse_duration};
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&format_duration(*d)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let raw: Option<String> = Option::deserialize(d)?;
        match raw {
            Some(raw) => parse_duration(&raw).map(Some).map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}

/// A single credential request, the evaluator's input (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub user: String,
    pub profile: String,
    pub time: chrono::DateTime<chrono::Utc>,
    pub mode: Mode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_posture: Option<crate::device::DevicePosture>,
}

/// The outcome of evaluating a `Policy` against a `Request` (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub effect: Effect,
    pub matched_rule_index: Option<usize>,
    pub matched_rule_digest: Option<String>,
    pub request_echo: Request,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}
