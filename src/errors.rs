//! Stable error taxonomy for the broker.
//!
//! Every outcome of the decision/vending pipeline that is not a plain
//! success carries one of the codes below. Internal call sites use
//! `anyhow::Result` (with `.context(...)`) for plumbing errors — database
//! I/O, filesystem permissions, migrations — and convert into a
//! `BrokerError` only at the seam where a caller needs to branch on the
//! taxonomy (vending, approval/break-glass transitions, server responses).

use thiserror::Error;

/// Stable, externally-visible error codes (spec.md §7).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// No allow rule matched; default-deny.
    #[error("policy denied the request")]
    PolicyDeny,

    /// Caller must obtain approval before a session can be vended.
    #[error("approval required (request_id={request_id})")]
    RequireApproval {
        /// The approval request id the caller should track.
        request_id: String,
    },

    /// Caller must invoke the break-glass channel.
    #[error("break-glass invocation required")]
    RequireBreakglass,

    /// Identity extraction failed.
    #[error("authentication failed")]
    Auth,

    /// An active session was revoked since issuance.
    #[error("session revoked")]
    SessionRevoked,

    /// A lookup by id found nothing. Internal only; never surfaced externally.
    #[error("session not found")]
    SessionNotFound,

    /// Per-caller throttle exceeded.
    #[error("rate limited")]
    RateLimited,

    /// Policy document failed to load or parse.
    #[error("configuration error: {0}")]
    Config(String),

    /// A downstream dependency (registry, cloud client) failed.
    #[error("infrastructure error")]
    Infra,

    /// The caller aborted the operation before completion.
    #[error("cancelled")]
    Cancelled,
}

impl BrokerError {
    /// Stable machine-readable code, as embedded in external HTTP bodies
    /// and used by CLI exit-code mapping (spec.md §6.3, §7).
    pub fn code(&self) -> &'static str {
        match self {
            BrokerError::PolicyDeny => "POLICY_DENY",
            BrokerError::RequireApproval { .. } => "POLICY_REQUIRE_APPROVAL",
            BrokerError::RequireBreakglass => "POLICY_REQUIRE_BREAKGLASS",
            BrokerError::Auth => "AUTH_ERROR",
            BrokerError::SessionRevoked => "SESSION_REVOKED",
            BrokerError::SessionNotFound => "SESSION_NOT_FOUND",
            BrokerError::RateLimited => "RATE_LIMITED",
            BrokerError::Config(_) => "CONFIG_ERROR",
            BrokerError::Infra => "INFRA_ERROR",
            BrokerError::Cancelled => "CANCELLED",
        }
    }

    /// CLI process exit code (spec.md §6.3).
    pub fn exit_code(&self) -> i32 {
        match self {
            BrokerError::PolicyDeny
            | BrokerError::RequireApproval { .. }
            | BrokerError::RequireBreakglass => 1,
            BrokerError::Config(_) => 2,
            BrokerError::Infra | BrokerError::SessionRevoked | BrokerError::SessionNotFound => 3,
            BrokerError::Auth | BrokerError::RateLimited => 4,
            BrokerError::Cancelled => 4,
        }
    }

    /// Generic message safe to return to external callers. Never includes
    /// ARNs, account ids, or internal detail (spec.md §7).
    pub fn external_message(&self) -> &'static str {
        match self {
            BrokerError::PolicyDeny => "access denied",
            BrokerError::RequireApproval { .. } => "approval required",
            BrokerError::RequireBreakglass => "break-glass invocation required",
            BrokerError::Auth => "unauthorized",
            BrokerError::SessionRevoked => "session revoked",
            BrokerError::SessionNotFound => "not found",
            BrokerError::RateLimited => "rate limited",
            BrokerError::Config(_) => "configuration error",
            BrokerError::Infra => "internal error",
            BrokerError::Cancelled => "cancelled",
        }
    }
}

/// Errors raised while extracting an `Identity` from a caller's transport
/// (spec.md §4.1).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthenticationError {
    /// No signature or assertion was presented.
    #[error("no identity assertion presented")]
    Missing,
    /// The assertion's signature failed validation.
    #[error("identity assertion signature invalid")]
    InvalidSignature,
    /// The assertion parsed but its ARN is syntactically malformed.
    #[error("malformed ARN: {0}")]
    IdentityParse(String),
}

impl From<AuthenticationError> for BrokerError {
    fn from(_: AuthenticationError) -> Self {
        BrokerError::Auth
    }
}
