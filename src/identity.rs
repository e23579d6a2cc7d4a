//! Identity extraction (spec.md §4.1).
//!
//! The caller's cloud identity assertion is the only source of truth for
//! the policy key `user`. Falling back to an OS login name here would let
//! any local user impersonate another identity's policy grants, so the
//! sanitisation rule below is load-bearing, not cosmetic.

use crate::errors::AuthenticationError;
use serde::{Deserialize, Serialize};

/// Characters permitted in a canonical username after sanitisation. Mirrors
/// the cloud provider's identity-label constraints (spec.md §3).
const ALLOWED_USERNAME_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+=,.@_-";

fn is_allowed_username_char(c: char) -> bool {
    c.is_ascii() && ALLOWED_USERNAME_CHARS.contains(&(c as u8))
}

/// Kind of cloud identity that authenticated the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityType {
    User,
    AssumedRole,
    Federated,
    Root,
}

/// A caller's identity, extracted and sanitised from a signed assertion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub account_id: String,
    pub user_arn: String,
    pub canonical_username: String,
    pub identity_type: IdentityType,
}

/// The minimal shape of a verified cloud identity assertion — what a
/// `GetCallerIdentity`-equivalent call returns once its signature has
/// already been validated by the transport layer (spec.md §6.1). This
/// repository does not implement SigV4 verification itself (out of
/// scope: "the cloud SDK itself"); callers construct this from whatever
/// transport they used (cloud signature, bearer token, in-process SDK
/// handle) and hand it to [`Identity::from_assertion`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerAssertion {
    pub account_id: String,
    pub arn: String,
    pub is_root: bool,
}

impl Identity {
    /// Build an `Identity` from a verified assertion.
    ///
    /// `canonical_username` is the sanitised final path segment of the ARN
    /// (after the last `/`), with any character outside
    /// `[A-Za-z0-9+=,.@_-]` stripped. Root identities always yield the
    /// literal username `root`. Federated identities use the session-name
    /// segment, which is already the final path segment for an assumed
    /// role ARN (`arn:aws:sts::111111111111:assumed-role/Role/session`).
    pub fn from_assertion(assertion: CallerAssertion) -> Result<Self, AuthenticationError> {
        if assertion.arn.trim().is_empty() {
            return Err(AuthenticationError::IdentityParse(
                "empty ARN".to_string(),
            ));
        }

        let identity_type = classify(&assertion.arn, assertion.is_root)?;

        let canonical_username = if assertion.is_root {
            "root".to_string()
        } else {
            sanitize_username(last_path_segment(&assertion.arn)?)
        };

        Ok(Identity {
            account_id: assertion.account_id,
            user_arn: assertion.arn,
            canonical_username,
            identity_type,
        })
    }
}

fn classify(arn: &str, is_root: bool) -> Result<IdentityType, AuthenticationError> {
    if is_root {
        return Ok(IdentityType::Root);
    }
    if arn.contains(":assumed-role/") {
        return Ok(IdentityType::AssumedRole);
    }
    if arn.contains(":federated-user/") || arn.contains(":saml-provider/") {
        return Ok(IdentityType::Federated);
    }
    if arn.contains(":user/") {
        return Ok(IdentityType::User);
    }
    Err(AuthenticationError::IdentityParse(format!(
        "unrecognised ARN resource type: {arn}"
    )))
}

fn last_path_segment(arn: &str) -> Result<&str, AuthenticationError> {
    arn.rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AuthenticationError::IdentityParse(format!("no path segment in {arn}")))
}

/// Strip any character outside `[A-Za-z0-9+=,.@_-]` from a raw username
/// segment. This is the single place that rule is implemented; every
/// other module treats `canonical_username` as already clean.
pub fn sanitize_username(raw: &str) -> String {
    raw.chars().filter(|c| is_allowed_username_char(*c)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assertion(arn: &str) -> CallerAssertion {
        CallerAssertion {
            account_id: "111111111111".to_string(),
            arn: arn.to_string(),
            is_root: false,
        }
    }

    #[test]
    fn user_arn_yields_final_segment() {
        let id = Identity::from_assertion(assertion("arn:aws:iam::111111111111:user/alice")).unwrap();
        assert_eq!(id.canonical_username, "alice");
        assert_eq!(id.identity_type, IdentityType::User);
    }

    #[test]
    fn assumed_role_uses_session_name() {
        let id = Identity::from_assertion(assertion(
            "arn:aws:sts::111111111111:assumed-role/DeployRole/alice-session",
        ))
        .unwrap();
        assert_eq!(id.canonical_username, "alice-session");
        assert_eq!(id.identity_type, IdentityType::AssumedRole);
    }

    #[test]
    fn root_identity_is_literal_root() {
        let mut a = assertion("arn:aws:iam::111111111111:root");
        a.is_root = true;
        let id = Identity::from_assertion(a).unwrap();
        assert_eq!(id.canonical_username, "root");
        assert_eq!(id.identity_type, IdentityType::Root);
    }

    #[test]
    fn disallowed_characters_are_stripped() {
        assert_eq!(sanitize_username("alice!!<script>"), "alicescript");
        assert_eq!(sanitize_username("alice.bob+test@corp-inc,1=2"), "alice.bob+test@corp-inc,1=2");
    }

    #[test]
    fn canonical_username_only_contains_allowed_chars() {
        let samples = ["a/b/c!@#$%^&*()", "üser", "", "same-as-input_123"];
        for raw in samples {
            let cleaned = sanitize_username(raw);
            assert!(cleaned.chars().all(is_allowed_username_char));
        }
    }

    #[test]
    fn malformed_arn_is_rejected() {
        let err = Identity::from_assertion(assertion("not-an-arn")).unwrap_err();
        assert!(matches!(err, AuthenticationError::IdentityParse(_)));
    }

    #[test]
    fn empty_arn_is_rejected() {
        let err = Identity::from_assertion(assertion("")).unwrap_err();
        assert!(matches!(err, AuthenticationError::IdentityParse(_)));
    }
}
