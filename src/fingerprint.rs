//! Identity fingerprint / source-identity token (spec.md §3, Design Notes
//! "Builder pattern").
//!
//! A fingerprint is never assembled by string concatenation at call sites —
//! every caller goes through [`FingerprintBuilder`], which validates the
//! prefix, sanitises the user segment, and enforces the length cap before
//! handing back an [`Fingerprint`] that knows how to [`Fingerprint::encode`]
//! itself.

use crate::identity::sanitize_username;
use rand::RngCore;

/// Literal, case-sensitive prefix. No substitute characters (zero-width
/// joiners, soft hyphens, alternate casing) are ever accepted on parse.
pub const SENTINEL_PREFIX: &str = "sentinel";

/// Marker segment recorded when access was not mediated by an approval or
/// break-glass record.
pub const DIRECT_MARKER: &str = "direct";

/// Maximum encoded length (spec.md §3).
pub const MAX_ENCODED_LEN: usize = 64;

/// A parsed/constructed fingerprint. `marker` is `""` only for the legacy
/// three-segment form, which is always read back with
/// [`Fingerprint::is_direct`] `== true` (it predates the approval/break-glass
/// distinction and is treated as `direct`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    user: String,
    marker: String,
    request_id: String,
    legacy: bool,
}

impl Fingerprint {
    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// `true` for the legacy three-segment form, or for a four-segment
    /// form whose marker is the literal `direct`.
    pub fn is_direct(&self) -> bool {
        self.legacy || self.marker == DIRECT_MARKER
    }

    /// The approval/break-glass id this session was mediated by, or `None`
    /// for direct/legacy access.
    pub fn marker(&self) -> Option<&str> {
        if self.is_direct() { None } else { Some(&self.marker) }
    }

    /// Serialise to the canonical colon-delimited wire form. Always emits
    /// the new four-segment form, even when parsed from the legacy one
    /// (spec.md §3: "writes only the new form").
    pub fn encode(&self) -> String {
        let marker = if self.legacy { DIRECT_MARKER } else { self.marker.as_str() };
        format!("{SENTINEL_PREFIX}:{}:{}:{}", self.user, marker, self.request_id)
    }

    /// Parse a fingerprint from its wire form. Accepts both the new
    /// four-segment form and the legacy three-segment form
    /// (`sentinel:<user>:<request-id>`), classifying the legacy form as
    /// direct. Rejects any case variant or non-ASCII look-alike of the
    /// `sentinel` prefix, and any empty user or request-id segment.
    pub fn parse(raw: &str) -> Option<Fingerprint> {
        if raw.len() > MAX_ENCODED_LEN {
            return None;
        }
        if !raw.is_ascii() {
            return None;
        }
        let parts: Vec<&str> = raw.split(':').collect();
        let prefix = parts.first()?;
        if *prefix != SENTINEL_PREFIX {
            // Case-sensitive, no substitution: `Sentinel:`, `SENTINEL:`, or
            // any prefix differing in a single byte is rejected outright.
            return None;
        }
        match parts.len() {
            4 => {
                let user = parts[1];
                let marker = parts[2];
                let request_id = parts[3];
                if user.is_empty() || request_id.is_empty() {
                    return None;
                }
                Some(Fingerprint {
                    user: user.to_string(),
                    marker: marker.to_string(),
                    request_id: request_id.to_string(),
                    legacy: false,
                })
            }
            3 => {
                let user = parts[1];
                let request_id = parts[2];
                if user.is_empty() || request_id.is_empty() {
                    return None;
                }
                Some(Fingerprint {
                    user: user.to_string(),
                    marker: String::new(),
                    request_id: request_id.to_string(),
                    legacy: true,
                })
            }
            _ => None,
        }
    }

    /// `true` if `raw` begins with the exact `sentinel:` prefix (used by
    /// the audit verifier to classify non-sentinel-format events without
    /// fully parsing them).
    pub fn looks_like_sentinel(raw: &str) -> bool {
        raw.starts_with(&format!("{SENTINEL_PREFIX}:"))
    }
}

/// Builder that validates and assembles a [`Fingerprint`]. This is the only
/// supported construction path for new (non-parsed) fingerprints.
pub struct FingerprintBuilder {
    user: String,
    marker: String,
}

impl FingerprintBuilder {
    /// Start building for a given (already-canonical) user. The user is
    /// re-sanitised defensively so a caller cannot smuggle a colon into the
    /// token by passing an unsanitised value.
    pub fn new(user: &str) -> Self {
        Self {
            user: sanitize_username(user),
            marker: DIRECT_MARKER.to_string(),
        }
    }

    /// Mark this fingerprint as mediated by the given approval or
    /// break-glass id (an 8-hex-char approval id, or a break-glass event
    /// id).
    pub fn marker(mut self, marker: &str) -> Self {
        self.marker = marker.to_string();
        self
    }

    /// Finish the build, generating a fresh cryptographically random
    /// request-id of at least 32 bits of entropy (spec.md §3 collision
    /// bound) and enforcing the 64-character total-length cap.
    pub fn build(self) -> Option<Fingerprint> {
        let request_id = random_hex_request_id();
        let fp = Fingerprint {
            user: self.user,
            marker: self.marker,
            request_id,
            legacy: false,
        };
        if fp.encode().len() > MAX_ENCODED_LEN {
            return None;
        }
        Some(fp)
    }
}

/// 64 bits of randomness hex-encoded (16 hex chars), comfortably above the
/// 32-bit/8-char floor spec.md §3 requires.
fn random_hex_request_id() -> String {
    let mut buf = [0u8; 8];
    rand::rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_then_parse_round_trips() {
        let fp = FingerprintBuilder::new("alice").marker("a1b2c3d4").build().unwrap();
        let encoded = fp.encode();
        let parsed = Fingerprint::parse(&encoded).unwrap();
        assert_eq!(parsed.user(), "alice");
        assert_eq!(parsed.marker(), Some("a1b2c3d4"));
        assert_eq!(parsed.request_id(), fp.request_id());
        assert!(encoded.len() <= MAX_ENCODED_LEN);
    }

    #[test]
    fn direct_marker_round_trips() {
        let fp = FingerprintBuilder::new("bob").build().unwrap();
        assert!(fp.is_direct());
        let parsed = Fingerprint::parse(&fp.encode()).unwrap();
        assert!(parsed.is_direct());
        assert_eq!(parsed.marker(), None);
    }

    #[test]
    fn legacy_three_segment_form_parses_as_direct() {
        let parsed = Fingerprint::parse("sentinel:alice:deadbeef").unwrap();
        assert!(parsed.is_direct());
        assert_eq!(parsed.marker(), None);
        assert_eq!(parsed.user(), "alice");
        assert_eq!(parsed.request_id(), "deadbeef");
        // writing it back always uses the new four-segment form.
        assert_eq!(parsed.encode(), "sentinel:alice:direct:deadbeef");
    }

    #[test]
    fn case_variants_of_prefix_are_rejected() {
        assert!(Fingerprint::parse("Sentinel:alice:direct:deadbeef").is_none());
        assert!(Fingerprint::parse("SENTINEL:alice:direct:deadbeef").is_none());
        assert!(Fingerprint::parse("sentinel\u{200d}:alice:direct:deadbeef").is_none());
        assert!(Fingerprint::parse("sentinel\u{ad}:alice:direct:deadbeef").is_none());
    }

    #[test]
    fn empty_user_or_request_id_is_rejected() {
        assert!(Fingerprint::parse("sentinel::direct:deadbeef").is_none());
        assert!(Fingerprint::parse("sentinel:alice:direct:").is_none());
        assert!(Fingerprint::parse("sentinel::deadbeef").is_none());
        assert!(Fingerprint::parse("sentinel:alice:").is_none());
    }

    #[test]
    fn other_format_is_not_sentinel() {
        assert!(!Fingerprint::looks_like_sentinel("other:format:xyz"));
        assert!(Fingerprint::parse("other:format:xyz").is_none());
    }

    #[test]
    fn oversized_fingerprint_is_rejected_on_parse() {
        let huge = format!("sentinel:{}:direct:deadbeef", "a".repeat(100));
        assert!(Fingerprint::parse(&huge).is_none());
    }

    #[test]
    fn builder_never_exceeds_length_cap() {
        // A very long username is sanitised but can still blow the budget;
        // the builder must refuse rather than silently truncate.
        let long_user = "a".repeat(80);
        let built = FingerprintBuilder::new(&long_user).build();
        assert!(built.is_none());
    }
}
