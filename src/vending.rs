//! Credential vending orchestrator (spec.md §4.7): the single entry point
//! that ties identity extraction, policy evaluation, approval/break-glass
//! lookup, role assumption, and session registration into one operation.

use crate::approval::{ApprovalState, ApprovalStore};
use crate::breakglass::{BreakglassState, BreakglassStore};
use crate::cloud::RoleAssumer;
use crate::decisionlog::{DecisionLog, DecisionLogExtras};
use crate::device::DevicePostureProvider;
use crate::errors::BrokerError;
use crate::fingerprint::FingerprintBuilder;
use crate::identity::Identity;
use crate::policy::model::{Decision, Effect, Mode, Policy, Request};
use crate::registry::{SessionRecord, SessionRegistry, SessionStatus};
use chrono::Utc;
use rand::RngCore;
use std::sync::Arc;
use std::time::Duration;

/// Everything the orchestrator needs beyond the per-call request. One
/// instance is built at process startup and shared across requests; it
/// owns no mutable request-scoped state (spec.md §5 "no shared mutable
/// global state other than the policy cache").
pub struct Vendor {
    pub policy_loader: Arc<crate::policy::PolicyLoader>,
    pub approvals: ApprovalStore,
    pub breakglass: BreakglassStore,
    pub registry: SessionRegistry,
    pub role_assumer: Arc<dyn RoleAssumer>,
    pub device_signal: Arc<dyn DevicePostureProvider>,
    pub decision_log: Arc<DecisionLog>,
    pub server_instance_id: Option<String>,
}

/// Per-call parameters a caller (CLI, local server, remote server) supplies.
pub struct VendRequest {
    pub identity: Identity,
    pub profile: String,
    pub mode: Mode,
    pub device_id: Option<String>,
    pub policy_path: String,
    pub role_arn: String,
    pub request_ttl: Duration,
}

pub struct VendOutcome {
    pub credentials: crate::cloud::TemporaryCredentials,
    pub session: SessionRecord,
}

impl Vendor {
    /// Run the full vending pipeline (spec.md §4.7 pseudocode). Any step up
    /// to and including the revocation-equivalent check failing or timing
    /// out produces a deny-equivalent `Err`; only post-issuance bookkeeping
    /// (the decision log append) is best-effort and never retracts an
    /// already-minted credential.
    pub async fn vend(&self, req: VendRequest) -> Result<VendOutcome, BrokerError> {
        let started = std::time::Instant::now();
        let now = Utc::now();

        let (policy, _version) = self
            .policy_loader
            .load(&req.policy_path)
            .await
            .map_err(|_| BrokerError::PolicyDeny)?;

        let device_posture = match &req.device_id {
            Some(device_id) => self.device_signal.probe(device_id).await.unwrap_or(None),
            None => None,
        };

        let eval_request = Request {
            user: req.identity.canonical_username.clone(),
            profile: req.profile.clone(),
            time: now,
            mode: req.mode,
            device_posture,
        };
        let prior = self
            .registry
            .find_latest_by_user_and_profile(&req.identity.canonical_username, &req.profile)
            .await
            .map_err(|_| BrokerError::Infra)?;
        if let Some(prior) = &prior {
            if prior.status == SessionStatus::Revoked {
                return Err(BrokerError::SessionRevoked);
            }
        }

        let decision = crate::policy::evaluate(&policy, eval_request);
        self.log_decision(&decision, DecisionLogExtras::default()).await;
        crate::metrics::record_vend_decision(
            &req.profile,
            decision.effect.as_str(),
            started.elapsed().as_secs_f64() * 1000.0,
        );

        let (marker, duration_cap) = match decision.effect {
            Effect::Deny => return Err(BrokerError::PolicyDeny),
            Effect::RequireApproval => {
                let approved = self
                    .approvals
                    .find_approved_request(&req.identity.canonical_username, &req.profile, now)
                    .await
                    .map_err(|_| BrokerError::Infra)?;
                match approved {
                    Some(a) => {
                        let cap = policy.max_server_duration.min(a.max_session_duration);
                        (Some(a.request_id), cap)
                    }
                    None => {
                        let created = self
                            .approvals
                            .create(
                                &policy,
                                &req.identity.canonical_username,
                                &req.profile,
                                "vending pipeline auto-created request",
                                now,
                                req.request_ttl,
                            )
                            .await
                            .map_err(|_| BrokerError::Infra)?;
                        if created.state == ApprovalState::Approved {
                            let cap = policy.max_server_duration.min(created.max_session_duration);
                            (Some(created.request_id), cap)
                        } else {
                            return Err(BrokerError::RequireApproval { request_id: created.request_id });
                        }
                    }
                }
            }
            Effect::RequireBreakglass => {
                let active = self
                    .breakglass
                    .find_active_by_invoker_and_profile(&req.identity.canonical_username, &req.profile)
                    .await
                    .map_err(|_| BrokerError::Infra)?;
                match active {
                    Some(bg) if bg.state == BreakglassState::Active => {
                        let cap = crate::breakglass::cap_duration(policy.max_server_duration, &policy, &bg, now);
                        (Some(bg.event_id), cap)
                    }
                    _ => return Err(BrokerError::RequireBreakglass),
                }
            }
            Effect::RequireServer | Effect::RequireServerSession => {
                if !req.mode.is_server_mode() {
                    return Err(BrokerError::PolicyDeny);
                }
                (None, policy.max_server_duration)
            }
            Effect::Allow => (None, policy.max_server_duration),
        };

        let mut builder = FingerprintBuilder::new(&req.identity.canonical_username);
        if let Some(marker) = &marker {
            builder = builder.marker(marker);
        }
        let fingerprint = builder.build().ok_or(BrokerError::Infra)?;
        let source_identity = fingerprint.encode();

        let session_name = format!("sentinel-{}", fingerprint.request_id());
        let credentials = self
            .role_assumer
            .assume_role(&req.role_arn, duration_cap, &source_identity, &session_name)
            .await
            .map_err(|_| BrokerError::Infra)?;

        let session_id = new_session_id();
        let session = SessionRecord {
            session_id: session_id.clone(),
            source_identity_fingerprint: source_identity,
            user: req.identity.canonical_username.clone(),
            profile: req.profile.clone(),
            mode: req.mode,
            device_id: req.device_id.clone(),
            status: SessionStatus::Active,
            created_at: now,
            last_access_at: now,
            expires_at: credentials.expiration,
            request_count: 0,
            server_instance_id: self.server_instance_id.clone(),
        };

        self.registry
            .create(session.clone())
            .await
            .map_err(|_| BrokerError::Infra)?;

        self.log_decision(
            &decision,
            DecisionLogExtras {
                fingerprint: Some(session.source_identity_fingerprint.clone()),
                request_id: Some(fingerprint.request_id().to_string()),
                session_id: Some(session_id),
            },
        )
        .await;

        Ok(VendOutcome { credentials, session })
    }

    async fn log_decision(&self, decision: &Decision, extras: DecisionLogExtras) {
        if let Err(e) = self.decision_log.append(decision, &extras).await {
            tracing::warn!(error = %e, "failed to append decision log entry");
        }
    }
}

fn new_session_id() -> String {
    let mut buf = [0u8; 8];
    rand::rng().fill_bytes(&mut buf);
    hex::encode(buf)
}
