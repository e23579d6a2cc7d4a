//! Audit reconciliation against a policy document loaded from disk via
//! `FileConfigStore`, exercising the same path the CLI's `audit-verify`
//! command takes.

use chrono::Utc;
use sentinel_broker::audit::AuditVerifier;
use sentinel_broker::cloud::{AuditEvent, InMemoryAuditLog};
use sentinel_broker::db::Database;
use sentinel_broker::policy::model::Mode;
use sentinel_broker::policy::PolicyLoader;
use sentinel_broker::registry::{SessionRecord, SessionRegistry, SessionStatus};
use tempfile::TempDir;

const POLICY: &str = r#"
rules:
  - effect: require_server_session
    profiles: [prod]
max_server_duration: 1h
"#;

fn event(source_identity: &str, profile: &str) -> AuditEvent {
    AuditEvent {
        event_time: Utc::now(),
        event_name: "AssumeRole".to_string(),
        source_identity: source_identity.to_string(),
        profile: profile.to_string(),
        username: "alice".to_string(),
    }
}

#[tokio::test]
async fn tracked_session_reconciles_clean_and_untracked_one_flags_the_profile() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("policy.yaml"), POLICY).unwrap();

    let db = Database::open(dir.path().join("broker.db")).unwrap();
    let registry = SessionRegistry::new(db);
    let now = Utc::now();
    registry
        .create(SessionRecord {
            session_id: "s1".to_string(),
            source_identity_fingerprint: "sentinel:alice:direct:abc12345".to_string(),
            user: "alice".to_string(),
            profile: "prod".to_string(),
            mode: Mode::Server,
            device_id: None,
            status: SessionStatus::Active,
            created_at: now,
            last_access_at: now,
            expires_at: now + chrono::Duration::hours(1),
            request_count: 0,
            server_instance_id: Some("inst-1".to_string()),
        })
        .await
        .unwrap();

    let policy_loader = PolicyLoader::new(std::sync::Arc::new(sentinel_broker::cloud::FileConfigStore::new()));
    let (policy, _version) = policy_loader
        .load(&dir.path().join("policy.yaml").to_string_lossy())
        .await
        .unwrap();

    let verifier = AuditVerifier::new(registry);
    let log = InMemoryAuditLog::new(vec![
        event("sentinel:alice:direct:abc12345", "prod"),
        event("not-a-sentinel-fingerprint", "prod"),
    ]);

    let report = verifier
        .reconcile(&log, &policy, now - chrono::Duration::hours(1), now + chrono::Duration::hours(1))
        .await
        .unwrap();

    assert_eq!(report.total, 2);
    assert_eq!(report.tracked, 1);
    assert!(report.has_compliance_gap());
    assert_eq!(report.non_compliant_profiles, vec!["prod".to_string()]);
}
