//! Revoking a session must be consulted on the next vend for the same
//! (user, profile): the caller observes `SessionRevoked`, not a freshly
//! minted credential.

use sentinel_broker::approval::ApprovalStore;
use sentinel_broker::breakglass::BreakglassStore;
use sentinel_broker::cloud::{FakeRoleAssumer, FileConfigStore};
use sentinel_broker::db::Database;
use sentinel_broker::decisionlog::DecisionLog;
use sentinel_broker::device::NoDeviceSignal;
use sentinel_broker::errors::BrokerError;
use sentinel_broker::identity::{CallerAssertion, Identity};
use sentinel_broker::policy::model::Mode;
use sentinel_broker::policy::PolicyLoader;
use sentinel_broker::registry::SessionRegistry;
use sentinel_broker::vending::{VendRequest, Vendor};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const POLICY: &str = r#"
rules:
  - effect: allow
    users: [alice]
    profiles: [prod]
max_server_duration: 1h
"#;

fn identity(user: &str) -> Identity {
    Identity::from_assertion(CallerAssertion {
        account_id: "111111111111".to_string(),
        arn: format!("arn:aws:iam::111111111111:user/{user}"),
        is_root: false,
    })
    .unwrap()
}

fn setup() -> (TempDir, Vendor) {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("policy.yaml"), POLICY).unwrap();
    let db = Database::open(dir.path().join("broker.db")).unwrap();

    let vendor = Vendor {
        policy_loader: Arc::new(PolicyLoader::new(Arc::new(FileConfigStore::new()))),
        approvals: ApprovalStore::new(db.clone()),
        breakglass: BreakglassStore::new(db.clone()),
        registry: SessionRegistry::new(db),
        role_assumer: Arc::new(FakeRoleAssumer),
        device_signal: Arc::new(NoDeviceSignal),
        decision_log: Arc::new(DecisionLog::new(dir.path().join("decisions.jsonl"))),
        server_instance_id: Some("test-instance".to_string()),
    };
    (dir, vendor)
}

fn vend_request(dir: &TempDir, user: &str) -> VendRequest {
    VendRequest {
        identity: identity(user),
        profile: "prod".to_string(),
        mode: Mode::Cli,
        device_id: None,
        policy_path: dir.path().join("policy.yaml").to_string_lossy().into_owned(),
        role_arn: "arn:aws:iam::111111111111:role/ProdRole".to_string(),
        request_ttl: Duration::from_secs(3600),
    }
}

#[tokio::test]
async fn revoking_a_session_denies_the_next_poll() {
    let (dir, vendor) = setup();

    let outcome = vendor.vend(vend_request(&dir, "alice")).await.unwrap();
    let session_id = outcome.session.session_id.clone();

    vendor.registry.revoke(&session_id).await.unwrap();

    let revoked = vendor.registry.get(&session_id).await.unwrap().unwrap();
    assert_eq!(revoked.status, sentinel_broker::registry::SessionStatus::Revoked);

    let result = vendor.vend(vend_request(&dir, "alice")).await;
    assert_eq!(result.unwrap_err(), BrokerError::SessionRevoked);
}
