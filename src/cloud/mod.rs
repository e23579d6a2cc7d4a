//! Narrow capability boundaries toward the cloud provider (spec.md §6.1,
//! §9 "deep inheritance / polymorphism" — two-to-six operations each, no
//! class hierarchies).
//!
//! This repository implements neither the wire protocol nor the SigV4
//! signing the real cloud SDK performs (out of scope: "the cloud SDK
//! itself"); these traits are the seams a deployment plugs a concrete
//! client into, plus in-memory fakes this crate's own tests use.

use crate::identity::CallerAssertion;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

/// Equivalent of `GetCallerIdentity` (spec.md §6.1, §4.1).
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn verify(&self, raw_assertion: &str) -> anyhow::Result<CallerAssertion>;
}

/// Temporary credentials minted by the role-assumption endpoint.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TemporaryCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    pub expiration: DateTime<Utc>,
}

/// Role-assumption endpoint (spec.md §6.1).
#[async_trait]
pub trait RoleAssumer: Send + Sync {
    async fn assume_role(
        &self,
        role_arn: &str,
        duration: std::time::Duration,
        source_identity: &str,
        session_name: &str,
    ) -> anyhow::Result<TemporaryCredentials>;
}

/// One role-assumption event as reported by the cloud audit log.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AuditEvent {
    pub event_time: DateTime<Utc>,
    pub event_name: String,
    pub source_identity: String,
    pub profile: String,
    pub username: String,
}

/// A page of audit events plus an optional continuation token.
pub struct AuditEventPage {
    pub events: Vec<AuditEvent>,
    pub continuation_token: Option<String>,
}

/// Audit log query endpoint (spec.md §6.1, §4.9).
#[async_trait]
pub trait AuditLogQuery: Send + Sync {
    async fn query(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        continuation_token: Option<String>,
    ) -> anyhow::Result<AuditEventPage>;
}

/// Versioned configuration store backing the policy document (spec.md
/// §6.1, §4.2).
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Returns `(contents, version)`.
    async fn get(&self, path: &str) -> anyhow::Result<(String, String)>;
}

/// Secret store for the MDM API token and the local loopback bearer token
/// (spec.md §6.1). Bounded client-side caching (1h TTL) is the store's
/// responsibility, not this trait's.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get_secret(&self, name: &str) -> anyhow::Result<String>;
}

/// In-memory `ConfigStore` fake used by this crate's own tests.
#[derive(Debug, Default)]
pub struct InMemoryConfigStore {
    documents: Mutex<HashMap<String, (String, String)>>,
}

impl InMemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, path: &str, contents: &str, version: &str) {
        self.documents
            .lock()
            .expect("config store mutex poisoned")
            .insert(path.to_string(), (contents.to_string(), version.to_string()));
    }
}

#[async_trait]
impl ConfigStore for InMemoryConfigStore {
    async fn get(&self, path: &str) -> anyhow::Result<(String, String)> {
        self.documents
            .lock()
            .expect("config store mutex poisoned")
            .get(path)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no such config path: {path}"))
    }
}

/// A `ConfigStore` backed by the local filesystem. The default for a
/// single-node or local-server deployment; a production multi-node
/// deployment plugs in its own cloud-backed store instead (spec.md §6.1).
#[derive(Debug, Default)]
pub struct FileConfigStore;

impl FileConfigStore {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ConfigStore for FileConfigStore {
    /// `path` is read directly off disk; the file's content hash stands in
    /// for a version token since the local filesystem has no versioning of
    /// its own.
    async fn get(&self, path: &str) -> anyhow::Result<(String, String)> {
        let path = path.to_string();
        let contents = tokio::task::spawn_blocking(move || std::fs::read_to_string(&path)).await??;
        let version = format!("{:x}", simple_content_hash(&contents));
        Ok((contents, version))
    }
}

/// FNV-1a, enough to detect content changes for cache invalidation; not a
/// cryptographic digest.
fn simple_content_hash(contents: &str) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in contents.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// An `AuditLogQuery` fake returning a fixed, unpaginated event list. Real
/// deployments plug in a client against the cloud's actual audit API here
/// (spec.md §1 Non-goals: "does not implement the wire protocol... beyond
/// credential issuance").
#[derive(Debug, Default)]
pub struct InMemoryAuditLog {
    events: Vec<AuditEvent>,
}

impl InMemoryAuditLog {
    pub fn new(events: Vec<AuditEvent>) -> Self {
        Self { events }
    }

    pub fn empty() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuditLogQuery for InMemoryAuditLog {
    async fn query(
        &self,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
        _continuation_token: Option<String>,
    ) -> anyhow::Result<AuditEventPage> {
        Ok(AuditEventPage {
            events: self.events.clone(),
            continuation_token: None,
        })
    }
}

/// An `IdentityProvider` fake keyed by the raw assertion string.
#[derive(Debug, Default)]
pub struct StaticIdentityProvider {
    assertions: Mutex<HashMap<String, CallerAssertion>>,
}

impl StaticIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, token: &str, assertion: CallerAssertion) {
        self.assertions
            .lock()
            .expect("identity provider mutex poisoned")
            .insert(token.to_string(), assertion);
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    async fn verify(&self, raw_assertion: &str) -> anyhow::Result<CallerAssertion> {
        self.assertions
            .lock()
            .expect("identity provider mutex poisoned")
            .get(raw_assertion)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("unknown or invalid identity assertion"))
    }
}

/// A `RoleAssumer` fake that mints deterministic-looking credentials
/// without calling out anywhere.
#[derive(Debug, Default)]
pub struct FakeRoleAssumer;

#[async_trait]
impl RoleAssumer for FakeRoleAssumer {
    async fn assume_role(
        &self,
        role_arn: &str,
        duration: std::time::Duration,
        source_identity: &str,
        session_name: &str,
    ) -> anyhow::Result<TemporaryCredentials> {
        let expiration = Utc::now() + chrono::Duration::from_std(duration).unwrap_or_default();
        Ok(TemporaryCredentials {
            access_key_id: format!("ASIAFAKE{session_name}"),
            secret_access_key: format!("secret-for-{role_arn}-{source_identity}"),
            session_token: format!("token-{source_identity}"),
            expiration,
        })
    }
}
