//! Sentinel broker CLI entry point.
//!
//! This binary is a thin shell over `sentinel_broker`: it parses arguments,
//! loads the bootstrap configuration, wires the concrete adapters, and
//! dispatches to the library's vending/approval/break-glass/audit
//! operations. It carries no policy logic of its own.
//!
//! # Exit codes (spec.md §6.3)
//! `0` success, `1` policy deny, `2` configuration error, `3` infrastructure
//! error, `4` usage error, `5` compliance gap (audit).

use clap::{Parser, Subcommand};
use sentinel_broker::approval::ApprovalStore;
use sentinel_broker::audit::AuditVerifier;
use sentinel_broker::breakglass::{BreakglassStore, ReasonCode};
use sentinel_broker::cloud::{FakeRoleAssumer, FileConfigStore, StaticIdentityProvider};
use sentinel_broker::config::BrokerConfig;
use sentinel_broker::db::Database;
use sentinel_broker::decisionlog::DecisionLog;
use sentinel_broker::device::NoDeviceSignal;
use sentinel_broker::errors::BrokerError;
use sentinel_broker::identity::{CallerAssertion, Identity};
use sentinel_broker::policy::model::Mode;
use sentinel_broker::policy::PolicyLoader;
use sentinel_broker::registry::SessionRegistry;
use sentinel_broker::vending::{VendRequest, Vendor};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "sentinel", version, about = "Policy-gated credential broker", long_about = None)]
struct Args {
    /// Bootstrap config file path (overrides default path and SENTINEL_CONFIG_PATH).
    #[arg(long = "config-file", value_name = "FILE", env = "SENTINEL_CONFIG_PATH")]
    config_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the full vending pipeline once and print the resulting credentials.
    Vend {
        #[arg(long)]
        profile: String,
        #[arg(long)]
        device_id: Option<String>,
    },
    /// Start the credential server.
    Serve {
        #[arg(long, value_enum, default_value = "local")]
        topology: ServeTopology,
    },
    /// Approve a pending approval request.
    Approve {
        request_id: String,
        #[arg(long)]
        approver: String,
    },
    /// Deny a pending approval request.
    Deny {
        request_id: String,
        #[arg(long)]
        approver: String,
    },
    /// Revoke an active session so a subsequent poll or vend is denied.
    Revoke { session_id: String },
    #[command(subcommand)]
    Breakglass(BreakglassCommand),
    /// Reconcile the cloud audit log against the session registry.
    AuditVerify {
        /// Lookback window, e.g. `24h`.
        #[arg(long, default_value = "24h")]
        window: String,
    },
    /// Run advisory checks over the authorization policy document.
    Lint,
}

#[derive(Subcommand, Debug)]
enum BreakglassCommand {
    Invoke {
        #[arg(long)]
        profile: String,
        #[arg(long)]
        reason: String,
        #[arg(long)]
        justification: String,
    },
    Close {
        event_id: String,
        #[arg(long)]
        closer: String,
        #[arg(long)]
        note: String,
    },
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ServeTopology {
    Local,
    Remote,
}

/// Caller identity for a CLI-mode invocation. A real deployment derives
/// this from the cloud SDK's own `GetCallerIdentity` equivalent (spec.md
/// §6.1); that call is out of scope here (§1 Non-goals: "not an identity
/// provider"), so the CLI falls back to these two environment variables.
fn cli_identity() -> anyhow::Result<Identity> {
    let arn = std::env::var("SENTINEL_CALLER_ARN")
        .map_err(|_| anyhow::anyhow!("SENTINEL_CALLER_ARN must be set for CLI-mode invocations"))?;
    let account_id = std::env::var("SENTINEL_CALLER_ACCOUNT_ID").unwrap_or_else(|_| "000000000000".to_string());
    Identity::from_assertion(CallerAssertion { account_id, arn, is_root: false }).map_err(Into::into)
}

fn init_tracing() {
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).compact())
        .with(EnvFilter::new(env_filter))
        .init();
}

fn exit_with(code: i32) -> ! {
    std::process::exit(code);
}

#[tokio::main]
async fn main() {
    init_tracing();
    sentinel_broker::metrics::init();

    let args = Args::parse();
    let config = match BrokerConfig::load(args.config_file) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "failed to load configuration");
            exit_with(2);
        }
    };

    if let Err(e) = run(config, args.command).await {
        if let Some(broker_err) = e.downcast_ref::<BrokerError>() {
            tracing::error!(code = broker_err.code(), "{}", broker_err);
            exit_with(broker_err.exit_code());
        }
        tracing::error!(error = %e, "command failed");
        exit_with(3);
    }
}

async fn run(config: BrokerConfig, command: Command) -> anyhow::Result<()> {
    let db = Database::open(&config.db_path)?;
    let decision_log = Arc::new(DecisionLog::new(config.decision_log_path.clone()));

    match command {
        Command::Vend { profile, device_id } => {
            let identity = cli_identity()?;
            let role_arn = config
                .profile_roles
                .get(&profile)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("no role configured for profile {profile}"))?;

            let vendor = Vendor {
                policy_loader: Arc::new(PolicyLoader::new(Arc::new(FileConfigStore::new()))),
                approvals: ApprovalStore::new(db.clone()),
                breakglass: BreakglassStore::new(db.clone()),
                registry: SessionRegistry::new(db),
                role_assumer: Arc::new(FakeRoleAssumer),
                device_signal: Arc::new(NoDeviceSignal),
                decision_log,
                server_instance_id: None,
            };

            let outcome = vendor
                .vend(VendRequest {
                    identity,
                    profile,
                    mode: Mode::Cli,
                    device_id,
                    policy_path: config.policy_path.clone(),
                    role_arn,
                    request_ttl: config.approval_request_ttl,
                })
                .await?;

            println!("{}", serde_json::to_string_pretty(&outcome.credentials)?);
            Ok(())
        }

        Command::Serve { topology } => {
            let vendor = Arc::new(Vendor {
                policy_loader: Arc::new(PolicyLoader::new(Arc::new(FileConfigStore::new()))),
                approvals: ApprovalStore::new(db.clone()),
                breakglass: BreakglassStore::new(db.clone()),
                registry: SessionRegistry::new(db),
                role_assumer: Arc::new(FakeRoleAssumer),
                device_signal: Arc::new(NoDeviceSignal),
                decision_log,
                server_instance_id: Some(sentinel_broker::server::new_server_instance_id()),
            });
            let state = sentinel_broker::server::AppState {
                vendor,
                config: Arc::new(config.clone()),
            };

            match topology {
                ServeTopology::Local => {
                    let identity = cli_identity()?;
                    let (addr, token, handle) = sentinel_broker::server::local::serve(state, identity).await?;
                    tracing::info!(%addr, "local credential server listening");
                    tracing::info!("bearer token (configure the SDK credential-process with this): {token}");
                    handle.await?;
                }
                ServeTopology::Remote => {
                    let bind_address = config
                        .remote_server
                        .bind_address
                        .clone()
                        .ok_or_else(|| anyhow::anyhow!("remote_server.bind_address is not configured"))?;
                    let identity_provider: Arc<dyn sentinel_broker::cloud::IdentityProvider> =
                        Arc::new(StaticIdentityProvider::new());
                    let router = sentinel_broker::server::remote::router(
                        state,
                        identity_provider,
                        config.remote_server.rate_limit_per_minute,
                    );
                    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
                    tracing::info!(%bind_address, "remote credential server listening");
                    axum::serve(listener, router).await?;
                }
            }
            Ok(())
        }

        Command::Approve { request_id, approver } => {
            let store = ApprovalStore::new(db);
            let ok = store.approve(&request_id, &approver, chrono::Utc::now()).await?;
            if !ok {
                return Err(BrokerError::SessionNotFound.into());
            }
            println!("approved {request_id}");
            Ok(())
        }

        Command::Deny { request_id, approver } => {
            let store = ApprovalStore::new(db);
            let ok = store.deny(&request_id, &approver).await?;
            if !ok {
                return Err(BrokerError::SessionNotFound.into());
            }
            println!("denied {request_id}");
            Ok(())
        }

        Command::Revoke { session_id } => {
            let registry = SessionRegistry::new(db);
            let existing = registry.get(&session_id).await?;
            if existing.is_none() {
                return Err(BrokerError::SessionNotFound.into());
            }
            registry.revoke(&session_id).await?;
            println!("revoked {session_id}");
            Ok(())
        }

        Command::Breakglass(sub) => run_breakglass(db, config, sub).await,

        Command::AuditVerify { window } => {
            let policy_loader = PolicyLoader::new(Arc::new(FileConfigStore::new()));
            let (policy, _version) = policy_loader.load(&config.policy_path).await?;
            let window = sentinel_broker::policy::model::parse_duration(&window)
                .map_err(|e| anyhow::anyhow!("invalid --window: {e}"))?;

            let end = chrono::Utc::now();
            let start = end - chrono::Duration::from_std(window).unwrap_or_default();
            let registry = SessionRegistry::new(db);
            let verifier = AuditVerifier::new(registry);

            // This repository does not implement the cloud audit-log wire
            // protocol (§1 Non-goals); a real deployment plugs in its own
            // `AuditLogQuery` over the cloud's actual audit API here.
            let query = sentinel_broker::cloud::InMemoryAuditLog::empty();
            let report = verifier.reconcile(&query, &policy, start, end).await?;

            println!("{}", serde_json::to_string_pretty(&report)?);
            if report.has_compliance_gap() {
                exit_with(5);
            }
            Ok(())
        }

        Command::Lint => {
            let policy_loader = PolicyLoader::new(Arc::new(FileConfigStore::new()));
            let (policy, _version) = policy_loader.load(&config.policy_path).await?;
            let findings = sentinel_broker::policy::lint(&policy);
            println!("{}", serde_json::to_string_pretty(&findings)?);
            if !findings.is_empty() {
                exit_with(1);
            }
            Ok(())
        }
    }
}

async fn run_breakglass(db: Database, config: BrokerConfig, sub: BreakglassCommand) -> anyhow::Result<()> {
    let policy_loader = PolicyLoader::new(Arc::new(FileConfigStore::new()));
    let (policy, _version) = policy_loader.load(&config.policy_path).await?;
    let store = BreakglassStore::new(db);

    match sub {
        BreakglassCommand::Invoke { profile, reason, justification } => {
            let identity = cli_identity()?;
            let reason = ReasonCode::parse(&reason).ok_or_else(|| anyhow::anyhow!("unknown reason code {reason}"))?;
            let result = store
                .invoke(&policy, &identity.canonical_username, &profile, reason, &justification, chrono::Utc::now())
                .await?;
            match result {
                Ok(record) => {
                    println!("{}", serde_json::to_string_pretty(&record)?);
                    Ok(())
                }
                Err(denial) => Err(anyhow::anyhow!("break-glass invocation rejected: {denial:?}")),
            }
        }
        BreakglassCommand::Close { event_id, closer, note } => {
            let ok = store.close(&event_id, &closer, &note, chrono::Utc::now()).await?;
            if !ok {
                return Err(BrokerError::SessionNotFound.into());
            }
            println!("closed {event_id}");
            Ok(())
        }
    }
}
