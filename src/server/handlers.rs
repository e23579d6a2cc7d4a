//! Route handlers shared by both server-mode topologies (spec.md §4.8).
//!
//! Caching is forbidden here: every poll re-runs the full vending pipeline
//! so a revoked session stops being renewed on the very next poll.

use super::AppState;
use crate::errors::BrokerError;
use crate::identity::Identity;
use crate::policy::model::Mode;
use crate::vending::VendRequest;
use axum::extract::{Extension, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Credential JSON, bit-exact with the cloud SDK's container-credential
/// convention (spec.md §4.8).
#[derive(Debug, Serialize)]
struct CredentialResponse {
    #[serde(rename = "AccessKeyId")]
    access_key_id: String,
    #[serde(rename = "SecretAccessKey")]
    secret_access_key: String,
    #[serde(rename = "Token")]
    token: String,
    #[serde(rename = "Expiration")]
    expiration: String,
}

#[derive(Debug, Deserialize)]
pub struct ProfileQuery {
    profile: Option<String>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: &'static str,
}

/// Identity extracted by whichever auth layer (local bearer or remote
/// cloud-signature) ran before this handler. Mode records which topology
/// authenticated the caller, since it feeds directly into policy
/// evaluation (`require_server` vs `require_server_session`).
#[derive(Clone)]
pub struct AuthenticatedCaller {
    pub identity: Identity,
    pub mode: Mode,
}

pub async fn credentials(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthenticatedCaller>,
    Query(query): Query<ProfileQuery>,
) -> Response {
    let started = Instant::now();
    let profile = match query.profile.or_else(|| state.config.default_profile.clone()) {
        Some(p) => p,
        None => return error_response(&BrokerError::Config("no profile specified".to_string())),
    };
    let role_arn = state
        .config
        .profile_roles
        .get(&profile)
        .cloned()
        .unwrap_or_default();

    let result = state
        .vendor
        .vend(VendRequest {
            identity: caller.identity,
            profile: profile.clone(),
            mode: caller.mode,
            device_id: None,
            policy_path: state.config.policy_path.clone(),
            role_arn,
            request_ttl: state.config.approval_request_ttl,
        })
        .await;

    let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
    let status = match &result {
        Ok(_) => StatusCode::OK,
        Err(e) => status_for_error(e),
    };
    crate::metrics::record_http_request("/", "GET", status.as_u16(), latency_ms);

    match result {
        Ok(outcome) => {
            let body = CredentialResponse {
                access_key_id: outcome.credentials.access_key_id,
                secret_access_key: outcome.credentials.secret_access_key,
                token: outcome.credentials.session_token,
                expiration: outcome.credentials.expiration.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            };
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(e) => error_response(&e),
    }
}

pub async fn profiles(State(state): State<AppState>) -> Response {
    let policy = state.vendor.policy_loader.load(&state.config.policy_path).await;
    match policy {
        Ok((policy, _)) => (StatusCode::OK, Json(policy.profiles())).into_response(),
        Err(_) => error_response(&BrokerError::Config("policy unavailable".to_string())),
    }
}

pub async fn metrics() -> Response {
    let (status, body) = crate::metrics::handler::render();
    let code = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (code, body).into_response()
}

pub async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "not found").into_response()
}

fn status_for_error(err: &BrokerError) -> StatusCode {
    match err {
        BrokerError::PolicyDeny | BrokerError::RequireApproval { .. } | BrokerError::RequireBreakglass => {
            StatusCode::FORBIDDEN
        }
        BrokerError::Auth => StatusCode::UNAUTHORIZED,
        BrokerError::SessionRevoked => StatusCode::FORBIDDEN,
        BrokerError::SessionNotFound => StatusCode::NOT_FOUND,
        BrokerError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        BrokerError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        BrokerError::Infra => StatusCode::INTERNAL_SERVER_ERROR,
        BrokerError::Cancelled => StatusCode::BAD_REQUEST,
    }
}

fn error_response(err: &BrokerError) -> Response {
    let status = status_for_error(err);
    let body = ErrorBody {
        code: err.code(),
        message: err.external_message(),
    };
    (status, Json(body)).into_response()
}
