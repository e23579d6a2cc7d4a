//! Remote (serverless, multi-tenant) server mode (spec.md §4.8): the cloud
//! provider's own request signature authenticates the caller; no bespoke
//! token. Adds the sliding-window rate limiter, which local mode has no
//! need for (a single trusted process talking to itself).

use super::handlers::AuthenticatedCaller;
use super::ratelimit::RateLimiter;
use super::AppState;
use crate::cloud::IdentityProvider;
use crate::identity::Identity;
use crate::policy::model::Mode;
use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::Response;
use std::sync::Arc;

/// Header carrying the cloud provider's identity assertion, already
/// signature-verified by the gateway in front of this process (spec.md
/// §4.8 "Deployed behind a gateway that validates the signature").
const IDENTITY_HEADER: &str = "x-sentinel-identity-assertion";

#[derive(Clone)]
struct RemoteAuthState {
    identity_provider: Arc<dyn IdentityProvider>,
    limiter: Arc<RateLimiter>,
}

async fn cloud_sig_auth(
    State(auth): State<RemoteAuthState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let raw_assertion = match req.headers().get(IDENTITY_HEADER).and_then(|v| v.to_str().ok()) {
        Some(v) => v.to_string(),
        None => {
            return Response::builder()
                .status(StatusCode::UNAUTHORIZED)
                .body(Body::from("missing identity assertion"))
                .expect("building 401 response");
        }
    };

    let assertion = match auth.identity_provider.verify(&raw_assertion).await {
        Ok(a) => a,
        Err(_) => {
            return Response::builder()
                .status(StatusCode::UNAUTHORIZED)
                .body(Body::from("invalid identity assertion"))
                .expect("building 401 response");
        }
    };

    if !auth.limiter.check(&assertion.arn) {
        return Response::builder()
            .status(StatusCode::TOO_MANY_REQUESTS)
            .body(Body::from("rate limited"))
            .expect("building 429 response");
    }

    let identity = match Identity::from_assertion(assertion) {
        Ok(i) => i,
        Err(_) => {
            return Response::builder()
                .status(StatusCode::UNAUTHORIZED)
                .body(Body::from("unrecognised identity"))
                .expect("building 401 response");
        }
    };

    req.extensions_mut().insert(AuthenticatedCaller {
        identity,
        mode: Mode::RemoteServer,
    });
    next.run(req).await
}

pub fn router(
    state: AppState,
    identity_provider: Arc<dyn IdentityProvider>,
    rate_limit_per_minute: u32,
) -> axum::Router {
    let auth_state = RemoteAuthState {
        identity_provider,
        limiter: Arc::new(RateLimiter::new(rate_limit_per_minute)),
    };
    super::build_router(state).layer(middleware::from_fn_with_state(auth_state, cloud_sig_auth))
}
