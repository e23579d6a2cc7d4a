//! Local loopback server mode (spec.md §4.8): single process, ephemeral
//! loopback port, bearer token generated at startup and compared in
//! constant time.

use super::handlers::AuthenticatedCaller;
use super::AppState;
use crate::identity::Identity;
use crate::policy::model::Mode;
use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::Response;
use rand::RngCore;
use std::net::SocketAddr;
use std::sync::Arc;

/// 256 bits of randomness, hex-encoded, generated once at process startup
/// (spec.md §5 "process start-time constants").
pub fn generate_bearer_token() -> String {
    let mut buf = [0u8; 32];
    rand::rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

/// Constant-time equality, so a timing side-channel can't leak the token
/// byte-by-byte (spec.md §4.8 "Timing-safe comparison...is required").
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[derive(Clone)]
struct LocalAuthState {
    token: Arc<String>,
    identity: Arc<Identity>,
}

async fn bearer_auth(
    State(auth): State<LocalAuthState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let presented = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    let authorized = match presented {
        Some(p) => constant_time_eq(p.as_bytes(), auth.token.as_bytes()),
        None => false,
    };

    if !authorized {
        return Response::builder()
            .status(StatusCode::UNAUTHORIZED)
            .body(Body::from("unauthorized"))
            .expect("building 401 response");
    }

    req.extensions_mut().insert(AuthenticatedCaller {
        identity: (*auth.identity).clone(),
        mode: Mode::Server,
    });
    next.run(req).await
}

/// Build the loopback router and return it bound to an ephemeral port, plus
/// the bearer token the caller's environment must be configured with.
pub async fn serve(
    state: AppState,
    identity: Identity,
) -> anyhow::Result<(SocketAddr, String, tokio::task::JoinHandle<()>)> {
    let token = generate_bearer_token();
    let auth_state = LocalAuthState {
        token: Arc::new(token.clone()),
        identity: Arc::new(identity),
    };

    let router = super::build_router(state).layer(middleware::from_fn_with_state(auth_state, bearer_auth));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "local credential server exited");
        }
    });

    Ok((addr, token, handle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_time_eq_matches_equal_slices() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"ab"));
    }

    #[test]
    fn bearer_token_is_64_hex_chars() {
        let token = generate_bearer_token();
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
