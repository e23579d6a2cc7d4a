//! Server mode (spec.md §4.8): a lightweight HTTP surface implementing the
//! cloud-SDK container-credential poll convention. Two topologies share one
//! router shape (`/`, `/profiles`, `/metrics`, 404 elsewhere) but differ in
//! how they authenticate the caller — see [`local`] and [`remote`].

pub mod handlers;
pub mod local;
pub mod ratelimit;
pub mod remote;

use crate::config::BrokerConfig;
use crate::vending::Vendor;
use rand::RngCore;
use std::sync::Arc;

/// Shared state every server-mode handler closes over.
#[derive(Clone)]
pub struct AppState {
    pub vendor: Arc<Vendor>,
    pub config: Arc<BrokerConfig>,
}

/// Process start-time constant (spec.md §5) stamped on every session this
/// server instance vends.
pub fn new_server_instance_id() -> String {
    let mut buf = [0u8; 8];
    rand::rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

fn build_router(state: AppState) -> axum::Router {
    use axum::routing::{any, get};

    axum::Router::new()
        .route("/", get(handlers::credentials).post(handlers::credentials))
        .route("/profiles", get(handlers::profiles))
        .route("/metrics", get(handlers::metrics))
        .fallback(any(handlers::not_found))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}
