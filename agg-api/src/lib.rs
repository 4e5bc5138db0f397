//! API surface: REST, WebSocket, relay forwarding, webhook ingestion, and
//! the fire-and-forget usage-logging middleware, composed the way the
//! grounding workspace's root `main.rs` composes `RESTAPIv1` + `RealtimeAPI`
//! behind a single `axum::Router`.

mod payment;
mod relay;
mod rest;
mod runner;
mod state;
mod usage;
mod webhook;
mod websocket;

pub use payment::{FacilitatorClient, PaymentError, PaymentGateOutcome, ReqwestFacilitatorClient};
pub use relay::RelayLimiter;
pub use runner::{run_continuous_job, run_once_job};
pub use state::AppState;
pub use webhook::WebhookBuffer;

use axum::middleware;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Builds the full HTTP surface for one runtime instance.
pub fn build_router(state: AppState) -> Router {
    rest::router(state.clone())
        .merge(websocket::router(state.clone()))
        .merge(relay::router(state.clone()))
        .merge(webhook::router(state.clone()))
        .layer(middleware::from_fn_with_state(state, usage::log_usage))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
