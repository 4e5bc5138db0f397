//! Fire-and-forget API usage logging, grounded on the grounding
//! workspace's `aerolithdb-saas::usage::UsageTracker::record_event` —
//! requests never block on the record being written, but narrowed from
//! that module's full metrics/billing pipeline to structured log lines,
//! since this runtime's Non-goals exclude a metrics surface, not logging.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use std::time::Instant;
use tracing::info;

use crate::state::AppState;

pub async fn log_usage(State(_state): State<AppState>, request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started = Instant::now();

    let response = next.run(request).await;

    let status = response.status().as_u16();
    let elapsed_ms = started.elapsed().as_millis();
    tokio::spawn(async move {
        info!(
            target: "api_usage",
            method = %method,
            path = %path,
            status,
            elapsed_ms,
            "api request"
        );
    });

    response
}
