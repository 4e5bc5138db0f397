//! Real-time job status channel. Grounded on the same
//! subscribe-plus-retained-snapshot pairing as `aerolithdb-api::websocket`'s
//! `ConnectionManager`, wired to a real `axum::extract::ws` upgrade instead
//! of that module's simulated background loop.

use agg_core::JobId;
use agg_jobs::BusMessage;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(upgrade))
        .with_state(state)
}

#[derive(Deserialize)]
pub struct SubscribeQuery {
    /// Subscribes to one job's events. Omitted means subscribe to every
    /// job's events on this deployment.
    pub job_id: Option<Uuid>,
}

async fn upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(q): Query<SubscribeQuery>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, q.job_id.map(JobId)))
}

async fn handle_socket(mut socket: WebSocket, state: AppState, job_id: Option<JobId>) {
    let mut rx = match job_id {
        Some(id) => state.bus.subscribe_job(id),
        None => state.bus.subscribe_global(),
    };

    if let Some(id) = job_id {
        if let Some(snapshot) = state.bus.snapshot(id) {
            let message = BusMessage::Status(snapshot);
            if send_json(&mut socket, &message).await.is_err() {
                return;
            }
        }
    }

    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Ok(message) => {
                        if send_json(&mut socket, &message).await.is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "websocket subscriber lagged behind the status bus");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        debug!(error = %err, "websocket read error");
                        break;
                    }
                }
            }
        }
    }
}

async fn send_json(socket: &mut WebSocket, message: &BusMessage) -> Result<(), axum::Error> {
    let text = serde_json::to_string(message).expect("BusMessage always serializes");
    socket.send(Message::Text(text)).await
}
