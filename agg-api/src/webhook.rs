//! Webhook ingestion. A push source posts payloads here; they are held in
//! a FIFO buffer keyed by `(configId, sourceInstanceName)` until the owning
//! source plugin's next `fetchItems` call drains them — there is no
//! separate background sweep, matching the "source plugin drains the
//! buffer" framing of the aggregator pipeline's ingest contract.

use agg_core::ConfigId;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use dashmap::DashMap;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::warn;

use crate::state::AppState;

#[derive(Default)]
pub struct WebhookBuffer {
    queues: DashMap<(ConfigId, String), VecDeque<Value>>,
}

impl WebhookBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, config_id: ConfigId, source_name: &str, payload: Value) {
        self.queues
            .entry((config_id, source_name.to_string()))
            .or_default()
            .push_back(payload);
    }

    /// Drains every buffered payload for a source instance. Called by that
    /// source's `fetchItems` implementation, never by anyone else.
    pub fn drain(&self, config_id: ConfigId, source_name: &str) -> Vec<Value> {
        self.queues
            .get_mut(&(config_id, source_name.to_string()))
            .map(|mut q| q.drain(..).collect())
            .unwrap_or_default()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/webhook/:config_id/:source_name", post(ingest))
        .with_state(state)
}

fn secret_name_for(source_name: &str) -> String {
    format!("{source_name}_WEBHOOK_SECRET")
}

async fn ingest(
    State(state): State<AppState>,
    Path((config_id, source_name)): Path<(String, String)>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> impl IntoResponse {
    let Ok(config_id) = uuid::Uuid::parse_str(&config_id).map(ConfigId) else {
        // Always 200: a webhook sender retries aggressively on non-2xx and
        // a malformed configId in the URL isn't something it can fix.
        return StatusCode::OK;
    };

    let Some(config) = state.configs.get(&config_id) else {
        return StatusCode::OK;
    };

    let declares_source = config.sources.iter().any(|s| s.name == source_name);
    if !declares_source {
        return StatusCode::OK;
    }
    drop(config);

    let provided = headers
        .get("X-Webhook-Secret")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    let mut check = HashMap::with_capacity(1);
    check.insert(
        "secret".to_string(),
        Value::from(format!("process.env.{}", secret_name_for(&source_name))),
    );
    match agg_security::resolve_parameters(&state.secrets, config_id, &check) {
        Ok(resolved) => {
            let expected = resolved.get("secret").and_then(|v| v.as_str()).unwrap_or_default();
            if expected != provided || expected.is_empty() {
                warn!(%config_id, source = %source_name, "webhook secret mismatch");
                return StatusCode::OK;
            }
        }
        Err(_) => {
            warn!(%config_id, source = %source_name, "no webhook secret configured for source");
            return StatusCode::OK;
        }
    }

    state.webhook_buffer.push(config_id, &source_name, payload);
    StatusCode::OK
}

pub type SharedWebhookBuffer = Arc<WebhookBuffer>;
