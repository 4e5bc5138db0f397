//! Forwards an already-encrypted configuration payload to a
//! user-controlled local executor without the server ever seeing
//! plaintext. `targetUrl` is validated and used for one outbound request;
//! it is never logged or persisted.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::state::AppState;

#[derive(Clone)]
pub struct RelayLimiter {
    per_hour: u32,
    windows: Arc<DashMap<Uuid, (DateTime<Utc>, u32)>>,
}

impl RelayLimiter {
    pub fn new(per_hour: u32) -> Self {
        Self {
            per_hour,
            windows: Arc::new(DashMap::new()),
        }
    }

    /// Returns `true` if the caller has budget remaining in the current
    /// rolling hour, consuming one unit of it.
    fn allow(&self, caller: Uuid) -> bool {
        let now = Utc::now();
        let mut entry = self
            .windows
            .entry(caller)
            .or_insert_with(|| (now, 0));
        if now.signed_duration_since(entry.0).num_seconds() >= 3600 {
            *entry = (now, 0);
        }
        if entry.1 >= self.per_hour {
            return false;
        }
        entry.1 += 1;
        true
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/relay/execute", post(execute))
        .route("/relay/health", post(health))
        .route("/relay/status", post(status))
        .with_state(state)
}

#[derive(Deserialize)]
pub struct RelayRequest {
    pub encrypted: String,
    pub iv: String,
    pub tag: String,
    pub target_url: String,
    #[serde(default)]
    pub caller: Option<Uuid>,
}

fn validate_target(target_url: &str) -> Result<(), (StatusCode, Json<serde_json::Value>)> {
    if target_url.starts_with("http://") || target_url.starts_with("https://") {
        Ok(())
    } else {
        Err((
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "targetUrl must be http or https" })),
        ))
    }
}

async fn forward(
    state: &AppState,
    req: &RelayRequest,
    timeout: Duration,
) -> Result<(StatusCode, Json<serde_json::Value>), (StatusCode, Json<serde_json::Value>)> {
    validate_target(&req.target_url)?;

    let caller = req.caller.unwrap_or_else(Uuid::nil);
    if !state.relay_limiter.allow(caller) {
        return Err((
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({ "error": "relay rate limit exceeded" })),
        ));
    }

    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .timeout(timeout)
        .build()
        .expect("relay client always builds");

    let body = json!({
        "encrypted": req.encrypted,
        "iv": req.iv,
        "tag": req.tag,
    });

    match client.post(&req.target_url).json(&body).send().await {
        Ok(response) => {
            let status = StatusCode::from_u16(response.status().as_u16())
                .unwrap_or(StatusCode::BAD_GATEWAY);
            let payload = response
                .json::<serde_json::Value>()
                .await
                .unwrap_or_else(|_| json!({}));
            Ok((status, Json(payload)))
        }
        Err(err) => Err((
            StatusCode::BAD_GATEWAY,
            Json(json!({ "error": format!("relay forwarding failed: {err}") })),
        )),
    }
}

async fn execute(State(state): State<AppState>, Json(req): Json<RelayRequest>) -> impl IntoResponse {
    match forward(&state, &req, state.settings.relay_execute_timeout()).await {
        Ok(ok) => ok.into_response(),
        Err(err) => err.into_response(),
    }
}

async fn health(State(state): State<AppState>, Json(req): Json<RelayRequest>) -> impl IntoResponse {
    match forward(&state, &req, state.settings.relay_health_timeout()).await {
        Ok(ok) => ok.into_response(),
        Err(err) => err.into_response(),
    }
}

async fn status(State(state): State<AppState>, Json(req): Json<RelayRequest>) -> impl IntoResponse {
    match forward(&state, &req, state.settings.relay_status_timeout()).await {
        Ok(ok) => ok.into_response(),
        Err(err) => err.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_http_schemes() {
        assert!(validate_target("ftp://example.com").is_err());
        assert!(validate_target("file:///etc/passwd").is_err());
    }

    #[test]
    fn accepts_http_and_https() {
        assert!(validate_target("http://localhost:9000/hook").is_ok());
        assert!(validate_target("https://localhost:9000/hook").is_ok());
    }

    #[test]
    fn limiter_enforces_per_hour_cap() {
        let limiter = RelayLimiter::new(2);
        let caller = Uuid::new_v4();
        assert!(limiter.allow(caller));
        assert!(limiter.allow(caller));
        assert!(!limiter.allow(caller));
    }
}
