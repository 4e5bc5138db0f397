//! REST surface. Route shapes follow the contract; handler bodies are
//! thin — they validate, dispatch to the job manager/pipeline/storage,
//! and serialize — matching `aerolithdb-api::rest::RESTAPIv1`'s handler
//! style (`AppState` extraction, `Json` in/out, explicit status codes via
//! `(StatusCode, Json<T>)` tuples for error paths).

use agg_core::{ConfigId, Configuration, JobId, JobMode, PluginDeclaration, Visibility};
use agg_storage::{EmbeddingFilters, EmbeddingQuery};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::payment::{self, PaymentGateOutcome};
use crate::runner;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/aggregate", post(run_local))
        .route("/configs", post(create_config))
        .route("/configs/:id/run", post(run_once))
        .route("/runs/continuous", post(run_continuous))
        .route("/job/:id/stop", post(stop_job))
        .route("/job/:id", get(job_status))
        .route("/configs/:id/items", get(list_items))
        .route("/configs/:id/summaries", get(list_summaries))
        .route("/configs/:id/topics", get(topic_counts))
        .route("/configs/:id/stats", get(source_stats))
        .route("/configs/:id/context", get(context))
        .route("/configs/:id/summary", get(summary_on_date))
        .route("/search/:config_id", get(search_single))
        .route("/search", post(search_single_body))
        .route("/search/multi", post(search_multi))
        .with_state(state)
}

async fn health_check() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

fn parse_config_id(raw: &str) -> Result<ConfigId, (StatusCode, Json<serde_json::Value>)> {
    Uuid::parse_str(raw)
        .map(ConfigId)
        .map_err(|_| bad_request("invalid configuration id"))
}

fn bad_request(message: &str) -> (StatusCode, Json<serde_json::Value>) {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message })))
}

fn not_found(message: &str) -> (StatusCode, Json<serde_json::Value>) {
    (StatusCode::NOT_FOUND, Json(json!({ "error": message })))
}

/// A config body shaped like `Configuration`, minus the server-assigned
/// bookkeeping fields the local-mode caller doesn't supply.
#[derive(Deserialize)]
pub struct LocalConfigBody {
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub sources: Vec<PluginDeclaration>,
    #[serde(default)]
    pub enrichers: Vec<PluginDeclaration>,
    #[serde(default)]
    pub generators: Vec<PluginDeclaration>,
    #[serde(default)]
    pub ai: Vec<PluginDeclaration>,
    #[serde(default)]
    pub storage: Vec<PluginDeclaration>,
    #[serde(default)]
    pub settings: agg_core::ConfigSettings,
}

#[derive(Deserialize)]
pub struct AggregateRequest {
    pub config: LocalConfigBody,
    /// Secret name/plaintext pairs, sealed into the process secret store
    /// under a fresh configuration id before the job is resolved.
    #[serde(default)]
    pub secrets: HashMap<String, String>,
}

/// `POST /aggregate`: runs a one-shot job against a caller-supplied
/// configuration that is never persisted to the platform's configuration
/// table — each call gets a throwaway configuration id.
async fn run_local(State(state): State<AppState>, Json(req): Json<AggregateRequest>) -> impl IntoResponse {
    let config_id = ConfigId(Uuid::new_v4());
    for (name, plaintext) in &req.secrets {
        if let Err(err) = state.secrets.set_secret(config_id, name, plaintext) {
            return (StatusCode::BAD_REQUEST, Json(json!({ "error": err.to_string() }))).into_response();
        }
    }

    let config = Configuration {
        id: config_id,
        owner_id: Uuid::nil(),
        slug: req.config.slug,
        visibility: Visibility::Private,
        sources: req.config.sources,
        enrichers: req.config.enrichers,
        generators: req.config.generators,
        ai: req.config.ai,
        storage: req.config.storage,
        settings: req.config.settings,
        price_per_query: None,
        owner_wallet: None,
        external_db_url: None,
        external_db_valid: None,
        external_db_error: None,
        runs_today: 0,
        updated_at: chrono::Utc::now(),
        deleted_at: None,
    };
    state.configs.insert(config_id, config);

    match state.job_manager.start_job(config_id, JobMode::Once).await {
        Ok(job_id) => {
            let state = Arc::new(state);
            tokio::spawn(runner::run_once_job(state, config_id, job_id));
            (StatusCode::ACCEPTED, Json(RunResponse { job_id: job_id.to_string() })).into_response()
        }
        Err(err) => (StatusCode::CONFLICT, Json(json!({ "error": err.to_string() }))).into_response(),
    }
}

#[derive(Deserialize)]
pub struct CreateConfigRequest {
    pub owner_id: Uuid,
    #[serde(default)]
    pub slug: String,
    #[serde(default = "default_visibility")]
    pub visibility: Visibility,
    #[serde(default)]
    pub price_per_query: Option<u64>,
    #[serde(default)]
    pub owner_wallet: Option<String>,
    #[serde(default)]
    pub sources: Vec<PluginDeclaration>,
    #[serde(default)]
    pub enrichers: Vec<PluginDeclaration>,
    #[serde(default)]
    pub generators: Vec<PluginDeclaration>,
    #[serde(default)]
    pub ai: Vec<PluginDeclaration>,
    #[serde(default)]
    pub storage: Vec<PluginDeclaration>,
    #[serde(default)]
    pub settings: agg_core::ConfigSettings,
}

fn default_visibility() -> Visibility {
    Visibility::Unlisted
}

#[derive(Serialize)]
struct CreateConfigResponse {
    id: Uuid,
    visibility: Visibility,
}

/// `POST /configs`: creates and persists a configuration under the
/// platform configuration table. Free-tier callers (the only tier this
/// runtime can currently resolve — see the tier-lookup Open Question)
/// cannot set `visibility=private` (downgraded to `unlisted`) or
/// monetize reads (`price_per_query` rejected with 403).
async fn create_config(
    State(state): State<AppState>,
    Json(req): Json<CreateConfigRequest>,
) -> impl IntoResponse {
    let tier = agg_saas::Tier::Free;

    let current_count = state
        .configs
        .iter()
        .filter(|entry| entry.owner_id == req.owner_id && entry.deleted_at.is_none())
        .count() as u32;
    if !state.quotas.can_create_config(tier, current_count) {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({ "error": "configuration limit reached for this tier" })),
        )
            .into_response();
    }

    if tier == agg_saas::Tier::Free && req.price_per_query.is_some() {
        return (
            StatusCode::FORBIDDEN,
            Json(json!({ "error": "monetized reads require a paid tier" })),
        )
            .into_response();
    }

    let visibility = if tier == agg_saas::Tier::Free && req.visibility == Visibility::Private {
        Visibility::Unlisted
    } else {
        req.visibility
    };

    let config_id = ConfigId(Uuid::new_v4());
    let config = Configuration {
        id: config_id,
        owner_id: req.owner_id,
        slug: req.slug,
        visibility,
        sources: req.sources,
        enrichers: req.enrichers,
        generators: req.generators,
        ai: req.ai,
        storage: req.storage,
        settings: req.settings,
        price_per_query: req.price_per_query,
        owner_wallet: req.owner_wallet,
        external_db_url: None,
        external_db_valid: None,
        external_db_error: None,
        runs_today: 0,
        updated_at: chrono::Utc::now(),
        deleted_at: None,
    };
    state.configs.insert(config_id, config);

    (
        StatusCode::CREATED,
        Json(CreateConfigResponse { id: config_id.0, visibility }),
    )
        .into_response()
}

#[derive(Deserialize)]
pub struct RunRequest {
    #[serde(default)]
    pub user_id: Option<Uuid>,
}

#[derive(Serialize)]
struct RunResponse {
    job_id: String,
}

async fn run_once(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<RunRequest>,
) -> impl IntoResponse {
    let config_id = match parse_config_id(&id) {
        Ok(c) => c,
        Err(e) => return e.into_response(),
    };

    let config = match state.configs.get(&config_id) {
        Some(c) => c.clone(),
        None => return not_found("configuration not found").into_response(),
    };

    let user_id = req.user_id.unwrap_or(config.owner_id);
    let tier = agg_saas::Tier::Free;
    if !state.quotas.can_run_once(user_id, tier) {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({ "error": "daily run cap exceeded" })),
        )
            .into_response();
    }

    match state.job_manager.start_job(config_id, JobMode::Once).await {
        Ok(job_id) => {
            let state = Arc::new(state);
            tokio::spawn(runner::run_once_job(state, config_id, job_id));
            (StatusCode::ACCEPTED, Json(RunResponse { job_id: job_id.to_string() })).into_response()
        }
        Err(err) => (StatusCode::CONFLICT, Json(json!({ "error": err.to_string() }))).into_response(),
    }
}

#[derive(Deserialize)]
pub struct ContinuousRunRequest {
    pub config_id: Uuid,
    #[serde(default)]
    pub user_id: Option<Uuid>,
}

async fn run_continuous(
    State(state): State<AppState>,
    Json(req): Json<ContinuousRunRequest>,
) -> impl IntoResponse {
    let config_id = ConfigId(req.config_id);
    if state.configs.get(&config_id).is_none() {
        return not_found("configuration not found").into_response();
    }

    match state.job_manager.start_job(config_id, JobMode::Continuous).await {
        Ok(job_id) => {
            let state = Arc::new(state);
            tokio::spawn(runner::run_continuous_job(state, config_id, job_id));
            (StatusCode::ACCEPTED, Json(RunResponse { job_id: job_id.to_string() })).into_response()
        }
        Err(err) => (StatusCode::CONFLICT, Json(json!({ "error": err.to_string() }))).into_response(),
    }
}

fn parse_job_id(raw: &str) -> Result<JobId, (StatusCode, Json<serde_json::Value>)> {
    Uuid::parse_str(raw)
        .map(JobId)
        .map_err(|_| bad_request("invalid job id"))
}

async fn stop_job(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    let job_id = match parse_job_id(&id) {
        Ok(j) => j,
        Err(e) => return e.into_response(),
    };
    match state.job_manager.cancel(job_id) {
        Ok(()) => Json(json!({ "status": "cancelling" })).into_response(),
        Err(err) => not_found(&err.to_string()).into_response(),
    }
}

async fn job_status(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    let job_id = match parse_job_id(&id) {
        Ok(j) => j,
        Err(e) => return e.into_response(),
    };
    match state.job_manager.snapshot(job_id) {
        Some(job) => Json(job).into_response(),
        None => not_found("job not found").into_response(),
    }
}

#[derive(Deserialize)]
pub struct RangeQuery {
    pub start: Option<i64>,
    pub end: Option<i64>,
}

async fn gate_read(
    state: &AppState,
    config_id: ConfigId,
    caller: Option<Uuid>,
    headers: &HeaderMap,
) -> Option<(StatusCode, Json<serde_json::Value>)> {
    match payment::check_gate(state, state.facilitator.as_ref(), config_id, caller, headers).await {
        PaymentGateOutcome::Allowed => None,
        PaymentGateOutcome::PaymentRequired(body) => Some((StatusCode::PAYMENT_REQUIRED, Json(body))),
        PaymentGateOutcome::InvalidProof(message) => {
            Some((StatusCode::PAYMENT_REQUIRED, Json(json!({ "error": message }))))
        }
        PaymentGateOutcome::AlreadyUsed => Some((
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "payment has already been used" })),
        )),
    }
}

async fn list_items(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(range): Query<RangeQuery>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let config_id = match parse_config_id(&id) {
        Ok(c) => c,
        Err(e) => return e.into_response(),
    };
    if let Some(err) = gate_read(&state, config_id, None, &headers).await {
        return err.into_response();
    }
    let storage = state.storage_for(config_id);
    let start = range.start.unwrap_or(0);
    let end = range.end.unwrap_or_else(|| chrono::Utc::now().timestamp());
    match storage.get_items_between(config_id, start, end).await {
        Ok(items) => Json(items).into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": err.to_string() }))).into_response(),
    }
}

async fn list_summaries(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(range): Query<RangeQuery>,
) -> impl IntoResponse {
    let config_id = match parse_config_id(&id) {
        Ok(c) => c,
        Err(e) => return e.into_response(),
    };
    let storage = state.storage_for(config_id);
    let start = range.start.unwrap_or(0);
    let end = range.end.unwrap_or_else(|| chrono::Utc::now().timestamp());
    match storage.get_summary_between(config_id, start, end).await {
        Ok(summaries) => Json(summaries).into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": err.to_string() }))).into_response(),
    }
}

#[derive(Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

async fn topic_counts(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<LimitQuery>,
) -> impl IntoResponse {
    let config_id = match parse_config_id(&id) {
        Ok(c) => c,
        Err(e) => return e.into_response(),
    };
    let storage = state.storage_for(config_id);
    match storage.topic_counts(config_id, q.limit.unwrap_or(20)).await {
        Ok(counts) => Json(counts).into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": err.to_string() }))).into_response(),
    }
}

async fn source_stats(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    let config_id = match parse_config_id(&id) {
        Ok(c) => c,
        Err(e) => return e.into_response(),
    };
    let storage = state.storage_for(config_id);
    match storage.source_stats(config_id).await {
        Ok(stats) => Json(stats).into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": err.to_string() }))).into_response(),
    }
}

async fn context(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let config_id = match parse_config_id(&id) {
        Ok(c) => c,
        Err(e) => return e.into_response(),
    };
    if let Some(err) = gate_read(&state, config_id, None, &headers).await {
        return err.into_response();
    }
    let storage = state.storage_for(config_id);
    let range = storage.date_range(config_id).await;
    let stats = storage.source_stats(config_id).await;
    match (range, stats) {
        (Ok(range), Ok(stats)) => Json(json!({ "dateRange": range, "sources": stats })).into_response(),
        (Err(err), _) | (_, Err(err)) => {
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": err.to_string() }))).into_response()
        }
    }
}

#[derive(Deserialize)]
pub struct DateQuery {
    pub date: i64,
}

async fn summary_on_date(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<DateQuery>,
) -> impl IntoResponse {
    let config_id = match parse_config_id(&id) {
        Ok(c) => c,
        Err(e) => return e.into_response(),
    };
    let storage = state.storage_for(config_id);
    match storage.get_summary_between(config_id, q.date, q.date).await {
        Ok(summaries) => Json(summaries).into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": err.to_string() }))).into_response(),
    }
}

#[derive(Deserialize)]
pub struct SearchRequest {
    pub config_id: Uuid,
    pub vector: Vec<f32>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub threshold: f32,
    #[serde(default)]
    pub item_type: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
}

fn default_limit() -> usize {
    10
}

#[derive(Deserialize)]
pub struct SearchQueryParams {
    pub q: Option<String>,
}

async fn search_single(
    State(state): State<AppState>,
    Path(config_id): Path<String>,
    Query(_q): Query<SearchQueryParams>,
) -> impl IntoResponse {
    let config_id = match parse_config_id(&config_id) {
        Ok(c) => c,
        Err(e) => return e.into_response(),
    };
    // Text-query search requires an embedding call the API layer does not
    // make directly; `/search` (POST, with a precomputed vector) is the
    // primary path. This GET form returns an empty result set rather than
    // failing, since a quick similarity probe is optional tooling.
    let storage = state.storage_for(config_id);
    let query = EmbeddingQuery {
        vector: Vec::new(),
        limit: 0,
        threshold: 0.0,
        filters: EmbeddingFilters::default(),
    };
    match storage.search_by_embedding(config_id, query).await {
        Ok(matches) => Json(matches).into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": err.to_string() }))).into_response(),
    }
}

async fn search_single_body(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> impl IntoResponse {
    let config_id = ConfigId(req.config_id);
    let storage = state.storage_for(config_id);
    let query = EmbeddingQuery {
        vector: req.vector,
        limit: req.limit,
        threshold: req.threshold,
        filters: EmbeddingFilters {
            item_type: req.item_type,
            source: req.source,
            date_from: None,
            date_to: None,
        },
    };
    match storage.search_by_embedding(config_id, query).await {
        Ok(matches) => Json(matches).into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": err.to_string() }))).into_response(),
    }
}

#[derive(Deserialize)]
pub struct MultiSearchRequest {
    pub config_ids: Vec<Uuid>,
    pub vector: Vec<f32>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub threshold: f32,
}

#[derive(Serialize)]
struct MultiSearchEntry {
    config_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    matches: Option<Vec<agg_storage::SimilarityMatch>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Per-config isolation of failures: one tenant's storage fault does not
/// fail the whole multi-search request.
async fn search_multi(
    State(state): State<AppState>,
    Json(req): Json<MultiSearchRequest>,
) -> impl IntoResponse {
    let mut results = Vec::with_capacity(req.config_ids.len());
    for raw_id in req.config_ids {
        let config_id = ConfigId(raw_id);
        let storage = state.storage_for(config_id);
        let query = EmbeddingQuery {
            vector: req.vector.clone(),
            limit: req.limit,
            threshold: req.threshold,
            filters: EmbeddingFilters::default(),
        };
        let entry = match storage.search_by_embedding(config_id, query).await {
            Ok(matches) => MultiSearchEntry {
                config_id: raw_id,
                matches: Some(matches),
                error: None,
            },
            Err(err) => MultiSearchEntry {
                config_id: raw_id,
                matches: None,
                error: Some(err.to_string()),
            },
        };
        results.push(entry);
    }
    Json(results)
}
