use agg_core::{ConfigId, ConfigSettings, ContentItem, Cursor, JobPhase, JobStats};
use agg_registry::{
    AiProvider, EnricherPlugin, FetchBatch, GenerateWindow, GeneratorPlugin, PluginError,
    SourcePlugin,
};
use agg_storage::StorageBackend;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("transient pipeline fault: {0}")]
    Transient(String),
    #[error("fatal pipeline fault: {0}")]
    Fatal(String),
}

impl From<PluginError> for PipelineError {
    fn from(err: PluginError) -> Self {
        match err {
            PluginError::Transient(m) => PipelineError::Transient(m),
            PluginError::Fatal(m) => PipelineError::Fatal(m),
        }
    }
}

impl From<agg_storage::StorageError> for PipelineError {
    fn from(err: agg_storage::StorageError) -> Self {
        if err.is_retryable() {
            PipelineError::Transient(err.to_string())
        } else {
            PipelineError::Fatal(err.to_string())
        }
    }
}

pub struct ResolvedSource {
    pub instance_name: String,
    pub params: HashMap<String, Value>,
    pub plugin: Arc<dyn SourcePlugin>,
}

pub struct ResolvedEnricher {
    pub instance_name: String,
    pub params: HashMap<String, Value>,
    pub plugin: Arc<dyn EnricherPlugin>,
}

pub struct ResolvedGenerator {
    pub instance_name: String,
    pub params: HashMap<String, Value>,
    pub interval_ms: u64,
    pub plugin: Arc<dyn GeneratorPlugin>,
}

/// Everything the fetch/enrich/generate loop needs for one configuration.
/// Assembled by the job manager, which resolves `PluginDeclaration`s
/// against the registry and injects quota/credential overrides before a
/// cycle starts (those concerns live in `agg-jobs`, not here).
pub struct PipelineInputs {
    pub config_id: ConfigId,
    pub sources: Vec<ResolvedSource>,
    pub enrichers: Vec<ResolvedEnricher>,
    pub generators: Vec<ResolvedGenerator>,
    pub ai: Option<Arc<dyn AiProvider>>,
    pub storage: Arc<dyn StorageBackend>,
    pub settings: ConfigSettings,
    /// Per-job fan-out for concurrent source fetches, default 4.
    pub fan_out: usize,
    /// `text` byte length above which an item is embedded.
    pub embed_threshold_chars: usize,
    pub ai_skipped: bool,
}

/// Runs one fetch → dedupe → enrich → store cycle across all sources,
/// respecting `onlyFetch`/`onlyGenerate` (the caller skips calling this at
/// all in `onlyGenerate` mode) and per-job fan-out.
pub async fn run_fetch_cycle(
    inputs: &PipelineInputs,
    stats: &mut JobStats,
    phase: &mut Option<JobPhase>,
) -> Result<(), PipelineError> {
    *phase = Some(JobPhase::Fetching);
    let now = Utc::now().timestamp();

    let fan_out = inputs.fan_out.max(1);
    let fetched: Vec<(String, Result<FetchBatch, PipelineError>)> = stream::iter(
        inputs.sources.iter().map(|source| async move {
            let cursor = read_cursor(inputs.storage.as_ref(), inputs.config_id, &source.instance_name)
                .await
                .unwrap_or(None);
            let result = source
                .plugin
                .fetch_items(&source.params, cursor.as_ref().map(|c| c.message_id.as_str()))
                .await
                .map_err(PipelineError::from);
            (source.instance_name.clone(), result)
        }),
    )
    .buffer_unordered(fan_out)
    .collect()
    .await;

    let mut all_new_items = Vec::new();

    for (instance_name, result) in fetched {
        let source_stats = stats.per_source.entry(instance_name.clone()).or_default();
        match result {
            Ok(batch) => {
                source_stats.items_fetched += batch.items.len() as u64;
                source_stats.last_fetch_at = Some(Utc::now());
                stats.total_items_fetched += batch.items.len() as u64;

                if let Some(message_id) = batch.cursor {
                    inputs
                        .storage
                        .set_cursor(Cursor {
                            config_id: inputs.config_id,
                            cid: instance_name.clone(),
                            message_id,
                        })
                        .await?;
                }

                let surviving = dedupe_against_storage(
                    inputs.storage.as_ref(),
                    inputs.config_id,
                    batch.items,
                    now,
                )
                .await?;
                source_stats.new_items += surviving.len() as u64;
                all_new_items.extend(surviving);
            }
            Err(err) => {
                warn!(source = %instance_name, error = %err, "source fetch failed");
                source_stats.errors += 1;
                stats.errors += 1;
                if let PipelineError::Fatal(_) = err {
                    return Err(err);
                }
            }
        }
    }

    if all_new_items.is_empty() {
        debug!(config_id = %inputs.config_id, "no new items this cycle");
        *phase = Some(JobPhase::Idle);
        return Ok(());
    }

    *phase = Some(JobPhase::Enriching);
    let enriched = run_enrichers(inputs, all_new_items).await?;

    *phase = Some(JobPhase::Storing);
    let new_count = inputs
        .storage
        .save_items(inputs.config_id, enriched.clone())
        .await?;
    stats.new_items += new_count;

    if !inputs.ai_skipped {
        if let Some(ai) = &inputs.ai {
            for item in &enriched {
                if let (Some(cid), Some(text)) = (&item.cid, &item.text) {
                    if text.len() > inputs.embed_threshold_chars {
                        match ai.embed(text).await {
                            Ok(vector) => {
                                inputs
                                    .storage
                                    .save_embedding(inputs.config_id, cid, vector)
                                    .await?;
                                stats.ai_calls += 1;
                            }
                            Err(err) => {
                                warn!(%cid, error = %err, "embed call failed");
                                stats.errors += 1;
                            }
                        }
                    }
                }
            }
        }
    }

    *phase = Some(JobPhase::Idle);
    Ok(())
}

/// Historical mode: drives every source that implements
/// `fetch_historical` over a single date. Sources lacking it are recorded
/// with `skipped_reason = "no-historical"`.
pub async fn run_historical_date(
    inputs: &PipelineInputs,
    date_epoch: i64,
    stats: &mut JobStats,
) -> Result<(), PipelineError> {
    let now = Utc::now().timestamp();
    let mut all_new_items = Vec::new();

    for source in &inputs.sources {
        let source_stats = stats.per_source.entry(source.instance_name.clone()).or_default();
        match source.plugin.fetch_historical(&source.params, date_epoch).await {
            None => {
                source_stats.skipped_reason = Some("no-historical".to_string());
                info!(source = %source.instance_name, "skipped: no-historical");
            }
            Some(Ok(items)) => {
                source_stats.items_fetched += items.len() as u64;
                stats.total_items_fetched += items.len() as u64;
                let surviving =
                    dedupe_against_storage(inputs.storage.as_ref(), inputs.config_id, items, now)
                        .await?;
                source_stats.new_items += surviving.len() as u64;
                all_new_items.extend(surviving);
            }
            Some(Err(err)) => {
                source_stats.errors += 1;
                stats.errors += 1;
                warn!(source = %source.instance_name, error = %err, "historical fetch failed");
            }
        }
    }

    if !all_new_items.is_empty() {
        let enriched = run_enrichers(inputs, all_new_items).await?;
        let new_count = inputs.storage.save_items(inputs.config_id, enriched).await?;
        stats.new_items += new_count;
    }

    Ok(())
}

async fn run_enrichers(
    inputs: &PipelineInputs,
    items: Vec<ContentItem>,
) -> Result<Vec<ContentItem>, PipelineError> {
    let mut current = items;
    for enricher in &inputs.enrichers {
        current = enricher
            .plugin
            .enrich(current, &enricher.params)
            .await
            .map_err(PipelineError::from)?;
    }
    Ok(current)
}

/// Synthesizes a `cid` for items that arrived without one, clamps
/// future-dated items, collapses intra-batch duplicates (first occurrence
/// wins), and drops items already present in storage.
///
/// The storage adapter's `(config_id, cid)` uniqueness is the authoritative
/// dedupe arbiter; this in-memory pass is advisory and only exists to
/// avoid redundant storage round-trips within a single batch.
async fn dedupe_against_storage(
    storage: &dyn StorageBackend,
    config_id: ConfigId,
    items: Vec<ContentItem>,
    now: i64,
) -> Result<Vec<ContentItem>, PipelineError> {
    let mut seen_in_batch: HashSet<String> = HashSet::new();
    let mut surviving = Vec::with_capacity(items.len());

    for mut item in items {
        item.clamp_future_date(now);

        if item.cid.is_none() {
            let link_or_text = item
                .link
                .as_deref()
                .or(item.text.as_deref())
                .unwrap_or_default();
            item.cid = Some(ContentItem::synthesize_cid(
                &item.source,
                &item.item_type,
                item.date,
                link_or_text,
            ));
        }
        let cid = item.cid.clone().unwrap();

        if !seen_in_batch.insert(cid.clone()) {
            continue;
        }

        match storage.get_item(config_id, &cid).await {
            Ok(Some(_)) => continue,
            Ok(None) => surviving.push(item),
            Err(err) => {
                error!(%cid, error = %err, "dedupe lookup failed");
                return Err(PipelineError::from(err));
            }
        }
    }

    Ok(surviving)
}

/// Runs every generator once, used for `onlyGenerate` mode and for the
/// final batch of one-shot jobs. Each generator executes under the
/// caller-supplied per-configuration lock so two runs cannot overlap
/// (enforced by `GeneratorScheduler` in this crate).
pub async fn run_generators_once(
    inputs: &PipelineInputs,
    window: GenerateWindow,
    stats: &mut JobStats,
) -> Result<(), PipelineError> {
    let items = inputs
        .storage
        .get_items_between(inputs.config_id, window.start_epoch, window.end_epoch)
        .await?;

    for generator in &inputs.generators {
        match generator
            .plugin
            .generate(items.clone(), window.clone(), &generator.params)
            .await
        {
            Ok(summary) => {
                inputs.storage.save_summary(inputs.config_id, summary).await?;
            }
            Err(err) => {
                stats.errors += 1;
                warn!(generator = %generator.instance_name, error = %err, "generator failed");
            }
        }
    }
    Ok(())
}

/// Reads a source's previously stored cursor, if any.
pub async fn read_cursor(
    storage: &dyn StorageBackend,
    config_id: ConfigId,
    instance_name: &str,
) -> Result<Option<Cursor>, PipelineError> {
    storage
        .get_cursor(config_id, instance_name)
        .await
        .map_err(PipelineError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use agg_storage::MemoryStorageBackend;
    use std::collections::HashMap as StdHashMap;
    use uuid::Uuid;

    fn item(source: &str, item_type: &str, date: i64, text: &str) -> ContentItem {
        ContentItem {
            id: None,
            config_id: ConfigId(Uuid::nil()),
            cid: None,
            item_type: item_type.to_string(),
            source: source.to_string(),
            title: None,
            text: Some(text.to_string()),
            link: None,
            topics: HashSet::new(),
            date,
            metadata: StdHashMap::new(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn dedupe_collapses_intra_batch_duplicates() {
        let storage = MemoryStorageBackend::new();
        let config_id = ConfigId(Uuid::new_v4());
        let now = Utc::now().timestamp();

        let items = vec![
            item("src", "post", now, "same body"),
            item("src", "post", now, "same body"),
        ];

        let surviving = dedupe_against_storage(&storage, config_id, items, now)
            .await
            .unwrap();
        assert_eq!(surviving.len(), 1, "duplicate synthesized cids collapse to one");
    }

    #[tokio::test]
    async fn future_dated_items_are_clamped() {
        let storage = MemoryStorageBackend::new();
        let config_id = ConfigId(Uuid::new_v4());
        let now = Utc::now().timestamp();

        let items = vec![item("src", "post", now + 10_000, "future item")];
        let surviving = dedupe_against_storage(&storage, config_id, items, now)
            .await
            .unwrap();

        assert_eq!(surviving[0].date, now);
        assert!(surviving[0].metadata.contains_key("clamped_from_date"));
    }

    #[tokio::test]
    async fn items_already_in_storage_are_dropped() {
        let storage = MemoryStorageBackend::new();
        let config_id = ConfigId(Uuid::new_v4());
        let now = Utc::now().timestamp();

        let mut existing = item("src", "post", now, "already stored");
        existing.cid = Some("known-cid".to_string());
        storage.save_items(config_id, vec![existing]).await.unwrap();

        let mut repeat = item("src", "post", now, "already stored");
        repeat.cid = Some("known-cid".to_string());

        let surviving = dedupe_against_storage(&storage, config_id, vec![repeat], now)
            .await
            .unwrap();
        assert!(surviving.is_empty());
    }
}
