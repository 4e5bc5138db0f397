//! Core data model: the types that flow between the pipeline, storage
//! adapter, job manager, and API surface.
//!
//! Mirrors the shape of the persisted/logical schemas described in the
//! specification's external-interfaces section: `items`, `summaries`,
//! `cursor`, `configs`, and `payments`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Stable identifier for a tenant configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConfigId(pub Uuid);

impl std::fmt::Display for ConfigId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable identifier for a job run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

/// The atomic unit of fetched data.
///
/// Invariants (enforced by the storage adapter, not by this struct):
/// `(configuration, cid)` is unique when `cid` is present; `type` and
/// `source` are non-empty; `date` is clamped to now + small skew;
/// `topics` is a set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentItem {
    /// Platform-assigned monotonic id, absent until persisted.
    pub id: Option<i64>,
    pub config_id: ConfigId,
    /// Source-provided content id, unique per configuration when present.
    pub cid: Option<String>,
    /// Free-form plugin-declared tag, e.g. `discordRawData`, `githubPullRequest`.
    pub item_type: String,
    /// Name of the source plugin instance that produced this item.
    pub source: String,
    pub title: Option<String>,
    pub text: Option<String>,
    pub link: Option<String>,
    pub topics: HashSet<String>,
    /// Epoch seconds.
    pub date: i64,
    pub metadata: HashMap<String, Value>,
    pub created_at: DateTime<Utc>,
}

impl ContentItem {
    /// A deterministic fallback id for items the source didn't tag with a
    /// `cid`, so dedupe remains meaningful. Hash inputs are
    /// `(source, type, date, link-or-text)` per the pipeline's tie-break
    /// rule.
    pub fn synthesize_cid(source: &str, item_type: &str, date: i64, link_or_text: &str) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(source.as_bytes());
        hasher.update(b"|");
        hasher.update(item_type.as_bytes());
        hasher.update(b"|");
        hasher.update(date.to_string().as_bytes());
        hasher.update(b"|");
        hasher.update(link_or_text.as_bytes());
        hasher.finalize().to_hex().to_string()
    }

    /// Checksum over the addressable content, used for integrity checks.
    pub fn checksum(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.item_type.as_bytes());
        hasher.update(self.source.as_bytes());
        if let Some(t) = &self.text {
            hasher.update(t.as_bytes());
        }
        if let Some(l) = &self.link {
            hasher.update(l.as_bytes());
        }
        hasher.finalize().to_hex().to_string()
    }

    /// Clamp a future-dated item to now, annotating metadata so the
    /// adjustment is auditable.
    pub fn clamp_future_date(&mut self, now: i64) {
        if self.date > now {
            self.metadata.insert(
                "clamped_from_date".to_string(),
                Value::from(self.date),
            );
            self.date = now;
        }
    }
}

/// A derived artifact produced by a generator.
///
/// Invariant: at most one `(config_id, summary_type, date)` triple exists;
/// re-generation overwrites the prior row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryItem {
    pub id: Option<i64>,
    pub config_id: ConfigId,
    pub summary_type: String,
    pub title: Option<String>,
    /// Structured categories payload, nested by channel/group.
    pub categories: Value,
    pub markdown: String,
    /// Epoch seconds identifying the period summarized.
    pub date: i64,
    pub created_at: DateTime<Utc>,
}

/// Opaque high-water mark per source instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cursor {
    pub config_id: ConfigId,
    /// Logical key, e.g. `"discordRaw-<channelId>"`.
    pub cid: String,
    /// Opaque token understood only by the owning source.
    pub message_id: String,
}

/// Visibility level of a configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Unlisted,
    Private,
    Shared,
}

/// One plugin declaration within a configuration (source, enricher,
/// generator, ai, or storage node).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginDeclaration {
    /// Instance name, unique within the configuration.
    pub name: String,
    /// Registry key, e.g. `"discordRaw"`.
    pub plugin_name: String,
    /// Parameter values; may be literal JSON or `process.env.NAME` references.
    pub parameters: HashMap<String, Value>,
    /// Declared fetch/run interval in milliseconds (generators only).
    pub interval_ms: Option<u64>,
    /// Whether this plugin should use the platform-provided AI credential.
    pub use_platform_ai: bool,
    /// Whether this plugin should use the platform-provided storage credential.
    pub use_platform_storage: bool,
}

/// Historical date window settings for a configuration run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct HistoricalWindow {
    pub start: Option<i64>,
    pub end: Option<i64>,
}

/// Per-run settings carried by a configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ConfigSettings {
    pub run_once: bool,
    pub only_fetch: bool,
    pub only_generate: bool,
    pub historical: Option<HistoricalWindow>,
}

/// A tenant's declarative pipeline specification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Configuration {
    pub id: ConfigId,
    pub owner_id: Uuid,
    pub slug: String,
    pub visibility: Visibility,
    pub sources: Vec<PluginDeclaration>,
    pub enrichers: Vec<PluginDeclaration>,
    pub generators: Vec<PluginDeclaration>,
    pub ai: Vec<PluginDeclaration>,
    pub storage: Vec<PluginDeclaration>,
    pub settings: ConfigSettings,
    /// Monetization: price in smallest unit, `None` disables monetized reads.
    pub price_per_query: Option<u64>,
    pub owner_wallet: Option<String>,
    /// External per-tenant storage URL, if configured.
    pub external_db_url: Option<String>,
    pub external_db_valid: Option<bool>,
    pub external_db_error: Option<String>,
    pub runs_today: u32,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Configuration {
    /// Every enricher/generator `providerName` parameter must resolve to a
    /// plugin instance declared in the same configuration.
    pub fn dangling_provider_references(&self) -> Vec<String> {
        let declared: HashSet<&str> = self
            .sources
            .iter()
            .chain(&self.enrichers)
            .chain(&self.generators)
            .chain(&self.ai)
            .chain(&self.storage)
            .map(|p| p.name.as_str())
            .collect();

        let mut dangling = Vec::new();
        for plugin in self.enrichers.iter().chain(&self.generators) {
            if let Some(Value::String(provider)) = plugin.parameters.get("providerName") {
                if !declared.contains(provider.as_str()) {
                    dangling.push(provider.clone());
                }
            }
        }
        dangling
    }
}

/// Execution mode of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobMode {
    Once,
    Continuous,
}

/// Lifecycle status of a job. Terminal states are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed | JobState::Cancelled)
    }
}

/// Fine-grained phase within a running job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPhase {
    Connecting,
    Fetching,
    Enriching,
    Storing,
    Generating,
    Idle,
    Waiting,
}

/// Per-source statistics accumulated during a job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceStats {
    pub items_fetched: u64,
    pub new_items: u64,
    pub last_fetch_at: Option<DateTime<Utc>>,
    pub skipped_reason: Option<String>,
    pub errors: u64,
}

/// Aggregate statistics for a job run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobStats {
    pub per_source: HashMap<String, SourceStats>,
    pub total_items_fetched: u64,
    pub new_items: u64,
    pub ai_calls: u64,
    pub errors: u64,
}

/// One execution instance of a configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub config_id: ConfigId,
    pub started_at: DateTime<Utc>,
    pub mode: JobMode,
    pub state: JobState,
    pub phase: Option<JobPhase>,
    pub stats: JobStats,
    pub last_error: Option<String>,
    pub ai_skipped: bool,
    /// Monotonic per-job update counter; backs the status bus's ordering
    /// guarantee (logical clock, not wall time, so updates within the same
    /// millisecond still order deterministically).
    pub updated_at: u64,
}

impl Job {
    pub fn new(config_id: ConfigId, mode: JobMode) -> Self {
        Self {
            id: JobId::new(),
            config_id,
            started_at: Utc::now(),
            mode,
            state: JobState::Queued,
            phase: None,
            stats: JobStats::default(),
            last_error: None,
            ai_skipped: false,
            updated_at: 0,
        }
    }
}

/// A settled, single-use proof of purchase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub config_id: ConfigId,
    /// User id or wallet address of the payer.
    pub payer: String,
    pub amount: u64,
    pub platform_fee: u64,
    pub owner_amount: u64,
    pub tx_signature: String,
    pub memo: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unknown plugin: {kind}/{name}")]
    UnknownPlugin { kind: String, name: String },
    #[error("missing required parameter `{0}` for plugin `{1}`")]
    MissingParameter(String, String),
    #[error("dangling provider reference: {0}")]
    DanglingReference(String),
    #[error("invalid external storage configuration: {0}")]
    InvalidExternalStorage(String),
}
