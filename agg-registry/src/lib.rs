//! # Plugin Registry
//!
//! A read-only catalog of plugin descriptors keyed by `(kind, pluginName)`,
//! plus the trait shapes every concrete plugin implements. Modeled on the
//! grounding workspace's `aerolithdb-plugins::PluginManager` — a metadata
//! catalog backing trait objects looked up by name — but narrowed from
//! dynamic `.so` loading to a fixed set of compiled-in descriptors
//! registered at startup (no dynamic loading; that belongs to an external
//! collaborator, per the specification's Non-goals).

pub mod builtin;

use agg_storage::StorageBackend;
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginKind {
    Source,
    Enricher,
    Generator,
    Ai,
    Storage,
}

impl PluginKind {
    fn as_str(&self) -> &'static str {
        match self {
            PluginKind::Source => "source",
            PluginKind::Enricher => "enricher",
            PluginKind::Generator => "generator",
            PluginKind::Ai => "ai",
            PluginKind::Storage => "storage",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ParameterField {
    pub name: String,
    pub field_type: String,
    pub default: Option<Value>,
    pub is_secret: bool,
    pub is_provider_reference: bool,
}

/// A single catalog entry. Produced by the (conceptual, offline) scan of
/// plugin implementations; here it is simply registered in code at
/// startup via [`PluginRegistry::bootstrap`].
#[derive(Debug, Clone)]
pub struct PluginEntry {
    pub kind: PluginKind,
    pub plugin_name: String,
    pub description: String,
    pub hidden: bool,
    pub platform_requirement: Option<String>,
    pub parameters: Vec<ParameterField>,
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("unknown plugin: {kind}/{name}")]
    UnknownPlugin { kind: String, name: String },
}

/// Read-only at runtime; built once via [`PluginRegistry::bootstrap`].
pub struct PluginRegistry {
    entries: DashMap<(PluginKind, String), PluginEntry>,
}

impl PluginRegistry {
    fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    fn register(&self, entry: PluginEntry) {
        self.entries
            .insert((entry.kind, entry.plugin_name.clone()), entry);
    }

    pub fn list(&self, kind: PluginKind) -> Vec<PluginEntry> {
        let found: Vec<PluginEntry> = self
            .entries
            .iter()
            .filter(|e| e.key().0 == kind)
            .map(|e| e.value().clone())
            .collect();
        debug!(kind = kind.as_str(), count = found.len(), "listed plugins");
        found
    }

    pub fn find(&self, kind: PluginKind, plugin_name: &str) -> Result<PluginEntry, RegistryError> {
        self.entries
            .get(&(kind, plugin_name.to_string()))
            .map(|e| e.value().clone())
            .ok_or_else(|| {
                warn!(kind = kind.as_str(), plugin_name, "unknown plugin lookup");
                RegistryError::UnknownPlugin {
                    kind: kind.as_str().to_string(),
                    name: plugin_name.to_string(),
                }
            })
    }

    /// Register the fixed set of compiled-in descriptors. Real deployments
    /// would extend this with descriptors for every first-party plugin
    /// crate; this registers the reference set in [`builtin`].
    pub fn bootstrap() -> Self {
        let registry = Self::new();
        for entry in builtin::descriptors() {
            registry.register(entry);
        }
        registry
    }
}

/// Options accompanying an `AiProvider::complete` call.
#[derive(Debug, Clone, Default)]
pub struct CompletionOptions {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone)]
pub struct GenerateWindow {
    pub start_epoch: i64,
    pub end_epoch: i64,
}

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("transient plugin fault: {0}")]
    Transient(String),
    #[error("fatal plugin fault: {0}")]
    Fatal(String),
}

/// One fetch call's result: the items it found, plus an opaque high-water
/// mark the source wants persisted as its cursor. `cursor: None` means the
/// source isn't cursor-based (e.g. a fixed-batch source) or has nothing new
/// to report; the pipeline leaves any previously stored cursor untouched.
#[derive(Debug, Default)]
pub struct FetchBatch {
    pub items: Vec<agg_core::ContentItem>,
    pub cursor: Option<String>,
}

#[async_trait]
pub trait SourcePlugin: Send + Sync {
    /// `cursor` is the source's own previously reported high-water mark,
    /// if any, read from storage before this call; a paginated source uses
    /// it to resume rather than re-fetching from the start.
    async fn fetch_items(
        &self,
        params: &HashMap<String, Value>,
        cursor: Option<&str>,
    ) -> Result<FetchBatch, PluginError>;

    /// `None` means this source does not support historical replay; the
    /// pipeline records `skipped_reason = "no-historical"` for it.
    async fn fetch_historical(
        &self,
        _params: &HashMap<String, Value>,
        _date_epoch: i64,
    ) -> Option<Result<Vec<agg_core::ContentItem>, PluginError>> {
        None
    }
}

#[async_trait]
pub trait EnricherPlugin: Send + Sync {
    async fn enrich(
        &self,
        items: Vec<agg_core::ContentItem>,
        params: &HashMap<String, Value>,
    ) -> Result<Vec<agg_core::ContentItem>, PluginError>;
}

#[async_trait]
pub trait GeneratorPlugin: Send + Sync {
    fn interval_ms(&self, params: &HashMap<String, Value>) -> u64;

    async fn generate(
        &self,
        items: Vec<agg_core::ContentItem>,
        window: GenerateWindow,
        params: &HashMap<String, Value>,
    ) -> Result<agg_core::SummaryItem, PluginError>;
}

#[async_trait]
pub trait AiProvider: Send + Sync {
    async fn complete(
        &self,
        prompt: &str,
        opts: CompletionOptions,
    ) -> Result<String, PluginError>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, PluginError>;
}

/// Resolves which concrete [`StorageBackend`] a configuration's declared
/// storage node should use. Unlike the other plugin kinds this is a thin
/// indirection rather than a behavioral contract — the real work lives in
/// `agg-storage`'s two backends — but it is still named as its own trait
/// so the registry's `(kind, pluginName)` catalog stays uniform across all
/// five plugin kinds.
#[async_trait]
pub trait StoragePlugin: Send + Sync {
    fn backend(&self) -> Arc<dyn StorageBackend>;
}
