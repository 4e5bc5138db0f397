//! # Storage Adapter
//!
//! Unified persistence contract for items, summaries, cursors, and vectors,
//! satisfied by two backends: a shared multi-tenant store (the default,
//! in-process) and an external per-tenant store reachable over a
//! configuration-supplied URL.
//!
//! Modeled on the grounding database's multi-tier `StorageHierarchy`, but
//! collapsed from four storage tiers to two tenant-scoped backends — the
//! specification's Non-goals rule out the strong-consistency multi-node
//! tiering that `aerolithdb-storage` provides, so only the *isolation*
//! half of that design note applies here (see design note 5: "the two
//! backends differ only in tenant-scoping placement; model them as a
//! single interface with a `scope` argument").

mod external;
mod memory;

pub use external::ExternalStorageBackend;
pub use memory::MemoryStorageBackend;

use agg_core::{ConfigId, ContentItem, Cursor, SummaryItem};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Storage-layer error taxonomy, per the specification's error-handling
/// design: transient faults are retryable, schema/constraint violations are
/// fatal and fail the job outright.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("transient storage fault: {0}")]
    Retryable(String),
    #[error("fatal storage fault: {0}")]
    Fatal(String),
}

impl StorageError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageError::Retryable(_))
    }
}

#[derive(Debug, Clone, Default)]
pub struct EmbeddingFilters {
    pub item_type: Option<String>,
    pub source: Option<String>,
    pub date_from: Option<i64>,
    pub date_to: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct EmbeddingQuery {
    pub vector: Vec<f32>,
    pub limit: usize,
    pub threshold: f32,
    pub filters: EmbeddingFilters,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarityMatch {
    pub item: ContentItem,
    /// Cosine similarity, in `[-1, 1]`.
    pub similarity: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicCount {
    pub topic: String,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceStat {
    pub source: String,
    pub item_count: u64,
    pub last_fetch_at: Option<i64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DateRange {
    pub earliest: Option<i64>,
    pub latest: Option<i64>,
}

/// The contract the pipeline, generators, and context/search endpoints use.
///
/// Every operation is implicitly scoped to a `ConfigId`: for the shared
/// backend that scoping is a mandatory predicate on every query; for the
/// external backend it is structural (the URL already points at a
/// single-tenant database), but the trait makes callers pass it either way
/// so tenant isolation is an invariant of the interface, not a convention
/// each caller has to remember.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Upsert by `(config_id, cid)`. Returns the number of genuinely new
    /// rows (idempotent: re-saving an existing `cid` is a no-op for that
    /// item and does not count toward the return value).
    async fn save_items(
        &self,
        config_id: ConfigId,
        items: Vec<ContentItem>,
    ) -> Result<u64, StorageError>;

    async fn get_item(
        &self,
        config_id: ConfigId,
        cid: &str,
    ) -> Result<Option<ContentItem>, StorageError>;

    async fn get_items_between(
        &self,
        config_id: ConfigId,
        start_epoch: i64,
        end_epoch: i64,
    ) -> Result<Vec<ContentItem>, StorageError>;

    /// Upsert by `(config_id, type, date)`.
    async fn save_summary(
        &self,
        config_id: ConfigId,
        summary: SummaryItem,
    ) -> Result<(), StorageError>;

    async fn get_summary_between(
        &self,
        config_id: ConfigId,
        start_epoch: i64,
        end_epoch: i64,
    ) -> Result<Vec<SummaryItem>, StorageError>;

    async fn get_cursor(
        &self,
        config_id: ConfigId,
        cid: &str,
    ) -> Result<Option<Cursor>, StorageError>;

    async fn set_cursor(&self, cursor: Cursor) -> Result<(), StorageError>;

    /// Attaches an embedding vector to an already-saved item, keyed by
    /// `(config_id, cid)`. Called by the pipeline after `save_items` for
    /// any item whose `text` crossed the embed-length threshold.
    async fn save_embedding(
        &self,
        config_id: ConfigId,
        cid: &str,
        vector: Vec<f32>,
    ) -> Result<(), StorageError>;

    async fn search_by_embedding(
        &self,
        config_id: ConfigId,
        query: EmbeddingQuery,
    ) -> Result<Vec<SimilarityMatch>, StorageError>;

    async fn topic_counts(
        &self,
        config_id: ConfigId,
        limit: usize,
    ) -> Result<Vec<TopicCount>, StorageError>;

    async fn source_stats(&self, config_id: ConfigId) -> Result<Vec<SourceStat>, StorageError>;

    async fn date_range(&self, config_id: ConfigId) -> Result<DateRange, StorageError>;
}

/// Cosine similarity between two equal-length vectors, returning `-1.0` if
/// either vector has zero magnitude (treated as "not comparable" rather
/// than a divide-by-zero panic).
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return -1.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return -1.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_vectors_are_maximally_similar() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn zero_vector_is_not_comparable() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), -1.0);
    }
}
