//! Shared multi-tenant storage backend.
//!
//! Default backend for single-process deployments and for tests. Every
//! table is a `DashMap` keyed so that `config_id` is structurally part of
//! the key, the same concurrency primitive the grounding database uses for
//! its metadata store (`aerolithdb_storage::StorageHierarchy::metadata_store`).

use crate::{
    cosine_similarity, DateRange, EmbeddingQuery, SimilarityMatch, SourceStat, StorageBackend,
    StorageError, TopicCount,
};
use agg_core::{ConfigId, ContentItem, Cursor, SummaryItem};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use tracing::debug;

#[derive(Default)]
struct Tenant {
    items_by_cid: HashMap<String, ContentItem>,
    items_in_order: Vec<String>,
    summaries: HashMap<(String, i64), SummaryItem>,
    cursors: HashMap<String, Cursor>,
    /// A stand-in embedding per `cid`, populated by the pipeline when an
    /// item is embedded; absent for items that never crossed the
    /// embed-length threshold.
    embeddings: HashMap<String, Vec<f32>>,
}

pub struct MemoryStorageBackend {
    tenants: DashMap<ConfigId, Tenant>,
    next_id: AtomicI64,
}

impl MemoryStorageBackend {
    pub fn new() -> Self {
        Self {
            tenants: DashMap::new(),
            next_id: AtomicI64::new(1),
        }
    }

    /// Exposed so the pipeline can attach an embedding after calling
    /// `save_items`, without widening the `StorageBackend` trait with a
    /// vector-only write path every backend would need to implement.
    pub fn set_embedding(&self, config_id: ConfigId, cid: &str, vector: Vec<f32>) {
        self.tenants
            .entry(config_id)
            .or_default()
            .embeddings
            .insert(cid.to_string(), vector);
    }
}

impl Default for MemoryStorageBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageBackend for MemoryStorageBackend {
    async fn save_items(
        &self,
        config_id: ConfigId,
        items: Vec<ContentItem>,
    ) -> Result<u64, StorageError> {
        let mut tenant = self.tenants.entry(config_id).or_default();
        let mut new_count = 0u64;

        for mut item in items {
            let cid = item.cid.clone().ok_or_else(|| {
                StorageError::Fatal("item reached storage without a cid".to_string())
            })?;

            if let Some(existing) = tenant.items_by_cid.get(&cid) {
                debug!(%cid, "item already present, upsert is a no-op for dedupe accounting");
                item.id = existing.id;
            } else {
                item.id = Some(self.next_id.fetch_add(1, Ordering::Relaxed));
                tenant.items_in_order.push(cid.clone());
                new_count += 1;
            }
            tenant.items_by_cid.insert(cid, item);
        }

        Ok(new_count)
    }

    async fn get_item(
        &self,
        config_id: ConfigId,
        cid: &str,
    ) -> Result<Option<ContentItem>, StorageError> {
        Ok(self
            .tenants
            .get(&config_id)
            .and_then(|t| t.items_by_cid.get(cid).cloned()))
    }

    async fn get_items_between(
        &self,
        config_id: ConfigId,
        start_epoch: i64,
        end_epoch: i64,
    ) -> Result<Vec<ContentItem>, StorageError> {
        Ok(self
            .tenants
            .get(&config_id)
            .map(|t| {
                t.items_in_order
                    .iter()
                    .filter_map(|cid| t.items_by_cid.get(cid))
                    .filter(|item| item.date >= start_epoch && item.date <= end_epoch)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn save_summary(
        &self,
        config_id: ConfigId,
        summary: SummaryItem,
    ) -> Result<(), StorageError> {
        let mut tenant = self.tenants.entry(config_id).or_default();
        tenant
            .summaries
            .insert((summary.summary_type.clone(), summary.date), summary);
        Ok(())
    }

    async fn get_summary_between(
        &self,
        config_id: ConfigId,
        start_epoch: i64,
        end_epoch: i64,
    ) -> Result<Vec<SummaryItem>, StorageError> {
        Ok(self
            .tenants
            .get(&config_id)
            .map(|t| {
                t.summaries
                    .values()
                    .filter(|s| s.date >= start_epoch && s.date <= end_epoch)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_cursor(
        &self,
        config_id: ConfigId,
        cid: &str,
    ) -> Result<Option<Cursor>, StorageError> {
        Ok(self
            .tenants
            .get(&config_id)
            .and_then(|t| t.cursors.get(cid).cloned()))
    }

    async fn set_cursor(&self, cursor: Cursor) -> Result<(), StorageError> {
        let mut tenant = self.tenants.entry(cursor.config_id).or_default();
        tenant.cursors.insert(cursor.cid.clone(), cursor);
        Ok(())
    }

    async fn save_embedding(
        &self,
        config_id: ConfigId,
        cid: &str,
        vector: Vec<f32>,
    ) -> Result<(), StorageError> {
        self.set_embedding(config_id, cid, vector);
        Ok(())
    }

    async fn search_by_embedding(
        &self,
        config_id: ConfigId,
        query: EmbeddingQuery,
    ) -> Result<Vec<SimilarityMatch>, StorageError> {
        let tenant = match self.tenants.get(&config_id) {
            Some(t) => t,
            None => return Ok(Vec::new()),
        };

        let mut matches: Vec<SimilarityMatch> = tenant
            .embeddings
            .iter()
            .filter_map(|(cid, vector)| {
                let item = tenant.items_by_cid.get(cid)?;
                if let Some(t) = &query.filters.item_type {
                    if &item.item_type != t {
                        return None;
                    }
                }
                if let Some(s) = &query.filters.source {
                    if &item.source != s {
                        return None;
                    }
                }
                if let Some(from) = query.filters.date_from {
                    if item.date < from {
                        return None;
                    }
                }
                if let Some(to) = query.filters.date_to {
                    if item.date > to {
                        return None;
                    }
                }
                let similarity = cosine_similarity(&query.vector, vector);
                if similarity < query.threshold {
                    return None;
                }
                Some(SimilarityMatch {
                    item: item.clone(),
                    similarity,
                })
            })
            .collect();

        matches.sort_by(|a, b| b.similarity.partial_cmp(&a.similarity).unwrap());
        matches.truncate(query.limit);
        Ok(matches)
    }

    async fn topic_counts(
        &self,
        config_id: ConfigId,
        limit: usize,
    ) -> Result<Vec<TopicCount>, StorageError> {
        let tenant = match self.tenants.get(&config_id) {
            Some(t) => t,
            None => return Ok(Vec::new()),
        };

        let mut counts: HashMap<String, u64> = HashMap::new();
        for item in tenant.items_by_cid.values() {
            for topic in &item.topics {
                *counts.entry(topic.clone()).or_insert(0) += 1;
            }
        }

        let mut counts: Vec<TopicCount> = counts
            .into_iter()
            .map(|(topic, count)| TopicCount { topic, count })
            .collect();
        counts.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.topic.cmp(&b.topic)));
        counts.truncate(limit);
        Ok(counts)
    }

    async fn source_stats(&self, config_id: ConfigId) -> Result<Vec<SourceStat>, StorageError> {
        let tenant = match self.tenants.get(&config_id) {
            Some(t) => t,
            None => return Ok(Vec::new()),
        };

        let mut per_source: HashMap<String, (u64, Option<i64>)> = HashMap::new();
        for item in tenant.items_by_cid.values() {
            let entry = per_source.entry(item.source.clone()).or_insert((0, None));
            entry.0 += 1;
            entry.1 = Some(entry.1.map_or(item.date, |d| d.max(item.date)));
        }

        Ok(per_source
            .into_iter()
            .map(|(source, (item_count, last_fetch_at))| SourceStat {
                source,
                item_count,
                last_fetch_at,
            })
            .collect())
    }

    async fn date_range(&self, config_id: ConfigId) -> Result<DateRange, StorageError> {
        let tenant = match self.tenants.get(&config_id) {
            Some(t) => t,
            None => return Ok(DateRange { earliest: None, latest: None }),
        };

        let mut earliest = None;
        let mut latest = None;
        for item in tenant.items_by_cid.values() {
            earliest = Some(earliest.map_or(item.date, |e: i64| e.min(item.date)));
            latest = Some(latest.map_or(item.date, |l: i64| l.max(item.date)));
        }
        Ok(DateRange { earliest, latest })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::{HashMap as StdHashMap, HashSet};
    use uuid::Uuid;

    fn item(config_id: ConfigId, cid: &str, date: i64, topics: &[&str]) -> ContentItem {
        ContentItem {
            id: None,
            config_id,
            cid: Some(cid.to_string()),
            item_type: "test".to_string(),
            source: "testSource".to_string(),
            title: None,
            text: Some("hello world".to_string()),
            link: None,
            topics: topics.iter().map(|t| t.to_string()).collect::<HashSet<_>>(),
            date,
            metadata: StdHashMap::new(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn saving_the_same_cid_twice_does_not_duplicate() {
        let backend = MemoryStorageBackend::new();
        let config_id = ConfigId(Uuid::new_v4());

        let first = backend
            .save_items(config_id, vec![item(config_id, "abc", 1000, &["A"])])
            .await
            .unwrap();
        assert_eq!(first, 1);

        let second = backend
            .save_items(config_id, vec![item(config_id, "abc", 1000, &["A"])])
            .await
            .unwrap();
        assert_eq!(second, 0, "re-saving an existing cid must not count as new");

        let fetched = backend.get_item(config_id, "abc").await.unwrap();
        assert!(fetched.is_some());
    }

    #[tokio::test]
    async fn items_are_isolated_per_configuration() {
        let backend = MemoryStorageBackend::new();
        let config_a = ConfigId(Uuid::new_v4());
        let config_b = ConfigId(Uuid::new_v4());

        backend
            .save_items(config_a, vec![item(config_a, "shared-cid", 10, &[])])
            .await
            .unwrap();

        assert!(backend.get_item(config_b, "shared-cid").await.unwrap().is_none());
        assert!(backend.get_item(config_a, "shared-cid").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn topic_counts_rank_by_frequency() {
        let backend = MemoryStorageBackend::new();
        let config_id = ConfigId(Uuid::new_v4());
        backend
            .save_items(
                config_id,
                vec![
                    item(config_id, "1", 1, &["rust", "async"]),
                    item(config_id, "2", 2, &["rust"]),
                ],
            )
            .await
            .unwrap();

        let counts = backend.topic_counts(config_id, 10).await.unwrap();
        assert_eq!(counts[0].topic, "rust");
        assert_eq!(counts[0].count, 2);
    }
}
