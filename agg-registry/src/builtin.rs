//! Reference plugin implementations.
//!
//! Exist for pipeline tests, not for production use: a fixed-batch
//! source, a keyword-matching enricher, and a counting generator. Mirrors
//! the grounding workspace's practice of shipping a trivial in-tree
//! backend implementation (`aerolithdb-plugins` ships example storage
//! plugins for the same reason) alongside the trait definitions.

use crate::{
    AiProvider, CompletionOptions, EnricherPlugin, FetchBatch, GenerateWindow, GeneratorPlugin,
    ParameterField, PluginEntry, PluginError, PluginKind, SourcePlugin,
};
use agg_core::{ConfigId, ContentItem, SummaryItem};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::{HashMap, HashSet};

pub fn descriptors() -> Vec<PluginEntry> {
    vec![
        PluginEntry {
            kind: PluginKind::Source,
            plugin_name: "static".to_string(),
            description: "Returns a fixed batch of items; for tests only.".to_string(),
            hidden: true,
            platform_requirement: None,
            parameters: vec![ParameterField {
                name: "batchSize".to_string(),
                field_type: "number".to_string(),
                default: Some(Value::from(3)),
                is_secret: false,
                is_provider_reference: false,
            }],
        },
        PluginEntry {
            kind: PluginKind::Enricher,
            plugin_name: "topic-tagger".to_string(),
            description: "Tags items with topics from a keyword map.".to_string(),
            hidden: true,
            platform_requirement: None,
            parameters: vec![ParameterField {
                name: "keywords".to_string(),
                field_type: "object".to_string(),
                default: None,
                is_secret: false,
                is_provider_reference: false,
            }],
        },
        PluginEntry {
            kind: PluginKind::Generator,
            plugin_name: "digest".to_string(),
            description: "Counts items per type into a markdown digest.".to_string(),
            hidden: true,
            platform_requirement: None,
            parameters: vec![ParameterField {
                name: "intervalMs".to_string(),
                field_type: "number".to_string(),
                default: Some(Value::from(3_600_000u64)),
                is_secret: false,
                is_provider_reference: false,
            }],
        },
    ]
}

/// Fixed-batch source, useful for driving the pipeline without network
/// access in tests.
pub struct StaticSource;

#[async_trait]
impl SourcePlugin for StaticSource {
    async fn fetch_items(
        &self,
        params: &HashMap<String, Value>,
        _cursor: Option<&str>,
    ) -> Result<FetchBatch, PluginError> {
        let batch_size = params
            .get("batchSize")
            .and_then(Value::as_u64)
            .unwrap_or(3) as usize;

        let now = Utc::now().timestamp_millis();
        let items = (0..batch_size)
            .map(|i| ContentItem {
                id: None,
                config_id: ConfigId(uuid::Uuid::nil()),
                cid: None,
                item_type: "post".to_string(),
                source: "static".to_string(),
                title: Some(format!("Static item {i}")),
                text: Some(format!("Body of static item {i}")),
                link: None,
                topics: HashSet::new(),
                date: now,
                metadata: HashMap::new(),
                created_at: Utc::now(),
            })
            .collect();
        // Fixed-batch source, nothing to resume from; no cursor reported.
        Ok(FetchBatch { items, cursor: None })
    }
}

/// Tags items whose `text` contains a configured keyword with the
/// matching topic name. Declaration order of keywords is insertion order
/// of the JSON object, so results are deterministic for a given config.
pub struct TopicTagger;

#[async_trait]
impl EnricherPlugin for TopicTagger {
    async fn enrich(
        &self,
        mut items: Vec<ContentItem>,
        params: &HashMap<String, Value>,
    ) -> Result<Vec<ContentItem>, PluginError> {
        let keywords = params
            .get("keywords")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        for item in &mut items {
            let haystack = item.text.as_deref().unwrap_or("").to_lowercase();
            for (topic, keyword) in &keywords {
                if let Some(keyword) = keyword.as_str() {
                    if haystack.contains(&keyword.to_lowercase()) {
                        item.topics.insert(topic.clone());
                    }
                }
            }
        }
        Ok(items)
    }
}

/// Counts items per `item_type` in the window and renders a one-line
/// markdown digest per type.
pub struct DigestGenerator;

#[async_trait]
impl GeneratorPlugin for DigestGenerator {
    fn interval_ms(&self, params: &HashMap<String, Value>) -> u64 {
        params
            .get("intervalMs")
            .and_then(Value::as_u64)
            .unwrap_or(3_600_000)
    }

    async fn generate(
        &self,
        items: Vec<ContentItem>,
        window: GenerateWindow,
        _params: &HashMap<String, Value>,
    ) -> Result<SummaryItem, PluginError> {
        let mut counts: HashMap<String, u64> = HashMap::new();
        for item in &items {
            *counts.entry(item.item_type.clone()).or_insert(0) += 1;
        }

        let mut lines = vec!["# Digest".to_string()];
        let mut kinds: Vec<&String> = counts.keys().collect();
        kinds.sort();
        for kind in kinds {
            lines.push(format!("- {kind}: {}", counts[kind]));
        }

        let config_id = items
            .first()
            .map(|i| i.config_id)
            .unwrap_or(ConfigId(uuid::Uuid::nil()));

        Ok(SummaryItem {
            id: None,
            config_id,
            summary_type: "digest".to_string(),
            title: Some("Digest".to_string()),
            categories: Value::from(counts.keys().cloned().collect::<Vec<_>>()),
            markdown: lines.join("\n"),
            date: window.end_epoch,
            created_at: Utc::now(),
        })
    }
}

/// Stubbed platform AI provider, sufficient for tests that exercise the
/// `embed`-on-long-text pipeline path without a network call.
pub struct EchoAiProvider;

#[async_trait]
impl AiProvider for EchoAiProvider {
    async fn complete(&self, prompt: &str, _opts: CompletionOptions) -> Result<String, PluginError> {
        Ok(format!("echo: {prompt}"))
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, PluginError> {
        let hash = blake3::hash(text.as_bytes());
        let bytes = hash.as_bytes();
        Ok(bytes[..8].iter().map(|b| *b as f32 / 255.0).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_source_produces_requested_batch_size() {
        let source = StaticSource;
        let mut params = HashMap::new();
        params.insert("batchSize".to_string(), Value::from(5));
        let batch = source.fetch_items(&params, None).await.unwrap();
        assert_eq!(batch.items.len(), 5);
    }

    #[tokio::test]
    async fn topic_tagger_matches_case_insensitively() {
        let enricher = TopicTagger;
        let mut keywords = serde_json::Map::new();
        keywords.insert("rust".to_string(), Value::from("Rust"));
        let mut params = HashMap::new();
        params.insert("keywords".to_string(), Value::Object(keywords));

        let item = ContentItem {
            id: None,
            config_id: ConfigId(uuid::Uuid::nil()),
            cid: Some("a".to_string()),
            item_type: "post".to_string(),
            source: "static".to_string(),
            title: None,
            text: Some("I love rust programming".to_string()),
            link: None,
            topics: HashSet::new(),
            date: 0,
            metadata: HashMap::new(),
            created_at: Utc::now(),
        };

        let tagged = enricher.enrich(vec![item], &params).await.unwrap();
        assert!(tagged[0].topics.contains("rust"));
    }
}
