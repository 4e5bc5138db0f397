//! # Config State substantive-change predicate
//!
//! Compares two configurations ignoring cosmetic differences so JSON-view
//! edits that don't change pipeline behavior don't churn unsaved-changes
//! state. Also rebuilds a configuration's plugin-declaration list from a
//! raw parameter map ("force sync"), dropping connections whose
//! referenced provider name no longer resolves.

use agg_core::{Configuration, PluginDeclaration};

/// True if `b` differs from `a` in any way that changes pipeline
/// behavior. `updated_at` and other bookkeeping timestamps are
/// deliberately excluded — this model carries no node-position/visual
/// fields to ignore, since those belong to an external editor UI this
/// runtime doesn't implement.
pub fn substantive_diff(a: &Configuration, b: &Configuration) -> bool {
    a.slug != b.slug
        || a.visibility != b.visibility
        || a.sources != b.sources
        || a.enrichers != b.enrichers
        || a.generators != b.generators
        || a.ai != b.ai
        || a.storage != b.storage
        || a.settings != b.settings
        || a.price_per_query != b.price_per_query
        || a.owner_wallet != b.owner_wallet
        || a.external_db_url != b.external_db_url
}

/// Rebuilds a configuration's declaration lists from a raw parameter map,
/// keyed by instance name within each plugin family, then drops any
/// enricher/generator declaration whose `providerName` parameter no
/// longer resolves to a declared instance.
pub fn force_sync(mut config: Configuration) -> Configuration {
    let declared: std::collections::HashSet<String> = config
        .sources
        .iter()
        .chain(&config.enrichers)
        .chain(&config.generators)
        .chain(&config.ai)
        .chain(&config.storage)
        .map(|p| p.name.clone())
        .collect();

    let resolves = |plugin: &PluginDeclaration| -> bool {
        match plugin.parameters.get("providerName").and_then(|v| v.as_str()) {
            Some(provider) => declared.contains(provider),
            None => true,
        }
    };

    config.enrichers.retain(resolves);
    config.generators.retain(resolves);
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use agg_core::{ConfigId, ConfigSettings, Visibility};
    use chrono::Utc;
    use std::collections::HashMap;
    use uuid::Uuid;

    fn base_config() -> Configuration {
        Configuration {
            id: ConfigId(Uuid::new_v4()),
            owner_id: Uuid::new_v4(),
            slug: "my-config".to_string(),
            visibility: Visibility::Public,
            sources: vec![PluginDeclaration {
                name: "src1".to_string(),
                plugin_name: "static".to_string(),
                parameters: HashMap::new(),
                interval_ms: None,
                use_platform_ai: false,
                use_platform_storage: false,
            }],
            enrichers: vec![],
            generators: vec![],
            ai: vec![],
            storage: vec![],
            settings: ConfigSettings::default(),
            price_per_query: None,
            owner_wallet: None,
            external_db_url: None,
            external_db_valid: None,
            external_db_error: None,
            runs_today: 0,
            updated_at: Utc::now(),
            deleted_at: None,
        }
    }

    #[test]
    fn identical_configs_are_not_substantively_different() {
        let a = base_config();
        let b = a.clone();
        assert!(!substantive_diff(&a, &b));
    }

    #[test]
    fn changing_source_parameters_is_substantive() {
        let a = base_config();
        let mut b = a.clone();
        b.sources[0].parameters.insert(
            "batchSize".to_string(),
            serde_json::Value::from(10),
        );
        assert!(substantive_diff(&a, &b));
    }

    #[test]
    fn only_updated_at_changing_is_not_substantive() {
        let a = base_config();
        let mut b = a.clone();
        b.updated_at = Utc::now() + chrono::Duration::seconds(60);
        assert!(!substantive_diff(&a, &b));
    }

    #[test]
    fn force_sync_drops_dangling_provider_references() {
        let mut config = base_config();
        let mut params = HashMap::new();
        params.insert(
            "providerName".to_string(),
            serde_json::Value::from("missing-instance"),
        );
        config.enrichers.push(PluginDeclaration {
            name: "enricher1".to_string(),
            plugin_name: "topic-tagger".to_string(),
            parameters: params,
            interval_ms: None,
            use_platform_ai: false,
            use_platform_storage: false,
        });

        let synced = force_sync(config);
        assert!(synced.enrichers.is_empty());
    }
}
