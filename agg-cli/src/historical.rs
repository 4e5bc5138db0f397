//! Historical runner: drives `fetchHistorical` on one source plugin over
//! a date or inclusive date range, entirely in-process (no API server
//! involved), writing the resulting items to a file or stdout.

use agg_core::ConfigId;
use agg_core::JobStats;
use agg_pipeline::{run_historical_date, PipelineInputs, ResolvedSource};
use agg_registry::builtin;
use agg_storage::{MemoryStorageBackend, StorageBackend};
use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

pub struct HistoricalArgs {
    pub source: String,
    pub date: Option<i64>,
    pub after: Option<i64>,
    pub before: Option<i64>,
    pub output: Option<String>,
}

/// Exit codes per the historical CLI contract: 0 success, 1 configuration
/// error, 2 runtime fault, 3 cancelled (Ctrl-C between dates).
pub async fn run(args: HistoricalArgs) -> i32 {
    match run_inner(args).await {
        Ok(()) => 0,
        Err(err) => {
            if err.downcast_ref::<Cancelled>().is_some() {
                warn!("historical run cancelled");
                return 3;
            }
            error!(error = %err, "historical run failed");
            if err.downcast_ref::<ConfigurationError>().is_some() {
                1
            } else {
                2
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct ConfigurationError(String);

#[derive(Debug, thiserror::Error)]
#[error("cancelled")]
struct Cancelled;

fn resolve_source(plugin_name: &str) -> Result<Arc<dyn agg_registry::SourcePlugin>> {
    match plugin_name {
        "static" => Ok(Arc::new(builtin::StaticSource)),
        other => bail!(ConfigurationError(format!("unknown source plugin `{other}`"))),
    }
}

async fn run_inner(args: HistoricalArgs) -> Result<()> {
    let dates = dates_in_scope(&args)?;
    let plugin = resolve_source(&args.source)?;

    let config_id = ConfigId(Uuid::new_v4());
    let storage: Arc<dyn StorageBackend> = Arc::new(MemoryStorageBackend::new());
    let inputs = PipelineInputs {
        config_id,
        sources: vec![ResolvedSource {
            instance_name: args.source.clone(),
            params: HashMap::new(),
            plugin,
        }],
        enrichers: Vec::new(),
        generators: Vec::new(),
        ai: None,
        storage: storage.clone(),
        settings: agg_core::ConfigSettings::default(),
        fan_out: 1,
        embed_threshold_chars: usize::MAX,
        ai_skipped: true,
    };

    let cancelled = Arc::new(AtomicBool::new(false));
    let cancel_flag = cancelled.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel_flag.store(true, Ordering::SeqCst);
        }
    });

    let mut stats = JobStats::default();
    for date in &dates {
        if cancelled.load(Ordering::SeqCst) {
            bail!(Cancelled);
        }
        info!(source = %args.source, date, "driving historical fetch");
        run_historical_date(&inputs, *date, &mut stats)
            .await
            .with_context(|| format!("historical fetch failed for date {date}"))?;
    }
    if cancelled.load(Ordering::SeqCst) {
        bail!(Cancelled);
    }

    let window_start = *dates.iter().min().unwrap_or(&0);
    let window_end = *dates.iter().max().unwrap_or(&0) + 86_400;
    let items = storage
        .get_items_between(config_id, window_start, window_end)
        .await
        .context("reading back historical items")?;

    let rendered = serde_json::to_string_pretty(&items)?;
    match &args.output {
        Some(path) => std::fs::write(path, rendered).with_context(|| format!("writing {path}"))?,
        None => println!("{rendered}"),
    }

    info!(new_items = stats.new_items, total_fetched = stats.total_items_fetched, "historical run complete");
    Ok(())
}

fn dates_in_scope(args: &HistoricalArgs) -> Result<Vec<i64>> {
    if let Some(date) = args.date {
        return Ok(vec![date]);
    }
    match (args.after, args.before) {
        (Some(after), Some(before)) if after <= before => {
            let mut dates = Vec::new();
            let mut cursor = after;
            while cursor <= before {
                dates.push(cursor);
                cursor += 86_400;
            }
            Ok(dates)
        }
        (Some(_), Some(_)) => bail!(ConfigurationError("--after must not be later than --before".to_string())),
        _ => bail!(ConfigurationError("pass --date, or both --after and --before".to_string())),
    }
}
