//! Bridges the registry, pipeline, and job manager: resolves a
//! configuration's plugin declarations into the trait objects the
//! pipeline drives, then runs one-shot or continuous jobs to completion
//! (or cancellation), updating the job manager as it goes.

use agg_core::{ConfigId, Configuration, JobId, JobPhase, JobState, JobStats};
use agg_pipeline::{
    run_fetch_cycle, run_generators_once, GeneratorScheduler, PipelineInputs, ResolvedEnricher,
    ResolvedGenerator, ResolvedSource,
};
use agg_registry::{builtin, GenerateWindow};
use agg_security::resolve_parameters;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::state::AppState;

/// Resolves the compiled-in plugin implementation for a `pluginName`.
/// There is no dynamic loading in this runtime (see the registry crate's
/// docs); unresolvable names fail config validation before a job starts.
fn resolve_source(plugin_name: &str) -> Option<Arc<dyn agg_registry::SourcePlugin>> {
    match plugin_name {
        "static" => Some(Arc::new(builtin::StaticSource)),
        _ => None,
    }
}

fn resolve_enricher(plugin_name: &str) -> Option<Arc<dyn agg_registry::EnricherPlugin>> {
    match plugin_name {
        "topic-tagger" => Some(Arc::new(builtin::TopicTagger)),
        _ => None,
    }
}

fn resolve_generator(plugin_name: &str) -> Option<Arc<dyn agg_registry::GeneratorPlugin>> {
    match plugin_name {
        "digest" => Some(Arc::new(builtin::DigestGenerator)),
        _ => None,
    }
}

pub async fn build_inputs(
    state: &AppState,
    config: &Configuration,
) -> anyhow::Result<PipelineInputs> {
    let mut sources = Vec::new();
    for decl in &config.sources {
        let plugin = resolve_source(&decl.plugin_name)
            .ok_or_else(|| anyhow::anyhow!("unknown source plugin `{}`", decl.plugin_name))?;
        let params = resolve_parameters(&state.secrets, config.id, &decl.parameters)?;
        sources.push(ResolvedSource {
            instance_name: decl.name.clone(),
            params,
            plugin,
        });
    }

    let mut enrichers = Vec::new();
    for decl in &config.enrichers {
        let plugin = resolve_enricher(&decl.plugin_name)
            .ok_or_else(|| anyhow::anyhow!("unknown enricher plugin `{}`", decl.plugin_name))?;
        let params = resolve_parameters(&state.secrets, config.id, &decl.parameters)?;
        enrichers.push(ResolvedEnricher {
            instance_name: decl.name.clone(),
            params,
            plugin,
        });
    }

    let mut generators = Vec::new();
    for decl in &config.generators {
        let plugin = resolve_generator(&decl.plugin_name)
            .ok_or_else(|| anyhow::anyhow!("unknown generator plugin `{}`", decl.plugin_name))?;
        let params = resolve_parameters(&state.secrets, config.id, &decl.parameters)?;
        generators.push(ResolvedGenerator {
            instance_name: decl.name.clone(),
            params,
            interval_ms: decl.interval_ms.unwrap_or(3_600_000),
            plugin,
        });
    }

    let ai: Option<Arc<dyn agg_registry::AiProvider>> = if config.ai.is_empty() {
        None
    } else {
        Some(Arc::new(builtin::EchoAiProvider))
    };

    Ok(PipelineInputs {
        config_id: config.id,
        sources,
        enrichers,
        generators,
        ai,
        storage: state.storage_for(config.id),
        settings: config.settings.clone(),
        fan_out: 4,
        embed_threshold_chars: 280,
        ai_skipped: false,
    })
}

/// Drives a single fetch → enrich → store cycle, then (in `onlyGenerate`
/// or after the final batch) runs every declared generator once, and
/// finalizes the job.
pub async fn run_once_job(state: Arc<AppState>, config_id: ConfigId, job_id: JobId) {
    let _ = state.job_manager.set_phase(job_id, JobPhase::Connecting);

    let config = match state.configs.get(&config_id) {
        Some(c) => c.clone(),
        None => {
            state
                .job_manager
                .finish(job_id, JobState::Failed, Some("configuration not found".to_string()));
            return;
        }
    };

    let inputs = match build_inputs(&state, &config).await {
        Ok(inputs) => inputs,
        Err(err) => {
            error!(%config_id, error = %err, "failed to resolve plugins");
            state.job_manager.finish(job_id, JobState::Failed, Some(err.to_string()));
            return;
        }
    };

    let mut stats = JobStats::default();

    if !config.settings.only_generate {
        let mut phase = None;
        let result = run_fetch_cycle(&inputs, &mut stats, &mut phase).await;
        if let Some(phase) = phase {
            let _ = state.job_manager.set_phase(job_id, phase);
        }
        if let Err(err) = result {
            warn!(%config_id, error = %err, "fetch cycle failed");
            let _ = state.job_manager.merge_stats(job_id, stats);
            state.job_manager.finish(job_id, JobState::Failed, Some(err.to_string()));
            return;
        }
        let _ = state.job_manager.merge_stats(job_id, stats.clone());
    }

    if !config.settings.only_fetch {
        let _ = state.job_manager.set_phase(job_id, JobPhase::Generating);
        let now = chrono::Utc::now().timestamp();
        let window = GenerateWindow {
            start_epoch: now - 86_400,
            end_epoch: now,
        };
        if let Err(err) = run_generators_once(&inputs, window, &mut stats).await {
            warn!(%config_id, error = %err, "generator run failed");
        }
        let _ = state.job_manager.merge_stats(job_id, stats.clone());
    }

    state.quotas.increment_run_once(config.owner_id, job_id);
    if stats.ai_calls > 0 {
        state.quotas.increment_ai_calls(config.owner_id, job_id, stats.ai_calls as u32);
    }

    info!(%config_id, %job_id, "one-shot job completed");
    state.job_manager.finish(job_id, JobState::Completed, None);
}

/// Drives fetch cycles in a loop until cancelled, running due generators
/// after each cycle via a per-configuration `GeneratorScheduler`.
pub async fn run_continuous_job(state: Arc<AppState>, config_id: ConfigId, job_id: JobId) {
    let config = match state.configs.get(&config_id) {
        Some(c) => c.clone(),
        None => {
            state
                .job_manager
                .finish(job_id, JobState::Failed, Some("configuration not found".to_string()));
            return;
        }
    };

    let inputs = match build_inputs(&state, &config).await {
        Ok(inputs) => inputs,
        Err(err) => {
            state.job_manager.finish(job_id, JobState::Failed, Some(err.to_string()));
            return;
        }
    };

    let scheduler = GeneratorScheduler::new();

    loop {
        if state.job_manager.is_cancelled(job_id) {
            state.job_manager.finish(job_id, JobState::Cancelled, None);
            return;
        }

        let mut stats = JobStats::default();
        let _ = state.job_manager.set_phase(job_id, JobPhase::Fetching);
        let mut phase = None;
        let result = run_fetch_cycle(&inputs, &mut stats, &mut phase).await;
        if let Some(phase) = phase {
            let _ = state.job_manager.set_phase(job_id, phase);
        }
        if let Err(err) = result {
            warn!(%config_id, error = %err, "continuous fetch cycle failed");
            state.job_manager.finish(job_id, JobState::Failed, Some(err.to_string()));
            return;
        }

        if let Err(err) = scheduler.run_due_generators(&inputs, &mut stats).await {
            warn!(%config_id, error = %err, "scheduled generator run failed");
        }
        let _ = state.job_manager.merge_stats(job_id, stats);

        if state.job_manager.is_cancelled(job_id) {
            state.job_manager.finish(job_id, JobState::Cancelled, None);
            return;
        }
        let _ = state.job_manager.set_phase(job_id, JobPhase::Waiting);
        tokio::time::sleep(Duration::from_secs(30)).await;
    }
}
