//! Generator scheduling for continuous-mode jobs.
//!
//! Each generator declares an interval; in continuous mode the scheduler
//! invokes any generator whose time since last run has reached that
//! interval. A generator executes under a per-configuration lock so two
//! runs can never overlap, mirroring the pipeline's other per-configuration
//! serialization point (storage writes).

use crate::{run_generators_once, PipelineError, PipelineInputs};
use agg_core::{ConfigId, JobStats};
use agg_registry::GenerateWindow;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

pub struct GeneratorScheduler {
    last_run: DashMap<(ConfigId, String), Instant>,
    locks: DashMap<ConfigId, Arc<Mutex<()>>>,
}

impl GeneratorScheduler {
    pub fn new() -> Self {
        Self {
            last_run: DashMap::new(),
            locks: DashMap::new(),
        }
    }

    fn lock_for(&self, config_id: ConfigId) -> Arc<Mutex<()>> {
        self.locks
            .entry(config_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Runs every generator whose interval has elapsed since its last run.
    /// Used after a fetch cycle in continuous mode.
    pub async fn run_due_generators(
        &self,
        inputs: &PipelineInputs,
        stats: &mut JobStats,
    ) -> Result<(), PipelineError> {
        let lock = self.lock_for(inputs.config_id);
        let _guard = lock.lock().await;

        let now_instant = Instant::now();
        let now_epoch = Utc::now().timestamp();

        for generator in &inputs.generators {
            let key = (inputs.config_id, generator.instance_name.clone());
            let due = match self.last_run.get(&key) {
                Some(last) => now_instant.duration_since(*last) >= Duration::from_millis(generator.interval_ms),
                None => true,
            };

            if !due {
                continue;
            }

            debug!(generator = %generator.instance_name, "generator due, running");
            let window = GenerateWindow {
                start_epoch: now_epoch - (generator.interval_ms as i64 / 1000).max(60),
                end_epoch: now_epoch,
            };

            let single = PipelineInputs {
                config_id: inputs.config_id,
                sources: Vec::new(),
                enrichers: Vec::new(),
                generators: vec![singleton(generator)],
                ai: inputs.ai.clone(),
                storage: inputs.storage.clone(),
                settings: inputs.settings.clone(),
                fan_out: inputs.fan_out,
                embed_threshold_chars: inputs.embed_threshold_chars,
                ai_skipped: inputs.ai_skipped,
            };
            run_generators_once(&single, window, stats).await?;
            self.last_run.insert(key, now_instant);
        }

        Ok(())
    }

    /// Runs every declared generator exactly once, ignoring intervals.
    /// Used for one-shot jobs after the final fetch batch.
    pub async fn run_all_once(
        &self,
        inputs: &PipelineInputs,
        window: GenerateWindow,
        stats: &mut JobStats,
    ) -> Result<(), PipelineError> {
        let lock = self.lock_for(inputs.config_id);
        let _guard = lock.lock().await;
        run_generators_once(inputs, window, stats).await
    }
}

impl Default for GeneratorScheduler {
    fn default() -> Self {
        Self::new()
    }
}

fn singleton(generator: &crate::ResolvedGenerator) -> crate::ResolvedGenerator {
    crate::ResolvedGenerator {
        instance_name: generator.instance_name.clone(),
        params: generator.params.clone(),
        interval_ms: generator.interval_ms,
        plugin: generator.plugin.clone(),
    }
}
