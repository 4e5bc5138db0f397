//! # Job Manager
//!
//! Lifecycle state machine, cancellation, and concurrency caps. Enforces:
//! at most one active job per configuration; a global cap on concurrently
//! running jobs (`tokio::sync::Semaphore`); cooperative cancellation via a
//! shared flag the pipeline checks between phases.
//!
//! The per-configuration single-writer guard uses the same shape as the
//! grounding workspace's guarded-singleton-resource pattern: a map from
//! resource key to a marker, checked-and-inserted atomically via
//! `DashMap::entry`.

use agg_core::{ConfigId, Job, JobId, JobMode, JobPhase, JobStats, JobState};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{info, warn};

use crate::StatusBus;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("configuration {0} already has an active job")]
    ConfigurationBusy(ConfigId),
    #[error("global concurrent job limit reached")]
    ConcurrencyLimitReached,
    #[error("job {0} not found")]
    NotFound(JobId),
}

struct ActiveJob {
    job: Job,
    cancel: Arc<AtomicBool>,
    _permit: OwnedSemaphorePermit,
}

pub struct JobManager {
    active: DashMap<JobId, ActiveJob>,
    active_by_config: DashMap<ConfigId, JobId>,
    semaphore: Arc<Semaphore>,
    bus: Arc<StatusBus>,
}

impl JobManager {
    pub fn new(max_concurrent_jobs: usize, bus: Arc<StatusBus>) -> Self {
        Self {
            active: DashMap::new(),
            active_by_config: DashMap::new(),
            semaphore: Arc::new(Semaphore::new(max_concurrent_jobs)),
            bus,
        }
    }

    /// Reserves a concurrency slot and the configuration's single-writer
    /// lock, then returns the freshly queued job. Quota checks (daily run
    /// caps, AI exhaustion) are the caller's responsibility — they happen
    /// in `agg-saas` before this is called, since quota is a property of
    /// the user/tier, not of job scheduling.
    pub async fn start_job(&self, config_id: ConfigId, mode: JobMode) -> Result<JobId, JobError> {
        if self.active_by_config.contains_key(&config_id) {
            return Err(JobError::ConfigurationBusy(config_id));
        }

        let permit = self
            .semaphore
            .clone()
            .try_acquire_owned()
            .map_err(|_| JobError::ConcurrencyLimitReached)?;

        let mut job = Job::new(config_id, mode);
        job.state = JobState::Running;
        job.updated_at = 1;
        let job_id = job.id;

        self.active_by_config.insert(config_id, job_id);
        self.active.insert(
            job_id,
            ActiveJob {
                job: job.clone(),
                cancel: Arc::new(AtomicBool::new(false)),
                _permit: permit,
            },
        );

        info!(job_id = %job_id, config_id = %config_id, "job started");
        self.bus.publish_job_started(job_id);
        self.bus.publish_status(job);
        Ok(job_id)
    }

    pub fn cancel(&self, job_id: JobId) -> Result<(), JobError> {
        let entry = self.active.get(&job_id).ok_or(JobError::NotFound(job_id))?;
        entry.cancel.store(true, Ordering::SeqCst);
        info!(job_id = %job_id, "cancellation requested");
        Ok(())
    }

    pub fn is_cancelled(&self, job_id: JobId) -> bool {
        self.active
            .get(&job_id)
            .map(|e| e.cancel.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    pub fn snapshot(&self, job_id: JobId) -> Option<Job> {
        self.active.get(&job_id).map(|e| e.job.clone())
    }

    /// Bumps the job's logical clock and publishes an updated snapshot.
    /// Called by whatever drives the pipeline loop after each phase
    /// transition or stats update.
    pub fn update(
        &self,
        job_id: JobId,
        f: impl FnOnce(&mut Job),
    ) -> Result<Job, JobError> {
        let mut entry = self.active.get_mut(&job_id).ok_or(JobError::NotFound(job_id))?;
        f(&mut entry.job);
        entry.job.updated_at += 1;
        let snapshot = entry.job.clone();
        drop(entry);
        self.bus.publish_status(snapshot.clone());
        Ok(snapshot)
    }

    pub fn set_phase(&self, job_id: JobId, phase: JobPhase) -> Result<Job, JobError> {
        self.update(job_id, |job| job.phase = Some(phase))
    }

    pub fn merge_stats(&self, job_id: JobId, stats: JobStats) -> Result<Job, JobError> {
        self.update(job_id, |job| job.stats = stats)
    }

    /// Finalizes a job to a terminal state, releasing its concurrency slot
    /// and single-writer lock. Continuous jobs call this only when
    /// actually stopped (cancelled or faulted); once jobs call it at the
    /// end of their single cycle.
    pub fn finish(&self, job_id: JobId, final_state: JobState, last_error: Option<String>) {
        if !final_state.is_terminal() {
            warn!(job_id = %job_id, ?final_state, "finish called with non-terminal state");
            return;
        }

        if let Some((_, active)) = self.active.remove(&job_id) {
            self.active_by_config.remove(&active.job.config_id);
            let mut job = active.job;
            job.state = final_state;
            job.last_error = last_error;
            job.updated_at += 1;
            info!(job_id = %job_id, state = ?final_state, "job finished");
            self.bus.publish_status(job);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn only_one_active_job_per_configuration() {
        let bus = Arc::new(StatusBus::new());
        let manager = JobManager::new(8, bus);
        let config_id = ConfigId(Uuid::new_v4());

        let first = manager.start_job(config_id, JobMode::Once).await.unwrap();
        let second = manager.start_job(config_id, JobMode::Once).await;
        assert!(matches!(second, Err(JobError::ConfigurationBusy(_))));

        manager.finish(first, JobState::Completed, None);
        let third = manager.start_job(config_id, JobMode::Once).await;
        assert!(third.is_ok(), "slot frees up after finish");
    }

    #[tokio::test]
    async fn concurrency_cap_is_enforced() {
        let bus = Arc::new(StatusBus::new());
        let manager = JobManager::new(1, bus);
        let config_a = ConfigId(Uuid::new_v4());
        let config_b = ConfigId(Uuid::new_v4());

        manager.start_job(config_a, JobMode::Once).await.unwrap();
        let second = manager.start_job(config_b, JobMode::Once).await;
        assert!(matches!(second, Err(JobError::ConcurrencyLimitReached)));
    }

    #[tokio::test]
    async fn cancellation_flag_is_observable() {
        let bus = Arc::new(StatusBus::new());
        let manager = JobManager::new(8, bus);
        let config_id = ConfigId(Uuid::new_v4());
        let job_id = manager.start_job(config_id, JobMode::Once).await.unwrap();

        assert!(!manager.is_cancelled(job_id));
        manager.cancel(job_id).unwrap();
        assert!(manager.is_cancelled(job_id));
    }
}
