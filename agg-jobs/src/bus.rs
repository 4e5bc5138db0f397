//! # Status Bus
//!
//! Per-job topic plus a retained last-snapshot cell, the same pairing the
//! grounding workspace's `aerolithdb-api::websocket::ConnectionManager`
//! uses (a `broadcast` channel for fan-out, a retained cell so a new
//! subscriber gets the current state immediately rather than waiting for
//! the next event).

use agg_core::{ConfigId, Job, JobId, JobMode, JobState};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, trace};

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BusMessage {
    #[serde(rename = "status")]
    Status(Job),
    #[serde(rename = "error")]
    Error { job_id: JobId, message: String },
    #[serde(rename = "configChanged")]
    ConfigChanged { config_id: ConfigId },
    #[serde(rename = "jobStarted")]
    JobStarted { job_id: JobId },
}

/// Pub/sub for job lifecycle events. Global subscribers see every job's
/// events; job-specific subscribers only see events for one job id (plus
/// the immediate retained snapshot on subscribe).
pub struct StatusBus {
    channels: DashMap<JobId, broadcast::Sender<BusMessage>>,
    retained: DashMap<JobId, Job>,
    global: broadcast::Sender<BusMessage>,
}

impl StatusBus {
    pub fn new() -> Self {
        let (global, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            channels: DashMap::new(),
            retained: DashMap::new(),
            global,
        }
    }

    pub fn subscribe_job(&self, job_id: JobId) -> broadcast::Receiver<BusMessage> {
        self.channels
            .entry(job_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    pub fn subscribe_global(&self) -> broadcast::Receiver<BusMessage> {
        self.global.subscribe()
    }

    /// The last retained snapshot for a job, so a fresh subscriber can
    /// render current state without waiting on the next publish.
    pub fn snapshot(&self, job_id: JobId) -> Option<Job> {
        self.retained.get(&job_id).map(|e| e.value().clone())
    }

    pub fn publish_job_started(&self, job_id: JobId) {
        self.broadcast_to(job_id, BusMessage::JobStarted { job_id });
    }

    pub fn publish_error(&self, job_id: JobId, message: impl Into<String>) {
        self.broadcast_to(
            job_id,
            BusMessage::Error {
                job_id,
                message: message.into(),
            },
        );
    }

    pub fn publish_config_changed(&self, config_id: ConfigId) {
        let _ = self.global.send(BusMessage::ConfigChanged { config_id });
    }

    /// Applies the ordering and sticky-terminal rules before publishing:
    /// updates older than the retained snapshot are dropped, and once a
    /// once-mode job reaches a terminal state, later non-terminal updates
    /// for the same job id are ignored.
    pub fn publish_status(&self, job: Job) {
        if let Some(retained) = self.retained.get(&job.id) {
            if job.updated_at < retained.updated_at {
                trace!(job_id = %job.id, "dropping stale status update");
                return;
            }
            if retained.mode == JobMode::Once
                && retained.state.is_terminal()
                && !job.state.is_terminal()
            {
                trace!(job_id = %job.id, "dropping non-terminal update after sticky completion");
                return;
            }
        }

        self.retained.insert(job.id, job.clone());
        debug!(job_id = %job.id, state = ?job.state, "publishing status");
        self.broadcast_to(job.id, BusMessage::Status(job));
    }

    fn broadcast_to(&self, job_id: JobId, message: BusMessage) {
        if let Some(sender) = self.channels.get(&job_id) {
            let _ = sender.send(message.clone());
        }
        let _ = self.global.send(message);
    }

    /// Drops retained state and the per-job channel; call once a job's
    /// bounded late-status-replay window has elapsed.
    pub fn forget(&self, job_id: JobId) {
        self.channels.remove(&job_id);
        self.retained.remove(&job_id);
    }
}

impl Default for StatusBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agg_core::ConfigId;
    use uuid::Uuid;

    fn job(config_id: ConfigId, state: JobState, updated_at: u64) -> Job {
        let mut job = Job::new(config_id, JobMode::Once);
        job.state = state;
        job.updated_at = updated_at;
        job
    }

    #[test]
    fn stale_updates_are_dropped() {
        let bus = StatusBus::new();
        let config_id = ConfigId(Uuid::new_v4());
        let mut j = job(config_id, JobState::Running, 5);
        let job_id = j.id;
        bus.publish_status(j.clone());

        j.updated_at = 2;
        j.state = JobState::Failed;
        bus.publish_status(j);

        let snap = bus.snapshot(job_id).unwrap();
        assert_eq!(snap.state, JobState::Running, "older update must not win");
    }

    #[test]
    fn completed_once_job_is_sticky() {
        let bus = StatusBus::new();
        let config_id = ConfigId(Uuid::new_v4());
        let mut j = job(config_id, JobState::Completed, 10);
        let job_id = j.id;
        bus.publish_status(j.clone());

        j.updated_at = 11;
        j.state = JobState::Running;
        bus.publish_status(j);

        let snap = bus.snapshot(job_id).unwrap();
        assert_eq!(snap.state, JobState::Completed);
    }

    #[tokio::test]
    async fn new_subscriber_gets_retained_snapshot_via_snapshot_call() {
        let bus = StatusBus::new();
        let config_id = ConfigId(Uuid::new_v4());
        let j = job(config_id, JobState::Running, 1);
        let job_id = j.id;
        bus.publish_status(j);

        let mut rx = bus.subscribe_job(job_id);
        assert!(bus.snapshot(job_id).is_some());
        drop(rx);
        // subsequent publishes shouldn't panic even with no active receiver
        let mut j2 = job(config_id, JobState::Completed, 2);
        j2.id = job_id;
        bus.publish_status(j2);
        rx = bus.subscribe_job(job_id);
        let _ = rx.try_recv();
    }
}
