//! Shared application state threaded through every handler, assembled
//! once at startup the way the grounding workspace's `AppState` wires
//! `RESTAPIv1`/`RealtimeAPI` to the node's shared subsystems.

use agg_core::{ConfigId, Configuration, RuntimeSettings};
use agg_jobs::{JobManager, StatusBus};
use agg_registry::PluginRegistry;
use agg_saas::QuotaManager;
use agg_security::SharedSecretStore;
use agg_storage::{MemoryStorageBackend, StorageBackend};
use dashmap::DashMap;
use std::sync::Arc;

use crate::payment::{FacilitatorClient, ReqwestFacilitatorClient};
use crate::relay::RelayLimiter;
use crate::webhook::WebhookBuffer;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<RuntimeSettings>,
    pub job_manager: Arc<JobManager>,
    pub bus: Arc<StatusBus>,
    pub quotas: Arc<QuotaManager>,
    pub secrets: SharedSecretStore,
    pub registry: Arc<PluginRegistry>,
    pub configs: Arc<DashMap<ConfigId, Configuration>>,
    pub shared_storage: Arc<MemoryStorageBackend>,
    pub external_storage: Arc<DashMap<ConfigId, Arc<dyn StorageBackend>>>,
    pub payments: Arc<DashMap<String, agg_core::Payment>>,
    pub relay_limiter: RelayLimiter,
    pub webhook_buffer: Arc<WebhookBuffer>,
    pub facilitator: Arc<dyn FacilitatorClient>,
}

impl AppState {
    pub fn new(settings: RuntimeSettings, secrets: SharedSecretStore) -> Self {
        let bus = Arc::new(StatusBus::new());
        let max_concurrent_jobs = settings.max_concurrent_jobs;
        let relay_limiter = RelayLimiter::new(settings.relay_rate_limit_per_hour);
        Self {
            settings: Arc::new(settings),
            job_manager: Arc::new(JobManager::new(max_concurrent_jobs, bus.clone())),
            bus,
            quotas: Arc::new(QuotaManager::new()),
            secrets,
            registry: Arc::new(PluginRegistry::bootstrap()),
            configs: Arc::new(DashMap::new()),
            shared_storage: Arc::new(MemoryStorageBackend::new()),
            external_storage: Arc::new(DashMap::new()),
            payments: Arc::new(DashMap::new()),
            relay_limiter,
            webhook_buffer: Arc::new(WebhookBuffer::new()),
            facilitator: Arc::new(ReqwestFacilitatorClient::new()),
        }
    }

    /// Resolves the storage backend a configuration should use: its own
    /// external backend if configured and valid, otherwise the shared
    /// multi-tenant backend.
    pub fn storage_for(&self, config_id: ConfigId) -> Arc<dyn StorageBackend> {
        if let Some(backend) = self.external_storage.get(&config_id) {
            return backend.clone();
        }
        self.shared_storage.clone()
    }
}
