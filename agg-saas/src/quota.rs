//! # Tier & Quota
//!
//! Tier-keyed policy table plus per-user usage counters, following
//! `aerolithdb-tenant::quota::QuotaManager`'s shape (a static policy table,
//! a usage map, and idempotent increment-on-completion hooks) narrowed to
//! this system's four quotas.

use chrono::Utc;
use dashmap::{DashMap, DashSet};
use std::collections::HashMap;
use tracing::{debug, warn};
use uuid::Uuid;

use agg_core::JobId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    Free,
    Paid,
    Admin,
}

#[derive(Debug, Clone)]
pub struct QuotaPolicy {
    pub max_configs: u32,
    pub max_one_shot_runs_per_day: u32,
    pub daily_platform_ai_calls: u32,
    pub permitted_model: String,
}

fn default_policies() -> HashMap<Tier, QuotaPolicy> {
    let mut policies = HashMap::new();
    policies.insert(
        Tier::Free,
        QuotaPolicy {
            max_configs: 3,
            max_one_shot_runs_per_day: 10,
            daily_platform_ai_calls: 50,
            permitted_model: "gpt-4o-mini".to_string(),
        },
    );
    policies.insert(
        Tier::Paid,
        QuotaPolicy {
            max_configs: 50,
            max_one_shot_runs_per_day: 500,
            daily_platform_ai_calls: 5_000,
            permitted_model: "gpt-4o".to_string(),
        },
    );
    policies.insert(
        Tier::Admin,
        QuotaPolicy {
            max_configs: u32::MAX,
            max_one_shot_runs_per_day: u32::MAX,
            daily_platform_ai_calls: u32::MAX,
            permitted_model: "gpt-4o".to_string(),
        },
    );
    policies
}

#[derive(Debug, Clone, Default)]
struct UserUsage {
    day: i64,
    runs_today: u32,
    ai_calls_today: u32,
}

/// Idempotency tokens recorded per (user, job, hook) so a retried
/// completion handler cannot double-count quota usage.
type IncrementToken = (Uuid, JobId, &'static str);

pub struct QuotaManager {
    policies: HashMap<Tier, QuotaPolicy>,
    usage: DashMap<Uuid, UserUsage>,
    applied: DashSet<IncrementToken>,
}

impl QuotaManager {
    pub fn new() -> Self {
        Self {
            policies: default_policies(),
            usage: DashMap::new(),
            applied: DashSet::new(),
        }
    }

    fn policy(&self, tier: Tier) -> &QuotaPolicy {
        self.policies.get(&tier).expect("every tier has a policy")
    }

    pub fn permitted_model(&self, tier: Tier) -> &str {
        &self.policy(tier).permitted_model
    }

    /// Resets daily counters if the stored usage predates today (UTC),
    /// matching the grounding workspace's roll-the-window-forward pattern
    /// for daily quota buckets.
    fn usage_today(&self, user_id: Uuid) -> dashmap::mapref::one::RefMut<'_, Uuid, UserUsage> {
        let today = Utc::now().timestamp() / 86_400;
        let mut entry = self.usage.entry(user_id).or_default();
        if entry.day != today {
            entry.day = today;
            entry.runs_today = 0;
            entry.ai_calls_today = 0;
        }
        entry
    }

    pub fn can_create_config(&self, tier: Tier, current_config_count: u32) -> bool {
        current_config_count < self.policy(tier).max_configs
    }

    pub fn can_run_once(&self, user_id: Uuid, tier: Tier) -> bool {
        self.usage_today(user_id).runs_today < self.policy(tier).max_one_shot_runs_per_day
    }

    pub fn can_use_platform_ai(&self, user_id: Uuid, tier: Tier) -> bool {
        self.usage_today(user_id).ai_calls_today < self.policy(tier).daily_platform_ai_calls
    }

    /// Called on successful job completion, never on start, so a job that
    /// fails before completing does not consume the daily run cap.
    pub fn increment_run_once(&self, user_id: Uuid, job_id: JobId) {
        if !self.applied.insert((user_id, job_id, "run_once")) {
            debug!(%job_id, "run-once increment already applied, skipping");
            return;
        }
        self.usage_today(user_id).runs_today += 1;
    }

    pub fn increment_ai_calls(&self, user_id: Uuid, job_id: JobId, count: u32) {
        if !self.applied.insert((user_id, job_id, "ai_calls")) {
            debug!(%job_id, "ai-calls increment already applied, skipping");
            return;
        }
        self.usage_today(user_id).ai_calls_today += count;
    }

    pub fn warn_if_near_limit(&self, user_id: Uuid, tier: Tier) {
        let usage = self.usage_today(user_id);
        let policy = self.policy(tier);
        if usage.ai_calls_today >= policy.daily_platform_ai_calls.saturating_sub(5) {
            warn!(%user_id, "approaching daily platform-AI call limit");
        }
    }
}

impl Default for QuotaManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_tier_config_cap_is_enforced() {
        let manager = QuotaManager::new();
        assert!(manager.can_create_config(Tier::Free, 2));
        assert!(!manager.can_create_config(Tier::Free, 3));
    }

    #[test]
    fn run_once_increment_is_idempotent_per_job() {
        let manager = QuotaManager::new();
        let user_id = Uuid::new_v4();
        let job_id = JobId::new();

        manager.increment_run_once(user_id, job_id);
        manager.increment_run_once(user_id, job_id);

        assert_eq!(manager.usage_today(user_id).runs_today, 1);
    }

    #[test]
    fn admin_tier_is_effectively_unbounded() {
        let manager = QuotaManager::new();
        let user_id = Uuid::new_v4();
        assert!(manager.can_run_once(user_id, Tier::Admin));
        assert!(manager.can_use_platform_ai(user_id, Tier::Admin));
    }
}
