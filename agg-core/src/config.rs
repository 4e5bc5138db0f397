//! Process-wide configuration for the aggregation runtime.
//!
//! Settings are loaded from environment variables first, falling back to
//! conservative development defaults. Unlike the grounding database's
//! file-or-default `AerolithsConfig::load()`, this runtime's configuration
//! carries secret-bearing values (API keys, the symmetric secret key), so
//! environment variables are the primary source rather than a checked-in
//! JSON file.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tier-specific model identifiers and limits, sourced from environment
/// variables documented in the specification's external-interfaces section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeSettings {
    /// Platform database URL for the shared multi-tenant storage backend.
    pub platform_database_url: Option<String>,
    /// Platform AI provider API key, injected when a plugin declares
    /// `usePlatformAI`.
    pub platform_ai_api_key: Option<String>,
    pub free_tier_model: String,
    pub paid_tier_model: String,
    pub daily_ai_call_limit: u32,
    pub facilitator_url: String,
    pub platform_wallet: String,
    /// Integer percent, e.g. `250` for 2.5%, avoiding floating point in fee
    /// math; the fee is computed as `amount * percent / 10_000`.
    pub platform_fee_percent_bp: u32,
    /// Symmetric AEAD key for the secret store, base64-encoded, 32 bytes
    /// after decoding.
    pub secret_key_b64: Option<String>,
    /// Relay forwarding rate limit, requests per hour per user.
    pub relay_rate_limit_per_hour: u32,
    pub max_concurrent_jobs: usize,
    pub source_fan_out: usize,
    pub bind_address: String,
    pub port: u16,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            platform_database_url: None,
            platform_ai_api_key: None,
            free_tier_model: "gpt-4o-mini".to_string(),
            paid_tier_model: "gpt-4o".to_string(),
            daily_ai_call_limit: 500,
            facilitator_url: "https://facilitator.example.invalid".to_string(),
            platform_wallet: "platform-wallet-unset".to_string(),
            platform_fee_percent_bp: 250,
            secret_key_b64: None,
            relay_rate_limit_per_hour: 30,
            max_concurrent_jobs: 64,
            source_fan_out: 4,
            bind_address: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

impl RuntimeSettings {
    /// Load settings from environment variables, falling back to defaults
    /// for anything unset.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            platform_database_url: std::env::var("AGG_PLATFORM_DATABASE_URL").ok(),
            platform_ai_api_key: std::env::var("AGG_PLATFORM_AI_API_KEY").ok(),
            free_tier_model: std::env::var("AGG_FREE_TIER_MODEL")
                .unwrap_or(defaults.free_tier_model),
            paid_tier_model: std::env::var("AGG_PAID_TIER_MODEL")
                .unwrap_or(defaults.paid_tier_model),
            daily_ai_call_limit: std::env::var("AGG_DAILY_AI_CALL_LIMIT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.daily_ai_call_limit),
            facilitator_url: std::env::var("AGG_FACILITATOR_URL")
                .unwrap_or(defaults.facilitator_url),
            platform_wallet: std::env::var("AGG_PLATFORM_WALLET")
                .unwrap_or(defaults.platform_wallet),
            platform_fee_percent_bp: std::env::var("AGG_PLATFORM_FEE_BP")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.platform_fee_percent_bp),
            secret_key_b64: std::env::var("AGG_SECRET_KEY").ok(),
            relay_rate_limit_per_hour: std::env::var("AGG_RELAY_RATE_LIMIT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.relay_rate_limit_per_hour),
            max_concurrent_jobs: std::env::var("AGG_MAX_CONCURRENT_JOBS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_concurrent_jobs),
            source_fan_out: std::env::var("AGG_SOURCE_FAN_OUT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.source_fan_out),
            bind_address: std::env::var("AGG_BIND_ADDRESS").unwrap_or(defaults.bind_address),
            port: std::env::var("AGG_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.port),
        }
    }

    pub fn relay_execute_timeout(&self) -> Duration {
        Duration::from_secs(120)
    }

    pub fn relay_health_timeout(&self) -> Duration {
        Duration::from_secs(10)
    }

    pub fn relay_status_timeout(&self) -> Duration {
        Duration::from_secs(15)
    }

    pub fn payment_expiry(&self) -> Duration {
        Duration::from_secs(5 * 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_self_consistent() {
        let settings = RuntimeSettings::default();
        assert_eq!(settings.relay_rate_limit_per_hour, 30);
        assert_eq!(settings.payment_expiry(), Duration::from_secs(300));
    }
}
