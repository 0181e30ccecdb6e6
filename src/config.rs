// Copyright 2025 Cowboy AI, LLC.

//! Coordinator configuration
//!
//! Everything is injected; the binary builds one of these from environment
//! variables and hands it down. Defaults carry the platform conventions:
//! 30 s per step, 5 min per saga, three retries with exponential backoff,
//! 30 days of terminal retention.

use crate::failure::FailureConfig;
use crate::participant::RetryPolicy;
use std::time::Duration;

/// Tunable settings for the saga coordinator
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Name this service signs transitions and events with
    pub service_name: String,
    /// Address the HTTP surface binds to
    pub bind_addr: String,
    /// Per-step deadline, including transport retries
    pub step_timeout: Duration,
    /// Soft deadline for a whole saga, after which compensation is forced
    pub saga_deadline: Duration,
    /// Retry policy for participant transport faults
    pub retry: RetryPolicy,
    /// Partitions per event-log topic
    pub partition_count: u32,
    /// Shared secret gating the HTTP surface; `None` disables the check
    pub api_key: Option<String>,
    /// How long terminal sagas are retained before the sweep removes them
    pub retention_grace: Duration,
    /// Controlled failure injection settings
    pub failure: FailureConfig,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            service_name: "saga-coordinator".to_string(),
            bind_addr: "0.0.0.0:8080".to_string(),
            step_timeout: Duration::from_secs(30),
            saga_deadline: Duration::from_secs(300),
            retry: RetryPolicy::default(),
            partition_count: 4,
            api_key: None,
            retention_grace: Duration::from_secs(30 * 24 * 60 * 60),
            failure: FailureConfig::default(),
        }
    }
}

impl CoordinatorConfig {
    /// Build a configuration from `SAGA_*` environment variables,
    /// falling back to defaults for anything unset
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("SAGA_BIND_ADDR") {
            config.bind_addr = addr;
        }
        if let Ok(key) = std::env::var("SAGA_API_KEY") {
            if !key.is_empty() {
                config.api_key = Some(key);
            }
        }
        if let Some(ms) = env_u64("SAGA_STEP_TIMEOUT_MS") {
            config.step_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = env_u64("SAGA_DEADLINE_MS") {
            config.saga_deadline = Duration::from_millis(ms);
        }
        if let Some(n) = env_u64("SAGA_PARTITION_COUNT") {
            config.partition_count = n as u32;
        }
        if let Some(days) = env_u64("SAGA_RETENTION_DAYS") {
            config.retention_grace = Duration::from_secs(days * 24 * 60 * 60);
        }

        if let Ok(enabled) = std::env::var("SAGA_ENABLE_FAILURES") {
            config.failure.enable_failures = enabled == "1" || enabled.eq_ignore_ascii_case("true");
        }
        if let Some(p) = env_f64("SAGA_INSUFFICIENT_STOCK_PROBABILITY") {
            config.failure.insufficient_stock_probability = p;
        }
        if let Some(p) = env_f64("SAGA_PAYMENT_FAILURE_PROBABILITY") {
            config.failure.payment_failure_probability = p;
        }
        if let Some(p) = env_f64("SAGA_NETWORK_TIMEOUT_PROBABILITY") {
            config.failure.network_timeout_probability = p;
        }
        if let Some(p) = env_f64("SAGA_DATABASE_FAILURE_PROBABILITY") {
            config.failure.database_failure_probability = p;
        }
        if let Some(p) = env_f64("SAGA_SERVICE_UNAVAILABLE_PROBABILITY") {
            config.failure.service_unavailable_probability = p;
        }
        if let Some(ms) = env_u64("SAGA_FAILURE_DELAY_MS") {
            config.failure.failure_delay_ms = ms;
        }

        config
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok()?.parse().ok()
}

fn env_f64(name: &str) -> Option<f64> {
    std::env::var(name).ok()?.parse().ok()
}
