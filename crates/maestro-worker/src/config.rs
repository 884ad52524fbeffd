// Copyright (C) 2026 Maestro Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Worker configuration for connecting to the maestro backend.

use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{Result, WorkerError};

/// How a work item's orchestration version is matched against the
/// version this worker runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VersionMatchPolicy {
    /// Accept any version.
    #[default]
    None,
    /// Accept only an exact match with the worker's version.
    Strict,
    /// Accept the worker's version or any older one.
    CurrentOrOlder,
}

/// What to do with a work item whose version fails the match policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VersionFailureStrategy {
    /// Abandon the work item so another worker can claim it.
    #[default]
    Reject,
    /// Fail the orchestration with a structured version-mismatch error.
    Fail,
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Backend address (default: "127.0.0.1:8701")
    pub server_addr: SocketAddr,
    /// Server name for TLS verification (default: "localhost")
    pub server_name: String,
    /// Skip TLS certificate verification (default: false, use true for dev)
    pub skip_cert_verification: bool,
    /// Connection timeout in milliseconds (default: 10_000)
    pub connect_timeout_ms: u64,
    /// Version string advertised in the capability handshake and used by
    /// the version match policy.
    pub worker_version: String,
    /// Maximum orchestration work items the backend may deliver
    /// concurrently (default: 100)
    pub max_concurrent_orchestration_work_items: u32,
    /// Maximum activity work items (default: 100)
    pub max_concurrent_activity_work_items: u32,
    /// Maximum entity batches (default: 100)
    pub max_concurrent_entity_work_items: u32,
    /// History cache capacity in bytes (default: 64 MB)
    pub cache_capacity_bytes: usize,
    /// How often the cache sweeps for stale entries (default: 60s)
    pub cache_sweep_period: Duration,
    /// Entries untouched longer than this are evicted by the sweep
    /// (default: 300s)
    pub cache_stale_threshold: Duration,
    /// Work-stream idle timeout; a stream with no traffic for this long
    /// is torn down and re-established (default: 60s)
    pub stream_idle_timeout: Duration,
    /// Fixed delay before reconnecting after a transport failure
    /// (default: 5s)
    pub reconnect_delay: Duration,
    /// Orchestration version matching policy (default: None)
    pub version_match_policy: VersionMatchPolicy,
    /// What to do on a version mismatch (default: Reject)
    pub version_failure_strategy: VersionFailureStrategy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:8701".parse().unwrap(),
            server_name: "localhost".to_string(),
            skip_cert_verification: false,
            connect_timeout_ms: 10_000,
            worker_version: String::new(),
            max_concurrent_orchestration_work_items: 100,
            max_concurrent_activity_work_items: 100,
            max_concurrent_entity_work_items: 100,
            cache_capacity_bytes: 64 * 1024 * 1024,
            cache_sweep_period: Duration::from_secs(60),
            cache_stale_threshold: Duration::from_secs(300),
            stream_idle_timeout: Duration::from_secs(60),
            reconnect_delay: Duration::from_secs(5),
            version_match_policy: VersionMatchPolicy::None,
            version_failure_strategy: VersionFailureStrategy::Reject,
        }
    }
}

impl WorkerConfig {
    /// Load configuration from environment variables.
    ///
    /// # Optional Environment Variables
    /// - `MAESTRO_SERVER_ADDR` - Backend address (default: "127.0.0.1:8701")
    /// - `MAESTRO_SERVER_NAME` - Server name for TLS (default: "localhost")
    /// - `MAESTRO_SKIP_CERT_VERIFICATION` - Skip TLS verification (default: false)
    /// - `MAESTRO_CONNECT_TIMEOUT_MS` - Connection timeout (default: 10000)
    /// - `MAESTRO_WORKER_VERSION` - Advertised worker version (default: empty)
    /// - `MAESTRO_MAX_ORCHESTRATION_WORK_ITEMS` - Concurrency limit (default: 100)
    /// - `MAESTRO_MAX_ACTIVITY_WORK_ITEMS` - Concurrency limit (default: 100)
    /// - `MAESTRO_MAX_ENTITY_WORK_ITEMS` - Concurrency limit (default: 100)
    /// - `MAESTRO_CACHE_CAPACITY_BYTES` - History cache size (default: 67108864)
    /// - `MAESTRO_CACHE_SWEEP_PERIOD_MS` - Staleness sweep period (default: 60000)
    /// - `MAESTRO_CACHE_STALE_THRESHOLD_MS` - Staleness threshold (default: 300000)
    /// - `MAESTRO_STREAM_IDLE_TIMEOUT_MS` - Work-stream idle timeout (default: 60000)
    /// - `MAESTRO_RECONNECT_DELAY_MS` - Reconnect backoff (default: 5000)
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let server_addr = env::var("MAESTRO_SERVER_ADDR")
            .unwrap_or_else(|_| defaults.server_addr.to_string())
            .parse()
            .map_err(|e| WorkerError::Config(format!("invalid MAESTRO_SERVER_ADDR: {}", e)))?;

        let server_name =
            env::var("MAESTRO_SERVER_NAME").unwrap_or_else(|_| defaults.server_name.clone());

        let skip_cert_verification = env::var("MAESTRO_SKIP_CERT_VERIFICATION")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        let worker_version = env::var("MAESTRO_WORKER_VERSION").unwrap_or_default();

        let config = Self {
            server_addr,
            server_name,
            skip_cert_verification,
            connect_timeout_ms: env_u64("MAESTRO_CONNECT_TIMEOUT_MS", defaults.connect_timeout_ms),
            worker_version,
            max_concurrent_orchestration_work_items: env_u32(
                "MAESTRO_MAX_ORCHESTRATION_WORK_ITEMS",
                defaults.max_concurrent_orchestration_work_items,
            ),
            max_concurrent_activity_work_items: env_u32(
                "MAESTRO_MAX_ACTIVITY_WORK_ITEMS",
                defaults.max_concurrent_activity_work_items,
            ),
            max_concurrent_entity_work_items: env_u32(
                "MAESTRO_MAX_ENTITY_WORK_ITEMS",
                defaults.max_concurrent_entity_work_items,
            ),
            cache_capacity_bytes: env_u64(
                "MAESTRO_CACHE_CAPACITY_BYTES",
                defaults.cache_capacity_bytes as u64,
            ) as usize,
            cache_sweep_period: env_duration_ms(
                "MAESTRO_CACHE_SWEEP_PERIOD_MS",
                defaults.cache_sweep_period,
            ),
            cache_stale_threshold: env_duration_ms(
                "MAESTRO_CACHE_STALE_THRESHOLD_MS",
                defaults.cache_stale_threshold,
            ),
            stream_idle_timeout: env_duration_ms(
                "MAESTRO_STREAM_IDLE_TIMEOUT_MS",
                defaults.stream_idle_timeout,
            ),
            reconnect_delay: env_duration_ms("MAESTRO_RECONNECT_DELAY_MS", defaults.reconnect_delay),
            version_match_policy: defaults.version_match_policy,
            version_failure_strategy: defaults.version_failure_strategy,
        };

        config.validate()?;
        Ok(config)
    }

    /// Create a configuration for local development: connects to
    /// `127.0.0.1:8701` and skips TLS certificate verification.
    pub fn localhost() -> Self {
        Self {
            skip_cert_verification: true,
            ..Default::default()
        }
    }

    /// Set the backend address.
    pub fn with_server_addr(mut self, addr: SocketAddr) -> Self {
        self.server_addr = addr;
        self
    }

    /// Set the server name for TLS verification.
    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = name.into();
        self
    }

    /// Skip TLS certificate verification (for development only!).
    pub fn with_skip_cert_verification(mut self, skip: bool) -> Self {
        self.skip_cert_verification = skip;
        self
    }

    /// Set the advertised worker version.
    pub fn with_worker_version(mut self, version: impl Into<String>) -> Self {
        self.worker_version = version.into();
        self
    }

    /// Set the history cache capacity in bytes.
    pub fn with_cache_capacity_bytes(mut self, capacity: usize) -> Self {
        self.cache_capacity_bytes = capacity;
        self
    }

    /// Set the cache staleness sweep period and threshold.
    pub fn with_cache_staleness(mut self, sweep_period: Duration, stale_threshold: Duration) -> Self {
        self.cache_sweep_period = sweep_period;
        self.cache_stale_threshold = stale_threshold;
        self
    }

    /// Set the work-stream idle timeout.
    pub fn with_stream_idle_timeout(mut self, timeout: Duration) -> Self {
        self.stream_idle_timeout = timeout;
        self
    }

    /// Set the fixed reconnect delay.
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Set the version matching policy and failure strategy.
    pub fn with_versioning(
        mut self,
        policy: VersionMatchPolicy,
        strategy: VersionFailureStrategy,
    ) -> Self {
        self.version_match_policy = policy;
        self.version_failure_strategy = strategy;
        self
    }

    /// Validate invariants that would otherwise surface as panics deep
    /// inside the runtime.
    pub fn validate(&self) -> Result<()> {
        if self.cache_capacity_bytes == 0 {
            return Err(WorkerError::Config(
                "cache_capacity_bytes must be positive".to_string(),
            ));
        }
        if self.cache_sweep_period.is_zero() {
            return Err(WorkerError::Config(
                "cache_sweep_period must be positive".to_string(),
            ));
        }
        if self.cache_stale_threshold.is_zero() {
            return Err(WorkerError::Config(
                "cache_stale_threshold must be positive".to_string(),
            ));
        }
        if self.stream_idle_timeout.is_zero() {
            return Err(WorkerError::Config(
                "stream_idle_timeout must be positive".to_string(),
            ));
        }
        if self.version_match_policy != VersionMatchPolicy::None && self.worker_version.is_empty() {
            return Err(WorkerError::Config(
                "worker_version is required when a version match policy is set".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(name: &str, default: u32) -> u32 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_duration_ms(name: &str, default: Duration) -> Duration {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn localhost_config() {
        let config = WorkerConfig::localhost();
        assert!(config.skip_cert_verification);
        assert_eq!(config.server_addr, "127.0.0.1:8701".parse().unwrap());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builder_pattern() {
        let config = WorkerConfig::default()
            .with_server_addr("192.168.1.1:8000".parse().unwrap())
            .with_skip_cert_verification(true)
            .with_worker_version("2.1.0")
            .with_cache_capacity_bytes(1024)
            .with_stream_idle_timeout(Duration::from_secs(30))
            .with_versioning(VersionMatchPolicy::Strict, VersionFailureStrategy::Fail);

        assert_eq!(config.server_addr, "192.168.1.1:8000".parse().unwrap());
        assert_eq!(config.worker_version, "2.1.0");
        assert_eq!(config.cache_capacity_bytes, 1024);
        assert_eq!(config.stream_idle_timeout, Duration::from_secs(30));
        assert_eq!(config.version_match_policy, VersionMatchPolicy::Strict);
        assert_eq!(
            config.version_failure_strategy,
            VersionFailureStrategy::Fail
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.stream_idle_timeout, Duration::from_secs(60));
        assert_eq!(config.reconnect_delay, Duration::from_secs(5));
        assert_eq!(config.version_match_policy, VersionMatchPolicy::None);
        assert_eq!(
            config.version_failure_strategy,
            VersionFailureStrategy::Reject
        );
    }

    #[test]
    fn validate_rejects_zero_capacity() {
        let config = WorkerConfig::default().with_cache_capacity_bytes(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_requires_version_with_policy() {
        let config = WorkerConfig::default()
            .with_versioning(VersionMatchPolicy::Strict, VersionFailureStrategy::Reject);
        assert!(config.validate().is_err());

        let config = config.with_worker_version("1.0.0");
        assert!(config.validate().is_ok());
    }
}
