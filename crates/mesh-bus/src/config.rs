//! # Broker Configuration
//!
//! Settings shared by the publisher and dispatchers of one service. Every
//! value has a default and can be overridden from the environment.

use crate::compression::CompressionConfig;
use crate::errors::ConfigError;
use crate::retry::RetryPolicy;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Complete broker configuration.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Identity stamped into every published header.
    pub service_name: String,
    /// Channels a dispatcher subscribes to.
    pub channels: Vec<String>,
    /// Handler retry policy.
    pub retry: RetryPolicy,
    /// Per-attempt processing timeout.
    pub handler_timeout: Duration,
    /// Maximum deliveries processed at once.
    pub max_concurrency: usize,
    /// Deliveries buffered between the transport callback and the workers.
    pub intake_capacity: usize,
    /// How long `stop()` waits for in-flight deliveries.
    pub shutdown_timeout: Duration,
    /// Payload compression.
    pub compression: CompressionConfig,
    /// Drop redeliveries of a `message_id` seen within this window. Disabled when `None`.
    pub dedupe_window: Option<Duration>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown-service".to_string(),
            channels: Vec::new(),
            retry: RetryPolicy::default(),
            handler_timeout: Duration::from_secs(30),
            max_concurrency: crate::DEFAULT_MAX_CONCURRENCY,
            intake_capacity: crate::DEFAULT_INTAKE_CAPACITY,
            shutdown_timeout: Duration::from_secs(30),
            compression: CompressionConfig::default(),
            dedupe_window: None,
        }
    }
}

fn parse_env<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn parse_millis(key: &str) -> Option<Duration> {
    parse_env::<u64>(key).map(Duration::from_millis)
}

impl BrokerConfig {
    /// Defaults with a service name.
    pub fn for_service(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Self::default()
        }
    }

    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `MESH_SERVICE_NAME`: Publisher identity (default: unknown-service)
    /// - `MESH_CHANNELS`: Comma-separated channels to subscribe to
    /// - `MESH_MAX_RETRIES`: Retries per handler (default: 3)
    /// - `MESH_INITIAL_BACKOFF_MS` / `MESH_MAX_BACKOFF_MS`: Backoff curve (default: 100 / 5000)
    /// - `MESH_HANDLER_TIMEOUT_MS`: Per-attempt timeout (default: 30000)
    /// - `MESH_MAX_CONCURRENCY`: Worker permits (default: 64)
    /// - `MESH_INTAKE_CAPACITY`: Intake queue size (default: 1000)
    /// - `MESH_SHUTDOWN_TIMEOUT_MS`: Drain budget on stop (default: 30000)
    /// - `MESH_COMPRESSION`: Enable zstd (default: true)
    /// - `MESH_COMPRESSION_LEVEL` / `MESH_COMPRESSION_THRESHOLD`: zstd level and minimum size
    /// - `MESH_DEDUPE_WINDOW_SECS`: Duplicate suppression window (default: disabled)
    ///
    /// Unset or unparsable values keep their defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let channels = env::var("MESH_CHANNELS")
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let retry = RetryPolicy {
            max_retries: parse_env("MESH_MAX_RETRIES").unwrap_or(defaults.retry.max_retries),
            initial_backoff: parse_millis("MESH_INITIAL_BACKOFF_MS")
                .unwrap_or(defaults.retry.initial_backoff),
            max_backoff: parse_millis("MESH_MAX_BACKOFF_MS").unwrap_or(defaults.retry.max_backoff),
            ..defaults.retry
        };

        let compression = CompressionConfig {
            enabled: env::var("MESH_COMPRESSION")
                .map(|v| v.to_lowercase() != "false" && v != "0")
                .unwrap_or(defaults.compression.enabled),
            level: parse_env("MESH_COMPRESSION_LEVEL").unwrap_or(defaults.compression.level),
            threshold: parse_env("MESH_COMPRESSION_THRESHOLD")
                .unwrap_or(defaults.compression.threshold),
            ..defaults.compression
        };

        Self {
            service_name: env::var("MESH_SERVICE_NAME").unwrap_or(defaults.service_name),
            channels,
            retry,
            handler_timeout: parse_millis("MESH_HANDLER_TIMEOUT_MS")
                .unwrap_or(defaults.handler_timeout),
            max_concurrency: parse_env("MESH_MAX_CONCURRENCY").unwrap_or(defaults.max_concurrency),
            intake_capacity: parse_env("MESH_INTAKE_CAPACITY").unwrap_or(defaults.intake_capacity),
            shutdown_timeout: parse_millis("MESH_SHUTDOWN_TIMEOUT_MS")
                .unwrap_or(defaults.shutdown_timeout),
            compression,
            dedupe_window: parse_env::<u64>("MESH_DEDUPE_WINDOW_SECS")
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
        }
    }

    /// Check values that would make the broker misbehave.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.trim().is_empty() {
            return Err(ConfigError::EmptyServiceName);
        }
        if self.max_concurrency == 0 {
            return Err(ConfigError::Zero {
                field: "max_concurrency",
            });
        }
        if self.intake_capacity == 0 {
            return Err(ConfigError::Zero {
                field: "intake_capacity",
            });
        }
        if self.handler_timeout.is_zero() {
            return Err(ConfigError::Zero {
                field: "handler_timeout",
            });
        }
        if !(1..=22).contains(&self.compression.level) {
            return Err(ConfigError::CompressionLevel(self.compression.level));
        }
        if self.retry.multiplier.is_nan() || self.retry.multiplier < 1.0 {
            return Err(ConfigError::BackoffMultiplier(self.retry.multiplier.to_string()));
        }
        Ok(())
    }
}
