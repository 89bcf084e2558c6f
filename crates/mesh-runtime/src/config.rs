//! # Runtime Configuration
//!
//! Unified configuration for one mesh process: broker settings, telemetry
//! settings and the roles this process plays.

use mesh_bus::{BrokerConfig, ConfigError};
use mesh_contracts::{channels, Subsystem, ALL_METRICS};
use mesh_telemetry::TelemetryConfig;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Default generation period (5 Hz).
pub const DEFAULT_GENERATION_INTERVAL: Duration = Duration::from_millis(200);

/// Default samples kept per metric by the historian.
pub const DEFAULT_HISTORY_RETENTION: usize = 1000;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum RuntimeConfigError {
    #[error("Broker configuration: {0}")]
    Broker(#[from] ConfigError),

    #[error("Unknown telemetry metric: {0}")]
    UnknownMetric(String),

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("No roles enabled")]
    NoRoles,
}

/// Roles a process can play.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Roles {
    /// Publish generated telemetry samples.
    pub generator: bool,
    /// Record telemetry samples.
    pub historian: bool,
    /// Turn configuration file changes into reload commands.
    pub configuration: bool,
}

impl Default for Roles {
    fn default() -> Self {
        Self {
            generator: true,
            historian: true,
            configuration: true,
        }
    }
}

impl Roles {
    /// Parse a comma-separated role list. Unknown names are ignored.
    pub fn parse(value: &str) -> Self {
        let mut roles = Self {
            generator: false,
            historian: false,
            configuration: false,
        };
        for role in value.split(',').map(|r| r.trim().to_lowercase()) {
            match role.as_str() {
                "generator" => roles.generator = true,
                "historian" => roles.historian = true,
                "configuration" => roles.configuration = true,
                _ => {}
            }
        }
        roles
    }

    pub fn any(&self) -> bool {
        self.generator || self.historian || self.configuration
    }
}

/// Complete process configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Broker settings shared by the publisher and dispatchers.
    pub broker: BrokerConfig,
    /// Logging and tracing.
    pub telemetry: TelemetryConfig,
    /// Roles this process plays.
    pub roles: Roles,
    /// Period between generated batches.
    pub generation_interval: Duration,
    /// Metrics the generator publishes.
    pub metrics: Vec<String>,
    /// Samples kept per metric by the historian.
    pub history_retention: usize,
    /// Services told to reload when a configuration file changes.
    pub reload_targets: Vec<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        let service_name = "event-mesh";
        Self {
            broker: BrokerConfig::for_service(service_name),
            telemetry: TelemetryConfig::for_service(service_name),
            roles: Roles::default(),
            generation_interval: DEFAULT_GENERATION_INTERVAL,
            metrics: ALL_METRICS.iter().map(|m| m.to_string()).collect(),
            history_retention: DEFAULT_HISTORY_RETENTION,
            reload_targets: vec![service_name.to_string()],
        }
    }
}

fn list(key: &str) -> Option<Vec<String>> {
    let value = env::var(key).ok()?;
    let items: Vec<String> = value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect();
    (!items.is_empty()).then_some(items)
}

impl RuntimeConfig {
    /// Load configuration from the environment.
    ///
    /// Broker and telemetry settings come from [`BrokerConfig::from_env`] and
    /// [`TelemetryConfig::from_env`]. In addition:
    ///
    /// - `MESH_ROLES`: Comma-separated roles (default: all)
    /// - `MESH_GENERATION_RATE_MS`: Generation period (default: 200)
    /// - `MESH_METRICS`: Metric names or subsystem names to generate (default: all)
    /// - `MESH_HISTORY_RETENTION`: Samples kept per metric (default: 1000)
    /// - `MESH_RELOAD_TARGETS`: Services to reload on configuration change
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let mut broker = BrokerConfig::from_env();
        let mut telemetry = TelemetryConfig::from_env();

        // One identity for logs and headers, whichever variable set it
        if env::var("MESH_SERVICE_NAME").is_err() {
            broker.service_name = telemetry.service_name.clone();
        } else if env::var("OTEL_SERVICE_NAME").is_err() {
            telemetry.service_name = broker.service_name.clone();
        }

        let metrics = list("MESH_METRICS")
            .map(|items| expand_metrics(&items))
            .unwrap_or(defaults.metrics);

        Self {
            reload_targets: list("MESH_RELOAD_TARGETS")
                .unwrap_or_else(|| vec![broker.service_name.clone()]),
            broker,
            telemetry,
            roles: env::var("MESH_ROLES")
                .map(|v| Roles::parse(&v))
                .unwrap_or_default(),
            generation_interval: env::var("MESH_GENERATION_RATE_MS")
                .ok()
                .and_then(|v| v.trim().parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.generation_interval),
            metrics,
            history_retention: env::var("MESH_HISTORY_RETENTION")
                .ok()
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(defaults.history_retention),
        }
    }

    /// Channels the dispatcher of this process listens on.
    pub fn subscribed_channels(&self) -> Vec<String> {
        let mut subscribed = self.broker.channels.clone();
        let mut add = |channel: &str| {
            if !subscribed.iter().any(|c| c == channel) {
                subscribed.push(channel.to_string());
            }
        };
        if self.roles.historian {
            add(channels::TELEMETRY);
        }
        if self.roles.configuration {
            add(channels::CONFIGURATION);
        }
        add(channels::COMMANDS);
        subscribed
    }

    pub fn validate(&self) -> Result<(), RuntimeConfigError> {
        self.broker.validate()?;
        if !self.roles.any() {
            return Err(RuntimeConfigError::NoRoles);
        }
        if self.generation_interval.is_zero() {
            return Err(RuntimeConfigError::Zero("generation_interval"));
        }
        if self.history_retention == 0 {
            return Err(RuntimeConfigError::Zero("history_retention"));
        }
        if let Some(unknown) = self.metrics.iter().find(|m| Subsystem::of(m).is_err()) {
            return Err(RuntimeConfigError::UnknownMetric(unknown.clone()));
        }
        Ok(())
    }
}

/// Subsystem names (`power`, `life_support`, ...) expand to their metrics.
fn expand_metrics(items: &[String]) -> Vec<String> {
    let mut metrics: Vec<String> = Vec::new();
    for item in items {
        let expanded: Vec<&str> = match Subsystem::ALL
            .into_iter()
            .find(|s| s.as_str().eq_ignore_ascii_case(item))
        {
            Some(subsystem) => subsystem.metrics().to_vec(),
            None => vec![item.as_str()],
        };
        for metric in expanded {
            if !metrics.iter().any(|m| m == metric) {
                metrics.push(metric.to_string());
            }
        }
    }
    metrics
}
