//! # Historian
//!
//! Keeps the most recent samples per metric. The store is registered as a
//! dispatcher resource; [`HistorianHandler`] finds it through the message
//! context.

use async_trait::async_trait;
use mesh_bus::{HandlerError, MessageContext, MessageHandler};
use mesh_contracts::TelemetryDataPublished;
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use tracing::trace;

/// One recorded sample.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoricalSample {
    pub value: f64,
    pub ust_unix_ms: i64,
    /// `message_id` of the delivery that carried the sample.
    pub message_id: String,
}

/// Bounded per-metric sample history.
pub struct TelemetryHistory {
    retention: usize,
    samples: RwLock<HashMap<String, VecDeque<HistoricalSample>>>,
}

impl TelemetryHistory {
    /// Keep at most `retention` samples per metric (minimum 1).
    pub fn new(retention: usize) -> Self {
        Self {
            retention: retention.max(1),
            samples: RwLock::new(HashMap::new()),
        }
    }

    pub fn retention(&self) -> usize {
        self.retention
    }

    /// Append a sample, evicting the oldest when full.
    pub fn record(&self, metric: &str, sample: HistoricalSample) {
        let mut samples = self.samples.write();
        let history = samples
            .entry(metric.to_string())
            .or_insert_with(|| VecDeque::with_capacity(self.retention.min(64)));
        if history.len() == self.retention {
            history.pop_front();
        }
        history.push_back(sample);
    }

    pub fn latest(&self, metric: &str) -> Option<HistoricalSample> {
        self.samples.read().get(metric).and_then(|h| h.back().cloned())
    }

    /// Samples of `metric`, oldest first.
    pub fn history(&self, metric: &str) -> Vec<HistoricalSample> {
        self.samples
            .read()
            .get(metric)
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Samples of `metric` taken within `[from_ms, to_ms]`.
    pub fn range(&self, metric: &str, from_ms: i64, to_ms: i64) -> Vec<HistoricalSample> {
        self.samples
            .read()
            .get(metric)
            .map(|h| {
                h.iter()
                    .filter(|s| s.ust_unix_ms >= from_ms && s.ust_unix_ms <= to_ms)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Metrics with at least one sample.
    pub fn metric_count(&self) -> usize {
        self.samples.read().len()
    }

    /// Samples held across all metrics.
    pub fn sample_count(&self) -> usize {
        self.samples.read().values().map(VecDeque::len).sum()
    }
}

/// Records telemetry samples into the [`TelemetryHistory`] resource.
pub struct HistorianHandler;

#[async_trait]
impl MessageHandler<TelemetryDataPublished> for HistorianHandler {
    async fn handle(
        &self,
        message: &TelemetryDataPublished,
        context: &MessageContext,
    ) -> Result<(), HandlerError> {
        let history = context
            .resource::<TelemetryHistory>()
            .ok_or_else(|| HandlerError::failed("telemetry history store not registered"))?;

        history.record(
            &message.name,
            HistoricalSample {
                value: message.value,
                ust_unix_ms: message.ust_unix_ms,
                message_id: context.header().message_id().to_string(),
            },
        );
        trace!(metric = %message.name, value = message.value, "Sample recorded");
        Ok(())
    }
}
