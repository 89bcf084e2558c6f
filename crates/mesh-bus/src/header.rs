//! # Message Header
//!
//! Transport metadata carried in front of every payload. Field order is the
//! wire tag order and must not change:
//!
//! | Tag | Field |
//! |-----|-------|
//! | 0 | message_type |
//! | 1 | message_id |
//! | 2 | correlation_id |
//! | 3 | causation_id |
//! | 4 | timestamp_unix_ms |
//! | 5 | source_service |
//! | 6 | schema_version |
//! | 7 | metadata |
//!
//! Tags 6 and 7 default when absent so envelopes from older producers still
//! decode.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Schema version used when a producer does not set one.
pub const DEFAULT_SCHEMA_VERSION: i32 = 1;

fn default_schema_version() -> i32 {
    DEFAULT_SCHEMA_VERSION
}

/// Immutable per-envelope header.
///
/// Built once by the publisher and never mutated afterwards; the `with_*`
/// methods consume the header and are meant for construction only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHeader {
    message_type: String,
    message_id: String,
    correlation_id: String,
    causation_id: Option<String>,
    timestamp_unix_ms: i64,
    source_service: String,
    #[serde(default = "default_schema_version")]
    schema_version: i32,
    #[serde(default)]
    metadata: Option<BTreeMap<String, String>>,
}

impl MessageHeader {
    /// Fresh header for a chain root: new message and correlation ids, now.
    pub fn new(message_type: impl Into<String>, source_service: impl Into<String>) -> Self {
        Self {
            message_type: message_type.into(),
            message_id: Uuid::new_v4().to_string(),
            correlation_id: Uuid::new_v4().to_string(),
            causation_id: None,
            timestamp_unix_ms: Utc::now().timestamp_millis(),
            source_service: source_service.into(),
            schema_version: DEFAULT_SCHEMA_VERSION,
            metadata: None,
        }
    }

    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = message_id.into();
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }

    pub fn with_causation_id(mut self, causation_id: Option<String>) -> Self {
        self.causation_id = causation_id;
        self
    }

    pub fn with_timestamp_unix_ms(mut self, timestamp_unix_ms: i64) -> Self {
        self.timestamp_unix_ms = timestamp_unix_ms;
        self
    }

    pub fn with_schema_version(mut self, schema_version: i32) -> Self {
        self.schema_version = schema_version;
        self
    }

    /// Replace the metadata map. An empty map is stored as absent.
    pub fn with_metadata(mut self, metadata: BTreeMap<String, String>) -> Self {
        self.metadata = (!metadata.is_empty()).then_some(metadata);
        self
    }

    pub fn message_type(&self) -> &str {
        &self.message_type
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn causation_id(&self) -> Option<&str> {
        self.causation_id.as_deref()
    }

    pub fn timestamp_unix_ms(&self) -> i64 {
        self.timestamp_unix_ms
    }

    /// Creation time, if the stored timestamp is representable.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.timestamp_unix_ms).single()
    }

    pub fn source_service(&self) -> &str {
        &self.source_service
    }

    pub fn schema_version(&self) -> i32 {
        self.schema_version
    }

    pub fn metadata(&self) -> Option<&BTreeMap<String, String>> {
        self.metadata.as_ref()
    }

    /// Single metadata value.
    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata
            .as_ref()
            .and_then(|m| m.get(key))
            .map(String::as_str)
    }

    /// Name of the first required field that is blank, if any.
    ///
    /// `message_type`, `message_id`, `correlation_id` and `source_service`
    /// must always be present.
    pub fn missing_field(&self) -> Option<&'static str> {
        [
            ("message_type", &self.message_type),
            ("message_id", &self.message_id),
            ("correlation_id", &self.correlation_id),
            ("source_service", &self.source_service),
        ]
        .into_iter()
        .find(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
    }
}
