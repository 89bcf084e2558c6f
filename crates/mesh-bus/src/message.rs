//! # Message Payloads
//!
//! Every payload that travels on the mesh implements [`Message`]. The
//! category is advisory: it is stamped into header metadata on publish so
//! consumers and operators can see intent without decoding the payload.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;

/// Metadata key holding the category name.
pub const CATEGORY_KEY: &str = "category";
/// Metadata key holding a command's target.
pub const TARGET_ID_KEY: &str = "target-id";
/// Metadata key holding an event's aggregate id.
pub const AGGREGATE_ID_KEY: &str = "aggregate-id";
/// Metadata key holding an event's aggregate type.
pub const AGGREGATE_TYPE_KEY: &str = "aggregate-type";

/// Intent of a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageCategory {
    /// Asks one target to do something.
    Command { target_id: String },
    /// Records something that happened to an aggregate.
    Event {
        aggregate_id: String,
        aggregate_type: String,
    },
    /// Plain information, no particular addressee.
    Notification,
}

impl MessageCategory {
    /// Name stored under [`CATEGORY_KEY`].
    pub fn name(&self) -> &'static str {
        match self {
            Self::Command { .. } => "command",
            Self::Event { .. } => "event",
            Self::Notification => "notification",
        }
    }

    /// Write the category tags into header metadata.
    pub fn stamp(&self, metadata: &mut BTreeMap<String, String>) {
        metadata.insert(CATEGORY_KEY.to_string(), self.name().to_string());
        match self {
            Self::Command { target_id } => {
                metadata.insert(TARGET_ID_KEY.to_string(), target_id.clone());
            }
            Self::Event {
                aggregate_id,
                aggregate_type,
            } => {
                metadata.insert(AGGREGATE_ID_KEY.to_string(), aggregate_id.clone());
                metadata.insert(AGGREGATE_TYPE_KEY.to_string(), aggregate_type.clone());
            }
            Self::Notification => {}
        }
    }
}

/// A payload that can be registered, published and handled.
///
/// Serialization is positional MessagePack, so field order is part of the
/// wire contract: append new fields at the end with `#[serde(default)]`.
pub trait Message: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Intent of this instance. Defaults to a notification.
    fn category(&self) -> MessageCategory {
        MessageCategory::Notification
    }
}
