//! # Configuration Contracts
//!
//! The configuration service announces file changes as events; services that
//! depend on a file are told to reload with a command.

use mesh_bus::{Message, MessageCategory};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Aggregate type stamped on configuration file events.
pub const CONFIGURATION_FILE_AGGREGATE: &str = "ConfigurationFile";

/// What happened to a configuration file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigurationChange {
    Created,
    Updated,
    Deleted,
}

/// A configuration file was created, updated or deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationFileChanged {
    pub configuration_file_id: Uuid,
    pub name: String,
    pub path: String,
    pub version: i32,
    pub is_active: bool,
    pub change: ConfigurationChange,
}

impl Message for ConfigurationFileChanged {
    fn category(&self) -> MessageCategory {
        MessageCategory::Event {
            aggregate_id: self.configuration_file_id.to_string(),
            aggregate_type: CONFIGURATION_FILE_AGGREGATE.to_string(),
        }
    }
}

/// Ask one service to reload its configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReloadConfiguration {
    pub target_service: String,
    pub reason: String,
}

impl Message for ReloadConfiguration {
    fn category(&self) -> MessageCategory {
        MessageCategory::Command {
            target_id: self.target_service.clone(),
        }
    }
}
