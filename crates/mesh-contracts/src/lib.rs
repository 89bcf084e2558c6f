//! # Mesh Contracts
//!
//! Message types shared by the services on the mesh, the channels they
//! travel on, and their wire names.
//!
//! ## Channels
//!
//! | Channel | Messages |
//! |---|---|
//! | [`channels::TELEMETRY`] | [`TelemetryDataPublished`] |
//! | [`channels::CONFIGURATION`] | [`ConfigurationFileChanged`] |
//! | [`channels::COMMANDS`] | [`ReloadConfiguration`] |
//!
//! Every process calls [`register_contracts`] once at start-up, before any
//! publisher or dispatcher is built.

pub mod configuration;
pub mod telemetry;

pub use configuration::{
    ConfigurationChange, ConfigurationFileChanged, ReloadConfiguration,
    CONFIGURATION_FILE_AGGREGATE,
};
pub use telemetry::{Subsystem, TelemetryDataPublished, ALL_METRICS};

use mesh_bus::{RegistryError, TypeRegistry};
use thiserror::Error;

/// Channel names.
pub mod channels {
    pub const TELEMETRY: &str = "telemetry";
    pub const CONFIGURATION: &str = "configuration";
    pub const COMMANDS: &str = "commands";

    pub const ALL: [&str; 3] = [TELEMETRY, CONFIGURATION, COMMANDS];
}

/// Wire names.
pub mod wire_names {
    pub const TELEMETRY_DATA_PUBLISHED: &str = "TelemetryDataPublished";
    pub const CONFIGURATION_FILE_CHANGED: &str = "ConfigurationFileChanged";
    pub const RELOAD_CONFIGURATION: &str = "ReloadConfiguration";
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ContractError {
    #[error("Unknown telemetry metric: {0}")]
    UnknownMetric(String),
}

/// Register every contract under its wire name.
///
/// Calling it again on the same registry is a no-op.
///
/// # Errors
///
/// `RegistryError` if a wire name is already bound to another type.
pub fn register_contracts(registry: &TypeRegistry) -> Result<(), RegistryError> {
    registry.try_register::<TelemetryDataPublished>(wire_names::TELEMETRY_DATA_PUBLISHED)?;
    registry.try_register::<ConfigurationFileChanged>(wire_names::CONFIGURATION_FILE_CHANGED)?;
    registry.try_register::<ReloadConfiguration>(wire_names::RELOAD_CONFIGURATION)?;
    Ok(())
}
