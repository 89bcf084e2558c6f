//! # Mesh Runtime Library
//!
//! Exposes the runtime's modules for tests. The entry point is the
//! `mesh-runtime` binary.
//!
//! ## Roles
//!
//! - **generator**: publishes a telemetry sample per metric every tick
//! - **historian**: keeps the recent samples of every metric
//! - **configuration**: turns configuration file changes into reload commands
//!
//! Every process also listens on the commands channel and acts on reload
//! commands addressed to its service name.

pub mod config;
pub mod generator;
pub mod handlers;
pub mod runtime;

pub use config::{RuntimeConfig, RuntimeConfigError, Roles};
pub use generator::{value_range, TelemetryGenerator, ValueRange};
pub use handlers::{
    ConfigurationChangeHandler, HistoricalSample, HistorianHandler, ReloadHandler,
    TelemetryHistory,
};
pub use runtime::MeshRuntime;
