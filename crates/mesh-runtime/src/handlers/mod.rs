//! Message handlers hosted by the runtime.

pub mod configuration;
pub mod historian;

pub use configuration::{ConfigurationChangeHandler, ReloadHandler};
pub use historian::{HistoricalSample, HistorianHandler, TelemetryHistory};
