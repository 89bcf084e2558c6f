//! Cross-crate integration flows.

pub mod codec_properties;
pub mod dispatch_flows;
pub mod fixtures;
pub mod runtime_flows;
