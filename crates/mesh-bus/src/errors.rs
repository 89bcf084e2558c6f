//! # Error Types
//!
//! Error taxonomy of the broker. Publish-path errors are returned to the
//! caller; dispatch-path errors are isolated per delivery and only logged.

use thiserror::Error;

/// Conflicting type registration. A configuration bug, fatal at startup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The name is already bound to a different payload type.
    #[error("Message type '{name}' is already registered to {existing}, cannot bind {requested}")]
    DuplicateName {
        name: String,
        existing: &'static str,
        requested: &'static str,
    },

    /// The payload type is already bound to a different name.
    #[error("Payload type {rust_type} is already registered as '{existing}', cannot bind '{requested}'")]
    DuplicateType {
        rust_type: &'static str,
        existing: String,
        requested: String,
    },

    /// Message type names must be non-blank.
    #[error("Message type name must not be empty")]
    EmptyName,
}

/// Envelope encode/decode failures.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The envelope could not be turned into bytes.
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// The bytes are malformed, truncated or do not match the payload shape.
    #[error("Deserialization failed: {0}")]
    Deserialization(String),
}

/// Failures reported by the backing transport.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The write to a channel failed.
    #[error("Publish to channel '{channel}' failed: {reason}")]
    PublishFailed { channel: String, reason: String },

    /// Subscribing to a channel failed.
    #[error("Subscribe to channel '{channel}' failed: {reason}")]
    SubscribeFailed { channel: String, reason: String },

    /// The transport has been shut down.
    #[error("Transport closed")]
    Closed,
}

/// Errors surfaced synchronously to a publisher's caller.
#[derive(Debug, Error)]
pub enum PublishError {
    /// The payload type was never registered, so no consumer could route it.
    #[error("Unregistered payload type: {rust_type}")]
    UnregisteredType { rust_type: &'static str },

    /// Channel names must be non-blank.
    #[error("Invalid channel name: '{0}'")]
    InvalidChannel(String),

    /// The envelope could not be encoded.
    #[error(transparent)]
    Serialization(#[from] CodecError),

    /// The transport write failed. Not retried by the publisher.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl PublishError {
    /// Short label for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::UnregisteredType { .. } => "unregistered_type",
            Self::InvalidChannel(_) => "invalid_channel",
            Self::Serialization(_) => "serialization",
            Self::Transport(_) => "transport",
        }
    }
}

/// Failure of a single handler attempt. Always subject to the retry policy.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Business logic reported a failure.
    #[error("Handler failed: {0}")]
    Failed(String),

    /// The attempt exceeded the per-message processing timeout.
    #[error("Handler timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The handler panicked.
    #[error("Handler panicked: {0}")]
    Panicked(String),

    /// Any other error from application code.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl HandlerError {
    /// Convenience constructor for business failures.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }

    /// Short label for metrics.
    pub fn outcome(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "timeout",
            Self::Panicked(_) => "panic",
            Self::Failed(_) | Self::Other(_) => "failure",
        }
    }
}

/// Dispatcher configuration and lifecycle errors.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The requested transition is not valid from the current state.
    #[error("Invalid dispatcher state: cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    /// A handler was registered for a payload type the registry does not know.
    #[error("Handler registered for unregistered payload type: {rust_type}")]
    UnregisteredType { rust_type: &'static str },

    /// The dispatcher has nothing to listen to.
    #[error("Dispatcher has no channels configured")]
    NoChannels,

    /// Invalid broker configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Subscribing on the transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Invalid broker configuration values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Service name must not be empty")]
    EmptyServiceName,

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("zstd compression level {0} is out of range (1..=22)")]
    CompressionLevel(i32),

    #[error("Backoff multiplier must be >= 1.0, got {0}")]
    BackoffMultiplier(String),
}
