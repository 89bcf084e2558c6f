//! # Mesh Bus - Typed Messaging over a Pluggable Transport
//!
//! Services exchange typed commands, events and notifications as
//! self-describing envelopes. The bus owns serialization, routing, context
//! propagation and retries; the transport only moves opaque bytes between
//! named channels.
//!
//! ## Message Flow
//!
//! ```text
//! ┌──────────────┐                               ┌──────────────┐
//! │  Service A   │                               │  Service B   │
//! │  Publisher   │  encode()                     │  Dispatcher  │
//! │              │ ──────┐                       │   handlers   │
//! └──────────────┘       │                       └──────────────┘
//!                        ▼                               ↑
//!                  ┌──────────────┐   peek → route →    │
//!                  │  Transport   │ ────────────────────┘
//!                  │  (channels)  │   decode → handle
//!                  └──────────────┘
//! ```
//!
//! ## Envelope
//!
//! - **Header:** wire name, ids, causality, timestamp, source, schema version, metadata
//! - **Payload:** msgpack, zstd-compressed above a size threshold
//! - **Peek:** the header is read without touching the payload
//!
//! ## Causality
//!
//! A publish made while handling a message inherits its `correlation_id` and
//! records its `message_id` as `causation_id`. Handlers get the current
//! delivery through [`MessageContext`] or [`ContextAccessor::current`].

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod codec;
pub mod compression;
pub mod config;
pub mod context;
pub mod dedupe;
pub mod dispatcher;
pub mod errors;
pub mod handler;
pub mod header;
pub mod message;
pub mod publisher;
pub mod registry;
pub mod retry;
pub mod transport;

// Re-export main types
pub use codec::{EnvelopeCodec, MessageEnvelope, PeekedHeader};
pub use compression::CompressionConfig;
pub use config::BrokerConfig;
pub use context::{ContextAccessor, MessageContext, Resources};
pub use dispatcher::{Dispatcher, DispatcherBuilder, DispatcherState};
pub use errors::{
    CodecError, ConfigError, DispatchError, HandlerError, PublishError, RegistryError,
    TransportError,
};
pub use handler::{handler_fn, HandlerRegistry, MessageHandler};
pub use header::{MessageHeader, DEFAULT_SCHEMA_VERSION};
pub use message::{Message, MessageCategory};
pub use publisher::{PublishOptions, Publisher};
pub use registry::{PayloadType, TypeRegistry};
pub use retry::RetryPolicy;
pub use transport::{Delivery, DeliveryCallback, InMemoryTransport, Transport, TransportSubscription};

/// Worker permits per dispatcher.
pub const DEFAULT_MAX_CONCURRENCY: usize = 64;

/// Deliveries buffered per dispatcher before the intake sheds load.
pub const DEFAULT_INTAKE_CAPACITY: usize = 1000;
