//! # Publisher
//!
//! Wraps a payload in a freshly minted header and writes the encoded
//! envelope to a channel.
//!
//! Inside a dispatch (a [`ContextAccessor`] scope) the new header joins the
//! causal chain of the message being handled: `correlation_id` is inherited
//! and `causation_id` is the handled message's `message_id`. Explicit
//! [`PublishOptions`] win over both.
//!
//! One transport write per call. Failures go back to the caller; nothing is
//! buffered or retried here.

use crate::codec::{EnvelopeCodec, MessageEnvelope};
use crate::config::BrokerConfig;
use crate::context::ContextAccessor;
use crate::errors::PublishError;
use crate::header::MessageHeader;
use crate::message::Message;
use crate::registry::TypeRegistry;
use crate::transport::Transport;
use bytes::Bytes;
use mesh_telemetry::metrics::{ENCODED_MESSAGE_BYTES, MESSAGES_PUBLISHED, PUBLISH_FAILURES};
use mesh_telemetry::{TraceContext, TRACEPARENT_KEY};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Per-call overrides for header construction.
#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    /// Use this message id instead of a fresh one. Lets a retried publish
    /// repeat the id a receiver may already have seen.
    pub message_id: Option<String>,
    /// Use this correlation id instead of the inherited or a fresh one.
    pub correlation_id: Option<String>,
    /// Use this causation id instead of the current message's id.
    pub causation_id: Option<String>,
    /// Start a new chain even when called from inside a dispatch.
    pub detached: bool,
    /// Payload schema version. Defaults to 1.
    pub schema_version: Option<i32>,
    /// Extra metadata entries.
    pub metadata: BTreeMap<String, String>,
}

impl PublishOptions {
    pub fn message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    pub fn correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn causation_id(mut self, causation_id: impl Into<String>) -> Self {
        self.causation_id = Some(causation_id.into());
        self
    }

    pub fn detached(mut self) -> Self {
        self.detached = true;
        self
    }

    pub fn schema_version(mut self, schema_version: i32) -> Self {
        self.schema_version = Some(schema_version);
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Typed publisher for one service.
#[derive(Clone)]
pub struct Publisher {
    codec: EnvelopeCodec,
    transport: Arc<dyn Transport>,
    service_name: Arc<str>,
}

impl Publisher {
    pub fn new(
        codec: EnvelopeCodec,
        transport: Arc<dyn Transport>,
        service_name: impl Into<String>,
    ) -> Self {
        Self {
            codec,
            transport,
            service_name: Arc::from(service_name.into()),
        }
    }

    /// Publisher using the service name and compression settings of `config`.
    pub fn from_config(
        registry: Arc<TypeRegistry>,
        transport: Arc<dyn Transport>,
        config: &BrokerConfig,
    ) -> Self {
        let codec = EnvelopeCodec::new(registry, config.compression.clone());
        Self::new(codec, transport, config.service_name.clone())
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Publish `payload` on `channel` with default options.
    ///
    /// Returns the header that was sent.
    pub async fn publish<T: Message>(
        &self,
        channel: &str,
        payload: &T,
    ) -> Result<MessageHeader, PublishError> {
        self.publish_with(channel, payload, PublishOptions::default())
            .await
    }

    /// Publish `payload` on `channel`.
    ///
    /// # Errors
    ///
    /// - `PublishError::InvalidChannel` - blank channel name
    /// - `PublishError::UnregisteredType` - `T` is not in the registry
    /// - `PublishError::Serialization` - the envelope did not encode
    /// - `PublishError::Transport` - the write failed
    ///
    /// In the first three cases nothing is written to the transport.
    pub async fn publish_with<T: Message>(
        &self,
        channel: &str,
        payload: &T,
        options: PublishOptions,
    ) -> Result<MessageHeader, PublishError> {
        match self.send(channel, payload, options).await {
            Ok(header) => Ok(header),
            Err(e) => {
                PUBLISH_FAILURES.with_label_values(&[e.reason()]).inc();
                warn!(
                    channel,
                    rust_type = std::any::type_name::<T>(),
                    error = %e,
                    "Publish failed"
                );
                Err(e)
            }
        }
    }

    async fn send<T: Message>(
        &self,
        channel: &str,
        payload: &T,
        options: PublishOptions,
    ) -> Result<MessageHeader, PublishError> {
        if channel.trim().is_empty() {
            return Err(PublishError::InvalidChannel(channel.to_string()));
        }

        let header = self.build_header(payload, options)?;
        let envelope = MessageEnvelope::new(header, payload);
        let bytes = self.codec.encode(&envelope)?;
        let size = bytes.len();

        self.transport.publish(channel, Bytes::from(bytes)).await?;

        let header = envelope.header;
        MESSAGES_PUBLISHED
            .with_label_values(&[header.message_type(), channel])
            .inc();
        ENCODED_MESSAGE_BYTES.observe(size as f64);
        debug!(
            channel,
            message_type = header.message_type(),
            message_id = header.message_id(),
            correlation_id = header.correlation_id(),
            causation_id = header.causation_id().unwrap_or(""),
            bytes = size,
            "Message published"
        );

        Ok(header)
    }

    /// Header that `publish_with` would send for this payload, from this task.
    pub fn build_header<T: Message>(
        &self,
        payload: &T,
        options: PublishOptions,
    ) -> Result<MessageHeader, PublishError> {
        let message_type = self
            .codec
            .registry()
            .name_of::<T>()
            .ok_or(PublishError::UnregisteredType {
                rust_type: std::any::type_name::<T>(),
            })?;

        let current = if options.detached {
            None
        } else {
            ContextAccessor::current()
        };

        let mut header = MessageHeader::new(&*message_type, &*self.service_name);
        if let Some(message_id) = options.message_id {
            header = header.with_message_id(message_id);
        }

        let correlation_id = options
            .correlation_id
            .or_else(|| current.as_ref().map(|c| c.header().correlation_id().to_string()));
        if let Some(correlation_id) = correlation_id {
            header = header.with_correlation_id(correlation_id);
        }

        let causation_id = options
            .causation_id
            .or_else(|| current.as_ref().map(|c| c.header().message_id().to_string()));
        header = header.with_causation_id(causation_id);

        if let Some(version) = options.schema_version {
            header = header.with_schema_version(version);
        }

        let mut metadata = options.metadata;
        payload.category().stamp(&mut metadata);
        if !metadata.contains_key(TRACEPARENT_KEY) {
            if let Some(traceparent) = TraceContext::extract_current().traceparent() {
                metadata.insert(TRACEPARENT_KEY.to_string(), traceparent);
            }
        }

        Ok(header.with_metadata(metadata))
    }
}
