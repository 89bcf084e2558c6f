//! # Envelope Codec
//!
//! Binary form of a `(header, payload)` envelope:
//!
//! ```text
//! array(2) ┬─ [0] header   positional MessagePack array, see `header.rs`
//!          └─ [1] payload  positional MessagePack
//!                          or ext(99, zstd(MessagePack)) when compressed
//! ```
//!
//! The header is always written uncompressed and first, so
//! [`EnvelopeCodec::peek_header`] reads element 0 and stops. Its cost depends
//! on the header size only, never the payload size.
//!
//! Input is untrusted: payloads are only ever decoded into a type the caller
//! names, and the dispatcher only names types found in the [`TypeRegistry`].

use crate::compression::{CompressionConfig, ZstdCompressor};
use crate::errors::CodecError;
use crate::header::MessageHeader;
use crate::registry::{PayloadType, TypeRegistry};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

/// MessagePack ext type tagging a zstd-compressed payload element.
pub const COMPRESSED_PAYLOAD_EXT: i8 = 99;

const ENVELOPE_LEN: u32 = 2;
const MSGPACK_NIL: u8 = 0xc0;

/// A header together with its decoded payload.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageEnvelope<T> {
    pub header: MessageHeader,
    pub payload: T,
}

impl<T> MessageEnvelope<T> {
    pub fn new(header: MessageHeader, payload: T) -> Self {
        Self { header, payload }
    }
}

/// Result of a header peek.
#[derive(Debug, Clone, PartialEq)]
pub struct PeekedHeader {
    pub header: MessageHeader,
    /// Payload type registered for `header.message_type()`, if any.
    pub payload_type: Option<PayloadType>,
}

/// Encodes and decodes envelopes; resolves peeked headers against the registry.
#[derive(Clone)]
pub struct EnvelopeCodec {
    registry: Arc<TypeRegistry>,
    compressor: ZstdCompressor,
}

impl EnvelopeCodec {
    pub fn new(registry: Arc<TypeRegistry>, compression: CompressionConfig) -> Self {
        Self {
            registry,
            compressor: ZstdCompressor::new(compression),
        }
    }

    /// Codec with default compression settings.
    pub fn with_defaults(registry: Arc<TypeRegistry>) -> Self {
        Self::new(registry, CompressionConfig::default())
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    /// Serialize an envelope.
    ///
    /// # Errors
    ///
    /// `CodecError::Serialization` when a required header field is blank, the
    /// payload serializes to nil, or MessagePack encoding fails.
    pub fn encode<T: Serialize>(&self, envelope: &MessageEnvelope<T>) -> Result<Vec<u8>, CodecError> {
        if let Some(field) = envelope.header.missing_field() {
            return Err(CodecError::Serialization(format!(
                "required header field '{field}' is empty"
            )));
        }

        let payload = rmp_serde::to_vec(&envelope.payload)
            .map_err(|e| CodecError::Serialization(format!("payload: {e}")))?;
        if payload == [MSGPACK_NIL] {
            return Err(CodecError::Serialization("payload is nil".to_string()));
        }

        let mut buf = Vec::with_capacity(payload.len() + 160);
        rmp::encode::write_array_len(&mut buf, ENVELOPE_LEN)
            .map_err(|e| CodecError::Serialization(e.to_string()))?;
        rmp_serde::encode::write(&mut buf, &envelope.header)
            .map_err(|e| CodecError::Serialization(format!("header: {e}")))?;

        match self.compressor.compress_if_worthwhile(&payload)? {
            Some(compressed) => {
                let len = u32::try_from(compressed.len()).map_err(|_| {
                    CodecError::Serialization("compressed payload exceeds 4 GiB".to_string())
                })?;
                rmp::encode::write_ext_meta(&mut buf, len, COMPRESSED_PAYLOAD_EXT)
                    .map_err(|e| CodecError::Serialization(e.to_string()))?;
                buf.extend_from_slice(&compressed);
            }
            None => buf.extend_from_slice(&payload),
        }

        Ok(buf)
    }

    /// Fully decode an envelope into payload type `T`.
    ///
    /// # Errors
    ///
    /// `CodecError::Deserialization` on malformed or truncated input, a header
    /// missing a required field, or a payload that does not fit `T`.
    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<MessageEnvelope<T>, CodecError> {
        let (header, rest) = read_header(bytes)?;
        if let Some(field) = header.missing_field() {
            return Err(CodecError::Deserialization(format!(
                "required header field '{field}' is empty"
            )));
        }
        let payload = self.decode_payload(rest)?;
        Ok(MessageEnvelope { header, payload })
    }

    /// Decode only the header and resolve its payload type.
    ///
    /// Returns `None` (never an error) when `bytes` is not a 2-element
    /// envelope or the header does not decode. The payload element is not
    /// read at all.
    pub fn peek_header(&self, bytes: &[u8]) -> Option<PeekedHeader> {
        let (header, _) = read_header(bytes).ok()?;
        if header.missing_field().is_some() {
            return None;
        }
        let payload_type = self.registry.resolve(header.message_type());
        Some(PeekedHeader {
            header,
            payload_type,
        })
    }

    fn decode_payload<T: DeserializeOwned>(&self, element: &[u8]) -> Result<T, CodecError> {
        let mut probe = element;
        match rmp::decode::read_ext_meta(&mut probe) {
            Ok(meta) if meta.typeid == COMPRESSED_PAYLOAD_EXT => {
                let size = meta.size as usize;
                let frame = probe.get(..size).ok_or_else(|| {
                    CodecError::Deserialization("truncated compressed payload".to_string())
                })?;
                if probe.len() > size {
                    return Err(CodecError::Deserialization(format!(
                        "payload: {} trailing bytes",
                        probe.len() - size
                    )));
                }
                let raw = self.compressor.decompress(frame)?;
                from_exact(&raw, "payload")
            }
            _ => from_exact(element, "payload"),
        }
    }
}

/// Deserialize exactly one value, rejecting bytes left after it.
fn from_exact<T: DeserializeOwned>(bytes: &[u8], part: &str) -> Result<T, CodecError> {
    let mut rd = bytes;
    let value = serde::Deserialize::deserialize(&mut rmp_serde::Deserializer::new(&mut rd))
        .map_err(|e: rmp_serde::decode::Error| CodecError::Deserialization(format!("{part}: {e}")))?;
    if !rd.is_empty() {
        return Err(CodecError::Deserialization(format!(
            "{part}: {} trailing bytes",
            rd.len()
        )));
    }
    Ok(value)
}

/// Read the outer array marker and header; return the bytes after the header.
fn read_header(bytes: &[u8]) -> Result<(MessageHeader, &[u8]), CodecError> {
    let mut rd = bytes;
    let len = rmp::decode::read_array_len(&mut rd)
        .map_err(|e| CodecError::Deserialization(format!("envelope marker: {e}")))?;
    if len != ENVELOPE_LEN {
        return Err(CodecError::Deserialization(format!(
            "envelope has {len} elements, expected {ENVELOPE_LEN}"
        )));
    }
    let header: MessageHeader = rmp_serde::from_read(&mut rd)
        .map_err(|e| CodecError::Deserialization(format!("header: {e}")))?;
    Ok((header, rd))
}
