//! Trace context propagation through message headers.
//!
//! When a message crosses a service boundary over the transport, the trace
//! context travels in header metadata as a W3C `traceparent` value so the
//! consumer's dispatch span becomes a child of the producer's span.
//!
//! ## How It Works
//!
//! 1. The publisher extracts the current span context as `PropagatedContext`
//! 2. It is rendered with `to_traceparent()` into header metadata
//! 3. The dispatcher parses it back with `from_traceparent()`
//! 4. `attach_to()` sets it as the remote parent of the delivery span
//!
//! Without an OpenTelemetry layer installed, spans carry no valid context
//! and nothing is propagated.

use opentelemetry::{
    trace::{SpanContext, SpanId, TraceContextExt, TraceFlags, TraceId, TraceState},
    Context,
};
use serde::{Deserialize, Serialize};
use tracing_opentelemetry::OpenTelemetrySpanExt;

/// Header metadata key carrying the W3C trace parent.
pub const TRACEPARENT_KEY: &str = "traceparent";

const TRACEPARENT_VERSION: &str = "00";

/// Trace context that can be serialized and sent across process boundaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropagatedContext {
    /// Trace ID (32 hex characters)
    pub trace_id: String,
    /// Parent span ID (16 hex characters)
    pub span_id: String,
    /// Trace flags (sampled, etc.)
    pub trace_flags: u8,
}

impl PropagatedContext {
    /// Create an empty context (no parent trace)
    pub fn empty() -> Self {
        Self {
            trace_id: "00000000000000000000000000000000".to_string(),
            span_id: "0000000000000000".to_string(),
            trace_flags: 0,
        }
    }

    /// Check if this context is valid (has a real trace)
    pub fn is_valid(&self) -> bool {
        self.to_span_context().is_valid()
    }

    /// Parse a `traceparent` value: `00-<trace_id>-<span_id>-<flags>`.
    ///
    /// Returns `None` for anything malformed or all-zero.
    pub fn from_traceparent(value: &str) -> Option<Self> {
        let mut parts = value.trim().split('-');
        let version = parts.next()?;
        let trace_id = parts.next()?;
        let span_id = parts.next()?;
        let flags = parts.next()?;
        if parts.next().is_some() || version != TRACEPARENT_VERSION {
            return None;
        }
        if trace_id.len() != 32 || span_id.len() != 16 || flags.len() != 2 {
            return None;
        }

        let context = Self {
            trace_id: trace_id.to_lowercase(),
            span_id: span_id.to_lowercase(),
            trace_flags: u8::from_str_radix(flags, 16).ok()?,
        };
        context.is_valid().then_some(context)
    }

    /// Render as a W3C `traceparent` value.
    pub fn to_traceparent(&self) -> String {
        format!(
            "{}-{}-{}-{:02x}",
            TRACEPARENT_VERSION, self.trace_id, self.span_id, self.trace_flags
        )
    }

    fn to_span_context(&self) -> SpanContext {
        let trace_id = TraceId::from_hex(&self.trace_id).unwrap_or(TraceId::INVALID);
        let span_id = SpanId::from_hex(&self.span_id).unwrap_or(SpanId::INVALID);

        SpanContext::new(
            trace_id,
            span_id,
            TraceFlags::new(self.trace_flags),
            true, // remote = true (came from another process)
            TraceState::default(),
        )
    }

    /// Make this context the remote parent of `span`. No-op when invalid.
    pub fn attach_to(&self, span: &tracing::Span) {
        let span_context = self.to_span_context();
        if span_context.is_valid() {
            span.set_parent(Context::new().with_remote_span_context(span_context));
        }
    }
}

/// Span context captured from a live `tracing` span.
pub struct TraceContext {
    span_context: Option<SpanContext>,
}

impl TraceContext {
    /// Create a new empty trace context.
    pub fn new() -> Self {
        Self { span_context: None }
    }

    /// Extract the trace context of the given span.
    pub fn from_span(span: &tracing::Span) -> Self {
        let context = span.context();
        let span_context = context.span().span_context().clone();

        Self {
            span_context: span_context.is_valid().then_some(span_context),
        }
    }

    /// Extract the trace context of the current span.
    pub fn extract_current() -> Self {
        Self::from_span(&tracing::Span::current())
    }

    /// Convert to a propagatable format for serialization.
    pub fn to_propagated(&self) -> PropagatedContext {
        match &self.span_context {
            Some(ctx) if ctx.is_valid() => PropagatedContext {
                trace_id: ctx.trace_id().to_string(),
                span_id: ctx.span_id().to_string(),
                trace_flags: ctx.trace_flags().to_u8(),
            },
            _ => PropagatedContext::empty(),
        }
    }

    /// The `traceparent` value to propagate, if there is a live trace.
    pub fn traceparent(&self) -> Option<String> {
        self.is_valid().then(|| self.to_propagated().to_traceparent())
    }

    /// Check if this context has a valid trace.
    pub fn is_valid(&self) -> bool {
        self.span_context
            .as_ref()
            .map(|c| c.is_valid())
            .unwrap_or(false)
    }
}

impl Default for TraceContext {
    fn default() -> Self {
        Self::new()
    }
}
