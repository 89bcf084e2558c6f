//! # Message Context
//!
//! Per-delivery metadata handed to handlers, and the ambient accessor that
//! lets code deep inside a handler (typically a [`Publisher`] call) find the
//! delivery it is running for.
//!
//! The accessor is backed by a tokio task-local, so each concurrent delivery
//! sees only its own context. It does **not** follow `tokio::spawn`: a task
//! spawned from a handler starts with no current context. Pass the
//! [`MessageContext`] (it is cheap to clone) or re-enter it with
//! [`ContextAccessor::scope`] inside the spawned task.
//!
//! [`Publisher`]: crate::publisher::Publisher

use crate::header::MessageHeader;
use chrono::{DateTime, Utc};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

tokio::task_local! {
    static CURRENT_CONTEXT: MessageContext;
}

/// Typed shared dependencies made available to handlers.
///
/// Populated once when the dispatcher is built and shared read-only by all
/// deliveries.
#[derive(Default, Clone)]
pub struct Resources {
    entries: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl Resources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a dependency, replacing any earlier value of the same type.
    pub fn insert<T: Send + Sync + 'static>(&mut self, value: Arc<T>) {
        self.entries.insert(TypeId::of::<T>(), value);
    }

    /// Fetch a dependency by type.
    pub fn get<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.entries
            .get(&TypeId::of::<T>())
            .cloned()
            .and_then(|value| value.downcast::<T>().ok())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for Resources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resources")
            .field("entries", &self.entries.len())
            .finish()
    }
}

/// Read-only view of one delivery attempt.
#[derive(Debug, Clone)]
pub struct MessageContext {
    header: Arc<MessageHeader>,
    channel: Arc<str>,
    received_at: DateTime<Utc>,
    retry_count: u32,
    resources: Arc<Resources>,
    span: tracing::Span,
}

impl MessageContext {
    pub fn new(
        header: Arc<MessageHeader>,
        channel: Arc<str>,
        received_at: DateTime<Utc>,
        resources: Arc<Resources>,
        span: tracing::Span,
    ) -> Self {
        Self {
            header,
            channel,
            received_at,
            retry_count: 0,
            resources,
            span,
        }
    }

    /// Context for attempt number `retry_count` (zero-based) of the same delivery.
    pub fn for_attempt(&self, retry_count: u32) -> Self {
        Self {
            retry_count,
            ..self.clone()
        }
    }

    pub fn header(&self) -> &MessageHeader {
        &self.header
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    /// Zero on the first attempt, incremented per retry.
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn resources(&self) -> &Resources {
        &self.resources
    }

    /// Shortcut for `resources().get::<T>()`.
    pub fn resource<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.resources.get::<T>()
    }

    /// Span of this delivery.
    pub fn span(&self) -> &tracing::Span {
        &self.span
    }
}

/// Ambient access to the context of the delivery being handled.
pub struct ContextAccessor;

impl ContextAccessor {
    /// Context of the delivery this task is handling, if any.
    pub fn current() -> Option<MessageContext> {
        CURRENT_CONTEXT.try_with(Clone::clone).ok()
    }

    /// Run `future` with `context` installed as current.
    ///
    /// Scopes nest: the innermost context wins and the outer one is restored
    /// when the future completes.
    pub async fn scope<F>(context: MessageContext, future: F) -> F::Output
    where
        F: Future,
    {
        CURRENT_CONTEXT.scope(context, future).await
    }
}
