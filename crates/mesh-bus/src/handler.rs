//! # Handlers
//!
//! Application code implements [`MessageHandler`] per payload type; the
//! dispatcher owns invocation. [`HandlerRegistry`] maps each payload type to
//! a route: one type-erased decode function plus every handler registered
//! for that type. Routes are fixed once the dispatcher is built.

use crate::codec::EnvelopeCodec;
use crate::context::MessageContext;
use crate::errors::{CodecError, DispatchError, HandlerError};
use crate::message::Message;
use crate::registry::{PayloadType, TypeRegistry};
use async_trait::async_trait;
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

/// Callback contract for one payload type.
#[async_trait]
pub trait MessageHandler<M: Message>: Send + Sync + 'static {
    /// Handle one delivery attempt.
    ///
    /// Returning an error (or panicking, or exceeding the handler timeout)
    /// schedules a retry until the retry budget is spent.
    async fn handle(&self, message: &M, context: &MessageContext) -> Result<(), HandlerError>;
}

#[async_trait]
impl<M: Message, H: MessageHandler<M>> MessageHandler<M> for Arc<H> {
    async fn handle(&self, message: &M, context: &MessageContext) -> Result<(), HandlerError> {
        (**self).handle(message, context).await
    }
}

/// Handler built from an async closure. See [`handler_fn`].
pub struct FnHandler<M, F> {
    f: F,
    _message: PhantomData<fn(M)>,
}

/// Wrap an async closure as a handler.
///
/// The closure receives an owned copy of the payload and context.
///
/// ```rust,ignore
/// let handler = handler_fn(|order: OrderPlaced, ctx: MessageContext| async move {
///     tracing::info!(order_id = %order.order_id, retry = ctx.retry_count(), "order");
///     Ok(())
/// });
/// ```
pub fn handler_fn<M, F, Fut>(f: F) -> FnHandler<M, F>
where
    M: Message + Clone,
    F: Fn(M, MessageContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    FnHandler {
        f,
        _message: PhantomData,
    }
}

#[async_trait]
impl<M, F, Fut> MessageHandler<M> for FnHandler<M, F>
where
    M: Message + Clone,
    F: Fn(M, MessageContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, message: &M, context: &MessageContext) -> Result<(), HandlerError> {
        (self.f)(message.clone(), context.clone()).await
    }
}

/// A payload decoded once per delivery and shared by all its handlers.
pub(crate) type DecodedPayload = Arc<dyn Any + Send + Sync>;

type DecodeFn = fn(&EnvelopeCodec, &[u8]) -> Result<DecodedPayload, CodecError>;

fn decode_as<M: Message>(codec: &EnvelopeCodec, bytes: &[u8]) -> Result<DecodedPayload, CodecError> {
    codec
        .decode::<M>(bytes)
        .map(|envelope| Arc::new(envelope.payload) as DecodedPayload)
}

#[async_trait]
pub(crate) trait ErasedHandler: Send + Sync {
    async fn handle(&self, payload: DecodedPayload, context: &MessageContext) -> Result<(), HandlerError>;
}

struct TypedHandler<M, H> {
    handler: H,
    _message: PhantomData<fn(M)>,
}

#[async_trait]
impl<M: Message, H: MessageHandler<M>> ErasedHandler for TypedHandler<M, H> {
    async fn handle(&self, payload: DecodedPayload, context: &MessageContext) -> Result<(), HandlerError> {
        let message = payload.downcast::<M>().map_err(|_| {
            HandlerError::Failed(format!(
                "decoded payload is not a {}",
                std::any::type_name::<M>()
            ))
        })?;
        self.handler.handle(&message, context).await
    }
}

/// A handler plus the name used in logs.
#[derive(Clone)]
pub(crate) struct RegisteredHandler {
    pub(crate) name: &'static str,
    pub(crate) handler: Arc<dyn ErasedHandler>,
}

/// Everything the dispatcher needs for one payload type.
pub(crate) struct Route {
    pub(crate) message_type: Arc<str>,
    decode: DecodeFn,
    pub(crate) handlers: Vec<RegisteredHandler>,
}

impl Route {
    /// Full decode of an envelope into this route's payload type.
    pub(crate) fn decode(&self, codec: &EnvelopeCodec, bytes: &[u8]) -> Result<DecodedPayload, CodecError> {
        (self.decode)(codec, bytes)
    }
}

/// Payload type → route table.
#[derive(Default)]
pub struct HandlerRegistry {
    routes: HashMap<PayloadType, Route>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handler for `M`.
    ///
    /// # Errors
    ///
    /// `DispatchError::UnregisteredType` when `M` has no wire name in
    /// `registry`; such a handler could never be reached.
    pub fn register<M, H>(&mut self, registry: &TypeRegistry, handler: H) -> Result<(), DispatchError>
    where
        M: Message,
        H: MessageHandler<M>,
    {
        let payload_type = PayloadType::of::<M>();
        let message_type = registry
            .name_of_type(payload_type)
            .ok_or(DispatchError::UnregisteredType {
                rust_type: payload_type.rust_name(),
            })?;

        let route = self.routes.entry(payload_type).or_insert_with(|| Route {
            message_type,
            decode: decode_as::<M>,
            handlers: Vec::new(),
        });
        route.handlers.push(RegisteredHandler {
            name: std::any::type_name::<H>(),
            handler: Arc::new(TypedHandler {
                handler,
                _message: PhantomData,
            }),
        });
        Ok(())
    }

    pub(crate) fn route(&self, payload_type: &PayloadType) -> Option<&Route> {
        self.routes.get(payload_type)
    }

    /// Handlers registered for `M`.
    pub fn handler_count<M: Message>(&self) -> usize {
        self.routes
            .get(&PayloadType::of::<M>())
            .map_or(0, |route| route.handlers.len())
    }

    /// Wire names with at least one handler.
    pub fn message_types(&self) -> Vec<Arc<str>> {
        self.routes.values().map(|r| r.message_type.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
