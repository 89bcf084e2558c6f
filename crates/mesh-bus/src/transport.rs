//! # Transport Boundary
//!
//! The broker needs only two primitives from the backing pub/sub system:
//! write bytes to a named channel, and register a callback for a channel.
//! Anything offering those (Redis pub/sub, NATS core, an in-process map)
//! can carry the mesh.
//!
//! [`InMemoryTransport`] is the volatile single-process implementation used
//! by tests and by the runtime when no external transport is configured.

use crate::errors::TransportError;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

/// One raw message handed over by the transport.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub channel: Arc<str>,
    pub payload: Bytes,
}

/// Callback invoked for each delivery on a subscribed channel.
///
/// Called on the transport's own dispatch path and must not block.
pub type DeliveryCallback = Arc<dyn Fn(Delivery) + Send + Sync>;

/// Handle for an active channel subscription.
pub trait TransportSubscription: Send + Sync {
    /// Channel this subscription listens on.
    fn channel(&self) -> &str;

    /// Stop receiving deliveries. Idempotent.
    fn unsubscribe(&self);
}

/// Publish/subscribe primitives of the backing transport.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Write one message to a channel.
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<(), TransportError>;

    /// Register `callback` for every message on `channel`.
    async fn subscribe(
        &self,
        channel: &str,
        callback: DeliveryCallback,
    ) -> Result<Box<dyn TransportSubscription>, TransportError>;
}

type SubscriberMap = HashMap<String, Vec<(u64, DeliveryCallback)>>;

/// In-process fan-out transport.
///
/// Every subscriber of a channel receives every message published after it
/// subscribed. Nothing is buffered for absent subscribers.
pub struct InMemoryTransport {
    /// Callbacks by channel.
    subscribers: Arc<RwLock<SubscriberMap>>,

    /// Subscription id source.
    next_id: AtomicU64,

    /// Total messages published.
    messages_published: AtomicU64,

    /// Set by `close()`.
    closed: AtomicBool,
}

impl InMemoryTransport {
    #[must_use]
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            messages_published: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Number of active subscriptions on a channel.
    #[must_use]
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.subscribers.read().get(channel).map_or(0, Vec::len)
    }

    /// Total messages accepted by `publish`.
    #[must_use]
    pub fn messages_published(&self) -> u64 {
        self.messages_published.load(Ordering::Relaxed)
    }

    /// Reject further publishes and subscriptions and drop all subscribers.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.subscribers.write().clear();
    }
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }

        // Snapshot so callbacks run without holding the lock
        let callbacks: Vec<DeliveryCallback> = self
            .subscribers
            .read()
            .get(channel)
            .map(|subs| subs.iter().map(|(_, cb)| cb.clone()).collect())
            .unwrap_or_default();

        self.messages_published.fetch_add(1, Ordering::Relaxed);

        if callbacks.is_empty() {
            debug!(channel, bytes = payload.len(), "Message published (no subscribers)");
            return Ok(());
        }

        let channel: Arc<str> = Arc::from(channel);
        for callback in &callbacks {
            callback(Delivery {
                channel: channel.clone(),
                payload: payload.clone(),
            });
        }

        debug!(
            channel = %channel,
            bytes = payload.len(),
            receivers = callbacks.len(),
            "Message published"
        );
        Ok(())
    }

    async fn subscribe(
        &self,
        channel: &str,
        callback: DeliveryCallback,
    ) -> Result<Box<dyn TransportSubscription>, TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::SubscribeFailed {
                channel: channel.to_string(),
                reason: "transport closed".to_string(),
            });
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .write()
            .entry(channel.to_string())
            .or_default()
            .push((id, callback));

        debug!(channel, subscription_id = id, "New subscription created");

        Ok(Box::new(InMemorySubscription {
            id,
            channel: channel.to_string(),
            subscribers: Arc::downgrade(&self.subscribers),
            active: AtomicBool::new(true),
        }))
    }
}

/// Subscription on an [`InMemoryTransport`]. Unsubscribes when dropped.
struct InMemorySubscription {
    id: u64,
    channel: String,
    subscribers: Weak<RwLock<SubscriberMap>>,
    active: AtomicBool,
}

impl TransportSubscription for InMemorySubscription {
    fn channel(&self) -> &str {
        &self.channel
    }

    fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        let Some(subscribers) = self.subscribers.upgrade() else {
            return;
        };

        let mut subs = subscribers.write();
        if let Some(list) = subs.get_mut(&self.channel) {
            list.retain(|(id, _)| *id != self.id);
            if list.is_empty() {
                subs.remove(&self.channel);
            }
        } else {
            warn!(channel = %self.channel, "Unsubscribe for unknown channel");
        }
        debug!(channel = %self.channel, subscription_id = self.id, "Subscription removed");
    }
}

impl Drop for InMemorySubscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
