//! # Dispatcher
//!
//! Consumer side of the mesh: subscribes to channels, routes each raw
//! delivery to the handlers registered for its payload type, and applies
//! the retry policy.
//!
//! ## Lifecycle
//!
//! ```text
//!  Idle ──start()──→ Listening ──stop()──→ Draining ──→ Stopped
//! ```
//!
//! ## Delivery Path
//!
//! ```text
//! transport callback ──try_send──→ intake queue ──→ dispatch loop
//!                                                      │ worker permit
//!                                                      ▼
//!                         peek ─→ route ─→ decode ─→ handlers (concurrent)
//!                          │        │        │           │
//!                      malformed unhandled poison    retry/backoff
//!                       (warn)   (debug)   (error)   then drop (error)
//! ```
//!
//! The transport callback never blocks: it only enqueues. Each delivery
//! runs on its own task holding one of `max_concurrency` permits, so a slow
//! or retrying handler never holds up other deliveries. No ordering is
//! guaranteed between deliveries once they are dispatched concurrently.

use crate::codec::EnvelopeCodec;
use crate::config::BrokerConfig;
use crate::context::{ContextAccessor, MessageContext, Resources};
use crate::dedupe::TimeBoundedIdCache;
use crate::errors::{DispatchError, HandlerError};
use crate::handler::{DecodedPayload, HandlerRegistry, MessageHandler, RegisteredHandler, Route};
use crate::message::Message;
use crate::registry::TypeRegistry;
use crate::retry::RetryPolicy;
use crate::transport::{Delivery, DeliveryCallback, Transport, TransportSubscription};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use futures::FutureExt;
use mesh_telemetry::metrics::{
    HistogramTimer, DELIVERIES_IN_FLIGHT, HANDLER_DURATION, HANDLER_INVOCATIONS, HANDLER_RETRIES,
    MESSAGES_DROPPED, MESSAGES_RECEIVED,
};
use mesh_telemetry::{PropagatedContext, TRACEPARENT_KEY};
use parking_lot::Mutex;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Lifecycle state of a dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    /// Built, not subscribed.
    Idle,
    /// Subscribed and accepting deliveries.
    Listening,
    /// Unsubscribed, waiting for in-flight deliveries.
    Draining,
    /// Terminal.
    Stopped,
}

impl DispatcherState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Listening => "listening",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        }
    }
}

/// A raw delivery waiting for a worker.
struct Received {
    delivery: Delivery,
    received_at: DateTime<Utc>,
}

/// State shared by every delivery task.
struct DispatchCore {
    codec: EnvelopeCodec,
    handlers: HandlerRegistry,
    resources: Arc<Resources>,
    retry: RetryPolicy,
    handler_timeout: Duration,
    dedupe: Option<Mutex<TimeBoundedIdCache>>,
}

/// Resources that only exist while listening.
struct Running {
    subscriptions: Vec<Box<dyn TransportSubscription>>,
    dispatch_loop: JoinHandle<()>,
}

/// Builder for [`Dispatcher`].
///
/// ```rust,ignore
/// let dispatcher = Dispatcher::builder(registry, transport)
///     .config(BrokerConfig::for_service("historian"))
///     .channel("telemetry")
///     .handler::<TelemetryDataPublished, _>(historian)
///     .resource(store)
///     .build()?;
/// dispatcher.start().await?;
/// ```
pub struct DispatcherBuilder {
    registry: Arc<TypeRegistry>,
    transport: Arc<dyn Transport>,
    config: BrokerConfig,
    channels: Vec<String>,
    handlers: HandlerRegistry,
    resources: Resources,
    registration_error: Option<DispatchError>,
}

impl DispatcherBuilder {
    /// Replace the broker configuration. Channels listed in it are added.
    pub fn config(mut self, config: BrokerConfig) -> Self {
        self.config = config;
        self
    }

    /// Subscribe to `channel` in addition to the configured ones.
    pub fn channel(mut self, channel: impl Into<String>) -> Self {
        self.channels.push(channel.into());
        self
    }

    /// Register a handler for payload type `M`.
    ///
    /// An unregistered `M` is reported by [`build`](Self::build).
    pub fn handler<M, H>(mut self, handler: H) -> Self
    where
        M: Message,
        H: MessageHandler<M>,
    {
        if let Err(e) = self.handlers.register::<M, H>(&self.registry, handler) {
            self.registration_error.get_or_insert(e);
        }
        self
    }

    /// Make a shared dependency available through [`MessageContext::resource`].
    pub fn resource<T: Send + Sync + 'static>(mut self, value: Arc<T>) -> Self {
        self.resources.insert(value);
        self
    }

    /// Validate and build.
    ///
    /// # Errors
    ///
    /// - `DispatchError::UnregisteredType` - a handler's payload type has no wire name
    /// - `DispatchError::NoChannels` - nothing to subscribe to
    /// - `DispatchError::Config` - invalid broker configuration
    pub fn build(self) -> Result<Dispatcher, DispatchError> {
        if let Some(e) = self.registration_error {
            return Err(e);
        }
        self.config.validate()?;

        let mut channels: Vec<String> = Vec::new();
        for channel in self.config.channels.iter().chain(self.channels.iter()) {
            let channel = channel.trim();
            if !channel.is_empty() && !channels.iter().any(|c| c == channel) {
                channels.push(channel.to_string());
            }
        }
        if channels.is_empty() {
            return Err(DispatchError::NoChannels);
        }
        if self.handlers.is_empty() {
            warn!(
                service = %self.config.service_name,
                "Dispatcher built without handlers; every delivery will be dropped"
            );
        }

        let core = DispatchCore {
            codec: EnvelopeCodec::new(self.registry, self.config.compression.clone()),
            handlers: self.handlers,
            resources: Arc::new(self.resources),
            retry: self.config.retry.clone(),
            handler_timeout: self.config.handler_timeout,
            dedupe: self
                .config
                .dedupe_window
                .map(|window| Mutex::new(TimeBoundedIdCache::new(window))),
        };
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Dispatcher {
            core: Arc::new(core),
            transport: self.transport,
            channels,
            config: self.config,
            state: Mutex::new(DispatcherState::Idle),
            accepting: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            running: Mutex::new(None),
        })
    }
}

/// Subscribes to channels and drives handlers.
pub struct Dispatcher {
    core: Arc<DispatchCore>,
    transport: Arc<dyn Transport>,
    channels: Vec<String>,
    config: BrokerConfig,
    state: Mutex<DispatcherState>,
    accepting: Arc<AtomicBool>,
    shutdown_tx: watch::Sender<bool>,
    running: Mutex<Option<Running>>,
}

impl Dispatcher {
    pub fn builder(registry: Arc<TypeRegistry>, transport: Arc<dyn Transport>) -> DispatcherBuilder {
        DispatcherBuilder {
            registry,
            transport,
            config: BrokerConfig::default(),
            channels: Vec::new(),
            handlers: HandlerRegistry::new(),
            resources: Resources::new(),
            registration_error: None,
        }
    }

    pub fn state(&self) -> DispatcherState {
        *self.state.lock()
    }

    /// Channels this dispatcher subscribes to.
    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    /// `Idle → Listening`: subscribe to every channel and start dispatching.
    ///
    /// # Errors
    ///
    /// - `DispatchError::InvalidState` - not idle
    /// - `DispatchError::Transport` - a subscription failed; none are kept
    pub async fn start(&self) -> Result<(), DispatchError> {
        {
            let mut state = self.state.lock();
            if *state != DispatcherState::Idle {
                return Err(DispatchError::InvalidState {
                    operation: "start",
                    state: state.as_str(),
                });
            }
            *state = DispatcherState::Listening;
        }

        let (intake_tx, intake_rx) = mpsc::channel(self.config.intake_capacity);
        self.accepting.store(true, Ordering::SeqCst);

        let mut subscriptions = Vec::with_capacity(self.channels.len());
        for channel in &self.channels {
            let callback = intake_callback(intake_tx.clone(), self.accepting.clone());
            match self.transport.subscribe(channel, callback).await {
                Ok(subscription) => subscriptions.push(subscription),
                Err(e) => {
                    error!(channel = %channel, error = %e, "Subscribe failed, dispatcher not started");
                    self.accepting.store(false, Ordering::SeqCst);
                    for subscription in &subscriptions {
                        subscription.unsubscribe();
                    }
                    *self.state.lock() = DispatcherState::Idle;
                    return Err(e.into());
                }
            }
        }
        drop(intake_tx);

        let dispatch_loop = tokio::spawn(dispatch_loop(
            self.core.clone(),
            intake_rx,
            Arc::new(Semaphore::new(self.config.max_concurrency)),
            self.shutdown_tx.subscribe(),
            self.config.shutdown_timeout,
        ));

        *self.running.lock() = Some(Running {
            subscriptions,
            dispatch_loop,
        });

        info!(
            service = %self.config.service_name,
            channels = ?self.channels,
            max_concurrency = self.config.max_concurrency,
            "Dispatcher listening"
        );
        Ok(())
    }

    /// `Listening → Draining → Stopped`.
    ///
    /// Unsubscribes, refuses new deliveries and cancels pending retry
    /// backoffs. Deliveries already accepted into the intake queue are still
    /// handled; queued and running work gets up to `shutdown_timeout` before
    /// the rest is aborted. Stopping an idle or stopped dispatcher just marks it
    /// stopped.
    ///
    /// # Errors
    ///
    /// `DispatchError::InvalidState` if another `stop()` is already draining.
    pub async fn stop(&self) -> Result<(), DispatchError> {
        {
            let mut state = self.state.lock();
            match *state {
                DispatcherState::Listening => *state = DispatcherState::Draining,
                DispatcherState::Idle | DispatcherState::Stopped => {
                    *state = DispatcherState::Stopped;
                    return Ok(());
                }
                DispatcherState::Draining => {
                    return Err(DispatchError::InvalidState {
                        operation: "stop",
                        state: state.as_str(),
                    });
                }
            }
        }

        info!(service = %self.config.service_name, "Dispatcher draining");
        self.accepting.store(false, Ordering::SeqCst);

        let running = self.running.lock().take();
        if let Some(running) = running {
            for subscription in &running.subscriptions {
                subscription.unsubscribe();
            }
            self.shutdown_tx.send_replace(true);

            if let Err(e) = running.dispatch_loop.await {
                error!(error = %e, "Dispatch loop terminated abnormally");
            }
        }

        *self.state.lock() = DispatcherState::Stopped;
        info!(service = %self.config.service_name, "Dispatcher stopped");
        Ok(())
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        // Lets the dispatch loop drain and exit if stop() was never called
        self.accepting.store(false, Ordering::SeqCst);
        self.shutdown_tx.send_replace(true);
    }
}

fn intake_callback(intake: mpsc::Sender<Received>, accepting: Arc<AtomicBool>) -> DeliveryCallback {
    Arc::new(move |delivery: Delivery| {
        if !accepting.load(Ordering::SeqCst) {
            MESSAGES_DROPPED.with_label_values(&["shutdown"]).inc();
            return;
        }
        MESSAGES_RECEIVED
            .with_label_values(&[delivery.channel.as_ref()])
            .inc();

        let received = Received {
            delivery,
            received_at: Utc::now(),
        };
        match intake.try_send(received) {
            Ok(()) => {}
            Err(TrySendError::Full(received)) => {
                MESSAGES_DROPPED.with_label_values(&["intake_full"]).inc();
                warn!(
                    channel = %received.delivery.channel,
                    bytes = received.delivery.payload.len(),
                    "Intake queue full, delivery dropped"
                );
            }
            Err(TrySendError::Closed(_)) => {
                MESSAGES_DROPPED.with_label_values(&["shutdown"]).inc();
            }
        }
    })
}

async fn dispatch_loop(
    core: Arc<DispatchCore>,
    mut intake: mpsc::Receiver<Received>,
    permits: Arc<Semaphore>,
    mut shutdown: watch::Receiver<bool>,
    shutdown_timeout: Duration,
) {
    let mut in_flight = JoinSet::new();

    loop {
        if *shutdown.borrow() {
            break;
        }

        let permit = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            permit = permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let received = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            received = intake.recv() => match received {
                Some(received) => received,
                None => break,
            },
        };

        while let Some(joined) = in_flight.try_join_next() {
            report_task(joined);
        }

        let core = core.clone();
        let cancel = shutdown.clone();
        in_flight.spawn(async move {
            let _permit = permit;
            core.process(received, cancel).await;
        });
    }

    // Accepted deliveries still queued are handled within the same drain budget
    intake.close();
    let drained = tokio::time::timeout(shutdown_timeout, async {
        loop {
            let Ok(permit) = permits.clone().acquire_owned().await else {
                break;
            };
            let Some(received) = intake.recv().await else {
                break;
            };
            while let Some(joined) = in_flight.try_join_next() {
                report_task(joined);
            }
            let core = core.clone();
            let cancel = shutdown.clone();
            in_flight.spawn(async move {
                let _permit = permit;
                core.process(received, cancel).await;
            });
        }
        while let Some(joined) = in_flight.join_next().await {
            report_task(joined);
        }
    })
    .await;

    if drained.is_err() {
        let mut discarded = 0u64;
        while intake.try_recv().is_ok() {
            discarded += 1;
        }
        if discarded > 0 {
            MESSAGES_DROPPED
                .with_label_values(&["shutdown"])
                .inc_by(discarded as f64);
        }
        warn!(
            remaining = in_flight.len(),
            discarded,
            timeout_ms = shutdown_timeout.as_millis() as u64,
            "Shutdown timeout elapsed, aborting in-flight deliveries"
        );
        in_flight.shutdown().await;
    }
}

fn report_task(joined: Result<(), JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            error!(error = %e, "Delivery task panicked");
        }
    }
}

/// Keeps the in-flight gauge balanced on every exit path.
struct InFlightGuard;

impl InFlightGuard {
    fn enter() -> Self {
        DELIVERIES_IN_FLIGHT.inc();
        Self
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        DELIVERIES_IN_FLIGHT.dec();
    }
}

impl DispatchCore {
    async fn process(&self, received: Received, cancel: watch::Receiver<bool>) {
        let _in_flight = InFlightGuard::enter();
        let Received {
            delivery,
            received_at,
        } = received;

        let Some(peeked) = self.codec.peek_header(&delivery.payload) else {
            MESSAGES_DROPPED.with_label_values(&["malformed"]).inc();
            warn!(
                channel = %delivery.channel,
                bytes = delivery.payload.len(),
                "Malformed delivery dropped"
            );
            return;
        };
        let header = peeked.header;

        let Some(route) = peeked
            .payload_type
            .and_then(|payload_type| self.handlers.route(&payload_type))
        else {
            MESSAGES_DROPPED.with_label_values(&["unhandled"]).inc();
            debug!(
                channel = %delivery.channel,
                message_type = header.message_type(),
                message_id = header.message_id(),
                "No handler for message type, dropped"
            );
            return;
        };

        if let Some(dedupe) = &self.dedupe {
            let first_sight = dedupe.lock().check_and_insert(header.message_id());
            if !first_sight {
                MESSAGES_DROPPED.with_label_values(&["duplicate"]).inc();
                debug!(
                    channel = %delivery.channel,
                    message_type = header.message_type(),
                    message_id = header.message_id(),
                    "Duplicate delivery dropped"
                );
                return;
            }
        }

        let payload = match route.decode(&self.codec, &delivery.payload) {
            Ok(payload) => payload,
            Err(e) => {
                MESSAGES_DROPPED.with_label_values(&["poison"]).inc();
                error!(
                    channel = %delivery.channel,
                    message_type = header.message_type(),
                    message_id = header.message_id(),
                    correlation_id = header.correlation_id(),
                    causation_id = header.causation_id().unwrap_or(""),
                    source_service = header.source_service(),
                    schema_version = header.schema_version(),
                    error = %e,
                    "Poison message dropped: payload failed to decode"
                );
                return;
            }
        };

        let span = info_span!(
            "message_dispatch",
            channel = %delivery.channel,
            message_type = header.message_type(),
            message_id = header.message_id(),
            correlation_id = header.correlation_id(),
        );
        if let Some(parent) = header
            .metadata_value(TRACEPARENT_KEY)
            .and_then(PropagatedContext::from_traceparent)
        {
            parent.attach_to(&span);
        }

        let context = MessageContext::new(
            Arc::new(header),
            delivery.channel,
            received_at,
            self.resources.clone(),
            span,
        );

        let invocations = route.handlers.iter().map(|registered| {
            self.run_handler(route, registered, payload.clone(), &context, cancel.clone())
        });
        join_all(invocations).await;
    }

    /// Attempts for one handler: first try plus retries with backoff.
    async fn run_handler(
        &self,
        route: &Route,
        registered: &RegisteredHandler,
        payload: DecodedPayload,
        context: &MessageContext,
        mut cancel: watch::Receiver<bool>,
    ) {
        let message_type = route.message_type.as_ref();
        let header = context.header();
        let mut retry_count: u32 = 0;

        loop {
            let attempt = context.for_attempt(retry_count);
            let err = match self.invoke_once(message_type, registered, payload.clone(), attempt).await {
                Ok(()) => {
                    HANDLER_INVOCATIONS
                        .with_label_values(&[message_type, "success"])
                        .inc();
                    if retry_count > 0 {
                        debug!(
                            handler = registered.name,
                            message_id = header.message_id(),
                            retry_count,
                            "Handler succeeded after retry"
                        );
                    }
                    return;
                }
                Err(err) => err,
            };

            HANDLER_INVOCATIONS
                .with_label_values(&[message_type, err.outcome()])
                .inc();

            if !self.retry.should_retry(retry_count) {
                MESSAGES_DROPPED
                    .with_label_values(&["retries_exhausted"])
                    .inc();
                error!(
                    handler = registered.name,
                    channel = context.channel(),
                    message_type = header.message_type(),
                    message_id = header.message_id(),
                    correlation_id = header.correlation_id(),
                    causation_id = header.causation_id().unwrap_or(""),
                    source_service = header.source_service(),
                    timestamp_unix_ms = header.timestamp_unix_ms(),
                    schema_version = header.schema_version(),
                    attempts = retry_count + 1,
                    error = %err,
                    "Handler failed after exhausting retries, message dropped"
                );
                return;
            }

            let backoff = self.retry.backoff_for(retry_count);
            warn!(
                handler = registered.name,
                message_type = header.message_type(),
                message_id = header.message_id(),
                correlation_id = header.correlation_id(),
                retry_count,
                backoff_ms = backoff.as_millis() as u64,
                error = %err,
                "Handler failed, retrying"
            );
            HANDLER_RETRIES.with_label_values(&[message_type]).inc();

            let stopping = *cancel.borrow();
            let cancelled = stopping
                || tokio::select! {
                    _ = tokio::time::sleep(backoff) => false,
                    _ = cancel.changed() => true,
                };
            if cancelled {
                MESSAGES_DROPPED.with_label_values(&["shutdown"]).inc();
                warn!(
                    handler = registered.name,
                    message_id = header.message_id(),
                    correlation_id = header.correlation_id(),
                    retry_count,
                    "Retry abandoned, dispatcher stopping"
                );
                return;
            }

            retry_count += 1;
        }
    }

    /// One attempt: context scope, span, timeout and panic capture.
    async fn invoke_once(
        &self,
        message_type: &str,
        registered: &RegisteredHandler,
        payload: DecodedPayload,
        context: MessageContext,
    ) -> Result<(), HandlerError> {
        let span = context.span().clone();
        let _timer = HistogramTimer::new(&HANDLER_DURATION.with_label_values(&[message_type]));

        let scoped = ContextAccessor::scope(context.clone(), async move {
            registered.handler.handle(payload, &context).await
        });
        let guarded = AssertUnwindSafe(scoped).catch_unwind().instrument(span);

        match tokio::time::timeout(self.handler_timeout, guarded).await {
            Ok(Ok(result)) => result,
            Ok(Err(panic)) => Err(HandlerError::Panicked(panic_message(panic.as_ref()))),
            Err(_) => Err(HandlerError::Timeout(self.handler_timeout)),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
