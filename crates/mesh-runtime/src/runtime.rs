//! # Mesh Runtime
//!
//! Wires one process: registry, transport, publisher, the dispatcher for the
//! enabled roles and the generator loop.
//!
//! ## Flow
//!
//! ```text
//! generator loop ──TelemetryDataPublished──→ "telemetry" ──→ HistorianHandler
//!                                                                  │
//!                                                         TelemetryHistory
//!
//! config service ──ConfigurationFileChanged──→ "configuration" ──→ ConfigurationChangeHandler
//!                                                                        │
//!                          ReloadHandler ←── "commands" ←──ReloadConfiguration
//! ```
//!
//! ## Startup Sequence
//!
//! 1. Register message contracts
//! 2. Build and start the dispatcher
//! 3. Start the generator loop (generator role)
//!
//! Shutdown runs in reverse: the generator stops first so nothing new is
//! published, then the dispatcher drains.

use crate::config::RuntimeConfig;
use crate::generator::TelemetryGenerator;
use crate::handlers::{
    ConfigurationChangeHandler, HistorianHandler, ReloadHandler, TelemetryHistory,
};
use anyhow::{Context, Result};
use mesh_bus::{Dispatcher, InMemoryTransport, Publisher, Transport, TypeRegistry};
use mesh_contracts::{
    channels, register_contracts, ConfigurationFileChanged, ReloadConfiguration,
    TelemetryDataPublished,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// One mesh process.
pub struct MeshRuntime {
    config: RuntimeConfig,
    registry: Arc<TypeRegistry>,
    transport: Arc<dyn Transport>,
    publisher: Publisher,
    history: Arc<TelemetryHistory>,
    reloads: Arc<AtomicU64>,
    dispatcher: Dispatcher,
    shutdown_tx: watch::Sender<bool>,
    generator_task: Mutex<Option<JoinHandle<()>>>,
}

impl MeshRuntime {
    /// Runtime over a private in-memory transport.
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        Self::with_transport(config, Arc::new(InMemoryTransport::new()))
    }

    /// Runtime over `transport`.
    pub fn with_transport(config: RuntimeConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        config.validate().context("Invalid runtime configuration")?;

        let registry = Arc::new(TypeRegistry::new());
        register_contracts(&registry).context("Failed to register message contracts")?;

        let publisher = Publisher::from_config(registry.clone(), transport.clone(), &config.broker);
        let history = Arc::new(TelemetryHistory::new(config.history_retention));
        let reload_handler = ReloadHandler::new(config.broker.service_name.clone());
        let reloads = reload_handler.reloads();

        let mut builder = Dispatcher::builder(registry.clone(), transport.clone())
            .config(config.broker.clone())
            .resource(history.clone())
            .handler::<ReloadConfiguration, _>(reload_handler);
        for channel in config.subscribed_channels() {
            builder = builder.channel(channel);
        }
        if config.roles.historian {
            builder = builder.handler::<TelemetryDataPublished, _>(HistorianHandler);
        }
        if config.roles.configuration {
            builder = builder.handler::<ConfigurationFileChanged, _>(
                ConfigurationChangeHandler::new(publisher.clone(), config.reload_targets.clone()),
            );
        }
        let dispatcher = builder.build().context("Failed to build dispatcher")?;

        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            config,
            registry,
            transport,
            publisher,
            history,
            reloads,
            dispatcher,
            shutdown_tx,
            generator_task: Mutex::new(None),
        })
    }

    /// Start dispatching and, for the generator role, publishing.
    pub async fn start(&self) -> Result<()> {
        info!("===========================================");
        info!("  Event Mesh Runtime v{}", env!("CARGO_PKG_VERSION"));
        info!("  Service: {}", self.config.broker.service_name);
        info!("===========================================");

        self.dispatcher
            .start()
            .await
            .context("Failed to start dispatcher")?;

        if self.config.roles.generator {
            let task = tokio::spawn(run_generator(
                self.publisher.clone(),
                self.config.metrics.clone(),
                self.config.generation_interval,
                self.shutdown_tx.subscribe(),
            ));
            *self.generator_task.lock() = Some(task);
        }

        info!(
            generator = self.config.roles.generator,
            historian = self.config.roles.historian,
            configuration = self.config.roles.configuration,
            channels = ?self.dispatcher.channels(),
            "Runtime started"
        );
        Ok(())
    }

    /// Stop the generator, then drain the dispatcher.
    pub async fn shutdown(&self) -> Result<()> {
        info!("Initiating graceful shutdown...");

        self.shutdown_tx.send_replace(true);
        let task = self.generator_task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "Generator task ended abnormally");
            }
        }

        self.dispatcher
            .stop()
            .await
            .context("Failed to stop dispatcher")?;

        info!(
            metrics = self.history.metric_count(),
            samples = self.history.sample_count(),
            reloads = self.reloads.load(Ordering::SeqCst),
            "Shutdown complete"
        );
        Ok(())
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn registry(&self) -> Arc<TypeRegistry> {
        self.registry.clone()
    }

    pub fn transport(&self) -> Arc<dyn Transport> {
        self.transport.clone()
    }

    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    /// Samples recorded by the historian role.
    pub fn history(&self) -> Arc<TelemetryHistory> {
        self.history.clone()
    }

    /// Reload commands this service has acted on.
    pub fn reload_count(&self) -> u64 {
        self.reloads.load(Ordering::SeqCst)
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }
}

/// Publish one batch per tick until shutdown.
async fn run_generator(
    publisher: Publisher,
    metrics: Vec<String>,
    interval: std::time::Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(
        metrics = metrics.len(),
        interval_ms = interval.as_millis() as u64,
        "Telemetry generator starting"
    );

    let mut generator = TelemetryGenerator::new();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut batches: u64 = 0;

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {}
        }

        let batch = generator.generate_batch(metrics.as_slice(), chrono::Utc::now());
        let mut failed = 0usize;
        for sample in &batch {
            if publisher.publish(channels::TELEMETRY, sample).await.is_err() {
                failed += 1;
            }
        }
        batches += 1;

        if failed > 0 {
            warn!(failed, total = batch.len(), "Telemetry batch partially published");
        } else {
            debug!(batch = batches, samples = batch.len(), "Telemetry batch published");
        }
    }

    info!(batches, "Telemetry generator stopped");
}
