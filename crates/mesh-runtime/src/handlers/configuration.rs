//! # Configuration Handlers
//!
//! [`ConfigurationChangeHandler`] turns configuration file changes into
//! [`ReloadConfiguration`] commands for the dependent services. The commands
//! are published from inside the handler, so they carry the change's
//! correlation id and name it as their cause.
//!
//! A retried change only commands the targets that were not reached on an
//! earlier attempt. Each command's message id is derived from the change's
//! id and the target, so a receiver deduplicating by id sees one command per
//! target even if the retry bookkeeping has been evicted.
//!
//! [`ReloadHandler`] is the receiving side: it acts on commands addressed to
//! this service and ignores the rest.

use async_trait::async_trait;
use mesh_bus::{HandlerError, MessageContext, MessageHandler, PublishOptions, Publisher};
use mesh_contracts::{channels, ConfigurationChange, ConfigurationFileChanged, ReloadConfiguration};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Changes with partially sent commands kept at once.
const MAX_PENDING_CHANGES: usize = 256;

pub struct ConfigurationChangeHandler {
    publisher: Publisher,
    targets: Vec<String>,
    /// Targets already commanded, by change message id. An entry lives until
    /// every target has been reached.
    commanded: Mutex<HashMap<String, HashSet<String>>>,
}

impl ConfigurationChangeHandler {
    pub fn new(publisher: Publisher, targets: Vec<String>) -> Self {
        Self {
            publisher,
            targets,
            commanded: Mutex::new(HashMap::new()),
        }
    }

    fn already_commanded(&self, change_id: &str, target: &str) -> bool {
        self.commanded
            .lock()
            .get(change_id)
            .is_some_and(|targets| targets.contains(target))
    }

    fn mark_commanded(&self, change_id: &str, target: &str) {
        let mut commanded = self.commanded.lock();
        if !commanded.contains_key(change_id) && commanded.len() >= MAX_PENDING_CHANGES {
            warn!(
                pending = commanded.len(),
                "Too many partially commanded changes, forgetting them"
            );
            commanded.clear();
        }
        commanded
            .entry(change_id.to_string())
            .or_default()
            .insert(target.to_string());
    }

    fn needs_reload(change: &ConfigurationFileChanged) -> bool {
        change.is_active || change.change == ConfigurationChange::Deleted
    }
}

#[async_trait]
impl MessageHandler<ConfigurationFileChanged> for ConfigurationChangeHandler {
    async fn handle(
        &self,
        message: &ConfigurationFileChanged,
        context: &MessageContext,
    ) -> Result<(), HandlerError> {
        if !Self::needs_reload(message) {
            debug!(
                file = %message.name,
                version = message.version,
                "Inactive configuration file changed, no reload"
            );
            return Ok(());
        }

        let reason = format!(
            "{} {:?} (version {}, {})",
            message.name, message.change, message.version, message.path
        );
        let change_id = context.header().message_id();
        for target in &self.targets {
            if self.already_commanded(change_id, target) {
                continue;
            }
            let command = ReloadConfiguration {
                target_service: target.clone(),
                reason: reason.clone(),
            };
            self.publisher
                .publish_with(
                    channels::COMMANDS,
                    &command,
                    PublishOptions::default().message_id(format!("{change_id}:{target}")),
                )
                .await
                .map_err(|e| HandlerError::Other(e.into()))?;
            self.mark_commanded(change_id, target);
        }
        self.commanded.lock().remove(change_id);

        info!(
            file = %message.name,
            version = message.version,
            targets = self.targets.len(),
            correlation_id = context.header().correlation_id(),
            "Reload requested"
        );
        Ok(())
    }
}

/// Counts reloads addressed to `service_name`.
pub struct ReloadHandler {
    service_name: String,
    reloads: Arc<AtomicU64>,
}

impl ReloadHandler {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            reloads: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Shared reload counter.
    pub fn reloads(&self) -> Arc<AtomicU64> {
        self.reloads.clone()
    }
}

#[async_trait]
impl MessageHandler<ReloadConfiguration> for ReloadHandler {
    async fn handle(
        &self,
        message: &ReloadConfiguration,
        context: &MessageContext,
    ) -> Result<(), HandlerError> {
        if message.target_service != self.service_name {
            return Ok(());
        }

        let count = self.reloads.fetch_add(1, Ordering::SeqCst) + 1;
        info!(
            reason = %message.reason,
            reloads = count,
            causation_id = context.header().causation_id().unwrap_or(""),
            "Configuration reloaded"
        );
        Ok(())
    }
}
