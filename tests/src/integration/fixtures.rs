//! # Shared Fixtures
//!
//! Payload types, registries and transports used across the integration
//! flows and the codec benchmarks.

use async_trait::async_trait;
use bytes::Bytes;
use mesh_bus::{
    BrokerConfig, DeliveryCallback, Message, MessageCategory, RetryPolicy, Transport,
    TransportError, TransportSubscription, TypeRegistry,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// PAYLOADS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderPlaced {
    pub order_id: String,
}

impl Message for OrderPlaced {
    fn category(&self) -> MessageCategory {
        MessageCategory::Event {
            aggregate_id: self.order_id.clone(),
            aggregate_type: "Order".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShipOrder {
    pub order_id: String,
    pub warehouse: String,
}

impl Message for ShipOrder {
    fn category(&self) -> MessageCategory {
        MessageCategory::Command {
            target_id: self.warehouse.clone(),
        }
    }
}

/// Payload with enough shape to exercise nested encoding and compression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventorySnapshot {
    pub warehouse: String,
    pub items: Vec<InventoryItem>,
    pub tags: BTreeMap<String, String>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryItem {
    pub sku: String,
    pub quantity: u32,
    pub unit_price: f64,
    pub reserved: bool,
}

impl Message for InventorySnapshot {}

/// Never registered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unlisted {
    pub value: u64,
}

impl Message for Unlisted {}

impl InventorySnapshot {
    /// Snapshot with `items` entries; large ones cross the compression threshold.
    pub fn with_items(items: usize) -> Self {
        Self {
            warehouse: "north".to_string(),
            items: (0..items)
                .map(|i| InventoryItem {
                    sku: format!("SKU-{i:06}"),
                    quantity: (i % 97) as u32,
                    unit_price: 1.25 * i as f64,
                    reserved: i % 3 == 0,
                })
                .collect(),
            tags: BTreeMap::from([("region".to_string(), "eu".to_string())]),
            note: None,
        }
    }
}

// =============================================================================
// WIRING
// =============================================================================

/// Registry with every fixture payload except [`Unlisted`].
pub fn registry() -> Arc<TypeRegistry> {
    let registry = Arc::new(TypeRegistry::new());
    registry.register::<OrderPlaced>("OrderPlaced");
    registry.register::<ShipOrder>("ShipOrder");
    registry.register::<InventorySnapshot>("InventorySnapshot");
    registry
}

/// Broker config with fast retries and a short drain budget.
pub fn broker_config(service_name: &str) -> BrokerConfig {
    BrokerConfig {
        retry: RetryPolicy::immediate(3),
        handler_timeout: Duration::from_secs(5),
        shutdown_timeout: Duration::from_secs(2),
        ..BrokerConfig::for_service(service_name)
    }
}

/// Poll `condition` until it holds, failing after five seconds.
pub async fn wait_for(condition: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

// =============================================================================
// SPY TRANSPORT
// =============================================================================

/// Records writes and never delivers.
#[derive(Default)]
pub struct SpyTransport {
    writes: Mutex<Vec<(String, Bytes)>>,
    subscribes: AtomicUsize,
}

impl SpyTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn writes(&self) -> Vec<(String, Bytes)> {
        self.writes.lock().clone()
    }

    pub fn write_count(&self) -> usize {
        self.writes.lock().len()
    }
}

struct NoopSubscription(String);

impl TransportSubscription for NoopSubscription {
    fn channel(&self) -> &str {
        &self.0
    }

    fn unsubscribe(&self) {}
}

#[async_trait]
impl Transport for SpyTransport {
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<(), TransportError> {
        self.writes.lock().push((channel.to_string(), payload));
        Ok(())
    }

    async fn subscribe(
        &self,
        channel: &str,
        _callback: DeliveryCallback,
    ) -> Result<Box<dyn TransportSubscription>, TransportError> {
        self.subscribes.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(NoopSubscription(channel.to_string())))
    }
}
