//! # Type Registry
//!
//! Bidirectional mapping between a stable wire-level message type name and
//! the concrete Rust payload type.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let registry = TypeRegistry::new();
//!
//! // At startup, before any publish or subscribe
//! registry.register::<OrderPlaced>("OrderPlaced");
//!
//! assert_eq!(registry.name_of::<OrderPlaced>().as_deref(), Some("OrderPlaced"));
//! assert_eq!(registry.resolve("OrderPlaced"), Some(PayloadType::of::<OrderPlaced>()));
//! ```
//!
//! Written once per type at startup, read on every publish and delivery.
//! Lookups take a shared `parking_lot` read lock, so concurrent dispatch
//! tasks never wait on each other.

use crate::errors::RegistryError;
use crate::message::Message;
use parking_lot::RwLock;
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Identity of a concrete payload type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PayloadType {
    type_id: TypeId,
    rust_name: &'static str,
}

impl PayloadType {
    /// Identity of `T`.
    pub fn of<T: 'static>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            rust_name: std::any::type_name::<T>(),
        }
    }

    /// The Rust `TypeId`.
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// The Rust type path, for diagnostics only.
    pub fn rust_name(&self) -> &'static str {
        self.rust_name
    }
}

#[derive(Default)]
struct RegistryMaps {
    by_name: HashMap<Arc<str>, PayloadType>,
    by_type: HashMap<TypeId, Arc<str>>,
}

/// Name ↔ payload type registry shared by the publisher and dispatchers.
#[derive(Default)]
pub struct TypeRegistry {
    maps: RwLock<RegistryMaps>,
}

impl TypeRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `name` to `T`.
    ///
    /// # Panics
    ///
    /// On a conflicting registration. Decoding bytes into the wrong shape is
    /// worse than refusing to start, so this is meant for startup code. Use
    /// [`try_register`](Self::try_register) to handle the conflict instead.
    pub fn register<T: Message>(&self, name: &str) {
        if let Err(e) = self.try_register::<T>(name) {
            panic!("type registry misconfigured: {e}");
        }
    }

    /// Bind `name` to `T`, failing on a conflict.
    ///
    /// Registering the same pair twice is a no-op.
    ///
    /// # Errors
    ///
    /// - `RegistryError::EmptyName` - `name` is blank
    /// - `RegistryError::DuplicateName` - `name` is bound to another type
    /// - `RegistryError::DuplicateType` - `T` is bound to another name
    pub fn try_register<T: Message>(&self, name: &str) -> Result<(), RegistryError> {
        if name.trim().is_empty() {
            return Err(RegistryError::EmptyName);
        }

        let payload_type = PayloadType::of::<T>();
        let mut maps = self.maps.write();

        match (
            maps.by_name.get(name),
            maps.by_type.get(&payload_type.type_id),
        ) {
            (Some(existing), _) if *existing != payload_type => {
                return Err(RegistryError::DuplicateName {
                    name: name.to_string(),
                    existing: existing.rust_name,
                    requested: payload_type.rust_name,
                });
            }
            (_, Some(existing)) if existing.as_ref() != name => {
                return Err(RegistryError::DuplicateType {
                    rust_type: payload_type.rust_name,
                    existing: existing.to_string(),
                    requested: name.to_string(),
                });
            }
            (Some(_), Some(_)) => return Ok(()),
            _ => {}
        }

        let name: Arc<str> = Arc::from(name);
        maps.by_name.insert(name.clone(), payload_type);
        maps.by_type.insert(payload_type.type_id, name.clone());

        debug!(
            message_type = %name,
            rust_type = payload_type.rust_name,
            "Message type registered"
        );
        Ok(())
    }

    /// Payload type bound to a wire name.
    pub fn resolve(&self, name: &str) -> Option<PayloadType> {
        self.maps.read().by_name.get(name).copied()
    }

    /// Wire name bound to `T`.
    pub fn name_of<T: 'static>(&self) -> Option<Arc<str>> {
        self.name_of_type(PayloadType::of::<T>())
    }

    /// Wire name bound to a payload type.
    pub fn name_of_type(&self, payload_type: PayloadType) -> Option<Arc<str>> {
        self.maps.read().by_type.get(&payload_type.type_id).cloned()
    }

    /// Whether a wire name is bound.
    pub fn contains(&self, name: &str) -> bool {
        self.maps.read().by_name.contains_key(name)
    }

    /// Number of registered types.
    pub fn len(&self) -> usize {
        self.maps.read().by_name.len()
    }

    /// Whether nothing has been registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
