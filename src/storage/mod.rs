//! Pluggable persistence behind a storage factory.
//!
//! Two sink kinds exist: a record-oriented [`RowStore`] and a key-value
//! [`KvStore`]. The factory parses their configs from JSON documents, builds
//! concrete sinks through registered driver constructors, and holds a
//! name-to-handle registry with typed retrieval. Storage sinks never sit on
//! the ingestion hot path.

pub mod kv;
pub mod row;

use std::any::Any;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

pub use kv::{KvCommand, KvStore, KvStoreConfig};
pub use row::{RowStore, RowStoreConfig, StoredEntry};

/// Errors reported by storage configuration and drivers.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum StorageError {
    /// The configuration document cannot describe a working sink.
    #[error("invalid storage configuration: {0}")]
    InvalidConfig(String),
    /// The sink is unreachable.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    /// A storage operation failed.
    #[error("storage operation failed: {0}")]
    Operation(String),
}

/// The two sink kinds the factory can build.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageKind {
    Row,
    Kv,
}

type RowConstructor =
    Arc<dyn Fn(&RowStoreConfig) -> Result<Arc<dyn RowStore>, StorageError> + Send + Sync>;
type KvConstructor =
    Arc<dyn Fn(&KvStoreConfig) -> Result<Arc<dyn KvStore>, StorageError> + Send + Sync>;

/// Builds storage sinks and tracks named handles.
#[derive(Default)]
pub struct StorageFactory {
    row_constructor: RwLock<Option<RowConstructor>>,
    kv_constructor: RwLock<Option<KvConstructor>>,
    registry: RwLock<HashMap<String, Arc<dyn Any + Send + Sync>>>,
}

impl StorageFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a row-store config from a JSON document.
    pub fn row_config_from_json(json: &str) -> Result<RowStoreConfig, StorageError> {
        serde_json::from_str(json).map_err(|err| StorageError::InvalidConfig(err.to_string()))
    }

    /// Parse a key-value config from a JSON document.
    pub fn kv_config_from_json(json: &str) -> Result<KvStoreConfig, StorageError> {
        serde_json::from_str(json).map_err(|err| StorageError::InvalidConfig(err.to_string()))
    }

    /// Install the driver used to build row stores.
    pub fn set_row_constructor(
        &self,
        constructor: impl Fn(&RowStoreConfig) -> Result<Arc<dyn RowStore>, StorageError>
        + Send
        + Sync
        + 'static,
    ) {
        *self.row_constructor.write() = Some(Arc::new(constructor));
    }

    /// Install the driver used to build key-value stores.
    pub fn set_kv_constructor(
        &self,
        constructor: impl Fn(&KvStoreConfig) -> Result<Arc<dyn KvStore>, StorageError>
        + Send
        + Sync
        + 'static,
    ) {
        *self.kv_constructor.write() = Some(Arc::new(constructor));
    }

    /// Build a row store from its config through the installed driver.
    pub fn create_row_store(
        &self,
        config: &RowStoreConfig,
    ) -> Result<Arc<dyn RowStore>, StorageError> {
        let constructor = self.row_constructor.read().clone();
        match constructor {
            Some(build) => build(config),
            None => Err(StorageError::Unavailable(
                "no row storage driver registered".into(),
            )),
        }
    }

    /// Build a key-value store from its config through the installed driver.
    pub fn create_kv_store(&self, config: &KvStoreConfig) -> Result<Arc<dyn KvStore>, StorageError> {
        let constructor = self.kv_constructor.read().clone();
        match constructor {
            Some(build) => build(config),
            None => Err(StorageError::Unavailable(
                "no key-value storage driver registered".into(),
            )),
        }
    }

    /// Parse a config document and build the matching sink kind.
    pub fn create_row_store_from_json(
        &self,
        json: &str,
    ) -> Result<Arc<dyn RowStore>, StorageError> {
        let config = Self::row_config_from_json(json)?;
        self.create_row_store(&config)
    }

    /// Parse a config document and build the matching sink kind.
    pub fn create_kv_store_from_json(&self, json: &str) -> Result<Arc<dyn KvStore>, StorageError> {
        let config = Self::kv_config_from_json(json)?;
        self.create_kv_store(&config)
    }

    /// Register a named handle. Fails when the name is taken.
    pub fn register_storage<T: Send + Sync + 'static>(&self, name: &str, handle: Arc<T>) -> bool {
        match self.registry.write().entry(name.to_owned()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(handle);
                true
            }
        }
    }

    /// Fetch a typed handle by name; `None` when absent or of another type.
    pub fn get_storage<T: Send + Sync + 'static>(&self, name: &str) -> Option<Arc<T>> {
        let handle = self.registry.read().get(name).cloned()?;
        handle.downcast::<T>().ok()
    }

    pub fn registered_count(&self) -> usize {
        self.registry.read().len()
    }
}
