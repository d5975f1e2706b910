//! Key-value storage sink interface.
//!
//! Mirrors the subset of a Redis-style store the pipeline's collaborators
//! use: plain keys with TTLs, lists, hashes, sets, and multi-command
//! transactions. Drivers live outside this crate.

use std::time::Duration;

use serde::Deserialize;

use super::StorageError;

fn default_port() -> u16 {
    6379
}

fn default_timeout_ms() -> u64 {
    3000
}

fn default_pool_size() -> usize {
    4
}

/// Connection settings for a key-value store, parsed from a JSON document.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct KvStoreConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub password: String,
    /// Logical database index.
    #[serde(default)]
    pub database: u32,
    /// Operation timeout in milliseconds.
    #[serde(default = "default_timeout_ms", rename = "timeout")]
    pub timeout_ms: u64,
    #[serde(default = "default_pool_size", rename = "poolSize")]
    pub pool_size: usize,
}

/// One command inside a multi-key transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KvCommand {
    Set {
        key: String,
        value: String,
        ttl: Option<Duration>,
    },
    Delete {
        key: String,
    },
    ListPush {
        key: String,
        value: String,
    },
    HashSet {
        key: String,
        field: String,
        value: String,
    },
    SetAdd {
        key: String,
        member: String,
    },
}

/// Capability implemented by key-value storage drivers.
pub trait KvStore: Send + Sync {
    /// Liveness probe.
    fn ping(&self) -> bool;

    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StorageError>;
    /// Returns `false` when the key does not exist.
    fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StorageError>;
    fn delete(&self, key: &str) -> Result<bool, StorageError>;

    /// Append to the list tail; returns the new length.
    fn list_push(&self, key: &str, value: &str) -> Result<usize, StorageError>;
    /// Prepend to the list head; returns the new length.
    fn list_push_front(&self, key: &str, value: &str) -> Result<usize, StorageError>;
    fn list_pop(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn list_pop_front(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn list_len(&self, key: &str) -> Result<usize, StorageError>;
    /// Negative indices count from the tail, Redis style.
    fn list_range(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, StorageError>;

    /// Returns `true` when the field was newly created.
    fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<bool, StorageError>;
    fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, StorageError>;
    fn hash_delete(&self, key: &str, field: &str) -> Result<bool, StorageError>;
    fn hash_exists(&self, key: &str, field: &str) -> Result<bool, StorageError>;
    fn hash_get_all(&self, key: &str) -> Result<Vec<(String, String)>, StorageError>;

    /// Returns `true` when the member was newly added.
    fn set_add(&self, key: &str, member: &str) -> Result<bool, StorageError>;
    fn set_remove(&self, key: &str, member: &str) -> Result<bool, StorageError>;
    fn set_is_member(&self, key: &str, member: &str) -> Result<bool, StorageError>;
    fn set_members(&self, key: &str) -> Result<Vec<String>, StorageError>;
    fn set_size(&self, key: &str) -> Result<usize, StorageError>;

    /// Execute `commands` atomically; either all apply or none do.
    fn run_transaction(&self, commands: &[KvCommand]) -> Result<(), StorageError>;
}
