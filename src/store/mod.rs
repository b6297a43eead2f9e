//! Storage collaborators
//!
//! The discharge core keeps no state of its own. Rendezvous slots, one-time
//! codes and provider data live in a [`KeyValueStore`] obtained from a
//! [`ProviderDataStore`], and identities live in an [`IdentityStore`]. When
//! several instances serve the same location they must share these stores.

pub mod memory;

use crate::models::Identity;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

pub use memory::{MemoryIdentityStore, MemoryKeyValueStore, MemoryProviderDataStore};

/// Storage failures
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("corrupt store entry: {0}")]
    Corrupt(String),
    #[error("not found: {0}")]
    NotFound(String),
}

/// Expiring key-value store
///
/// Entries past their expiry are never returned, whether or not they have
/// been purged yet.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Get the unexpired value stored under `key`
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Store `value` under `key`, replacing any existing entry
    async fn set(&self, key: &str, value: &[u8], expire_at: DateTime<Utc>)
        -> Result<(), StoreError>;

    /// Store `value` only if no unexpired entry exists; returns whether it was stored
    async fn add(&self, key: &str, value: &[u8], expire_at: DateTime<Utc>)
        -> Result<bool, StoreError>;

    /// Replace the entry only if it currently holds exactly `old`; returns whether it was replaced
    async fn compare_and_swap(
        &self,
        key: &str,
        old: &[u8],
        new: &[u8],
        expire_at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Atomically remove and return the unexpired value under `key`
    async fn take(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// Source of namespaced key-value stores
#[async_trait]
pub trait ProviderDataStore: Send + Sync {
    /// Key-value store for `namespace`; the same namespace always yields the same data
    async fn key_value_store(&self, namespace: &str)
        -> Result<Arc<dyn KeyValueStore>, StoreError>;
}

/// Persistent identity records
#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn identity(&self, username: &str) -> Result<Option<Identity>, StoreError>;

    /// Create or replace the record for `identity.username`
    async fn update_identity(&self, identity: &Identity) -> Result<(), StoreError>;

    async fn update_last_login(&self, username: &str, at: DateTime<Utc>)
        -> Result<(), StoreError>;
}
