//! In-memory stores
//!
//! These back a single instance, and several instances only when they share
//! the same process. A replicated deployment swaps them for shared backends
//! behind the same traits.

use super::{IdentityStore, KeyValueStore, ProviderDataStore, StoreError};
use crate::models::Identity;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    expire_at: DateTime<Utc>,
}

impl Entry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expire_at > now
    }
}

/// Expiring key-value map guarded by a `tokio` lock
///
/// Expired entries are hidden on read and purged on every write.
#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryKeyValueStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, expired ones included until the next write
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn purge(entries: &mut HashMap<String, Entry>, now: DateTime<Utc>) {
        entries.retain(|_, entry| entry.is_live(now));
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let now = Utc::now();
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone()))
    }

    async fn set(
        &self,
        key: &str,
        value: &[u8],
        expire_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut entries = self.entries.write().await;
        Self::purge(&mut entries, Utc::now());
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_vec(),
                expire_at,
            },
        );
        Ok(())
    }

    async fn add(
        &self,
        key: &str,
        value: &[u8],
        expire_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut entries = self.entries.write().await;
        Self::purge(&mut entries, Utc::now());
        if entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_vec(),
                expire_at,
            },
        );
        Ok(true)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        old: &[u8],
        new: &[u8],
        expire_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut entries = self.entries.write().await;
        Self::purge(&mut entries, Utc::now());
        match entries.get_mut(key) {
            Some(entry) if entry.value == old => {
                entry.value = new.to_vec();
                entry.expire_at = expire_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn take(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let now = Utc::now();
        let mut entries = self.entries.write().await;
        Ok(entries
            .remove(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value))
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

/// Namespaced in-memory key-value stores
#[derive(Debug, Default, Clone)]
pub struct MemoryProviderDataStore {
    namespaces: Arc<RwLock<HashMap<String, Arc<MemoryKeyValueStore>>>>,
}

impl MemoryProviderDataStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Concrete store for `namespace`, for inspection in tests
    pub async fn namespace(&self, namespace: &str) -> Arc<MemoryKeyValueStore> {
        let mut namespaces = self.namespaces.write().await;
        namespaces
            .entry(namespace.to_string())
            .or_insert_with(|| Arc::new(MemoryKeyValueStore::new()))
            .clone()
    }
}

#[async_trait]
impl ProviderDataStore for MemoryProviderDataStore {
    async fn key_value_store(
        &self,
        namespace: &str,
    ) -> Result<Arc<dyn KeyValueStore>, StoreError> {
        let store: Arc<dyn KeyValueStore> = self.namespace(namespace).await;
        Ok(store)
    }
}

/// In-memory identity records keyed by username
#[derive(Debug, Default)]
pub struct MemoryIdentityStore {
    identities: RwLock<HashMap<String, Identity>>,
}

impl MemoryIdentityStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdentityStore for MemoryIdentityStore {
    async fn identity(&self, username: &str) -> Result<Option<Identity>, StoreError> {
        Ok(self.identities.read().await.get(username).cloned())
    }

    async fn update_identity(&self, identity: &Identity) -> Result<(), StoreError> {
        self.identities
            .write()
            .await
            .insert(identity.username.clone(), identity.clone());
        Ok(())
    }

    async fn update_last_login(
        &self,
        username: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut identities = self.identities.write().await;
        match identities.get_mut(username) {
            Some(identity) => {
                identity.last_login = Some(at);
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("identity {username}"))),
        }
    }
}
