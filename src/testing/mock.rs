//! Failing store implementations
//!
//! Each mock can be switched between passing through to an in-memory store
//! and failing every call with `StoreError::Unavailable`, so tests can break
//! a collaborator part way through a flow.

use crate::models::Identity;
use crate::store::{
    IdentityStore, KeyValueStore, MemoryIdentityStore, MemoryKeyValueStore, ProviderDataStore,
    StoreError,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

fn unavailable() -> StoreError {
    StoreError::Unavailable("injected failure".to_string())
}

/// Switch shared between a mock and the test controlling it
#[derive(Debug, Clone, Default)]
pub struct FailureSwitch(Arc<AtomicBool>);

impl FailureSwitch {
    #[must_use]
    pub fn new(failing: bool) -> Self {
        Self(Arc::new(AtomicBool::new(failing)))
    }

    pub fn set(&self, failing: bool) {
        self.0.store(failing, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_failing(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.is_failing() {
            Err(unavailable())
        } else {
            Ok(())
        }
    }
}

/// Key-value store that fails while its switch is on
#[derive(Debug, Default)]
pub struct FailingKeyValueStore {
    inner: MemoryKeyValueStore,
    switch: FailureSwitch,
}

impl FailingKeyValueStore {
    #[must_use]
    pub fn new(switch: FailureSwitch) -> Self {
        Self {
            inner: MemoryKeyValueStore::new(),
            switch,
        }
    }
}

#[async_trait]
impl KeyValueStore for FailingKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.switch.check()?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &[u8], expire_at: DateTime<Utc>) -> Result<(), StoreError> {
        self.switch.check()?;
        self.inner.set(key, value, expire_at).await
    }

    async fn add(&self, key: &str, value: &[u8], expire_at: DateTime<Utc>) -> Result<bool, StoreError> {
        self.switch.check()?;
        self.inner.add(key, value, expire_at).await
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        old: &[u8],
        new: &[u8],
        expire_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.switch.check()?;
        self.inner.compare_and_swap(key, old, new, expire_at).await
    }

    async fn take(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.switch.check()?;
        self.inner.take(key).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.switch.check()?;
        self.inner.delete(key).await
    }
}

/// Provider data store whose chosen namespaces fail while the switch is on
#[derive(Debug, Default)]
pub struct FailingProviderDataStore {
    namespaces: Mutex<std::collections::HashMap<String, Arc<FailingKeyValueStore>>>,
    failing_namespaces: HashSet<String>,
    switch: FailureSwitch,
}

impl FailingProviderDataStore {
    /// Namespaces in `failing` follow `switch`; every other namespace works
    #[must_use]
    pub fn new(failing: &[&str], switch: FailureSwitch) -> Self {
        Self {
            namespaces: Mutex::default(),
            failing_namespaces: failing.iter().map(|ns| (*ns).to_string()).collect(),
            switch,
        }
    }
}

#[async_trait]
impl ProviderDataStore for FailingProviderDataStore {
    async fn key_value_store(&self, namespace: &str) -> Result<Arc<dyn KeyValueStore>, StoreError> {
        let mut namespaces = self
            .namespaces
            .lock()
            .map_err(|_| StoreError::Unavailable("namespace lock poisoned".to_string()))?;
        let store = namespaces
            .entry(namespace.to_string())
            .or_insert_with(|| {
                let switch = if self.failing_namespaces.contains(namespace) {
                    self.switch.clone()
                } else {
                    FailureSwitch::new(false)
                };
                Arc::new(FailingKeyValueStore::new(switch))
            })
            .clone();
        Ok(store)
    }
}

/// Identity store that fails while its switch is on
#[derive(Debug, Default)]
pub struct FailingIdentityStore {
    inner: MemoryIdentityStore,
    switch: FailureSwitch,
}

impl FailingIdentityStore {
    #[must_use]
    pub fn new(switch: FailureSwitch) -> Self {
        Self {
            inner: MemoryIdentityStore::new(),
            switch,
        }
    }
}

#[async_trait]
impl IdentityStore for FailingIdentityStore {
    async fn identity(&self, username: &str) -> Result<Option<Identity>, StoreError> {
        self.switch.check()?;
        self.inner.identity(username).await
    }

    async fn update_identity(&self, identity: &Identity) -> Result<(), StoreError> {
        self.switch.check()?;
        self.inner.update_identity(identity).await
    }

    async fn update_last_login(&self, username: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.switch.check()?;
        self.inner.update_last_login(username, at).await
    }
}
