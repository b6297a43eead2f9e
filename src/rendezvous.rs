//! Cross-instance rendezvous between a waiting discharge and a login
//!
//! A discharge request that needs interaction gets a fresh discharge id and a
//! `Pending` slot in the shared key-value store. Whoever completes the login,
//! on any instance, moves the slot to `Completed` with a compare-and-swap,
//! and the waiter picks the outcome up by polling the store. Waiters on the
//! completing instance are also woken directly.
//!
//! Slot lifecycle:
//!
//! ```text
//! new_rendezvous -> Pending --done--> Completed --wait--> (consumed)
//!                      |                  |
//!                      +---- deadline / abandoned wait / expiry ----> (removed)
//! ```

use crate::error::DischargeError;
use crate::models::LoginOutcome;
use crate::store::KeyValueStore;
use crate::utils::crypto::generate_token;
use crate::utils::logging::Logger;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Namespace holding rendezvous slots
pub const RENDEZVOUS_NAMESPACE: &str = "_rendezvous";

/// Default interval between polls of the shared store
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

const MAX_ALLOCATION_ATTEMPTS: usize = 3;
const MAX_DONE_ATTEMPTS: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
enum SlotState {
    Pending,
    Completed { outcome: LoginOutcome },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Slot {
    expires_at: DateTime<Utc>,
    #[serde(flatten)]
    state: SlotState,
}

impl Slot {
    fn encode(&self) -> Result<Vec<u8>, DischargeError> {
        serde_json::to_vec(self).map_err(|e| {
            DischargeError::internal("cannot encode rendezvous slot").with_cause(e)
        })
    }

    fn decode(raw: &[u8]) -> Result<Self, DischargeError> {
        serde_json::from_slice(raw).map_err(|e| {
            DischargeError::transient("corrupt rendezvous slot").with_cause(e)
        })
    }
}

/// Timing for a [`RendezvousPlace`]
#[derive(Debug, Clone, Copy)]
pub struct RendezvousConfig {
    /// Interval between polls of the shared store while waiting
    pub poll_interval: Duration,
    /// How long an unclaimed slot is retained before it expires
    pub slot_lifetime: Duration,
}

impl Default for RendezvousConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            slot_lifetime: Duration::from_secs(15 * 60),
        }
    }
}

/// Wait/notify primitive keyed by one-time discharge ids
#[derive(Clone)]
pub struct RendezvousPlace {
    store: Arc<dyn KeyValueStore>,
    notify: Arc<Notify>,
    config: RendezvousConfig,
    logger: Logger,
}

impl RendezvousPlace {
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>, config: RendezvousConfig, logger: Logger) -> Self {
        Self {
            store,
            notify: Arc::new(Notify::new()),
            config,
            logger,
        }
    }

    /// Allocate a fresh discharge id with a pending slot
    ///
    /// # Errors
    ///
    /// Returns a `Transient` error if the store is unavailable or no unused id
    /// could be allocated.
    pub async fn new_rendezvous(&self) -> Result<String, DischargeError> {
        let expires_at = self.slot_expiry()?;
        let pending = Slot {
            expires_at,
            state: SlotState::Pending,
        }
        .encode()?;

        for _ in 0..MAX_ALLOCATION_ATTEMPTS {
            let id = generate_token();
            if self
                .store
                .add(&slot_key(&id), &pending, expires_at)
                .await
                .map_err(|e| DischargeError::from(e).context("cannot create rendezvous"))?
            {
                self.logger
                    .debug(format_args!("created rendezvous {id}"));
                return Ok(id);
            }
        }
        Err(DischargeError::transient(
            "cannot create rendezvous: no unused discharge id",
        ))
    }

    /// Wait until the login for `id` completes or `deadline` passes
    ///
    /// The slot is consumed when an outcome is returned, and removed when the
    /// deadline passes or the returned future is dropped before completion.
    ///
    /// # Errors
    ///
    /// - `NotFound` if `id` was never allocated or was already consumed
    /// - `Timeout` if no outcome arrived before `deadline`
    /// - `Transient` if the store is unavailable; the slot is kept
    pub async fn wait(&self, id: &str, deadline: Instant) -> Result<LoginOutcome, DischargeError> {
        let key = slot_key(id);
        // Released only when the wait is dropped before returning.
        let mut guard = SlotGuard::new(self.store.clone(), key.clone(), self.logger.clone());
        let result = self.poll_slot(id, &key, deadline).await;
        guard.disarm();
        result
    }

    async fn poll_slot(
        &self,
        id: &str,
        key: &str,
        deadline: Instant,
    ) -> Result<LoginOutcome, DischargeError> {
        let mut seen_pending = false;

        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let Some(slot) = self.load(key).await? else {
                if !seen_pending {
                    return Err(unknown_id(id));
                }
                // The slot expired under us; no login can land any more.
                tokio::time::sleep_until(deadline).await;
                return Err(timed_out(id));
            };

            if let SlotState::Completed { .. } = slot.state {
                return self.consume(key).await?.ok_or_else(|| unknown_id(id));
            }
            seen_pending = true;

            let now = Instant::now();
            if now >= deadline {
                // An outcome that landed between the load and now still counts.
                if let Some(outcome) = self.consume(key).await? {
                    return Ok(outcome);
                }
                self.logger
                    .debug(format_args!("rendezvous {id} timed out"));
                return Err(timed_out(id));
            }

            let pause = self.config.poll_interval.min(deadline - now);
            tokio::select! {
                () = &mut notified => {}
                () = tokio::time::sleep(pause) => {}
            }
        }
    }

    /// Deliver `outcome` to the waiter for `id`
    ///
    /// # Errors
    ///
    /// - `NotFound` if `id` is unknown, expired or already consumed
    /// - `AlreadyCompleted` if an outcome was already delivered for `id`
    /// - `Transient` if the store is unavailable
    pub async fn done(&self, id: &str, outcome: LoginOutcome) -> Result<(), DischargeError> {
        let key = slot_key(id);

        for _ in 0..MAX_DONE_ATTEMPTS {
            let Some(raw) = self
                .store
                .get(&key)
                .await
                .map_err(|e| DischargeError::from(e).context("cannot complete rendezvous"))?
            else {
                return Err(unknown_id(id));
            };

            let slot = Slot::decode(&raw)?;
            if let SlotState::Completed { .. } = slot.state {
                return Err(DischargeError::already_completed(format!(
                    "discharge id {id} already completed"
                )));
            }

            let completed = Slot {
                expires_at: slot.expires_at,
                state: SlotState::Completed {
                    outcome: outcome.clone(),
                },
            }
            .encode()?;

            if self
                .store
                .compare_and_swap(&key, &raw, &completed, slot.expires_at)
                .await
                .map_err(|e| DischargeError::from(e).context("cannot complete rendezvous"))?
            {
                self.logger
                    .debug(format_args!("completed rendezvous {id}"));
                self.notify.notify_waiters();
                return Ok(());
            }
        }

        Err(DischargeError::transient(format!(
            "cannot complete rendezvous {id}: slot kept changing"
        )))
    }

    async fn load(&self, key: &str) -> Result<Option<Slot>, DischargeError> {
        let raw = self
            .store
            .get(key)
            .await
            .map_err(|e| DischargeError::from(e).context("cannot wait for login"))?;
        raw.as_deref().map(Slot::decode).transpose()
    }

    // Removes the slot and returns its outcome if it had one.
    async fn consume(&self, key: &str) -> Result<Option<LoginOutcome>, DischargeError> {
        let raw = self
            .store
            .take(key)
            .await
            .map_err(|e| DischargeError::from(e).context("cannot wait for login"))?;
        match raw.as_deref().map(Slot::decode).transpose()? {
            Some(Slot {
                state: SlotState::Completed { outcome },
                ..
            }) => Ok(Some(outcome)),
            _ => Ok(None),
        }
    }

    fn slot_expiry(&self) -> Result<DateTime<Utc>, DischargeError> {
        chrono::Duration::from_std(self.config.slot_lifetime)
            .ok()
            .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
            .ok_or_else(|| DischargeError::internal("rendezvous slot lifetime out of range"))
    }
}

impl std::fmt::Debug for RendezvousPlace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RendezvousPlace")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn slot_key(id: &str) -> String {
    format!("slot:{id}")
}

fn unknown_id(id: &str) -> DischargeError {
    DischargeError::not_found(format!("discharge id {id} not found"))
}

fn timed_out(id: &str) -> DischargeError {
    DischargeError::timeout(format!(
        "timed out waiting for login for discharge id {id}"
    ))
}

/// Removes an abandoned slot when a wait is dropped mid-flight
struct SlotGuard {
    store: Arc<dyn KeyValueStore>,
    key: String,
    logger: Logger,
    armed: bool,
}

impl SlotGuard {
    fn new(store: Arc<dyn KeyValueStore>, key: String, logger: Logger) -> Self {
        Self {
            store,
            key,
            logger,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let store = self.store.clone();
        let key = std::mem::take(&mut self.key);
        let logger = self.logger.clone();
        handle.spawn(async move {
            if let Err(e) = store.delete(&key).await {
                logger.warn(format_args!("cannot release abandoned rendezvous slot: {e}"));
            }
        });
    }
}
