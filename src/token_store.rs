//! One-time codes for the redirect completion flow
//!
//! When a login completes in redirect mode the credential is parked here
//! under a fresh code, and the user agent carries only the code back to the
//! `return_to` address. The code is exchanged once for the credential.

use crate::error::DischargeError;
use crate::models::Credential;
use crate::store::KeyValueStore;
use crate::utils::crypto::generate_token;
use crate::utils::logging::Logger;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Provider data namespace holding parked credentials
pub const DISCHARGE_TOKEN_NAMESPACE: &str = "_discharge_tokens";

/// How long a code may be exchanged after it was issued
pub const CODE_VALIDITY: chrono::Duration = chrono::Duration::minutes(10);

const MAX_ALLOCATION_ATTEMPTS: usize = 3;

/// Expiring code to credential map
#[derive(Clone)]
pub struct DischargeTokenStore {
    store: Arc<dyn KeyValueStore>,
    logger: Logger,
}

impl DischargeTokenStore {
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>, logger: Logger) -> Self {
        Self { store, logger }
    }

    /// Park `credential` until `expire_at` and return the code for it
    ///
    /// # Errors
    ///
    /// Returns `Internal` if the credential cannot be encoded and `Transient`
    /// if the store is unavailable.
    pub async fn put(
        &self,
        credential: &Credential,
        expire_at: DateTime<Utc>,
    ) -> Result<String, DischargeError> {
        let value = serde_json::to_vec(credential).map_err(|e| {
            DischargeError::internal("cannot encode discharge token").with_cause(e)
        })?;

        for _ in 0..MAX_ALLOCATION_ATTEMPTS {
            let code = generate_token();
            if self
                .store
                .add(&code, &value, expire_at)
                .await
                .map_err(|e| DischargeError::from(e).context("cannot store discharge token"))?
            {
                self.logger
                    .debug(format_args!("stored discharge token until {expire_at}"));
                return Ok(code);
            }
        }
        Err(DischargeError::transient(
            "cannot store discharge token: no unused code",
        ))
    }

    /// Exchange `code` for its credential, invalidating the code
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown, consumed or expired codes and
    /// `Transient` if the store is unavailable.
    pub async fn get(&self, code: &str) -> Result<Credential, DischargeError> {
        let raw = self
            .store
            .take(code)
            .await
            .map_err(|e| DischargeError::from(e).context("cannot get discharge token"))?
            .ok_or_else(|| DischargeError::not_found("discharge token not found"))?;

        serde_json::from_slice(&raw).map_err(|e| {
            self.logger
                .warn(format_args!("discarding corrupt discharge token entry: {e}"));
            DischargeError::transient("corrupt discharge token").with_cause(e)
        })
    }
}

impl std::fmt::Debug for DischargeTokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DischargeTokenStore").finish_non_exhaustive()
    }
}
