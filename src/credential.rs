//! Credential minting
//!
//! The [`Oven`] is the minting capability the discharger depends on: it mints
//! login credentials and discharges, verifies credentials presented back to
//! it, and decodes third-party caveat ids. [`HmacOven`] is a self-contained
//! implementation keyed from the service secret.

use crate::error::DischargeError;
use crate::models::{Credential, Declaration, Identity};
use crate::store::IdentityStore;
use crate::utils::crypto::{decrypt_data, derive_key, encrypt_data, hmac_sha256, verify_hmac_sha256};
use crate::utils::logging::Logger;
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// How long a login credential stays valid
pub const CREDENTIAL_VALIDITY: chrono::Duration = chrono::Duration::days(28);

/// A third-party caveat addressed to this discharger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThirdPartyCaveat {
    pub condition: String,
}

/// Minting capability
#[async_trait]
pub trait Oven: Send + Sync {
    /// Mint a login credential declaring `declaration`, valid until `expires_at`
    ///
    /// # Errors
    ///
    /// Returns `Internal` if minting fails
    async fn mint(
        &self,
        declaration: &Declaration,
        expires_at: DateTime<Utc>,
    ) -> Result<Vec<u8>, DischargeError>;

    /// Verify a login credential minted by this oven
    ///
    /// # Errors
    ///
    /// Returns `Unauthorized` for forged, malformed or expired credentials
    async fn verify(&self, credential: &[u8], now: DateTime<Utc>)
        -> Result<Declaration, DischargeError>;

    /// Read the declaration of a credential without verifying it
    fn infer_declared(&self, credential: &[u8]) -> Option<Declaration>;

    /// Decode a third-party caveat id addressed to this discharger
    ///
    /// # Errors
    ///
    /// Returns `BadRequest` if the id was not issued for this discharger
    async fn decode_caveat(&self, caveat_id: &[u8]) -> Result<ThirdPartyCaveat, DischargeError>;

    /// Mint the discharge for `caveat_id` carrying `declaration`
    ///
    /// # Errors
    ///
    /// Returns `Internal` if minting fails
    async fn mint_discharge(
        &self,
        caveat_id: &[u8],
        declaration: &Declaration,
        expires_at: DateTime<Utc>,
    ) -> Result<Vec<u8>, DischargeError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum MintKind {
    Login,
    Discharge,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    kind: MintKind,
    declared: Declaration,
    expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    caveat_id: Option<String>,
}

/// Oven signing JSON claims with HMAC-SHA256
///
/// Minted values have the form `base64url(claims).base64url(signature)`.
/// Caveat ids are AES-256-GCM sealed conditions, so only holders of the
/// service secret can address caveats to this discharger.
#[derive(Clone)]
pub struct HmacOven {
    signing_key: [u8; 32],
    caveat_key: [u8; 32],
}

impl HmacOven {
    /// # Errors
    ///
    /// Returns an error if key derivation fails
    pub fn new(secret: &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            signing_key: derive_key(secret, "oven")?,
            caveat_key: derive_key(secret, "caveat")?,
        })
    }

    /// Encode a caveat id for `condition`
    ///
    /// Target services use this to address caveats to the discharger.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if sealing fails
    pub fn encode_caveat(&self, condition: &str) -> Result<Vec<u8>, DischargeError> {
        let caveat = ThirdPartyCaveat {
            condition: condition.to_string(),
        };
        encrypt_data(&caveat, &self.caveat_key)
            .map(String::into_bytes)
            .map_err(|e| internal("cannot encode caveat", &e))
    }

    /// Verify a discharge minted by this oven for `caveat_id`
    ///
    /// # Errors
    ///
    /// Returns `Unauthorized` if the discharge is forged, expired or was
    /// minted for a different caveat.
    pub fn verify_discharge(
        &self,
        discharge: &[u8],
        caveat_id: &[u8],
        now: DateTime<Utc>,
    ) -> Result<Declaration, DischargeError> {
        let claims = self.open(discharge, MintKind::Discharge, now)?;
        let expected = general_purpose::URL_SAFE_NO_PAD.encode(caveat_id);
        if claims.caveat_id.as_deref() != Some(expected.as_str()) {
            return Err(DischargeError::unauthorized(
                "discharge minted for a different caveat",
            ));
        }
        Ok(claims.declared)
    }

    fn seal(&self, claims: &Claims) -> Result<Vec<u8>, DischargeError> {
        let payload = serde_json::to_vec(claims)
            .map_err(|e| DischargeError::internal("cannot encode claims").with_cause(e))?;
        let signature = hmac_sha256(&self.signing_key, &payload)
            .map_err(|e| internal("cannot sign claims", &e))?;
        Ok(format!(
            "{}.{}",
            general_purpose::URL_SAFE_NO_PAD.encode(payload),
            general_purpose::URL_SAFE_NO_PAD.encode(signature)
        )
        .into_bytes())
    }

    fn open(
        &self,
        minted: &[u8],
        kind: MintKind,
        now: DateTime<Utc>,
    ) -> Result<Claims, DischargeError> {
        let (payload, signature) = split(minted)
            .ok_or_else(|| DischargeError::unauthorized("malformed credential"))?;
        if !verify_hmac_sha256(&self.signing_key, &payload, &signature) {
            return Err(DischargeError::unauthorized("invalid credential signature"));
        }
        let claims: Claims = serde_json::from_slice(&payload).map_err(|e| {
            DischargeError::unauthorized("malformed credential").with_cause(e)
        })?;
        if claims.kind != kind {
            return Err(DischargeError::unauthorized("unexpected credential kind"));
        }
        if claims.expires_at <= now {
            return Err(DischargeError::unauthorized("credential expired"));
        }
        Ok(claims)
    }
}

#[async_trait]
impl Oven for HmacOven {
    async fn mint(
        &self,
        declaration: &Declaration,
        expires_at: DateTime<Utc>,
    ) -> Result<Vec<u8>, DischargeError> {
        self.seal(&Claims {
            kind: MintKind::Login,
            declared: declaration.clone(),
            expires_at,
            caveat_id: None,
        })
    }

    async fn verify(
        &self,
        credential: &[u8],
        now: DateTime<Utc>,
    ) -> Result<Declaration, DischargeError> {
        self.open(credential, MintKind::Login, now)
            .map(|claims| claims.declared)
    }

    fn infer_declared(&self, credential: &[u8]) -> Option<Declaration> {
        let (payload, _) = split(credential)?;
        serde_json::from_slice::<Claims>(&payload)
            .ok()
            .map(|claims| claims.declared)
    }

    async fn decode_caveat(&self, caveat_id: &[u8]) -> Result<ThirdPartyCaveat, DischargeError> {
        let sealed = std::str::from_utf8(caveat_id)
            .map_err(|e| DischargeError::bad_request("cannot decode caveat id").with_cause(e))?;
        decrypt_data(sealed, &self.caveat_key).map_err(|e| {
            DischargeError::bad_request(format!("cannot decode caveat id: {e}"))
        })
    }

    async fn mint_discharge(
        &self,
        caveat_id: &[u8],
        declaration: &Declaration,
        expires_at: DateTime<Utc>,
    ) -> Result<Vec<u8>, DischargeError> {
        self.seal(&Claims {
            kind: MintKind::Discharge,
            declared: declaration.clone(),
            expires_at,
            caveat_id: Some(general_purpose::URL_SAFE_NO_PAD.encode(caveat_id)),
        })
    }
}

impl std::fmt::Debug for HmacOven {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HmacOven").finish_non_exhaustive()
    }
}

fn split(minted: &[u8]) -> Option<(Vec<u8>, Vec<u8>)> {
    let minted = std::str::from_utf8(minted).ok()?;
    let (payload, signature) = minted.split_once('.')?;
    Some((
        general_purpose::URL_SAFE_NO_PAD.decode(payload).ok()?,
        general_purpose::URL_SAFE_NO_PAD.decode(signature).ok()?,
    ))
}

fn internal(message: &str, err: &anyhow::Error) -> DischargeError {
    DischargeError::internal(format!("{message}: {err}"))
}

/// Issues login credentials for identities
#[derive(Clone)]
pub struct DischargeCredentialMinter {
    oven: Arc<dyn Oven>,
    identity_store: Arc<dyn IdentityStore>,
    logger: Logger,
}

impl DischargeCredentialMinter {
    #[must_use]
    pub fn new(oven: Arc<dyn Oven>, identity_store: Arc<dyn IdentityStore>, logger: Logger) -> Self {
        Self {
            oven,
            identity_store,
            logger,
        }
    }

    /// Mint a credential declaring `identity.username`, valid for 28 days
    ///
    /// `identity.last_login` is updated and persisted on a best-effort basis;
    /// a store failure is logged and the credential is still returned.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if the oven fails to mint
    pub async fn mint(&self, identity: &mut Identity) -> Result<Credential, DischargeError> {
        let now = Utc::now();
        let declaration = Declaration {
            username: identity.username.clone(),
        };
        let value = self
            .oven
            .mint(&declaration, now + CREDENTIAL_VALIDITY)
            .await
            .map_err(|e| e.context("cannot mint credential"))?;

        identity.last_login = Some(now);
        if let Err(e) = self
            .identity_store
            .update_last_login(&identity.username, now)
            .await
        {
            self.logger.error(format_args!(
                "cannot update last login time for {}: {e}",
                identity.username
            ));
        }

        Ok(Credential::macaroon(value))
    }
}

impl std::fmt::Debug for DischargeCredentialMinter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DischargeCredentialMinter")
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::store::MemoryIdentityStore;

    const TEST_SECRET: &[u8] = b"test_secret_key_for_hmac_testing_32b";

    fn oven() -> HmacOven {
        HmacOven::new(TEST_SECRET).unwrap()
    }

    fn alice() -> Declaration {
        Declaration {
            username: "alice".to_string(),
        }
    }

    #[tokio::test]
    async fn test_mint_and_verify() {
        let oven = oven();
        let now = Utc::now();
        let credential = oven.mint(&alice(), now + CREDENTIAL_VALIDITY).await.unwrap();

        assert_eq!(oven.verify(&credential, now).await.unwrap(), alice());
        assert_eq!(oven.infer_declared(&credential), Some(alice()));
    }

    #[tokio::test]
    async fn test_verify_rejects_expired_and_forged() {
        let oven = oven();
        let now = Utc::now();
        let credential = oven.mint(&alice(), now + chrono::Duration::seconds(1)).await.unwrap();

        let later = now + chrono::Duration::seconds(2);
        let err = oven.verify(&credential, later).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);

        let other = HmacOven::new(b"another secret").unwrap();
        let err = other.verify(&credential, now).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);

        let err = oven.verify(b"garbage", now).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
        assert_eq!(oven.infer_declared(b"garbage"), None);
    }

    #[tokio::test]
    async fn test_discharge_is_not_a_login_credential() {
        let oven = oven();
        let now = Utc::now();
        let caveat_id = oven.encode_caveat("is-authenticated-user").unwrap();
        let discharge = oven
            .mint_discharge(&caveat_id, &alice(), now + chrono::Duration::hours(1))
            .await
            .unwrap();

        let err = oven.verify(&discharge, now).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
        assert_eq!(oven.verify_discharge(&discharge, &caveat_id, now).unwrap(), alice());
        assert!(oven.verify_discharge(&discharge, b"other caveat", now).is_err());
    }

    #[tokio::test]
    async fn test_caveat_round_trip() {
        let oven = oven();
        let caveat_id = oven.encode_caveat("is-member-of admin").unwrap();
        let caveat = oven.decode_caveat(&caveat_id).await.unwrap();
        assert_eq!(caveat.condition, "is-member-of admin");

        let err = oven.decode_caveat(b"not a caveat").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
    }

    #[tokio::test]
    async fn test_minter_updates_last_login() {
        let identities = Arc::new(MemoryIdentityStore::new());
        identities.update_identity(&Identity::new("alice")).await.unwrap();
        let oven = Arc::new(oven());
        let minter = DischargeCredentialMinter::new(oven.clone(), identities.clone(), Logger::default());

        let mut identity = Identity::new("alice");
        let credential = minter.mint(&mut identity).await.unwrap();

        assert_eq!(credential.kind, crate::models::MACAROON_KIND);
        assert_eq!(oven.infer_declared(&credential.value), Some(alice()));
        assert!(identity.last_login.is_some());
        let stored = identities.identity("alice").await.unwrap().unwrap();
        assert_eq!(stored.last_login, identity.last_login);
    }

    #[tokio::test]
    async fn test_minter_ignores_identity_store_failure() {
        // "bob" is not in the store, so the last login update fails.
        let minter = DischargeCredentialMinter::new(
            Arc::new(oven()),
            Arc::new(MemoryIdentityStore::new()),
            Logger::default(),
        );
        let mut identity = Identity::new("bob");
        let credential = minter.mint(&mut identity).await.unwrap();
        assert!(!credential.value.is_empty());
    }
}
