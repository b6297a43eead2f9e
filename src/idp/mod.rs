//! Identity providers
//!
//! A provider authenticates users however it likes and finishes every login
//! through the [`VisitCompleter`] it receives at initialization. The HTTP
//! layer forwards `{location}/login/{name}/...` to the provider named
//! `name`, with that prefix stripped from the request path.

pub mod static_idp;

use crate::completer::VisitCompleter;
use crate::credential::DischargeCredentialMinter;
use crate::error::DischargeError;
use crate::settings::ProviderSettings;
use crate::store::{IdentityStore, KeyValueStore, ProviderDataStore};
use crate::utils::crypto::Codec;
use crate::utils::logging::Logger;
use actix_web::{http::Method, HttpResponse};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

pub use static_idp::StaticIdentityProvider;

/// Name of the query or form parameter carrying the sealed completion mode
pub const MODE_PARAM: &str = "m";

/// Everything a provider needs to run its login flow
#[derive(Clone)]
pub struct InitParams {
    pub identity_store: Arc<dyn IdentityStore>,
    /// Key-value store private to this provider
    pub key_value_store: Arc<dyn KeyValueStore>,
    /// Seals and opens the completion mode carried through the login pages
    pub codec: Codec,
    pub location: String,
    /// Base URL of this provider's routes, `{location}/login/{name}`
    pub url_prefix: String,
    pub minter: DischargeCredentialMinter,
    pub completer: VisitCompleter,
    pub logger: Logger,
}

/// Collaborators shared by every provider
#[derive(Clone)]
pub struct SharedParams {
    pub identity_store: Arc<dyn IdentityStore>,
    pub codec: Codec,
    pub location: String,
    pub minter: DischargeCredentialMinter,
    pub completer: VisitCompleter,
    pub logger: Logger,
}

/// A request delegated to a provider
#[derive(Debug, Clone)]
pub struct IdpRequest {
    pub method: Method,
    /// Path below the provider's URL prefix, always starting with `/`
    pub path: String,
    pub query: HashMap<String, String>,
    pub form: HashMap<String, String>,
}

impl IdpRequest {
    /// Parameter from the form body, falling back to the query string
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.form
            .get(name)
            .or_else(|| self.query.get(name))
            .map(String::as_str)
    }
}

/// Identity provider capability
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Short name used in URLs
    fn name(&self) -> &str;

    /// Human readable description shown when choosing a provider
    fn description(&self) -> &str;

    /// Prepare the provider for use; called once before any request
    ///
    /// # Errors
    ///
    /// Returns an error if the provider cannot be initialized
    async fn init(&self, params: InitParams) -> Result<(), DischargeError>;

    /// URL starting a login whose completion mode is sealed in `sealed_mode`
    fn login_url(&self, sealed_mode: &str) -> String;

    /// Handle a request below the provider's URL prefix
    async fn handle(&self, request: IdpRequest) -> HttpResponse;
}

/// Provider description returned when several providers are available
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ProviderChoice {
    pub name: String,
    pub description: String,
    pub url: String,
}

/// Ordered set of configured providers
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn IdentityProvider>>,
}

impl ProviderRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build providers from their settings
    ///
    /// # Errors
    ///
    /// Returns `BadRequest` for unknown provider types or duplicate names
    pub fn from_settings(settings: &[&ProviderSettings]) -> Result<Self, DischargeError> {
        let mut registry = Self::new();
        for provider in settings {
            match provider.kind.as_str() {
                "static" => registry.register(Arc::new(StaticIdentityProvider::new(provider)))?,
                other => {
                    return Err(DischargeError::bad_request(format!(
                        "unknown identity provider type {other:?} for {}",
                        provider.name
                    )))
                }
            }
        }
        Ok(registry)
    }

    /// # Errors
    ///
    /// Returns `BadRequest` if a provider with the same name is registered
    pub fn register(&mut self, provider: Arc<dyn IdentityProvider>) -> Result<(), DischargeError> {
        if self.get(provider.name()).is_some() {
            return Err(DischargeError::bad_request(format!(
                "duplicate identity provider {}",
                provider.name()
            )));
        }
        self.providers.push(provider);
        Ok(())
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn IdentityProvider>> {
        self.providers.iter().find(|p| p.name() == name).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn IdentityProvider>> {
        self.providers.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Initialize every provider with its own key-value namespace and URL prefix
    ///
    /// # Errors
    ///
    /// Returns the first provider initialization error
    pub async fn init_all(
        &self,
        shared: &SharedParams,
        data_store: &dyn ProviderDataStore,
    ) -> Result<(), DischargeError> {
        for provider in &self.providers {
            let key_value_store = data_store
                .key_value_store(provider.name())
                .await
                .map_err(|e| DischargeError::from(e).context("cannot initialize identity provider"))?;
            let params = InitParams {
                identity_store: shared.identity_store.clone(),
                key_value_store,
                codec: shared.codec.clone(),
                location: shared.location.clone(),
                url_prefix: format!("{}/login/{}", shared.location, provider.name()),
                minter: shared.minter.clone(),
                completer: shared.completer.clone(),
                logger: shared.logger.child(provider.name()),
            };
            provider
                .init(params)
                .await
                .map_err(|e| e.context(&format!("cannot initialize {}", provider.name())))?;
        }
        Ok(())
    }

    /// Providers offered for a login sealed in `sealed_mode`
    #[must_use]
    pub fn choices(&self, sealed_mode: &str) -> Vec<ProviderChoice> {
        self.providers
            .iter()
            .map(|p| ProviderChoice {
                name: p.name().to_string(),
                description: p.description().to_string(),
                url: p.login_url(sealed_mode),
            })
            .collect()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.providers.iter().map(|p| p.name().to_string()))
            .finish()
    }
}
