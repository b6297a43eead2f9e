//! Service construction
//!
//! Every collaborator of the discharger is created here exactly once from the
//! settings and shared by all HTTP workers through [`ServiceContainer`].

use crate::checker::ThirdPartyCaveatChecker;
use crate::completer::{CompleterParts, VisitCompleter};
use crate::credential::{DischargeCredentialMinter, HmacOven, Oven};
use crate::error::DischargeError;
use crate::idp::{ProviderRegistry, SharedParams};
use crate::rendezvous::{RendezvousConfig, RendezvousPlace, RENDEZVOUS_NAMESPACE};
use crate::settings::DischargerSettings;
use crate::store::{
    IdentityStore, MemoryIdentityStore, MemoryProviderDataStore, ProviderDataStore,
};
use crate::templates::{PageRenderer, TemplateRenderer};
use crate::token_store::{DischargeTokenStore, DISCHARGE_TOKEN_NAMESPACE};
use crate::utils::crypto::Codec;
use crate::utils::logging::Logger;
use std::sync::Arc;

/// Optional replacements for the default collaborators
#[derive(Clone, Default)]
pub struct ServiceConfigBuilder {
    identity_store: Option<Arc<dyn IdentityStore>>,
    provider_data_store: Option<Arc<dyn ProviderDataStore>>,
    oven: Option<Arc<dyn Oven>>,
    renderer: Option<Arc<dyn PageRenderer>>,
    registry: Option<ProviderRegistry>,
    logger: Option<Logger>,
}

impl ServiceConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a shared identity store instead of the in-memory one
    #[must_use]
    pub fn with_identity_store(mut self, store: Arc<dyn IdentityStore>) -> Self {
        self.identity_store = Some(store);
        self
    }

    /// Use a shared provider data store instead of the in-memory one
    ///
    /// Instances serving the same location must share this store for
    /// rendezvous and one-time codes to work across them.
    #[must_use]
    pub fn with_provider_data_store(mut self, store: Arc<dyn ProviderDataStore>) -> Self {
        self.provider_data_store = Some(store);
        self
    }

    #[must_use]
    pub fn with_oven(mut self, oven: Arc<dyn Oven>) -> Self {
        self.oven = Some(oven);
        self
    }

    #[must_use]
    pub fn with_renderer(mut self, renderer: Arc<dyn PageRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    /// Use these providers instead of the ones in the settings
    #[must_use]
    pub fn with_registry(mut self, registry: ProviderRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    #[must_use]
    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Take every collaborator `other` sets, keeping ours where it sets none
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        Self {
            identity_store: other.identity_store.or(self.identity_store),
            provider_data_store: other.provider_data_store.or(self.provider_data_store),
            oven: other.oven.or(self.oven),
            renderer: other.renderer.or(self.renderer),
            registry: other.registry.or(self.registry),
            logger: other.logger.or(self.logger),
        }
    }

    /// Build every collaborator and initialize the identity providers
    ///
    /// # Errors
    ///
    /// Returns an error if key derivation fails, a store namespace cannot be
    /// opened or a provider fails to initialize.
    pub async fn build(self, settings: DischargerSettings) -> Result<ServiceContainer, DischargeError> {
        let logger = self.logger.unwrap_or_default();
        let location = settings.application.location.trim_end_matches('/').to_string();
        let secret = settings.keys.secret.as_bytes();

        let codec = Codec::new(secret)
            .map_err(|e| DischargeError::internal(format!("cannot create codec: {e}")))?;
        let oven: Arc<dyn Oven> = match self.oven {
            Some(oven) => oven,
            None => Arc::new(
                HmacOven::new(secret)
                    .map_err(|e| DischargeError::internal(format!("cannot create oven: {e}")))?,
            ),
        };
        let identity_store = self
            .identity_store
            .unwrap_or_else(|| Arc::new(MemoryIdentityStore::new()));
        let provider_data_store = self
            .provider_data_store
            .unwrap_or_else(|| Arc::new(MemoryProviderDataStore::new()));
        let renderer = self
            .renderer
            .unwrap_or_else(|| Arc::new(TemplateRenderer::new(&settings.templates.folder)));

        let rendezvous = RendezvousPlace::new(
            provider_data_store
                .key_value_store(RENDEZVOUS_NAMESPACE)
                .await
                .map_err(|e| DischargeError::from(e).context("cannot open rendezvous store"))?,
            RendezvousConfig {
                poll_interval: settings.poll_interval(),
                slot_lifetime: settings.slot_lifetime(),
            },
            logger.child("rendezvous"),
        );
        let token_store = DischargeTokenStore::new(
            provider_data_store
                .key_value_store(DISCHARGE_TOKEN_NAMESPACE)
                .await
                .map_err(|e| DischargeError::from(e).context("cannot open discharge token store"))?,
            logger.child("token_store"),
        );
        let minter = DischargeCredentialMinter::new(
            oven.clone(),
            identity_store.clone(),
            logger.child("minter"),
        );
        let checker = ThirdPartyCaveatChecker::new(
            oven.clone(),
            identity_store.clone(),
            rendezvous.clone(),
            &location,
            logger.child("checker"),
        );
        let completer = VisitCompleter::new(
            CompleterParts {
                rendezvous: rendezvous.clone(),
                token_store: token_store.clone(),
                minter: minter.clone(),
                oven: oven.clone(),
                identity_store: identity_store.clone(),
                renderer,
                location: location.clone(),
            },
            logger.child("completer"),
        );

        let registry = match self.registry {
            Some(registry) => registry,
            None => ProviderRegistry::from_settings(&settings.get_enabled_providers())?,
        };
        registry
            .init_all(
                &SharedParams {
                    identity_store: identity_store.clone(),
                    codec: codec.clone(),
                    location: location.clone(),
                    minter,
                    completer: completer.clone(),
                    logger: logger.child("idp"),
                },
                provider_data_store.as_ref(),
            )
            .await?;
        logger.info(format_args!(
            "discharger ready at {location} with {} identity provider(s)",
            registry.len()
        ));

        Ok(ServiceContainer {
            settings,
            location,
            codec,
            oven,
            identity_store,
            rendezvous,
            token_store,
            checker,
            completer,
            registry,
            logger,
        })
    }
}

/// Application service container shared by every request
#[derive(Clone)]
pub struct ServiceContainer {
    pub settings: DischargerSettings,
    pub location: String,
    pub codec: Codec,
    pub oven: Arc<dyn Oven>,
    pub identity_store: Arc<dyn IdentityStore>,
    pub rendezvous: RendezvousPlace,
    pub token_store: DischargeTokenStore,
    pub checker: ThirdPartyCaveatChecker,
    pub completer: VisitCompleter,
    pub registry: ProviderRegistry,
    pub logger: Logger,
}

impl ServiceContainer {
    /// Create a service container with the default collaborators
    ///
    /// # Errors
    ///
    /// See [`ServiceConfigBuilder::build`]
    pub async fn new(settings: DischargerSettings) -> Result<Self, DischargeError> {
        ServiceConfigBuilder::new().build(settings).await
    }

    #[must_use]
    pub const fn settings(&self) -> &DischargerSettings {
        &self.settings
    }
}

impl std::fmt::Debug for ServiceContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceContainer")
            .field("location", &self.location)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
