//! Test fixtures providing a fully wired discharger

use crate::credential::{HmacOven, Oven, CREDENTIAL_VALIDITY};
use crate::idp::ProviderRegistry;
use crate::models::{Credential, Declaration};
use crate::rendezvous::RendezvousPlace;
use crate::service::{ServiceConfigBuilder, ServiceContainer};
use crate::settings::{DischargerSettings, ProviderSettings, StaticUserSettings};
use crate::store::{MemoryIdentityStore, MemoryProviderDataStore};
use crate::utils::crypto::Codec;
use actix_web::web;
use base64::{engine::general_purpose, Engine as _};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;

/// Service location used by the fixtures
pub const TEST_LOCATION: &str = "https://discharger.example.com";

/// Secret shared by every fixture service
pub const TEST_SECRET: &str = "test_secret_key_for_discharger_testing_32b";

/// Password of the fixture user `alice`, a member of `admin`
pub const ALICE_PASSWORD: &str = "wonderland";

/// Password of the fixture user `bob`, a member of no groups
pub const BOB_PASSWORD: &str = "builder";

/// A discharger wired with in-memory stores and a `static` provider
pub struct TestFixtures {
    pub services: ServiceContainer,
    pub location: String,
    pub oven: Arc<HmacOven>,
    pub codec: Codec,
    pub identity_store: Arc<MemoryIdentityStore>,
    pub provider_data_store: Arc<MemoryProviderDataStore>,
    pub rendezvous: RendezvousPlace,
    pub registry: ProviderRegistry,
}

impl TestFixtures {
    /// Fixtures with the default test settings
    ///
    /// # Panics
    ///
    /// Panics if the service cannot be built
    pub async fn new() -> Self {
        Self::with_settings(Self::settings()).await
    }

    /// Fixtures with custom settings
    ///
    /// # Panics
    ///
    /// Panics if the service cannot be built
    pub async fn with_settings(settings: DischargerSettings) -> Self {
        Self::with_builder(settings, ServiceConfigBuilder::new()).await
    }

    /// Fixtures with custom collaborators
    ///
    /// The in-memory stores are only used when `builder` does not replace
    /// them.
    ///
    /// # Panics
    ///
    /// Panics if the service cannot be built
    pub async fn with_builder(settings: DischargerSettings, builder: ServiceConfigBuilder) -> Self {
        let identity_store = Arc::new(MemoryIdentityStore::new());
        let provider_data_store = Arc::new(MemoryProviderDataStore::new());
        let secret = settings.keys.secret.clone();
        let location = settings.application.location.clone();

        let services = ServiceConfigBuilder::new()
            .with_identity_store(identity_store.clone())
            .with_provider_data_store(provider_data_store.clone())
            .merge(builder)
            .build(settings)
            .await
            .expect("test services should build");

        Self {
            location,
            oven: Arc::new(HmacOven::new(secret.as_bytes()).expect("test oven")),
            codec: services.codec.clone(),
            rendezvous: services.rendezvous.clone(),
            registry: services.registry.clone(),
            identity_store,
            provider_data_store,
            services,
        }
    }

    /// Default test settings: fast polling, short waits, one static provider
    #[must_use]
    pub fn settings() -> DischargerSettings {
        let mut settings = DischargerSettings::default();
        settings.application.location = TEST_LOCATION.to_string();
        settings.keys.secret = TEST_SECRET.to_string();
        settings.rendezvous.poll_interval_ms = 10;
        settings.rendezvous.wait_timeout_secs = 5;
        settings.templates.folder = concat!(env!("CARGO_MANIFEST_DIR"), "/src/templates").to_string();
        settings.providers = vec![Self::static_provider("static")];
        settings
    }

    /// A `static` provider with the fixture users
    #[must_use]
    pub fn static_provider(name: &str) -> ProviderSettings {
        ProviderSettings {
            name: name.to_string(),
            description: Some("Test users".to_string()),
            users: vec![
                StaticUserSettings {
                    username: "alice".to_string(),
                    password: ALICE_PASSWORD.to_string(),
                    name: Some("Alice".to_string()),
                    email: Some("alice@example.com".to_string()),
                    groups: vec!["admin".to_string()],
                },
                StaticUserSettings {
                    username: "bob".to_string(),
                    password: BOB_PASSWORD.to_string(),
                    ..StaticUserSettings::default()
                },
            ],
            ..ProviderSettings::default()
        }
    }

    /// Shared application data for `actix_web::test::init_service`
    #[must_use]
    pub fn app_data(&self) -> web::Data<ServiceContainer> {
        web::Data::new(self.services.clone())
    }

    /// Caveat id addressed to the discharger, as sent in the `id` parameter
    ///
    /// # Panics
    ///
    /// Panics if the caveat cannot be encoded
    #[must_use]
    pub fn caveat(&self, condition: &str) -> String {
        let id = self.oven.encode_caveat(condition).expect("encode caveat");
        String::from_utf8(id).expect("caveat ids are text")
    }

    /// A valid login credential for `username`
    ///
    /// # Panics
    ///
    /// Panics if minting fails
    pub async fn credential_for(&self, username: &str) -> Credential {
        let value = self
            .oven
            .mint(
                &Declaration {
                    username: username.to_string(),
                },
                Utc::now() + CREDENTIAL_VALIDITY,
            )
            .await
            .expect("mint credential");
        Credential::macaroon(value)
    }

    /// Query string presenting `credential` to the discharge endpoint
    #[must_use]
    pub fn token_params(credential: &Credential) -> String {
        format!(
            "token-kind={}&token64={}",
            credential.kind,
            general_purpose::URL_SAFE_NO_PAD.encode(&credential.value)
        )
    }

    /// Seal a value the way the login endpoint seals completion modes
    ///
    /// # Panics
    ///
    /// Panics if sealing fails
    #[must_use]
    pub fn seal<T: Serialize>(&self, value: &T) -> String {
        self.codec.seal(value).expect("seal")
    }

    /// Username declared by a credential, read without verification
    #[must_use]
    pub fn declared_username(&self, credential: &Credential) -> Option<String> {
        self.oven
            .infer_declared(&credential.value)
            .map(|declared| declared.username)
    }
}
