#![warn(clippy::pedantic)]
#![warn(clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

/// Version of the discharger application
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod checker;
pub mod completer;
pub mod credential;
pub mod error;
pub mod handlers;
pub mod idp;
pub mod models;
pub mod rendezvous;
pub mod service;
pub mod settings;
pub mod store;
pub mod templates;
pub mod token_store;
pub mod utils;

// Testing utilities (only available in test builds or with testing feature)
#[cfg(any(test, feature = "testing"))]
pub mod testing;

/// Re-export commonly used items
pub use checker::{DischargeRequest, ThirdPartyCaveatChecker};
pub use completer::VisitCompleter;
pub use credential::{DischargeCredentialMinter, HmacOven, Oven};
pub use error::{DischargeError, ErrorKind};
pub use handlers::configure_services;
pub use rendezvous::RendezvousPlace;
pub use service::{ServiceConfigBuilder, ServiceContainer};
pub use settings::DischargerSettings;
pub use token_store::DischargeTokenStore;
