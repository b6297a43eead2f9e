//! Testing utilities for the discharger
//!
//! Available to unit tests and, with the `testing` feature, to the
//! integration tests under `tests/`.
//!
//! ## Organization
//!
//! - [`fixtures`] - A fully wired service with a static provider and known users
//! - [`mock`] - Stores that fail on demand
//! - [`assertions`] - Assertion helpers for discharger responses
//!
//! ## Usage
//!
//! ```rust,ignore
//! use discharger::testing::TestFixtures;
//!
//! let fixtures = TestFixtures::new().await;
//! let caveat = fixtures.caveat("is-authenticated-user");
//! let credential = fixtures.credential_for("alice").await;
//! ```

pub mod assertions;
pub mod fixtures;
pub mod mock;

// Re-export commonly used items for convenience
pub use assertions::*;
pub use fixtures::TestFixtures;
pub use mock::{FailingIdentityStore, FailingKeyValueStore, FailingProviderDataStore};
