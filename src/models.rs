use crate::error::ErrorBody;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Credential kind produced by the oven
pub const MACAROON_KIND: &str = "macaroon";

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub message: String,
}

/// An identity known to the identity store
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_login: Option<DateTime<Utc>>,
}

impl Identity {
    #[must_use]
    pub fn new(username: &str) -> Self {
        Self {
            username: username.to_string(),
            ..Self::default()
        }
    }

    /// Whether this identity belongs to any of `groups`
    #[must_use]
    pub fn is_member_of_any(&self, groups: &[String]) -> bool {
        groups.iter().any(|group| self.groups.contains(group))
    }
}

/// Facts declared by a credential or a discharge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Declaration {
    pub username: String,
}

/// Portable, time-bounded proof of a completed login (a discharge token)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub kind: String,
    #[serde(with = "base64_bytes")]
    pub value: Vec<u8>,
}

impl Credential {
    #[must_use]
    pub fn macaroon(value: Vec<u8>) -> Self {
        Self {
            kind: MACAROON_KIND.to_string(),
            value,
        }
    }
}

/// Outcome of a login, delivered exactly once per discharge id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LoginOutcome {
    Success { credential: Credential },
    Failure { error: ErrorBody },
}

/// How a login outcome travels back to whoever started the interaction
///
/// Chosen once when the interaction starts and carried through the provider
/// flow unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum CompletionMode {
    /// A discharge request is waiting on the rendezvous for `discharge_id`
    Direct { discharge_id: String },
    /// The user agent is sent back to `return_to` with a one-time code
    Redirect { return_to: String, state: String },
}

/// URLs handed to a client that must interact before a discharge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionInfo {
    pub visit_url: String,
    pub wait_url: String,
}

/// Response carrying a discharge token, used by `/wait` and `/discharge-token`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DischargeTokenResponse {
    pub discharge_token: Credential,
}

/// Successful discharge response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DischargeResponse {
    pub macaroon: String,
}

/// Serde adapter storing byte vectors as standard base64 strings
pub mod base64_bytes {
    use base64::{engine::general_purpose, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    /// # Errors
    ///
    /// Returns an error if the serializer rejects the string
    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&general_purpose::STANDARD.encode(bytes))
    }

    /// # Errors
    ///
    /// Returns an error if the value is not valid base64
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        general_purpose::STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
