// Helper functions shared by the discharge handlers
use crate::error::DischargeError;
use actix_web::web;
use base64::{engine::general_purpose, Engine as _};
use std::collections::HashMap;

/// Query and form parameters of a request, form values taking precedence
#[derive(Debug, Default, Clone)]
pub struct RequestParams(HashMap<String, String>);

impl RequestParams {
    #[must_use]
    pub fn new(
        query: web::Query<HashMap<String, String>>,
        form: Option<web::Form<HashMap<String, String>>>,
    ) -> Self {
        let mut params = query.into_inner();
        if let Some(form) = form {
            params.extend(form.into_inner());
        }
        Self(params)
    }

    /// Non-empty value of `name`
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .get(name)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }

    /// # Errors
    ///
    /// Returns `BadRequest` if `name` is missing or empty
    pub fn require(&self, name: &str) -> Result<&str, DischargeError> {
        self.get(name)
            .ok_or_else(|| DischargeError::bad_request(format!("missing {name} parameter")))
    }
}

impl From<HashMap<String, String>> for RequestParams {
    fn from(params: HashMap<String, String>) -> Self {
        Self(params)
    }
}

/// Decode base64 in either the standard or URL-safe alphabet, padded or not
///
/// # Errors
///
/// Returns `BadRequest` naming `what` if the value is not base64
pub fn decode_base64(value: &str, what: &str) -> Result<Vec<u8>, DischargeError> {
    let trimmed = value.trim_end_matches('=');
    general_purpose::URL_SAFE_NO_PAD
        .decode(trimmed)
        .or_else(|_| general_purpose::STANDARD_NO_PAD.decode(trimmed))
        .map_err(|e| DischargeError::bad_request(format!("invalid {what}")).with_cause(e))
}
