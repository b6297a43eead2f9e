//! Custom assertion helpers for testing
//!
//! These work on plain [`HttpResponse`]s returned by handlers called directly
//! and on the parts of a response an integration test reads back (status,
//! headers and the JSON body).

use crate::error::{ErrorBody, ErrorKind};
use actix_web::http::header::{HeaderMap, LOCATION};
use actix_web::HttpResponse;
use serde_json::Value;
use url::Url;

/// Assert that an HTTP response has the expected status code
///
/// # Panics
///
/// Panics if the response status does not match the expected status code.
pub fn assert_status(response: &HttpResponse, expected_status: u16) {
    assert_eq!(
        response.status().as_u16(),
        expected_status,
        "Expected status {expected_status}, got {}",
        response.status()
    );
}

/// Assert that an HTTP response is successful (2xx status)
///
/// # Panics
///
/// Panics if the response status is not in the 2xx range.
pub fn assert_success(response: &HttpResponse) {
    assert!(
        response.status().is_success(),
        "Expected successful response, got {}",
        response.status()
    );
}

/// Location header of a redirect
///
/// # Panics
///
/// Panics if the header is missing or not valid text.
#[must_use]
pub fn location(headers: &HeaderMap) -> String {
    headers
        .get(LOCATION)
        .expect("redirect should carry a Location header")
        .to_str()
        .expect("Location header should be text")
        .to_string()
}

/// Query parameter `name` of a redirect target
///
/// # Panics
///
/// Panics if the Location header is missing or not an absolute URL.
#[must_use]
pub fn redirect_param(headers: &HeaderMap, name: &str) -> Option<String> {
    let target = Url::parse(&location(headers)).expect("Location should be an absolute URL");
    target
        .query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

/// Assert that a JSON error body carries the expected code
///
/// # Panics
///
/// Panics if the body is not an error body or carries another code.
pub fn assert_error_kind(body: &Value, expected: ErrorKind) -> ErrorBody {
    let error: ErrorBody =
        serde_json::from_value(body.clone()).expect("body should be an error body");
    assert_eq!(error.code, expected, "unexpected error: {}", error.message);
    error
}

/// Assert that a discharge response carries a base64 encoded macaroon
///
/// Returns the raw credential bytes.
///
/// # Panics
///
/// Panics if the field is missing or not valid URL-safe base64.
#[must_use]
pub fn assert_macaroon(body: &Value) -> Vec<u8> {
    use base64::{engine::general_purpose, Engine as _};

    let encoded = body
        .get("macaroon")
        .and_then(Value::as_str)
        .expect("response should carry a macaroon");
    general_purpose::URL_SAFE_NO_PAD
        .decode(encoded)
        .expect("macaroon should be URL-safe base64")
}
