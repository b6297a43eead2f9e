//! HTTP response helpers
//!
//! Consistent constructors for the responses the discharge endpoints and
//! the completer write: structured errors, redirects and pages.

use crate::error::DischargeError;
use actix_web::{http::header, HttpResponse, ResponseError};

/// Unified response builder
pub struct ResponseBuilder;

impl ResponseBuilder {
    /// Structured error body with the status for the error's kind
    #[must_use]
    pub fn error(err: &DischargeError) -> HttpResponse {
        err.error_response()
    }

    /// 303 See Other to an already validated location
    #[must_use]
    pub fn see_other(location: &str) -> HttpResponse {
        HttpResponse::SeeOther()
            .insert_header((header::LOCATION, location.to_string()))
            .finish()
    }

    /// HTML page
    #[must_use]
    pub fn html(body: String) -> HttpResponse {
        HttpResponse::Ok()
            .content_type("text/html;charset=utf-8")
            .body(body)
    }

    /// Plain-text page
    #[must_use]
    pub fn text(body: String) -> HttpResponse {
        HttpResponse::Ok()
            .content_type("text/plain;charset=utf-8")
            .body(body)
    }
}
