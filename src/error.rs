//! Discharge error types
//!
//! Every failure inside the discharge core is a [`DischargeError`]: a kind tag,
//! a human readable message and an optional wrapped cause. Callers decide what
//! to do by inspecting [`DischargeError::kind`], never the message text.

use crate::models::InteractionInfo;
use crate::store::StoreError;
use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Machine readable classification of a discharge failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed or unsafe input (including a bad `return_to`)
    BadRequest,
    /// Missing or invalid proof of login
    Unauthorized,
    /// Unknown discharge id, unknown or expired code
    NotFound,
    /// Rendezvous deadline exceeded
    Timeout,
    /// The caveat needs an interactive login
    InteractionRequired,
    /// A rendezvous slot was completed twice
    AlreadyCompleted,
    /// A backing store is unavailable
    Transient,
    /// Minting or encoding failed
    Internal,
}

impl ErrorKind {
    /// Stable code used in error bodies and `error_code` redirect parameters
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::BadRequest => "bad_request",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Timeout => "timeout",
            ErrorKind::InteractionRequired => "interaction_required",
            ErrorKind::AlreadyCompleted => "already_completed",
            ErrorKind::Transient => "transient",
            ErrorKind::Internal => "internal",
        }
    }

    /// HTTP status the boundary mapper uses for this kind
    #[must_use]
    pub fn status_code(self) -> StatusCode {
        match self {
            ErrorKind::BadRequest => StatusCode::BAD_REQUEST,
            ErrorKind::Unauthorized | ErrorKind::InteractionRequired => StatusCode::UNAUTHORIZED,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Timeout => StatusCode::REQUEST_TIMEOUT,
            ErrorKind::AlreadyCompleted => StatusCode::CONFLICT,
            ErrorKind::Transient => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type Cause = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Tagged error carrying a kind and an optional wrapped cause
#[derive(Debug)]
pub struct DischargeError {
    kind: ErrorKind,
    message: String,
    interaction: Option<InteractionInfo>,
    cause: Option<Cause>,
}

impl DischargeError {
    /// Create an error of the given kind
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            interaction: None,
            cause: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthorized, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn already_completed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AlreadyCompleted, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// The caveat cannot be discharged without the user visiting `info.visit_url`
    pub fn interaction_required(message: impl Into<String>, info: InteractionInfo) -> Self {
        Self {
            interaction: Some(info),
            ..Self::new(ErrorKind::InteractionRequired, message)
        }
    }

    /// Attach the underlying cause
    #[must_use]
    pub fn with_cause<E>(mut self, cause: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Prefix the message with `context`, keeping the kind
    #[must_use]
    pub fn context(mut self, context: &str) -> Self {
        self.message = format!("{context}: {}", self.message);
        self
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn interaction(&self) -> Option<&InteractionInfo> {
        self.interaction.as_ref()
    }

    /// Serialisable form of this error
    #[must_use]
    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            code: self.kind,
            message: self.to_string(),
            info: self.interaction.clone(),
        }
    }
}

impl fmt::Display for DischargeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.cause {
            Some(cause) => write!(f, "{}: {cause}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for DischargeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn std::error::Error + 'static))
    }
}

impl From<StoreError> for DischargeError {
    fn from(err: StoreError) -> Self {
        DischargeError::transient("store unavailable").with_cause(err)
    }
}

impl ResponseError for DischargeError {
    fn status_code(&self) -> StatusCode {
        self.kind.status_code()
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(self.to_body())
    }
}

/// Machine readable error body
///
/// This is the wire form of a [`DischargeError`] and also the form a login
/// failure takes when it is handed to a waiter on another instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<InteractionInfo>,
}

impl From<ErrorBody> for DischargeError {
    fn from(body: ErrorBody) -> Self {
        DischargeError {
            kind: body.code,
            message: body.message,
            interaction: body.info,
            cause: None,
        }
    }
}
