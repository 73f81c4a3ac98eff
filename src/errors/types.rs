//! Error type definitions for the stream relay
//!
//! Errors are layered: adapter failures (`SourceError`) never leave their
//! adapter, relay failures (`RelayError`) are the only ones surfaced to end
//! clients, and `AppError` covers everything else the service can hit.

use axum::{
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Top-level application error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Source handling errors
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    /// Relay errors
    #[error("Relay error: {0}")]
    Relay(#[from] RelayError),

    /// Validation errors
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// External service errors
    #[error("External service error: {service} - {message}")]
    ExternalService { service: String, message: String },

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Provider adapter failures
///
/// These are caught inside each adapter and reduced to an empty candidate
/// list; they exist so adapters can use `?` internally and log one line.
#[derive(Error, Debug)]
pub enum SourceError {
    /// Network connection timeouts
    #[error("Connection timeout: {provider}")]
    Timeout { provider: String },

    /// The provider could not be reached
    #[error("Provider unreachable: {provider} - {message}")]
    Unreachable { provider: String, message: String },

    /// Internal id could not be mapped to the provider's native id
    #[error("No external id mapping for {kind}/{id}")]
    MissingExternalId { kind: String, id: u64 },

    /// Key exchange or payload decryption failed
    #[error("Decryption failed: {provider} - {message}")]
    DecryptionFailed { provider: String, message: String },

    /// Parsing errors for provider data
    #[error("Parse error: {provider} - {message}")]
    ParseError { provider: String, message: String },

    /// HTTP errors from providers
    #[error("HTTP error: {status} - {provider}")]
    Http { status: u16, provider: String },
}

/// Relay failures
///
/// The display strings double as the plain-text response bodies, so none of
/// them may carry an upstream URL.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    /// Bad origin, signature, payload or header bundle
    #[error("{reason}")]
    AdmissionRejected { status: u16, reason: &'static str },

    /// Network failure or timeout on the final attempt
    #[error("Upstream unavailable")]
    UpstreamUnavailable,

    /// Upstream answered with a non-retryable error status
    #[error("Upstream rejected the request ({status})")]
    UpstreamRejected { status: u16 },

    /// Every allowed attempt returned a transient status
    #[error("Upstream unavailable after {attempts} attempts")]
    RetryExhausted { attempts: u32, last_status: Option<u16> },

    /// No playable reference found within the depth bound
    #[error("Source could not be resolved")]
    ResolutionFailed,

    /// Malformed opaque token
    #[error("Malformed token")]
    DecodeFailed,
}

impl AppError {
    /// Create a validation error with a custom message
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an external service error
    pub fn external_service<S: Into<String>, M: Into<String>>(service: S, message: M) -> Self {
        Self::ExternalService {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

impl SourceError {
    pub fn unreachable<P: Into<String>, M: Into<String>>(provider: P, message: M) -> Self {
        Self::Unreachable {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn parse<P: Into<String>, M: Into<String>>(provider: P, message: M) -> Self {
        Self::ParseError {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn decryption<P: Into<String>, M: Into<String>>(provider: P, message: M) -> Self {
        Self::DecryptionFailed {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Map a reqwest failure without leaking the request URL into the message
    pub fn from_reqwest<P: Into<String>>(provider: P, error: reqwest::Error) -> Self {
        let provider = provider.into();
        if error.is_timeout() {
            Self::Timeout { provider }
        } else if let Some(status) = error.status() {
            Self::Http {
                status: status.as_u16(),
                provider,
            }
        } else {
            Self::Unreachable {
                provider,
                message: error.without_url().to_string(),
            }
        }
    }
}

impl RelayError {
    pub const fn forbidden(reason: &'static str) -> Self {
        Self::AdmissionRejected { status: 403, reason }
    }

    pub const fn bad_request(reason: &'static str) -> Self {
        Self::AdmissionRejected { status: 400, reason }
    }

    /// HTTP status this error is reported with
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::AdmissionRejected { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_REQUEST)
            }
            Self::UpstreamRejected { status } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            Self::ResolutionFailed | Self::DecodeFailed => StatusCode::BAD_REQUEST,
            Self::UpstreamUnavailable | Self::RetryExhausted { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Plain-text body sent to the client
    pub fn client_message(&self) -> String {
        match self {
            Self::UpstreamUnavailable | Self::RetryExhausted { .. } => {
                "Failed to fetch the requested resource".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        (
            self.status_code(),
            [
                (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
                (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
            ],
            self.client_message(),
        )
            .into_response()
    }
}
