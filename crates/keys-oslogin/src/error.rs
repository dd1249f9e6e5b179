//! Error types for the OS Login backend.
//!
//! This module provides [`OsLoginError`] and its mapping onto the generic
//! [`RegistryError`] the key manager understands.

use ephemeral_keys::{CredentialSourceError, RegistryError};
use serde::Deserialize;
use thiserror::Error;

/// Result type alias for OS Login backend operations.
pub type Result<T> = std::result::Result<T, OsLoginError>;

/// Errors specific to the OS Login backend.
#[derive(Debug, Error)]
pub enum OsLoginError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transport error from the HTTP client.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("Unexpected status {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Error message extracted from the response body.
        message: String,
    },

    /// A success response carried values that cannot be used.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Signing the token-exchange assertion failed.
    #[error("Token signing error: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),
}

impl From<OsLoginError> for RegistryError {
    fn from(err: OsLoginError) -> Self {
        match err {
            OsLoginError::Config(message) => RegistryError::internal(format!("Config: {message}")),
            OsLoginError::Http(source) => http_error_to_registry_error(source),
            OsLoginError::Status { status, message } => status_to_registry_error(status, message),
            OsLoginError::InvalidResponse(message) => RegistryError::serialization(message),
            OsLoginError::Signing(source) => {
                RegistryError::internal_with_source("token assertion signing", source)
            },
        }
    }
}

impl From<OsLoginError> for CredentialSourceError {
    fn from(err: OsLoginError) -> Self {
        match err {
            OsLoginError::Signing(source) => {
                CredentialSourceError::malformed_with_source("unusable private key", source)
            },
            OsLoginError::Config(message) => CredentialSourceError::malformed(message),
            other => CredentialSourceError::io("credential source", other),
        }
    }
}

/// Converts a transport error, keeping timeouts and connect failures apart.
fn http_error_to_registry_error(err: reqwest::Error) -> RegistryError {
    if err.is_timeout() {
        tracing::warn!(error = %err, "OS Login request timed out");
        RegistryError::timeout()
    } else if err.is_decode() {
        RegistryError::serialization_with_source("malformed response body", err)
    } else if err.is_builder() {
        RegistryError::internal_with_source("invalid request", err)
    } else {
        RegistryError::connection_with_source("OS Login request failed", err)
    }
}

/// Classifies an HTTP status the way callers decide on retries.
///
/// Throttling, request timeouts and server errors are transient and map to
/// `Connection`; authentication failures to `Unauthorized`; everything else
/// is a definitive rejection.
fn status_to_registry_error(status: u16, message: String) -> RegistryError {
    match status {
        401 | 403 => RegistryError::unauthorized(message),
        408 | 429 | 500..=599 => {
            RegistryError::connection(format!("status {status}: {message}"))
        },
        _ => RegistryError::rejected(status, message),
    }
}

/// `{"error": {"code": 400, "message": "...", "status": "INVALID_ARGUMENT"}}`
#[derive(Deserialize)]
struct GoogleErrorBody {
    error: GoogleErrorDetail,
}

#[derive(Deserialize)]
struct GoogleErrorDetail {
    message: String,
}

/// `{"error": "invalid_grant", "error_description": "..."}`
#[derive(Deserialize)]
struct OAuthErrorBody {
    error: String,
    error_description: Option<String>,
}

/// Longest raw body echoed into an error message.
const MAX_ERROR_BODY: usize = 256;

/// Pulls a human-readable message out of a Google API or OAuth error body.
pub(crate) fn error_message(body: &str) -> String {
    if let Ok(oauth) = serde_json::from_str::<OAuthErrorBody>(body) {
        return match oauth.error_description {
            Some(description) => format!("{}: {description}", oauth.error),
            None => oauth.error,
        };
    }
    if let Ok(parsed) = serde_json::from_str::<GoogleErrorBody>(body) {
        return parsed.error.message;
    }
    if body.trim().is_empty() {
        return "empty response body".to_owned();
    }
    body.chars().take(MAX_ERROR_BODY).collect()
}
