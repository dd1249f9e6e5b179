//! Error types for credential provisioning.
//!
//! Each collaborator boundary has its own error type, and the manager folds
//! them into [`KeyManagerError`]:
//!
//! - [`CredentialSourceError`] - the identity provider could not resolve credentials
//! - [`KeyGenerationError`] - the key pair generator rejected the request
//! - [`RegistryError`] - the remote key registry could not be reached or refused the import
//! - [`KeyManagerError`] - what callers of [`EphemeralKeyManager`] see
//!
//! Source chains are preserved through `#[source]` so structured logging can
//! walk down to the transport failure.
//!
//! [`EphemeralKeyManager`]: crate::EphemeralKeyManager

use std::sync::Arc;

use thiserror::Error;

/// A boxed error type for source chain tracking.
pub type BoxError = Arc<dyn std::error::Error + Send + Sync>;

/// Result type alias for key manager operations.
pub type Result<T> = std::result::Result<T, KeyManagerError>;

/// Errors surfaced by [`EphemeralKeyManager`](crate::EphemeralKeyManager).
///
/// # Non-exhaustive
///
/// This enum is marked `#[non_exhaustive]`: new variants may be added in
/// future minor releases without a semver-breaking change. Downstream match
/// expressions must include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KeyManagerError {
    /// Identity resolution or registry client construction failed during `init`.
    ///
    /// Fatal: `init` consumed the manager, so the caller must construct a new
    /// one with corrected inputs.
    #[error("Cannot initialize for {context}: {source}")]
    Configuration {
        /// Description of the credential source that was being initialized.
        context: String,
        /// The underlying failure.
        #[source]
        source: BoxError,
    },

    /// The registry accepted the key but the identity has no POSIX account.
    #[error("Cannot get account for {principal}: no POSIX account")]
    NoAccount {
        /// Principal the key was imported for.
        principal: String,
    },

    /// The registry could not be reached or failed while importing the key.
    #[error("Key registry unavailable: {0}")]
    RegistryUnavailable(#[source] RegistryError),

    /// The key pair generator rejected the request.
    #[error("Key generation failed: {0}")]
    KeyGeneration(#[source] KeyGenerationError),

    /// `refresh` was called before `init`.
    #[error("Key manager is not initialized")]
    NotInitialized,
}

impl KeyManagerError {
    /// Creates a new `Configuration` error.
    #[must_use]
    pub fn configuration(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Configuration { context: context.into(), source: Arc::new(source) }
    }

    /// Creates a new `NoAccount` error.
    #[must_use]
    pub fn no_account(principal: impl Into<String>) -> Self {
        Self::NoAccount { principal: principal.into() }
    }
}

impl From<RegistryError> for KeyManagerError {
    fn from(err: RegistryError) -> Self {
        KeyManagerError::RegistryUnavailable(err)
    }
}

impl From<KeyGenerationError> for KeyManagerError {
    fn from(err: KeyGenerationError) -> Self {
        KeyManagerError::KeyGeneration(err)
    }
}

/// Errors produced while talking to a remote key registry.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RegistryError {
    /// Network-level failure: DNS, refused connection, reset, or a
    /// retryable server status.
    #[error("Connection error: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
        /// The underlying transport error.
        #[source]
        source: Option<BoxError>,
    },

    /// The request exceeded its time limit.
    #[error("Operation timeout")]
    Timeout,

    /// The registry refused the caller's credentials.
    #[error("Unauthorized: {message}")]
    Unauthorized {
        /// Message returned by the registry.
        message: String,
    },

    /// The registry rejected the request itself.
    #[error("Rejected with status {status}: {message}")]
    Rejected {
        /// HTTP-style status code.
        status: u16,
        /// Message returned by the registry.
        message: String,
    },

    /// The request or response could not be encoded or decoded.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Description of the serialization error.
        message: String,
        /// The underlying decode error.
        #[source]
        source: Option<BoxError>,
    },

    /// Catch-all for backend failures that fit nowhere else.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
        /// The underlying error.
        #[source]
        source: Option<BoxError>,
    },
}

impl RegistryError {
    /// Creates a new `Connection` error with the given message.
    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection { message: message.into(), source: None }
    }

    /// Creates a new `Connection` error with a message and source error.
    #[must_use]
    pub fn connection_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `Timeout` error.
    #[must_use]
    pub fn timeout() -> Self {
        Self::Timeout
    }

    /// Creates a new `Unauthorized` error.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized { message: message.into() }
    }

    /// Creates a new `Rejected` error.
    #[must_use]
    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        Self::Rejected { status, message: message.into() }
    }

    /// Creates a new `Serialization` error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization { message: message.into(), source: None }
    }

    /// Creates a new `Serialization` error with a message and source error.
    #[must_use]
    pub fn serialization_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Serialization { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `Internal` error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into(), source: None }
    }

    /// Creates a new `Internal` error with a message and source error.
    #[must_use]
    pub fn internal_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Internal { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Returns `true` if retrying the same request may succeed.
    ///
    /// The manager never retries on its own; this is for callers that
    /// implement their own retry policy.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout)
    }
}

/// Errors produced while resolving the calling identity.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CredentialSourceError {
    /// The credential source could not be read.
    #[error("I/O error: {message}")]
    Io {
        /// Description of what was being read.
        message: String,
        /// The underlying I/O error.
        #[source]
        source: Option<BoxError>,
    },

    /// The credential source was readable but its content is unusable.
    #[error("Malformed credentials: {message}")]
    Malformed {
        /// Description of what is wrong.
        message: String,
        /// The underlying parse error.
        #[source]
        source: Option<BoxError>,
    },
}

impl CredentialSourceError {
    /// Creates a new `Io` error with a message and source error.
    #[must_use]
    pub fn io(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Io { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `Malformed` error with the given message.
    #[must_use]
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed { message: message.into(), source: None }
    }

    /// Creates a new `Malformed` error with a message and source error.
    #[must_use]
    pub fn malformed_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Malformed { message: message.into(), source: Some(Arc::new(source)) }
    }
}

/// Errors produced by a [`KeyPairGenerator`](crate::KeyPairGenerator).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KeyGenerationError {
    /// The generator does not support the requested key size.
    #[error("Unsupported key size: {bits} bits")]
    UnsupportedKeySize {
        /// Requested size in bits.
        bits: u32,
    },

    /// The underlying key library failed.
    #[error("Key backend error: {message}")]
    Backend {
        /// Description of the failure.
        message: String,
        /// The underlying library error.
        #[source]
        source: Option<BoxError>,
    },
}

impl KeyGenerationError {
    /// Creates a new `Backend` error with a message and source error.
    #[must_use]
    pub fn backend(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Backend { message: message.into(), source: Some(Arc::new(source)) }
    }
}
