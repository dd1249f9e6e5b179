//! Identity resolution and authentication handles.
//!
//! An [`IdentityProvider`] turns some credential source (a key file, a
//! metadata server, a test fixture) into an [`Identity`]. The identity
//! carries a [`TokenSource`] that registry clients use to authenticate.

use async_trait::async_trait;

use crate::{
    error::{CredentialSourceError, RegistryError},
    types::{AccessToken, Identity},
};

/// Resolves the calling identity.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Reads the credential source and returns the identity it describes.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialSourceError::Io`] if the source is unreachable and
    /// [`CredentialSourceError::Malformed`] if its content is unusable.
    async fn resolve(&self) -> Result<Identity, CredentialSourceError>;

    /// Human-readable description of the credential source, used as error
    /// context. Must not contain secrets.
    fn describe(&self) -> String;
}

/// Hands out bearer tokens for registry requests.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Returns a token valid for at least the next request.
    ///
    /// # Errors
    ///
    /// Returns a [`RegistryError`] if the token endpoint cannot be reached or
    /// refuses the exchange.
    async fn access_token(&self) -> Result<AccessToken, RegistryError>;
}

/// A [`TokenSource`] that always returns the same token.
///
/// Useful when a token is obtained out of band, and in tests.
#[derive(Clone, Debug)]
pub struct StaticTokenSource {
    token: AccessToken,
}

impl StaticTokenSource {
    /// Wraps a pre-issued token.
    #[must_use]
    pub fn new(token: AccessToken) -> Self {
        Self { token }
    }
}

#[async_trait]
impl TokenSource for StaticTokenSource {
    async fn access_token(&self) -> Result<AccessToken, RegistryError> {
        Ok(self.token.clone())
    }
}
