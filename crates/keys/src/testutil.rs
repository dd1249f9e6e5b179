//! Shared test utilities for key manager testing.
//!
//! Provides fake collaborators: identity providers that succeed or fail on
//! demand, a key generator that records what it was asked for, and a
//! connector that refuses to build a client. Feature-gated behind
//! `testutil` to keep it out of production builds.
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! ephemeral-keys = { path = "../keys", features = ["testutil"] }
//! ```

use std::{collections::HashSet, sync::Arc};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use crate::{
    error::{CredentialSourceError, KeyGenerationError, RegistryError},
    keygen::{KeyPairGenerator, SshKeyGenerator},
    provider::{IdentityProvider, StaticTokenSource},
    registry::{KeyRegistry, RegistryConnector},
    types::{AccessToken, Identity, KeyPair},
};

/// Creates an identity authenticated with a static, hour-long token.
pub fn test_identity(client_email: &str, project_id: &str) -> Identity {
    let token = AccessToken::new("test-access-token", Utc::now() + chrono::Duration::hours(1));
    Identity::new(client_email, project_id, Arc::new(StaticTokenSource::new(token)))
}

/// [`IdentityProvider`] that always resolves to the same identity.
#[derive(Clone, Debug)]
pub struct StaticIdentityProvider {
    client_email: String,
    project_id: String,
}

impl StaticIdentityProvider {
    /// Creates a provider for the given account.
    pub fn new(client_email: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self { client_email: client_email.into(), project_id: project_id.into() }
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    async fn resolve(&self) -> Result<Identity, CredentialSourceError> {
        Ok(test_identity(&self.client_email, &self.project_id))
    }

    fn describe(&self) -> String {
        format!("static identity {}", self.client_email)
    }
}

/// [`IdentityProvider`] whose credential source is always unreadable.
#[derive(Clone, Debug)]
pub struct FailingIdentityProvider {
    reason: String,
}

impl FailingIdentityProvider {
    /// Creates a provider failing with `reason`.
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

#[async_trait]
impl IdentityProvider for FailingIdentityProvider {
    async fn resolve(&self) -> Result<Identity, CredentialSourceError> {
        Err(CredentialSourceError::io(
            self.reason.clone(),
            std::io::Error::new(std::io::ErrorKind::NotFound, self.reason.clone()),
        ))
    }

    fn describe(&self) -> String {
        format!("failing provider ({})", self.reason)
    }
}

/// [`RegistryConnector`] that cannot build a client.
#[derive(Clone, Debug, Default)]
pub struct FailingConnector;

impl RegistryConnector for FailingConnector {
    fn connect(&self, _identity: &Identity) -> Result<Arc<dyn KeyRegistry>, RegistryError> {
        Err(RegistryError::internal("connector refused to build a client"))
    }
}

/// Ed25519 [`KeyPairGenerator`] that records every request.
///
/// Produces real keys quickly regardless of the requested size, so tests
/// can ask for 2048-bit keys without paying for RSA generation.
#[derive(Clone, Debug, Default)]
pub struct RecordingKeyGenerator {
    requests: Arc<Mutex<Vec<(String, u32)>>>,
    rejected_sizes: Arc<HashSet<u32>>,
}

impl RecordingKeyGenerator {
    /// Creates a generator accepting every size.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a generator rejecting `bits` with
    /// [`KeyGenerationError::UnsupportedKeySize`].
    #[must_use]
    pub fn rejecting(bits: u32) -> Self {
        Self { rejected_sizes: Arc::new(HashSet::from([bits])), ..Self::default() }
    }

    /// `(principal, key_size)` pairs in call order.
    #[must_use]
    pub fn requests(&self) -> Vec<(String, u32)> {
        self.requests.lock().clone()
    }
}

impl KeyPairGenerator for RecordingKeyGenerator {
    fn generate(&self, principal: &str, key_size: u32) -> Result<KeyPair, KeyGenerationError> {
        self.requests.lock().push((principal.to_owned(), key_size));
        if self.rejected_sizes.contains(&key_size) {
            return Err(KeyGenerationError::UnsupportedKeySize { bits: key_size });
        }
        SshKeyGenerator::ed25519().generate(principal, key_size)
    }
}
