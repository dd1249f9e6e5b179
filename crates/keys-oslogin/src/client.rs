//! OS Login REST client.
//!
//! [`OsLoginClient`] implements [`KeyRegistry`] on top of
//! `users.importSshPublicKey`; [`OsLoginConnector`] builds one per
//! identity when the key manager initializes.

use std::sync::Arc;

use async_trait::async_trait;
use ephemeral_keys::{
    AccountBinding, Identity, KeyRegistry, PrincipalName, RegistryConnector, RegistryError,
    TokenSource,
};
use fail::fail_point;

use crate::{
    config::OsLoginConfig,
    error::{OsLoginError, Result, error_message},
    wire::{ImportSshPublicKeyResponse, SshPublicKeyRequest},
};

/// [`RegistryConnector`] producing [`OsLoginClient`]s.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
///
/// use ephemeral_keys::{EphemeralKeyManager, SshKeyGenerator};
/// use ephemeral_keys_oslogin::{OsLoginConfig, OsLoginConnector, ServiceAccountProvider};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = OsLoginConfig::default();
/// let manager = EphemeralKeyManager::new(
///     Arc::new(ServiceAccountProvider::from_env(config.clone())),
///     Arc::new(SshKeyGenerator::rsa()),
///     Arc::new(OsLoginConnector::new(config)?),
/// )
/// .init()
/// .await?;
///
/// let credential = manager.refresh(std::time::Duration::from_secs(300), 2048).await?;
/// println!("ssh as {}", credential.username());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct OsLoginConnector {
    config: OsLoginConfig,
}

impl OsLoginConnector {
    /// Creates a connector after validating `config`.
    ///
    /// # Errors
    ///
    /// Returns [`OsLoginError::Config`] if the configuration is invalid.
    pub fn new(config: OsLoginConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Returns the connector's configuration.
    #[must_use]
    pub fn config(&self) -> &OsLoginConfig {
        &self.config
    }
}

impl RegistryConnector for OsLoginConnector {
    fn connect(
        &self,
        identity: &Identity,
    ) -> std::result::Result<Arc<dyn KeyRegistry>, RegistryError> {
        let client = OsLoginClient::new(&self.config, Arc::clone(identity.auth()))?;
        Ok(Arc::new(client))
    }
}

/// OS Login API client authenticated through a [`TokenSource`].
pub struct OsLoginClient {
    http: reqwest::Client,
    endpoint: String,
    auth: Arc<dyn TokenSource>,
}

impl std::fmt::Debug for OsLoginClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OsLoginClient").field("endpoint", &self.endpoint).finish_non_exhaustive()
    }
}

impl OsLoginClient {
    /// Creates a client for the configured endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &OsLoginConfig, auth: Arc<dyn TokenSource>) -> Result<Self> {
        Ok(Self {
            http: config.build_http_client()?,
            endpoint: config.endpoint().trim_end_matches('/').to_owned(),
            auth,
        })
    }

    async fn send_import(
        &self,
        principal: &PrincipalName,
        public_key: &str,
        expires_at_usec: i64,
        project_id: &str,
    ) -> std::result::Result<AccountBinding, RegistryError> {
        let token = self.auth.access_token().await?;
        let url = format!("{}/v1/{}:importSshPublicKey", self.endpoint, principal.as_str());

        let response = self
            .http
            .post(url)
            .bearer_auth(token.secret())
            .query(&[("projectId", project_id)])
            .json(&SshPublicKeyRequest { key: public_key, expiration_time_usec: expires_at_usec })
            .send()
            .await
            .map_err(OsLoginError::from)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OsLoginError::Status { status: status.as_u16(), message: error_message(&body) }
                .into());
        }

        let body: ImportSshPublicKeyResponse =
            response.json().await.map_err(OsLoginError::from)?;
        let profile = body
            .login_profile
            .ok_or_else(|| RegistryError::serialization("response carries no loginProfile"))?;

        Ok(profile.into())
    }
}

#[async_trait]
impl KeyRegistry for OsLoginClient {
    #[tracing::instrument(skip(self, public_key), fields(endpoint = %self.endpoint))]
    async fn import_public_key(
        &self,
        principal: &PrincipalName,
        public_key: &str,
        expires_at_usec: i64,
        project_id: &str,
    ) -> std::result::Result<AccountBinding, RegistryError> {
        fail_point!("oslogin-before-request", |_| {
            Err(RegistryError::connection("injected failure before OS Login request"))
        });

        let binding = self.send_import(principal, public_key, expires_at_usec, project_id).await?;
        tracing::debug!(
            accounts = binding.posix_accounts.len(),
            keys = binding.ssh_public_keys.len(),
            "imported public key"
        );
        Ok(binding)
    }
}
