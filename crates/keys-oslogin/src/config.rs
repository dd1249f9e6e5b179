//! Configuration for the OS Login backend.
//!
//! This module provides [`OsLoginConfig`], which controls where keys are
//! imported, which OAuth scope the service account requests, and the HTTP
//! client's timeouts.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{OsLoginError, Result};

/// Production OS Login API endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://oslogin.googleapis.com";

/// OAuth scope granting access to OS Login.
pub const DEFAULT_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

/// Default request timeout (30 seconds).
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default connection timeout (5 seconds).
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

fn default_user_agent() -> String {
    concat!("ephemeral-keys/", env!("CARGO_PKG_VERSION")).to_owned()
}

/// Configuration for [`OsLoginConnector`](crate::OsLoginConnector) and
/// [`ServiceAccountProvider`](crate::ServiceAccountProvider).
///
/// # Example
///
/// ```
/// use std::time::Duration;
///
/// use ephemeral_keys_oslogin::OsLoginConfig;
///
/// let config = OsLoginConfig::builder()
///     .timeout(Duration::from_secs(10))
///     .project_id("my-project")
///     .build()?;
/// assert_eq!(config.endpoint(), "https://oslogin.googleapis.com");
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OsLoginConfig {
    /// Base URL of the OS Login API.
    #[serde(default = "default_endpoint")]
    pub(crate) endpoint: String,

    /// OAuth scope requested in the token exchange.
    #[serde(default = "default_scope")]
    pub(crate) scope: String,

    /// Request timeout.
    #[serde(with = "humantime_serde", default = "default_timeout")]
    pub(crate) timeout: Duration,

    /// Connection timeout.
    #[serde(with = "humantime_serde", default = "default_connect_timeout")]
    pub(crate) connect_timeout: Duration,

    /// `User-Agent` header sent with every request.
    #[serde(default = "default_user_agent")]
    pub(crate) user_agent: String,

    /// Project that scopes key imports, overriding the key file's.
    #[serde(default)]
    pub(crate) project_id: Option<String>,
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_owned()
}

fn default_scope() -> String {
    DEFAULT_SCOPE.to_owned()
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

fn default_connect_timeout() -> Duration {
    DEFAULT_CONNECT_TIMEOUT
}

impl Default for OsLoginConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            scope: default_scope(),
            timeout: DEFAULT_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            user_agent: default_user_agent(),
            project_id: None,
        }
    }
}

#[bon::bon]
impl OsLoginConfig {
    /// Creates a new configuration, validating every field.
    ///
    /// # Optional Fields
    ///
    /// * `endpoint` - OS Login base URL (default: [`DEFAULT_ENDPOINT`]).
    /// * `scope` - OAuth scope (default: [`DEFAULT_SCOPE`]).
    /// * `timeout` - Request timeout (default: 30 seconds).
    /// * `connect_timeout` - Connection timeout (default: 5 seconds).
    /// * `user_agent` - `User-Agent` header (default: `ephemeral-keys/<version>`).
    /// * `project_id` - Project override for key imports.
    ///
    /// # Errors
    ///
    /// Returns [`OsLoginError::Config`] if the endpoint is not an http(s)
    /// URL, the scope is empty, or a timeout is zero.
    #[builder]
    pub fn new(
        #[builder(into, default = default_endpoint())] endpoint: String,
        #[builder(into, default = default_scope())] scope: String,
        #[builder(default = DEFAULT_TIMEOUT)] timeout: Duration,
        #[builder(default = DEFAULT_CONNECT_TIMEOUT)] connect_timeout: Duration,
        #[builder(into, default = default_user_agent())] user_agent: String,
        #[builder(into)] project_id: Option<String>,
    ) -> Result<Self> {
        let config = Self { endpoint, scope, timeout, connect_timeout, user_agent, project_id };
        config.validate()?;
        Ok(config)
    }

    /// Checks the configuration, including one obtained by deserialization.
    ///
    /// # Errors
    ///
    /// Returns [`OsLoginError::Config`] describing the first invalid field.
    pub fn validate(&self) -> Result<()> {
        let url = reqwest::Url::parse(&self.endpoint)
            .map_err(|e| OsLoginError::Config(format!("invalid endpoint {:?}: {e}", self.endpoint)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(OsLoginError::Config(format!(
                "endpoint must be http or https, got {}",
                url.scheme()
            )));
        }

        if self.scope.trim().is_empty() {
            return Err(OsLoginError::Config("scope cannot be empty".into()));
        }

        if self.timeout.is_zero() || self.connect_timeout.is_zero() {
            return Err(OsLoginError::Config("timeouts must be non-zero".into()));
        }

        if self.project_id.as_deref().is_some_and(str::is_empty) {
            return Err(OsLoginError::Config("project_id cannot be empty".into()));
        }

        Ok(())
    }

    /// Returns the API base URL.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Returns the OAuth scope.
    #[must_use]
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Returns the request timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns the connection timeout.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Returns the `User-Agent` header value.
    #[must_use]
    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Returns the project override, if any.
    #[must_use]
    pub fn project_id(&self) -> Option<&str> {
        self.project_id.as_deref()
    }

    /// Builds the HTTP client shared by token exchange and key import.
    pub(crate) fn build_http_client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(self.timeout)
            .connect_timeout(self.connect_timeout)
            .user_agent(self.user_agent.clone())
            .build()
            .map_err(OsLoginError::from)
    }
}
