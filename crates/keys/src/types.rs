//! Value types shared by the manager and its collaborators.

use std::{collections::HashMap, fmt, sync::Arc, time::Duration};

use chrono::{DateTime, TimeZone, Utc};
use zeroize::Zeroizing;

use crate::provider::TokenSource;

/// The service identity on whose behalf keys are provisioned.
///
/// Resolved once by an [`IdentityProvider`](crate::IdentityProvider) and
/// never mutated afterwards.
#[derive(Clone)]
pub struct Identity {
    client_email: String,
    project_id: String,
    auth: Arc<dyn TokenSource>,
}

impl Identity {
    /// Creates a new identity.
    pub fn new(
        client_email: impl Into<String>,
        project_id: impl Into<String>,
        auth: Arc<dyn TokenSource>,
    ) -> Self {
        Self { client_email: client_email.into(), project_id: project_id.into(), auth }
    }

    /// Account email of the identity.
    #[must_use]
    pub fn client_email(&self) -> &str {
        &self.client_email
    }

    /// Project the keys are imported into.
    #[must_use]
    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// Authentication handle used by registry clients.
    #[must_use]
    pub fn auth(&self) -> &Arc<dyn TokenSource> {
        &self.auth
    }

    /// Registry principal derived from the account email.
    #[must_use]
    pub fn principal(&self) -> PrincipalName {
        PrincipalName::from_email(&self.client_email)
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("client_email", &self.client_email)
            .field("project_id", &self.project_id)
            .finish_non_exhaustive()
    }
}

/// Registry-side name of a user, in `users/{email}` form.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PrincipalName(String);

impl PrincipalName {
    /// Resource prefix for user principals.
    pub const PREFIX: &'static str = "users/";

    /// Builds the principal for an account email.
    #[must_use]
    pub fn from_email(email: &str) -> Self {
        Self(format!("{}{email}", Self::PREFIX))
    }

    /// Full resource name (`users/{email}`).
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The email part of the resource name.
    #[must_use]
    pub fn email(&self) -> &str {
        self.0.strip_prefix(Self::PREFIX).unwrap_or(&self.0)
    }
}

impl fmt::Display for PrincipalName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// OAuth-style bearer token handed out by a [`TokenSource`].
#[derive(Clone)]
pub struct AccessToken {
    secret: Zeroizing<String>,
    expires_at: DateTime<Utc>,
}

impl AccessToken {
    /// Creates a token valid until `expires_at`.
    pub fn new(secret: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self { secret: Zeroizing::new(secret.into()), expires_at }
    }

    /// The bearer secret.
    #[must_use]
    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// When the token stops being accepted.
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Whether the token is still usable `leeway` from now.
    #[must_use]
    pub fn is_fresh(&self, leeway: Duration) -> bool {
        let leeway = chrono::Duration::from_std(leeway).unwrap_or(chrono::Duration::zero());
        Utc::now() + leeway < self.expires_at
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("secret", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// A freshly generated SSH key pair.
///
/// The private half is held in [`Zeroizing`] so it is scrubbed from memory
/// when the last [`Credential`] referencing it is dropped.
#[derive(Clone)]
pub struct KeyPair {
    public_key: String,
    private_key: Zeroizing<String>,
    fingerprint: String,
}

impl KeyPair {
    /// Assembles a key pair from its encoded parts.
    ///
    /// `public_key` is an OpenSSH `authorized_keys` line and `private_key`
    /// an OpenSSH PEM document.
    pub fn new(
        public_key: impl Into<String>,
        private_key: Zeroizing<String>,
        fingerprint: impl Into<String>,
    ) -> Self {
        Self { public_key: public_key.into(), private_key, fingerprint: fingerprint.into() }
    }

    /// OpenSSH public key line, as submitted to the registry.
    #[must_use]
    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    /// OpenSSH private key PEM.
    #[must_use]
    pub fn private_key(&self) -> &Zeroizing<String> {
        &self.private_key
    }

    /// Digest correlating this key with registry-side metadata.
    #[must_use]
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key)
            .field("private_key", &"[REDACTED]")
            .field("fingerprint", &self.fingerprint)
            .finish()
    }
}

/// A POSIX account bound to an identity.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PosixAccount {
    /// Login name on target hosts.
    pub username: String,
    /// Numeric user id, when reported.
    pub uid: Option<i64>,
    /// Numeric group id, when reported.
    pub gid: Option<i64>,
    /// Home directory, when reported.
    pub home_directory: Option<String>,
    /// Login shell, when reported.
    pub shell: Option<String>,
    /// Whether the registry marks this as the primary account.
    pub primary: bool,
}

impl PosixAccount {
    /// Creates an account record carrying only a username.
    pub fn new(username: impl Into<String>) -> Self {
        Self { username: username.into(), ..Self::default() }
    }
}

/// Registry-side metadata for one imported public key.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KeyMetadata {
    /// The public key as the registry stored it.
    pub key: String,
    /// Expiry recorded by the registry, epoch microseconds.
    pub expiration_time_usec: Option<i64>,
}

/// The registry's answer to a key import.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AccountBinding {
    /// POSIX accounts in registry order.
    pub posix_accounts: Vec<PosixAccount>,
    /// Key metadata indexed by fingerprint.
    pub ssh_public_keys: HashMap<String, KeyMetadata>,
}

/// The cached SSH credential handed to callers.
///
/// Immutable once built; the manager replaces it wholesale, so the key
/// pair, username and expiry always come from the same provisioning round.
#[derive(Clone, Debug)]
pub struct Credential {
    key_pair: KeyPair,
    username: String,
    expires_at_ms: i64,
}

impl Credential {
    /// Creates a credential expiring at `expires_at_ms` (epoch milliseconds).
    pub fn new(key_pair: KeyPair, username: impl Into<String>, expires_at_ms: i64) -> Self {
        Self { key_pair, username: username.into(), expires_at_ms }
    }

    /// The key pair registered for this credential.
    #[must_use]
    pub fn key_pair(&self) -> &KeyPair {
        &self.key_pair
    }

    /// OpenSSH public key line.
    #[must_use]
    pub fn public_key(&self) -> &str {
        self.key_pair.public_key()
    }

    /// OpenSSH private key PEM.
    #[must_use]
    pub fn private_key(&self) -> &Zeroizing<String> {
        self.key_pair.private_key()
    }

    /// Login name resolved from the registry.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Expiry in epoch milliseconds.
    #[must_use]
    pub fn expires_at_ms(&self) -> i64 {
        self.expires_at_ms
    }

    /// Expiry as a timestamp. Out-of-range values clamp to the epoch.
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.expires_at_ms).single().unwrap_or_default()
    }

    /// Whether the credential stays valid for at least `margin` past `now_ms`.
    #[must_use]
    pub fn is_valid_at(&self, now_ms: i64, margin: Duration) -> bool {
        let margin_ms = i64::try_from(margin.as_millis()).unwrap_or(i64::MAX);
        now_ms.saturating_add(margin_ms) <= self.expires_at_ms
    }
}
