//! Expiry-aware cache of a single ephemeral SSH credential.
//!
//! [`EphemeralKeyManager`] hands out a [`Credential`] for one service
//! identity and provisions a new key pair whenever the cached one is absent
//! or about to expire.
//!
//! # Refresh Policy
//!
//! ```text
//! refresh(ttl, key_size)
//!   → cached credential valid for another EXPIRY_SAFETY_MARGIN? return it
//!   → otherwise take the provisioning lock
//!       → re-check (another caller may have provisioned meanwhile)
//!       → generate key pair
//!       → import public key with expiry now + ttl
//!       → first POSIX account → username
//!       → registry-reported expiry for our fingerprint overrides now + ttl
//!       → publish new credential
//! ```
//!
//! Concurrent callers that find the slot stale are coalesced: only the
//! first one provisions, the rest wait on the lock and pick up the
//! credential it published.
//!
//! # Example
//!
//! ```
//! use std::{sync::Arc, time::Duration};
//!
//! use ephemeral_keys::{
//!     EphemeralKeyManager, MemoryKeyRegistry, PosixAccount, SshKeyGenerator,
//!     testutil::StaticIdentityProvider,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = MemoryKeyRegistry::new();
//!     registry.add_account("svc@proj.iam", PosixAccount::new("svc_proj_iam"));
//!
//!     let manager = EphemeralKeyManager::new(
//!         Arc::new(StaticIdentityProvider::new("svc@proj.iam", "proj")),
//!         Arc::new(SshKeyGenerator::ed25519()),
//!         Arc::new(registry),
//!     )
//!     .init()
//!     .await?;
//!
//!     let credential = manager.refresh(Duration::from_secs(600), 256).await?;
//!     assert_eq!(credential.username(), "svc_proj_iam");
//!     Ok(())
//! }
//! ```

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use chrono::Utc;
use fail::fail_point;
use parking_lot::RwLock;

use crate::{
    error::{KeyGenerationError, KeyManagerError, RegistryError, Result},
    keygen::KeyPairGenerator,
    provider::IdentityProvider,
    registry::{KeyRegistry, RegistryConnector},
    types::{Credential, Identity, PrincipalName},
};

/// How long a credential must stay valid to be handed out from cache.
///
/// Covers the network round trip between `refresh` returning and the caller
/// presenting the key to a host.
pub const EXPIRY_SAFETY_MARGIN: Duration = Duration::from_millis(1_000);

/// State built by `init` and read-only afterwards.
struct Session {
    identity: Identity,
    principal: PrincipalName,
    registry: Arc<dyn KeyRegistry>,
}

/// Provisions and caches a short-lived SSH credential for one identity.
///
/// Construct with [`new`](Self::new), call [`init`](Self::init) once, then
/// share the manager (typically behind an `Arc`) among connection tasks that
/// call [`refresh`](Self::refresh).
pub struct EphemeralKeyManager {
    identity_provider: Arc<dyn IdentityProvider>,
    generator: Arc<dyn KeyPairGenerator>,
    connector: Arc<dyn RegistryConnector>,
    session: Option<Session>,
    /// The single cache slot. Replaced wholesale, never mutated in place.
    current: RwLock<Option<Arc<Credential>>>,
    /// Serializes provisioning so concurrent stale reads coalesce.
    provision_lock: tokio::sync::Mutex<()>,
    provision_count: AtomicU64,
}

impl EphemeralKeyManager {
    /// Creates an uninitialized manager.
    ///
    /// # Arguments
    ///
    /// * `identity_provider` - Resolves the identity keys are provisioned for
    /// * `generator` - Synthesizes key pairs
    /// * `connector` - Builds the registry client for the resolved identity
    #[must_use]
    pub fn new(
        identity_provider: Arc<dyn IdentityProvider>,
        generator: Arc<dyn KeyPairGenerator>,
        connector: Arc<dyn RegistryConnector>,
    ) -> Self {
        Self {
            identity_provider,
            generator,
            connector,
            session: None,
            current: RwLock::new(None),
            provision_lock: tokio::sync::Mutex::new(()),
            provision_count: AtomicU64::new(0),
        }
    }

    /// Resolves the identity and builds the registry client.
    ///
    /// Initializing again replaces the session and drops any cached
    /// credential, since it may belong to a different identity.
    ///
    /// # Errors
    ///
    /// Returns [`KeyManagerError::Configuration`] if the identity cannot be
    /// resolved or the registry client cannot be built. The manager is
    /// consumed and dropped in that case; construct a new one with
    /// [`new`](Self::new) to retry.
    #[tracing::instrument(skip(self), fields(source = %self.identity_provider.describe()))]
    pub async fn init(mut self) -> Result<Self> {
        let context = self.identity_provider.describe();
        self.session = None;
        *self.current.get_mut() = None;

        let identity = self
            .identity_provider
            .resolve()
            .await
            .map_err(|e| KeyManagerError::configuration(context.clone(), e))?;
        let principal = identity.principal();
        let registry = self
            .connector
            .connect(&identity)
            .map_err(|e| KeyManagerError::configuration(context, e))?;

        tracing::debug!(
            %principal,
            project_id = identity.project_id(),
            "key manager initialized"
        );

        self.session = Some(Session { identity, principal, registry });
        Ok(self)
    }

    /// Returns a credential valid for at least [`EXPIRY_SAFETY_MARGIN`].
    ///
    /// Reuses the cached credential when possible; otherwise provisions a new
    /// key pair of `key_size` bits whose registry entry expires after `ttl`
    /// (or whenever the registry says it does).
    ///
    /// # Errors
    ///
    /// - [`KeyManagerError::NotInitialized`] if [`init`](Self::init) has not succeeded
    /// - [`KeyManagerError::KeyGeneration`] if the generator rejects `key_size`
    /// - [`KeyManagerError::RegistryUnavailable`] if the import fails
    /// - [`KeyManagerError::NoAccount`] if the identity has no POSIX account
    ///
    /// A failed refresh leaves the previously cached credential in place.
    #[tracing::instrument(skip(self))]
    pub async fn refresh(&self, ttl: Duration, key_size: u32) -> Result<Arc<Credential>> {
        let session = self.session.as_ref().ok_or(KeyManagerError::NotInitialized)?;

        if let Some(credential) = self.valid_credential() {
            tracing::debug!(cache = "hit", "reusing cached credential");
            return Ok(credential);
        }

        let _guard = self.provision_lock.lock().await;

        // Another caller may have provisioned while we waited for the lock.
        if let Some(credential) = self.valid_credential() {
            tracing::debug!(cache = "hit", "credential provisioned by concurrent caller");
            return Ok(credential);
        }
        tracing::debug!(cache = "miss", "provisioning new credential");

        let credential = Arc::new(self.provision(session, ttl, key_size).await?);
        *self.current.write() = Some(Arc::clone(&credential));
        self.provision_count.fetch_add(1, Ordering::Relaxed);

        tracing::info!(
            username = credential.username(),
            expires_at_ms = credential.expires_at_ms(),
            "using new key pair"
        );

        Ok(credential)
    }

    /// Returns the cached credential without provisioning. It may be stale.
    #[must_use]
    pub fn current(&self) -> Option<Arc<Credential>> {
        self.current.read().clone()
    }

    /// Whether [`init`](Self::init) has succeeded.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.session.is_some()
    }

    /// The resolved identity, once initialized.
    #[must_use]
    pub fn identity(&self) -> Option<&Identity> {
        self.session.as_ref().map(|s| &s.identity)
    }

    /// Number of completed provisioning rounds.
    #[must_use]
    pub fn provision_count(&self) -> u64 {
        self.provision_count.load(Ordering::Relaxed)
    }

    fn valid_credential(&self) -> Option<Arc<Credential>> {
        let now_ms = Utc::now().timestamp_millis();
        self.current
            .read()
            .as_ref()
            .filter(|credential| credential.is_valid_at(now_ms, EXPIRY_SAFETY_MARGIN))
            .cloned()
    }

    async fn provision(
        &self,
        session: &Session,
        ttl: Duration,
        key_size: u32,
    ) -> Result<Credential> {
        let generator = Arc::clone(&self.generator);
        let email = session.identity.client_email().to_owned();
        let key_pair = tokio::task::spawn_blocking(move || generator.generate(&email, key_size))
            .await
            .map_err(|e| KeyGenerationError::backend("key generation task", e))??;

        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let mut expires_at_ms = Utc::now().timestamp_millis().saturating_add(ttl_ms);

        fail_point!("manager-before-import", |_| {
            Err(KeyManagerError::RegistryUnavailable(RegistryError::internal(
                "injected failure before import",
            )))
        });

        let binding = session
            .registry
            .import_public_key(
                &session.principal,
                key_pair.public_key(),
                expires_at_ms.saturating_mul(1_000),
                session.identity.project_id(),
            )
            .await
            .inspect_err(|err| {
                tracing::warn!(principal = %session.principal, error = %err, "key import failed");
            })?;

        let account = binding
            .posix_accounts
            .first()
            .ok_or_else(|| KeyManagerError::no_account(session.principal.as_str()))?;

        if let Some(usec) = binding
            .ssh_public_keys
            .get(key_pair.fingerprint())
            .and_then(|meta| meta.expiration_time_usec)
        {
            expires_at_ms = usec / 1_000;
        } else {
            tracing::debug!(
                fingerprint = key_pair.fingerprint(),
                "registry reported no expiry for imported key, keeping local estimate"
            );
        }

        Ok(Credential::new(key_pair, account.username.clone(), expires_at_ms))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::{
        registry::{ExpiryReporting, MemoryKeyRegistry},
        testutil::{FailingIdentityProvider, RecordingKeyGenerator, StaticIdentityProvider},
        types::PosixAccount,
    };

    const EMAIL: &str = "svc@proj.iam";
    const TEN_MINUTES: Duration = Duration::from_millis(600_000);

    fn registry_with_account() -> MemoryKeyRegistry {
        let registry = MemoryKeyRegistry::new();
        registry.add_account(EMAIL, PosixAccount::new("svc_proj_iam"));
        registry
    }

    fn manager(registry: &MemoryKeyRegistry, generator: RecordingKeyGenerator) -> EphemeralKeyManager {
        EphemeralKeyManager::new(
            Arc::new(StaticIdentityProvider::new(EMAIL, "proj")),
            Arc::new(generator),
            Arc::new(registry.clone()),
        )
    }

    async fn initialized(registry: &MemoryKeyRegistry) -> EphemeralKeyManager {
        manager(registry, RecordingKeyGenerator::new()).init().await.unwrap()
    }

    #[tokio::test]
    async fn test_refresh_before_init_fails_fast() {
        let registry = registry_with_account();
        let manager = manager(&registry, RecordingKeyGenerator::new());

        let result = manager.refresh(TEN_MINUTES, 2048).await;

        assert!(matches!(result, Err(KeyManagerError::NotInitialized)));
        assert_eq!(registry.import_count(), 0);
        assert!(!manager.is_initialized());
    }

    #[tokio::test]
    async fn test_init_failure_is_configuration_error() {
        let registry = registry_with_account();
        let manager = EphemeralKeyManager::new(
            Arc::new(FailingIdentityProvider::new("unreadable key file")),
            Arc::new(RecordingKeyGenerator::new()),
            Arc::new(registry),
        );

        let result = manager.init().await;

        match result {
            Err(KeyManagerError::Configuration { context, .. }) => {
                assert_eq!(context, "failing provider (unreadable key file)");
            },
            Err(other) => panic!("expected configuration error, got {other}"),
            Ok(_) => panic!("expected configuration error"),
        }
    }

    #[tokio::test]
    async fn test_fresh_manager_recovers_after_failed_init() {
        let registry = registry_with_account();
        let failed = EphemeralKeyManager::new(
            Arc::new(FailingIdentityProvider::new("unreadable key file")),
            Arc::new(RecordingKeyGenerator::new()),
            Arc::new(registry.clone()),
        )
        .init()
        .await;
        assert!(matches!(failed, Err(KeyManagerError::Configuration { .. })));

        let manager = initialized(&registry).await;
        let credential = manager.refresh(TEN_MINUTES, 2048).await.unwrap();
        assert_eq!(registry.import_count(), 1);
        assert_eq!(credential.username(), "svc_proj_iam");
    }

    #[tokio::test]
    async fn test_init_resolves_identity() {
        let registry = registry_with_account();
        let manager = initialized(&registry).await;

        let identity = manager.identity().expect("identity after init");
        assert_eq!(identity.client_email(), EMAIL);
        assert_eq!(identity.project_id(), "proj");
        assert!(manager.current().is_none());
    }

    #[tokio::test]
    async fn test_first_refresh_provisions_with_local_expiry() {
        let registry = registry_with_account();
        registry.set_expiry_reporting(ExpiryReporting::Omitted);
        let generator = RecordingKeyGenerator::new();
        let manager = manager(&registry, generator.clone()).init().await.unwrap();

        let before = Utc::now().timestamp_millis();
        let credential = manager.refresh(TEN_MINUTES, 2048).await.unwrap();
        let after = Utc::now().timestamp_millis();

        assert_eq!(credential.username(), "svc_proj_iam");
        assert!(credential.expires_at_ms() >= before + 600_000);
        assert!(credential.expires_at_ms() <= after + 600_000);
        assert_eq!(generator.requests(), vec![(EMAIL.to_owned(), 2048)]);
        assert_eq!(manager.provision_count(), 1);
    }

    #[tokio::test]
    async fn test_server_reported_expiry_wins() {
        let registry = registry_with_account();
        let server_expiry_usec = Utc::now().timestamp_micros() + 120_000_000;
        registry.set_expiry_reporting(ExpiryReporting::Override(server_expiry_usec));
        let manager = initialized(&registry).await;

        let credential = manager.refresh(TEN_MINUTES, 2048).await.unwrap();

        assert_eq!(credential.expires_at_ms(), server_expiry_usec / 1_000);
    }

    #[tokio::test]
    async fn test_listed_key_without_expiry_keeps_local_estimate() {
        let registry = registry_with_account();
        registry.set_expiry_reporting(ExpiryReporting::Unset);
        let manager = initialized(&registry).await;

        let before = Utc::now().timestamp_millis();
        let credential = manager.refresh(TEN_MINUTES, 2048).await.unwrap();

        assert!(credential.expires_at_ms() >= before + 600_000);
    }

    #[tokio::test]
    async fn test_cached_credential_is_reused() {
        let registry = registry_with_account();
        let manager = initialized(&registry).await;

        let first = manager.refresh(TEN_MINUTES, 2048).await.unwrap();
        let second = manager.refresh(TEN_MINUTES, 2048).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.public_key(), second.public_key());
        assert_eq!(registry.import_count(), 1);
    }

    #[rstest]
    #[case::inside_margin(500_000)]
    #[case::already_expired(-5_000_000)]
    #[tokio::test]
    async fn test_stale_credential_is_reprovisioned(#[case] offset_usec: i64) {
        let registry = registry_with_account();
        registry
            .set_expiry_reporting(ExpiryReporting::Override(Utc::now().timestamp_micros() + offset_usec));
        let manager = initialized(&registry).await;

        let first = manager.refresh(TEN_MINUTES, 2048).await.unwrap();
        registry.set_expiry_reporting(ExpiryReporting::AsRequested);
        let second = manager.refresh(TEN_MINUTES, 2048).await.unwrap();

        assert_ne!(first.public_key(), second.public_key());
        assert_eq!(registry.import_count(), 2);
        assert_eq!(manager.provision_count(), 2);
    }

    #[tokio::test]
    async fn test_no_posix_account_caches_nothing() {
        let registry = MemoryKeyRegistry::new();
        let manager = initialized(&registry).await;

        let result = manager.refresh(TEN_MINUTES, 2048).await;

        assert!(
            matches!(result, Err(KeyManagerError::NoAccount { ref principal }) if principal == "users/svc@proj.iam")
        );
        assert!(manager.current().is_none());
        assert_eq!(manager.provision_count(), 0);
    }

    #[tokio::test]
    async fn test_first_posix_account_is_selected() {
        let registry = MemoryKeyRegistry::new();
        registry.add_account(EMAIL, PosixAccount::new("primary_login"));
        registry.add_account(EMAIL, PosixAccount::new("secondary_login"));
        let manager = initialized(&registry).await;

        let credential = manager.refresh(TEN_MINUTES, 2048).await.unwrap();

        assert_eq!(credential.username(), "primary_login");
    }

    #[tokio::test]
    async fn test_registry_failure_keeps_valid_cached_credential() {
        let registry = registry_with_account();
        let manager = initialized(&registry).await;
        let cached = manager.refresh(TEN_MINUTES, 2048).await.unwrap();

        registry.fail_next(RegistryError::timeout());
        // Still valid, so no provisioning happens and the queued failure stays pending.
        let again = manager.refresh(TEN_MINUTES, 2048).await.unwrap();

        assert!(Arc::ptr_eq(&cached, &again));
        assert_eq!(registry.import_count(), 1);
    }

    #[tokio::test]
    async fn test_registry_failure_on_stale_credential_propagates() {
        let registry = registry_with_account();
        registry.set_expiry_reporting(ExpiryReporting::Override(0));
        let manager = initialized(&registry).await;
        let stale = manager.refresh(TEN_MINUTES, 2048).await.unwrap();

        registry.fail_next(RegistryError::connection("connection reset"));
        let result = manager.refresh(TEN_MINUTES, 2048).await;

        assert!(matches!(
            result,
            Err(KeyManagerError::RegistryUnavailable(RegistryError::Connection { .. }))
        ));
        let current = manager.current().expect("previous credential is untouched");
        assert!(Arc::ptr_eq(&stale, &current));
    }

    #[tokio::test]
    async fn test_generator_failure_propagates() {
        let registry = registry_with_account();
        let manager = manager(&registry, RecordingKeyGenerator::rejecting(1024)).init().await.unwrap();

        let result = manager.refresh(TEN_MINUTES, 1024).await;

        assert!(matches!(
            result,
            Err(KeyManagerError::KeyGeneration(KeyGenerationError::UnsupportedKeySize {
                bits: 1024
            }))
        ));
        assert_eq!(registry.import_count(), 0);
    }

    #[tokio::test]
    async fn test_import_requests_full_ttl_in_microseconds() {
        let registry = registry_with_account();
        let manager = initialized(&registry).await;

        let before_usec = Utc::now().timestamp_micros();
        let credential = manager.refresh(TEN_MINUTES, 2048).await.unwrap();

        let stored = registry.keys_for(EMAIL);
        let meta = stored.get(credential.key_pair().fingerprint()).expect("key stored");
        let requested = meta.expiration_time_usec.expect("expiry recorded");
        assert!(requested >= before_usec + 600_000_000 - 1_000);
        assert_eq!(requested % 1_000, 0, "expiry is derived from millisecond clock");
    }

    #[tokio::test]
    async fn test_reinit_drops_cached_credential() {
        let registry = registry_with_account();
        let manager = initialized(&registry).await;
        manager.refresh(TEN_MINUTES, 2048).await.unwrap();
        assert!(manager.current().is_some());

        let manager = manager.init().await.unwrap();

        assert!(manager.current().is_none());
        assert!(manager.is_initialized());
    }

    #[tokio::test]
    async fn test_concurrent_stale_callers_coalesce() {
        let registry = registry_with_account();
        registry.set_latency(Duration::from_millis(50));
        let manager = Arc::new(initialized(&registry).await);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let manager = Arc::clone(&manager);
            handles.push(tokio::spawn(async move { manager.refresh(TEN_MINUTES, 2048).await }));
        }

        let mut keys = Vec::new();
        for handle in handles {
            keys.push(handle.await.unwrap().unwrap().public_key().to_owned());
        }

        assert_eq!(registry.import_count(), 1);
        assert!(keys.windows(2).all(|w| w[0] == w[1]));
    }
}
