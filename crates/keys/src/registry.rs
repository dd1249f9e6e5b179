//! Remote key registry abstraction.
//!
//! A [`KeyRegistry`] imports a public key for a principal and answers with
//! the principal's [`AccountBinding`]. Registries are built per identity by
//! a [`RegistryConnector`] during
//! [`EphemeralKeyManager::init`](crate::EphemeralKeyManager::init).
//!
//! [`MemoryKeyRegistry`] is an in-process implementation for tests and
//! local development.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use crate::{
    error::RegistryError,
    keygen::fingerprint,
    types::{AccountBinding, Identity, KeyMetadata, PosixAccount, PrincipalName},
};

/// Client for a remote directory that stores SSH public keys.
#[async_trait]
pub trait KeyRegistry: Send + Sync {
    /// Imports `public_key` for `principal` and returns the account binding.
    ///
    /// # Arguments
    ///
    /// * `principal` - User the key is registered for
    /// * `public_key` - OpenSSH public key line
    /// * `expires_at_usec` - Requested absolute expiry, epoch microseconds
    /// * `project_id` - Project scoping the import
    ///
    /// # Errors
    ///
    /// Returns a [`RegistryError`] on transport failures or when the
    /// registry refuses the import.
    async fn import_public_key(
        &self,
        principal: &PrincipalName,
        public_key: &str,
        expires_at_usec: i64,
        project_id: &str,
    ) -> Result<AccountBinding, RegistryError>;
}

/// Builds a [`KeyRegistry`] client bound to an identity's credentials.
pub trait RegistryConnector: Send + Sync {
    /// Creates the client. Called once per `init`.
    ///
    /// # Errors
    ///
    /// Returns a [`RegistryError`] if the client cannot be configured.
    fn connect(&self, identity: &Identity) -> Result<Arc<dyn KeyRegistry>, RegistryError>;
}

/// How [`MemoryKeyRegistry`] reports the expiry of a freshly imported key.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ExpiryReporting {
    /// Records and reports the requested expiry.
    #[default]
    AsRequested,
    /// Reports a registry-assigned expiry (epoch microseconds) instead.
    Override(i64),
    /// Lists the key without an expiry.
    Unset,
    /// Leaves the imported key out of the response entirely.
    Omitted,
}

#[derive(Debug, Default)]
struct RegistryState {
    accounts: HashMap<PrincipalName, Vec<PosixAccount>>,
    keys: HashMap<PrincipalName, HashMap<String, KeyMetadata>>,
    expiry_reporting: ExpiryReporting,
    pending_failures: VecDeque<RegistryError>,
    latency: Option<Duration>,
}

/// In-memory [`KeyRegistry`] and [`RegistryConnector`].
///
/// Clones share state, so a test can keep a handle while the manager owns
/// another.
///
/// # Example
///
/// ```
/// use ephemeral_keys::{KeyRegistry, MemoryKeyRegistry, PosixAccount, PrincipalName};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let registry = MemoryKeyRegistry::new();
///     registry.add_account("svc@proj.iam", PosixAccount::new("svc_proj_iam"));
///
///     let principal = PrincipalName::from_email("svc@proj.iam");
///     let binding = registry
///         .import_public_key(&principal, "ssh-ed25519 AAAA svc@proj.iam", 0, "proj")
///         .await?;
///
///     assert_eq!(binding.posix_accounts[0].username, "svc_proj_iam");
///     Ok(())
/// }
/// ```
#[derive(Debug, Default, Clone)]
pub struct MemoryKeyRegistry {
    state: Arc<RwLock<RegistryState>>,
    imports: Arc<AtomicU64>,
}

impl MemoryKeyRegistry {
    /// Creates an empty registry with no accounts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a POSIX account to the user with the given email.
    ///
    /// Accounts are returned in insertion order.
    pub fn add_account(&self, email: &str, account: PosixAccount) {
        self.state
            .write()
            .accounts
            .entry(PrincipalName::from_email(email))
            .or_default()
            .push(account);
    }

    /// Changes how subsequent imports report key expiry.
    pub fn set_expiry_reporting(&self, reporting: ExpiryReporting) {
        self.state.write().expiry_reporting = reporting;
    }

    /// Makes the next import fail with `error`. Queued failures are consumed
    /// in order.
    pub fn fail_next(&self, error: RegistryError) {
        self.state.write().pending_failures.push_back(error);
    }

    /// Delays every import by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.state.write().latency = Some(latency);
    }

    /// Number of import calls that reached the registry, failed or not.
    #[must_use]
    pub fn import_count(&self) -> u64 {
        self.imports.load(Ordering::Acquire)
    }

    /// Keys currently stored for the user with the given email.
    #[must_use]
    pub fn keys_for(&self, email: &str) -> HashMap<String, KeyMetadata> {
        self.state
            .read()
            .keys
            .get(&PrincipalName::from_email(email))
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl KeyRegistry for MemoryKeyRegistry {
    #[tracing::instrument(skip(self, public_key))]
    async fn import_public_key(
        &self,
        principal: &PrincipalName,
        public_key: &str,
        expires_at_usec: i64,
        project_id: &str,
    ) -> Result<AccountBinding, RegistryError> {
        self.imports.fetch_add(1, Ordering::AcqRel);

        let latency = self.state.read().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.state.write();
        if let Some(error) = state.pending_failures.pop_front() {
            return Err(error);
        }

        let reporting = state.expiry_reporting;
        let stored_expiry = match reporting {
            ExpiryReporting::Override(usec) => Some(usec),
            ExpiryReporting::Unset => None,
            ExpiryReporting::AsRequested | ExpiryReporting::Omitted => Some(expires_at_usec),
        };

        let now_usec = Utc::now().timestamp_micros();
        let keys = state.keys.entry(principal.clone()).or_default();
        keys.retain(|_, meta| meta.expiration_time_usec.is_none_or(|usec| usec > now_usec));

        let fp = fingerprint(public_key);
        keys.insert(
            fp.clone(),
            KeyMetadata { key: public_key.to_owned(), expiration_time_usec: stored_expiry },
        );

        let mut ssh_public_keys = keys.clone();
        if reporting == ExpiryReporting::Omitted {
            ssh_public_keys.remove(&fp);
        }

        Ok(AccountBinding {
            posix_accounts: state.accounts.get(principal).cloned().unwrap_or_default(),
            ssh_public_keys,
        })
    }
}

impl RegistryConnector for MemoryKeyRegistry {
    fn connect(&self, _identity: &Identity) -> Result<Arc<dyn KeyRegistry>, RegistryError> {
        Ok(Arc::new(self.clone()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    const KEY: &str = "ssh-ed25519 AAAA svc@proj.iam";

    fn principal() -> PrincipalName {
        PrincipalName::from_email("svc@proj.iam")
    }

    #[tokio::test]
    async fn test_import_reports_requested_expiry() {
        let registry = MemoryKeyRegistry::new();
        registry.add_account("svc@proj.iam", PosixAccount::new("svc_proj_iam"));
        let expiry = Utc::now().timestamp_micros() + 60_000_000;

        let binding = registry.import_public_key(&principal(), KEY, expiry, "proj").await.unwrap();

        let meta = binding.ssh_public_keys.get(&fingerprint(KEY)).expect("key listed");
        assert_eq!(meta.expiration_time_usec, Some(expiry));
        assert_eq!(meta.key, KEY);
        assert_eq!(registry.import_count(), 1);
    }

    #[tokio::test]
    async fn test_import_without_account_returns_empty_binding() {
        let registry = MemoryKeyRegistry::new();
        let binding = registry.import_public_key(&principal(), KEY, i64::MAX, "proj").await.unwrap();
        assert!(binding.posix_accounts.is_empty());
    }

    #[tokio::test]
    async fn test_accounts_keep_insertion_order() {
        let registry = MemoryKeyRegistry::new();
        registry.add_account("svc@proj.iam", PosixAccount::new("first"));
        registry.add_account("svc@proj.iam", PosixAccount::new("second"));

        let binding = registry.import_public_key(&principal(), KEY, i64::MAX, "proj").await.unwrap();
        let names: Vec<_> = binding.posix_accounts.iter().map(|a| a.username.as_str()).collect();
        assert_eq!(names, ["first", "second"]);
    }

    #[tokio::test]
    async fn test_omitted_reporting_hides_new_key_but_stores_it() {
        let registry = MemoryKeyRegistry::new();
        registry.set_expiry_reporting(ExpiryReporting::Omitted);

        let binding = registry.import_public_key(&principal(), KEY, i64::MAX, "proj").await.unwrap();

        assert!(!binding.ssh_public_keys.contains_key(&fingerprint(KEY)));
        assert!(registry.keys_for("svc@proj.iam").contains_key(&fingerprint(KEY)));
    }

    #[tokio::test]
    async fn test_expired_keys_are_purged_on_import() {
        let registry = MemoryKeyRegistry::new();
        let past = Utc::now().timestamp_micros() - 1;
        registry.import_public_key(&principal(), "ssh-ed25519 OLD", past, "proj").await.unwrap();
        registry.import_public_key(&principal(), KEY, i64::MAX, "proj").await.unwrap();

        let keys = registry.keys_for("svc@proj.iam");
        assert_eq!(keys.len(), 1);
        assert!(keys.contains_key(&fingerprint(KEY)));
    }

    #[tokio::test]
    async fn test_queued_failures_are_consumed_in_order() {
        let registry = MemoryKeyRegistry::new();
        registry.fail_next(RegistryError::timeout());
        registry.fail_next(RegistryError::connection("reset"));

        let first = registry.import_public_key(&principal(), KEY, i64::MAX, "proj").await;
        let second = registry.import_public_key(&principal(), KEY, i64::MAX, "proj").await;
        let third = registry.import_public_key(&principal(), KEY, i64::MAX, "proj").await;

        assert!(matches!(first, Err(RegistryError::Timeout)));
        assert!(matches!(second, Err(RegistryError::Connection { .. })));
        assert!(third.is_ok());
        assert_eq!(registry.import_count(), 3);
    }
}
