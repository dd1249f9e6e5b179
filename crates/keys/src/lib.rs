//! # Ephemeral Keys
//!
//! Short-lived SSH credentials for service identities.
//!
//! This crate provides:
//! - **[`EphemeralKeyManager`]**: provisions an SSH key pair against a remote key registry, caches
//!   the resulting [`Credential`] and re-provisions it shortly before it expires
//! - **Collaborator traits**: [`IdentityProvider`], [`KeyPairGenerator`], [`KeyRegistry`] and
//!   [`RegistryConnector`], so identity backends can be swapped without touching the refresh
//!   policy
//! - **[`SshKeyGenerator`]**: RSA and Ed25519 key pairs via the `ssh-key` crate
//! - **[`MemoryKeyRegistry`]**: in-process registry for tests and local development
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │            Connection layer (SSH sessions)               │
//! ├──────────────────────────────────────────────────────────┤
//! │                 EphemeralKeyManager                      │
//! │        refresh(ttl, key_size) -> Arc<Credential>         │
//! ├──────────────────┬──────────────────┬────────────────────┤
//! │ IdentityProvider │ KeyPairGenerator │ RegistryConnector  │
//! │                  │                  │   → KeyRegistry    │
//! ├──────────────────┴──────────────────┴────────────────────┤
//! │  ephemeral-keys-oslogin (production) │ testutil / memory │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Feature Flags
//!
//! - **`testutil`**: fake collaborators for tests
//! - **`failpoints`**: enables `fail` crate injection points

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod keygen;
pub mod manager;
pub mod provider;
pub mod registry;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used)]
pub mod testutil;
pub mod types;

// Re-export primary types at crate root for convenience
pub use error::{
    BoxError, CredentialSourceError, KeyGenerationError, KeyManagerError, RegistryError, Result,
};
pub use keygen::{KeyPairGenerator, MIN_RSA_KEY_SIZE, SshKeyAlgorithm, SshKeyGenerator, fingerprint};
pub use manager::{EXPIRY_SAFETY_MARGIN, EphemeralKeyManager};
pub use provider::{IdentityProvider, StaticTokenSource, TokenSource};
pub use registry::{ExpiryReporting, KeyRegistry, MemoryKeyRegistry, RegistryConnector};
pub use types::{
    AccessToken, AccountBinding, Credential, Identity, KeyMetadata, KeyPair, PosixAccount,
    PrincipalName,
};
pub use zeroize::Zeroizing;
