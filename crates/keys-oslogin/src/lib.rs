//! # Ephemeral Keys: OS Login backend
//!
//! Google Cloud OS Login implementation of the [`ephemeral_keys`]
//! collaborator traits.
//!
//! - **[`ServiceAccountProvider`]**: resolves a service account key (file,
//!   inline JSON, or `GOOGLE_APPLICATION_CREDENTIALS`) into an identity
//!   whose [`ServiceAccountTokenSource`] performs the OAuth JWT-bearer
//!   exchange
//! - **[`OsLoginConnector`]** / **[`OsLoginClient`]**: imports public keys
//!   through `users.importSshPublicKey` and maps the login profile onto an
//!   [`AccountBinding`](ephemeral_keys::AccountBinding)
//! - **[`OsLoginConfig`]**: endpoint, scope, timeouts
//!
//! ## Feature Flags
//!
//! - **`failpoints`**: enables the `oslogin-before-request` injection point

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod client;
mod config;
mod credentials;
mod error;
mod wire;

pub use client::{OsLoginClient, OsLoginConnector};
pub use config::{DEFAULT_ENDPOINT, DEFAULT_SCOPE, OsLoginConfig};
pub use credentials::{
    CREDENTIALS_ENV_VAR, DEFAULT_TOKEN_URI, KeySource, ServiceAccountProvider,
    ServiceAccountTokenSource,
};
pub use error::{OsLoginError, Result};
