//! SSH key pair generation.
//!
//! [`KeyPairGenerator`] is the capability the manager consumes;
//! [`SshKeyGenerator`] implements it on top of the `ssh-key` crate.

use rand_core::OsRng;
use sha2::{Digest, Sha256};
use ssh_key::{
    LineEnding, PrivateKey,
    private::{Ed25519Keypair, KeypairData, RsaKeypair},
};

use crate::{error::KeyGenerationError, types::KeyPair};

/// Smallest RSA modulus accepted by [`SshKeyGenerator`].
pub const MIN_RSA_KEY_SIZE: u32 = 2048;

/// Synthesizes SSH key pairs.
///
/// Implementations are called from a blocking task, so they may do
/// CPU-heavy work without stalling the async runtime.
pub trait KeyPairGenerator: Send + Sync {
    /// Generates a key pair for `principal` of strength `key_size` bits.
    ///
    /// `principal` ends up as the key comment. Whatever sizes the
    /// implementation accepts are passed through unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`KeyGenerationError`] if the size is unsupported or the key
    /// library fails.
    fn generate(&self, principal: &str, key_size: u32) -> Result<KeyPair, KeyGenerationError>;
}

/// Key algorithm produced by [`SshKeyGenerator`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SshKeyAlgorithm {
    /// RSA with a caller-chosen modulus size.
    #[default]
    Rsa,
    /// Ed25519. The requested key size is ignored.
    Ed25519,
}

/// [`KeyPairGenerator`] backed by the `ssh-key` crate and the OS RNG.
#[derive(Clone, Copy, Debug, Default)]
pub struct SshKeyGenerator {
    algorithm: SshKeyAlgorithm,
}

impl SshKeyGenerator {
    /// Creates a generator for the given algorithm.
    #[must_use]
    pub fn new(algorithm: SshKeyAlgorithm) -> Self {
        Self { algorithm }
    }

    /// RSA generator; `key_size` selects the modulus length.
    #[must_use]
    pub fn rsa() -> Self {
        Self::new(SshKeyAlgorithm::Rsa)
    }

    /// Ed25519 generator.
    #[must_use]
    pub fn ed25519() -> Self {
        Self::new(SshKeyAlgorithm::Ed25519)
    }

    /// The algorithm this generator produces.
    #[must_use]
    pub fn algorithm(&self) -> SshKeyAlgorithm {
        self.algorithm
    }
}

impl KeyPairGenerator for SshKeyGenerator {
    fn generate(&self, principal: &str, key_size: u32) -> Result<KeyPair, KeyGenerationError> {
        let key_data = match self.algorithm {
            SshKeyAlgorithm::Rsa => {
                if key_size < MIN_RSA_KEY_SIZE {
                    return Err(KeyGenerationError::UnsupportedKeySize { bits: key_size });
                }
                let bits = usize::try_from(key_size)
                    .map_err(|_| KeyGenerationError::UnsupportedKeySize { bits: key_size })?;
                let keypair = RsaKeypair::random(&mut OsRng, bits)
                    .map_err(|e| KeyGenerationError::backend("RSA key generation", e))?;
                KeypairData::from(keypair)
            },
            SshKeyAlgorithm::Ed25519 => KeypairData::from(Ed25519Keypair::random(&mut OsRng)),
        };

        let private_key = PrivateKey::new(key_data, principal)
            .map_err(|e| KeyGenerationError::backend("assemble private key", e))?;
        let public_key = private_key
            .public_key()
            .to_openssh()
            .map_err(|e| KeyGenerationError::backend("encode public key", e))?;
        let private_pem = private_key
            .to_openssh(LineEnding::LF)
            .map_err(|e| KeyGenerationError::backend("encode private key", e))?;

        let fingerprint = fingerprint(&public_key);
        tracing::debug!(algorithm = ?self.algorithm, key_size, %fingerprint, "generated SSH key pair");

        Ok(KeyPair::new(public_key, private_pem, fingerprint))
    }
}

/// Computes the registry fingerprint of an OpenSSH public key line.
///
/// Lowercase hex SHA-256 over the exact text submitted to the registry.
#[must_use]
pub fn fingerprint(public_key: &str) -> String {
    hex::encode(Sha256::digest(public_key.as_bytes()))
}
