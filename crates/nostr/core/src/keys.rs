//! Keypair generation and import.
//!
//! A Nostr identity is a secp256k1 keypair: a 32-byte secret and the x-only
//! (BIP-340) public key derived from it. Keys are held in memory only; there
//! is no persistence or encryption at rest.

use bitcoin::key::Secp256k1;
use bitcoin::secp256k1::SecretKey;
use rand::RngCore;
use thiserror::Error;

/// Errors that can occur during key operations.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("invalid key format: {0}")]
    InvalidKeyFormat(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),
}

/// A Nostr keypair containing both private and public keys.
///
/// Invariant: `public_key` is always derived from `private_key`; the two
/// fields are never set independently.
#[derive(Clone, PartialEq, Eq)]
pub struct Keypair {
    /// The 32-byte private key
    private_key: [u8; 32],
    /// The 32-byte x-only public key (for Nostr, we use only the x-coordinate)
    public_key: [u8; 32],
}

impl Keypair {
    /// Generate a new keypair from a cryptographically random secret.
    pub fn generate() -> Self {
        // Rejection-sample until the bytes are a valid scalar. The invalid
        // range (zero or >= curve order) is negligible, so this loop all but
        // always runs once.
        loop {
            let mut secret = [0u8; 32];
            rand::rng().fill_bytes(&mut secret);
            if let Ok(keypair) = Self::from_secret_key(&secret) {
                return keypair;
            }
        }
    }

    /// Build a keypair from a 32-byte secret, deriving the public key.
    pub fn from_secret_key(secret: &[u8; 32]) -> Result<Self, KeyError> {
        let secp = Secp256k1::new();
        let sk =
            SecretKey::from_slice(secret).map_err(|e| KeyError::InvalidKey(e.to_string()))?;
        let (xonly, _parity) = sk.x_only_public_key(&secp);

        Ok(Self {
            private_key: *secret,
            public_key: xonly.serialize(),
        })
    }

    /// Import a keypair from a 64-character hex secret.
    ///
    /// Anything that is not exactly 64 hex characters fails with
    /// [`KeyError::InvalidKeyFormat`].
    pub fn from_secret_hex(hex_str: &str) -> Result<Self, KeyError> {
        if hex_str.len() != 64 {
            return Err(KeyError::InvalidKeyFormat(format!(
                "expected 64 hex characters, got {}",
                hex_str.len()
            )));
        }

        let bytes = hex::decode(hex_str)
            .map_err(|e| KeyError::InvalidKeyFormat(format!("invalid hex: {}", e)))?;

        let mut secret = [0u8; 32];
        secret.copy_from_slice(&bytes);

        Self::from_secret_key(&secret)
            .map_err(|e| KeyError::InvalidKeyFormat(e.to_string()))
    }

    /// The 32-byte private key.
    pub fn private_key(&self) -> &[u8; 32] {
        &self.private_key
    }

    /// The 32-byte x-only public key.
    pub fn public_key(&self) -> &[u8; 32] {
        &self.public_key
    }

    /// Get the private key as a lowercase hex string.
    pub fn private_key_hex(&self) -> String {
        hex::encode(self.private_key)
    }

    /// Get the public key as a lowercase hex string.
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key)
    }
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keypair")
            .field("public_key", &self.public_key_hex())
            .field("private_key", &"[redacted]")
            .finish()
    }
}
