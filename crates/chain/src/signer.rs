//! Keeper keypair.
//!
//! The signing key is derived from a Stellar secret seed (`S...`). Key
//! generation and custody are out of scope; the seed comes from config.

use ed25519_dalek::{Signer, SigningKey};
use stellar_strkey::{ed25519, DecodeError};

/// Ed25519 keypair of the keeper account.
pub struct Keypair {
    signing_key: SigningKey,
}

impl Keypair {
    /// Build from a secret seed strkey.
    pub fn from_secret(secret: &str) -> Result<Self, DecodeError> {
        let seed = ed25519::PrivateKey::from_string(secret.trim())?;
        Ok(Self {
            signing_key: SigningKey::from_bytes(&seed.0),
        })
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// Account strkey (`G...`).
    pub fn address(&self) -> String {
        ed25519::PublicKey(self.public_key()).to_string()
    }

    /// Last four bytes of the public key, used as the signature hint.
    pub fn hint(&self) -> [u8; 4] {
        let pk = self.public_key();
        [pk[28], pk[29], pk[30], pk[31]]
    }

    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing_key.sign(message).to_bytes()
    }
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keypair")
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}
