//! On-disk keyring holding the staker's coordinator-chain key.

use std::path::Path;

use bitcoin::{
    hashes::{sha256, Hash},
    secp256k1::{Message, PublicKey, Secp256k1, SecretKey},
};

use crate::error::{CoordinatorError, CoordinatorResult};

/// The staker's coordinator-chain keypair, loaded from a hex-encoded key
/// file.
#[derive(Debug, Clone)]
pub struct Keyring {
    secret_key: SecretKey,
    public_key: PublicKey,
}

impl Keyring {
    /// Loads a keyring from a file containing the hex-encoded secret key.
    pub fn load(path: &Path) -> CoordinatorResult<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| CoordinatorError::Keyring(format!("{}: {e}", path.display())))?;
        let bytes = hex::decode(contents.trim())
            .map_err(|e| CoordinatorError::Keyring(format!("invalid hex: {e}")))?;
        let secret_key = SecretKey::from_slice(&bytes)
            .map_err(|e| CoordinatorError::Keyring(format!("invalid key: {e}")))?;

        Ok(Self::from_secret_key(secret_key))
    }

    /// Wraps an existing secret key.
    pub fn from_secret_key(secret_key: SecretKey) -> Self {
        let secp = Secp256k1::new();
        let public_key = secret_key.public_key(&secp);
        Self {
            secret_key,
            public_key,
        }
    }

    /// Writes a freshly generated key file. Fails if the file already exists.
    pub fn generate(path: &Path) -> CoordinatorResult<Self> {
        if path.exists() {
            return Err(CoordinatorError::Keyring(format!(
                "{} already exists",
                path.display()
            )));
        }

        let secret_key = SecretKey::new(&mut bitcoin::key::rand::thread_rng());
        std::fs::write(path, hex::encode(secret_key.secret_bytes()))
            .map_err(|e| CoordinatorError::Keyring(format!("{}: {e}", path.display())))?;

        Ok(Self::from_secret_key(secret_key))
    }

    /// Signs `payload` with the coordinator key (compact ECDSA over the
    /// sha256 digest).
    pub fn sign(&self, payload: &[u8]) -> Vec<u8> {
        let digest = sha256::Hash::hash(payload).to_byte_array();
        let secp = Secp256k1::new();
        secp.sign_ecdsa(&Message::from_digest(digest), &self.secret_key)
            .serialize_compact()
            .to_vec()
    }

    /// The coordinator-chain public key.
    pub fn public_key(&self) -> PublicKey {
        self.public_key
    }
}
