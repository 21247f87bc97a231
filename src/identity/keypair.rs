//! Local Ed25519 keypair and the base58 codecs shared with the verifier.
//!
//! Addresses are base58 public keys. Secrets arrive either as a BIP39 seed
//! phrase (seed with empty passphrase, first 32 bytes) or as a base58
//! `secret || public` blob, the format `/create-wallet` hands out.

use async_trait::async_trait;
use bip39::Mnemonic;
use ed25519_dalek::{Signature, Signer as _, SigningKey, Verifier as _, VerifyingKey};
use rand_core::OsRng;
use thiserror::Error;
use zeroize::Zeroize;

use super::{Signer, SignerError};

pub const SECRET_KEY_LENGTH: usize = ed25519_dalek::SECRET_KEY_LENGTH;
pub const KEYPAIR_LENGTH: usize = ed25519_dalek::KEYPAIR_LENGTH;
pub const SIGNATURE_LENGTH: usize = ed25519_dalek::SIGNATURE_LENGTH;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("invalid base58: {0}")]
    Base58(String),
    #[error("expected {expected} bytes, got {actual}")]
    Length { expected: usize, actual: usize },
    #[error("invalid public key: {0}")]
    PublicKey(String),
    #[error("secret key does not match the embedded public key")]
    Mismatch,
    #[error("invalid seed phrase: {0}")]
    Mnemonic(String),
}

/// Keypair held in process memory for the lifetime of the identity.
#[derive(Clone)]
pub struct LocalKeypair {
    signing: SigningKey,
}

impl LocalKeypair {
    /// Fresh key from the OS RNG.
    pub fn generate() -> Self {
        Self {
            signing: SigningKey::generate(&mut OsRng),
        }
    }

    /// Restore from a BIP39 seed phrase.
    pub fn from_mnemonic(words: &str) -> Result<Self, KeyError> {
        let mnemonic =
            Mnemonic::parse_normalized(words).map_err(|e| KeyError::Mnemonic(e.to_string()))?;
        let mut seed = mnemonic.to_seed_normalized("");

        let mut secret = [0u8; SECRET_KEY_LENGTH];
        secret.copy_from_slice(&seed[..SECRET_KEY_LENGTH]);
        let signing = SigningKey::from_bytes(&secret);

        seed.zeroize();
        secret.zeroize();
        Ok(Self { signing })
    }

    /// Accepts a 64-byte `secret || public` blob (public half checked) or a bare 32-byte secret.
    pub fn from_secret_base58(encoded: &str) -> Result<Self, KeyError> {
        let mut bytes = bs58::decode(encoded.trim())
            .into_vec()
            .map_err(|e| KeyError::Base58(e.to_string()))?;

        let result = match bytes.len() {
            KEYPAIR_LENGTH => {
                let mut pair = [0u8; KEYPAIR_LENGTH];
                pair.copy_from_slice(&bytes);
                let parsed = SigningKey::from_keypair_bytes(&pair).map_err(|_| KeyError::Mismatch);
                pair.zeroize();
                parsed
            }
            SECRET_KEY_LENGTH => {
                let mut secret = [0u8; SECRET_KEY_LENGTH];
                secret.copy_from_slice(&bytes);
                let signing = SigningKey::from_bytes(&secret);
                secret.zeroize();
                Ok(signing)
            }
            actual => Err(KeyError::Length {
                expected: KEYPAIR_LENGTH,
                actual,
            }),
        };

        bytes.zeroize();
        result.map(|signing| Self { signing })
    }

    pub fn address(&self) -> String {
        bs58::encode(self.signing.verifying_key().as_bytes()).into_string()
    }

    /// Base58 `secret || public`, the inverse of `from_secret_base58`.
    pub fn to_secret_base58(&self) -> String {
        let mut pair = self.signing.to_keypair_bytes();
        let encoded = bs58::encode(&pair).into_string();
        pair.zeroize();
        encoded
    }

    pub fn sign_bytes(&self, message: &[u8]) -> [u8; SIGNATURE_LENGTH] {
        self.signing.sign(message).to_bytes()
    }
}

impl std::fmt::Debug for LocalKeypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalKeypair")
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Signer for LocalKeypair {
    fn public_address(&self) -> String {
        self.address()
    }

    async fn sign(&self, message: &[u8]) -> Result<Vec<u8>, SignerError> {
        Ok(self.sign_bytes(message).to_vec())
    }
}

/// Decode a base58 address into a verifying key.
pub fn decode_address(address: &str) -> Result<VerifyingKey, KeyError> {
    let bytes = bs58::decode(address)
        .into_vec()
        .map_err(|e| KeyError::Base58(e.to_string()))?;
    let bytes: [u8; 32] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| KeyError::Length {
            expected: 32,
            actual: bytes.len(),
        })?;
    VerifyingKey::from_bytes(&bytes).map_err(|e| KeyError::PublicKey(e.to_string()))
}

/// Check a detached signature against a base58 address.
pub fn verify_detached(address: &str, message: &[u8], signature: &[u8]) -> bool {
    let Ok(key) = decode_address(address) else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(signature) else {
        return false;
    };
    key.verify(message, &signature).is_ok()
}
