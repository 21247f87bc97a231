//! Wallet identity binding
//!
//! An `Identity` pairs a base58 public address with a signing capability.
//! The capability is either an external wallet supplied by the embedding
//! application or a `LocalKeypair` held in memory. The choice is made when the
//! identity is created and the rest of the crate only sees the `Signer` trait.

pub mod keypair;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

pub use keypair::{decode_address, verify_detached, KeyError, LocalKeypair, SIGNATURE_LENGTH};

/// Error reported by a signer that declined or failed to sign.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct SignerError(pub String);

/// Signing capability behind an identity.
#[async_trait]
pub trait Signer: Send + Sync {
    /// Base58 public address for this signer.
    fn public_address(&self) -> String;

    /// Produce a detached signature over `message`.
    async fn sign(&self, message: &[u8]) -> Result<Vec<u8>, SignerError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    #[error("no wallet identity is connected")]
    NoActiveIdentity,
    #[error("signing rejected: {0}")]
    SigningRejected(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityOrigin {
    ExternalWallet,
    LocalKeypair,
}

impl IdentityOrigin {
    pub fn label(&self) -> &'static str {
        match self {
            IdentityOrigin::ExternalWallet => "external wallet",
            IdentityOrigin::LocalKeypair => "local keypair",
        }
    }
}

/// A signing identity. Cheap to clone; clones share the signer.
#[derive(Clone)]
pub struct Identity {
    address: String,
    origin: IdentityOrigin,
    signer: Arc<dyn Signer>,
}

impl Identity {
    pub fn external(signer: Arc<dyn Signer>) -> Self {
        Self {
            address: signer.public_address(),
            origin: IdentityOrigin::ExternalWallet,
            signer,
        }
    }

    pub fn local(keypair: LocalKeypair) -> Self {
        Self {
            address: keypair.address(),
            origin: IdentityOrigin::LocalKeypair,
            signer: Arc::new(keypair),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn origin(&self) -> IdentityOrigin {
        self.origin
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("address", &self.address)
            .field("origin", &self.origin)
            .finish()
    }
}

impl PartialEq for Identity {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address && self.origin == other.origin
    }
}

/// Seed phrase shown once so the user can restore a local keypair later.
/// Wiped on drop and never printed by `Debug`.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct RecoveryPhrase(String);

impl RecoveryPhrase {
    pub fn new(words: impl Into<String>) -> Self {
        Self(words.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl std::fmt::Debug for RecoveryPhrase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RecoveryPhrase(..)")
    }
}

/// Signature over an intent message, ready for transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedIntent {
    pub address: String,
    pub message: String,
    /// Base58 encoded
    pub signature: String,
}

/// Holds the session's active identity and signs on its behalf.
#[derive(Debug, Default)]
pub struct IdentityBinder {
    active: Option<Identity>,
}

impl IdentityBinder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the active identity.
    pub fn bind(&mut self, identity: Identity) {
        log::info!(
            "Identity bound: {} ({})",
            identity.address(),
            identity.origin().label()
        );
        self.active = Some(identity);
    }

    pub fn unbind(&mut self) -> Option<Identity> {
        let previous = self.active.take();
        if let Some(identity) = &previous {
            log::info!("Identity released: {}", identity.address());
        }
        previous
    }

    pub fn active(&self) -> Option<&Identity> {
        self.active.as_ref()
    }

    /// Sign `intent` with the active identity.
    ///
    /// The signature is checked against the bound address before it is
    /// returned, so a request built from it is always internally consistent.
    pub async fn sign(&self, intent: &str) -> Result<SignedIntent, IdentityError> {
        let identity = self.active.as_ref().ok_or(IdentityError::NoActiveIdentity)?;

        let signature = identity
            .signer
            .sign(intent.as_bytes())
            .await
            .map_err(|e| IdentityError::SigningRejected(e.0))?;

        if signature.len() != SIGNATURE_LENGTH {
            return Err(IdentityError::SigningRejected(format!(
                "signer returned {} bytes, expected {}",
                signature.len(),
                SIGNATURE_LENGTH
            )));
        }
        if !verify_detached(identity.address(), intent.as_bytes(), &signature) {
            return Err(IdentityError::SigningRejected(
                "signature does not match the connected address".to_string(),
            ));
        }

        log::debug!("Signed intent {:?} for {}", intent, identity.address());

        Ok(SignedIntent {
            address: identity.address().to_string(),
            message: intent.to_string(),
            signature: bs58::encode(signature).into_string(),
        })
    }
}
