//! Verification client for the remote voice verifier
//!
//! One request per attempt, no retries. Transport lives in `client`, response
//! interpretation in `response`.

mod client;
mod response;

use async_trait::async_trait;
use thiserror::Error;

use crate::attempt::{AttemptMode, AttemptRequest};
use crate::identity::{LocalKeypair, RecoveryPhrase};

pub use client::{HttpVerifier, VerifierConfig, DEFAULT_API_URL, DEFAULT_TIMEOUT_SECS};
pub use response::{interpret_response, interpret_wallet};

/// Errors that can occur while talking to the verifier
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    /// Transport failure, including timeouts
    #[error("network error: {0}")]
    Network(String),
    /// Non-success HTTP status
    #[error("server error ({status}): {detail}")]
    Server { status: u16, detail: String },
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl VerifyError {
    /// Text shown to the user after "Server Error: ".
    pub fn user_detail(&self) -> String {
        match self {
            VerifyError::Network(message) => message.clone(),
            VerifyError::Server { detail, .. } => detail.clone(),
            VerifyError::MalformedResponse(_) => "unexpected response from verifier".to_string(),
        }
    }
}

/// Outcome of an enroll or verify request.
///
/// `verified` alone decides pass or fail. Everything else is detail.
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationResult {
    pub mode: AttemptMode,
    pub verified: bool,
    pub score: Option<f64>,
    pub threshold: Option<f64>,
    /// Speech-to-text match, 0..=100
    pub content_score: Option<u32>,
    pub bio_score: Option<f64>,
    pub message: Option<String>,
}

impl VerificationResult {
    /// "Content Score: 60/100, Bio Score: 0.40" when the verifier sent details.
    pub fn detail_line(&self) -> Option<String> {
        if self.content_score.is_none() && self.bio_score.is_none() {
            return None;
        }
        let content = self
            .content_score
            .map(|c| c.to_string())
            .unwrap_or_else(|| "-".to_string());
        let bio = self
            .bio_score
            .map(|b| format!("{:.2}", b))
            .unwrap_or_else(|| "-".to_string());
        Some(format!("Content Score: {}/100, Bio Score: {}", content, bio))
    }
}

/// Wallet provisioned by `/create-wallet`.
#[derive(Clone)]
pub struct CreatedWallet {
    pub wallet_address: String,
    /// Restores the same key through `LocalKeypair::from_mnemonic`.
    pub mnemonic: RecoveryPhrase,
    pub keypair: LocalKeypair,
}

impl std::fmt::Debug for CreatedWallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CreatedWallet")
            .field("wallet_address", &self.wallet_address)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait Verifier: Send + Sync {
    /// Dispatch one attempt.
    async fn submit(&self, request: AttemptRequest) -> Result<VerificationResult, VerifyError>;

    /// Ask the verifier to provision a custodial wallet.
    async fn create_wallet(&self) -> Result<CreatedWallet, VerifyError>;
}
