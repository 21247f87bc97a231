//! Challenge phrase generation
//!
//! Each attempt reads a fresh phrase aloud so a recording from an earlier
//! session cannot satisfy the verifier's content check. Phrases are BIP39
//! mnemonic words drawn from OS entropy and truncated to a fixed word count.

use bip39::Mnemonic;
use chrono::{DateTime, Utc};
use rand_core::{OsRng, RngCore};
use serde::Serialize;
use thiserror::Error;
use zeroize::Zeroize;

/// Word count used when nothing else is configured.
pub const DEFAULT_WORD_COUNT: usize = 12;

/// The verifier rejects phrases shorter than ten characters; four words always clear that.
pub const MIN_WORD_COUNT: usize = 4;

/// A 256-bit mnemonic has 24 words.
pub const MAX_WORD_COUNT: usize = 24;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChallengeError {
    #[error("failed to generate challenge phrase: {0}")]
    Generation(String),
}

/// An issued challenge. Immutable; regeneration produces a new value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Challenge {
    phrase: String,
    issued_at: DateTime<Utc>,
}

impl Challenge {
    pub fn phrase(&self) -> &str {
        &self.phrase
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn word_count(&self) -> usize {
        self.phrase.split_whitespace().count()
    }
}

/// Stateless phrase source. Safe to call repeatedly; the only shared state is the OS RNG.
#[derive(Debug, Clone, Copy)]
pub struct ChallengeGenerator {
    word_count: usize,
}

impl Default for ChallengeGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_WORD_COUNT)
    }
}

impl ChallengeGenerator {
    /// `word_count` is clamped to `MIN_WORD_COUNT..=MAX_WORD_COUNT`.
    pub fn new(word_count: usize) -> Self {
        Self {
            word_count: word_count.clamp(MIN_WORD_COUNT, MAX_WORD_COUNT),
        }
    }

    pub fn word_count(&self) -> usize {
        self.word_count
    }

    pub fn issue(&self) -> Result<Challenge, ChallengeError> {
        let mut entropy = [0u8; 32];
        OsRng.fill_bytes(&mut entropy);
        let mnemonic = Mnemonic::from_entropy(&entropy)
            .map_err(|e| ChallengeError::Generation(e.to_string()));
        entropy.zeroize();

        let phrase = mnemonic?
            .to_string()
            .split_whitespace()
            .take(self.word_count)
            .collect::<Vec<_>>()
            .join(" ");

        Ok(Challenge {
            phrase,
            issued_at: Utc::now(),
        })
    }
}
