//! Attempt modes and the request tuple sent to the verifier.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::audio::AudioSample;

/// Signed literal for enrollment.
pub const ENROLL_INTENT: &str = "VoiceAuth Enroll";

/// Signed literal for verification.
pub const VERIFY_INTENT: &str = "VoiceAuth Verify";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptMode {
    Enroll,
    #[default]
    Verify,
}

impl AttemptMode {
    /// The fixed message signed for this mode. Never the challenge phrase.
    pub fn intent_message(&self) -> &'static str {
        match self {
            AttemptMode::Enroll => ENROLL_INTENT,
            AttemptMode::Verify => VERIFY_INTENT,
        }
    }

    /// Verifier endpoint path
    pub fn endpoint(&self) -> &'static str {
        match self {
            AttemptMode::Enroll => "/enroll",
            AttemptMode::Verify => "/verify",
        }
    }

    pub fn other(&self) -> Self {
        match self {
            AttemptMode::Enroll => AttemptMode::Verify,
            AttemptMode::Verify => AttemptMode::Enroll,
        }
    }
}

impl fmt::Display for AttemptMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptMode::Enroll => write!(f, "Enroll"),
            AttemptMode::Verify => write!(f, "Verify"),
        }
    }
}

/// Evidence for one attempt.
///
/// `identity_address` is the key that produced `signature` over
/// `intent_message`; the binder checks this before the request is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptRequest {
    pub mode: AttemptMode,
    pub identity_address: String,
    /// Base58 encoded
    pub signature: String,
    pub intent_message: String,
    pub phrase: String,
    pub audio: AudioSample,
}
