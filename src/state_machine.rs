//! State machine for VoiceAuth sessions
//!
//! This module implements the attempt lifecycle using a single-writer pattern.
//! All state transitions go through the `reduce()` function, which returns
//! the next session and a list of effects to execute. Effects run elsewhere
//! and report back as completion events tagged with the attempt id.

use std::fmt;
use std::time::Instant;

use chrono::{DateTime, Local};
use thiserror::Error;
use uuid::Uuid;

use crate::attempt::{AttemptMode, AttemptRequest};
use crate::audio::{AudioSample, CaptureError};
use crate::challenge::{Challenge, ChallengeError};
use crate::identity::{Identity, IdentityError, IdentityOrigin, RecoveryPhrase, SignedIntent};
use crate::verifier::{VerificationResult, VerifyError};

const NO_IDENTITY: &str = "Wallet not connected.";
const NO_AUDIO: &str = "No recording to submit.";
const NO_CHALLENGE: &str = "No security phrase issued.";
const BUSY: &str = "An attempt is already in progress.";

/// Errors surfaced to callers of the session's transition functions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("precondition violation: {0}")]
    PreconditionViolation(String),
    #[error(transparent)]
    Challenge(#[from] ChallengeError),
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error(transparent)]
    Identity(#[from] IdentityError),
    #[error(transparent)]
    Verify(#[from] VerifyError),
}

/// Work between signing and the verifier's answer.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessingStage {
    /// The sample is held here so a rejected signature can give it back.
    Signing {
        mode: AttemptMode,
        phrase: String,
        sample: AudioSample,
    },
    Uploading {
        mode: AttemptMode,
    },
}

/// Authoritative attempt state.
///
/// `Arming` and `Stopping` cover the suspension while the device is acquired
/// or released; callers of the session only ever observe them in snapshots.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum SessionState {
    #[default]
    AwaitingIdentity,
    Idle,
    Arming {
        attempt_id: Uuid,
    },
    Recording {
        attempt_id: Uuid,
        started_at: Instant,
    },
    Stopping {
        attempt_id: Uuid,
    },
    Processing {
        attempt_id: Uuid,
        stage: ProcessingStage,
    },
    Succeeded {
        attempt_id: Uuid,
        result: VerificationResult,
    },
    Failed {
        attempt_id: Uuid,
        reason: String,
    },
}

impl SessionState {
    pub fn label(&self) -> &'static str {
        match self {
            SessionState::AwaitingIdentity => "AwaitingIdentity",
            SessionState::Idle => "Idle",
            SessionState::Arming { .. } => "Arming",
            SessionState::Recording { .. } => "Recording",
            SessionState::Stopping { .. } => "Stopping",
            SessionState::Processing { .. } => "Processing",
            SessionState::Succeeded { .. } => "Succeeded",
            SessionState::Failed { .. } => "Failed",
        }
    }

    /// True while an attempt holds the device or awaits the verifier.
    pub fn is_busy(&self) -> bool {
        self.in_flight_id().is_some()
    }

    /// Id of the attempt currently in flight, if any.
    pub fn in_flight_id(&self) -> Option<Uuid> {
        match self {
            SessionState::Arming { attempt_id }
            | SessionState::Recording { attempt_id, .. }
            | SessionState::Stopping { attempt_id }
            | SessionState::Processing { attempt_id, .. } => Some(*attempt_id),
            _ => None,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub at: DateTime<Local>,
    pub level: LogLevel,
    pub message: String,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.at.format("%H:%M:%S"), self.message)
    }
}

/// Append-only session log. Stored in causal order; displayed newest first.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    entries: Vec<LogEntry>,
}

impl EventLog {
    pub fn info(&mut self, message: impl Into<String>) {
        self.push(LogLevel::Info, message.into());
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.push(LogLevel::Error, message.into());
    }

    fn push(&mut self, level: LogLevel, message: String) {
        match level {
            LogLevel::Info => log::info!("{}", message),
            LogLevel::Error => log::warn!("{}", message),
        }
        self.entries.push(LogEntry {
            at: Local::now(),
            level,
            message,
        });
    }

    /// Insertion order
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &LogEntry> {
        self.entries.iter()
    }

    /// Most recent first
    pub fn recent(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter().rev()
    }

    /// Entries appended after the first `seen`.
    pub fn since(&self, seen: usize) -> &[LogEntry] {
        self.entries.get(seen..).unwrap_or(&[])
    }

    pub fn last(&self) -> Option<&LogEntry> {
        self.entries.last()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Issued challenges, one slot per mode.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChallengeSlots {
    enroll: Option<Challenge>,
    verify: Option<Challenge>,
}

impl ChallengeSlots {
    pub fn get(&self, mode: AttemptMode) -> Option<&Challenge> {
        match mode {
            AttemptMode::Enroll => self.enroll.as_ref(),
            AttemptMode::Verify => self.verify.as_ref(),
        }
    }

    fn slot_mut(&mut self, mode: AttemptMode) -> &mut Option<Challenge> {
        match mode {
            AttemptMode::Enroll => &mut self.enroll,
            AttemptMode::Verify => &mut self.verify,
        }
    }
}

/// The identity the session believes is installed in the binder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundIdentity {
    pub address: String,
    pub origin: IdentityOrigin,
    /// Present only for wallets provisioned during this session
    pub recovery_phrase: Option<RecoveryPhrase>,
}

/// Everything the reducer owns.
#[derive(Debug, Clone, Default)]
pub struct Session {
    state: SessionState,
    mode: AttemptMode,
    challenges: ChallengeSlots,
    pending_sample: Option<AudioSample>,
    identity: Option<BoundIdentity>,
    log: EventLog,
    last_result: Option<VerificationResult>,
}

impl Session {
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn mode(&self) -> AttemptMode {
        self.mode
    }

    /// Challenge for the current mode
    pub fn challenge(&self) -> Option<&Challenge> {
        self.challenges.get(self.mode)
    }

    pub fn challenges(&self) -> &ChallengeSlots {
        &self.challenges
    }

    pub fn pending_sample(&self) -> Option<&AudioSample> {
        self.pending_sample.as_ref()
    }

    pub fn identity(&self) -> Option<&BoundIdentity> {
        self.identity.as_ref()
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    pub fn last_result(&self) -> Option<&VerificationResult> {
        self.last_result.as_ref()
    }
}

/// Events that can trigger state transitions.
#[derive(Debug, Clone)]
pub enum Event {
    // Commands
    ConnectIdentity {
        identity: Identity,
    },
    DisconnectIdentity,
    /// Provision a wallet through the verifier
    RequestWallet,
    SwitchMode(AttemptMode),
    RegenerateChallenge,
    StartRecording,
    StopRecording,
    Submit,

    // Challenge events
    ChallengeIssued {
        mode: AttemptMode,
        challenge: Challenge,
    },
    ChallengeFailed {
        mode: AttemptMode,
        err: ChallengeError,
    },

    // Wallet events
    WalletCreated {
        identity: Identity,
        recovery_phrase: RecoveryPhrase,
    },
    WalletFailed {
        err: VerifyError,
    },

    // Audio events
    CaptureStarted {
        id: Uuid,
    },
    CaptureFailed {
        id: Uuid,
        err: CaptureError,
    },
    CaptureEnded {
        id: Uuid,
        sample: AudioSample,
    },
    CaptureEndFailed {
        id: Uuid,
        err: CaptureError,
    },

    // Signing events
    IntentSigned {
        id: Uuid,
        signed: SignedIntent,
    },
    SigningFailed {
        id: Uuid,
        err: IdentityError,
    },

    // Verifier events
    VerifierResponded {
        id: Uuid,
        result: VerificationResult,
    },
    VerifierFailed {
        id: Uuid,
        err: VerifyError,
    },
}

/// Effects to be executed after a state transition.
#[derive(Debug, Clone)]
pub enum Effect {
    IssueChallenge {
        mode: AttemptMode,
    },
    InstallIdentity(Identity),
    ReleaseIdentity,
    CreateWallet,
    BeginCapture {
        id: Uuid,
    },
    EndCapture {
        id: Uuid,
    },
    /// Drop a capture nobody is waiting for
    ReleaseCapture {
        id: Uuid,
    },
    SignIntent {
        id: Uuid,
        intent: &'static str,
    },
    Dispatch {
        id: Uuid,
        request: AttemptRequest,
    },
    /// Surface an error to whoever issued the command
    Reject(SessionError),
    /// Signal to publish a snapshot to subscribers
    EmitSnapshot,
}

/// Reducer function: (session, event) -> (next_session, effects)
///
/// Key rules:
/// - Completion events with a stale attempt id are ignored
/// - A rejected command leaves the state as it was and logs one error entry
/// - `StopRecording` outside `Recording` changes nothing and logs nothing
/// - Every accepted event ends with `EmitSnapshot`
pub fn reduce(session: Session, event: Event) -> (Session, Vec<Effect>) {
    use Effect::*;
    use Event::*;
    use SessionState::*;

    let mut s = session;
    let state = std::mem::take(&mut s.state);
    let current_id = state.in_flight_id();

    // Helper: check if event's ID is stale (doesn't match current attempt)
    let is_stale = |eid: Uuid| Some(eid) != current_id;

    match (state, event) {
        // -----------------
        // Identity
        // -----------------
        (state, ConnectIdentity { .. }) if state.is_busy() => reject(s, state, BUSY),
        (state, ConnectIdentity { identity }) => {
            if s.identity.is_some() {
                // A recording belongs to the wallet it was made under
                s.pending_sample = None;
            }
            s.log
                .info(format!("Wallet connected: {}...", short(identity.address())));
            s.identity = Some(BoundIdentity {
                address: identity.address().to_string(),
                origin: identity.origin(),
                recovery_phrase: None,
            });
            s.state = settle(state);
            (s, vec![InstallIdentity(identity), EmitSnapshot])
        }

        (state, DisconnectIdentity) if s.identity.is_none() => {
            s.state = state;
            (s, vec![])
        }
        (state, DisconnectIdentity) if state.is_busy() => reject(s, state, BUSY),
        (_, DisconnectIdentity) => {
            s.identity = None;
            s.pending_sample = None;
            s.state = AwaitingIdentity;
            s.log.info("Wallet disconnected.");
            (s, vec![ReleaseIdentity, EmitSnapshot])
        }

        (state, RequestWallet) if state.is_busy() => reject(s, state, BUSY),
        (state, RequestWallet) => {
            s.state = state;
            s.log.info("Requesting new wallet from backend...");
            (s, vec![CreateWallet, EmitSnapshot])
        }
        (state, WalletCreated { .. }) if state.is_busy() => reject(s, state, BUSY),
        (
            state,
            WalletCreated {
                identity,
                recovery_phrase,
            },
        ) => {
            if s.identity.is_some() {
                s.pending_sample = None;
            }
            s.log
                .info(format!("Wallet Created: {}...", short(identity.address())));
            s.identity = Some(BoundIdentity {
                address: identity.address().to_string(),
                origin: identity.origin(),
                recovery_phrase: Some(recovery_phrase),
            });
            s.state = settle(state);

            // A new wallet has nothing enrolled yet
            let mut effects = vec![InstallIdentity(identity)];
            effects.extend(enter_mode(&mut s, AttemptMode::Enroll));
            effects.push(EmitSnapshot);
            (s, effects)
        }
        (state, WalletFailed { err }) => {
            s.state = state;
            s.log.error(format!("Error creating wallet: {}", err));
            (s, vec![Reject(err.into()), EmitSnapshot])
        }

        // -----------------
        // Mode and challenge
        // -----------------
        (state, SwitchMode(mode)) if mode == s.mode => {
            s.state = state;
            (s, vec![])
        }
        (state, SwitchMode(_)) if state.is_busy() => reject(s, state, BUSY),
        (state, SwitchMode(mode)) => {
            s.state = if s.identity.is_some() {
                settle(state)
            } else {
                state
            };
            let mut effects = enter_mode(&mut s, mode);
            effects.push(EmitSnapshot);
            (s, effects)
        }

        (state, RegenerateChallenge) if state.is_busy() => reject(s, state, BUSY),
        (state, RegenerateChallenge) => {
            s.state = state;
            let mode = s.mode;
            (s, vec![IssueChallenge { mode }])
        }

        (state, ChallengeIssued { mode, challenge }) => {
            s.state = state;
            *s.challenges.slot_mut(mode) = Some(challenge);
            s.log.info("Generated new security phrase.");
            (s, vec![EmitSnapshot])
        }
        (state, ChallengeFailed { mode, err }) => {
            s.state = state;
            s.log
                .error(format!("Error generating {} phrase: {}", mode, err));
            (s, vec![Reject(err.into()), EmitSnapshot])
        }

        // -----------------
        // Idle / terminal states: start a new attempt
        // -----------------
        (state @ (Idle | Succeeded { .. } | Failed { .. } | AwaitingIdentity), StartRecording) => {
            if s.identity.is_none() {
                return reject(s, state, NO_IDENTITY);
            }

            if matches!(state, Succeeded { .. } | Failed { .. }) {
                s.log.info("Starting new attempt.");
            }

            // A new capture discards any sample that was never submitted
            s.pending_sample = None;

            let id = Uuid::new_v4();
            s.state = Arming { attempt_id: id };

            let mut effects = Vec::new();
            if s.challenge().is_none() {
                effects.push(IssueChallenge { mode: s.mode });
            }
            effects.push(BeginCapture { id });
            effects.push(EmitSnapshot);
            (s, effects)
        }
        (state, StartRecording) => reject(s, state, BUSY),

        // -----------------
        // Arming
        // -----------------
        (Arming { attempt_id }, CaptureStarted { id }) if attempt_id == id => {
            s.state = Recording {
                attempt_id,
                started_at: Instant::now(),
            };
            s.log.info("Recording started...");
            (s, vec![EmitSnapshot])
        }
        (Arming { attempt_id }, CaptureFailed { id, err }) if attempt_id == id => {
            s.state = Idle;
            s.log.error(format!("Error accessing microphone: {}", err));
            (s, vec![Reject(err.into()), EmitSnapshot])
        }

        // -----------------
        // Recording
        // -----------------
        (Recording { attempt_id, .. }, StopRecording) => {
            s.state = Stopping { attempt_id };
            (s, vec![EndCapture { id: attempt_id }, EmitSnapshot])
        }
        (state, StopRecording) => {
            s.state = state;
            (s, vec![])
        }

        // -----------------
        // Stopping
        // -----------------
        (Stopping { attempt_id }, CaptureEnded { id, sample }) if attempt_id == id => {
            s.state = Idle;
            s.pending_sample = Some(sample);
            s.log.info("Recording finished. Ready to submit.");
            (s, vec![EmitSnapshot])
        }
        (Stopping { attempt_id }, CaptureEndFailed { id, err }) if attempt_id == id => {
            s.state = Idle;
            s.log.error(format!("Recording failed: {}", err));
            (s, vec![Reject(err.into()), EmitSnapshot])
        }

        // -----------------
        // Submit
        // -----------------
        (state, Submit) if s.identity.is_none() => reject(s, state, NO_IDENTITY),
        (state, Submit) if state.is_busy() => reject(s, state, BUSY),
        (state, Submit) if s.pending_sample.is_none() => reject(s, state, NO_AUDIO),
        (state, Submit) if s.challenge().is_none() => reject(s, state, NO_CHALLENGE),
        (_, Submit) => {
            let mode = s.mode;
            let phrase = s
                .challenge()
                .map(|c| c.phrase().to_string())
                .unwrap_or_default();
            let Some(sample) = s.pending_sample.take() else {
                return reject(s, Idle, NO_AUDIO);
            };

            let id = Uuid::new_v4();
            s.state = Processing {
                attempt_id: id,
                stage: ProcessingStage::Signing {
                    mode,
                    phrase,
                    sample,
                },
            };
            s.log.info("Signing payload...");
            (
                s,
                vec![
                    SignIntent {
                        id,
                        intent: mode.intent_message(),
                    },
                    EmitSnapshot,
                ],
            )
        }

        // -----------------
        // Processing
        // -----------------
        (
            Processing {
                attempt_id,
                stage:
                    ProcessingStage::Signing {
                        mode,
                        phrase,
                        sample,
                    },
            },
            IntentSigned { id, signed },
        ) if attempt_id == id => {
            let request = AttemptRequest {
                mode,
                identity_address: signed.address,
                signature: signed.signature,
                intent_message: signed.message,
                phrase,
                audio: sample,
            };
            s.state = Processing {
                attempt_id,
                stage: ProcessingStage::Uploading { mode },
            };
            s.log.info("Signature generated. Uploading voice print...");
            (s, vec![Dispatch { id, request }, EmitSnapshot])
        }
        (
            Processing {
                attempt_id,
                stage: ProcessingStage::Signing { sample, .. },
            },
            SigningFailed { id, err },
        ) if attempt_id == id => {
            // Nothing was sent, so the recording is still usable
            s.state = Idle;
            s.pending_sample = Some(sample);
            s.log.error(format!("Signing failed: {}", err));
            (s, vec![Reject(err.into()), EmitSnapshot])
        }
        (
            Processing {
                attempt_id,
                stage: ProcessingStage::Uploading { mode },
            },
            VerifierResponded { id, result },
        ) if attempt_id == id => {
            s.log_outcome(mode, &result);
            // Enrollment only fails through an error
            let passed = mode == AttemptMode::Enroll || result.verified;
            s.state = if passed {
                Succeeded {
                    attempt_id,
                    result: result.clone(),
                }
            } else {
                Failed {
                    attempt_id,
                    reason: failure_reason(&result),
                }
            };
            s.last_result = Some(result);

            let mut effects = rotate_challenge(&mut s, mode);
            effects.push(EmitSnapshot);
            (s, effects)
        }
        (
            Processing {
                attempt_id,
                stage: ProcessingStage::Uploading { mode },
            },
            VerifierFailed { id, err },
        ) if attempt_id == id => {
            let detail = err.user_detail();
            s.log.error(format!("Server Error: {}", detail));

            // A malformed body is reported as a server error with a generic detail
            let reported = match err {
                VerifyError::MalformedResponse(_) => VerifyError::Server {
                    status: 200,
                    detail: detail.clone(),
                },
                other => other,
            };
            s.state = Failed {
                attempt_id,
                reason: detail,
            };
            let mut effects = vec![Reject(reported.into())];
            effects.extend(rotate_challenge(&mut s, mode));
            effects.push(EmitSnapshot);
            (s, effects)
        }

        // -----------------
        // Stale events
        // -----------------
        (state, CaptureStarted { id }) if is_stale(id) => {
            // Nobody is waiting for this stream
            s.state = state;
            (s, vec![ReleaseCapture { id }])
        }
        (state, CaptureFailed { id, .. })
        | (state, CaptureEnded { id, .. })
        | (state, CaptureEndFailed { id, .. })
        | (state, IntentSigned { id, .. })
        | (state, SigningFailed { id, .. })
        | (state, VerifierResponded { id, .. })
        | (state, VerifierFailed { id, .. })
            if is_stale(id) =>
        {
            log::debug!("Ignoring stale completion for attempt {}", id);
            s.state = state;
            (s, vec![])
        }

        // -----------------
        // Unhandled: no transition
        // -----------------
        (state, _) => {
            s.state = state;
            (s, vec![])
        }
    }
}

impl Session {
    fn log_outcome(&mut self, mode: AttemptMode, result: &VerificationResult) {
        match (mode, result.verified) {
            (AttemptMode::Enroll, _) => {
                self.log.info("Enrollment Successful! Voice print stored.");
            }
            (AttemptMode::Verify, true) => match result.score {
                Some(score) => self
                    .log
                    .info(format!("Verification SUCCESS! Score: {:.4}", score)),
                None => self.log.info("Verification SUCCESS!"),
            },
            (AttemptMode::Verify, false) => {
                let mut line = "Verification FAILED.".to_string();
                if let Some(message) = &result.message {
                    line.push(' ');
                    line.push_str(message);
                }
                if let Some(detail) = result.detail_line() {
                    line.push_str(" | ");
                    line.push_str(&detail);
                }
                self.log.error(line);
            }
        }
    }
}

/// Reject a command without changing state.
fn reject(mut s: Session, state: SessionState, reason: &str) -> (Session, Vec<Effect>) {
    s.state = state;
    s.log.error(format!("Error: {}", reason));
    (
        s,
        vec![
            Effect::Reject(SessionError::PreconditionViolation(reason.to_string())),
            Effect::EmitSnapshot,
        ],
    )
}

/// Where a non-busy session lands after an identity or mode change.
fn settle(state: SessionState) -> SessionState {
    match state {
        SessionState::AwaitingIdentity
        | SessionState::Succeeded { .. }
        | SessionState::Failed { .. } => SessionState::Idle,
        other => other,
    }
}

fn enter_mode(s: &mut Session, mode: AttemptMode) -> Vec<Effect> {
    if s.mode == mode {
        return vec![];
    }
    s.mode = mode;
    s.log.info(format!("Switched to {} mode.", mode));
    if s.challenges.get(mode).is_none() {
        vec![Effect::IssueChallenge { mode }]
    } else {
        vec![]
    }
}

/// A phrase is good for one attempt.
fn rotate_challenge(s: &mut Session, mode: AttemptMode) -> Vec<Effect> {
    *s.challenges.slot_mut(mode) = None;
    vec![Effect::IssueChallenge { mode }]
}

fn failure_reason(result: &VerificationResult) -> String {
    result
        .message
        .clone()
        .unwrap_or_else(|| format!("{} rejected", result.mode))
}

fn short(address: &str) -> &str {
    let end = address
        .char_indices()
        .nth(8)
        .map(|(i, _)| i)
        .unwrap_or(address.len());
    &address[..end]
}
