//! Session controller
//!
//! Named transition functions over the reducer. Each call feeds one command
//! event through `reduce`, runs the resulting effects, and keeps feeding
//! completion events back until the session settles. The first error an
//! event chain reports is returned to the caller.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;

use crate::attempt::AttemptMode;
use crate::audio::{AudioCapture, AudioSample, SpectrumFrame};
use crate::challenge::{Challenge, ChallengeGenerator};
use crate::effects::EffectRunner;
use crate::identity::{Identity, RecoveryPhrase};
use crate::state_machine::{
    reduce, BoundIdentity, Effect, Event, EventLog, LogEntry, Session, SessionError, SessionState,
};
use crate::verifier::{VerificationResult, Verifier};

/// What a rendering layer needs to draw the session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub state: &'static str,
    pub busy: bool,
    pub mode: AttemptMode,
    pub phrase: Option<String>,
    pub identity_address: Option<String>,
    pub pending_sample_bytes: Option<usize>,
    pub log_len: usize,
    pub last_entry: Option<LogEntry>,
    pub last_result: Option<VerificationResult>,
}

impl SessionSnapshot {
    fn of(session: &Session) -> Self {
        Self {
            state: session.state().label(),
            busy: session.state().is_busy(),
            mode: session.mode(),
            phrase: session.challenge().map(|c| c.phrase().to_string()),
            identity_address: session.identity().map(|i| i.address.clone()),
            pending_sample_bytes: session.pending_sample().map(AudioSample::len),
            log_len: session.log().len(),
            last_entry: session.log().last().cloned(),
            last_result: session.last_result().cloned(),
        }
    }
}

pub struct SessionController {
    session: Session,
    runner: EffectRunner,
    snapshots: watch::Sender<SessionSnapshot>,
}

impl SessionController {
    /// Build a session and issue the first phrase.
    pub async fn new(
        capture: AudioCapture,
        verifier: Arc<dyn Verifier>,
        generator: ChallengeGenerator,
    ) -> Result<Self, SessionError> {
        let session = Session::default();
        let (snapshots, _) = watch::channel(SessionSnapshot::of(&session));

        let mut controller = Self {
            session,
            runner: EffectRunner::new(capture, verifier, generator),
            snapshots,
        };

        let mode = controller.session.mode();
        controller
            .run_effects(vec![Effect::IssueChallenge { mode }, Effect::EmitSnapshot])
            .await?;
        Ok(controller)
    }

    // -----------------
    // Transitions
    // -----------------

    pub async fn connect_identity(&mut self, identity: Identity) -> Result<(), SessionError> {
        self.dispatch(Event::ConnectIdentity { identity }).await
    }

    pub async fn disconnect_identity(&mut self) -> Result<(), SessionError> {
        self.dispatch(Event::DisconnectIdentity).await
    }

    /// Provision a wallet through the verifier, bind it, and switch to Enroll.
    /// Returns the seed phrase so the user can save it.
    pub async fn create_local_wallet(&mut self) -> Result<RecoveryPhrase, SessionError> {
        self.dispatch(Event::RequestWallet).await?;
        self.session
            .identity()
            .and_then(|identity| identity.recovery_phrase.clone())
            .ok_or_else(|| {
                SessionError::PreconditionViolation("wallet was not created".to_string())
            })
    }

    pub async fn switch_mode(&mut self, mode: AttemptMode) -> Result<(), SessionError> {
        self.dispatch(Event::SwitchMode(mode)).await
    }

    pub async fn toggle_mode(&mut self) -> Result<(), SessionError> {
        let next = self.session.mode().other();
        self.switch_mode(next).await
    }

    pub async fn regenerate_challenge(&mut self) -> Result<(), SessionError> {
        self.dispatch(Event::RegenerateChallenge).await
    }

    /// Acquire the microphone. Returns once the device is live or has failed.
    pub async fn start_recording(&mut self) -> Result<(), SessionError> {
        self.dispatch(Event::StartRecording).await
    }

    /// Release the microphone. Does nothing unless recording.
    pub async fn stop_recording(&mut self) -> Result<(), SessionError> {
        self.dispatch(Event::StopRecording).await
    }

    /// Sign, upload and interpret. Returns once the attempt is terminal.
    pub async fn submit(&mut self) -> Result<(), SessionError> {
        self.dispatch(Event::Submit).await
    }

    /// Release any held device and identity.
    pub async fn shutdown(&mut self) {
        self.runner.shutdown().await;
        log::info!("Session shut down");
    }

    // -----------------
    // Accessors
    // -----------------

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn state(&self) -> &SessionState {
        self.session.state()
    }

    pub fn mode(&self) -> AttemptMode {
        self.session.mode()
    }

    pub fn challenge(&self) -> Option<&Challenge> {
        self.session.challenge()
    }

    pub fn pending_sample(&self) -> Option<&AudioSample> {
        self.session.pending_sample()
    }

    pub fn identity(&self) -> Option<&BoundIdentity> {
        self.session.identity()
    }

    pub fn log(&self) -> &EventLog {
        self.session.log()
    }

    pub fn last_result(&self) -> Option<&VerificationResult> {
        self.session.last_result()
    }

    pub fn spectrum_snapshot(&self) -> Option<SpectrumFrame> {
        self.runner.spectrum()
    }

    /// When the current recording went live.
    pub fn recording_started_at(&self) -> Option<Instant> {
        match self.session.state() {
            SessionState::Recording { started_at, .. } => Some(*started_at),
            _ => None,
        }
    }

    pub fn recording_elapsed(&self) -> Option<Duration> {
        self.recording_started_at().map(|started| started.elapsed())
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot::of(&self.session)
    }

    // -----------------
    // Event loop
    // -----------------

    async fn dispatch(&mut self, event: Event) -> Result<(), SessionError> {
        let mut queue = VecDeque::from([event]);
        let mut first_error = None;

        while let Some(event) = queue.pop_front() {
            let from = self.session.state().label();
            let session = std::mem::take(&mut self.session);
            let (next, effects) = reduce(session, event);
            self.session = next;

            let to = self.session.state().label();
            if from != to {
                log::info!("State transition: {} -> {}", from, to);
            }

            self.execute(effects, &mut queue, &mut first_error).await;
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn run_effects(&mut self, effects: Vec<Effect>) -> Result<(), SessionError> {
        let mut queue = VecDeque::new();
        let mut first_error = None;
        self.execute(effects, &mut queue, &mut first_error).await;

        let result = match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        };
        for event in queue {
            self.dispatch(event).await?;
        }
        result
    }

    async fn execute(
        &mut self,
        effects: Vec<Effect>,
        queue: &mut VecDeque<Event>,
        first_error: &mut Option<SessionError>,
    ) {
        for effect in effects {
            match effect {
                Effect::Reject(err) => {
                    if first_error.is_none() {
                        *first_error = Some(err);
                    }
                }
                Effect::EmitSnapshot => self.publish(),
                other => {
                    if let Some(event) = self.runner.run(other).await {
                        queue.push_back(event);
                    }
                }
            }
        }
    }

    fn publish(&self) {
        // send_replace never fails, even with no subscribers
        self.snapshots.send_replace(SessionSnapshot::of(&self.session));
    }
}
