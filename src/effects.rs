//! Effect runner for VoiceAuth
//!
//! Executes effects produced by the state machine and turns each outcome into
//! a completion event. Owns every side-effecting collaborator: the capture
//! device, the identity binder, the verifier client and the phrase generator.

use std::sync::Arc;

use uuid::Uuid;

use crate::audio::{AudioCapture, CaptureError, CaptureHandle, SpectrumFrame};
use crate::challenge::ChallengeGenerator;
use crate::identity::{Identity, IdentityBinder};
use crate::state_machine::{Effect, Event};
use crate::verifier::Verifier;

/// The capture currently holding the device, keyed by attempt id.
struct ActiveCapture {
    attempt_id: Uuid,
    handle: CaptureHandle,
}

pub struct EffectRunner {
    capture: AudioCapture,
    active: Option<ActiveCapture>,
    binder: IdentityBinder,
    verifier: Arc<dyn Verifier>,
    generator: ChallengeGenerator,
}

impl EffectRunner {
    pub fn new(
        capture: AudioCapture,
        verifier: Arc<dyn Verifier>,
        generator: ChallengeGenerator,
    ) -> Self {
        Self {
            capture,
            active: None,
            binder: IdentityBinder::new(),
            verifier,
            generator,
        }
    }

    /// Run one effect. Returns the completion event, if the effect has one.
    ///
    /// `Reject` and `EmitSnapshot` belong to the controller and are ignored here.
    pub async fn run(&mut self, effect: Effect) -> Option<Event> {
        match effect {
            Effect::IssueChallenge { mode } => Some(match self.generator.issue() {
                Ok(challenge) => Event::ChallengeIssued { mode, challenge },
                Err(err) => Event::ChallengeFailed { mode, err },
            }),

            Effect::InstallIdentity(identity) => {
                self.binder.bind(identity);
                None
            }

            Effect::ReleaseIdentity => {
                self.binder.unbind();
                None
            }

            Effect::CreateWallet => Some(match self.verifier.create_wallet().await {
                Ok(wallet) => Event::WalletCreated {
                    identity: Identity::local(wallet.keypair),
                    recovery_phrase: wallet.mnemonic,
                },
                Err(err) => Event::WalletFailed { err },
            }),

            Effect::BeginCapture { id } => {
                // Only one capture may hold the device
                self.release_active().await;

                Some(match self.capture.begin().await {
                    Ok(handle) => {
                        log::debug!("Attempt {} owns capture {}", id, handle.id());
                        self.active = Some(ActiveCapture {
                            attempt_id: id,
                            handle,
                        });
                        Event::CaptureStarted { id }
                    }
                    Err(err) => {
                        log::error!("Failed to start capture for attempt {}: {}", id, err);
                        Event::CaptureFailed { id, err }
                    }
                })
            }

            Effect::EndCapture { id } => {
                let Some(active) = self.take_active(id) else {
                    log::warn!("EndCapture for attempt {} with no active capture", id);
                    return Some(Event::CaptureEndFailed {
                        id,
                        err: CaptureError::NoData,
                    });
                };

                Some(match self.capture.end(active.handle).await {
                    Ok(sample) => Event::CaptureEnded { id, sample },
                    Err(err) => Event::CaptureEndFailed { id, err },
                })
            }

            Effect::ReleaseCapture { id } => {
                if let Some(active) = self.take_active(id) {
                    log::info!("Releasing orphaned capture for attempt {}", id);
                    let _ = self.capture.end(active.handle).await;
                }
                None
            }

            Effect::SignIntent { id, intent } => Some(match self.binder.sign(intent).await {
                Ok(signed) => Event::IntentSigned { id, signed },
                Err(err) => Event::SigningFailed { id, err },
            }),

            Effect::Dispatch { id, request } => Some(match self.verifier.submit(request).await {
                Ok(result) => Event::VerifierResponded { id, result },
                Err(err) => Event::VerifierFailed { id, err },
            }),

            Effect::Reject(_) | Effect::EmitSnapshot => None,
        }
    }

    /// Live frequency snapshot while a capture is active.
    pub fn spectrum(&self) -> Option<SpectrumFrame> {
        self.active
            .as_ref()
            .map(|active| active.handle.spectrum().snapshot())
    }

    /// Release the device and forget the identity.
    pub async fn shutdown(&mut self) {
        self.release_active().await;
        self.binder.unbind();
    }

    fn take_active(&mut self, id: Uuid) -> Option<ActiveCapture> {
        match &self.active {
            Some(active) if active.attempt_id == id => self.active.take(),
            _ => None,
        }
    }

    async fn release_active(&mut self) {
        if let Some(active) = self.active.take() {
            log::warn!(
                "Releasing capture left over from attempt {}",
                active.attempt_id
            );
            let _ = self.capture.end(active.handle).await;
        }
    }
}
