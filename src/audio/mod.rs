//! Audio capture module for VoiceAuth
//!
//! Handles microphone acquisition and in-memory WAV encoding.
//! Uses CPAL for capture and hound for WAV encoding.

pub mod recorder;
pub mod spectrum;

pub use recorder::{
    encode_wav, AudioCapture, AudioSample, CaptureError, CaptureFormat, CaptureHandle, CpalInput,
    InputDevice, LiveStream, SampleSink, SAMPLE_MIME_TYPE,
};
pub use spectrum::{SpectrumFrame, SpectrumTap, BIN_COUNT};
