//! Scoped microphone capture
//!
//! `AudioCapture::begin` opens the input device on a dedicated audio thread
//! and returns a `CaptureHandle`. `AudioCapture::end` tells that thread to
//! drop the stream, waits for it to confirm the device is released, then
//! encodes whatever was captured as an in-memory 16-bit WAV. Dropping a handle
//! without ending it releases the device as well, so no exit path leaks it.

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::Sample;
use hound::{WavSpec, WavWriter};
use thiserror::Error;
use tokio::sync::oneshot;
use uuid::Uuid;

use super::spectrum::SpectrumTap;

/// MIME type of every sample produced here
pub const SAMPLE_MIME_TYPE: &str = "audio/wav";

/// Errors that can occur during capture.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    #[error("audio input device unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("no audio was captured")]
    NoData,
    #[error("the audio input device is already in use by this session")]
    Busy,
    #[error("failed to encode audio sample: {0}")]
    Encoding(String),
}

/// A finished recording, consumed once by submission.
#[derive(Clone, PartialEq, Eq)]
pub struct AudioSample {
    bytes: Vec<u8>,
    mime_type: String,
}

impl AudioSample {
    pub fn new(bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes,
            mime_type: mime_type.into(),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

impl std::fmt::Debug for AudioSample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioSample")
            .field("len", &self.bytes.len())
            .field("mime_type", &self.mime_type)
            .finish()
    }
}

/// Format the device actually delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

/// Marker for a live device stream. Dropping it must release the device.
pub trait LiveStream {}

impl LiveStream for cpal::Stream {}

/// Destination for samples delivered by the device callback.
#[derive(Clone, Default)]
pub struct SampleSink {
    samples: Arc<Mutex<Vec<i16>>>,
    spectrum: SpectrumTap,
}

impl SampleSink {
    pub fn push(&self, data: &[i16]) {
        if let Ok(mut samples) = self.samples.lock() {
            samples.extend_from_slice(data);
        }
        self.spectrum.push(data);
    }

    fn take(&self) -> Vec<i16> {
        match self.samples.lock() {
            Ok(mut samples) => std::mem::take(&mut *samples),
            Err(_) => Vec::new(),
        }
    }
}

/// A microphone that can be opened on the capture thread.
///
/// `open` runs on that thread and the returned stream never leaves it, so
/// implementations need not produce `Send` streams.
pub trait InputDevice: Send + Sync + 'static {
    fn open(&self, sink: SampleSink) -> Result<(Box<dyn LiveStream>, CaptureFormat), CaptureError>;
}

/// Handle to an active capture.
/// When dropped, the capture thread drops its stream and the device is released.
pub struct CaptureHandle {
    id: Uuid,
    format: CaptureFormat,
    sink: SampleSink,
    stop_tx: Option<mpsc::Sender<()>>,
    released_rx: Option<oneshot::Receiver<()>>,
    started_at: Instant,
}

impl std::fmt::Debug for CaptureHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureHandle")
            .field("id", &self.id)
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}

impl CaptureHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn format(&self) -> CaptureFormat {
        self.format
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Read handle for the visualizer
    pub fn spectrum(&self) -> SpectrumTap {
        self.sink.spectrum.clone()
    }

    async fn finish(mut self) -> Vec<i16> {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(released_rx) = self.released_rx.take() {
            // Err means the thread is already gone, which also means released
            let _ = released_rx.await;
        }
        log::debug!("Capture {} released after {:?}", self.id, self.elapsed());
        self.sink.take()
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            log::debug!("Capture {} dropped without end, releasing device", self.id);
            let _ = stop_tx.send(());
        }
    }
}

/// Clears the busy flag when the capture thread lets go of the device.
struct DeviceLease(Arc<AtomicBool>);

impl Drop for DeviceLease {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Scoped acquisition over an `InputDevice`. At most one capture is active at a time.
#[derive(Clone)]
pub struct AudioCapture {
    device: Arc<dyn InputDevice>,
    busy: Arc<AtomicBool>,
}

impl AudioCapture {
    pub fn new(device: Arc<dyn InputDevice>) -> Self {
        Self {
            device,
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Capture from the system default input device.
    pub fn default_input() -> Self {
        Self::new(Arc::new(CpalInput))
    }

    pub fn is_active(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Acquire the device and start capturing.
    pub async fn begin(&self) -> Result<CaptureHandle, CaptureError> {
        if self.busy.swap(true, Ordering::SeqCst) {
            return Err(CaptureError::Busy);
        }
        let lease = DeviceLease(self.busy.clone());

        let id = Uuid::new_v4();
        let sink = SampleSink::default();
        let (ready_tx, ready_rx) = oneshot::channel::<Result<CaptureFormat, CaptureError>>();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let (released_tx, released_rx) = oneshot::channel::<()>();

        let device = self.device.clone();
        let thread_sink = sink.clone();
        std::thread::Builder::new()
            .name(format!("audio-capture-{}", id))
            .spawn(move || match device.open(thread_sink) {
                Ok((stream, format)) => {
                    if ready_tx.send(Ok(format)).is_ok() {
                        // Returns on stop or when the handle is dropped
                        let _ = stop_rx.recv();
                    }
                    drop(stream);
                    drop(lease);
                    let _ = released_tx.send(());
                }
                Err(err) => {
                    drop(lease);
                    let _ = ready_tx.send(Err(err));
                }
            })
            .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?;

        let format = ready_rx
            .await
            .map_err(|_| CaptureError::DeviceUnavailable("capture thread exited".to_string()))??;

        log::info!(
            "Capture {} started: {} Hz, {} channels",
            id,
            format.sample_rate,
            format.channels
        );

        Ok(CaptureHandle {
            id,
            format,
            sink,
            stop_tx: Some(stop_tx),
            released_rx: Some(released_rx),
            started_at: Instant::now(),
        })
    }

    /// Release the device and package what was captured.
    pub async fn end(&self, handle: CaptureHandle) -> Result<AudioSample, CaptureError> {
        let format = handle.format;
        let samples = handle.finish().await;
        if samples.is_empty() {
            return Err(CaptureError::NoData);
        }
        let bytes = encode_wav(&samples, format)?;
        log::info!(
            "Capture ended: {} samples, {} bytes WAV",
            samples.len(),
            bytes.len()
        );
        Ok(AudioSample::new(bytes, SAMPLE_MIME_TYPE))
    }
}

/// Encode interleaved 16-bit samples as a WAV file in memory.
pub fn encode_wav(samples: &[i16], format: CaptureFormat) -> Result<Vec<u8>, CaptureError> {
    let spec = WavSpec {
        channels: format.channels,
        sample_rate: format.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut bytes = Vec::new();
    let mut writer = WavWriter::new(Cursor::new(&mut bytes), spec)
        .map_err(|e| CaptureError::Encoding(e.to_string()))?;
    for &sample in samples {
        writer
            .write_sample(sample)
            .map_err(|e| CaptureError::Encoding(e.to_string()))?;
    }
    writer
        .finalize()
        .map_err(|e| CaptureError::Encoding(e.to_string()))?;

    Ok(bytes)
}

/// The system default input device via CPAL.
pub struct CpalInput;

impl InputDevice for CpalInput {
    fn open(&self, sink: SampleSink) -> Result<(Box<dyn LiveStream>, CaptureFormat), CaptureError> {
        let host = cpal::default_host();

        let device = host.default_input_device().ok_or_else(|| {
            CaptureError::DeviceUnavailable("no audio input device found".to_string())
        })?;

        log::info!("Using audio input device: {:?}", device.name());

        let supported_config = device
            .default_input_config()
            .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?;

        let sample_format = supported_config.sample_format();
        let config: cpal::StreamConfig = supported_config.into();
        let format = CaptureFormat {
            sample_rate: config.sample_rate.0,
            channels: config.channels,
        };

        let stream = match sample_format {
            cpal::SampleFormat::I16 => build_stream::<i16>(&device, &config, sink)?,
            cpal::SampleFormat::U16 => build_stream::<u16>(&device, &config, sink)?,
            cpal::SampleFormat::F32 => build_stream::<f32>(&device, &config, sink)?,
            other => {
                return Err(CaptureError::DeviceUnavailable(format!(
                    "unsupported sample format {:?}",
                    other
                )))
            }
        };

        stream
            .play()
            .map_err(|e| CaptureError::DeviceUnavailable(format!("failed to start stream: {}", e)))?;

        Ok((Box::new(stream), format))
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sink: SampleSink,
) -> Result<cpal::Stream, CaptureError>
where
    T: cpal::Sample + cpal::SizedSample + Send + 'static,
{
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                let converted: Vec<i16> = data.iter().map(|&s| sample_to_i16(s)).collect();
                sink.push(&converted);
            },
            |err| log::error!("Audio stream error: {}", err),
            None,
        )
        .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))
}

/// Convert any sample type to i16 for WAV writing.
fn sample_to_i16<T: cpal::Sample>(sample: T) -> i16 {
    let f32_sample: f32 = sample.to_float_sample().to_sample();
    let clamped = f32_sample.clamp(-1.0, 1.0);
    (clamped * i16::MAX as f32) as i16
}
