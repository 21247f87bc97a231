//! Frequency snapshot for the live-input visualizer
//!
//! Keeps the most recent `FFT_SIZE` samples from the capture callback and
//! turns them into `BIN_COUNT` byte magnitudes on request, using the same
//! scaling a browser analyser node applies (Blackman window, temporal
//! smoothing, -100..-30 dB mapped onto 0..255). Readers are advisory observers
//! and never affect what gets recorded.

use std::collections::VecDeque;
use std::f32::consts::PI;
use std::sync::{Arc, Mutex};

/// Analysis window length in samples
pub const FFT_SIZE: usize = 64;

/// Number of frequency bins per snapshot
pub const BIN_COUNT: usize = FFT_SIZE / 2;

/// Weight given to the previous frame (0.8 = 80% previous, 20% new)
const SMOOTHING: f32 = 0.8;

const MIN_DECIBELS: f32 = -100.0;
const MAX_DECIBELS: f32 = -30.0;

/// Byte-scaled magnitudes, lowest frequency first
pub type SpectrumFrame = [u8; BIN_COUNT];

/// Sliding sample window plus smoothing state
pub struct SpectrumAnalyser {
    samples: VecDeque<f32>,
    smoothed: [f32; BIN_COUNT],
}

impl SpectrumAnalyser {
    pub fn new() -> Self {
        Self {
            samples: VecDeque::with_capacity(FFT_SIZE),
            smoothed: [0.0; BIN_COUNT],
        }
    }

    /// Add samples, keeping only the newest `FFT_SIZE`.
    pub fn push_samples(&mut self, samples: &[i16]) {
        let len = samples.len();

        if len >= FFT_SIZE {
            self.samples.clear();
            self.samples
                .extend(samples[len - FFT_SIZE..].iter().map(|&s| normalize(s)));
            return;
        }

        let to_remove = (self.samples.len() + len).saturating_sub(FFT_SIZE);
        if to_remove > 0 {
            self.samples.drain(0..to_remove);
        }
        self.samples.extend(samples.iter().map(|&s| normalize(s)));
    }

    /// Compute the next smoothed frame.
    ///
    /// Mutates smoothing state, so consecutive calls converge on the current
    /// input instead of jumping.
    pub fn byte_frequency_data(&mut self) -> SpectrumFrame {
        let mut frame = [0u8; BIN_COUNT];

        // Zero-pad until the window fills up
        let mut windowed = [0.0f32; FFT_SIZE];
        let offset = FFT_SIZE - self.samples.len();
        for (i, &sample) in self.samples.iter().enumerate() {
            let n = offset + i;
            windowed[n] = sample * blackman(n);
        }

        for (k, out) in frame.iter_mut().enumerate() {
            let (mut re, mut im) = (0.0f32, 0.0f32);
            for (n, &x) in windowed.iter().enumerate() {
                let angle = 2.0 * PI * (k * n) as f32 / FFT_SIZE as f32;
                re += x * angle.cos();
                im -= x * angle.sin();
            }
            let magnitude = (re * re + im * im).sqrt() / FFT_SIZE as f32;

            self.smoothed[k] = SMOOTHING * self.smoothed[k] + (1.0 - SMOOTHING) * magnitude;
            *out = to_byte(self.smoothed[k]);
        }

        frame
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.smoothed = [0.0; BIN_COUNT];
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.samples.len()
    }
}

impl Default for SpectrumAnalyser {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared read handle onto the analyser owned by a capture.
#[derive(Clone, Default)]
pub struct SpectrumTap {
    inner: Arc<Mutex<SpectrumAnalyser>>,
}

impl SpectrumTap {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&self, samples: &[i16]) {
        if let Ok(mut analyser) = self.inner.lock() {
            analyser.push_samples(samples);
        }
    }

    /// Current frame, or silence if the analyser is unavailable.
    pub fn snapshot(&self) -> SpectrumFrame {
        match self.inner.lock() {
            Ok(mut analyser) => analyser.byte_frequency_data(),
            Err(_) => [0u8; BIN_COUNT],
        }
    }
}

fn normalize(sample: i16) -> f32 {
    sample as f32 / i16::MAX as f32
}

fn blackman(n: usize) -> f32 {
    let a = 0.16f32;
    let x = 2.0 * PI * n as f32 / FFT_SIZE as f32;
    (1.0 - a) / 2.0 - 0.5 * x.cos() + (a / 2.0) * (2.0 * x).cos()
}

fn to_byte(magnitude: f32) -> u8 {
    if magnitude <= 0.0 {
        return 0;
    }
    let db = 20.0 * magnitude.log10();
    let scaled = 255.0 * (db - MIN_DECIBELS) / (MAX_DECIBELS - MIN_DECIBELS);
    scaled.clamp(0.0, 255.0) as u8
}
