//! Audio sample containers and level math

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Energy floor in dB reported for silent buffers
pub const SILENCE_DB: f32 = -96.0;

/// Supported capture sample rates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SampleRate {
    /// 8kHz - Telephony
    Hz8000,
    /// 16kHz - Standard speech recognition
    #[default]
    Hz16000,
    /// 22.05kHz - TTS output
    Hz22050,
    /// 44.1kHz - CD quality
    Hz44100,
    /// 48kHz - Professional audio
    Hz48000,
}

impl SampleRate {
    /// Get sample rate as u32
    pub fn as_u32(&self) -> u32 {
        match self {
            SampleRate::Hz8000 => 8000,
            SampleRate::Hz16000 => 16000,
            SampleRate::Hz22050 => 22050,
            SampleRate::Hz44100 => 44100,
            SampleRate::Hz48000 => 48000,
        }
    }

    /// Number of samples in a frame of the given length
    pub fn samples_for_ms(&self, ms: u32) -> usize {
        (self.as_u32() as usize * ms as usize) / 1000
    }

    /// Closest enum variant for a raw rate, if it matches exactly
    pub fn from_u32(rate: u32) -> Option<Self> {
        match rate {
            8000 => Some(SampleRate::Hz8000),
            16000 => Some(SampleRate::Hz16000),
            22050 => Some(SampleRate::Hz22050),
            44100 => Some(SampleRate::Hz44100),
            48000 => Some(SampleRate::Hz48000),
            _ => None,
        }
    }
}

/// Linear RMS of a mono sample buffer
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Convert a linear RMS level to decibels, floored at [`SILENCE_DB`]
pub fn rms_to_db(rms: f32) -> f32 {
    if rms > 0.0 {
        (20.0 * rms.log10()).max(SILENCE_DB)
    } else {
        SILENCE_DB
    }
}

/// One analysis tick of mono microphone audio (~20-50ms)
#[derive(Clone)]
pub struct AudioFrame {
    /// Mono samples normalized to [-1.0, 1.0]
    pub samples: Arc<[f32]>,
    /// Sample rate
    pub sample_rate: SampleRate,
    /// Frame sequence number for ordering
    pub sequence: u64,
    /// Timestamp when the frame was captured
    pub timestamp: Instant,
    /// Duration of this frame
    pub duration: Duration,
    /// Linear RMS level of this frame
    pub rms: f32,
}

impl std::fmt::Debug for AudioFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioFrame")
            .field("samples_len", &self.samples.len())
            .field("sample_rate", &self.sample_rate)
            .field("sequence", &self.sequence)
            .field("duration", &self.duration)
            .field("rms", &self.rms)
            .finish()
    }
}

impl AudioFrame {
    /// Create a frame from mono f32 samples
    pub fn new(samples: Vec<f32>, sample_rate: SampleRate, sequence: u64) -> Self {
        let duration =
            Duration::from_secs_f64(samples.len() as f64 / sample_rate.as_u32() as f64);
        let rms = rms(&samples);

        Self {
            samples: samples.into(),
            sample_rate,
            sequence,
            timestamp: Instant::now(),
            duration,
            rms,
        }
    }

    /// Create a frame with an explicit capture timestamp
    pub fn with_timestamp(
        samples: Vec<f32>,
        sample_rate: SampleRate,
        sequence: u64,
        timestamp: Instant,
    ) -> Self {
        let mut frame = Self::new(samples, sample_rate, sequence);
        frame.timestamp = timestamp;
        frame
    }

    /// Frame level in decibels
    pub fn energy_db(&self) -> f32 {
        rms_to_db(self.rms)
    }

    /// Get duration in milliseconds
    pub fn duration_ms(&self) -> u64 {
        self.duration.as_millis() as u64
    }
}

/// One finalized utterance captured by the recorder
#[derive(Clone)]
pub struct AudioChunk {
    /// Mono samples normalized to [-1.0, 1.0]
    pub samples: Arc<[f32]>,
    /// Sample rate
    pub sample_rate: SampleRate,
    /// Timestamp when capture of this chunk began
    pub started_at: Instant,
    /// Duration of the captured audio
    pub duration: Duration,
}

impl std::fmt::Debug for AudioChunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioChunk")
            .field("samples_len", &self.samples.len())
            .field("sample_rate", &self.sample_rate)
            .field("duration", &self.duration)
            .finish()
    }
}

impl AudioChunk {
    pub fn new(samples: Vec<f32>, sample_rate: SampleRate, started_at: Instant) -> Self {
        let duration =
            Duration::from_secs_f64(samples.len() as f64 / sample_rate.as_u32() as f64);
        Self {
            samples: samples.into(),
            sample_rate,
            started_at,
            duration,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Captured audio length in seconds
    pub fn duration_secs(&self) -> f32 {
        self.duration.as_secs_f32()
    }
}

/// Synthesized audio ready for playback
///
/// Sample rate is raw because decoded audio arrives at whatever rate the
/// synthesis service produced.
#[derive(Clone)]
pub struct AudioClip {
    /// Mono samples normalized to [-1.0, 1.0]
    pub samples: Arc<[f32]>,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

impl std::fmt::Debug for AudioClip {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioClip")
            .field("samples_len", &self.samples.len())
            .field("sample_rate", &self.sample_rate)
            .finish()
    }
}

impl AudioClip {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
        }
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Linear RMS over the whole clip
    pub fn rms(&self) -> f32 {
        rms(&self.samples)
    }

    /// Resample to a target rate
    ///
    /// Uses rubato's FFT resampler; falls back to linear interpolation for
    /// very short clips where the FFT window cannot be filled.
    pub fn resample(&self, target_rate: u32) -> Self {
        use rubato::{FftFixedIn, Resampler};

        if self.sample_rate == target_rate || self.samples.is_empty() {
            return self.clone();
        }

        if self.samples.len() < 64 {
            return self.resample_linear(target_rate);
        }

        let chunk_size = self.samples.len().min(1024);
        match FftFixedIn::<f64>::new(
            self.sample_rate as usize,
            target_rate as usize,
            chunk_size,
            2,
            1,
        ) {
            Ok(mut resampler) => {
                let samples_f64: Vec<f64> = self.samples.iter().map(|&s| s as f64).collect();
                match resampler.process(&[samples_f64], None) {
                    Ok(output) => {
                        let resampled: Vec<f32> = output[0].iter().map(|&s| s as f32).collect();
                        Self::new(resampled, target_rate)
                    },
                    Err(e) => {
                        tracing::warn!("rubato processing failed, using linear fallback: {}", e);
                        self.resample_linear(target_rate)
                    },
                }
            },
            Err(e) => {
                tracing::warn!("rubato init failed, using linear fallback: {}", e);
                self.resample_linear(target_rate)
            },
        }
    }

    fn resample_linear(&self, target_rate: u32) -> Self {
        let ratio = target_rate as f64 / self.sample_rate as f64;
        let new_len = (self.samples.len() as f64 * ratio) as usize;

        let mut resampled = Vec::with_capacity(new_len);
        for i in 0..new_len {
            let src_idx = i as f64 / ratio;
            let idx_floor = src_idx.floor() as usize;
            let idx_ceil = (idx_floor + 1).min(self.samples.len().saturating_sub(1));
            let frac = src_idx - idx_floor as f64;

            let sample = self.samples[idx_floor] * (1.0 - frac as f32)
                + self.samples[idx_ceil] * frac as f32;
            resampled.push(sample);
        }

        Self::new(resampled, target_rate)
    }
}

/// Buffer accumulating capture frames into one utterance
#[derive(Debug)]
pub struct AudioBuffer {
    samples: Vec<f32>,
    sample_rate: SampleRate,
    started_at: Option<Instant>,
    max_duration: Duration,
}

impl AudioBuffer {
    pub fn new(sample_rate: SampleRate, max_duration: Duration) -> Self {
        let max_samples =
            (sample_rate.as_u32() as f64 * max_duration.as_secs_f64()) as usize;
        Self {
            samples: Vec::with_capacity(max_samples),
            sample_rate,
            started_at: None,
            max_duration,
        }
    }

    /// Append one frame, trimming the oldest samples past the duration cap
    pub fn push(&mut self, frame: &AudioFrame) {
        if self.started_at.is_none() {
            self.started_at = Some(frame.timestamp);
        }
        self.samples.extend(frame.samples.iter());

        let max_samples =
            (self.sample_rate.as_u32() as f64 * self.max_duration.as_secs_f64()) as usize;
        if self.samples.len() > max_samples {
            let excess = self.samples.len() - max_samples;
            self.samples.drain(0..excess);
        }
    }

    /// Finalize the buffered audio into one chunk and reset
    pub fn take(&mut self) -> AudioChunk {
        let started_at = self.started_at.take().unwrap_or_else(Instant::now);
        let samples = std::mem::take(&mut self.samples);
        AudioChunk::new(samples, self.sample_rate, started_at)
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.started_at = None;
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate.as_u32() as f64)
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Check if the buffer has reached the duration cap
    pub fn is_full(&self) -> bool {
        self.duration() >= self.max_duration
    }
}
