//! Adaptive energy voice activity detection
//!
//! Levels are linear RMS over one capture frame in `[0.0, 1.0]`. The
//! detector calibrates an ambient noise floor at session start, then
//! runs a small hysteresis machine over per-frame levels:
//!
//! ```text
//! Silence -> SpeechStart -> Speech -> SpeechEnd -> Silence
//!              (blip out)              (resume)
//! ```
//!
//! Speech must persist for a minimum duration before it is confirmed,
//! and silence must persist past the configured threshold before an
//! utterance is considered finished. Barge-in during playback uses a
//! separate, much higher bar: the level must exceed a multiple of the
//! louder of the noise floor and the expected playback leakage.

use parking_lot::Mutex;
use voice_call_config::VadSettings;

/// Floor for the calibrated baseline so margins stay meaningful in a
/// dead-silent room (about -80 dBFS)
const MIN_NOISE_FLOOR: f32 = 1e-4;

/// Frame-based detector configuration
///
/// Durations from [`VadSettings`] are converted to frame counts at
/// construction so the hot path only compares integers.
#[derive(Debug, Clone)]
pub struct VadConfig {
    /// Capture frame length in milliseconds
    pub frame_ms: u32,
    /// Frames sampled when calibrating the noise floor
    pub calibration_frames: u32,
    /// Frames of speech required before speech is confirmed
    pub min_speech_frames: u32,
    /// Frames of silence required before an utterance ends
    pub min_silence_frames: u32,
    /// Margin in dB above the noise floor that counts as speech
    pub speech_margin_db: f32,
    /// Barge-in multiplier over the interrupt reference level
    pub interrupt_ratio: f32,
}

impl VadConfig {
    pub fn from_settings(settings: &VadSettings) -> Self {
        let frame_ms = settings.frame_ms.max(1);
        Self {
            frame_ms,
            calibration_frames: frames_for_ms(settings.calibration_ms, frame_ms),
            min_speech_frames: frames_for_ms(settings.min_speech_ms, frame_ms),
            min_silence_frames: frames_for_ms(settings.silence_threshold_ms, frame_ms),
            speech_margin_db: settings.speech_margin_db,
            interrupt_ratio: settings.interrupt_ratio,
        }
    }
}

impl Default for VadConfig {
    fn default() -> Self {
        Self::from_settings(&VadSettings::default())
    }
}

fn frames_for_ms(ms: u64, frame_ms: u32) -> u32 {
    ms.div_ceil(frame_ms as u64).max(1) as u32
}

/// Detector phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadState {
    /// Sampling ambient noise
    Calibrating,
    /// No speech in progress
    Silence,
    /// Energy above threshold, not yet long enough to confirm
    SpeechStart,
    /// Confirmed speech
    Speech,
    /// Speech paused, counting silence toward utterance end
    SpeechEnd,
}

/// Outcome of processing one frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VadTick {
    /// Still sampling ambient noise
    Calibrating,
    /// Calibration window complete
    Calibrated { noise_floor: f32, peak: f32 },
    /// Nothing happening
    Silence,
    /// Energy crossed the speech threshold
    SpeechStart,
    /// Speech persisted past the minimum duration
    SpeechConfirmed,
    /// Confirmed speech continues
    SpeechContinue,
    /// Speech paused, silence accumulating
    SilenceAfterSpeech,
    /// Silence sustained past the threshold; utterance finished
    SpeechEnd,
}

#[derive(Debug)]
struct VadInner {
    state: VadState,
    noise_floor: f32,
    speech_threshold: f32,
    calibration_sum: f32,
    calibration_peak: f32,
    calibration_total: u32,
    calibration_left: u32,
    speech_frames: u32,
    silence_frames: u32,
    utterance_complete: bool,
}

impl VadInner {
    fn fresh() -> Self {
        Self {
            state: VadState::Silence,
            noise_floor: 0.0,
            speech_threshold: 0.0,
            calibration_sum: 0.0,
            calibration_peak: 0.0,
            calibration_total: 0,
            calibration_left: 0,
            speech_frames: 0,
            silence_frames: 0,
            utterance_complete: false,
        }
    }
}

/// Energy-based voice activity detector with ambient calibration
///
/// Interior mutability keeps the public surface `&self`; one lock is
/// taken per frame.
pub struct AdaptiveVad {
    config: VadConfig,
    inner: Mutex<VadInner>,
}

impl AdaptiveVad {
    pub fn new(config: VadConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(VadInner::fresh()),
        }
    }

    pub fn config(&self) -> &VadConfig {
        &self.config
    }

    /// Begin sampling ambient noise for `duration_ms`
    ///
    /// Frames fed through [`process_frame`](Self::process_frame) are
    /// averaged into the noise floor until the window elapses. Any
    /// utterance state in progress is discarded.
    pub fn calibrate(&self, duration_ms: u64) {
        let mut inner = self.inner.lock();
        *inner = VadInner::fresh();
        inner.state = VadState::Calibrating;
        inner.calibration_total = frames_for_ms(duration_ms, self.config.frame_ms);
        inner.calibration_left = inner.calibration_total;
    }

    pub fn is_calibrated(&self) -> bool {
        let inner = self.inner.lock();
        inner.state != VadState::Calibrating && inner.noise_floor > 0.0
    }

    /// Process one frame level and advance the state machine
    pub fn process_frame(&self, level: f32) -> VadTick {
        let mut inner = self.inner.lock();

        if inner.state == VadState::Calibrating {
            return self.calibration_step(&mut inner, level);
        }

        let threshold = self.effective_threshold(&inner);
        let is_speech = level > threshold;
        self.advance(&mut inner, is_speech)
    }

    fn calibration_step(&self, inner: &mut VadInner, level: f32) -> VadTick {
        inner.calibration_sum += level;
        inner.calibration_peak = inner.calibration_peak.max(level);
        inner.calibration_left -= 1;

        if inner.calibration_left > 0 {
            return VadTick::Calibrating;
        }

        let frames = inner.calibration_total.max(1);
        let mean = inner.calibration_sum / frames as f32;
        inner.noise_floor = mean.max(MIN_NOISE_FLOOR);
        inner.speech_threshold =
            inner.noise_floor * db_to_linear(self.config.speech_margin_db);
        inner.state = VadState::Silence;

        tracing::debug!(
            noise_floor = inner.noise_floor,
            peak = inner.calibration_peak,
            threshold = inner.speech_threshold,
            "noise calibration complete"
        );

        VadTick::Calibrated {
            noise_floor: inner.noise_floor,
            peak: inner.calibration_peak,
        }
    }

    fn effective_threshold(&self, inner: &VadInner) -> f32 {
        if inner.speech_threshold > 0.0 {
            inner.speech_threshold
        } else {
            // Never calibrated: fall back to the margin over the floor
            MIN_NOISE_FLOOR * db_to_linear(self.config.speech_margin_db)
        }
    }

    fn advance(&self, inner: &mut VadInner, is_speech: bool) -> VadTick {
        match (inner.state, is_speech) {
            (VadState::Silence, true) => {
                inner.state = VadState::SpeechStart;
                inner.speech_frames = 1;
                inner.silence_frames = 0;
                if self.config.min_speech_frames <= 1 {
                    inner.state = VadState::Speech;
                    VadTick::SpeechConfirmed
                } else {
                    VadTick::SpeechStart
                }
            }
            (VadState::Silence, false) => VadTick::Silence,

            (VadState::SpeechStart, true) => {
                inner.speech_frames += 1;
                if inner.speech_frames >= self.config.min_speech_frames {
                    inner.state = VadState::Speech;
                    VadTick::SpeechConfirmed
                } else {
                    VadTick::SpeechStart
                }
            }
            // Blip too short to count as speech
            (VadState::SpeechStart, false) => {
                inner.state = VadState::Silence;
                inner.speech_frames = 0;
                VadTick::Silence
            }

            (VadState::Speech, true) => {
                inner.speech_frames += 1;
                VadTick::SpeechContinue
            }
            (VadState::Speech, false) => {
                inner.state = VadState::SpeechEnd;
                inner.silence_frames = 1;
                VadTick::SilenceAfterSpeech
            }

            // Speaker resumed before the silence window elapsed
            (VadState::SpeechEnd, true) => {
                inner.state = VadState::Speech;
                inner.speech_frames += 1;
                inner.silence_frames = 0;
                VadTick::SpeechContinue
            }
            (VadState::SpeechEnd, false) => {
                inner.silence_frames += 1;
                if inner.silence_frames >= self.config.min_silence_frames {
                    inner.state = VadState::Silence;
                    inner.utterance_complete = true;
                    VadTick::SpeechEnd
                } else {
                    VadTick::SilenceAfterSpeech
                }
            }

            // process_frame routes calibrating frames elsewhere
            (VadState::Calibrating, _) => VadTick::Calibrating,
        }
    }

    /// Whether silence has been sustained past `threshold_ms` since the
    /// last confirmed speech
    ///
    /// Latches true once the utterance completes and stays true until
    /// [`reset`](Self::reset).
    pub fn has_speech_ended(&self, threshold_ms: u64) -> bool {
        let inner = self.inner.lock();
        if inner.utterance_complete {
            return true;
        }
        inner.state == VadState::SpeechEnd
            && inner.silence_frames >= frames_for_ms(threshold_ms, self.config.frame_ms)
    }

    /// Barge-in check used while the assistant is audible
    ///
    /// `expected_leakage` is the sink output level scaled by the echo
    /// leakage factor. The reference is the louder of that and the
    /// calibrated noise floor, so the bar rises while audio plays and
    /// falls back to ambient between clips.
    pub fn is_interrupt(&self, level: f32, expected_leakage: f32) -> bool {
        let inner = self.inner.lock();
        let floor = inner.noise_floor.max(MIN_NOISE_FLOOR);
        let reference = floor.max(expected_leakage);
        level > self.config.interrupt_ratio * reference
    }

    /// Clear utterance timing state between turns
    ///
    /// The calibrated noise floor survives; only speech and silence
    /// counters reset.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        if inner.state != VadState::Calibrating {
            inner.state = VadState::Silence;
        }
        inner.speech_frames = 0;
        inner.silence_frames = 0;
        inner.utterance_complete = false;
    }

    pub fn state(&self) -> VadState {
        self.inner.lock().state
    }

    pub fn noise_floor(&self) -> f32 {
        self.inner.lock().noise_floor
    }

    pub fn speech_threshold(&self) -> f32 {
        let inner = self.inner.lock();
        self.effective_threshold(&inner)
    }

    pub fn speech_frames(&self) -> u32 {
        self.inner.lock().speech_frames
    }

    pub fn silence_frames(&self) -> u32 {
        self.inner.lock().silence_frames
    }
}

fn db_to_linear(db: f32) -> f32 {
    10f32.powf(db / 20.0)
}
