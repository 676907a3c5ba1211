//! Centralized constants for the voice call pipeline
//!
//! Single source of truth for tuning values and service defaults. The
//! interrupt ratio and silence window in particular are
//! environment-dependent knobs; the values here are starting points for
//! a typical laptop mic and should be re-tuned per deployment.

/// Service request timeouts (milliseconds)
pub mod timeouts {
    /// Transcription round-trip deadline
    pub const STT_TIMEOUT_MS: u64 = 5_000;

    /// Deadline for the first generated token; past this the turn falls
    /// back to a canned reply
    pub const CHAT_FIRST_TOKEN_TIMEOUT_MS: u64 = 10_000;

    /// Per-sentence synthesis deadline, tolerant of slow networks
    pub const TTS_TIMEOUT_MS: u64 = 30_000;

    /// Startup health probe deadline
    pub const HEALTH_PROBE_TIMEOUT_MS: u64 = 2_000;
}

/// Voice activity detection tuning
pub mod vad {
    /// Analysis tick length (milliseconds)
    pub const FRAME_MS: u32 = 30;

    /// Ambient noise sampling window at call start
    pub const CALIBRATION_MS: u64 = 800;

    /// Sustained silence that finalizes an utterance
    pub const SILENCE_THRESHOLD_MS: u64 = 300;

    /// How far above the noise baseline a frame must rise to count as
    /// speech (decibels)
    pub const SPEECH_MARGIN_DB: f32 = 6.0;

    /// Barge-in threshold as a multiple of expected playback leakage.
    /// Too low self-interrupts on the system's own voice, too high
    /// misses real interruptions.
    pub const INTERRUPT_RATIO: f32 = 8.0;

    /// Minimum sustained speech before the speech-active flag flips
    pub const MIN_SPEECH_MS: u64 = 150;
}

/// Audio capture and playback
pub mod audio {
    /// Capture sample rate (Hz)
    pub const SAMPLE_RATE: u32 = 16_000;

    /// Hard cap on one utterance; the recorder trims past this
    pub const MAX_UTTERANCE_SECS: u64 = 30;

    /// Chunks shorter than this skip transcription entirely
    pub const MIN_CHUNK_MS: u64 = 300;

    /// Fraction of the playback level expected to leak back into the
    /// microphone
    pub const LEAKAGE_FACTOR: f32 = 0.2;

    /// PCM16 encode scale
    pub const PCM16_SCALE: f32 = 32767.0;
}

/// Sentence assembly bounds
pub mod sentence {
    /// First sentence must reach this length before terminal
    /// punctuation is honored, to avoid emitting abbreviation fragments
    pub const MIN_FIRST_SENTENCE_CHARS: usize = 15;

    /// Force a flush past this length even without punctuation
    pub const MAX_BUFFER_CHARS: usize = 200;
}

/// Call loop policy
pub mod call {
    /// Consecutive failed turns that end the call
    pub const MAX_CONSECUTIVE_FAILURES: u32 = 3;

    /// User/assistant turn pairs kept in the generation context
    pub const CONTEXT_MAX_TURNS: usize = 16;

    /// Response-size cap handed to the generator
    pub const MAX_RESPONSE_CHARS: usize = 1_200;

    /// Sentinel for an uncapped session duration
    pub const UNLIMITED_DURATION_SECS: i64 = -1;
}

/// Backend service endpoints (defaults for local development)
pub mod endpoints {
    /// Combined STT/chat/TTS backend
    pub const BACKEND_DEFAULT: &str = "http://127.0.0.1:8000";

    pub const HEALTH_PATH: &str = "/health";
    pub const STT_PATH: &str = "/stt";
    pub const CHAT_STREAM_PATH: &str = "/chat_stream";
    pub const TTS_PATH: &str = "/tts";
}

/// Default per-unit service rates (USD) for turn cost estimates
pub mod pricing {
    pub const STT_PER_MINUTE_USD: f64 = 0.006;
    pub const LLM_PER_1K_CHARS_USD: f64 = 0.002;
    pub const TTS_PER_1K_CHARS_USD: f64 = 0.015;
}
