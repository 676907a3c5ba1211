//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use voice_call_core::{CallMode, CostModel, SampleRate};

use crate::constants::{audio, call, endpoints, pricing, sentence, timeouts, vad};
use crate::ConfigError;

/// Runtime environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeEnvironment {
    /// Development mode - relaxed validation, warnings only
    #[default]
    Development,
    /// Staging mode - stricter validation
    Staging,
    /// Production mode - all validations enforced
    Production,
}

impl RuntimeEnvironment {
    /// Check if this is a production environment
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    /// Check if strict validation should be applied
    pub fn is_strict(&self) -> bool {
        matches!(self, Self::Production | Self::Staging)
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Runtime environment (development, staging, production)
    #[serde(default)]
    pub environment: RuntimeEnvironment,

    /// Backend service endpoints and timeouts
    #[serde(default)]
    pub services: ServiceSettings,

    /// Call loop policy
    #[serde(default)]
    pub call: CallSettings,

    /// Voice activity detection tuning
    #[serde(default)]
    pub vad: VadSettings,

    /// Capture and playback parameters
    #[serde(default)]
    pub audio: AudioSettings,

    /// Per-unit service rates for turn cost estimates
    #[serde(default)]
    pub cost: CostSettings,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Backend service endpoints and per-request timeouts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSettings {
    /// Base URL of the combined STT/chat/TTS backend
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Chat model identifier forwarded to the generation endpoint
    #[serde(default = "default_model")]
    pub model: String,

    /// Transcription language hint
    #[serde(default = "default_language")]
    pub language: String,

    /// Synthesis voice identifier, service default when unset
    #[serde(default)]
    pub voice: Option<String>,

    /// Spoken when generation fails before the first token
    #[serde(default = "default_fallback_reply")]
    pub fallback_reply: String,

    /// Transcription deadline in milliseconds
    #[serde(default = "default_stt_timeout_ms")]
    pub stt_timeout_ms: u64,

    /// First-token deadline in milliseconds
    #[serde(default = "default_chat_first_token_timeout_ms")]
    pub chat_first_token_timeout_ms: u64,

    /// Per-sentence synthesis deadline in milliseconds
    #[serde(default = "default_tts_timeout_ms")]
    pub tts_timeout_ms: u64,
}

fn default_base_url() -> String {
    endpoints::BACKEND_DEFAULT.to_string()
}
fn default_model() -> String {
    "local".to_string()
}
fn default_language() -> String {
    "en".to_string()
}
fn default_fallback_reply() -> String {
    "Sorry, I could not reach the assistant just now. Could you say that again?".to_string()
}
fn default_stt_timeout_ms() -> u64 {
    timeouts::STT_TIMEOUT_MS
}
fn default_chat_first_token_timeout_ms() -> u64 {
    timeouts::CHAT_FIRST_TOKEN_TIMEOUT_MS
}
fn default_tts_timeout_ms() -> u64 {
    timeouts::TTS_TIMEOUT_MS
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            language: default_language(),
            voice: None,
            fallback_reply: default_fallback_reply(),
            stt_timeout_ms: default_stt_timeout_ms(),
            chat_first_token_timeout_ms: default_chat_first_token_timeout_ms(),
            tts_timeout_ms: default_tts_timeout_ms(),
        }
    }
}

/// Call loop policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallSettings {
    /// How utterance boundaries are decided
    #[serde(default)]
    pub mode: CallMode,

    /// Session cap in seconds; -1 means unlimited
    #[serde(default = "default_max_duration_secs")]
    pub max_duration_secs: i64,

    /// Consecutive failed turns that end the call
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,

    /// Response-size cap handed to the generator
    #[serde(default = "default_max_response_chars")]
    pub max_response_chars: usize,

    /// User/assistant turn pairs kept in the generation context
    #[serde(default = "default_context_max_turns")]
    pub context_max_turns: usize,

    /// Optional system message prepended to the context
    #[serde(default)]
    pub system_prompt: Option<String>,

    /// Minimum first-sentence length before punctuation is honored
    #[serde(default = "default_min_first_sentence_chars")]
    pub min_first_sentence_chars: usize,

    /// Sentence buffer length that forces a flush
    #[serde(default = "default_max_sentence_buffer_chars")]
    pub max_sentence_buffer_chars: usize,
}

fn default_max_duration_secs() -> i64 {
    call::UNLIMITED_DURATION_SECS
}
fn default_max_consecutive_failures() -> u32 {
    call::MAX_CONSECUTIVE_FAILURES
}
fn default_max_response_chars() -> usize {
    call::MAX_RESPONSE_CHARS
}
fn default_context_max_turns() -> usize {
    call::CONTEXT_MAX_TURNS
}
fn default_min_first_sentence_chars() -> usize {
    sentence::MIN_FIRST_SENTENCE_CHARS
}
fn default_max_sentence_buffer_chars() -> usize {
    sentence::MAX_BUFFER_CHARS
}

impl Default for CallSettings {
    fn default() -> Self {
        Self {
            mode: CallMode::default(),
            max_duration_secs: default_max_duration_secs(),
            max_consecutive_failures: default_max_consecutive_failures(),
            max_response_chars: default_max_response_chars(),
            context_max_turns: default_context_max_turns(),
            system_prompt: None,
            min_first_sentence_chars: default_min_first_sentence_chars(),
            max_sentence_buffer_chars: default_max_sentence_buffer_chars(),
        }
    }
}

/// Voice activity detection tuning
///
/// The interrupt ratio and silence window are hardware-dependent; these
/// defaults fit a typical laptop mic and speakers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VadSettings {
    /// Analysis tick length in milliseconds
    #[serde(default = "default_frame_ms")]
    pub frame_ms: u32,

    /// Ambient noise sampling window at call start, milliseconds
    #[serde(default = "default_calibration_ms")]
    pub calibration_ms: u64,

    /// Sustained silence that finalizes an utterance, milliseconds
    #[serde(default = "default_silence_threshold_ms")]
    pub silence_threshold_ms: u64,

    /// Rise above baseline that counts as speech, decibels
    #[serde(default = "default_speech_margin_db")]
    pub speech_margin_db: f32,

    /// Barge-in threshold as a multiple of expected playback leakage
    #[serde(default = "default_interrupt_ratio")]
    pub interrupt_ratio: f32,

    /// Minimum sustained speech before the active flag flips,
    /// milliseconds
    #[serde(default = "default_min_speech_ms")]
    pub min_speech_ms: u64,
}

fn default_frame_ms() -> u32 {
    vad::FRAME_MS
}
fn default_calibration_ms() -> u64 {
    vad::CALIBRATION_MS
}
fn default_silence_threshold_ms() -> u64 {
    vad::SILENCE_THRESHOLD_MS
}
fn default_speech_margin_db() -> f32 {
    vad::SPEECH_MARGIN_DB
}
fn default_interrupt_ratio() -> f32 {
    vad::INTERRUPT_RATIO
}
fn default_min_speech_ms() -> u64 {
    vad::MIN_SPEECH_MS
}

impl Default for VadSettings {
    fn default() -> Self {
        Self {
            frame_ms: default_frame_ms(),
            calibration_ms: default_calibration_ms(),
            silence_threshold_ms: default_silence_threshold_ms(),
            speech_margin_db: default_speech_margin_db(),
            interrupt_ratio: default_interrupt_ratio(),
            min_speech_ms: default_min_speech_ms(),
        }
    }
}

/// Capture and playback parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioSettings {
    /// Capture sample rate in Hz
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// Hard cap on one utterance in seconds
    #[serde(default = "default_max_utterance_secs")]
    pub max_utterance_secs: u64,

    /// Chunks shorter than this skip transcription, milliseconds
    #[serde(default = "default_min_chunk_ms")]
    pub min_chunk_ms: u64,

    /// Fraction of playback level expected to leak into the mic
    #[serde(default = "default_leakage_factor")]
    pub leakage_factor: f32,

    /// WAV file standing in for the microphone; real capture when unset
    #[serde(default)]
    pub input_wav: Option<String>,
}

fn default_sample_rate() -> u32 {
    audio::SAMPLE_RATE
}
fn default_max_utterance_secs() -> u64 {
    audio::MAX_UTTERANCE_SECS
}
fn default_min_chunk_ms() -> u64 {
    audio::MIN_CHUNK_MS
}
fn default_leakage_factor() -> f32 {
    audio::LEAKAGE_FACTOR
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            max_utterance_secs: default_max_utterance_secs(),
            min_chunk_ms: default_min_chunk_ms(),
            leakage_factor: default_leakage_factor(),
            input_wav: None,
        }
    }
}

impl AudioSettings {
    /// Capture rate as the core enum
    ///
    /// Validation guarantees the configured rate is a supported one.
    pub fn capture_rate(&self) -> SampleRate {
        SampleRate::from_u32(self.sample_rate).unwrap_or_default()
    }
}

/// Per-unit service rates for turn cost estimates
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostSettings {
    #[serde(default = "default_stt_per_minute_usd")]
    pub stt_per_minute_usd: f64,

    #[serde(default = "default_llm_per_1k_chars_usd")]
    pub llm_per_1k_chars_usd: f64,

    #[serde(default = "default_tts_per_1k_chars_usd")]
    pub tts_per_1k_chars_usd: f64,
}

fn default_stt_per_minute_usd() -> f64 {
    pricing::STT_PER_MINUTE_USD
}
fn default_llm_per_1k_chars_usd() -> f64 {
    pricing::LLM_PER_1K_CHARS_USD
}
fn default_tts_per_1k_chars_usd() -> f64 {
    pricing::TTS_PER_1K_CHARS_USD
}

impl Default for CostSettings {
    fn default() -> Self {
        Self {
            stt_per_minute_usd: default_stt_per_minute_usd(),
            llm_per_1k_chars_usd: default_llm_per_1k_chars_usd(),
            tts_per_1k_chars_usd: default_tts_per_1k_chars_usd(),
        }
    }
}

impl CostSettings {
    pub fn cost_model(&self) -> CostModel {
        CostModel {
            stt_per_minute_usd: self.stt_per_minute_usd,
            llm_per_1k_chars_usd: self.llm_per_1k_chars_usd,
            tts_per_1k_chars_usd: self.tts_per_1k_chars_usd,
        }
    }
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default)]
    pub log_json: bool,

    /// Enable metrics
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,

    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_metrics_port() -> u16 {
    9090
}
fn default_true() -> bool {
    true
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
            metrics_enabled: true,
            metrics_port: default_metrics_port(),
        }
    }
}

impl Settings {
    /// Create default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_services()?;
        self.validate_call()?;
        self.validate_vad()?;
        self.validate_audio()?;
        Ok(())
    }

    fn validate_services(&self) -> Result<(), ConfigError> {
        let services = &self.services;

        if !services.base_url.starts_with("http://") && !services.base_url.starts_with("https://")
        {
            return Err(ConfigError::InvalidValue {
                field: "services.base_url".to_string(),
                message: format!("Must be an http(s) URL, got '{}'", services.base_url),
            });
        }

        if services.stt_timeout_ms < 500 {
            return Err(ConfigError::InvalidValue {
                field: "services.stt_timeout_ms".to_string(),
                message: "Transcription timeout below 500ms is unusable".to_string(),
            });
        }

        if services.chat_first_token_timeout_ms < 1000 {
            return Err(ConfigError::InvalidValue {
                field: "services.chat_first_token_timeout_ms".to_string(),
                message: "First-token timeout below 1000ms is unusable".to_string(),
            });
        }

        if services.tts_timeout_ms < 1000 {
            return Err(ConfigError::InvalidValue {
                field: "services.tts_timeout_ms".to_string(),
                message: "Synthesis timeout below 1000ms is unusable".to_string(),
            });
        }

        if services.fallback_reply.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "services.fallback_reply".to_string(),
                message: "Fallback reply cannot be empty".to_string(),
            });
        }

        if self.environment.is_strict() && services.base_url.contains("127.0.0.1") {
            tracing::warn!(
                "services.base_url points at loopback in {} mode",
                if self.environment.is_production() {
                    "production"
                } else {
                    "staging"
                }
            );
        }

        Ok(())
    }

    fn validate_call(&self) -> Result<(), ConfigError> {
        let call = &self.call;

        if call.max_duration_secs < -1 {
            return Err(ConfigError::InvalidValue {
                field: "call.max_duration_secs".to_string(),
                message: format!("Must be -1 (unlimited) or >= 0, got {}", call.max_duration_secs),
            });
        }

        if call.max_consecutive_failures == 0 {
            return Err(ConfigError::InvalidValue {
                field: "call.max_consecutive_failures".to_string(),
                message: "Must be at least 1".to_string(),
            });
        }

        if call.max_response_chars < 100 {
            return Err(ConfigError::InvalidValue {
                field: "call.max_response_chars".to_string(),
                message: "Response cap below 100 characters truncates mid-sentence".to_string(),
            });
        }

        if call.context_max_turns == 0 {
            return Err(ConfigError::InvalidValue {
                field: "call.context_max_turns".to_string(),
                message: "Must keep at least 1 turn of context".to_string(),
            });
        }

        if call.min_first_sentence_chars >= call.max_sentence_buffer_chars {
            return Err(ConfigError::InvalidValue {
                field: "call.min_first_sentence_chars".to_string(),
                message: format!(
                    "Must be below max_sentence_buffer_chars ({})",
                    call.max_sentence_buffer_chars
                ),
            });
        }

        Ok(())
    }

    fn validate_vad(&self) -> Result<(), ConfigError> {
        let vad = &self.vad;

        if !(10..=100).contains(&vad.frame_ms) {
            return Err(ConfigError::InvalidValue {
                field: "vad.frame_ms".to_string(),
                message: format!("Must be between 10 and 100, got {}", vad.frame_ms),
            });
        }

        if vad.calibration_ms < 200 {
            return Err(ConfigError::InvalidValue {
                field: "vad.calibration_ms".to_string(),
                message: "Calibration below 200ms cannot settle a baseline".to_string(),
            });
        }

        if !(100..=2000).contains(&vad.silence_threshold_ms) {
            return Err(ConfigError::InvalidValue {
                field: "vad.silence_threshold_ms".to_string(),
                message: format!(
                    "Must be between 100 and 2000, got {}",
                    vad.silence_threshold_ms
                ),
            });
        }

        if vad.interrupt_ratio <= 1.0 {
            return Err(ConfigError::InvalidValue {
                field: "vad.interrupt_ratio".to_string(),
                message: format!(
                    "Must exceed 1.0 or playback leakage self-interrupts, got {}",
                    vad.interrupt_ratio
                ),
            });
        }

        if vad.speech_margin_db <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "vad.speech_margin_db".to_string(),
                message: format!("Must be positive, got {}", vad.speech_margin_db),
            });
        }

        if vad.min_speech_ms < vad.frame_ms as u64 {
            return Err(ConfigError::InvalidValue {
                field: "vad.min_speech_ms".to_string(),
                message: format!("Must cover at least one frame ({}ms)", vad.frame_ms),
            });
        }

        Ok(())
    }

    fn validate_audio(&self) -> Result<(), ConfigError> {
        let audio = &self.audio;

        if SampleRate::from_u32(audio.sample_rate).is_none() {
            return Err(ConfigError::InvalidValue {
                field: "audio.sample_rate".to_string(),
                message: format!("Unsupported sample rate {}", audio.sample_rate),
            });
        }

        if audio.max_utterance_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "audio.max_utterance_secs".to_string(),
                message: "Must be at least 1 second".to_string(),
            });
        }

        if audio.min_chunk_ms >= audio.max_utterance_secs * 1000 {
            return Err(ConfigError::InvalidValue {
                field: "audio.min_chunk_ms".to_string(),
                message: format!(
                    "Must be below max_utterance_secs ({}s)",
                    audio.max_utterance_secs
                ),
            });
        }

        if !(0.0..=1.0).contains(&audio.leakage_factor) {
            return Err(ConfigError::InvalidValue {
                field: "audio.leakage_factor".to_string(),
                message: format!("Must be between 0.0 and 1.0, got {}", audio.leakage_factor),
            });
        }

        Ok(())
    }
}

/// Load settings from files and environment
///
/// Layering order: `config/default`, then `config/{env}`, then
/// `VOICE_CALL__`-prefixed environment variables.
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    // Load default config
    builder = builder.add_source(File::with_name("config/default").required(false));

    // Load environment-specific config
    if let Some(env_name) = env {
        builder =
            builder.add_source(File::with_name(&format!("config/{}", env_name)).required(false));
    }

    // Load from environment variables
    builder = builder.add_source(
        Environment::with_prefix("VOICE_CALL")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let settings: Settings = config.try_deserialize()?;

    // Validate
    settings.validate()?;

    Ok(settings)
}
