//! Core traits and types for the voice call pipeline
//!
//! This crate provides the foundational pieces used across all other
//! crates:
//! - Service traits for pluggable audio I/O and network backends
//! - Audio frame, chunk, and clip types with level math
//! - Call session metadata and phase vocabulary
//! - Error taxonomy with the fatal/per-turn split
//! - Per-turn usage records for external metering

pub mod audio;
pub mod call;
pub mod error;
pub mod message;
pub mod traits;
pub mod transcript;
pub mod usage;

// Re-exports from modules
pub use audio::{
    rms, rms_to_db, AudioBuffer, AudioChunk, AudioClip, AudioFrame, SampleRate, SILENCE_DB,
};
pub use call::{CallInfo, CallMode, CallPhase, EndReason};
pub use error::{CallError, Result};
pub use message::{Message, Role};
pub use transcript::Transcript;
pub use usage::{CostModel, TurnUsage};

// Trait re-exports
pub use traits::{
    AudioSink,
    AudioSource,
    PlayOutcome,
    ResponseGenerator,
    ResponseStats,
    SpeechSynthesizer,
    Transcriber,
};
