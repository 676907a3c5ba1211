//! Service traits for pluggable pipeline components
//!
//! Every external dependency of the call loop sits behind one of these:
//!
//! ```text
//! Audio I/O:
//!   - AudioSource: microphone frames in
//!   - AudioSink: synthesized audio out
//!
//! Network services:
//!   - Transcriber: audio chunk -> text
//!   - ResponseGenerator: conversation -> streamed deltas
//!   - SpeechSynthesizer: sentence -> audio clip
//! ```
//!
//! The orchestrator is written against these traits only, so tests swap
//! in scripted implementations without touching the state machine.

pub mod audio;
pub mod response;
pub mod speech;

pub use audio::{AudioSink, AudioSource, PlayOutcome};
pub use response::{ResponseGenerator, ResponseStats};
pub use speech::{SpeechSynthesizer, Transcriber};
