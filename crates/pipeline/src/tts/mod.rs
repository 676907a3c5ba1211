//! Speech synthesis
//!
//! [`HttpSynthesizer`] turns one sentence into one decoded clip;
//! [`SpeechQueue`] runs many of those concurrently while keeping
//! playback strictly in sentence order.

pub mod http;
pub mod queue;

pub use http::{HttpSynthesizer, TtsConfig};
pub use queue::SpeechQueue;
