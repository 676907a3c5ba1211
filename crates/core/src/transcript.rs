//! Transcription result types

use serde::{Deserialize, Serialize};

/// Text derived from one captured audio chunk
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Transcript {
    /// Transcribed text, possibly empty
    pub text: String,
    /// Language reported by the transcription service
    #[serde(default)]
    pub language: Option<String>,
    /// Spoken duration in seconds as measured by the service
    #[serde(default)]
    pub duration_secs: f32,
}

impl Transcript {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            language: None,
            duration_secs: 0.0,
        }
    }

    /// Whether this transcript should be forwarded to the response
    /// generator
    ///
    /// Whitespace and bare punctuation are dropped; one alphanumeric
    /// character is enough to count as speech.
    pub fn is_substantial(&self) -> bool {
        self.text.trim().chars().any(|c| c.is_alphanumeric())
    }
}
