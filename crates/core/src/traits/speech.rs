//! Transcription and synthesis interfaces

use crate::audio::{AudioChunk, AudioClip};
use crate::error::Result;
use crate::transcript::Transcript;
use async_trait::async_trait;

/// Speech-to-text service client
///
/// One finalized chunk in, one transcript out. Implementations must
/// bound every request with their configured timeout; the call loop
/// relies on `transcribe` never blocking indefinitely.
#[async_trait]
pub trait Transcriber: Send + Sync + 'static {
    /// Transcribe one captured chunk
    ///
    /// Returns the raw transcript, which may be empty; the caller
    /// decides whether it is substantial enough to forward.
    async fn transcribe(&self, chunk: &AudioChunk, language: Option<&str>) -> Result<Transcript>;

    /// Service name for logging
    fn service_name(&self) -> &str;
}

/// Text-to-speech service client
///
/// One sentence in, one decoded clip out. Several calls run
/// concurrently during a turn, one per queued sentence.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync + 'static {
    /// Synthesize one sentence
    async fn synthesize(&self, text: &str, voice: Option<&str>) -> Result<AudioClip>;

    /// Service name for logging
    fn service_name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTranscriber;

    #[async_trait]
    impl Transcriber for EchoTranscriber {
        async fn transcribe(
            &self,
            chunk: &AudioChunk,
            language: Option<&str>,
        ) -> Result<Transcript> {
            Ok(Transcript {
                text: format!("{} samples", chunk.samples.len()),
                language: language.map(String::from),
                duration_secs: chunk.duration_secs(),
            })
        }

        fn service_name(&self) -> &str {
            "echo"
        }
    }

    #[tokio::test]
    async fn test_language_passthrough() {
        use crate::audio::SampleRate;
        use std::time::Instant;

        let stt = EchoTranscriber;
        let chunk = AudioChunk::new(vec![0.0; 160], SampleRate::Hz16000, Instant::now());
        let transcript = stt.transcribe(&chunk, Some("en")).await.unwrap();
        assert_eq!(transcript.language.as_deref(), Some("en"));
        assert_eq!(transcript.text, "160 samples");
    }
}
