//! HTTP synthesis client

use std::time::{Duration, Instant};

use async_trait::async_trait;
use voice_call_config::constants::{endpoints, timeouts};
use voice_call_core::{AudioClip, CallError, Result, SpeechSynthesizer};

use crate::wav::decode_wav;

/// Synthesis client configuration
#[derive(Debug, Clone)]
pub struct TtsConfig {
    /// Base URL of the synthesis service
    pub base_url: String,
    /// Per-sentence timeout; generous because synthesis latency scales
    /// with sentence length
    pub timeout: Duration,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            base_url: endpoints::BACKEND_DEFAULT.to_string(),
            timeout: Duration::from_millis(timeouts::TTS_TIMEOUT_MS),
        }
    }
}

/// HTTP [`SpeechSynthesizer`] for the sidecar synthesis service
///
/// Posts one sentence, receives WAV bytes, decodes to a mono clip.
/// Failures are reported per sentence; the queue above drops the unit
/// and keeps playing.
pub struct HttpSynthesizer {
    config: TtsConfig,
    client: reqwest::Client,
}

impl HttpSynthesizer {
    pub fn new(config: TtsConfig) -> Result<Self> {
        // Client-level timeout covers the body read as well; the
        // per-request timeout below only bounds send
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(config.timeout)
            .build()
            .map_err(|e| CallError::ServiceUnavailable(format!("HTTP client: {e}")))?;
        Ok(Self { config, client })
    }

    fn tts_url(&self) -> String {
        format!("{}{}", self.config.base_url, endpoints::TTS_PATH)
    }
}

#[async_trait]
impl SpeechSynthesizer for HttpSynthesizer {
    async fn synthesize(&self, text: &str, voice: Option<&str>) -> Result<AudioClip> {
        let mut form = vec![("text", text.to_string())];
        if let Some(voice) = voice {
            form.push(("voice", voice.to_string()));
        }

        let started = Instant::now();
        let timeout_ms = self.config.timeout.as_millis() as u64;
        let response = tokio::time::timeout(
            self.config.timeout,
            self.client.post(self.tts_url()).form(&form).send(),
        )
        .await
        .map_err(|_| CallError::Timeout {
            service: "tts",
            timeout_ms,
        })?
        .map_err(|e| {
            if e.is_connect() {
                CallError::Network(format!("synthesis service: {e}"))
            } else {
                CallError::ServiceUnavailable(format!("synthesis service: {e}"))
            }
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(CallError::RateLimited("synthesis service".to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CallError::ServiceUnavailable(format!(
                "synthesis service HTTP {status}: {body}"
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| CallError::Network(format!("synthesis body: {e}")))?;
        let clip = decode_wav(&bytes)?;

        tracing::debug!(
            chars = text.chars().count(),
            clip_ms = clip.duration().as_millis() as u64,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "sentence synthesized"
        );

        Ok(clip)
    }

    fn service_name(&self) -> &str {
        "http-tts"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = TtsConfig::default();
        assert_eq!(config.base_url, "http://127.0.0.1:8000");
        assert_eq!(config.timeout, Duration::from_secs(30));
    }
}
