//! HTTP transcription client
//!
//! Uploads finalized utterance chunks as 16-bit PCM WAV to the speech
//! service and maps its responses onto the call error taxonomy. Every
//! request is bounded by the configured timeout; a slow service costs
//! one turn, never the call.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use voice_call_config::constants::{endpoints, timeouts};
use voice_call_core::{AudioChunk, CallError, Result, Transcriber, Transcript};

use crate::wav::encode_wav_pcm16;

/// Transcription client configuration
#[derive(Debug, Clone)]
pub struct SttConfig {
    /// Base URL of the speech service
    pub base_url: String,
    /// Default language hint when the caller passes none
    pub language: String,
    /// Per-request timeout
    pub timeout: Duration,
    /// Chunks with fewer samples than this are skipped without a
    /// network call
    pub min_samples: usize,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            base_url: endpoints::BACKEND_DEFAULT.to_string(),
            language: "en".to_string(),
            timeout: Duration::from_millis(timeouts::STT_TIMEOUT_MS),
            // 100ms at 16kHz
            min_samples: 1600,
        }
    }
}

/// Response from the speech service
#[derive(Debug, Deserialize)]
struct SttResponse {
    text: String,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    duration: f32,
}

/// HTTP [`Transcriber`] for the sidecar speech service
pub struct HttpTranscriber {
    config: SttConfig,
    client: reqwest::Client,
}

impl HttpTranscriber {
    /// Build the client and probe the service once
    ///
    /// An unreachable service logs a warning and construction still
    /// succeeds; transcription failures then surface per turn.
    pub async fn connect(config: SttConfig) -> Result<Self> {
        // Client-level timeout covers the body read as well; the
        // per-request timeout below only bounds send
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(config.timeout)
            .build()
            .map_err(|e| CallError::ServiceUnavailable(format!("HTTP client: {e}")))?;

        let health_url = format!("{}{}", config.base_url, endpoints::HEALTH_PATH);
        let probe = client
            .get(&health_url)
            .timeout(Duration::from_millis(timeouts::HEALTH_PROBE_TIMEOUT_MS))
            .send()
            .await;
        match probe {
            Ok(resp) if resp.status().is_success() => {
                tracing::info!(url = %config.base_url, language = %config.language,
                    "speech service connected");
            }
            Ok(resp) => {
                tracing::warn!(status = %resp.status(),
                    "speech service health check failed, proceeding anyway");
            }
            Err(e) => {
                tracing::warn!(error = %e,
                    "speech service not reachable, will retry on first request");
            }
        }

        Ok(Self { config, client })
    }

    fn stt_url(&self) -> String {
        format!("{}{}", self.config.base_url, endpoints::STT_PATH)
    }
}

#[async_trait]
impl Transcriber for HttpTranscriber {
    async fn transcribe(&self, chunk: &AudioChunk, language: Option<&str>) -> Result<Transcript> {
        let language = language.unwrap_or(&self.config.language);

        if chunk.samples.len() < self.config.min_samples {
            tracing::debug!(samples = chunk.samples.len(), "chunk too short, skipping");
            return Ok(Transcript::default());
        }

        let wav = encode_wav_pcm16(&chunk.samples, chunk.sample_rate.as_u32())?;
        let part = reqwest::multipart::Part::bytes(wav)
            .file_name("utterance.wav")
            .mime_str("audio/wav")
            .map_err(|e| CallError::Audio(format!("multipart: {e}")))?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("language", language.to_string());

        let started = Instant::now();
        let timeout_ms = self.config.timeout.as_millis() as u64;
        let response = tokio::time::timeout(
            self.config.timeout,
            self.client.post(self.stt_url()).multipart(form).send(),
        )
        .await
        .map_err(|_| CallError::Timeout {
            service: "stt",
            timeout_ms,
        })?
        .map_err(|e| {
            if e.is_connect() {
                CallError::Network(format!("speech service: {e}"))
            } else {
                CallError::ServiceUnavailable(format!("speech service: {e}"))
            }
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(CallError::RateLimited("speech service".to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CallError::ServiceUnavailable(format!(
                "speech service HTTP {status}: {body}"
            )));
        }

        let parsed: SttResponse = response
            .json()
            .await
            .map_err(|e| CallError::ServiceUnavailable(format!("bad STT response: {e}")))?;

        tracing::debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            chars = parsed.text.chars().count(),
            "transcription complete"
        );

        Ok(Transcript {
            text: parsed.text,
            language: parsed.language,
            duration_secs: if parsed.duration > 0.0 {
                parsed.duration
            } else {
                chunk.duration_secs()
            },
        })
    }

    fn service_name(&self) -> &str {
        "http-stt"
    }
}
