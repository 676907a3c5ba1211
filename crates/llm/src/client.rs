//! SSE chat-completion client
//!
//! The backend streams generation as server-sent events: a `start`
//! event, then `token` events carrying raw text pieces, then `done` and
//! `end`. Errors arrive as an `error` event with a JSON message.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::mpsc;

use voice_call_core::{Message, ResponseGenerator, ResponseStats};

use crate::context::flatten_prompt;
use crate::LlmError;

/// Chat client configuration
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Backend base URL
    pub endpoint: String,
    /// Model identifier forwarded with each request
    pub model: String,
    /// Stop reading past this many response characters
    pub max_response_chars: usize,
    /// Deadline for the first token event
    pub first_token_timeout: Duration,
    /// Cap on the whole stream; generous, the first-token deadline is
    /// the tight one
    pub request_timeout: Duration,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8000".to_string(),
            model: "local".to_string(),
            max_response_chars: 1_200,
            first_token_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorPayload {
    message: String,
}

/// One parsed server-sent event
#[derive(Debug, PartialEq)]
struct SseEvent {
    name: String,
    data: String,
}

/// Incremental SSE line parser
///
/// Collects `event:` and `data:` fields until the blank separator line,
/// then yields the assembled event. Multi-line data joins with newlines
/// per the SSE framing rules.
#[derive(Debug, Default)]
struct SseEventParser {
    event: Option<String>,
    data: Option<String>,
}

impl SseEventParser {
    fn push_line(&mut self, line: &str) -> Option<SseEvent> {
        let line = line.trim_end_matches('\r');

        if line.is_empty() {
            let name = self.event.take()?;
            let data = self.data.take().unwrap_or_default();
            return Some(SseEvent { name, data });
        }

        if let Some(rest) = line.strip_prefix("event:") {
            self.event = Some(rest.trim_start().to_string());
        } else if let Some(rest) = line.strip_prefix("data:") {
            let piece = rest.strip_prefix(' ').unwrap_or(rest);
            match &mut self.data {
                Some(data) => {
                    data.push('\n');
                    data.push_str(piece);
                },
                None => self.data = Some(piece.to_string()),
            }
        }
        // Comment and id fields are ignored

        None
    }
}

/// Streaming client for the backend generation endpoint
pub struct SseChatClient {
    client: Client,
    config: ChatConfig,
}

impl SseChatClient {
    pub fn new(config: ChatConfig) -> Result<Self, LlmError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| LlmError::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    fn stream_url(&self) -> String {
        format!("{}/chat_stream", self.config.endpoint.trim_end_matches('/'))
    }

    /// Quick reachability probe against the backend health endpoint
    pub async fn is_available(&self) -> bool {
        let url = format!("{}/health", self.config.endpoint.trim_end_matches('/'));
        self.client
            .get(&url)
            .timeout(Duration::from_secs(2))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    async fn stream_inner(
        &self,
        messages: &[Message],
        tx: mpsc::Sender<String>,
    ) -> Result<ResponseStats, LlmError> {
        let start = std::time::Instant::now();
        let prompt = flatten_prompt(messages);

        let response = self
            .client
            .get(self.stream_url())
            .query(&[
                ("prompt", prompt.as_str()),
                ("model", self.config.model.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            if status.as_u16() == 429 {
                return Err(LlmError::RateLimited(error_text));
            }
            return Err(LlmError::Api(format!("HTTP {}: {}", status, error_text)));
        }

        let mut stream = response.bytes_stream();
        let mut buffer = String::new();
        let mut parser = SseEventParser::default();

        let mut chars = 0usize;
        let mut first_token_ms: Option<u64> = None;
        let mut completed = false;
        let first_deadline = tokio::time::Instant::now() + self.config.first_token_timeout;

        'read: loop {
            // The first-token deadline only applies while nothing has
            // arrived; after that the stream runs at its own pace.
            let item = if first_token_ms.is_none() {
                match tokio::time::timeout_at(first_deadline, stream.next()).await {
                    Ok(item) => item,
                    Err(_) => {
                        return Err(LlmError::FirstTokenTimeout(
                            self.config.first_token_timeout.as_millis() as u64,
                        ))
                    },
                }
            } else {
                stream.next().await
            };

            let Some(chunk) = item else { break };
            let chunk = chunk.map_err(|e| LlmError::Network(e.to_string()))?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(line_end) = buffer.find('\n') {
                let line = buffer[..line_end].to_string();
                buffer = buffer[line_end + 1..].to_string();

                let Some(event) = parser.push_line(&line) else {
                    continue;
                };

                match event.name.as_str() {
                    "token" => {
                        if first_token_ms.is_none() {
                            first_token_ms = Some(start.elapsed().as_millis() as u64);
                        }
                        chars += event.data.chars().count();

                        if tx.send(event.data).await.is_err() {
                            // Receiver dropped: the turn was interrupted
                            return Ok(ResponseStats {
                                chars,
                                first_token_ms,
                                total_ms: start.elapsed().as_millis() as u64,
                                completed: false,
                            });
                        }

                        if chars >= self.config.max_response_chars {
                            tracing::debug!(chars, "response cap reached, closing stream");
                            completed = true;
                            break 'read;
                        }
                    },
                    "error" => {
                        let message = serde_json::from_str::<ErrorPayload>(&event.data)
                            .map(|p| p.message)
                            .unwrap_or(event.data);
                        if first_token_ms.is_none() {
                            return Err(LlmError::Api(message));
                        }
                        tracing::warn!(chars, "generation error mid-stream: {}", message);
                        break 'read;
                    },
                    "done" | "end" => {
                        completed = true;
                        break 'read;
                    },
                    _ => {},
                }
            }
        }

        Ok(ResponseStats {
            chars,
            first_token_ms,
            total_ms: start.elapsed().as_millis() as u64,
            completed,
        })
    }
}

#[async_trait]
impl ResponseGenerator for SseChatClient {
    async fn stream(
        &self,
        messages: &[Message],
        tx: mpsc::Sender<String>,
    ) -> voice_call_core::Result<ResponseStats> {
        self.stream_inner(messages, tx).await.map_err(Into::into)
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_all(raw: &str) -> Vec<SseEvent> {
        let mut parser = SseEventParser::default();
        let mut events = Vec::new();
        for line in raw.split('\n') {
            if let Some(event) = parser.push_line(line) {
                events.push(event);
            }
        }
        events
    }

    #[test]
    fn test_parses_event_stream() {
        let raw = "event: start\ndata: {\"status\": \"starting\"}\n\n\
                   event: token\ndata: Hello wor\n\n\
                   event: token\ndata: ld.\n\n\
                   event: done\ndata: {\"status\": \"ok\"}\n\n";
        let events = parse_all(raw);
        assert_eq!(events.len(), 4);
        assert_eq!(events[0].name, "start");
        assert_eq!(events[1].data, "Hello wor");
        assert_eq!(events[2].data, "ld.");
        assert_eq!(events[3].name, "done");
    }

    #[test]
    fn test_multiline_data_joins_with_newline() {
        let raw = "event: token\ndata: line one\ndata: line two\n\n";
        let events = parse_all(raw);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "line one\nline two");
    }

    #[test]
    fn test_crlf_and_blank_noise_tolerated() {
        let raw = "event: token\r\ndata: hi\r\n\r\n\n\n";
        let events = parse_all(raw);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "hi");
    }

    #[test]
    fn test_default_config() {
        let config = ChatConfig::default();
        assert_eq!(config.max_response_chars, 1_200);
        assert_eq!(config.first_token_timeout, Duration::from_secs(10));
    }
}
