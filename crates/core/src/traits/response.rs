//! Response generation interface

use crate::error::Result;
use crate::message::Message;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Measurements from one generation stream
#[derive(Debug, Clone, Default)]
pub struct ResponseStats {
    /// Characters sent through the delta channel
    pub chars: usize,
    /// Milliseconds from request to first delta, if any delta arrived
    pub first_token_ms: Option<u64>,
    /// Total stream duration in milliseconds
    pub total_ms: u64,
    /// False when the stream was cancelled or cut off mid-flight
    pub completed: bool,
}

/// Streaming chat-completion client
///
/// Deltas are pushed through `tx` as they arrive. Dropping the receiver
/// cancels the stream: the implementation notices the closed channel,
/// abandons the request, and returns stats with `completed = false`
/// instead of an error.
#[async_trait]
pub trait ResponseGenerator: Send + Sync + 'static {
    /// Stream a response to the given conversation
    async fn stream(&self, messages: &[Message], tx: mpsc::Sender<String>)
        -> Result<ResponseStats>;

    /// Model identifier for logging
    fn model_name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CannedGenerator {
        reply: &'static str,
    }

    #[async_trait]
    impl ResponseGenerator for CannedGenerator {
        async fn stream(
            &self,
            _messages: &[Message],
            tx: mpsc::Sender<String>,
        ) -> Result<ResponseStats> {
            let mut chars = 0;
            for word in self.reply.split_inclusive(' ') {
                chars += word.len();
                if tx.send(word.to_string()).await.is_err() {
                    return Ok(ResponseStats {
                        chars,
                        completed: false,
                        ..Default::default()
                    });
                }
            }
            Ok(ResponseStats {
                chars,
                first_token_ms: Some(1),
                total_ms: 1,
                completed: true,
            })
        }

        fn model_name(&self) -> &str {
            "canned"
        }
    }

    #[tokio::test]
    async fn test_dropped_receiver_reports_cancelled() {
        let generator = CannedGenerator {
            reply: "one two three",
        };
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let stats = generator.stream(&[], tx).await.unwrap();
        assert!(!stats.completed);
    }

    #[tokio::test]
    async fn test_full_stream_completes() {
        let generator = CannedGenerator {
            reply: "one two three",
        };
        let (tx, mut rx) = mpsc::channel(16);
        let stats = generator.stream(&[], tx).await.unwrap();
        assert!(stats.completed);
        let mut text = String::new();
        while let Some(delta) = rx.recv().await {
            text.push_str(&delta);
        }
        assert_eq!(text, "one two three");
    }
}
