//! Error taxonomy for the voice call pipeline
//!
//! Two classes of failure: resource-acquisition errors that abort a call
//! before it starts, and per-turn service errors the orchestrator absorbs
//! by returning to listening.

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum CallError {
    /// Microphone permission was refused; fatal before call start
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),

    /// No usable audio device; fatal before call start
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// A service call exceeded its deadline; non-fatal per turn
    #[error("{service} request timed out after {timeout_ms}ms")]
    Timeout {
        service: &'static str,
        timeout_ms: u64,
    },

    /// Service responded with a server-side failure; non-fatal per turn
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Service rejected the request for quota reasons; non-fatal per turn
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Transport-level failure reaching a service; non-fatal per turn
    #[error("network error: {0}")]
    Network(String),

    /// A second concurrent call was refused
    #[error("another call session is already active")]
    SessionActive,

    /// Command arrived after the session ended
    #[error("call session already ended")]
    SessionEnded,

    /// In-flight work was cancelled by interrupt or stop
    #[error("cancelled")]
    Cancelled,

    /// Audio encoding, decoding, or device stream failure
    #[error("audio error: {0}")]
    Audio(String),
}

impl CallError {
    /// Errors that must abort the session rather than cost one turn
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CallError::PermissionDenied(_) | CallError::DeviceUnavailable(_)
        )
    }

    /// Short tag for metrics and log fields
    pub fn kind(&self) -> &'static str {
        match self {
            CallError::PermissionDenied(_) => "permission_denied",
            CallError::DeviceUnavailable(_) => "device_unavailable",
            CallError::Timeout { .. } => "timeout",
            CallError::ServiceUnavailable(_) => "service_unavailable",
            CallError::RateLimited(_) => "rate_limited",
            CallError::Network(_) => "network",
            CallError::SessionActive => "session_active",
            CallError::SessionEnded => "session_ended",
            CallError::Cancelled => "cancelled",
            CallError::Audio(_) => "audio",
        }
    }
}

pub type Result<T> = std::result::Result<T, CallError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_split() {
        assert!(CallError::PermissionDenied("mic".into()).is_fatal());
        assert!(CallError::DeviceUnavailable("no input".into()).is_fatal());
        assert!(!CallError::Timeout {
            service: "stt",
            timeout_ms: 5000,
        }
        .is_fatal());
        assert!(!CallError::RateLimited("429".into()).is_fatal());
        assert!(!CallError::Cancelled.is_fatal());
    }

    #[test]
    fn test_display() {
        let err = CallError::Timeout {
            service: "stt",
            timeout_ms: 5000,
        };
        assert_eq!(err.to_string(), "stt request timed out after 5000ms");
    }
}
