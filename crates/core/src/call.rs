//! Call session metadata and phase machine vocabulary

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Phase of the call state machine
///
/// The loop is listening -> transcribing -> thinking -> speaking ->
/// listening; `Ended` is reachable from every phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallPhase {
    Idle,
    Listening,
    Transcribing,
    Thinking,
    Speaking,
    Ended,
}

impl CallPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallPhase::Idle => "idle",
            CallPhase::Listening => "listening",
            CallPhase::Transcribing => "transcribing",
            CallPhase::Thinking => "thinking",
            CallPhase::Speaking => "speaking",
            CallPhase::Ended => "ended",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CallPhase::Ended)
    }
}

impl std::fmt::Display for CallPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a call ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// Caller invoked stop()
    Stopped,
    /// Max-duration watchdog fired
    MaxDurationReached,
    /// Too many consecutive failed turns
    TooManyFailures,
    /// Unrecoverable error mid-call
    Fatal(String),
}

impl std::fmt::Display for EndReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EndReason::Stopped => f.write_str("stopped"),
            EndReason::MaxDurationReached => f.write_str("max duration reached"),
            EndReason::TooManyFailures => f.write_str("too many consecutive failures"),
            EndReason::Fatal(msg) => write!(f, "fatal: {}", msg),
        }
    }
}

/// How utterance boundaries are decided
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CallMode {
    /// Silence detection finalizes each utterance
    #[default]
    Continuous,
    /// An explicit release command finalizes each utterance
    PushToTalk,
}

/// Immutable metadata of one call session
///
/// Mutable state (phase, mute) lives with the orchestrator that owns the
/// session; this struct is what event subscribers and logs see.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallInfo {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub mode: CallMode,
    /// Session cap in seconds; -1 means unlimited
    pub max_duration_secs: i64,
}

impl CallInfo {
    pub fn new(mode: CallMode, max_duration_secs: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            mode,
            max_duration_secs,
        }
    }

    pub fn is_unlimited(&self) -> bool {
        self.max_duration_secs < 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_labels() {
        assert_eq!(CallPhase::Listening.as_str(), "listening");
        assert_eq!(CallPhase::Speaking.to_string(), "speaking");
        assert!(CallPhase::Ended.is_terminal());
        assert!(!CallPhase::Idle.is_terminal());
    }

    #[test]
    fn test_call_info() {
        let info = CallInfo::new(CallMode::Continuous, -1);
        assert!(info.is_unlimited());
        let capped = CallInfo::new(CallMode::PushToTalk, 300);
        assert!(!capped.is_unlimited());
        assert_ne!(info.id, capped.id);
    }
}
