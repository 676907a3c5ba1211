//! Per-turn usage and cost records
//!
//! The orchestrator emits one of these after every turn for an external
//! metering consumer. Only the data is defined here; quota enforcement
//! belongs to whoever subscribes.

use serde::{Deserialize, Serialize};

/// Latency and volume measurements for one turn
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnUsage {
    /// Turn index within the call, starting at 1
    pub turn: u32,
    /// Seconds of user audio sent to transcription
    pub audio_secs: f32,
    /// Transcription round-trip in milliseconds
    pub stt_ms: u64,
    /// Milliseconds from request to first generated token
    pub llm_first_token_ms: u64,
    /// Total generation stream duration in milliseconds
    pub llm_total_ms: u64,
    /// Summed synthesis time across sentences in milliseconds
    pub tts_ms: u64,
    /// Sentences actually spoken (discarded units excluded)
    pub sentences: u32,
    /// Characters of generated response text
    pub response_chars: u32,
    /// Whether the turn was cut short by barge-in
    pub interrupted: bool,
    /// Wall-clock turn duration in milliseconds
    pub total_ms: u64,
    /// Estimated cost in USD under the configured rates
    pub estimated_cost_usd: f64,
}

/// Per-unit service rates used to estimate turn cost
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostModel {
    /// STT price per minute of audio
    pub stt_per_minute_usd: f64,
    /// Generation price per 1k characters of output
    pub llm_per_1k_chars_usd: f64,
    /// Synthesis price per 1k characters of input
    pub tts_per_1k_chars_usd: f64,
}

impl Default for CostModel {
    fn default() -> Self {
        Self {
            stt_per_minute_usd: 0.006,
            llm_per_1k_chars_usd: 0.002,
            tts_per_1k_chars_usd: 0.015,
        }
    }
}

impl CostModel {
    /// Estimate the cost of one turn
    pub fn estimate(&self, usage: &TurnUsage) -> f64 {
        let stt = (usage.audio_secs as f64 / 60.0) * self.stt_per_minute_usd;
        let chars = usage.response_chars as f64 / 1000.0;
        let llm = chars * self.llm_per_1k_chars_usd;
        let tts = chars * self.tts_per_1k_chars_usd;
        stt + llm + tts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cost_estimate() {
        let model = CostModel::default();
        let usage = TurnUsage {
            turn: 1,
            audio_secs: 60.0,
            response_chars: 1000,
            ..Default::default()
        };
        let cost = model.estimate(&usage);
        let expected = 0.006 + 0.002 + 0.015;
        assert!((cost - expected).abs() < 1e-9);
    }

    #[test]
    fn test_zero_usage_costs_nothing() {
        let model = CostModel::default();
        assert_eq!(model.estimate(&TurnUsage::default()), 0.0);
    }
}
