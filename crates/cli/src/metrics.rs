//! Prometheus metrics bootstrap and recording helpers
//!
//! The exporter serves `/metrics` on its own listener so the pipeline
//! crates stay free of any exporter dependency; they only ever see the
//! usage records and events recorded here.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use voice_call_core::{EndReason, TurnUsage};

/// Install the Prometheus recorder and start its HTTP listener
///
/// Must run inside the tokio runtime; the listener lives on a
/// background task for the rest of the process.
pub fn init_metrics(port: u16) -> Result<(), BuildError> {
    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()?;
    describe_metrics();
    Ok(())
}

fn describe_metrics() {
    describe_histogram!(
        "voice_call_stt_ms",
        Unit::Milliseconds,
        "Transcription round-trip per turn"
    );
    describe_histogram!(
        "voice_call_llm_first_token_ms",
        Unit::Milliseconds,
        "Time to first generated token per turn"
    );
    describe_histogram!(
        "voice_call_llm_total_ms",
        Unit::Milliseconds,
        "Full generation stream duration per turn"
    );
    describe_histogram!(
        "voice_call_tts_ms",
        Unit::Milliseconds,
        "Summed synthesis time per turn"
    );
    describe_histogram!(
        "voice_call_turn_ms",
        Unit::Milliseconds,
        "Wall-clock turn duration"
    );
    describe_counter!("voice_call_turns_total", "Completed turns");
    describe_counter!(
        "voice_call_barge_ins_total",
        "Turns cut short by the caller speaking over playback"
    );
    describe_counter!(
        "voice_call_notices_total",
        "Non-fatal problems surfaced to the caller"
    );
    describe_counter!("voice_call_calls_total", "Finished calls by end reason");
    describe_gauge!(
        "voice_call_audio_seconds_total",
        "Caller audio sent to transcription"
    );
    describe_gauge!(
        "voice_call_cost_usd_total",
        "Accumulated usage cost estimate"
    );
}

/// Record one finished turn's latencies and volumes
pub fn record_turn(usage: &TurnUsage) {
    histogram!("voice_call_stt_ms").record(usage.stt_ms as f64);
    histogram!("voice_call_llm_first_token_ms").record(usage.llm_first_token_ms as f64);
    histogram!("voice_call_llm_total_ms").record(usage.llm_total_ms as f64);
    histogram!("voice_call_tts_ms").record(usage.tts_ms as f64);
    histogram!("voice_call_turn_ms").record(usage.total_ms as f64);
    counter!("voice_call_turns_total").increment(1);
    if usage.interrupted {
        counter!("voice_call_barge_ins_total").increment(1);
    }
    gauge!("voice_call_audio_seconds_total").increment(usage.audio_secs as f64);
    gauge!("voice_call_cost_usd_total").increment(usage.estimated_cost_usd);
}

/// Count a non-fatal notice shown to the caller
pub fn record_notice() {
    counter!("voice_call_notices_total").increment(1);
}

/// Count a finished call under its end reason
pub fn record_call_ended(reason: &EndReason) {
    counter!("voice_call_calls_total", "reason" => reason_label(reason)).increment(1);
}

fn reason_label(reason: &EndReason) -> &'static str {
    match reason {
        EndReason::Stopped => "stopped",
        EndReason::MaxDurationReached => "max_duration",
        EndReason::TooManyFailures => "too_many_failures",
        EndReason::Fatal(_) => "fatal",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_labels_are_stable() {
        assert_eq!(reason_label(&EndReason::Stopped), "stopped");
        assert_eq!(reason_label(&EndReason::MaxDurationReached), "max_duration");
        assert_eq!(
            reason_label(&EndReason::Fatal("device gone".to_string())),
            "fatal"
        );
    }

    #[test]
    fn test_recording_without_exporter_is_a_no_op() {
        // No recorder installed in tests; the macros must not panic.
        record_turn(&TurnUsage {
            turn: 1,
            interrupted: true,
            ..Default::default()
        });
        record_notice();
        record_call_ended(&EndReason::TooManyFailures);
    }
}
