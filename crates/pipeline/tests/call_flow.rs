//! End-to-end call flow tests
//!
//! Every test drives a real spawned call through scripted components:
//! a level-scripted microphone, a timing-faithful null speaker, and
//! canned transcription and generation clients. No network, no devices.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::{broadcast, mpsc, Notify};
use tokio::time::timeout;

use voice_call_config::Settings;
use voice_call_core::{
    AudioChunk, AudioClip, AudioSink, CallError, CallMode, CallPhase, EndReason, Message,
    PlayOutcome, ResponseGenerator, ResponseStats, Result, SampleRate, SpeechSynthesizer,
    Transcriber, Transcript,
};
use voice_call_pipeline::orchestrator::{CallComponents, CallEvent, CallManager, VoiceCall};
use voice_call_pipeline::sources::ScriptedSource;
use voice_call_pipeline::tts::SpeechQueue;

const DEFAULT_TRANSCRIPT: &str = "What is the weather like today?";
const DEFAULT_REPLY: &str = "It is sunny out there. It should stay warm all afternoon.";

/// One scripted transcription outcome
#[derive(Debug, Clone, Copy)]
enum SttScript {
    Text(&'static str),
    Timeout,
    Unavailable,
}

struct ScriptedTranscriber {
    script: Mutex<VecDeque<SttScript>>,
}

impl ScriptedTranscriber {
    fn new(script: &[SttScript]) -> Self {
        Self {
            script: Mutex::new(script.iter().copied().collect()),
        }
    }
}

#[async_trait]
impl Transcriber for ScriptedTranscriber {
    async fn transcribe(&self, chunk: &AudioChunk, language: Option<&str>) -> Result<Transcript> {
        let action = self
            .script
            .lock()
            .pop_front()
            .unwrap_or(SttScript::Text(DEFAULT_TRANSCRIPT));
        match action {
            SttScript::Text(text) => Ok(Transcript {
                text: text.to_string(),
                language: language.map(String::from),
                duration_secs: chunk.duration_secs(),
            }),
            SttScript::Timeout => Err(CallError::Timeout {
                service: "stt",
                timeout_ms: 5_000,
            }),
            SttScript::Unavailable => {
                Err(CallError::ServiceUnavailable("scripted outage".to_string()))
            }
        }
    }

    fn service_name(&self) -> &str {
        "scripted-stt"
    }
}

/// One scripted generation outcome
#[derive(Debug, Clone, Copy)]
enum GenScript {
    Reply(&'static str),
    FirstTokenTimeout,
}

struct ScriptedGenerator {
    script: Mutex<VecDeque<GenScript>>,
    delta_delay: Duration,
}

impl ScriptedGenerator {
    fn new(script: &[GenScript]) -> Self {
        Self {
            script: Mutex::new(script.iter().copied().collect()),
            delta_delay: Duration::from_millis(1),
        }
    }
}

#[async_trait]
impl ResponseGenerator for ScriptedGenerator {
    async fn stream(
        &self,
        _messages: &[Message],
        tx: mpsc::Sender<String>,
    ) -> Result<ResponseStats> {
        let action = self
            .script
            .lock()
            .pop_front()
            .unwrap_or(GenScript::Reply(DEFAULT_REPLY));
        match action {
            GenScript::Reply(text) => {
                let start = Instant::now();
                let mut chars = 0usize;
                let mut first_token_ms = None;
                for token in text.split_inclusive(' ') {
                    tokio::time::sleep(self.delta_delay).await;
                    if tx.send(token.to_string()).await.is_err() {
                        return Ok(ResponseStats {
                            chars,
                            first_token_ms,
                            total_ms: start.elapsed().as_millis() as u64,
                            completed: false,
                        });
                    }
                    if first_token_ms.is_none() {
                        first_token_ms = Some(start.elapsed().as_millis() as u64);
                    }
                    chars += token.chars().count();
                }
                Ok(ResponseStats {
                    chars,
                    first_token_ms,
                    total_ms: start.elapsed().as_millis() as u64,
                    completed: true,
                })
            }
            GenScript::FirstTokenTimeout => {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Err(CallError::Timeout {
                    service: "chat",
                    timeout_ms: 10_000,
                })
            }
        }
    }

    fn model_name(&self) -> &str {
        "scripted-chat"
    }
}

/// Synthesizer producing one constant-level clip per sentence
///
/// Clip length encodes the sentence: `chars * 160` samples, so playback
/// order and identity are assertable from the sink log.
struct ScriptedSynth {
    min_latency_ms: u64,
    max_latency_ms: u64,
}

impl ScriptedSynth {
    fn fixed(ms: u64) -> Self {
        Self {
            min_latency_ms: ms,
            max_latency_ms: ms,
        }
    }

    fn random(min_ms: u64, max_ms: u64) -> Self {
        Self {
            min_latency_ms: min_ms,
            max_latency_ms: max_ms,
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for ScriptedSynth {
    async fn synthesize(&self, text: &str, _voice: Option<&str>) -> Result<AudioClip> {
        let latency_ms = if self.max_latency_ms > self.min_latency_ms {
            let mut rng = rand::thread_rng();
            rng.gen_range(self.min_latency_ms..self.max_latency_ms)
        } else {
            self.min_latency_ms
        };
        tokio::time::sleep(Duration::from_millis(latency_ms)).await;
        let samples = vec![0.4; text.chars().count() * 160];
        Ok(AudioClip::new(samples, 16_000))
    }

    fn service_name(&self) -> &str {
        "scripted-tts"
    }
}

/// Null speaker that logs each clip it starts rendering
struct LogSink {
    played: Mutex<Vec<usize>>,
    level_bits: AtomicU32,
    stop: Notify,
    speed: f64,
}

impl LogSink {
    fn with_speed(speed: f64) -> Arc<Self> {
        Arc::new(Self {
            played: Mutex::new(Vec::new()),
            level_bits: AtomicU32::new(0f32.to_bits()),
            stop: Notify::new(),
            speed,
        })
    }

    fn played(&self) -> Vec<usize> {
        self.played.lock().clone()
    }
}

#[async_trait]
impl AudioSink for LogSink {
    async fn play(&self, clip: AudioClip) -> Result<PlayOutcome> {
        self.played.lock().push(clip.samples.len());
        self.level_bits
            .store(clip.rms().to_bits(), Ordering::Relaxed);
        let duration = clip.duration().div_f64(self.speed);
        let outcome = tokio::select! {
            _ = tokio::time::sleep(duration) => PlayOutcome::Completed,
            _ = self.stop.notified() => PlayOutcome::Stopped,
        };
        self.level_bits.store(0f32.to_bits(), Ordering::Relaxed);
        Ok(outcome)
    }

    fn stop(&self) {
        self.stop.notify_waiters();
    }

    fn output_level(&self) -> f32 {
        f32::from_bits(self.level_bits.load(Ordering::Relaxed))
    }
}

struct TestRig {
    source: Arc<ScriptedSource>,
    sink: Arc<LogSink>,
    components: CallComponents,
}

/// Scripted components around a 2ms-per-frame microphone
fn rig(stt: &[SttScript], chat: &[GenScript], sink_speed: f64) -> TestRig {
    let source = Arc::new(ScriptedSource::new(
        SampleRate::Hz16000,
        Duration::from_millis(2),
    ));
    source.set_level(0.01);
    let sink = LogSink::with_speed(sink_speed);
    let components = CallComponents {
        source: source.clone(),
        sink: sink.clone(),
        transcriber: Arc::new(ScriptedTranscriber::new(stt)),
        generator: Arc::new(ScriptedGenerator::new(chat)),
        synthesizer: Arc::new(ScriptedSynth::fixed(5)),
    };
    TestRig {
        source,
        sink,
        components,
    }
}

fn test_settings() -> Settings {
    let mut settings = Settings::default();
    // 8 calibration frames instead of the production window
    settings.vad.calibration_ms = 240;
    settings
}

/// Queue one utterance: 20 speech frames, then enough silence to cut it
fn speak_then_pause(source: &ScriptedSource) {
    let mut levels = vec![0.3; 20];
    levels.extend([0.01; 14]);
    source.push_levels(&levels);
}

async fn wait_for_event(
    rx: &mut broadcast::Receiver<CallEvent>,
    what: &str,
    mut pred: impl FnMut(&CallEvent) -> bool,
) -> CallEvent {
    let waited = timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(e) => panic!("event stream closed while waiting for {what}: {e}"),
            }
        }
    })
    .await;
    match waited {
        Ok(event) => event,
        Err(_) => panic!("timed out waiting for {what}"),
    }
}

fn drain_events(rx: &mut broadcast::Receiver<CallEvent>) -> Vec<CallEvent> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    events
}

/// Sentences play in enqueue order no matter how synthesis latencies land
#[tokio::test]
async fn test_playback_order_survives_random_synthesis_latency() {
    let sink = LogSink::with_speed(50.0);
    let queue = SpeechQueue::new(
        Arc::new(ScriptedSynth::random(5, 40)),
        sink.clone(),
        None,
    );

    let sentences = ["a", "bb", "ccc", "dddd", "eeeee"];
    queue.begin();
    for text in sentences {
        queue.enqueue(text);
    }
    queue.finish();
    timeout(Duration::from_secs(5), queue.wait_idle())
        .await
        .expect("queue never went idle");

    let expected: Vec<usize> = sentences.iter().map(|s| s.len() * 160).collect();
    assert_eq!(sink.played(), expected);
    queue.shutdown();
}

/// A fresh call calibrates, reaches listening, and stops cleanly
#[tokio::test]
async fn test_call_calibrates_then_listens() {
    let rig = rig(&[], &[], 20.0);
    let (handle, task) = VoiceCall::spawn(rig.components.clone(), test_settings());
    let mut events = handle.subscribe();

    wait_for_event(&mut events, "listening phase", |ev| {
        matches!(ev, CallEvent::PhaseChanged(CallPhase::Listening))
    })
    .await;
    let calibrated = wait_for_event(&mut events, "calibration", |ev| {
        matches!(ev, CallEvent::Calibrated { .. })
    })
    .await;
    if let CallEvent::Calibrated { noise_floor } = calibrated {
        assert!((noise_floor - 0.01).abs() < 1e-3);
    }

    handle.stop().await;
    assert_eq!(task.await.unwrap(), EndReason::Stopped);
    wait_for_event(&mut events, "ended event", |ev| {
        matches!(ev, CallEvent::Ended(EndReason::Stopped))
    })
    .await;
    assert!(handle.is_ended());
}

/// Full turn: utterance in, two sentences out, back to listening
#[tokio::test]
async fn test_full_turn_speaks_two_sentences_in_order() {
    let rig = rig(&[], &[], 20.0);
    let (handle, task) = VoiceCall::spawn(rig.components.clone(), test_settings());
    let mut events = handle.subscribe();

    wait_for_event(&mut events, "calibration", |ev| {
        matches!(ev, CallEvent::Calibrated { .. })
    })
    .await;
    speak_then_pause(&rig.source);

    wait_for_event(&mut events, "speech start", |ev| {
        matches!(ev, CallEvent::SpeechStarted)
    })
    .await;
    wait_for_event(&mut events, "speech end", |ev| {
        matches!(ev, CallEvent::SpeechEnded)
    })
    .await;
    let transcript = wait_for_event(&mut events, "transcript", |ev| {
        matches!(ev, CallEvent::TranscriptReady(_))
    })
    .await;
    if let CallEvent::TranscriptReady(t) = transcript {
        assert_eq!(t.text, DEFAULT_TRANSCRIPT);
    }

    let first = wait_for_event(&mut events, "first sentence", |ev| {
        matches!(ev, CallEvent::AssistantSentence(_))
    })
    .await;
    if let CallEvent::AssistantSentence(text) = &first {
        assert_eq!(text, "It is sunny out there.");
    }
    let second = wait_for_event(&mut events, "second sentence", |ev| {
        matches!(ev, CallEvent::AssistantSentence(_))
    })
    .await;
    if let CallEvent::AssistantSentence(text) = &second {
        assert_eq!(text, "It should stay warm all afternoon.");
    }

    wait_for_event(&mut events, "speaking phase", |ev| {
        matches!(ev, CallEvent::PhaseChanged(CallPhase::Speaking))
    })
    .await;
    let completed = wait_for_event(&mut events, "turn completion", |ev| {
        matches!(ev, CallEvent::TurnCompleted(_))
    })
    .await;
    if let CallEvent::TurnCompleted(usage) = completed {
        assert_eq!(usage.turn, 1);
        assert_eq!(usage.sentences, 2);
        assert!(!usage.interrupted);
        assert!(usage.response_chars > 0);
        assert!(usage.estimated_cost_usd > 0.0);
    }
    wait_for_event(&mut events, "listening again", |ev| {
        matches!(ev, CallEvent::PhaseChanged(CallPhase::Listening))
    })
    .await;

    let played = rig.sink.played();
    assert_eq!(played.len(), 2);
    assert_eq!(played[0], "It is sunny out there.".chars().count() * 160);
    assert_eq!(
        played[1],
        "It should stay warm all afternoon.".chars().count() * 160
    );

    handle.stop().await;
    assert_eq!(task.await.unwrap(), EndReason::Stopped);
}

/// Loud speech during playback discards the rest of the response fast
#[tokio::test]
async fn test_barge_in_interrupts_playback() {
    let chat = [GenScript::Reply(
        "This first sentence is fairly long indeed. And the second sentence will never be heard.",
    )];
    let rig = rig(&[], &chat, 5.0);
    let (handle, task) = VoiceCall::spawn(rig.components.clone(), test_settings());
    let mut events = handle.subscribe();

    wait_for_event(&mut events, "calibration", |ev| {
        matches!(ev, CallEvent::Calibrated { .. })
    })
    .await;
    speak_then_pause(&rig.source);
    wait_for_event(&mut events, "speaking phase", |ev| {
        matches!(ev, CallEvent::PhaseChanged(CallPhase::Speaking))
    })
    .await;

    // Caller talks over the assistant, well above the leakage bar
    let barge_at = Instant::now();
    rig.source.set_level(0.9);
    let completed = wait_for_event(&mut events, "interrupted turn", |ev| {
        matches!(ev, CallEvent::TurnCompleted(_))
    })
    .await;
    let reaction = barge_at.elapsed();
    if let CallEvent::TurnCompleted(usage) = completed {
        assert!(usage.interrupted);
    }
    wait_for_event(&mut events, "listening after barge-in", |ev| {
        matches!(ev, CallEvent::PhaseChanged(CallPhase::Listening))
    })
    .await;
    assert!(
        reaction < Duration::from_millis(500),
        "barge-in took {reaction:?}"
    );

    // Only the first clip ever started; the second was discarded
    assert!(rig.sink.played().len() <= 1);

    rig.source.set_level(0.01);
    handle.stop().await;
    assert_eq!(task.await.unwrap(), EndReason::Stopped);
}

/// Speech below the interrupt bar never cuts playback
#[tokio::test]
async fn test_sub_threshold_speech_does_not_interrupt() {
    let rig = rig(&[], &[], 20.0);
    let (handle, task) = VoiceCall::spawn(rig.components.clone(), test_settings());
    let mut events = handle.subscribe();

    wait_for_event(&mut events, "calibration", |ev| {
        matches!(ev, CallEvent::Calibrated { .. })
    })
    .await;
    speak_then_pause(&rig.source);
    wait_for_event(&mut events, "speaking phase", |ev| {
        matches!(ev, CallEvent::PhaseChanged(CallPhase::Speaking))
    })
    .await;

    // Audible but below eight times the noise floor and the leakage bar
    rig.source.set_level(0.05);
    let completed = wait_for_event(&mut events, "turn completion", |ev| {
        matches!(ev, CallEvent::TurnCompleted(_))
    })
    .await;
    if let CallEvent::TurnCompleted(usage) = completed {
        assert!(!usage.interrupted);
        assert_eq!(usage.sentences, 2);
    }
    assert_eq!(rig.sink.played().len(), 2);

    rig.source.set_level(0.01);
    handle.stop().await;
    assert_eq!(task.await.unwrap(), EndReason::Stopped);
}

/// Stopping twice, and stopping an ended call, is harmless
#[tokio::test]
async fn test_stop_is_idempotent() {
    let manager = CallManager::new();
    let rig = rig(&[], &[], 20.0);
    let handle = manager
        .start_call(rig.components.clone(), test_settings())
        .unwrap();
    let mut events = handle.subscribe();
    wait_for_event(&mut events, "listening phase", |ev| {
        matches!(ev, CallEvent::PhaseChanged(CallPhase::Listening))
    })
    .await;
    assert!(manager.active_call().is_some());

    assert_eq!(manager.stop_call().await, Some(EndReason::Stopped));
    assert!(manager.stop_call().await.is_none());
    assert!(manager.active_call().is_none());

    // Late commands on the dead handle are dropped silently
    handle.stop().await;
    handle.interrupt().await;

    let ended: Vec<_> = drain_events(&mut events)
        .into_iter()
        .filter(|ev| matches!(ev, CallEvent::Ended(_)))
        .collect();
    assert_eq!(ended.len(), 1);
}

/// A second session is refused until the first is fully torn down
#[tokio::test]
async fn test_single_session_enforced() {
    let manager = CallManager::new();
    let first = rig(&[], &[], 20.0);
    let handle = manager
        .start_call(first.components.clone(), test_settings())
        .unwrap();
    let mut events = handle.subscribe();
    wait_for_event(&mut events, "listening phase", |ev| {
        matches!(ev, CallEvent::PhaseChanged(CallPhase::Listening))
    })
    .await;

    let second = rig(&[], &[], 20.0);
    let refused = manager.start_call(second.components.clone(), test_settings());
    assert!(matches!(refused, Err(CallError::SessionActive)));

    manager.stop_call().await;

    // The slot is free again once the previous call has fully ended
    let third = rig(&[], &[], 20.0);
    let replacement = manager
        .start_call(third.components.clone(), test_settings())
        .unwrap();
    assert!(!replacement.is_ended());
    manager.stop_call().await;
}

/// A transcription timeout is reported and the call keeps listening
#[tokio::test]
async fn test_stt_timeout_keeps_call_alive() {
    let stt = [
        SttScript::Timeout,
        SttScript::Text("Second try goes through."),
    ];
    let rig = rig(&stt, &[], 20.0);
    let (handle, task) = VoiceCall::spawn(rig.components.clone(), test_settings());
    let mut events = handle.subscribe();

    wait_for_event(&mut events, "calibration", |ev| {
        matches!(ev, CallEvent::Calibrated { .. })
    })
    .await;
    speak_then_pause(&rig.source);

    wait_for_event(&mut events, "timeout notice", |ev| {
        matches!(ev, CallEvent::Notice(_))
    })
    .await;
    wait_for_event(&mut events, "listening after timeout", |ev| {
        matches!(ev, CallEvent::PhaseChanged(CallPhase::Listening))
    })
    .await;
    let seen = drain_events(&mut events);
    assert!(
        !seen
            .iter()
            .any(|ev| matches!(ev, CallEvent::PhaseChanged(CallPhase::Thinking))),
        "failed turn must not reach thinking"
    );

    // The next utterance transcribes normally
    speak_then_pause(&rig.source);
    let transcript = wait_for_event(&mut events, "recovered transcript", |ev| {
        matches!(ev, CallEvent::TranscriptReady(_))
    })
    .await;
    if let CallEvent::TranscriptReady(t) = transcript {
        assert_eq!(t.text, "Second try goes through.");
    }

    handle.stop().await;
    assert_eq!(task.await.unwrap(), EndReason::Stopped);
}

/// Punctuation-only transcripts go straight back to listening
#[tokio::test]
async fn test_empty_transcript_never_reaches_thinking() {
    let stt = [SttScript::Text("..."), SttScript::Text("Now some real words.")];
    let rig = rig(&stt, &[], 20.0);
    let (handle, task) = VoiceCall::spawn(rig.components.clone(), test_settings());
    let mut events = handle.subscribe();

    wait_for_event(&mut events, "calibration", |ev| {
        matches!(ev, CallEvent::Calibrated { .. })
    })
    .await;
    speak_then_pause(&rig.source);

    wait_for_event(&mut events, "transcribing phase", |ev| {
        matches!(ev, CallEvent::PhaseChanged(CallPhase::Transcribing))
    })
    .await;
    wait_for_event(&mut events, "listening after empty transcript", |ev| {
        matches!(ev, CallEvent::PhaseChanged(CallPhase::Listening))
    })
    .await;
    let seen = drain_events(&mut events);
    assert!(!seen.iter().any(|ev| {
        matches!(
            ev,
            CallEvent::PhaseChanged(CallPhase::Thinking) | CallEvent::TranscriptReady(_)
        )
    }));

    speak_then_pause(&rig.source);
    let transcript = wait_for_event(&mut events, "substantial transcript", |ev| {
        matches!(ev, CallEvent::TranscriptReady(_))
    })
    .await;
    if let CallEvent::TranscriptReady(t) = transcript {
        assert_eq!(t.text, "Now some real words.");
    }

    handle.stop().await;
    assert_eq!(task.await.unwrap(), EndReason::Stopped);
}

/// Muted utterances are discarded; unmuting re-arms transcription
#[tokio::test]
async fn test_mute_blocks_next_speech_end() {
    let rig = rig(&[], &[], 20.0);
    let (handle, task) = VoiceCall::spawn(rig.components.clone(), test_settings());
    let mut events = handle.subscribe();

    wait_for_event(&mut events, "calibration", |ev| {
        matches!(ev, CallEvent::Calibrated { .. })
    })
    .await;

    handle.set_mute(true).await;
    wait_for_event(&mut events, "mute on", |ev| {
        matches!(ev, CallEvent::MuteChanged(true))
    })
    .await;

    speak_then_pause(&rig.source);
    wait_for_event(&mut events, "speech start while muted", |ev| {
        matches!(ev, CallEvent::SpeechStarted)
    })
    .await;
    // Let the scripted utterance finish and get discarded
    tokio::time::sleep(Duration::from_millis(200)).await;
    let seen = drain_events(&mut events);
    assert!(!seen.iter().any(|ev| {
        matches!(
            ev,
            CallEvent::SpeechEnded | CallEvent::PhaseChanged(CallPhase::Transcribing)
        )
    }));

    handle.set_mute(false).await;
    wait_for_event(&mut events, "mute off", |ev| {
        matches!(ev, CallEvent::MuteChanged(false))
    })
    .await;
    speak_then_pause(&rig.source);
    wait_for_event(&mut events, "transcript after unmute", |ev| {
        matches!(ev, CallEvent::TranscriptReady(_))
    })
    .await;

    handle.stop().await;
    assert_eq!(task.await.unwrap(), EndReason::Stopped);
}

/// In push-to-talk mode only the release command finalizes the chunk
#[tokio::test]
async fn test_ptt_release_finalizes_utterance() {
    let rig = rig(&[], &[], 20.0);
    let mut settings = test_settings();
    settings.call.mode = CallMode::PushToTalk;
    let (handle, task) = VoiceCall::spawn(rig.components.clone(), settings);
    let mut events = handle.subscribe();

    wait_for_event(&mut events, "calibration", |ev| {
        matches!(ev, CallEvent::Calibrated { .. })
    })
    .await;
    speak_then_pause(&rig.source);
    wait_for_event(&mut events, "speech start", |ev| {
        matches!(ev, CallEvent::SpeechStarted)
    })
    .await;

    // Far longer than the silence threshold; nothing should finalize
    tokio::time::sleep(Duration::from_millis(200)).await;
    let seen = drain_events(&mut events);
    assert!(!seen.iter().any(|ev| matches!(ev, CallEvent::SpeechEnded)));

    handle.ptt_release().await;
    wait_for_event(&mut events, "speech end on release", |ev| {
        matches!(ev, CallEvent::SpeechEnded)
    })
    .await;
    wait_for_event(&mut events, "transcript after release", |ev| {
        matches!(ev, CallEvent::TranscriptReady(_))
    })
    .await;

    handle.stop().await;
    assert_eq!(task.await.unwrap(), EndReason::Stopped);
}

/// The max-duration watchdog ends a silent call on its own
#[tokio::test]
async fn test_max_duration_watchdog_fires() {
    let rig = rig(&[], &[], 20.0);
    let mut settings = test_settings();
    settings.call.max_duration_secs = 1;
    let (handle, task) = VoiceCall::spawn(rig.components.clone(), settings);
    let mut events = handle.subscribe();

    let reason = timeout(Duration::from_secs(3), task)
        .await
        .expect("watchdog never fired")
        .unwrap();
    assert_eq!(reason, EndReason::MaxDurationReached);
    wait_for_event(&mut events, "ended by watchdog", |ev| {
        matches!(ev, CallEvent::Ended(EndReason::MaxDurationReached))
    })
    .await;
    assert!(handle.is_ended());
}

/// Three consecutive failed turns end the call
#[tokio::test]
async fn test_consecutive_failures_end_call() {
    let stt = [
        SttScript::Unavailable,
        SttScript::Unavailable,
        SttScript::Unavailable,
    ];
    let rig = rig(&stt, &[], 20.0);
    let (_handle, task) = VoiceCall::spawn(rig.components.clone(), test_settings());

    // Three utterances, each hitting the scripted outage
    let mut levels = Vec::new();
    for _ in 0..3 {
        levels.extend(vec![0.3; 20]);
        levels.extend(vec![0.01; 14]);
    }
    rig.source.push_levels(&levels);

    let reason = timeout(Duration::from_secs(5), task)
        .await
        .expect("call never gave up")
        .unwrap();
    assert_eq!(reason, EndReason::TooManyFailures);
}

/// A first-token timeout speaks the configured fallback line
#[tokio::test]
async fn test_first_token_timeout_speaks_fallback() {
    let rig = rig(&[], &[GenScript::FirstTokenTimeout], 20.0);
    let settings = test_settings();
    let fallback = settings.services.fallback_reply.clone();
    let (handle, task) = VoiceCall::spawn(rig.components.clone(), settings);
    let mut events = handle.subscribe();

    wait_for_event(&mut events, "calibration", |ev| {
        matches!(ev, CallEvent::Calibrated { .. })
    })
    .await;
    speak_then_pause(&rig.source);

    let sentence = wait_for_event(&mut events, "fallback sentence", |ev| {
        matches!(ev, CallEvent::AssistantSentence(_))
    })
    .await;
    if let CallEvent::AssistantSentence(text) = sentence {
        assert_eq!(text, fallback);
    }
    let completed = wait_for_event(&mut events, "turn completion", |ev| {
        matches!(ev, CallEvent::TurnCompleted(_))
    })
    .await;
    if let CallEvent::TurnCompleted(usage) = completed {
        assert_eq!(usage.sentences, 1);
    }
    wait_for_event(&mut events, "still listening", |ev| {
        matches!(ev, CallEvent::PhaseChanged(CallPhase::Listening))
    })
    .await;
    assert_eq!(rig.sink.played().len(), 1);

    handle.stop().await;
    assert_eq!(task.await.unwrap(), EndReason::Stopped);
}
