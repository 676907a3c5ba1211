//! Call session orchestration
//!
//! One spawned task owns the whole call: it pulls microphone frames,
//! runs voice activity detection, and drives each turn through
//! transcription, generation, and the ordered playback queue. Controls
//! arrive on a command channel; everything observable leaves on a
//! broadcast channel, so any number of frontends can follow along.
//!
//! Phase loop: listening -> transcribing -> thinking -> speaking ->
//! listening, with barge-in cutting speaking short and `Ended`
//! reachable from every phase.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

use voice_call_config::Settings;
use voice_call_core::{
    AudioChunk, AudioFrame, AudioSink, AudioSource, CallError, CallInfo, CallMode, CallPhase,
    CostModel, EndReason, ResponseGenerator, Result, SpeechSynthesizer, Transcriber, Transcript,
    TurnUsage,
};
use voice_call_llm::ConversationContext;

use crate::capture::Recorder;
use crate::sentence::{SentenceSplitter, SplitterConfig};
use crate::tts::SpeechQueue;
use crate::vad::{AdaptiveVad, VadConfig, VadTick};

const EVENT_CHANNEL_DEPTH: usize = 256;
const COMMAND_CHANNEL_DEPTH: usize = 16;

/// Controls accepted by a running call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallCommand {
    /// End the call and release every resource
    Stop,
    /// Set microphone mute; frames keep flowing but utterances are
    /// discarded instead of transcribed
    SetMute(bool),
    /// Flip the mute flag
    ToggleMute,
    /// Push-to-talk release; finalizes the held utterance
    PttRelease,
    /// Cut the assistant off as if the caller had spoken over it
    Interrupt,
}

/// Events broadcast by a running call
#[derive(Debug, Clone)]
pub enum CallEvent {
    /// The call moved to a new phase
    PhaseChanged(CallPhase),
    /// Ambient noise calibration finished
    Calibrated { noise_floor: f32 },
    /// The caller started speaking
    SpeechStarted,
    /// The caller's utterance was finalized
    SpeechEnded,
    /// A transcript came back and was accepted
    TranscriptReady(Transcript),
    /// One raw token of assistant output
    AssistantDelta(String),
    /// One sentence handed to synthesis
    AssistantSentence(String),
    /// Measurements for a finished turn
    TurnCompleted(TurnUsage),
    /// Mute was toggled
    MuteChanged(bool),
    /// A non-fatal problem worth surfacing to the caller
    Notice(String),
    /// The call is over
    Ended(EndReason),
}

/// Pluggable endpoints of one call
///
/// Everything is trait objects so tests can swap in scripted doubles
/// and the binary can pick device or file backed audio at runtime.
#[derive(Clone)]
pub struct CallComponents {
    pub source: Arc<dyn AudioSource>,
    pub sink: Arc<dyn AudioSink>,
    pub transcriber: Arc<dyn Transcriber>,
    pub generator: Arc<dyn ResponseGenerator>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
}

/// Cloneable handle to a running call
///
/// Command sends after the call ends are dropped silently, so every
/// control method is safe to race against teardown.
#[derive(Clone)]
pub struct CallHandle {
    info: CallInfo,
    commands: mpsc::Sender<CallCommand>,
    events: broadcast::Sender<CallEvent>,
    phase: watch::Receiver<CallPhase>,
}

impl CallHandle {
    pub fn info(&self) -> &CallInfo {
        &self.info
    }

    /// Subscribe to the call's event stream
    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.events.subscribe()
    }

    /// Current phase
    pub fn phase(&self) -> CallPhase {
        *self.phase.borrow()
    }

    /// Watch phase transitions
    pub fn phase_watch(&self) -> watch::Receiver<CallPhase> {
        self.phase.clone()
    }

    pub fn is_ended(&self) -> bool {
        self.phase().is_terminal()
    }

    pub async fn stop(&self) {
        self.send(CallCommand::Stop).await;
    }

    pub async fn interrupt(&self) {
        self.send(CallCommand::Interrupt).await;
    }

    pub async fn set_mute(&self, muted: bool) {
        self.send(CallCommand::SetMute(muted)).await;
    }

    pub async fn toggle_mute(&self) {
        self.send(CallCommand::ToggleMute).await;
    }

    pub async fn ptt_release(&self) {
        self.send(CallCommand::PttRelease).await;
    }

    async fn send(&self, command: CallCommand) {
        let _ = self.commands.send(command).await;
    }
}

/// What one listening pass produced
enum Listened {
    /// A finalized utterance ready for transcription
    Chunk(AudioChunk),
    /// The call should end instead
    End(EndReason),
}

/// How the generation and playback half of a turn went
struct TurnFlow {
    /// Full generated text, possibly partial on interrupt
    response: String,
    /// Barge-in cut playback short
    interrupted: bool,
    /// The turn produced nothing the caller asked for
    failed: bool,
    /// Set when a command or the watchdog ended the call mid-turn
    ended: Option<EndReason>,
}

/// The call driver; owns all per-call state
///
/// Built by [`VoiceCall::spawn`], which hands back a [`CallHandle`] and
/// the task handle resolving to the end reason. Every exit path runs
/// the same teardown: queue shutdown, sink stop, source close.
pub struct VoiceCall {
    components: CallComponents,
    settings: Settings,
    info: CallInfo,
    vad: AdaptiveVad,
    recorder: Recorder,
    queue: SpeechQueue,
    context: ConversationContext,
    splitter_config: SplitterConfig,
    cost: CostModel,
    events: broadcast::Sender<CallEvent>,
    phase_tx: watch::Sender<CallPhase>,
    muted: bool,
    consecutive_failures: u32,
    turn: u32,
    deadline: Option<tokio::time::Instant>,
}

impl VoiceCall {
    /// Spawn a call task; must run inside a tokio runtime
    pub fn spawn(
        components: CallComponents,
        settings: Settings,
    ) -> (CallHandle, JoinHandle<EndReason>) {
        let info = CallInfo::new(settings.call.mode, settings.call.max_duration_secs);
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_DEPTH);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_DEPTH);
        let (phase_tx, phase_rx) = watch::channel(CallPhase::Idle);

        let vad = AdaptiveVad::new(VadConfig::from_settings(&settings.vad));
        let recorder = Recorder::new(
            settings.audio.capture_rate(),
            Duration::from_secs(settings.audio.max_utterance_secs),
        );
        let queue = SpeechQueue::new(
            Arc::clone(&components.synthesizer),
            Arc::clone(&components.sink),
            settings.services.voice.clone(),
        );
        let context = match settings.call.system_prompt.as_deref() {
            Some(prompt) => ConversationContext::with_system(settings.call.context_max_turns, prompt),
            None => ConversationContext::new(settings.call.context_max_turns),
        };
        let splitter_config = SplitterConfig {
            min_first_chars: settings.call.min_first_sentence_chars,
            max_buffer_chars: settings.call.max_sentence_buffer_chars,
        };
        let cost = settings.cost.cost_model();

        let handle = CallHandle {
            info: info.clone(),
            commands: command_tx,
            events: event_tx.clone(),
            phase: phase_rx,
        };
        let call = VoiceCall {
            components,
            settings,
            info,
            vad,
            recorder,
            queue,
            context,
            splitter_config,
            cost,
            events: event_tx,
            phase_tx,
            muted: false,
            consecutive_failures: 0,
            turn: 0,
            deadline: None,
        };
        let task = tokio::spawn(call.run(command_rx));
        (handle, task)
    }

    async fn run(mut self, mut commands: mpsc::Receiver<CallCommand>) -> EndReason {
        tracing::info!(call_id = %self.info.id, mode = ?self.info.mode, "call started");
        let reason = match self.run_call(&mut commands).await {
            Ok(reason) => reason,
            Err(e) => {
                tracing::error!(error = %e, kind = e.kind(), "call aborted");
                EndReason::Fatal(e.to_string())
            }
        };
        self.teardown().await;
        self.set_phase(CallPhase::Ended);
        self.emit(CallEvent::Ended(reason.clone()));
        tracing::info!(call_id = %self.info.id, reason = %reason, turns = self.turn, "call ended");
        reason
    }

    async fn run_call(&mut self, commands: &mut mpsc::Receiver<CallCommand>) -> Result<EndReason> {
        let mut frames = self
            .components
            .source
            .open(self.settings.vad.frame_ms)
            .await?;
        if !self.info.is_unlimited() {
            self.deadline = Some(
                tokio::time::Instant::now()
                    + Duration::from_secs(self.info.max_duration_secs as u64),
            );
        }
        self.set_phase(CallPhase::Listening);
        if let Some(reason) = self.calibrate(&mut frames, commands).await? {
            return Ok(reason);
        }
        loop {
            let chunk = match self.listen(&mut frames, commands).await? {
                Listened::Chunk(chunk) => chunk,
                Listened::End(reason) => return Ok(reason),
            };
            if let Some(reason) = self.take_turn(chunk, &mut frames, commands).await? {
                return Ok(reason);
            }
        }
    }

    /// Sample ambient noise until the detector settles on a baseline
    async fn calibrate(
        &mut self,
        frames: &mut mpsc::Receiver<AudioFrame>,
        commands: &mut mpsc::Receiver<CallCommand>,
    ) -> Result<Option<EndReason>> {
        self.vad.calibrate(self.settings.vad.calibration_ms);
        loop {
            tokio::select! {
                maybe = frames.recv() => {
                    let frame = maybe.ok_or_else(Self::capture_lost)?;
                    if let VadTick::Calibrated { noise_floor, .. } =
                        self.vad.process_frame(frame.rms)
                    {
                        self.emit(CallEvent::Calibrated { noise_floor });
                        return Ok(None);
                    }
                }
                cmd = commands.recv() => match cmd {
                    Some(CallCommand::Stop) | None => return Ok(Some(EndReason::Stopped)),
                    Some(CallCommand::SetMute(muted)) => self.apply_mute(muted),
                    Some(CallCommand::ToggleMute) => self.apply_mute(!self.muted),
                    Some(_) => {}
                },
                _ = maybe_deadline(self.deadline) => {
                    return Ok(Some(EndReason::MaxDurationReached));
                }
            }
        }
    }

    /// Record until an utterance is finalized or the call ends
    ///
    /// Continuous mode finalizes on sustained silence; push-to-talk
    /// finalizes on the release command. Either way a full buffer
    /// forces the cut. While muted, finalized utterances are discarded
    /// and listening continues.
    async fn listen(
        &mut self,
        frames: &mut mpsc::Receiver<AudioFrame>,
        commands: &mut mpsc::Receiver<CallCommand>,
    ) -> Result<Listened> {
        self.set_phase(CallPhase::Listening);
        self.vad.reset();
        self.recorder.start();
        let mut speech_announced = false;
        let silence_ms = self.settings.vad.silence_threshold_ms;
        let min_chunk = Duration::from_millis(self.settings.audio.min_chunk_ms);

        loop {
            tokio::select! {
                maybe = frames.recv() => {
                    let frame = maybe.ok_or_else(Self::capture_lost)?;
                    self.recorder.push(&frame);
                    let tick = self.vad.process_frame(frame.rms);
                    if matches!(tick, VadTick::SpeechConfirmed) && !speech_announced {
                        speech_announced = true;
                        self.emit(CallEvent::SpeechStarted);
                    }

                    let silence_cut = self.info.mode == CallMode::Continuous
                        && self.vad.has_speech_ended(silence_ms);
                    if silence_cut || self.recorder.is_full() {
                        if self.recorder.is_full() {
                            tracing::debug!("utterance buffer full, forcing cut");
                        }
                        match self.finalize_utterance(min_chunk) {
                            Some(chunk) => return Ok(Listened::Chunk(chunk)),
                            None => speech_announced = false,
                        }
                    }
                }
                cmd = commands.recv() => match cmd {
                    Some(CallCommand::Stop) | None => {
                        return Ok(Listened::End(EndReason::Stopped));
                    }
                    Some(CallCommand::PttRelease) => {
                        if self.info.mode == CallMode::PushToTalk {
                            match self.finalize_utterance(min_chunk) {
                                Some(chunk) => return Ok(Listened::Chunk(chunk)),
                                None => speech_announced = false,
                            }
                        } else {
                            tracing::debug!("ptt release ignored in continuous mode");
                        }
                    }
                    Some(CallCommand::SetMute(muted)) => self.apply_mute(muted),
                    Some(CallCommand::ToggleMute) => self.apply_mute(!self.muted),
                    // Nothing is playing while listening
                    Some(CallCommand::Interrupt) => {}
                },
                _ = maybe_deadline(self.deadline) => {
                    return Ok(Listened::End(EndReason::MaxDurationReached));
                }
            }
        }
    }

    /// Cut the current utterance; None means listening continues
    ///
    /// Muted or too-short utterances are dropped and the recorder is
    /// re-armed in place.
    fn finalize_utterance(&mut self, min_chunk: Duration) -> Option<AudioChunk> {
        if self.muted {
            tracing::debug!("utterance discarded while muted");
            self.recorder.start();
            self.vad.reset();
            return None;
        }
        let chunk = self.recorder.finalize();
        self.emit(CallEvent::SpeechEnded);
        if chunk.duration < min_chunk {
            tracing::debug!(ms = chunk.duration.as_millis() as u64, "utterance too short, dropped");
            self.recorder.start();
            self.vad.reset();
            return None;
        }
        Some(chunk)
    }

    /// One full turn: transcribe, generate, speak
    ///
    /// Returns `Some(reason)` when the call must end.
    async fn take_turn(
        &mut self,
        chunk: AudioChunk,
        frames: &mut mpsc::Receiver<AudioFrame>,
        commands: &mut mpsc::Receiver<CallCommand>,
    ) -> Result<Option<EndReason>> {
        let turn_started = Instant::now();
        let played_before = self.queue.units_played();
        let synth_before = self.queue.synth_ms_total();
        self.turn += 1;
        let mut usage = TurnUsage {
            turn: self.turn,
            audio_secs: chunk.duration_secs(),
            ..Default::default()
        };

        self.set_phase(CallPhase::Transcribing);
        let stt_started = Instant::now();
        let language = self.settings.services.language.clone();
        let transcript = match self
            .components
            .transcriber
            .transcribe(&chunk, Some(&language))
            .await
        {
            Ok(transcript) => transcript,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    service = self.components.transcriber.service_name(),
                    "transcription failed"
                );
                self.emit(CallEvent::Notice(format!("transcription failed: {e}")));
                return Ok(self.note_failure());
            }
        };
        usage.stt_ms = stt_started.elapsed().as_millis() as u64;

        if !transcript.is_substantial() {
            tracing::debug!("transcript empty, resuming listening");
            return Ok(None);
        }
        self.emit(CallEvent::TranscriptReady(transcript.clone()));
        self.context.push_user(transcript.text.clone());

        self.set_phase(CallPhase::Thinking);
        let flow = self.speak_response(frames, commands, &mut usage).await?;

        if let Some(reason) = flow.ended {
            return Ok(Some(reason));
        }

        usage.interrupted = flow.interrupted;
        usage.sentences = (self.queue.units_played() - played_before) as u32;
        usage.tts_ms = self.queue.synth_ms_total().saturating_sub(synth_before);
        usage.response_chars = flow.response.chars().count() as u32;
        usage.total_ms = turn_started.elapsed().as_millis() as u64;
        usage.estimated_cost_usd = self.cost.estimate(&usage);
        tracing::info!(
            turn = usage.turn,
            stt_ms = usage.stt_ms,
            llm_first_token_ms = usage.llm_first_token_ms,
            llm_total_ms = usage.llm_total_ms,
            tts_ms = usage.tts_ms,
            sentences = usage.sentences,
            interrupted = usage.interrupted,
            total_ms = usage.total_ms,
            "turn complete"
        );
        self.emit(CallEvent::TurnCompleted(usage));
        self.vad.reset();

        if flow.failed {
            return Ok(self.note_failure());
        }
        self.consecutive_failures = 0;
        if !flow.response.is_empty() {
            self.context.push_assistant(flow.response);
        }
        Ok(None)
    }

    /// Stream the response into the queue and wait for playback
    ///
    /// Frames keep flowing the whole time; every one is checked against
    /// the barge-in threshold scaled by current playback leakage.
    async fn speak_response(
        &mut self,
        frames: &mut mpsc::Receiver<AudioFrame>,
        commands: &mut mpsc::Receiver<CallCommand>,
        usage: &mut TurnUsage,
    ) -> Result<TurnFlow> {
        let (delta_tx, mut deltas) = mpsc::channel::<String>(64);
        let generator = Arc::clone(&self.components.generator);
        let messages = self.context.messages();
        let llm_started = Instant::now();
        let gen_task = tokio::spawn(async move { generator.stream(&messages, delta_tx).await });

        self.queue.begin();
        let mut playing_rx = self.queue.playing_watch();
        let mut splitter = SentenceSplitter::new(self.splitter_config.clone());
        let mut response = String::new();
        let mut first_delta_ms: Option<u64> = None;
        let mut speaking = false;
        let leakage_factor = self.settings.audio.leakage_factor;

        // Streaming half: buffer deltas into sentences until the
        // generator's channel closes.
        loop {
            tokio::select! {
                maybe = deltas.recv() => match maybe {
                    Some(delta) => {
                        if first_delta_ms.is_none() {
                            first_delta_ms = Some(llm_started.elapsed().as_millis() as u64);
                        }
                        response.push_str(&delta);
                        self.emit(CallEvent::AssistantDelta(delta.clone()));
                        for sentence in splitter.push(&delta) {
                            self.emit(CallEvent::AssistantSentence(sentence.clone()));
                            self.queue.enqueue(sentence);
                        }
                    }
                    None => break,
                },
                changed = playing_rx.changed(), if !speaking => {
                    if changed.is_err() || *playing_rx.borrow_and_update() {
                        speaking = true;
                        if changed.is_ok() {
                            self.set_phase(CallPhase::Speaking);
                        }
                    }
                }
                maybe = frames.recv() => {
                    let frame = maybe.ok_or_else(Self::capture_lost)?;
                    let expected = self.components.sink.output_level() * leakage_factor;
                    if self.vad.is_interrupt(frame.rms, expected) {
                        gen_task.abort();
                        let discarded = self.queue.interrupt();
                        self.vad.reset();
                        tracing::info!(discarded, "barge-in during response");
                        usage.llm_first_token_ms = first_delta_ms.unwrap_or(0);
                        usage.llm_total_ms = llm_started.elapsed().as_millis() as u64;
                        return Ok(TurnFlow {
                            response,
                            interrupted: true,
                            failed: false,
                            ended: None,
                        });
                    }
                }
                cmd = commands.recv() => match cmd {
                    Some(CallCommand::Stop) | None => {
                        gen_task.abort();
                        self.queue.interrupt();
                        return Ok(TurnFlow {
                            response,
                            interrupted: false,
                            failed: false,
                            ended: Some(EndReason::Stopped),
                        });
                    }
                    Some(CallCommand::Interrupt) => {
                        gen_task.abort();
                        let discarded = self.queue.interrupt();
                        self.vad.reset();
                        tracing::info!(discarded, "interrupt command during response");
                        usage.llm_first_token_ms = first_delta_ms.unwrap_or(0);
                        usage.llm_total_ms = llm_started.elapsed().as_millis() as u64;
                        return Ok(TurnFlow {
                            response,
                            interrupted: true,
                            failed: false,
                            ended: None,
                        });
                    }
                    Some(CallCommand::SetMute(muted)) => self.apply_mute(muted),
                    Some(CallCommand::ToggleMute) => self.apply_mute(!self.muted),
                    Some(CallCommand::PttRelease) => {}
                },
                _ = maybe_deadline(self.deadline) => {
                    gen_task.abort();
                    self.queue.interrupt();
                    return Ok(TurnFlow {
                        response,
                        interrupted: false,
                        failed: false,
                        ended: Some(EndReason::MaxDurationReached),
                    });
                }
            }
        }

        // The delta channel closed, so the generator has returned.
        let gen_result = match gen_task.await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(error = %e, "generation task panicked");
                Err(CallError::ServiceUnavailable(e.to_string()))
            }
        };

        if let Some(rest) = splitter.flush() {
            self.emit(CallEvent::AssistantSentence(rest.clone()));
            self.queue.enqueue(rest);
        }

        let mut failed = false;
        match gen_result {
            Ok(stats) => {
                usage.llm_first_token_ms = stats.first_token_ms.unwrap_or(0);
                usage.llm_total_ms = stats.total_ms;
                if !stats.completed {
                    tracing::debug!("generation stream ended early");
                }
            }
            Err(e) => {
                usage.llm_first_token_ms = first_delta_ms.unwrap_or(0);
                usage.llm_total_ms = llm_started.elapsed().as_millis() as u64;
                if response.is_empty() {
                    failed = true;
                    self.emit(CallEvent::Notice(format!("assistant unavailable: {e}")));
                    if matches!(e, CallError::Timeout { service: "chat", .. }) {
                        tracing::warn!("no first token in time, speaking fallback");
                        let fallback = self.settings.services.fallback_reply.clone();
                        self.emit(CallEvent::AssistantSentence(fallback.clone()));
                        self.queue.enqueue(fallback);
                    } else {
                        tracing::warn!(error = %e, "generation failed");
                    }
                } else {
                    tracing::warn!(error = %e, "generation failed mid-stream, keeping partial response");
                    self.emit(CallEvent::Notice("response was cut short".to_string()));
                }
            }
        }
        self.queue.finish();

        // Playback half: wait for the queue to drain while still
        // watching for barge-in and commands.
        let mut idle_rx = self.queue.idle_watch();
        loop {
            if *idle_rx.borrow_and_update() {
                break;
            }
            tokio::select! {
                changed = idle_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                changed = playing_rx.changed(), if !speaking => {
                    if changed.is_err() || *playing_rx.borrow_and_update() {
                        speaking = true;
                        if changed.is_ok() {
                            self.set_phase(CallPhase::Speaking);
                        }
                    }
                }
                maybe = frames.recv() => {
                    let frame = maybe.ok_or_else(Self::capture_lost)?;
                    let expected = self.components.sink.output_level() * leakage_factor;
                    if self.vad.is_interrupt(frame.rms, expected) {
                        let discarded = self.queue.interrupt();
                        self.vad.reset();
                        tracing::info!(discarded, "barge-in during playback");
                        return Ok(TurnFlow {
                            response,
                            interrupted: true,
                            failed,
                            ended: None,
                        });
                    }
                }
                cmd = commands.recv() => match cmd {
                    Some(CallCommand::Stop) | None => {
                        self.queue.interrupt();
                        return Ok(TurnFlow {
                            response,
                            interrupted: false,
                            failed,
                            ended: Some(EndReason::Stopped),
                        });
                    }
                    Some(CallCommand::Interrupt) => {
                        let discarded = self.queue.interrupt();
                        self.vad.reset();
                        tracing::info!(discarded, "interrupt command during playback");
                        return Ok(TurnFlow {
                            response,
                            interrupted: true,
                            failed,
                            ended: None,
                        });
                    }
                    Some(CallCommand::SetMute(muted)) => self.apply_mute(muted),
                    Some(CallCommand::ToggleMute) => self.apply_mute(!self.muted),
                    Some(CallCommand::PttRelease) => {}
                },
                _ = maybe_deadline(self.deadline) => {
                    self.queue.interrupt();
                    return Ok(TurnFlow {
                        response,
                        interrupted: false,
                        failed,
                        ended: Some(EndReason::MaxDurationReached),
                    });
                }
            }
        }

        Ok(TurnFlow {
            response,
            interrupted: false,
            failed,
            ended: None,
        })
    }

    fn note_failure(&mut self) -> Option<EndReason> {
        self.consecutive_failures += 1;
        let max = self.settings.call.max_consecutive_failures;
        tracing::warn!(
            failures = self.consecutive_failures,
            max,
            "turn failed"
        );
        if self.consecutive_failures >= max {
            Some(EndReason::TooManyFailures)
        } else {
            None
        }
    }

    fn apply_mute(&mut self, muted: bool) {
        if self.muted != muted {
            self.muted = muted;
            tracing::info!(muted, "mute toggled");
            self.emit(CallEvent::MuteChanged(muted));
        }
    }

    fn set_phase(&self, phase: CallPhase) {
        if *self.phase_tx.borrow() != phase {
            self.phase_tx.send_replace(phase);
            tracing::debug!(phase = %phase, "phase changed");
            self.emit(CallEvent::PhaseChanged(phase));
        }
    }

    fn emit(&self, event: CallEvent) {
        // No subscribers is fine; lagging subscribers drop old events
        let _ = self.events.send(event);
    }

    fn capture_lost() -> CallError {
        CallError::DeviceUnavailable("capture stream ended".to_string())
    }

    async fn teardown(&mut self) {
        self.queue.shutdown();
        self.components.sink.stop();
        self.components.source.close().await;
    }
}

/// Sleeps until the watchdog deadline, or forever without one
async fn maybe_deadline(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending::<()>().await,
    }
}

/// Owns at most one live call at a time
///
/// A new call is refused until the previous call's task has finished,
/// which is also the point where its devices and tasks are released.
pub struct CallManager {
    active: Mutex<Option<ActiveCall>>,
}

struct ActiveCall {
    handle: CallHandle,
    task: JoinHandle<EndReason>,
}

impl CallManager {
    pub fn new() -> Self {
        Self {
            active: Mutex::new(None),
        }
    }

    /// Start a call; fails with `SessionActive` while one is running
    pub fn start_call(
        &self,
        components: CallComponents,
        settings: Settings,
    ) -> Result<CallHandle> {
        let mut active = self.active.lock();
        if let Some(call) = active.as_ref() {
            if !call.task.is_finished() {
                return Err(CallError::SessionActive);
            }
        }
        let (handle, task) = VoiceCall::spawn(components, settings);
        let out = handle.clone();
        *active = Some(ActiveCall { handle, task });
        Ok(out)
    }

    /// Handle to the live call, if any
    pub fn active_call(&self) -> Option<CallHandle> {
        self.active
            .lock()
            .as_ref()
            .filter(|call| !call.task.is_finished())
            .map(|call| call.handle.clone())
    }

    /// Stop the live call and wait for its teardown to finish
    pub async fn stop_call(&self) -> Option<EndReason> {
        let call = self.active.lock().take()?;
        call.handle.stop().await;
        match call.task.await {
            Ok(reason) => Some(reason),
            Err(e) => {
                tracing::error!(error = %e, "call task failed");
                None
            }
        }
    }
}

impl Default for CallManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_commands_after_call_end_are_dropped() {
        let (command_tx, command_rx) = mpsc::channel(4);
        let (event_tx, _) = broadcast::channel(8);
        let (_phase_tx, phase_rx) = watch::channel(CallPhase::Ended);
        let handle = CallHandle {
            info: CallInfo::new(CallMode::Continuous, -1),
            commands: command_tx,
            events: event_tx,
            phase: phase_rx,
        };
        drop(command_rx);

        handle.stop().await;
        handle.interrupt().await;
        handle.set_mute(true).await;
        assert!(handle.is_ended());
    }

    #[tokio::test]
    async fn test_manager_starts_empty() {
        let manager = CallManager::new();
        assert!(manager.active_call().is_none());
        assert!(manager.stop_call().await.is_none());
    }

    #[tokio::test]
    async fn test_watchdog_sleep_respects_sentinel() {
        let quick = tokio::time::timeout(
            Duration::from_millis(50),
            maybe_deadline(Some(tokio::time::Instant::now() + Duration::from_millis(10))),
        )
        .await;
        assert!(quick.is_ok());

        let unlimited =
            tokio::time::timeout(Duration::from_millis(50), maybe_deadline(None)).await;
        assert!(unlimited.is_err());
    }
}
