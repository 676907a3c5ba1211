//! Ordered playback of concurrently synthesized sentences
//!
//! Sentences enqueue in arrival order and synthesize in parallel. A
//! single playback driver only ever plays the head of the queue,
//! waiting for its clip when synthesis is still in flight, so playback
//! order always matches enqueue order no matter how synthesis
//! completion interleaves. `interrupt` discards every queued unit,
//! cancels in-flight synthesis, and stops the sink immediately.
//!
//! Discard safety is generation-based: each unit is tagged with the
//! epoch it was enqueued under, and an interrupt bumps the epoch. Late
//! synthesis completions and the driver's own pop-to-play window both
//! check the epoch, so a unit from a discarded response can never make
//! it to the speaker.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use voice_call_core::{AudioClip, AudioSink, PlayOutcome, SpeechSynthesizer};

#[derive(Debug)]
enum UnitStatus {
    Synthesizing,
    Ready(AudioClip),
    Failed,
}

#[derive(Debug)]
struct SpeechUnit {
    seq: u64,
    text: String,
    status: UnitStatus,
}

struct QueueInner {
    units: VecDeque<SpeechUnit>,
    next_seq: u64,
    epoch: u64,
    finished: bool,
    playing: bool,
    closed: bool,
    synth_tasks: Vec<JoinHandle<()>>,
}

impl QueueInner {
    fn is_idle(&self) -> bool {
        self.units.is_empty() && self.finished && !self.playing
    }
}

/// Strictly ordered sentence playback
pub struct SpeechQueue {
    inner: Arc<Mutex<QueueInner>>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    sink: Arc<dyn AudioSink>,
    voice: Option<String>,
    wake: Arc<Notify>,
    playing_tx: Arc<watch::Sender<bool>>,
    playing_rx: watch::Receiver<bool>,
    idle_tx: Arc<watch::Sender<bool>>,
    idle_rx: watch::Receiver<bool>,
    epoch_tx: watch::Sender<u64>,
    synth_ms: Arc<AtomicU64>,
    played: Arc<AtomicU64>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl SpeechQueue {
    pub fn new(
        synthesizer: Arc<dyn SpeechSynthesizer>,
        sink: Arc<dyn AudioSink>,
        voice: Option<String>,
    ) -> Self {
        let inner = Arc::new(Mutex::new(QueueInner {
            units: VecDeque::new(),
            next_seq: 0,
            epoch: 0,
            finished: true,
            playing: false,
            closed: false,
            synth_tasks: Vec::new(),
        }));
        let wake = Arc::new(Notify::new());
        let (playing_tx, playing_rx) = watch::channel(false);
        let (idle_tx, idle_rx) = watch::channel(true);
        let (epoch_tx, epoch_rx) = watch::channel(0u64);
        let playing_tx = Arc::new(playing_tx);
        let idle_tx = Arc::new(idle_tx);
        let played = Arc::new(AtomicU64::new(0));

        let driver = tokio::spawn(drive(
            Arc::clone(&inner),
            Arc::clone(&sink),
            Arc::clone(&wake),
            Arc::clone(&playing_tx),
            Arc::clone(&idle_tx),
            epoch_rx,
            Arc::clone(&played),
        ));

        Self {
            inner,
            synthesizer,
            sink,
            voice,
            wake,
            playing_tx,
            playing_rx,
            idle_tx,
            idle_rx,
            epoch_tx,
            synth_ms: Arc::new(AtomicU64::new(0)),
            played,
            driver: Mutex::new(Some(driver)),
        }
    }

    fn publish(&self, inner: &QueueInner) {
        self.playing_tx.send_replace(inner.playing);
        self.idle_tx.send_replace(inner.is_idle());
    }

    /// Arm the queue for a new response
    pub fn begin(&self) {
        let mut inner = self.inner.lock();
        inner.finished = false;
        self.publish(&inner);
    }

    /// Queue one sentence and start synthesizing it immediately
    ///
    /// Synthesis failures are unit-scoped: the unit is dropped at play
    /// time and the rest of the response continues.
    pub fn enqueue(&self, text: impl Into<String>) {
        let text = text.into();
        let (seq, epoch) = {
            let mut inner = self.inner.lock();
            if inner.closed {
                return;
            }
            let seq = inner.next_seq;
            inner.next_seq += 1;
            inner.finished = false;
            inner.units.push_back(SpeechUnit {
                seq,
                text: text.clone(),
                status: UnitStatus::Synthesizing,
            });
            inner.synth_tasks.retain(|t| !t.is_finished());
            self.publish(&inner);
            (seq, inner.epoch)
        };

        let synthesizer = Arc::clone(&self.synthesizer);
        let voice = self.voice.clone();
        let queue = Arc::clone(&self.inner);
        let wake = Arc::clone(&self.wake);
        let synth_ms = Arc::clone(&self.synth_ms);

        let task = tokio::spawn(async move {
            let started = Instant::now();
            let result = synthesizer.synthesize(&text, voice.as_deref()).await;

            let mut inner = queue.lock();
            if inner.epoch != epoch {
                // Response was discarded while this unit synthesized
                return;
            }
            let Some(unit) = inner.units.iter_mut().find(|u| u.seq == seq) else {
                return;
            };
            match result {
                Ok(clip) => {
                    synth_ms.fetch_add(started.elapsed().as_millis() as u64, Ordering::Relaxed);
                    unit.status = UnitStatus::Ready(clip);
                }
                Err(e) => {
                    tracing::warn!(error = %e, text = %unit.text, "sentence synthesis failed");
                    unit.status = UnitStatus::Failed;
                }
            }
            drop(inner);
            wake.notify_one();
        });

        self.inner.lock().synth_tasks.push(task);
    }

    /// No more sentences are coming for the current response
    pub fn finish(&self) {
        let mut inner = self.inner.lock();
        inner.finished = true;
        self.publish(&inner);
    }

    /// Discard the current response: clears queued units, cancels
    /// in-flight synthesis, and halts the sink
    ///
    /// Returns how many units were thrown away.
    pub fn interrupt(&self) -> usize {
        let (discarded, epoch, tasks) = {
            let mut inner = self.inner.lock();
            inner.epoch += 1;
            let discarded = inner.units.len();
            inner.units.clear();
            inner.finished = true;
            let tasks = std::mem::take(&mut inner.synth_tasks);
            self.publish(&inner);
            (discarded, inner.epoch, tasks)
        };

        self.epoch_tx.send_replace(epoch);
        for task in tasks {
            task.abort();
        }
        self.sink.stop();
        self.wake.notify_one();

        if discarded > 0 {
            tracing::debug!(discarded, "playback queue discarded");
        }
        discarded
    }

    /// Whether a clip is rendering right now
    pub fn is_playing(&self) -> bool {
        *self.playing_rx.borrow()
    }

    /// Watch playback start/stop transitions
    pub fn playing_watch(&self) -> watch::Receiver<bool> {
        self.playing_rx.clone()
    }

    /// Watch the idle flag; true once the queue is drained and silent
    pub fn idle_watch(&self) -> watch::Receiver<bool> {
        self.idle_rx.clone()
    }

    /// Resolve once the current response has fully played out (or been
    /// discarded)
    pub async fn wait_idle(&self) {
        let mut rx = self.idle_rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Units waiting or synthesizing
    pub fn len(&self) -> usize {
        self.inner.lock().units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clips fully played since construction
    pub fn units_played(&self) -> u64 {
        self.played.load(Ordering::Relaxed)
    }

    /// Total synthesis wall time since construction (milliseconds)
    pub fn synth_ms_total(&self) -> u64 {
        self.synth_ms.load(Ordering::Relaxed)
    }

    /// Discard everything and stop the playback driver
    pub fn shutdown(&self) {
        {
            let mut inner = self.inner.lock();
            inner.closed = true;
        }
        self.interrupt();
        self.wake.notify_one();
    }
}

impl Drop for SpeechQueue {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.lock().take() {
            driver.abort();
        }
    }
}

enum Step {
    Play(AudioClip, u64),
    Skip,
    Wait,
    Exit,
}

async fn drive(
    inner: Arc<Mutex<QueueInner>>,
    sink: Arc<dyn AudioSink>,
    wake: Arc<Notify>,
    playing_tx: Arc<watch::Sender<bool>>,
    idle_tx: Arc<watch::Sender<bool>>,
    mut epoch_rx: watch::Receiver<u64>,
    played: Arc<AtomicU64>,
) {
    loop {
        // Register the waiter before inspecting state so a wake between
        // check and await is never lost
        let notified = wake.notified();
        tokio::pin!(notified);

        #[derive(Clone, Copy)]
        enum Head {
            Ready,
            Failed,
            Busy,
        }

        let step = {
            let mut q = inner.lock();
            let head = q.units.front().map(|u| match u.status {
                UnitStatus::Ready(_) => Head::Ready,
                UnitStatus::Failed => Head::Failed,
                UnitStatus::Synthesizing => Head::Busy,
            });

            if q.closed {
                Step::Exit
            } else {
                match head {
                    Some(Head::Ready) => match q.units.pop_front() {
                        Some(SpeechUnit {
                            status: UnitStatus::Ready(clip),
                            seq,
                            ..
                        }) => {
                            q.playing = true;
                            playing_tx.send_replace(true);
                            idle_tx.send_replace(false);
                            tracing::trace!(seq, "playing unit");
                            Step::Play(clip, q.epoch)
                        }
                        Some(unit) => {
                            q.units.push_front(unit);
                            Step::Wait
                        }
                        None => Step::Wait,
                    },
                    Some(Head::Failed) => {
                        if let Some(unit) = q.units.pop_front() {
                            tracing::debug!(seq = unit.seq, "dropping failed unit");
                        }
                        Step::Skip
                    }
                    // Head still synthesizing, or queue empty: wait
                    Some(Head::Busy) | None => Step::Wait,
                }
            }
        };

        match step {
            Step::Play(clip, epoch) => {
                let outcome = tokio::select! {
                    result = sink.play(clip) => result,
                    _ = epoch_passed(&mut epoch_rx, epoch) => {
                        // Interrupted before or during this clip
                        sink.stop();
                        Ok(PlayOutcome::Stopped)
                    }
                };
                match outcome {
                    Ok(PlayOutcome::Completed) => {
                        played.fetch_add(1, Ordering::Relaxed);
                    }
                    Ok(PlayOutcome::Stopped) => {}
                    Err(e) => {
                        tracing::warn!(error = %e, "sink playback failed");
                    }
                }
                let mut q = inner.lock();
                q.playing = false;
                playing_tx.send_replace(false);
                idle_tx.send_replace(q.is_idle());
            }
            Step::Skip => {
                let q = inner.lock();
                playing_tx.send_replace(q.playing);
                idle_tx.send_replace(q.is_idle());
            }
            Step::Wait => notified.as_mut().await,
            Step::Exit => {
                let mut q = inner.lock();
                q.playing = false;
                playing_tx.send_replace(false);
                idle_tx.send_replace(q.is_idle());
                return;
            }
        }
    }
}

/// Resolves once the observed epoch moves past `seen`
async fn epoch_passed(rx: &mut watch::Receiver<u64>, seen: u64) {
    loop {
        if *rx.borrow_and_update() != seen {
            return;
        }
        if rx.changed().await.is_err() {
            // Queue handle dropped; the play arm will resolve the select
            std::future::pending::<()>().await;
        }
    }
}
