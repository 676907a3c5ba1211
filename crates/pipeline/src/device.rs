//! Native microphone and speaker backends over cpal
//!
//! cpal streams are not `Send`, so each stream lives on a dedicated OS
//! thread for its whole lifetime. The async side talks to those threads
//! through channels only: capture frames flow out over a bounded mpsc,
//! playback samples flow in through a shared ring the output callback
//! drains. Dropping the stream is what releases the device, which is
//! why both threads block on a shutdown channel and drop on exit.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, Notify};
use voice_call_core::{
    AudioClip, AudioFrame, AudioSink, AudioSource, CallError, PlayOutcome, Result, SampleRate,
};

const FRAME_CHANNEL_DEPTH: usize = 32;
const THREAD_START_TIMEOUT: Duration = Duration::from_secs(5);

/// Capture from the default input device
///
/// `open` claims the microphone and streams frames at the requested
/// cadence until `close`. When the device cannot run mono at the target
/// rate, the callback downmixes and resamples from whatever the device
/// offers.
pub struct DeviceSource {
    sample_rate: SampleRate,
    worker: Mutex<Option<StreamWorker>>,
}

struct StreamWorker {
    shutdown: std::sync::mpsc::Sender<()>,
    thread: JoinHandle<()>,
}

impl DeviceSource {
    pub fn new(sample_rate: SampleRate) -> Self {
        Self {
            sample_rate,
            worker: Mutex::new(None),
        }
    }
}

#[async_trait]
impl AudioSource for DeviceSource {
    async fn open(&self, frame_ms: u32) -> Result<mpsc::Receiver<AudioFrame>> {
        // Release any previous claim before opening the device again.
        self.close().await;

        let (frame_tx, frame_rx) = mpsc::channel(FRAME_CHANNEL_DEPTH);
        let (ready_tx, ready_rx) = oneshot::channel();
        let (shutdown_tx, shutdown_rx) = std::sync::mpsc::channel();
        let target = self.sample_rate;

        let thread = std::thread::Builder::new()
            .name("mic-capture".into())
            .spawn(move || capture_thread(target, frame_ms, frame_tx, ready_tx, shutdown_rx))
            .map_err(|e| CallError::Audio(format!("failed to spawn capture thread: {e}")))?;

        match tokio::time::timeout(THREAD_START_TIMEOUT, ready_rx).await {
            Ok(Ok(Ok(()))) => {
                *self.worker.lock() = Some(StreamWorker {
                    shutdown: shutdown_tx,
                    thread,
                });
                Ok(frame_rx)
            }
            Ok(Ok(Err(e))) => {
                let _ = thread.join();
                Err(e)
            }
            Ok(Err(_)) => Err(CallError::DeviceUnavailable(
                "capture thread exited during setup".into(),
            )),
            Err(_) => Err(CallError::DeviceUnavailable(
                "capture thread did not start".into(),
            )),
        }
    }

    async fn close(&self) {
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            let _ = worker.shutdown.send(());
            let _ = tokio::task::spawn_blocking(move || worker.thread.join()).await;
        }
    }

    fn sample_rate(&self) -> SampleRate {
        self.sample_rate
    }
}

fn capture_thread(
    target: SampleRate,
    frame_ms: u32,
    frames: mpsc::Sender<AudioFrame>,
    ready: oneshot::Sender<Result<()>>,
    shutdown: std::sync::mpsc::Receiver<()>,
) {
    let stream = match build_capture_stream(target, frame_ms, frames) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    let _ = ready.send(Ok(()));
    // Parked until close() signals or the source is dropped; the stream
    // captures for as long as this thread holds it.
    let _ = shutdown.recv();
    drop(stream);
}

fn build_capture_stream(
    target: SampleRate,
    frame_ms: u32,
    frames: mpsc::Sender<AudioFrame>,
) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| CallError::DeviceUnavailable("no default input device".into()))?;
    tracing::debug!(
        device = %device.name().unwrap_or_default(),
        "opening capture device"
    );

    let wanted = cpal::SampleRate(target.as_u32());
    let native_mono = device
        .supported_input_configs()
        .map_err(|e| CallError::DeviceUnavailable(format!("cannot query input configs: {e}")))?
        .find(|c| {
            c.channels() == 1
                && c.sample_format() == cpal::SampleFormat::F32
                && c.min_sample_rate() <= wanted
                && c.max_sample_rate() >= wanted
        });

    let config = match native_mono {
        Some(range) => range.with_sample_rate(wanted).config(),
        // No mono config at the target rate; take the device default and
        // convert in the callback.
        None => device
            .default_input_config()
            .map_err(|e| CallError::DeviceUnavailable(format!("cannot read input config: {e}")))?
            .config(),
    };
    let channels = config.channels as usize;
    let native_rate = config.sample_rate.0;
    let native_frame_len = (native_rate as usize * frame_ms as usize) / 1000;

    let mut pending: Vec<f32> = Vec::with_capacity(native_frame_len * 2);
    let mut sequence: u64 = 0;

    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                if channels == 1 {
                    pending.extend_from_slice(data);
                } else {
                    pending.extend(
                        data.chunks(channels)
                            .map(|f| f.iter().sum::<f32>() / channels as f32),
                    );
                }
                while pending.len() >= native_frame_len {
                    let block: Vec<f32> = pending.drain(..native_frame_len).collect();
                    let samples = if native_rate == target.as_u32() {
                        block
                    } else {
                        resample_block(&block, native_rate, target.as_u32())
                    };
                    // A full channel means the consumer stalled; dropping
                    // the frame keeps capture real-time.
                    let _ = frames.try_send(AudioFrame::new(samples, target, sequence));
                    sequence += 1;
                }
            },
            |err| tracing::error!(error = %err, "capture stream error"),
            None,
        )
        .map_err(map_build_error)?;

    stream
        .play()
        .map_err(|e| CallError::DeviceUnavailable(format!("cannot start capture stream: {e}")))?;

    Ok(stream)
}

/// Play through the default output device
///
/// The output stream runs for the sink's whole lifetime and renders
/// silence when nothing is queued, so `play` only has to feed samples
/// and wait for the ring to drain. `stop` clears the ring, which the
/// callback observes on its next block.
pub struct DeviceSink {
    shared: Arc<SinkShared>,
    device_rate: u32,
    worker: Mutex<Option<StreamWorker>>,
}

struct SinkShared {
    /// Pending samples at the device rate, drained by the output callback
    ring: Mutex<VecDeque<f32>>,
    /// RMS of the last rendered block, stored as f32 bits
    level_bits: AtomicU32,
    /// Bumped by `stop`; play snapshots it to tell Stopped from Completed
    stop_epoch: AtomicU64,
    /// Signalled when the ring drains or playback is stopped
    drained: Notify,
}

impl DeviceSink {
    /// Open the default output device and start its stream
    pub fn new(preferred_rate: SampleRate) -> Result<Self> {
        let shared = Arc::new(SinkShared {
            ring: Mutex::new(VecDeque::new()),
            level_bits: AtomicU32::new(0),
            stop_epoch: AtomicU64::new(0),
            drained: Notify::new(),
        });

        let (ready_tx, ready_rx) = std::sync::mpsc::channel();
        let (shutdown_tx, shutdown_rx) = std::sync::mpsc::channel();
        let thread_shared = Arc::clone(&shared);

        let thread = std::thread::Builder::new()
            .name("speaker-playback".into())
            .spawn(move || playback_thread(thread_shared, preferred_rate, ready_tx, shutdown_rx))
            .map_err(|e| CallError::Audio(format!("failed to spawn playback thread: {e}")))?;

        let device_rate = match ready_rx.recv_timeout(THREAD_START_TIMEOUT) {
            Ok(Ok(rate)) => rate,
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => {
                return Err(CallError::DeviceUnavailable(
                    "playback thread did not start".into(),
                ))
            }
        };

        Ok(Self {
            shared,
            device_rate,
            worker: Mutex::new(Some(StreamWorker {
                shutdown: shutdown_tx,
                thread,
            })),
        })
    }
}

impl Drop for DeviceSink {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.lock().take() {
            // The thread drops the stream and exits on its own.
            let _ = worker.shutdown.send(());
        }
    }
}

#[async_trait]
impl AudioSink for DeviceSink {
    async fn play(&self, clip: AudioClip) -> Result<PlayOutcome> {
        if clip.is_empty() {
            return Ok(PlayOutcome::Completed);
        }
        let clip = if clip.sample_rate == self.device_rate {
            clip
        } else {
            clip.resample(self.device_rate)
        };

        let epoch = self.shared.stop_epoch.load(Ordering::Acquire);
        self.shared.ring.lock().extend(clip.samples.iter().copied());

        loop {
            let notified = self.shared.drained.notified();
            tokio::pin!(notified);
            // Register before checking so a callback-side notify between
            // the check and the await is not lost.
            notified.as_mut().enable();

            if self.shared.stop_epoch.load(Ordering::Acquire) != epoch {
                // Whatever remains of this clip is stale.
                self.shared.ring.lock().clear();
                return Ok(PlayOutcome::Stopped);
            }
            if self.shared.ring.lock().is_empty() {
                return Ok(PlayOutcome::Completed);
            }

            notified.await;
        }
    }

    fn stop(&self) {
        self.shared.ring.lock().clear();
        self.shared.stop_epoch.fetch_add(1, Ordering::AcqRel);
        self.shared.drained.notify_waiters();
    }

    fn output_level(&self) -> f32 {
        f32::from_bits(self.shared.level_bits.load(Ordering::Relaxed))
    }
}

fn playback_thread(
    shared: Arc<SinkShared>,
    preferred: SampleRate,
    ready: std::sync::mpsc::Sender<Result<u32>>,
    shutdown: std::sync::mpsc::Receiver<()>,
) {
    let stream = match build_playback_stream(&shared, preferred) {
        Ok((stream, rate)) => {
            let _ = ready.send(Ok(rate));
            stream
        }
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    let _ = shutdown.recv();
    drop(stream);
}

fn build_playback_stream(
    shared: &Arc<SinkShared>,
    preferred: SampleRate,
) -> Result<(cpal::Stream, u32)> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| CallError::DeviceUnavailable("no default output device".into()))?;
    tracing::debug!(
        device = %device.name().unwrap_or_default(),
        "opening playback device"
    );

    let wanted = cpal::SampleRate(preferred.as_u32());
    let supported = device
        .supported_output_configs()
        .map_err(|e| CallError::DeviceUnavailable(format!("cannot query output configs: {e}")))?
        .collect::<Vec<_>>();
    let pick = |chs: u16| {
        supported
            .iter()
            .find(|c| {
                c.channels() == chs
                    && c.sample_format() == cpal::SampleFormat::F32
                    && c.min_sample_rate() <= wanted
                    && c.max_sample_rate() >= wanted
            })
            .cloned()
    };

    // Mono preferred, stereo accepted; otherwise the device default.
    let config = match pick(1).or_else(|| pick(2)) {
        Some(range) => range.with_sample_rate(wanted).config(),
        None => device
            .default_output_config()
            .map_err(|e| CallError::DeviceUnavailable(format!("cannot read output config: {e}")))?
            .config(),
    };
    let channels = config.channels as usize;
    let rate = config.sample_rate.0;

    let cb_shared = Arc::clone(shared);
    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let mut ring = cb_shared.ring.lock();
                let mut sum_sq = 0.0f32;
                let mut count = 0usize;
                for frame in data.chunks_mut(channels) {
                    let sample = ring.pop_front().unwrap_or(0.0);
                    sum_sq += sample * sample;
                    count += 1;
                    for out in frame.iter_mut() {
                        *out = sample;
                    }
                }
                let empty = ring.is_empty();
                drop(ring);

                let level = if count == 0 {
                    0.0
                } else {
                    (sum_sq / count as f32).sqrt()
                };
                cb_shared.level_bits.store(level.to_bits(), Ordering::Relaxed);
                if empty {
                    cb_shared.drained.notify_waiters();
                }
            },
            |err| tracing::error!(error = %err, "playback stream error"),
            None,
        )
        .map_err(map_build_error)?;

    stream
        .play()
        .map_err(|e| CallError::DeviceUnavailable(format!("cannot start playback stream: {e}")))?;

    Ok((stream, rate))
}

fn map_build_error(e: cpal::BuildStreamError) -> CallError {
    match e {
        cpal::BuildStreamError::DeviceNotAvailable => {
            CallError::DeviceUnavailable("audio device disconnected".into())
        }
        // macOS and Windows report denied device access as a build failure.
        other => CallError::PermissionDenied(other.to_string()),
    }
}

/// Linear interpolation over one capture block
///
/// Callback-side conversion stays cheap; block boundaries are not
/// phase-aligned, which the level-driven detector downstream never sees.
fn resample_block(input: &[f32], from: u32, to: u32) -> Vec<f32> {
    let ratio = to as f64 / from as f64;
    let new_len = (input.len() as f64 * ratio) as usize;

    let mut out = Vec::with_capacity(new_len);
    for i in 0..new_len {
        let src_idx = i as f64 / ratio;
        let idx_floor = src_idx.floor() as usize;
        let idx_ceil = (idx_floor + 1).min(input.len().saturating_sub(1));
        let frac = src_idx - idx_floor as f64;

        out.push(input[idx_floor] * (1.0 - frac as f32) + input[idx_ceil] * frac as f32);
    }
    out
}
