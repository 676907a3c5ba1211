//! File-backed and scripted audio endpoints
//!
//! Production calls run on the native device backends behind the
//! `device` feature. These implementations cover everything else:
//! headless runs driven by a WAV recording, scripted level sequences
//! for exercising the detector, and a sink that renders to nowhere
//! while still reporting output levels.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use voice_call_core::{
    AudioClip, AudioFrame, AudioSink, AudioSource, CallError, PlayOutcome, Result, SampleRate,
};

use crate::wav::read_wav_file;

const FRAME_CHANNEL_DEPTH: usize = 32;

/// Plays one side of a call from a WAV file, then silence
///
/// The file is decoded and resampled up front; frames stream at the
/// requested cadence. Once the recording runs out the source keeps
/// emitting silent frames so detection and timers stay live.
pub struct WavFileSource {
    path: PathBuf,
    sample_rate: SampleRate,
    paced: bool,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl WavFileSource {
    pub fn new(path: impl Into<PathBuf>, sample_rate: SampleRate) -> Self {
        Self {
            path: path.into(),
            sample_rate,
            paced: true,
            task: Mutex::new(None),
        }
    }

    /// Disable real-time pacing; frames flow as fast as they are read
    pub fn unpaced(mut self) -> Self {
        self.paced = false;
        self
    }
}

#[async_trait]
impl AudioSource for WavFileSource {
    async fn open(&self, frame_ms: u32) -> Result<mpsc::Receiver<AudioFrame>> {
        let clip = read_wav_file(&self.path)
            .map_err(|e| CallError::DeviceUnavailable(e.to_string()))?;
        let clip = clip.resample(self.sample_rate.as_u32());

        let rate = self.sample_rate;
        let frame_len = rate.samples_for_ms(frame_ms);
        let paced = self.paced;
        let (tx, rx) = mpsc::channel(FRAME_CHANNEL_DEPTH);

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(frame_ms as u64));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let mut seq = 0u64;

            for chunk in clip.samples.chunks(frame_len) {
                if paced {
                    interval.tick().await;
                }
                let mut samples = chunk.to_vec();
                samples.resize(frame_len, 0.0);
                if tx.send(AudioFrame::new(samples, rate, seq)).await.is_err() {
                    return;
                }
                seq += 1;
            }

            // Recording exhausted; keep the line open with silence
            loop {
                if paced {
                    interval.tick().await;
                }
                let frame = AudioFrame::new(vec![0.0; frame_len], rate, seq);
                if tx.send(frame).await.is_err() {
                    return;
                }
                seq += 1;
            }
        });

        if let Some(old) = self.task.lock().replace(handle) {
            old.abort();
        }
        Ok(rx)
    }

    async fn close(&self) {
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
    }

    fn sample_rate(&self) -> SampleRate {
        self.sample_rate
    }
}

/// Endless silent frames at the capture cadence
pub struct SilenceSource {
    sample_rate: SampleRate,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SilenceSource {
    pub fn new(sample_rate: SampleRate) -> Self {
        Self {
            sample_rate,
            task: Mutex::new(None),
        }
    }
}

#[async_trait]
impl AudioSource for SilenceSource {
    async fn open(&self, frame_ms: u32) -> Result<mpsc::Receiver<AudioFrame>> {
        let rate = self.sample_rate;
        let frame_len = rate.samples_for_ms(frame_ms);
        let (tx, rx) = mpsc::channel(FRAME_CHANNEL_DEPTH);

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(frame_ms as u64));
            let mut seq = 0u64;
            loop {
                interval.tick().await;
                let frame = AudioFrame::new(vec![0.0; frame_len], rate, seq);
                if tx.send(frame).await.is_err() {
                    return;
                }
                seq += 1;
            }
        });

        if let Some(old) = self.task.lock().replace(handle) {
            old.abort();
        }
        Ok(rx)
    }

    async fn close(&self) {
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
    }

    fn sample_rate(&self) -> SampleRate {
        self.sample_rate
    }
}

/// Frame levels scripted by the test, then a settable base level
///
/// Each emitted frame is a constant-valued block, so its RMS equals the
/// scripted level exactly. `push_levels` queues a finite sequence;
/// after it drains the source keeps emitting the `set_level` value.
/// Keep your own `Arc` to steer it while a call runs.
pub struct ScriptedSource {
    sample_rate: SampleRate,
    frame_gap: Duration,
    script: Arc<Mutex<VecDeque<f32>>>,
    base_level: Arc<AtomicU32>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ScriptedSource {
    pub fn new(sample_rate: SampleRate, frame_gap: Duration) -> Self {
        Self {
            sample_rate,
            frame_gap,
            script: Arc::new(Mutex::new(VecDeque::new())),
            base_level: Arc::new(AtomicU32::new(0f32.to_bits())),
            task: Mutex::new(None),
        }
    }

    /// Queue levels for the next frames, one frame per entry
    pub fn push_levels(&self, levels: &[f32]) {
        self.script.lock().extend(levels.iter().copied());
    }

    /// Level emitted once the script runs dry
    pub fn set_level(&self, level: f32) {
        self.base_level.store(level.to_bits(), Ordering::Relaxed);
    }

    /// Scripted frames not yet emitted
    pub fn remaining(&self) -> usize {
        self.script.lock().len()
    }
}

#[async_trait]
impl AudioSource for ScriptedSource {
    async fn open(&self, frame_ms: u32) -> Result<mpsc::Receiver<AudioFrame>> {
        let rate = self.sample_rate;
        let frame_len = rate.samples_for_ms(frame_ms);
        let frame_gap = self.frame_gap;
        let script = Arc::clone(&self.script);
        let base = Arc::clone(&self.base_level);
        let (tx, rx) = mpsc::channel(FRAME_CHANNEL_DEPTH);

        let handle = tokio::spawn(async move {
            let mut seq = 0u64;
            loop {
                if !frame_gap.is_zero() {
                    tokio::time::sleep(frame_gap).await;
                }
                let level = script
                    .lock()
                    .pop_front()
                    .unwrap_or_else(|| f32::from_bits(base.load(Ordering::Relaxed)));
                let frame = AudioFrame::new(vec![level; frame_len], rate, seq);
                if tx.send(frame).await.is_err() {
                    return;
                }
                seq += 1;
            }
        });

        if let Some(old) = self.task.lock().replace(handle) {
            old.abort();
        }
        Ok(rx)
    }

    async fn close(&self) {
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
    }

    fn sample_rate(&self) -> SampleRate {
        self.sample_rate
    }
}

/// Renders clips to nowhere in real (or scaled) time
///
/// Playback takes as long as the clip would, divided by `speed`, so
/// barge-in behavior is observable without a sound card. Output level
/// reports the playing clip's RMS, which feeds the leakage estimate.
pub struct NullSink {
    level_bits: AtomicU32,
    stop: Notify,
    speed: f64,
}

impl NullSink {
    pub fn new() -> Self {
        Self::with_speed(1.0)
    }

    /// `speed` scales playback time; 10.0 plays ten times faster
    pub fn with_speed(speed: f64) -> Self {
        Self {
            level_bits: AtomicU32::new(0f32.to_bits()),
            stop: Notify::new(),
            speed: speed.max(0.01),
        }
    }
}

impl Default for NullSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AudioSink for NullSink {
    async fn play(&self, clip: AudioClip) -> Result<PlayOutcome> {
        let duration = clip.duration().div_f64(self.speed);
        self.level_bits.store(clip.rms().to_bits(), Ordering::Relaxed);

        let outcome = tokio::select! {
            _ = tokio::time::sleep(duration) => PlayOutcome::Completed,
            _ = self.stop.notified() => PlayOutcome::Stopped,
        };

        self.level_bits.store(0f32.to_bits(), Ordering::Relaxed);
        Ok(outcome)
    }

    fn stop(&self) {
        // Clear the level here too: a cancelled play() never reaches
        // its own reset
        self.level_bits.store(0f32.to_bits(), Ordering::Relaxed);
        self.stop.notify_waiters();
    }

    fn output_level(&self) -> f32 {
        f32::from_bits(self.level_bits.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wav::encode_wav_pcm16;

    #[tokio::test]
    async fn test_scripted_levels_come_out_as_rms() {
        let source = ScriptedSource::new(SampleRate::Hz16000, Duration::from_millis(1));
        source.push_levels(&[0.5, 0.2]);

        let mut rx = source.open(30).await.unwrap();
        let a = rx.recv().await.unwrap();
        let b = rx.recv().await.unwrap();
        let c = rx.recv().await.unwrap();

        assert!((a.rms - 0.5).abs() < 1e-6);
        assert!((b.rms - 0.2).abs() < 1e-6);
        assert!((c.rms - 0.0).abs() < 1e-6);
        assert_eq!(a.sequence, 0);
        assert_eq!(b.sequence, 1);

        source.close().await;
    }

    #[tokio::test]
    async fn test_wav_source_plays_file_then_silence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("caller.wav");
        // 60ms of loud-ish audio at 16k
        let samples = vec![0.4f32; 960];
        std::fs::write(&path, encode_wav_pcm16(&samples, 16000).unwrap()).unwrap();

        let source = WavFileSource::new(&path, SampleRate::Hz16000).unpaced();
        let mut rx = source.open(30).await.unwrap();

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        let third = rx.recv().await.unwrap();

        assert!(first.rms > 0.3);
        assert!(second.rms > 0.3);
        assert!(third.rms < 1e-6);

        source.close().await;
        // Channel drains and closes after the task is gone
        while rx.recv().await.is_some() {}
    }

    #[tokio::test]
    async fn test_wav_source_missing_file_is_device_unavailable() {
        let source = WavFileSource::new("/nonexistent/audio.wav", SampleRate::Hz16000);
        let err = source.open(30).await.unwrap_err();
        assert!(matches!(err, CallError::DeviceUnavailable(_)));
    }

    #[tokio::test]
    async fn test_null_sink_stop_cuts_playback_short() {
        let sink = Arc::new(NullSink::new());
        // 2 seconds of audio
        let clip = AudioClip::new(vec![0.3; 32000], 16000);

        let player = Arc::clone(&sink);
        let handle = tokio::spawn(async move { player.play(clip).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(sink.output_level() > 0.2);
        sink.stop();

        let outcome = handle.await.unwrap().unwrap();
        assert_eq!(outcome, PlayOutcome::Stopped);
        assert_eq!(sink.output_level(), 0.0);
    }

    #[tokio::test]
    async fn test_null_sink_speed_scales_duration() {
        let sink = NullSink::with_speed(100.0);
        let clip = AudioClip::new(vec![0.1; 16000], 16000);

        let start = std::time::Instant::now();
        let outcome = sink.play(clip).await.unwrap();
        assert_eq!(outcome, PlayOutcome::Completed);
        assert!(start.elapsed() < Duration::from_millis(500));
    }
}
