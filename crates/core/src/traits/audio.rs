//! Audio capture and playback interfaces

use crate::audio::{AudioClip, AudioFrame, SampleRate};
use crate::error::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Microphone-side audio input
///
/// `open` acquires the device and starts delivering fixed-size mono
/// frames on the returned channel at the requested cadence. Acquisition
/// failures map to `PermissionDenied` or `DeviceUnavailable`, both fatal
/// before the call starts. The channel closes when the source is closed
/// or the device dies.
#[async_trait]
pub trait AudioSource: Send + Sync + 'static {
    /// Acquire the device and start streaming frames of `frame_ms`
    /// milliseconds each
    async fn open(&self, frame_ms: u32) -> Result<mpsc::Receiver<AudioFrame>>;

    /// Release the device and end the frame stream
    ///
    /// Idempotent; safe to call on a source that never opened.
    async fn close(&self);

    /// Native capture rate of this source
    fn sample_rate(&self) -> SampleRate;
}

/// How a playback request finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayOutcome {
    /// The clip played to its end
    Completed,
    /// `stop()` halted it early
    Stopped,
}

/// Speaker-side audio output
///
/// One clip plays at a time; the queue above this trait serializes
/// calls. `stop` must take effect within one audio frame so barge-in
/// feels instant.
#[async_trait]
pub trait AudioSink: Send + Sync + 'static {
    /// Render one clip, resolving when it finishes or is stopped
    async fn play(&self, clip: AudioClip) -> Result<PlayOutcome>;

    /// Halt current playback immediately
    ///
    /// Idempotent; a no-op when nothing is playing.
    fn stop(&self);

    /// Linear RMS of the audio currently being rendered, 0.0 when idle
    ///
    /// The voice activity detector multiplies this by a leakage factor
    /// to estimate how much of the output the microphone hears.
    fn output_level(&self) -> f32;
}
