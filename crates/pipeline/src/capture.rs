//! Utterance recording
//!
//! The [`Recorder`] sits between the frame stream and the transcriber:
//! while armed it accumulates frames into a bounded buffer, and the
//! orchestrator decides when to cut a chunk. In continuous mode that is
//! the detector's speech-end signal; in push-to-talk mode it is the
//! release command. Either way exactly one [`AudioChunk`] comes out of
//! each recording window.

use std::time::Duration;

use voice_call_core::{AudioBuffer, AudioChunk, AudioFrame, SampleRate};

/// Buffers microphone frames into one chunk per utterance
#[derive(Debug)]
pub struct Recorder {
    buffer: AudioBuffer,
    recording: bool,
    chunks: u64,
}

impl Recorder {
    /// `max_utterance` bounds the buffer; older audio is trimmed once
    /// the cap is hit so a stuck speech-end can never grow unbounded.
    pub fn new(sample_rate: SampleRate, max_utterance: Duration) -> Self {
        Self {
            buffer: AudioBuffer::new(sample_rate, max_utterance),
            recording: false,
            chunks: 0,
        }
    }

    /// Begin a fresh recording window, discarding leftovers
    pub fn start(&mut self) {
        self.buffer.clear();
        self.recording = true;
    }

    /// Append one frame; ignored while not recording
    pub fn push(&mut self, frame: &AudioFrame) {
        if self.recording {
            self.buffer.push(frame);
        }
    }

    /// Cut the buffered audio into a chunk and stop recording
    pub fn finalize(&mut self) -> AudioChunk {
        self.recording = false;
        self.chunks += 1;
        self.buffer.take()
    }

    /// Drop buffered audio without producing a chunk
    pub fn discard(&mut self) {
        self.recording = false;
        self.buffer.clear();
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    /// Buffered audio length so far
    pub fn duration(&self) -> Duration {
        self.buffer.duration()
    }

    /// Whether the buffer has hit its cap
    pub fn is_full(&self) -> bool {
        self.buffer.is_full()
    }

    /// Chunks produced since construction
    pub fn chunk_count(&self) -> u64 {
        self.chunks
    }
}
