//! Voice call pipeline
//!
//! Everything between the microphone and the speaker lives here:
//!
//! - [`vad`]: adaptive energy-based voice activity detection with
//!   ambient-noise calibration and barge-in detection
//! - [`capture`]: utterance recording into bounded chunks
//! - [`sources`]: file-backed and scripted [`AudioSource`]/[`AudioSink`]
//!   implementations for headless runs and tests
//! - [`device`]: native microphone and speaker backends (feature `device`)
//! - [`stt`]: HTTP transcription client
//! - [`sentence`]: streamed-delta to sentence assembly
//! - [`tts`]: HTTP synthesis client and the ordered playback queue
//! - [`orchestrator`]: the call state machine tying it all together
//!
//! [`AudioSource`]: voice_call_core::AudioSource
//! [`AudioSink`]: voice_call_core::AudioSink

pub mod capture;
#[cfg(feature = "device")]
pub mod device;
pub mod orchestrator;
pub mod sentence;
pub mod sources;
pub mod stt;
pub mod tts;
pub mod vad;
pub mod wav;

pub use capture::Recorder;
pub use orchestrator::{
    CallCommand, CallComponents, CallEvent, CallHandle, CallManager, VoiceCall,
};
pub use sentence::{SentenceSplitter, SplitterConfig};
pub use sources::{NullSink, ScriptedSource, SilenceSource, WavFileSource};
pub use stt::{HttpTranscriber, SttConfig};
pub use tts::{HttpSynthesizer, SpeechQueue, TtsConfig};
pub use vad::{AdaptiveVad, VadConfig, VadState, VadTick};
pub use wav::{decode_wav, encode_wav_pcm16, read_wav_file};
