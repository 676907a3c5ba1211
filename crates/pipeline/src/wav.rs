//! WAV encoding and decoding
//!
//! The transcription service takes 16-bit PCM WAV uploads and the
//! synthesis service returns WAV bytes, so everything converts through
//! mono f32 at the edges.

use std::io::Cursor;
use std::path::Path;

use voice_call_config::constants::audio::PCM16_SCALE;
use voice_call_core::{AudioClip, CallError, Result};

/// Encode mono f32 samples as a 16-bit PCM WAV file in memory
pub fn encode_wav_pcm16(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| CallError::Audio(format!("WAV encode failed: {e}")))?;

        for &sample in samples {
            let sample_i16 = (sample * PCM16_SCALE).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(sample_i16)
                .map_err(|e| CallError::Audio(format!("WAV write failed: {e}")))?;
        }

        writer
            .finalize()
            .map_err(|e| CallError::Audio(format!("WAV finalize failed: {e}")))?;
    }

    Ok(cursor.into_inner())
}

/// Decode WAV bytes into a mono f32 clip
///
/// Integer formats are scaled by their bit depth; multi-channel audio
/// is averaged down to mono.
pub fn decode_wav(bytes: &[u8]) -> Result<AudioClip> {
    let reader = hound::WavReader::new(Cursor::new(bytes))
        .map_err(|e| CallError::Audio(format!("WAV decode failed: {e}")))?;
    decode_reader(reader)
}

/// Read a WAV file from disk into a mono f32 clip
pub fn read_wav_file(path: impl AsRef<Path>) -> Result<AudioClip> {
    let path = path.as_ref();
    let reader = hound::WavReader::open(path)
        .map_err(|e| CallError::Audio(format!("cannot open {}: {e}", path.display())))?;
    decode_reader(reader)
}

fn decode_reader<R: std::io::Read>(reader: hound::WavReader<R>) -> Result<AudioClip> {
    let spec = reader.spec();
    let channels = spec.channels as usize;

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| CallError::Audio(format!("WAV sample read failed: {e}")))?,
        hound::SampleFormat::Int => {
            let max_val = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max_val))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| CallError::Audio(format!("WAV sample read failed: {e}")))?
        }
    };

    let mono = if channels > 1 {
        samples
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect()
    } else {
        samples
    };

    Ok(AudioClip::new(mono, spec.sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_preserves_length_and_rate() {
        let samples: Vec<f32> = (0..1600)
            .map(|i| (i as f32 * 0.01).sin() * 0.5)
            .collect();
        let bytes = encode_wav_pcm16(&samples, 16000).unwrap();
        let clip = decode_wav(&bytes).unwrap();

        assert_eq!(clip.sample_rate, 16000);
        assert_eq!(clip.samples.len(), 1600);
        // 16-bit quantization keeps values close
        for (a, b) in samples.iter().zip(clip.samples.iter()) {
            assert!((a - b).abs() < 1e-3);
        }
    }

    #[test]
    fn test_encode_clamps_out_of_range() {
        let bytes = encode_wav_pcm16(&[2.0, -2.0], 16000).unwrap();
        let clip = decode_wav(&bytes).unwrap();
        assert!(clip.samples[0] <= 1.0);
        assert!(clip.samples[1] >= -1.0);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_wav(&[0u8; 16]).is_err());
    }

    #[test]
    fn test_read_wav_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        let bytes = encode_wav_pcm16(&[0.1, 0.2, 0.3], 8000).unwrap();
        std::fs::write(&path, bytes).unwrap();

        let clip = read_wav_file(&path).unwrap();
        assert_eq!(clip.sample_rate, 8000);
        assert_eq!(clip.samples.len(), 3);
    }
}
