//! # Upload Decoding
//!
//! Converts an uploaded recording into 16kHz mono f32 samples for the
//! transcription pipeline.
//!
//! ## Decoding Strategy:
//! 1. **WAV payloads** (RIFF header): parsed with the `wav` crate, any PCM
//!    bit depth, any channel count, any sample rate
//! 2. **Everything else**: treated as raw 16-bit little-endian PCM at 16kHz,
//!    matching what simple recording clients ship without a container
//!
//! Compressed formats (mp3, ogg, m4a) are not decoded; they fail onto the
//! task row as an error the client can read.

use anyhow::{anyhow, Result};
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;
use std::path::Path;

/// Sample rate the Whisper pipeline expects.
pub const TARGET_SAMPLE_RATE: u32 = 16_000;

/// Decode an uploaded audio file into 16kHz mono f32 samples.
pub fn decode_file(path: &Path) -> Result<Vec<f32>> {
    let data = std::fs::read(path)
        .map_err(|e| anyhow!("Failed to read uploaded audio {}: {}", path.display(), e))?;
    decode_bytes(&data)
}

/// Decode an in-memory audio payload into 16kHz mono f32 samples.
pub fn decode_bytes(data: &[u8]) -> Result<Vec<f32>> {
    if data.is_empty() {
        return Err(anyhow!("Audio payload is empty"));
    }

    if data.len() >= 4 && &data[..4] == b"RIFF" {
        decode_wav(data)
    } else {
        decode_raw_pcm(data)
    }
}

/// Decode a RIFF/WAV payload: scale to f32, downmix, resample.
fn decode_wav(data: &[u8]) -> Result<Vec<f32>> {
    let mut cursor = Cursor::new(data);
    let (header, track) = wav::read(&mut cursor)
        .map_err(|e| anyhow!("Failed to parse WAV payload: {}", e))?;

    let samples = match track {
        wav::BitDepth::Eight(samples) => samples
            .into_iter()
            .map(|s| (s as f32 - 128.0) / 128.0)
            .collect(),
        wav::BitDepth::Sixteen(samples) => samples
            .into_iter()
            .map(|s| s as f32 / 32768.0)
            .collect(),
        wav::BitDepth::TwentyFour(samples) => samples
            .into_iter()
            .map(|s| s as f32 / 8_388_608.0)
            .collect(),
        wav::BitDepth::ThirtyTwoFloat(samples) => samples,
        wav::BitDepth::Empty => {
            return Err(anyhow!("WAV payload contains no audio data"));
        }
    };

    if header.channel_count == 0 {
        return Err(anyhow!("WAV header declares zero channels"));
    }

    let mono = downmix(samples, header.channel_count as usize);
    Ok(resample_linear(
        mono,
        header.sampling_rate,
        TARGET_SAMPLE_RATE,
    ))
}

/// Decode a headerless payload as raw 16-bit little-endian PCM at 16kHz.
fn decode_raw_pcm(data: &[u8]) -> Result<Vec<f32>> {
    if data.len() % 2 != 0 {
        return Err(anyhow!(
            "Raw PCM payload length must be even for 16-bit samples"
        ));
    }

    let mut cursor = Cursor::new(data);
    let mut samples = Vec::with_capacity(data.len() / 2);
    while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
        samples.push(sample as f32 / 32768.0);
    }

    if samples.is_empty() {
        return Err(anyhow!("No PCM samples found in payload"));
    }

    Ok(samples)
}

/// Average interleaved channels down to mono.
fn downmix(samples: Vec<f32>, channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return samples;
    }

    samples
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Linear-interpolation resampling.
///
/// Whisper only needs intelligible speech, not studio fidelity, so simple
/// interpolation is sufficient here.
fn resample_linear(samples: Vec<f32>, from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() {
        return samples;
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = ((samples.len() as f64) / ratio).round() as usize;
    let mut out = Vec::with_capacity(out_len);

    for i in 0..out_len {
        let src_pos = i as f64 * ratio;
        let idx = src_pos as usize;
        let frac = (src_pos - idx as f64) as f32;

        let a = samples[idx.min(samples.len() - 1)];
        let b = samples[(idx + 1).min(samples.len() - 1)];
        out.push(a + (b - a) * frac);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::{LittleEndian, WriteBytesExt};

    fn wav_bytes(channels: u16, rate: u32, samples: &[i16]) -> Vec<u8> {
        let header = wav::Header::new(wav::WAV_FORMAT_PCM, channels, rate, 16);
        let track = wav::BitDepth::Sixteen(samples.to_vec());
        let mut cursor = Cursor::new(Vec::new());
        wav::write(header, &track, &mut cursor).expect("failed to build test WAV");
        cursor.into_inner()
    }

    #[test]
    fn test_decode_mono_16k_wav() {
        let data = wav_bytes(1, 16_000, &[0, 16384, -16384, 32767]);
        let samples = decode_bytes(&data).unwrap();
        assert_eq!(samples.len(), 4);
        assert!((samples[1] - 0.5).abs() < 1e-3);
        assert!((samples[2] + 0.5).abs() < 1e-3);
    }

    #[test]
    fn test_decode_downmixes_stereo() {
        // L=0.5, R=-0.5 in each frame averages to silence.
        let data = wav_bytes(2, 16_000, &[16384, -16384, 16384, -16384]);
        let samples = decode_bytes(&data).unwrap();
        assert_eq!(samples.len(), 2);
        for s in samples {
            assert!(s.abs() < 1e-3);
        }
    }

    #[test]
    fn test_decode_resamples_8k_to_16k() {
        let input: Vec<i16> = (0..800).map(|i| (i % 100) as i16 * 100).collect();
        let data = wav_bytes(1, 8_000, &input);
        let samples = decode_bytes(&data).unwrap();
        // 800 samples at 8kHz is 100ms, which is 1600 samples at 16kHz.
        assert!((samples.len() as i64 - 1600).abs() <= 2);
    }

    #[test]
    fn test_decode_raw_pcm_fallback() {
        let mut data = Vec::new();
        for s in [0i16, 8192, -8192] {
            data.write_i16::<LittleEndian>(s).unwrap();
        }
        let samples = decode_bytes(&data).unwrap();
        assert_eq!(samples.len(), 3);
        assert!((samples[1] - 0.25).abs() < 1e-3);
    }

    #[test]
    fn test_decode_rejects_empty_and_odd_payloads() {
        assert!(decode_bytes(&[]).is_err());
        assert!(decode_bytes(&[0x01, 0x02, 0x03]).is_err());
    }
}
