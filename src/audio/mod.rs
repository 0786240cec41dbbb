//! # Audio Processing Module
//!
//! Handles decoding of uploaded recitation recordings into the sample format
//! the transcription pipeline expects.
//!
//! ## Key Components:
//! - **Decoder**: WAV parsing, raw PCM fallback, downmixing, resampling
//!
//! ## Audio Format Requirements (pipeline side):
//! - **Sample Rate**: 16kHz (16,000 Hz)
//! - **Format**: 32-bit float, range [-1.0, 1.0]
//! - **Channels**: Mono (single channel)
//!
//! Uploads that don't match are converted, not rejected: stereo is downmixed,
//! other sample rates are resampled, and 8/16/24-bit integer PCM is scaled.

pub mod decoder;

pub use decoder::{decode_bytes, decode_file, TARGET_SAMPLE_RATE};
