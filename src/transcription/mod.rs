//! # Transcription Module
//!
//! Speech-to-text for uploaded recitations using Whisper models via the
//! Candle-rs framework. Pure Rust inference, no FFI bindings to whisper.cpp.
//!
//! ## Key Components:
//! - **Model Management**: Loading and unloading Whisper models from HuggingFace
//! - **Transcription Engine**: Converting decoded audio to text
//! - **Transcriber capability**: The single-method trait the background worker
//!   depends on, so tests can substitute a scripted implementation
//!
//! ## Whisper Model Sizes:
//! - **tiny**: ~39MB, fastest, the default for verse-length recordings
//! - **base**: ~74MB, good balance for development
//! - **small**: ~244MB, better accuracy
//! - **medium**: ~769MB, strong accuracy for tajwīd-level detail
//! - **large**: ~1550MB, best accuracy but slowest

pub mod engine;
pub mod model;

pub use engine::{Transcriber, TranscriptionConfig, TranscriptionEngine, TranscriptionResult};
pub use model::ModelSize;
