//! # Transcription Engine
//!
//! Coordinates between the loaded Whisper model and the correction pipeline.
//! The engine owns the (optional) model behind an async RwLock, tracks
//! per-engine performance metrics, and exposes the `Transcriber` capability
//! the background worker consumes.

use crate::transcription::model::{ModelInfo, ModelSize, WhisperModel};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use candle_core::Device;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

/// The single capability the background worker depends on.
///
/// Keeping the worker polymorphic over this trait (instead of handing it the
/// whole engine) lets tests drive the correction pipeline with a scripted
/// transcriber and no model download.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe 16kHz mono f32 samples to text.
    async fn transcribe(&self, samples: &[f32]) -> Result<String>;
}

/// Configuration for transcription processing.
#[derive(Debug, Clone)]
pub struct TranscriptionConfig {
    /// Target language (ISO 639-1 code like "ar", "en")
    pub language: Option<String>,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            language: Some("ar".to_string()),
        }
    }
}

/// Result of a transcription operation.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TranscriptionResult {
    /// The transcribed text
    pub text: String,

    /// Duration of audio processed (seconds)
    pub audio_duration: f64,

    /// Time taken for transcription (milliseconds)
    pub processing_time_ms: u64,

    /// Language hint used
    pub language: String,

    /// Model used for transcription
    pub model_name: String,
}

/// Performance tracking for the transcription engine.
#[derive(Debug, Default)]
struct EngineMetrics {
    /// Total number of transcription requests processed
    total_requests: u64,

    /// Total audio duration processed (seconds)
    total_audio_duration: f64,

    /// Total processing time (milliseconds)
    total_processing_time: u64,

    /// Number of failed transcriptions
    failed_requests: u64,
}

/// High-level transcription engine.
///
/// ## Thread Safety:
/// The model sits behind `Arc<RwLock<Option<…>>>`: status checks take a read
/// lock, transcription and model swaps take the write lock. With the default
/// single worker there is no lock contention in practice.
pub struct TranscriptionEngine {
    /// Currently loaded Whisper model
    model: Arc<RwLock<Option<WhisperModel>>>,

    /// Configuration for transcription behavior
    config: TranscriptionConfig,

    /// Device to use for model inference (CPU/GPU)
    device: Device,

    /// Performance metrics tracking
    metrics: Arc<RwLock<EngineMetrics>>,
}

impl TranscriptionEngine {
    pub fn new(config: TranscriptionConfig, device: Device) -> Self {
        Self {
            model: Arc::new(RwLock::new(None)),
            config,
            device,
            metrics: Arc::new(RwLock::new(EngineMetrics::default())),
        }
    }

    /// Load a specific Whisper model, replacing any currently loaded one.
    pub async fn load_model(&self, model_size: ModelSize) -> Result<()> {
        tracing::info!("Loading {} model for transcription engine", model_size);
        let start_time = Instant::now();

        let new_model = WhisperModel::load(model_size, self.device.clone()).await?;

        {
            let mut model_guard = self.model.write().await;
            *model_guard = Some(new_model);
        }

        tracing::info!(
            "Model loaded and validated in {:.2}s",
            start_time.elapsed().as_secs_f64()
        );
        Ok(())
    }

    /// Unload the current model to free memory.
    pub async fn unload_model(&self) {
        tracing::info!("Unloading transcription model");
        let mut model_guard = self.model.write().await;
        *model_guard = None;
    }

    /// Check if a model is currently loaded and ready.
    pub async fn is_model_loaded(&self) -> bool {
        self.model.read().await.is_some()
    }

    /// Information about the currently loaded model, if any.
    pub async fn current_model_info(&self) -> Option<ModelInfo> {
        let model_guard = self.model.read().await;
        model_guard.as_ref().map(|model| model.info().clone())
    }

    /// Estimated memory held by the loaded model, in bytes.
    pub async fn current_memory_usage(&self) -> usize {
        let model_guard = self.model.read().await;
        model_guard
            .as_ref()
            .map(|model| model.estimated_memory_usage())
            .unwrap_or(0)
    }

    /// Transcribe decoded audio using the loaded model.
    ///
    /// ## Parameters:
    /// - **audio_data**: Audio samples as 32-bit floats (16kHz, mono)
    pub async fn transcribe_audio(&self, audio_data: &[f32]) -> Result<TranscriptionResult> {
        let start_time = Instant::now();

        if audio_data.is_empty() {
            return Err(anyhow!("Audio data is empty"));
        }

        let audio_duration = audio_data.len() as f64 / 16000.0;

        let (transcription_text, model_name) = {
            let mut model_guard = self.model.write().await;
            match model_guard.as_mut() {
                Some(model) => {
                    let name = model.info().name.clone();
                    let text = model
                        .transcribe(audio_data, self.config.language.as_deref())
                        .await;
                    match text {
                        Ok(text) => (text, name),
                        Err(e) => {
                            self.record_failure().await;
                            return Err(e);
                        }
                    }
                }
                None => {
                    self.record_failure().await;
                    return Err(anyhow!("No model loaded for transcription"));
                }
            }
        };

        let processing_time_ms = start_time.elapsed().as_millis() as u64;

        let result = TranscriptionResult {
            text: transcription_text.trim().to_string(),
            audio_duration,
            processing_time_ms,
            language: self.config.language.clone().unwrap_or_else(|| "auto".to_string()),
            model_name,
        };

        self.record_success(&result).await;

        tracing::info!(
            "Transcription completed: {:.2}s audio -> {} chars in {}ms",
            audio_duration,
            result.text.chars().count(),
            processing_time_ms
        );

        Ok(result)
    }

    async fn record_success(&self, result: &TranscriptionResult) {
        let mut metrics = self.metrics.write().await;
        metrics.total_requests += 1;
        metrics.total_audio_duration += result.audio_duration;
        metrics.total_processing_time += result.processing_time_ms;
    }

    async fn record_failure(&self) {
        let mut metrics = self.metrics.write().await;
        metrics.total_requests += 1;
        metrics.failed_requests += 1;
    }

    /// Get performance statistics for the transcription engine.
    pub async fn performance_stats(&self) -> EnginePerformanceStats {
        let metrics = self.metrics.read().await;

        EnginePerformanceStats {
            total_requests: metrics.total_requests,
            total_audio_seconds: metrics.total_audio_duration,
            average_processing_time_ms: if metrics.total_requests > 0 {
                metrics.total_processing_time / metrics.total_requests
            } else {
                0
            },
            success_rate: if metrics.total_requests > 0 {
                (metrics.total_requests - metrics.failed_requests) as f32
                    / metrics.total_requests as f32
            } else {
                0.0
            },
        }
    }
}

#[async_trait]
impl Transcriber for TranscriptionEngine {
    async fn transcribe(&self, samples: &[f32]) -> Result<String> {
        let result = self.transcribe_audio(samples).await?;
        Ok(result.text)
    }
}

/// Performance statistics for the transcription engine.
#[derive(Debug, serde::Serialize)]
pub struct EnginePerformanceStats {
    pub total_requests: u64,
    pub total_audio_seconds: f64,
    pub average_processing_time_ms: u64,
    pub success_rate: f32,
}
