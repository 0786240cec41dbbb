//! # Model Management REST API Handlers
//!
//! HTTP endpoints for managing the Whisper model: listing available sizes,
//! loading a different size at runtime, and unloading to free memory.
//!
//! ## Available Endpoints:
//! - `GET /models` - Available model sizes and current status
//! - `POST /models/load` - Load a specific Whisper model size
//! - `POST /models/unload` - Unload the current model

use crate::error::AppError;
use crate::state::AppState;
use crate::transcription::ModelSize;
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;

/// Request body for loading a specific model.
#[derive(Debug, Deserialize)]
pub struct LoadModelRequest {
    /// Model size to load (tiny, base, small, medium, large)
    pub model_size: String,
}

/// List available model sizes and which one (if any) is loaded.
pub async fn list_models(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let current = state.engine.current_model_info().await;
    let stats = state.engine.performance_stats().await;

    let models: Vec<_> = ModelSize::all()
        .iter()
        .map(|size| {
            let loaded = current.as_ref().map(|info| info.size == *size).unwrap_or(false);
            json!({
                "name": size.to_string(),
                "description": size.description(),
                "size_mb": size.size_mb(),
                "repo": size.repo_name(),
                "loaded": loaded,
            })
        })
        .collect();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "models": models,
        "current": current,
        "memory_usage_bytes": state.engine.current_memory_usage().await,
        "performance": stats,
    })))
}

/// Load the requested model size, replacing any currently loaded model.
///
/// Blocks until the model is downloaded and validated, which can take a while
/// for the larger sizes on a cold cache.
pub async fn load_model(
    state: web::Data<AppState>,
    body: web::Json<LoadModelRequest>,
) -> Result<HttpResponse, AppError> {
    let size: ModelSize = body
        .model_size
        .parse()
        .map_err(|e: anyhow::Error| AppError::BadRequest(e.to_string()))?;

    state
        .engine
        .load_model(size)
        .await
        .map_err(|e| AppError::Internal(format!("Failed to load {} model: {}", size, e)))?;

    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "message": format!("Model {} loaded", size),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    })))
}

/// Unload the current model to free memory.
///
/// Tasks submitted while no model is loaded fail onto their rows with a
/// clear message rather than queueing up behind a dead engine.
pub async fn unload_model(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    state.engine.unload_model().await;

    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "message": "Model unloaded",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    })))
}
