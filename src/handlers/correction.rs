//! # Correction REST API Handlers
//!
//! The upload-and-correct surface: accept a recitation recording plus its
//! reference ayah, hand the work to the background queue, and let clients
//! poll the resulting task.
//!
//! ## Available Endpoints:
//! - `POST /quran-correct` - multipart upload (file + ayah), returns the task id
//! - `GET /tasks/{task_id}` - full task row, 404 when unknown
//! - `GET /tasks` - recent tasks, newest first

use crate::error::AppError;
use crate::state::AppState;
use crate::tasks::CorrectionJob;
use actix_multipart::form::{tempfile::TempFile, text::Text, MultipartForm};
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;

const DEFAULT_LIST_LIMIT: usize = 20;
const MAX_LIST_LIMIT: usize = 100;

/// Multipart form for a correction upload.
///
/// The audio lands in a scoped temp file straight from the extractor; the
/// file travels to the worker as a `TempPath`, which removes it on drop even
/// when no worker ever picks the job up.
#[derive(Debug, MultipartForm)]
pub struct CorrectionForm {
    /// The recitation recording (WAV or raw 16-bit PCM)
    #[multipart(limit = "25MB")]
    pub file: TempFile,

    /// The reference ayah to compare the recitation against
    pub ayah: Text<String>,
}

/// Query parameters for the recent-tasks listing.
#[derive(Debug, Deserialize)]
pub struct ListTasksQuery {
    pub limit: Option<usize>,
}

/// Accept an upload, create the pending task, enqueue the background job.
///
/// Returns 202 with the task id immediately; the transcription happens off
/// the request path. An enqueue failure is recorded on the task row before
/// the error response goes out, so the task is never silently stuck.
pub async fn quran_correct(
    state: web::Data<AppState>,
    MultipartForm(form): MultipartForm<CorrectionForm>,
) -> Result<HttpResponse, AppError> {
    let ayah = form.ayah.0.trim().to_string();
    if ayah.is_empty() {
        return Err(AppError::ValidationError(
            "Field 'ayah' must not be empty".to_string(),
        ));
    }

    if form.file.size == 0 {
        return Err(AppError::ValidationError(
            "Uploaded audio file is empty".to_string(),
        ));
    }

    let task = state.store.create(&ayah).await?;

    let job = CorrectionJob {
        task_id: task.id.clone(),
        reference_text: ayah,
        audio: form.file.file.into_temp_path(),
    };

    if let Err(e) = state.queue.enqueue(job) {
        state.store.fail(&task.id, &e.to_string()).await?;
        return Err(e);
    }

    state.increment_active_tasks();
    tracing::info!(task_id = %task.id, "Accepted correction upload");

    Ok(HttpResponse::Accepted().json(json!({
        "task_id": task.id,
        "status": task.status,
    })))
}

/// Look up a single task by id.
pub async fn get_task(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let task_id = path.into_inner();

    match state.store.get(&task_id).await? {
        Some(task) => Ok(HttpResponse::Ok().json(task)),
        None => Err(AppError::NotFound(format!("No task with id {}", task_id))),
    }
}

/// List recently created tasks, newest first.
pub async fn list_tasks(
    state: web::Data<AppState>,
    query: web::Query<ListTasksQuery>,
) -> Result<HttpResponse, AppError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .min(MAX_LIST_LIMIT);

    let tasks = state.store.list_recent(limit).await?;

    Ok(HttpResponse::Ok().json(json!({
        "count": tasks.len(),
        "tasks": tasks,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::state::AppMetrics;
    use crate::tasks::{TaskQueue, TaskStatus, TaskStore};
    use crate::transcription::{Transcriber, TranscriptionConfig, TranscriptionEngine};
    use actix_web::{test, App};
    use anyhow::Result;
    use async_trait::async_trait;
    use candle_core::Device;
    use std::sync::{Arc, RwLock};
    use std::time::Duration;

    struct EchoTranscriber(String);

    #[async_trait]
    impl Transcriber for EchoTranscriber {
        async fn transcribe(&self, _samples: &[f32]) -> Result<String> {
            Ok(self.0.clone())
        }
    }

    fn test_state(recognized: &str) -> AppState {
        let config = AppConfig::default();
        let store = TaskStore::open_in_memory(16).unwrap();
        let engine = Arc::new(TranscriptionEngine::new(
            TranscriptionConfig::default(),
            Device::Cpu,
        ));
        let metrics = Arc::new(RwLock::new(AppMetrics::default()));
        let queue = TaskQueue::start(
            store.clone(),
            Arc::new(EchoTranscriber(recognized.to_string())),
            &config.worker,
            Arc::clone(&metrics),
        );
        AppState::new(config, store, engine, queue, metrics)
    }

    fn multipart_body(boundary: &str, ayah: &str, audio: &[u8]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"ayah\"\r\n\r\n{ayah}\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; \
                 filename=\"recitation.wav\"\r\nContent-Type: audio/wav\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(audio);
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
        body
    }

    fn silence_wav(seconds: usize) -> Vec<u8> {
        let header = wav::Header::new(wav::WAV_FORMAT_PCM, 1, 16_000, 16);
        let track = wav::BitDepth::Sixteen(vec![0i16; 16_000 * seconds]);
        let mut cursor = std::io::Cursor::new(Vec::new());
        wav::write(header, &track, &mut cursor).unwrap();
        cursor.into_inner()
    }

    #[actix_web::test]
    async fn test_get_unknown_task_is_404() {
        let state = test_state("unused");
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/tasks/{task_id}", web::get().to(get_task)),
        )
        .await;

        let req = test::TestRequest::get().uri("/tasks/does-not-exist").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 404);
    }

    #[actix_web::test]
    async fn test_get_task_returns_full_row() {
        let state = test_state("unused");
        let task = state.store.create("بسم الله").await.unwrap();

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/tasks/{task_id}", web::get().to(get_task)),
        )
        .await;

        let req = test::TestRequest::get()
            .uri(&format!("/tasks/{}", task.id))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["id"], task.id.as_str());
        assert_eq!(body["status"], "pending");
        assert_eq!(body["reference_text"], "بسم الله");
        assert!(body["recognized_text"].is_null());
    }

    #[actix_web::test]
    async fn test_list_tasks_newest_first_with_limit() {
        let state = test_state("unused");
        state.store.create("one").await.unwrap();
        let newest = state.store.create("two").await.unwrap();

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/tasks", web::get().to(list_tasks)),
        )
        .await;

        let req = test::TestRequest::get().uri("/tasks?limit=1").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["count"], 1);
        assert_eq!(body["tasks"][0]["id"], newest.id.as_str());
    }

    #[actix_web::test]
    async fn test_upload_runs_to_completion() {
        let state = test_state("بسم الله الرحمن الرحيم");
        let store = state.store.clone();

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/quran-correct", web::post().to(quran_correct)),
        )
        .await;

        let boundary = "----correction-test-boundary";
        let body = multipart_body(boundary, "بسم الله الرحمن الرحيم", &silence_wav(1));

        let req = test::TestRequest::post()
            .uri("/quran-correct")
            .insert_header((
                "content-type",
                format!("multipart/form-data; boundary={boundary}"),
            ))
            .set_payload(body)
            .to_request();
        let resp: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        let task_id = resp["task_id"].as_str().expect("task_id in response").to_string();
        assert_eq!(resp["status"], "pending");

        // The upload must eventually land on a terminal state.
        let mut task = store.get(&task_id).await.unwrap().unwrap();
        for _ in 0..200 {
            if task.status.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            task = store.get(&task_id).await.unwrap().unwrap();
        }

        assert_eq!(task.status, TaskStatus::Completed);
        // Recognized text matches the reference exactly, so feedback is empty.
        assert_eq!(task.feedback.as_deref(), Some(""));
    }

    #[actix_web::test]
    async fn test_upload_with_blank_ayah_is_rejected() {
        let state = test_state("unused");
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/quran-correct", web::post().to(quran_correct)),
        )
        .await;

        let boundary = "----correction-test-boundary";
        let body = multipart_body(boundary, "   ", &silence_wav(1));

        let req = test::TestRequest::post()
            .uri("/quran-correct")
            .insert_header((
                "content-type",
                format!("multipart/form-data; boundary={boundary}"),
            ))
            .set_payload(body)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 400);
    }
}
