//! # Correction Queue
//!
//! Explicit task queue plus worker loop for background correction jobs.
//! Uploads enqueue a job and return immediately; workers drain the queue,
//! drive each recording through decode → transcribe → diff, and land the
//! outcome on the task row.
//!
//! ## Key Responsibilities:
//! - **Dispatch**: bounded mpsc channel, enqueue failures land on the task row
//! - **Execution**: decode the upload, enforce duration limits, transcribe, diff
//! - **Cleanup**: the temp file is removed regardless of outcome
//! - **No retry**: a failed job is terminal; the error message is the result

use crate::audio;
use crate::config::WorkerConfig;
use crate::diff;
use crate::error::{AppError, AppResult};
use crate::state::AppMetrics;
use crate::tasks::store::TaskStore;
use crate::transcription::Transcriber;
use anyhow::{anyhow, Result};
use std::path::Path;
use std::sync::{Arc, RwLock};
use tempfile::TempPath;
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, warn};

/// One unit of background work, keyed by the task id it reports into.
///
/// The uploaded audio travels as a `TempPath`, so even a job that is dropped
/// without running (queue shutdown) takes its temp file with it.
pub struct CorrectionJob {
    pub task_id: String,
    pub reference_text: String,
    pub audio: TempPath,
}

/// Duration limits enforced before transcription.
#[derive(Debug, Clone, Copy)]
struct WorkerLimits {
    min_audio_duration: f64,
    max_audio_duration: f64,
}

/// Handle to the correction queue. Cheap to clone; all clones feed the same
/// channel.
#[derive(Clone)]
pub struct TaskQueue {
    sender: mpsc::Sender<CorrectionJob>,
}

impl TaskQueue {
    /// Spawn the worker pool and return the enqueue handle.
    ///
    /// The receiver sits behind an async mutex so a configurable number of
    /// workers can share one channel; the default count of 1 preserves strict
    /// upload-order processing.
    pub fn start(
        store: TaskStore,
        transcriber: Arc<dyn Transcriber>,
        config: &WorkerConfig,
        metrics: Arc<RwLock<AppMetrics>>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_depth);
        let receiver = Arc::new(Mutex::new(receiver));
        let limits = WorkerLimits {
            min_audio_duration: config.min_audio_duration,
            max_audio_duration: config.max_audio_duration,
        };

        for worker_id in 0..config.count {
            tokio::spawn(worker_loop(
                worker_id,
                Arc::clone(&receiver),
                store.clone(),
                Arc::clone(&transcriber),
                limits,
                Arc::clone(&metrics),
            ));
        }

        info!(workers = config.count, queue_depth = config.queue_depth, "Correction queue started");
        Self { sender }
    }

    /// Enqueue a job without waiting.
    ///
    /// Fails when the queue is full or the workers are gone; the caller
    /// records that failure on the task row.
    pub fn enqueue(&self, job: CorrectionJob) -> AppResult<()> {
        self.sender.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                AppError::Internal("Correction queue is full, try again later".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => {
                AppError::Internal("Correction queue is not running".to_string())
            }
        })
    }
}

/// Drain jobs until the channel closes.
async fn worker_loop(
    worker_id: usize,
    receiver: Arc<Mutex<mpsc::Receiver<CorrectionJob>>>,
    store: TaskStore,
    transcriber: Arc<dyn Transcriber>,
    limits: WorkerLimits,
    metrics: Arc<RwLock<AppMetrics>>,
) {
    info!(worker_id, "Correction worker started");

    loop {
        // Hold the receiver lock only for the duration of one recv so idle
        // workers don't starve each other.
        let job = { receiver.lock().await.recv().await };

        let Some(job) = job else {
            info!(worker_id, "Correction queue closed, worker exiting");
            break;
        };

        let task_id = job.task_id.clone();
        if let Err(e) = process_job(&store, transcriber.as_ref(), limits, job).await {
            // Store-level failures: the outcome could not be recorded at all.
            error!(worker_id, task_id = %task_id, error = %e, "Failed to record task outcome");
        }

        let mut metrics = metrics.write().unwrap();
        if metrics.active_tasks > 0 {
            metrics.active_tasks -= 1;
        }
    }
}

/// Run one job end-to-end and land its outcome on the task row.
async fn process_job(
    store: &TaskStore,
    transcriber: &dyn Transcriber,
    limits: WorkerLimits,
    job: CorrectionJob,
) -> AppResult<()> {
    let CorrectionJob {
        task_id,
        reference_text,
        audio,
    } = job;

    let picked = store.mark_processing(&task_id).await?;
    if !picked {
        warn!(task_id = %task_id, "Task was not pending at pickup, skipping");
        remove_temp_file(&task_id, audio);
        return Ok(());
    }

    let outcome = run_correction(transcriber, limits, &audio).await;

    // Cleanup path: the temp file goes away whether transcription worked or not.
    remove_temp_file(&task_id, audio);

    match outcome {
        Ok(recognized) => {
            let feedback = diff::recitation_feedback(&reference_text, &recognized);
            let similarity = diff::similarity_ratio(&reference_text, &recognized);
            store.complete(&task_id, &recognized, &feedback).await?;
            info!(task_id = %task_id, similarity, "Correction task completed");
        }
        Err(e) => {
            store.fail(&task_id, &e.to_string()).await?;
            warn!(task_id = %task_id, error = %e, "Correction task failed");
        }
    }

    Ok(())
}

/// Decode the upload, enforce duration limits, and transcribe it.
async fn run_correction(
    transcriber: &dyn Transcriber,
    limits: WorkerLimits,
    audio_path: &Path,
) -> Result<String> {
    let path = audio_path.to_path_buf();
    let samples = tokio::task::spawn_blocking(move || audio::decode_file(&path))
        .await
        .map_err(|e| anyhow!("Audio decode task failed: {}", e))??;

    let duration = samples.len() as f64 / audio::TARGET_SAMPLE_RATE as f64;
    if duration < limits.min_audio_duration {
        return Err(anyhow!(
            "Audio too short: {:.2}s (minimum: {:.2}s)",
            duration,
            limits.min_audio_duration
        ));
    }
    if duration > limits.max_audio_duration {
        return Err(anyhow!(
            "Audio too long: {:.2}s (maximum: {:.2}s)",
            duration,
            limits.max_audio_duration
        ));
    }

    transcriber.transcribe(&samples).await
}

fn remove_temp_file(task_id: &str, audio: TempPath) {
    if let Err(e) = audio.close() {
        warn!(task_id = %task_id, error = %e, "Failed to remove temp audio file");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::store::TaskStatus;
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::time::Duration;

    /// Scripted transcriber: always recognizes the same text.
    struct FixedTranscriber(String);

    #[async_trait]
    impl Transcriber for FixedTranscriber {
        async fn transcribe(&self, _samples: &[f32]) -> Result<String> {
            Ok(self.0.clone())
        }
    }

    /// Scripted transcriber: always fails.
    struct FailingTranscriber;

    #[async_trait]
    impl Transcriber for FailingTranscriber {
        async fn transcribe(&self, _samples: &[f32]) -> Result<String> {
            Err(anyhow!("model exploded"))
        }
    }

    fn limits() -> WorkerLimits {
        WorkerLimits {
            min_audio_duration: 0.5,
            max_audio_duration: 120.0,
        }
    }

    /// One second of silence as a mono 16kHz WAV in a temp file.
    fn temp_wav() -> (TempPath, PathBuf) {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let header = wav::Header::new(wav::WAV_FORMAT_PCM, 1, 16_000, 16);
        let track = wav::BitDepth::Sixteen(vec![0i16; 16_000]);
        wav::write(header, &track, file.as_file_mut()).unwrap();
        let path = file.path().to_path_buf();
        (file.into_temp_path(), path)
    }

    fn job_for(task: &crate::tasks::store::Task) -> (CorrectionJob, PathBuf) {
        let (audio, path) = temp_wav();
        (
            CorrectionJob {
                task_id: task.id.clone(),
                reference_text: task.reference_text.clone(),
                audio,
            },
            path,
        )
    }

    #[tokio::test]
    async fn test_job_completes_and_removes_temp_file() {
        let store = TaskStore::open_in_memory(16).unwrap();
        let task = store.create("بسم الله الرحمن الرحيم").await.unwrap();
        let (job, path) = job_for(&task);

        let transcriber = FixedTranscriber("بسم الله الرحمن".to_string());
        process_job(&store, &transcriber, limits(), job).await.unwrap();

        let done = store.get(&task.id).await.unwrap().unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(done.recognized_text.as_deref(), Some("بسم الله الرحمن"));
        assert!(done.feedback.as_ref().is_some_and(|f| !f.is_empty()));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_perfect_recitation_gets_empty_feedback() {
        let store = TaskStore::open_in_memory(16).unwrap();
        let task = store.create("قل هو الله أحد").await.unwrap();
        let (job, _path) = job_for(&task);

        let transcriber = FixedTranscriber("قل هو الله أحد".to_string());
        process_job(&store, &transcriber, limits(), job).await.unwrap();

        let done = store.get(&task.id).await.unwrap().unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(done.feedback.as_deref(), Some(""));
    }

    #[tokio::test]
    async fn test_failed_transcription_lands_on_row_and_cleans_up() {
        let store = TaskStore::open_in_memory(16).unwrap();
        let task = store.create("ayah").await.unwrap();
        let (job, path) = job_for(&task);

        process_job(&store, &FailingTranscriber, limits(), job).await.unwrap();

        let failed = store.get(&task.id).await.unwrap().unwrap();
        assert_eq!(failed.status, TaskStatus::Error);
        assert!(failed
            .error_message
            .as_ref()
            .is_some_and(|m| m.contains("model exploded")));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_too_short_audio_is_rejected() {
        let store = TaskStore::open_in_memory(16).unwrap();
        let task = store.create("ayah").await.unwrap();

        let mut file = tempfile::NamedTempFile::new().unwrap();
        let header = wav::Header::new(wav::WAV_FORMAT_PCM, 1, 16_000, 16);
        // 0.1s, below the 0.5s minimum.
        let track = wav::BitDepth::Sixteen(vec![0i16; 1_600]);
        wav::write(header, &track, file.as_file_mut()).unwrap();
        let job = CorrectionJob {
            task_id: task.id.clone(),
            reference_text: task.reference_text.clone(),
            audio: file.into_temp_path(),
        };

        let transcriber = FixedTranscriber("unused".to_string());
        process_job(&store, &transcriber, limits(), job).await.unwrap();

        let failed = store.get(&task.id).await.unwrap().unwrap();
        assert_eq!(failed.status, TaskStatus::Error);
        assert!(failed
            .error_message
            .as_ref()
            .is_some_and(|m| m.contains("too short")));
    }

    #[tokio::test]
    async fn test_queue_drains_to_terminal_state() {
        let store = TaskStore::open_in_memory(16).unwrap();
        let metrics = Arc::new(RwLock::new(AppMetrics::default()));
        let config = WorkerConfig {
            count: 1,
            queue_depth: 8,
            min_audio_duration: 0.5,
            max_audio_duration: 120.0,
        };
        let queue = TaskQueue::start(
            store.clone(),
            Arc::new(FixedTranscriber("الحمد لله".to_string())),
            &config,
            metrics,
        );

        let task = store.create("الحمد لله").await.unwrap();
        let (job, path) = {
            let (audio, path) = temp_wav();
            (
                CorrectionJob {
                    task_id: task.id.clone(),
                    reference_text: task.reference_text.clone(),
                    audio,
                },
                path,
            )
        };
        queue.enqueue(job).unwrap();

        // Never stuck at pending: the task reaches a terminal state.
        let mut status = TaskStatus::Pending;
        for _ in 0..200 {
            status = store.get(&task.id).await.unwrap().unwrap().status;
            if status.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(status, TaskStatus::Completed);
        assert!(!path.exists());
        let done = store.get(&task.id).await.unwrap().unwrap();
        assert_eq!(done.feedback.as_deref(), Some(""));
    }
}
