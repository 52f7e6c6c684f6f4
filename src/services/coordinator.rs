//! Queue consumer that drives one job at a time through the pipeline.
//!
//! State machine per delivery:
//!
//! ```text
//! Queued -> Processing -> Completed   (results + status written, message acked)
//!                      -> Error       (status written, message rejected without requeue)
//!                      -> Error       (decoder unsupported on host, message acked)
//! malformed payload    -> (no write)  (message acked and dropped)
//! ```

use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

use crate::models::job::{Job, JobId, JobStatus};
use crate::services::frame_scan::{FrameScanner, ScanError, ScanReport};
use crate::services::qr::DecodeError;
use crate::services::queue::{Delivery, JobQueue, QueueError};
use crate::services::sampler::{FrameSampler, SamplerError};
use crate::services::store::{JobStore, StoreError};

const ERROR_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    /// Instance label used in logs.
    pub name: String,
    pub topic: String,
    /// Job-scoped frame directories are created under this root.
    pub frames_root: PathBuf,
    pub consume_timeout: Duration,
}

/// What happened to one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Completed { codes: usize },
    Failed,
    Unsupported,
    Dropped,
}

pub struct Coordinator {
    queue: Arc<dyn JobQueue>,
    sampler: Arc<dyn FrameSampler>,
    scanner: Arc<FrameScanner>,
    store: Arc<JobStore>,
    settings: CoordinatorSettings,
}

impl Coordinator {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        sampler: Arc<dyn FrameSampler>,
        scanner: Arc<FrameScanner>,
        store: Arc<JobStore>,
        settings: CoordinatorSettings,
    ) -> Self {
        Self {
            queue,
            sampler,
            scanner,
            store,
            settings,
        }
    }

    /// Consume until `shutdown` flips to true. The job in flight when the
    /// signal arrives is finished before returning.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), QueueError> {
        let topic = &self.settings.topic;
        self.queue.declare(topic).await?;

        let recovered = self.queue.recover(topic).await?;
        if recovered > 0 {
            tracing::warn!(
                instance = %self.settings.name,
                recovered,
                "Redelivering messages left unacknowledged by a previous run"
            );
        }

        tracing::info!(instance = %self.settings.name, topic = %topic, "Coordinator consuming");

        while !*shutdown.borrow() {
            // A consume cut short here leaves any message it took for `recover`.
            let consumed = tokio::select! {
                consumed = self.queue.consume(topic, self.settings.consume_timeout) => consumed,
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            };
            let settled = match consumed {
                Ok(Some(delivery)) => self.handle_delivery(&delivery).await.map(Some),
                Ok(None) => Ok(None),
                Err(e) => Err(e),
            };
            match settled {
                Ok(Some(outcome)) => {
                    tracing::debug!(instance = %self.settings.name, ?outcome, "Delivery settled");
                }
                Ok(None) => {
                    tracing::trace!(instance = %self.settings.name, "No jobs available");
                }
                Err(e) => {
                    tracing::error!(instance = %self.settings.name, error = %e, "Queue error, backing off");
                    tokio::select! {
                        _ = tokio::time::sleep(ERROR_BACKOFF) => {}
                        _ = shutdown.changed() => {}
                    }
                }
            }
        }

        tracing::info!(instance = %self.settings.name, "Coordinator stopped");
        Ok(())
    }

    /// Wait for one delivery and process it. `Ok(None)` if none arrived in time.
    pub async fn run_once(&self) -> Result<Option<Outcome>, QueueError> {
        let delivery = self
            .queue
            .consume(&self.settings.topic, self.settings.consume_timeout)
            .await?;
        match delivery {
            Some(delivery) => self.handle_delivery(&delivery).await.map(Some),
            None => Ok(None),
        }
    }

    /// Drive one delivery to a settled state. Errors are only returned when
    /// the queue itself cannot be settled.
    pub async fn handle_delivery(&self, delivery: &Delivery) -> Result<Outcome, QueueError> {
        let job = match Job::from_payload(&delivery.payload) {
            Ok(job) => job,
            Err(e) => {
                tracing::warn!(payload = %delivery.payload, error = %e, "Dropping malformed job message");
                metrics::counter!("qr_messages_dropped_total").increment(1);
                self.queue.ack(delivery).await?;
                return Ok(Outcome::Dropped);
            }
        };

        let _guard = self.store.lock(&job.id).await;
        let start = Instant::now();

        tracing::info!(
            instance = %self.settings.name,
            job_id = %job.id,
            path = %job.source_path.display(),
            "Processing video job"
        );

        if let Err(e) = self.begin(&job).await {
            tracing::error!(job_id = %job.id, error = %e, "Failed to record processing state");
            self.fail(&job, delivery, e.to_string()).await?;
            return Ok(Outcome::Failed);
        }

        let outcome = match self.run_pipeline(&job).await {
            Ok(report) => self.finish(&job, delivery, report).await?,
            Err(PipelineError::Unsupported(detail)) => {
                let detail = format!("QR decoding is not supported on this host: {detail}");
                tracing::error!(job_id = %job.id, detail = %detail, "Frame scan unavailable");
                match self.store.write_status(&JobStatus::error(job.id.clone(), detail)).await {
                    // Retrying on this host would fail the same way.
                    Ok(()) => self.queue.ack(delivery).await?,
                    Err(e) => {
                        tracing::error!(job_id = %job.id, error = %e, "Failed to write job status");
                        self.queue.reject(delivery, false).await?;
                    }
                }
                metrics::counter!("qr_jobs_failed_total", "reason" => "unsupported").increment(1);
                Outcome::Unsupported
            }
            Err(e) => {
                tracing::error!(job_id = %job.id, error = %e, "Job processing failed");
                self.fail(&job, delivery, e.to_string()).await?;
                Outcome::Failed
            }
        };

        self.cleanup_frames(&job.id).await;
        metrics::histogram!("qr_job_processing_seconds").record(start.elapsed().as_secs_f64());

        Ok(outcome)
    }

    async fn begin(&self, job: &Job) -> Result<(), StoreError> {
        if let Ok(Some(previous)) = self.store.status(&job.id).await {
            if previous.state.is_terminal() {
                tracing::info!(
                    job_id = %job.id,
                    previous_state = %previous.state,
                    "Reprocessing job"
                );
            }
        }
        self.store
            .write_status(&JobStatus::processing(job.id.clone()))
            .await?;
        self.store.clear_results(&job.id).await
    }

    async fn run_pipeline(&self, job: &Job) -> Result<ScanReport, PipelineError> {
        self.scanner
            .decoder()
            .check_support()
            .map_err(|e| match e {
                DecodeError::Unsupported(detail) => PipelineError::Unsupported(detail),
                other => PipelineError::Decode(other),
            })?;

        let frames_dir = self.frames_dir(&job.id);
        reset_dir(&frames_dir).await?;

        self.sampler.sample(&job.source_path, &frames_dir).await?;
        tracing::info!(job_id = %job.id, dir = %frames_dir.display(), "Frames extracted");

        let scanner = self.scanner.clone();
        let report = tokio::task::spawn_blocking(move || scanner.scan_dir(&frames_dir)).await??;

        metrics::counter!("qr_frames_scanned_total").increment(report.frames_scanned as u64);
        if report.frames_failed > 0 {
            tracing::warn!(
                job_id = %job.id,
                frames_failed = report.frames_failed,
                frames_scanned = report.frames_scanned,
                "Some frames could not be decoded"
            );
        }
        Ok(report)
    }

    async fn finish(
        &self,
        job: &Job,
        delivery: &Delivery,
        report: ScanReport,
    ) -> Result<Outcome, QueueError> {
        if let Err(e) = self.persist_results(job, &report).await {
            tracing::error!(job_id = %job.id, error = %e, "Failed to persist job results");
            self.fail(job, delivery, e.to_string()).await?;
            return Ok(Outcome::Failed);
        }

        self.queue.ack(delivery).await?;
        metrics::counter!("qr_jobs_completed_total").increment(1);
        metrics::counter!("qr_codes_found_total").increment(report.results.len() as u64);
        tracing::info!(
            job_id = %job.id,
            codes = report.results.len(),
            frames = report.frames_scanned,
            "Job completed"
        );
        Ok(Outcome::Completed {
            codes: report.results.len(),
        })
    }

    /// Results first, so a `Completed` status never points at missing results.
    async fn persist_results(&self, job: &Job, report: &ScanReport) -> Result<(), StoreError> {
        self.store.write_results(&job.id, &report.results).await?;
        self.store
            .write_status(&JobStatus::completed(job.id.clone()))
            .await
    }

    /// Record `Error` and reject without requeue.
    async fn fail(&self, job: &Job, delivery: &Delivery, detail: String) -> Result<(), QueueError> {
        if let Err(e) = self
            .store
            .write_status(&JobStatus::error(job.id.clone(), detail))
            .await
        {
            tracing::error!(job_id = %job.id, error = %e, "Failed to write job status");
        }
        metrics::counter!("qr_jobs_failed_total", "reason" => "pipeline").increment(1);
        self.queue.reject(delivery, false).await
    }

    fn frames_dir(&self, id: &JobId) -> PathBuf {
        self.settings.frames_root.join(id.as_str())
    }

    async fn cleanup_frames(&self, id: &JobId) {
        let dir = self.frames_dir(id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(job_id = %id, dir = %dir.display(), error = %e, "Failed to remove frames");
            }
        }
    }
}

/// Start from an empty directory so frames from an earlier run of the same
/// id are never rescanned.
async fn reset_dir(dir: &std::path::Path) -> Result<(), PipelineError> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(source) => {
            return Err(PipelineError::Io {
                path: dir.display().to_string(),
                source,
            })
        }
    }
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|source| PipelineError::Io {
            path: dir.display().to_string(),
            source,
        })
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("{0}")]
    Unsupported(String),

    #[error(transparent)]
    Sampler(#[from] SamplerError),

    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("cannot prepare frames directory {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("frame scan task aborted: {0}")]
    Join(#[from] tokio::task::JoinError),
}
