use std::path::PathBuf;

use crate::models::job::{Job, JobId, JobStatus};
use crate::services::queue::{publish_job, JobQueue, QueueError};
use crate::services::store::JobStore;

/// Producer side of the pipeline: assign an id, record `Queued`, publish.
///
/// The `Queued` status lives in the in-memory backend of this process; the
/// coordinator's durable writes take precedence once it picks the job up.
pub async fn submit_job(
    store: &JobStore,
    queue: &dyn JobQueue,
    topic: &str,
    source_path: impl Into<PathBuf>,
) -> Result<Job, QueueError> {
    let job = Job::new(JobId::generate(), source_path);
    store.memory().put_status(JobStatus::queued(job.id.clone()));

    if let Err(e) = publish_job(queue, topic, &job).await {
        tracing::error!(job_id = %job.id, error = %e, "Failed to enqueue job");
        store.memory().put_status(JobStatus::error(
            job.id.clone(),
            format!("failed to enqueue job: {e}"),
        ));
        return Err(e);
    }

    metrics::counter!("qr_jobs_submitted_total").increment(1);
    tracing::info!(job_id = %job.id, path = %job.source_path.display(), "Job submitted");
    Ok(job)
}
