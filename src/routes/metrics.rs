use axum::extract::State;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

/// Prometheus metrics scrape endpoint.
pub async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    handle.render()
}

/// Register descriptions for every metric the pipeline emits.
pub fn describe_metrics() {
    metrics::describe_counter!("qr_jobs_submitted_total", "Jobs published to the queue");
    metrics::describe_counter!("qr_jobs_completed_total", "Jobs that reached Completed");
    metrics::describe_counter!("qr_jobs_failed_total", "Jobs that reached Error, by reason");
    metrics::describe_counter!(
        "qr_messages_dropped_total",
        "Malformed queue messages acknowledged without processing"
    );
    metrics::describe_counter!("qr_frames_scanned_total", "Frames passed to the QR decoder");
    metrics::describe_counter!("qr_codes_found_total", "QR codes decoded across all jobs");
    metrics::describe_histogram!(
        "qr_job_processing_seconds",
        "Time from dequeue to settled delivery"
    );
    metrics::describe_gauge!("qr_queue_depth", "Messages waiting on the job topic");
}
