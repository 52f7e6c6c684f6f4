use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing_subscriber::EnvFilter;

use video_qr_scan::{
    config::AppConfig,
    routes::metrics::describe_metrics,
    services::{
        coordinator::{Coordinator, CoordinatorSettings},
        frame_scan::FrameScanner,
        qr::RqrrDecoder,
        queue::RedisJobQueue,
        sampler::FfmpegSampler,
        store::{FileStore, JobStore},
    },
    shutdown::shutdown_signal,
};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting video QR worker");

    // Load configuration
    let config = AppConfig::from_env().expect("Failed to load configuration");

    if let Some(addr) = &config.metrics_addr {
        let addr: std::net::SocketAddr = addr.parse().expect("Invalid METRICS_ADDR");
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .expect("Failed to install Prometheus exporter");
        describe_metrics();
        tracing::info!(%addr, "Serving worker metrics");
    }

    let store = JobStore::new(FileStore::new(config.status_dir(), config.results_dir()));
    store
        .durable()
        .ensure_dirs()
        .await
        .expect("Failed to create data directories");
    let store = Arc::new(store);

    let threads = config.scan_threads();
    let scanner = Arc::new(
        FrameScanner::new(Arc::new(RqrrDecoder::default()), threads)
            .expect("Failed to build frame decode pool"),
    );
    let sampler = Arc::new(FfmpegSampler::new(&config.ffmpeg_path));

    tracing::info!(
        instances = config.worker_instances,
        scan_threads = threads,
        topic = %config.queue_topic,
        "Worker ready, starting coordinators"
    );

    // Instances of an earlier run with more coordinators may have left
    // unacked messages behind; nothing consumes until they are back.
    let recovered = RedisJobQueue::new(&config.redis_url, config.consumer_name.clone())
        .expect("Failed to initialize job queue")
        .recover_group(&config.queue_topic, &config.consumer_name)
        .await
        .expect("Failed to recover unacknowledged messages");
    if recovered > 0 {
        tracing::warn!(recovered, "Redelivering messages left unacknowledged by a previous run");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut coordinators = JoinSet::new();
    for i in 0..config.worker_instances.max(1) {
        let name = format!("{}-{}", config.consumer_name, i);
        let queue = RedisJobQueue::new(&config.redis_url, name.clone())
            .expect("Failed to initialize job queue")
            .with_dead_letter(config.dead_letter_topic.clone());

        let coordinator = Coordinator::new(
            Arc::new(queue),
            sampler.clone(),
            scanner.clone(),
            store.clone(),
            CoordinatorSettings {
                name,
                topic: config.queue_topic.clone(),
                frames_root: config.frames_dir(),
                consume_timeout: config.consume_timeout(),
            },
        );
        let shutdown = shutdown_rx.clone();
        coordinators.spawn(async move { coordinator.run(shutdown).await });
    }

    let mut failed = false;
    tokio::select! {
        _ = shutdown_signal() => {
            tracing::info!("Finishing in-flight jobs");
        }
        Some(result) = coordinators.join_next() => {
            failed = true;
            log_exit(result);
            tracing::error!("Coordinator stopped unexpectedly, shutting down worker");
        }
    }
    let _ = shutdown_tx.send(true);

    while let Some(result) = coordinators.join_next().await {
        failed |= log_exit(result);
    }

    tracing::info!("Worker shutdown complete");
    if failed {
        std::process::exit(1);
    }
}

/// Returns true if the coordinator ended abnormally.
fn log_exit(
    result: Result<Result<(), video_qr_scan::services::queue::QueueError>, tokio::task::JoinError>,
) -> bool {
    match result {
        Ok(Ok(())) => false,
        Ok(Err(e)) => {
            tracing::error!(error = %e, "Coordinator exited with error");
            true
        }
        Err(e) => {
            tracing::error!(error = %e, "Coordinator task panicked");
            true
        }
    }
}
