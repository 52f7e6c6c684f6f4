use std::sync::Arc;
use std::time::Duration;

use video_qr_scan::{
    models::job::{Job, JobId, JobState},
    services::{
        coordinator::{Coordinator, CoordinatorSettings, Outcome},
        frame_scan::FrameScanner,
        qr::RqrrDecoder,
        queue::{publish_job, JobQueue, RedisJobQueue},
        sampler::{FfmpegSampler, FrameSampler},
        store::{FileStore, JobStore},
    },
};

fn redis_url() -> String {
    dotenvy::dotenv().ok();
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

fn unique_topic() -> String {
    format!("video_queue_test_{}", uuid::Uuid::new_v4().simple())
}

/// Redis queue: publish, consume, ack, and redelivery of an unacked message.
///
/// Requires a running Redis instance at `REDIS_URL`.
#[tokio::test]
#[ignore] // Run with: cargo test --test integration_test -- --ignored
async fn test_redis_queue_round_trip() {
    let topic = unique_topic();
    let queue = RedisJobQueue::new(&redis_url(), "itest").expect("Failed to create Redis client");
    queue.health_check().await.expect("Redis not reachable");
    queue.declare(&topic).await.unwrap();

    let first = Job::new(JobId::parse("first").unwrap(), "/videos/1.mp4");
    let second = Job::new(JobId::parse("second").unwrap(), "/videos/2.mp4");
    publish_job(&queue, &topic, &first).await.unwrap();
    publish_job(&queue, &topic, &second).await.unwrap();
    assert_eq!(queue.depth(&topic).await.unwrap(), 2);

    let delivery = queue
        .consume(&topic, Duration::from_secs(1))
        .await
        .unwrap()
        .expect("message expected");
    assert_eq!(Job::from_payload(&delivery.payload).unwrap(), first);
    queue.ack(&delivery).await.unwrap();

    // Take the second and "crash" before settling it.
    let unsettled = queue
        .consume(&topic, Duration::from_secs(1))
        .await
        .unwrap()
        .expect("message expected");
    assert_eq!(queue.depth(&topic).await.unwrap(), 0);

    let restarted = RedisJobQueue::new(&redis_url(), "itest").unwrap();
    assert_eq!(restarted.recover(&topic).await.unwrap(), 1);
    let redelivered = restarted
        .consume(&topic, Duration::from_secs(1))
        .await
        .unwrap()
        .expect("redelivery expected");
    assert_eq!(redelivered.payload, unsettled.payload);
    restarted.ack(&redelivered).await.unwrap();

    assert!(restarted
        .consume(&topic, Duration::from_secs(1))
        .await
        .unwrap()
        .is_none());
}

/// A restart with fewer instances still redelivers what the dropped
/// instances had taken.
#[tokio::test]
#[ignore]
async fn test_redis_recover_group_after_scale_down() {
    let topic = unique_topic();
    let producer = RedisJobQueue::new(&redis_url(), "producer").unwrap();
    producer.publish(&topic, "one").await.unwrap();
    producer.publish(&topic, "two").await.unwrap();

    for consumer in ["grp-0", "grp-3"] {
        let queue = RedisJobQueue::new(&redis_url(), consumer).unwrap();
        assert!(queue
            .consume(&topic, Duration::from_secs(1))
            .await
            .unwrap()
            .is_some());
    }
    assert_eq!(producer.depth(&topic).await.unwrap(), 0);

    let restarted = RedisJobQueue::new(&redis_url(), "grp").unwrap();
    assert_eq!(restarted.recover_group(&topic, "grp").await.unwrap(), 2);
    assert_eq!(producer.depth(&topic).await.unwrap(), 2);
    assert_eq!(restarted.recover_group(&topic, "grp").await.unwrap(), 0);
}

/// Rejected messages land on the dead-letter list.
#[tokio::test]
#[ignore]
async fn test_redis_reject_to_dead_letter() {
    let topic = unique_topic();
    let dead = format!("{topic}:dead");
    let queue = RedisJobQueue::new(&redis_url(), "itest")
        .unwrap()
        .with_dead_letter(Some(dead.clone()));

    queue.publish(&topic, "payload").await.unwrap();
    let delivery = queue
        .consume(&topic, Duration::from_secs(1))
        .await
        .unwrap()
        .unwrap();
    queue.reject(&delivery, false).await.unwrap();

    assert_eq!(queue.depth(&topic).await.unwrap(), 0);
    assert_eq!(queue.depth(&dead).await.unwrap(), 1);
    assert_eq!(queue.recover(&topic).await.unwrap(), 0);
}

/// Real ffmpeg on a generated clip with no QR code in it.
///
/// Requires `ffmpeg` on PATH (or `FFMPEG_PATH`).
#[tokio::test]
#[ignore]
async fn test_ffmpeg_samples_one_frame_per_second() {
    let program = std::env::var("FFMPEG_PATH").unwrap_or_else(|_| "ffmpeg".to_string());
    let dir = tempfile::tempdir().unwrap();
    let video = dir.path().join("clip.mp4");

    let status = tokio::process::Command::new(&program)
        .args(["-y", "-hide_banner", "-loglevel", "error", "-f", "lavfi"])
        .args(["-i", "color=c=white:s=160x120:d=3:r=10"])
        .arg(&video)
        .status()
        .await
        .expect("ffmpeg not available");
    assert!(status.success());

    let frames = dir.path().join("frames");
    std::fs::create_dir_all(&frames).unwrap();
    FfmpegSampler::new(&program).sample(&video, &frames).await.unwrap();
    let count = std::fs::read_dir(&frames).unwrap().count();
    assert!((3..=4).contains(&count), "got {count} frames");
}

/// Full pipeline with Redis, ffmpeg and the rqrr decoder.
#[tokio::test]
#[ignore]
async fn test_full_pipeline_against_live_services() {
    let program = std::env::var("FFMPEG_PATH").unwrap_or_else(|_| "ffmpeg".to_string());
    let dir = tempfile::tempdir().unwrap();
    let video = dir.path().join("blank.mp4");
    let status = tokio::process::Command::new(&program)
        .args(["-y", "-hide_banner", "-loglevel", "error", "-f", "lavfi"])
        .args(["-i", "color=c=black:s=160x120:d=2:r=5"])
        .arg(&video)
        .status()
        .await
        .expect("ffmpeg not available");
    assert!(status.success());

    let topic = unique_topic();
    let queue = Arc::new(RedisJobQueue::new(&redis_url(), "itest-pipeline").unwrap());
    let store = Arc::new(JobStore::new(FileStore::new(
        dir.path().join("status"),
        dir.path().join("results"),
    )));
    let scanner = Arc::new(FrameScanner::new(Arc::new(RqrrDecoder::default()), 2).unwrap());
    let coordinator = Coordinator::new(
        queue.clone(),
        Arc::new(FfmpegSampler::new(&program)),
        scanner,
        store.clone(),
        CoordinatorSettings {
            name: "itest-0".to_string(),
            topic: topic.clone(),
            frames_root: dir.path().join("frames"),
            consume_timeout: Duration::from_secs(1),
        },
    );

    let job = Job::new(JobId::generate(), &video);
    publish_job(queue.as_ref(), &topic, &job).await.unwrap();

    let outcome = coordinator.run_once().await.unwrap();
    assert_eq!(outcome, Some(Outcome::Completed { codes: 0 }));
    let status = store.status(&job.id).await.unwrap().unwrap();
    assert_eq!(status.state, JobState::Completed);
}
