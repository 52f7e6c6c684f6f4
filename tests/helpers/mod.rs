//! Test doubles for the external collaborators and a wired-up pipeline
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use video_qr_scan::{
    app_state::AppState,
    services::{
        coordinator::{Coordinator, CoordinatorSettings},
        frame_scan::FrameScanner,
        qr::{DecodeError, QrDecoder},
        queue::InMemoryJobQueue,
        sampler::{FrameSampler, SamplerError},
        store::{FileStore, JobStore},
    },
};

use crate::fixtures::VideoFixture;

pub const TOPIC: &str = "video_queue";

/// Stands in for ffmpeg: "videos" are registered by path, and sampling one
/// writes `frame-NNNN.png` placeholders. Unknown paths fail the way ffmpeg
/// does for a missing input.
#[derive(Default)]
pub struct FakeSampler {
    videos: Mutex<HashMap<PathBuf, usize>>,
}

impl FakeSampler {
    pub fn add_video(&self, path: impl Into<PathBuf>, frames: usize) {
        self.videos.lock().unwrap().insert(path.into(), frames);
    }
}

#[async_trait]
impl FrameSampler for FakeSampler {
    async fn sample(&self, source: &Path, output_dir: &Path) -> Result<(), SamplerError> {
        let frames = self.videos.lock().unwrap().get(source).copied();
        let Some(frames) = frames else {
            return Err(SamplerError::Failed {
                exit_code: Some(1),
                stderr: format!("{}: No such file or directory", source.display()),
            });
        };
        for i in 1..=frames {
            std::fs::write(output_dir.join(format!("frame-{i:04}.png")), b"").unwrap();
        }
        Ok(())
    }
}

/// Decoder scripted per (frames directory, frame file). Each frame sleeps a
/// little less than the one before so decodes finish out of order.
#[derive(Default)]
pub struct FakeDecoder {
    script: Mutex<HashMap<(String, String), Result<String, String>>>,
    unsupported: bool,
}

impl FakeDecoder {
    pub fn unsupported() -> Self {
        Self {
            unsupported: true,
            ..Self::default()
        }
    }

    pub fn script(&self, fixture: &VideoFixture) {
        let mut script = self.script.lock().unwrap();
        for (index, content) in fixture.codes {
            script.insert(key(fixture.job_id, *index), Ok(content.to_string()));
        }
        for index in fixture.corrupt_frames {
            script.insert(key(fixture.job_id, *index), Err("corrupt image".to_string()));
        }
    }
}

fn key(job_id: &str, index: usize) -> (String, String) {
    (job_id.to_string(), format!("frame-{:04}.png", index + 1))
}

impl QrDecoder for FakeDecoder {
    fn decode(&self, image_path: &Path) -> Result<Option<String>, DecodeError> {
        let file = image_path.file_name().unwrap().to_str().unwrap().to_string();
        let job = image_path
            .parent()
            .and_then(|p| p.file_name())
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        let n: u64 = file[6..10].parse().unwrap();
        std::thread::sleep(Duration::from_millis(30u64.saturating_sub(n * 2)));

        match self.script.lock().unwrap().get(&(job, file)) {
            Some(Ok(content)) => Ok(Some(content.clone())),
            Some(Err(reason)) => Err(DecodeError::Other(reason.clone())),
            None => Ok(None),
        }
    }

    fn check_support(&self) -> Result<(), DecodeError> {
        if self.unsupported {
            return Err(DecodeError::Unsupported("decoder disabled for test".to_string()));
        }
        Ok(())
    }
}

/// Everything a pipeline test needs, rooted in a temp directory.
pub struct Pipeline {
    pub dir: tempfile::TempDir,
    pub queue: Arc<InMemoryJobQueue>,
    pub store: Arc<JobStore>,
    pub sampler: Arc<FakeSampler>,
    pub decoder: Arc<FakeDecoder>,
    pub coordinator: Coordinator,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::with_decoder(FakeDecoder::default())
    }

    pub fn with_decoder(decoder: FakeDecoder) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let queue = Arc::new(InMemoryJobQueue::new());
        let store = Arc::new(new_store(dir.path()));
        let sampler = Arc::new(FakeSampler::default());
        let decoder = Arc::new(decoder);
        let scanner = Arc::new(FrameScanner::new(decoder.clone(), 4).unwrap());

        let coordinator = Coordinator::new(
            queue.clone(),
            sampler.clone(),
            scanner,
            store.clone(),
            CoordinatorSettings {
                name: "test-0".to_string(),
                topic: TOPIC.to_string(),
                frames_root: dir.path().join("frames"),
                consume_timeout: Duration::from_millis(50),
            },
        );

        Self {
            dir,
            queue,
            store,
            sampler,
            decoder,
            coordinator,
        }
    }

    /// Register the fixture's video with both fakes and return its source path.
    pub fn load(&self, fixture: &VideoFixture) -> PathBuf {
        let path = self.dir.path().join("uploads").join(format!("{}.mp4", fixture.job_id));
        self.sampler.add_video(&path, fixture.frames);
        self.decoder.script(fixture);
        path
    }

    /// State shared with the read API, pointing at the same files.
    pub fn app_state(&self) -> AppState {
        AppState {
            store: self.store.clone(),
            queue: self.queue.clone(),
            topic: TOPIC.to_string(),
        }
    }
}

pub fn new_store(root: &Path) -> JobStore {
    JobStore::new(FileStore::new(root.join("status"), root.join("results")))
}
