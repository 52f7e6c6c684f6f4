//! Parallel QR scan over the sampled frames of one job.
//!
//! Every frame is decoded independently on a bounded rayon pool. A frame that
//! fails to decode (bad image, decoder error, decoder panic, no code) simply
//! contributes nothing; only failing to enumerate the frames directory is an
//! error for the whole stage.

use rayon::prelude::*;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;

use crate::models::scan::{Frame, QrCodeResult};
use crate::services::qr::QrDecoder;

const FRAME_EXTENSION: &str = "png";

/// Outcome of scanning one job's frames.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanReport {
    /// Decoded codes, ascending by timestamp.
    pub results: Vec<QrCodeResult>,
    pub frames_scanned: usize,
    pub frames_failed: usize,
}

enum FrameOutcome {
    Found(QrCodeResult),
    Empty,
    Failed,
}

pub struct FrameScanner {
    pool: rayon::ThreadPool,
    decoder: Arc<dyn QrDecoder>,
}

impl FrameScanner {
    pub fn new(decoder: Arc<dyn QrDecoder>, threads: usize) -> Result<Self, ScanError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(|i| format!("frame-scan-{i}"))
            .build()?;
        Ok(Self { pool, decoder })
    }

    pub fn decoder(&self) -> &dyn QrDecoder {
        self.decoder.as_ref()
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Enumerate and scan every frame in `frames_dir`. Blocks the caller.
    pub fn scan_dir(&self, frames_dir: &Path) -> Result<ScanReport, ScanError> {
        let frames = list_frames(frames_dir)?;
        Ok(self.scan_frames(&frames))
    }

    /// Decode `frames` in parallel and join before ordering the results.
    pub fn scan_frames(&self, frames: &[Frame]) -> ScanReport {
        let outcomes: Vec<FrameOutcome> = self.pool.install(|| {
            frames
                .par_iter()
                .map(|frame| self.scan_one(frame))
                .collect()
        });

        let mut report = ScanReport {
            frames_scanned: frames.len(),
            ..ScanReport::default()
        };
        let mut found = Vec::new();
        for outcome in outcomes {
            match outcome {
                FrameOutcome::Found(result) => found.push(result),
                FrameOutcome::Empty => {}
                FrameOutcome::Failed => report.frames_failed += 1,
            }
        }
        report.results = order_results(found);
        report
    }

    fn scan_one(&self, frame: &Frame) -> FrameOutcome {
        let decoded = panic::catch_unwind(AssertUnwindSafe(|| self.decoder.decode(&frame.path)));
        match decoded {
            Ok(Ok(Some(content))) => {
                tracing::info!(
                    frame = %frame.path.display(),
                    timestamp_seconds = frame.timestamp_seconds(),
                    content = %content,
                    "QR code detected"
                );
                FrameOutcome::Found(QrCodeResult::new(content, frame.timestamp_seconds()))
            }
            Ok(Ok(None)) => FrameOutcome::Empty,
            Ok(Err(err)) => {
                tracing::warn!(frame = %frame.path.display(), error = %err, "Failed to read frame");
                FrameOutcome::Failed
            }
            Err(_) => {
                tracing::warn!(frame = %frame.path.display(), "QR decoder panicked on frame");
                FrameOutcome::Failed
            }
        }
    }
}

/// List the sampled frames in `dir` in temporal order.
///
/// The sampler names frames so that lexical order is temporal order; the
/// position in that order is the frame index.
pub fn list_frames(dir: &Path) -> Result<Vec<Frame>, ScanError> {
    let entries = std::fs::read_dir(dir).map_err(|source| ScanError::ReadDir {
        dir: dir.display().to_string(),
        source,
    })?;

    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| ScanError::ReadDir {
            dir: dir.display().to_string(),
            source,
        })?;
        let path = entry.path();
        let is_frame = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(FRAME_EXTENSION));
        if is_frame && path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();

    Ok(paths
        .into_iter()
        .enumerate()
        .map(|(index, path)| Frame { index, path })
        .collect())
}

/// Sort decoded results ascending by timestamp, whatever order they finished in.
pub fn order_results(mut results: Vec<QrCodeResult>) -> Vec<QrCodeResult> {
    results.sort_by(|a, b| a.timestamp_seconds.total_cmp(&b.timestamp_seconds));
    results
}

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("cannot read frames directory {dir}: {source}")]
    ReadDir {
        dir: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to build decode pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}
