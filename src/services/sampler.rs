use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

/// Output file pattern; zero padding keeps lexical order equal to temporal order.
pub const FRAME_PATTERN: &str = "frame-%04d.png";

/// Decodes a source video into one still image per second of footage.
#[async_trait]
pub trait FrameSampler: Send + Sync {
    /// Write the frames for `source` into `output_dir`, which already exists.
    async fn sample(&self, source: &Path, output_dir: &Path) -> Result<(), SamplerError>;
}

/// Frame sampler backed by the ffmpeg CLI.
pub struct FfmpegSampler {
    program: PathBuf,
}

impl FfmpegSampler {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn build_args(source: &Path, output_dir: &Path) -> Vec<String> {
        vec![
            "-y".to_string(),
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-i".to_string(),
            source.to_string_lossy().into_owned(),
            "-vf".to_string(),
            "fps=1".to_string(),
            output_dir.join(FRAME_PATTERN).to_string_lossy().into_owned(),
        ]
    }
}

impl Default for FfmpegSampler {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

#[async_trait]
impl FrameSampler for FfmpegSampler {
    async fn sample(&self, source: &Path, output_dir: &Path) -> Result<(), SamplerError> {
        let args = Self::build_args(source, output_dir);
        tracing::debug!(program = %self.program.display(), args = %args.join(" "), "Running frame sampler");

        let output = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| SamplerError::Spawn {
                program: self.program.display().to_string(),
                source,
            })?;

        if !output.status.success() {
            return Err(SamplerError::Failed {
                exit_code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SamplerError {
    #[error("failed to start frame sampler {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("frame sampler exited with {}: {stderr}", describe_exit(.exit_code))]
    Failed {
        exit_code: Option<i32>,
        stderr: String,
    },
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "a signal".to_string(),
    }
}
