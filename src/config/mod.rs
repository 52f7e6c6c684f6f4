use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Unused by the worker.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Redis connection string for the job queue
    pub redis_url: String,

    /// Queue topic jobs are published to and consumed from
    #[serde(default = "default_queue_topic")]
    pub queue_topic: String,

    /// Optional list that receives messages rejected without requeue
    #[serde(default)]
    pub dead_letter_topic: Option<String>,

    /// Root directory for status files, result files and sampled frames
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Stable consumer group name. Worker instance `i` consumes as
    /// `<name>-<i>`; unacked messages of any instance are redelivered when a
    /// worker with the same name restarts
    #[serde(default = "default_consumer_name")]
    pub consumer_name: String,

    /// Number of coordinator loops run by one worker process
    #[serde(default = "default_worker_instances")]
    pub worker_instances: usize,

    /// Frame decode threads. Defaults to the host's available parallelism.
    #[serde(default)]
    pub scan_threads: Option<usize>,

    /// ffmpeg executable used for frame sampling
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,

    /// How long one consume call blocks before the loop rechecks shutdown
    #[serde(default = "default_consume_timeout_secs")]
    pub consume_timeout_secs: u64,

    /// Prometheus listener for the worker process (e.g., "0.0.0.0:9100")
    #[serde(default)]
    pub metrics_addr: Option<String>,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_queue_topic() -> String {
    "video_queue".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_consumer_name() -> String {
    "worker".to_string()
}

fn default_worker_instances() -> usize {
    1
}

fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}

fn default_consume_timeout_secs() -> u64 {
    5
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn status_dir(&self) -> PathBuf {
        self.data_dir.join("status")
    }

    pub fn results_dir(&self) -> PathBuf {
        self.data_dir.join("results")
    }

    pub fn frames_dir(&self) -> PathBuf {
        self.data_dir.join("frames")
    }

    pub fn consume_timeout(&self) -> Duration {
        Duration::from_secs(self.consume_timeout_secs.max(1))
    }

    pub fn scan_threads(&self) -> usize {
        self.scan_threads
            .filter(|n| *n > 0)
            .or_else(|| std::thread::available_parallelism().ok().map(|n| n.get()))
            .unwrap_or(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_minimal_env() {
        let vars = vec![("REDIS_URL".to_string(), "redis://localhost:6379".to_string())];
        let config: AppConfig = envy::from_iter(vars).unwrap();

        assert_eq!(config.queue_topic, "video_queue");
        assert_eq!(config.bind_addr, "0.0.0.0:3000");
        assert_eq!(config.worker_instances, 1);
        assert_eq!(config.status_dir(), PathBuf::from("./data/status"));
        assert_eq!(config.results_dir(), PathBuf::from("./data/results"));
        assert!(config.dead_letter_topic.is_none());
        assert!(config.scan_threads() >= 1);
    }

    #[test]
    fn test_missing_redis_url_fails() {
        let vars: Vec<(String, String)> = Vec::new();
        assert!(envy::from_iter::<_, AppConfig>(vars).is_err());
    }

    #[test]
    fn test_overrides() {
        let vars = vec![
            ("REDIS_URL".to_string(), "redis://queue:6379".to_string()),
            ("QUEUE_TOPIC".to_string(), "videos".to_string()),
            ("DATA_DIR".to_string(), "/srv/qr".to_string()),
            ("SCAN_THREADS".to_string(), "3".to_string()),
            ("CONSUME_TIMEOUT_SECS".to_string(), "0".to_string()),
        ];
        let config: AppConfig = envy::from_iter(vars).unwrap();

        assert_eq!(config.queue_topic, "videos");
        assert_eq!(config.frames_dir(), PathBuf::from("/srv/qr/frames"));
        assert_eq!(config.scan_threads(), 3);
        assert_eq!(config.consume_timeout(), Duration::from_secs(1));
    }
}
