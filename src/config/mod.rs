use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// Redis connection string for the work queue
    pub redis_url: String,

    /// PostgreSQL connection string for the status table
    pub database_url: String,

    /// Bucket holding input images and published reports
    pub s3_bucket: String,

    /// S3-compatible endpoint URL
    pub s3_endpoint: String,

    #[serde(default = "default_region")]
    pub s3_region: String,

    pub s3_access_key: String,

    pub s3_secret_key: String,

    /// JSON file declaring stages, concurrency groups and expected outputs
    #[serde(default = "default_pipeline_file")]
    pub pipeline_file: PathBuf,

    /// Process-wide temp root; task directories are created beneath it
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    /// Long-poll wait per receive call
    #[serde(default = "default_poll_wait_secs")]
    pub poll_wait_secs: u64,

    /// Sleep after a queue error before polling again
    #[serde(default = "default_error_backoff_secs")]
    pub error_backoff_secs: u64,

    /// Deliveries allowed before a failing message is dead-lettered
    #[serde(default = "default_max_receive_count")]
    pub max_receive_count: u32,

    /// Default per-stage wall-clock limit
    #[serde(default = "default_stage_timeout_secs")]
    pub stage_timeout_secs: u64,

    /// Leave task directories on disk after a failed attempt
    #[serde(default)]
    pub keep_failed_workdirs: bool,

    /// Prometheus scrape listener
    #[serde(default = "default_metrics_addr")]
    pub metrics_addr: String,
}

fn default_region() -> String {
    "auto".to_string()
}

fn default_pipeline_file() -> PathBuf {
    PathBuf::from("pipeline.json")
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("temp")
}

fn default_poll_wait_secs() -> u64 {
    10
}

fn default_error_backoff_secs() -> u64 {
    5
}

fn default_max_receive_count() -> u32 {
    5
}

fn default_stage_timeout_secs() -> u64 {
    20 * 60
}

fn default_metrics_addr() -> String {
    "0.0.0.0:9000".to_string()
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn poll_wait(&self) -> Duration {
        Duration::from_secs(self.poll_wait_secs)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_secs)
    }

    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs)
    }
}
