use async_trait::async_trait;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::time::timeout_at;

use crate::models::job::JobContext;
use crate::models::pipeline::StageConfig;

/// One step of the analysis pipeline.
///
/// Implementations receive everything they need through the context and
/// must be safe to run alongside sibling stages of the same job.
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, ctx: &JobContext) -> Result<StageReport, StageError>;
}

/// Successful stage run.
#[derive(Debug, Clone, Default)]
pub struct StageReport {
    pub output: String,
    pub elapsed: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum StageError {
    /// Nonzero exit; the message is the stage's own error output.
    #[error("{message}")]
    Failed { stage: String, message: String },

    #[error("Stage {stage} timed out after {timeout_secs} seconds")]
    TimedOut { stage: String, timeout_secs: u64 },

    #[error("Failed to launch stage {stage}: {source}")]
    Launch {
        stage: String,
        #[source]
        source: std::io::Error,
    },
}

impl StageError {
    pub fn stage(&self) -> &str {
        match self {
            StageError::Failed { stage, .. }
            | StageError::TimedOut { stage, .. }
            | StageError::Launch { stage, .. } => stage,
        }
    }

    /// Short label for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            StageError::Failed { .. } => "exit",
            StageError::TimedOut { .. } => "timeout",
            StageError::Launch { .. } => "launch",
        }
    }
}

/// Stage executed as an external process.
///
/// The company name is appended as the last argument. Job data travels in
/// the environment: `TASK_ID`, `COMPANY_NAME` and, when paths were staged,
/// `PRODUCT_IMAGE_PATHS` / `COMPETITOR_IMAGE_PATHS` as JSON arrays.
///
/// The timeout bounds the whole invocation, output included. On Unix the
/// stage runs in its own process group, which is killed when time runs out.
#[derive(Debug, Clone)]
pub struct ProcessStage {
    name: String,
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl ProcessStage {
    pub fn new(name: impl Into<String>, program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: Vec::new(),
            timeout,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn from_config(config: &StageConfig, default_timeout: Duration) -> Self {
        let timeout = config
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(default_timeout);
        Self::new(&config.name, &config.program, timeout).with_args(config.args.iter().cloned())
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn command(&self, ctx: &JobContext) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg(&ctx.company_name)
            .env("TASK_ID", &ctx.task_id)
            .env("COMPANY_NAME", &ctx.company_name)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        if !ctx.product_paths.is_empty() {
            command.env("PRODUCT_IMAGE_PATHS", paths_json(&ctx.product_paths));
        }
        if !ctx.competitor_paths.is_empty() {
            command.env("COMPETITOR_IMAGE_PATHS", paths_json(&ctx.competitor_paths));
        }
        command
    }

    fn timed_out(&self, ctx: &JobContext) -> StageError {
        tracing::warn!(
            task_id = %ctx.task_id,
            stage = %self.name,
            timeout_secs = self.timeout.as_secs(),
            "Stage timed out, process group killed"
        );
        StageError::TimedOut {
            stage: self.name.clone(),
            timeout_secs: self.timeout.as_secs(),
        }
    }
}

#[async_trait]
impl Stage for ProcessStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &JobContext) -> Result<StageReport, StageError> {
        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + self.timeout;
        tracing::info!(
            task_id = %ctx.task_id,
            stage = %self.name,
            program = %self.program,
            "Launching stage"
        );

        let mut child = self.command(ctx).spawn().map_err(|source| StageError::Launch {
            stage: self.name.clone(),
            source,
        })?;
        // The child leads its own process group; the id is gone once it is reaped.
        let group = child.id();

        // Drain both pipes concurrently so a chatty stage cannot block on a full pipe.
        let mut stdout = tokio::spawn(capture(child.stdout.take()));
        let mut stderr = tokio::spawn(capture(child.stderr.take()));

        let status = match timeout_at(deadline, child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(source)) => {
                kill_group(group);
                stdout.abort();
                stderr.abort();
                return Err(StageError::Launch {
                    stage: self.name.clone(),
                    source,
                });
            }
            Err(_) => {
                kill_group(group);
                let _ = child.kill().await;
                stdout.abort();
                stderr.abort();
                return Err(self.timed_out(ctx));
            }
        };

        // Processes the stage left behind may hold the pipes open; they share the deadline.
        let drained = timeout_at(deadline, async { ((&mut stdout).await, (&mut stderr).await) }).await;
        let (stdout, stderr) = match drained {
            Ok((out, err)) => (out.unwrap_or_default(), err.unwrap_or_default()),
            Err(_) => {
                kill_group(group);
                stdout.abort();
                stderr.abort();
                return Err(self.timed_out(ctx));
            }
        };
        let elapsed = started.elapsed();

        tracing::info!(
            task_id = %ctx.task_id,
            stage = %self.name,
            success = status.success(),
            exit_code = ?status.code(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Stage finished"
        );

        if status.success() {
            return Ok(StageReport {
                output: stdout,
                elapsed,
            });
        }

        let message = [stderr.trim(), stdout.trim()]
            .into_iter()
            .find(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("Stage {} exited with {}", self.name, status));

        Err(StageError::Failed {
            stage: self.name.clone(),
            message,
        })
    }
}

/// SIGKILL every process in the stage's group, including anything it forked.
#[cfg(unix)]
fn kill_group(group: Option<u32>) {
    let Some(pid) = group.and_then(|pid| libc::pid_t::try_from(pid).ok()) else {
        return;
    };
    // SAFETY: killpg only sends a signal; an already-empty group yields ESRCH.
    unsafe {
        libc::killpg(pid, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_group(_group: Option<u32>) {}

fn paths_json(paths: &[std::path::PathBuf]) -> String {
    let as_strings: Vec<String> = paths.iter().map(|p| p.display().to_string()).collect();
    serde_json::Value::from(as_strings).to_string()
}

async fn capture<R: AsyncRead + Unpin>(pipe: Option<R>) -> String {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        // partial output is still useful when the stream errors
        let _ = pipe.read_to_end(&mut buf).await;
    }
    String::from_utf8_lossy(&buf).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_paths_encoded_as_json_array() {
        let encoded = paths_json(&[PathBuf::from("temp/a.jpg"), PathBuf::from("temp/b \"c\".jpg")]);
        let decoded: Vec<String> = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, vec!["temp/a.jpg", "temp/b \"c\".jpg"]);
    }

    #[test]
    fn test_stage_timeout_override() {
        let config = StageConfig {
            name: "report".to_string(),
            program: "python3".to_string(),
            args: vec!["report.py".to_string()],
            requires_artifacts: false,
            timeout_secs: Some(30),
            publish_before: Vec::new(),
        };
        let stage = ProcessStage::from_config(&config, Duration::from_secs(1200));
        assert_eq!(stage.timeout(), Duration::from_secs(30));
        assert_eq!(stage.name(), "report");
    }

    #[test]
    fn test_timeout_message_is_distinct() {
        let timed_out = StageError::TimedOut {
            stage: "social".to_string(),
            timeout_secs: 1200,
        };
        let failed = StageError::Failed {
            stage: "social".to_string(),
            message: "Traceback: boom".to_string(),
        };
        assert_eq!(timed_out.to_string(), "Stage social timed out after 1200 seconds");
        assert_eq!(failed.to_string(), "Traceback: boom");
        assert_ne!(timed_out.reason(), failed.reason());
    }
}
