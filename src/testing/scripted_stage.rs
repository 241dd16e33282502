//! In-process stage with scripted behaviour.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::models::job::JobContext;
use crate::services::stage::{Stage, StageError, StageReport};
use crate::testing::MemoryArtifactStore;

/// One recorded stage run.
#[derive(Debug, Clone)]
pub struct StageInvocation {
    pub stage: String,
    pub task_id: String,
    pub company_name: String,
    pub product_paths: Vec<PathBuf>,
    pub competitor_paths: Vec<PathBuf>,
    pub started: Instant,
    pub finished: Instant,
}

/// Shared record of stage runs across a pipeline.
#[derive(Debug, Default)]
pub struct StageLog {
    invocations: Mutex<Vec<StageInvocation>>,
}

impl StageLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn invocations(&self) -> Vec<StageInvocation> {
        self.invocations
            .lock()
            .map(|v| v.clone())
            .unwrap_or_default()
    }

    /// Stage names in completion order.
    pub fn names(&self) -> Vec<String> {
        self.invocations().into_iter().map(|i| i.stage).collect()
    }

    pub fn for_stage(&self, stage: &str) -> Vec<StageInvocation> {
        self.invocations()
            .into_iter()
            .filter(|i| i.stage == stage)
            .collect()
    }

    /// Whether the latest runs of `a` and `b` overlapped in wall-clock time.
    pub fn overlapped(&self, a: &str, b: &str) -> bool {
        match (self.for_stage(a).pop(), self.for_stage(b).pop()) {
            (Some(a), Some(b)) => a.started < b.finished && b.started < a.finished,
            _ => false,
        }
    }

    fn push(&self, invocation: StageInvocation) {
        if let Ok(mut invocations) = self.invocations.lock() {
            invocations.push(invocation);
        }
    }
}

/// Stage that sleeps, then succeeds (optionally writing objects) or fails.
pub struct ScriptedStage {
    name: String,
    delay: Duration,
    failures_left: AtomicUsize,
    failure_message: String,
    produces: Vec<String>,
    storage: Option<Arc<MemoryArtifactStore>>,
    log: Arc<StageLog>,
}

impl ScriptedStage {
    pub fn new(name: impl Into<String>, log: Arc<StageLog>) -> Self {
        let name = name.into();
        Self {
            failure_message: format!("{} failed", name),
            name,
            delay: Duration::ZERO,
            failures_left: AtomicUsize::new(0),
            produces: Vec::new(),
            storage: None,
            log,
        }
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fail every run with `message`.
    pub fn fail(self, message: impl Into<String>) -> Self {
        self.fail_first(usize::MAX, message)
    }

    /// Fail the first `times` runs with `message`, then succeed.
    pub fn fail_first(mut self, times: usize, message: impl Into<String>) -> Self {
        self.failures_left = AtomicUsize::new(times);
        self.failure_message = message.into();
        self
    }

    /// On success, write these keys to `storage`. `{task_id}` is substituted.
    pub fn produces<I, S>(mut self, storage: Arc<MemoryArtifactStore>, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.storage = Some(storage);
        self.produces = keys.into_iter().map(Into::into).collect();
        self
    }

    fn should_fail(&self) -> bool {
        self.failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| match left {
                0 => None,
                usize::MAX => Some(usize::MAX),
                n => Some(n - 1),
            })
            .is_ok()
    }
}

#[async_trait]
impl Stage for ScriptedStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &JobContext) -> Result<StageReport, StageError> {
        let started = Instant::now();
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let failed = self.should_fail();
        if !failed {
            if let Some(storage) = &self.storage {
                for key in &self.produces {
                    let key = key.replace("{task_id}", &ctx.task_id);
                    storage.put_object(key, b"%PDF-1.4".to_vec()).await;
                }
            }
        }

        self.log.push(StageInvocation {
            stage: self.name.clone(),
            task_id: ctx.task_id.clone(),
            company_name: ctx.company_name.clone(),
            product_paths: ctx.product_paths.clone(),
            competitor_paths: ctx.competitor_paths.clone(),
            started,
            finished: Instant::now(),
        });

        if failed {
            return Err(StageError::Failed {
                stage: self.name.clone(),
                message: self.failure_message.clone(),
            });
        }

        Ok(StageReport {
            output: format!("{} ok", self.name),
            elapsed: started.elapsed(),
        })
    }
}
