use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::models::job::{report_key, ArtifactKind, JobContext, JobMessage};
use crate::models::status::StatusUpdate;
use crate::services::pipeline::{Pipeline, PipelineStep, StageGroup};
use crate::services::stage::{StageError, StageReport};
use crate::services::status::{StatusError, StatusStore};
use crate::services::storage::{ArtifactStore, StorageError};
use crate::services::workspace::Workspace;

/// Drives one job from staging to a verified `done` record.
///
/// Lifecycle: pending -> inputs staged -> running -> stage groups ->
/// outputs verified -> done. Any failure writes `error` with the failure
/// text and is returned so the caller leaves the message unacknowledged.
pub struct TaskOrchestrator {
    storage: Arc<dyn ArtifactStore>,
    status: Arc<dyn StatusStore>,
    pipeline: Arc<Pipeline>,
    workspace: Workspace,
    keep_failed_workdirs: bool,
}

impl TaskOrchestrator {
    pub fn new(
        storage: Arc<dyn ArtifactStore>,
        status: Arc<dyn StatusStore>,
        pipeline: Pipeline,
        workspace: Workspace,
    ) -> Self {
        Self {
            storage,
            status,
            pipeline: Arc::new(pipeline),
            workspace,
            keep_failed_workdirs: false,
        }
    }

    /// Leave task directories on disk after a failed attempt.
    pub fn keep_failed_workdirs(mut self, keep: bool) -> Self {
        self.keep_failed_workdirs = keep;
        self
    }

    /// Process one job. Returns the published report keys on success.
    pub async fn process(&self, job: &JobMessage) -> Result<BTreeMap<String, String>, JobError> {
        let started = Instant::now();
        tracing::info!(
            task_id = %job.task_id,
            company = %job.company_name,
            product_images = job.product_images.len(),
            competitor_images = job.competitor_images.len(),
            "Processing analysis job"
        );

        let result = match self
            .status
            .update_status(&job.task_id, &StatusUpdate::pending())
            .await
        {
            Ok(()) => self.execute(job).await,
            Err(e) => Err(JobError::from(e)),
        };

        let dirs = self.workspace.task_dirs(&job.task_id);
        match &result {
            Ok(outputs) => {
                tracing::info!(
                    task_id = %job.task_id,
                    reports = outputs.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Job completed"
                );
                metrics::counter!("analysis_jobs_completed_total").increment(1);
                metrics::histogram!("analysis_job_duration_seconds")
                    .record(started.elapsed().as_secs_f64());
                dirs.cleanup(&job.task_id).await;
            }
            Err(e) => {
                tracing::error!(task_id = %job.task_id, error = %e, "Job failed");
                metrics::counter!("analysis_jobs_failed_total").increment(1);
                self.record_failure(&job.task_id, e).await;
                if self.keep_failed_workdirs {
                    tracing::info!(
                        task_id = %job.task_id,
                        path = %dirs.product.display(),
                        "Keeping task directories of failed attempt"
                    );
                } else {
                    dirs.cleanup(&job.task_id).await;
                }
            }
        }

        result
    }

    async fn execute(&self, job: &JobMessage) -> Result<BTreeMap<String, String>, JobError> {
        let ctx = self.stage_inputs(job).await?;

        self.status
            .update_status(&job.task_id, &StatusUpdate::running(Utc::now().timestamp()))
            .await?;

        for (idx, group) in self.pipeline.groups.iter().enumerate() {
            tracing::debug!(
                task_id = %job.task_id,
                group = idx,
                stages = group.steps.len(),
                pool_size = group.pool_size,
                "Running stage group"
            );
            self.run_group(group, &ctx).await?;
        }

        let outputs = self.verify_outputs(&job.task_id).await?;

        self.status
            .update_status(
                &job.task_id,
                &StatusUpdate::done(Utc::now().timestamp(), outputs.clone()),
            )
            .await?;

        Ok(outputs)
    }

    /// Download every input into fresh task directories. Stops at the first failure.
    async fn stage_inputs(&self, job: &JobMessage) -> Result<JobContext, JobError> {
        let dirs = self
            .workspace
            .prepare(&job.task_id)
            .await
            .map_err(JobError::Workspace)?;

        let mut ctx = JobContext {
            task_id: job.task_id.clone(),
            company_name: job.company_name.clone(),
            ..Default::default()
        };

        for kind in [ArtifactKind::Product, ArtifactKind::Competitor] {
            let mut paths = Vec::with_capacity(job.keys(kind).len());
            for key in job.keys(kind) {
                let local = dirs
                    .for_kind(kind)
                    .join(kind.local_relative_path(&job.task_id, key));
                self.storage
                    .download(key, &local)
                    .await
                    .map_err(|source| JobError::Staging {
                        key: key.clone(),
                        source,
                    })?;
                paths.push(local);
            }
            match kind {
                ArtifactKind::Product => ctx.product_paths = paths,
                ArtifactKind::Competitor => ctx.competitor_paths = paths,
            }
        }

        tracing::info!(
            task_id = %job.task_id,
            product_images = ctx.product_paths.len(),
            competitor_images = ctx.competitor_paths.len(),
            "Inputs staged"
        );
        Ok(ctx)
    }

    /// Run a group with at most `pool_size` members in flight.
    ///
    /// Every started member is awaited. Once a member has failed, members
    /// that have not started yet are skipped; with a pool of one this is a
    /// plain sequential run that stops at the first failure.
    async fn run_group(&self, group: &StageGroup, ctx: &JobContext) -> Result<(), JobError> {
        let halted = AtomicBool::new(false);
        let halted = &halted;

        let mut results: Vec<(usize, Option<Result<(), JobError>>)> =
            stream::iter(group.steps.iter().enumerate())
                .map(move |(idx, step)| async move {
                    if halted.load(Ordering::SeqCst) {
                        return (idx, None);
                    }
                    let result = self.run_step(step, ctx).await;
                    if result.is_err() {
                        halted.store(true, Ordering::SeqCst);
                    }
                    (idx, Some(result))
                })
                .buffer_unordered(group.pool_size)
                .collect()
                .await;

        results.sort_by_key(|(idx, _)| *idx);

        let skipped = results.iter().filter(|(_, r)| r.is_none()).count();
        if skipped > 0 {
            tracing::info!(task_id = %ctx.task_id, skipped, "Skipped remaining stages after failure");
        }

        // first failure in declared order wins
        for (_, result) in results {
            if let Some(Err(e)) = result {
                return Err(e);
            }
        }
        Ok(())
    }

    async fn run_step(&self, step: &PipelineStep, ctx: &JobContext) -> Result<(), JobError> {
        self.publish(step, &ctx.task_id).await?;

        let stage_ctx = if step.requires_artifacts {
            ctx.clone()
        } else {
            ctx.without_artifacts()
        };

        let name = step.stage.name().to_string();
        let started = Instant::now();
        let result = step.stage.run(&stage_ctx).await;
        metrics::histogram!("analysis_stage_duration_seconds", "stage" => name.clone())
            .record(started.elapsed().as_secs_f64());

        match result {
            Ok(StageReport { output, elapsed }) => {
                tracing::info!(
                    task_id = %ctx.task_id,
                    stage = %name,
                    elapsed_ms = elapsed.as_millis() as u64,
                    output_bytes = output.len(),
                    "Stage succeeded"
                );
                tracing::debug!(task_id = %ctx.task_id, stage = %name, output = %output, "Stage output");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(task_id = %ctx.task_id, stage = %e.stage(), error = %e, "Stage failed");
                metrics::counter!(
                    "analysis_stage_failures_total",
                    "stage" => e.stage().to_string(),
                    "reason" => e.reason()
                )
                .increment(1);
                Err(e.into())
            }
        }
    }

    /// Upload the step's declared local files before it runs.
    async fn publish(&self, step: &PipelineStep, task_id: &str) -> Result<(), JobError> {
        for file in &step.publish_before {
            let local: PathBuf = self.pipeline.publish_dir.join(file);
            let reason = match tokio::fs::try_exists(&local).await {
                Ok(true) => None,
                Ok(false) => Some("file not found".to_string()),
                Err(e) => Some(e.to_string()),
            };
            if let Some(reason) = reason {
                return Err(JobError::Publish {
                    file: local.display().to_string(),
                    reason,
                });
            }

            let key = report_key(task_id, file);
            self.storage
                .upload(&local, &key)
                .await
                .map_err(|e| JobError::Publish {
                    file: local.display().to_string(),
                    reason: e.to_string(),
                })?;
            tracing::info!(task_id = %task_id, key = %key, "Published local file");
        }
        Ok(())
    }

    async fn verify_outputs(&self, task_id: &str) -> Result<BTreeMap<String, String>, JobError> {
        let expected = self.pipeline.expected_outputs(task_id);
        for (name, key) in &expected {
            match self.storage.exists(key).await {
                Ok(true) => {}
                Ok(false) => {
                    return Err(JobError::MissingOutput {
                        name: name.clone(),
                        key: key.clone(),
                    })
                }
                Err(source) => {
                    return Err(JobError::Verify {
                        key: key.clone(),
                        source,
                    })
                }
            }
        }
        tracing::info!(task_id = %task_id, reports = expected.len(), "All reports present");
        Ok(expected)
    }

    async fn record_failure(&self, task_id: &str, error: &JobError) {
        if let Err(e) = self
            .status
            .update_status(task_id, &StatusUpdate::error(error.to_string()))
            .await
        {
            tracing::error!(task_id = %task_id, error = %e, "Failed to record job failure");
        }
    }
}

/// Why a job attempt failed. The display text becomes the record's `error_message`.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Failed to prepare task directories: {0}")]
    Workspace(#[source] std::io::Error),

    #[error("Failed to download {key}: {source}")]
    Staging {
        key: String,
        #[source]
        source: StorageError,
    },

    #[error(transparent)]
    Stage(#[from] StageError),

    #[error("Failed to publish {file}: {reason}")]
    Publish { file: String, reason: String },

    #[error("Report {name} not found in storage at {key}")]
    MissingOutput { name: String, key: String },

    #[error("Failed to check report {key}: {source}")]
    Verify {
        key: String,
        #[source]
        source: StorageError,
    },

    #[error("Status update failed: {0}")]
    Status(#[from] StatusError),
}
