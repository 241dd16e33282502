use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::models::job::report_key;
use crate::models::pipeline::PipelineConfig;
use crate::services::stage::{ProcessStage, Stage};

/// A stage plus the orchestration attributes it was declared with.
#[derive(Clone)]
pub struct PipelineStep {
    pub stage: Arc<dyn Stage>,
    pub requires_artifacts: bool,
    pub publish_before: Vec<String>,
}

impl PipelineStep {
    pub fn new(stage: Arc<dyn Stage>) -> Self {
        Self {
            stage,
            requires_artifacts: false,
            publish_before: Vec::new(),
        }
    }

    pub fn requires_artifacts(mut self) -> Self {
        self.requires_artifacts = true;
        self
    }

    pub fn publish_before<I, S>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.publish_before = files.into_iter().map(Into::into).collect();
        self
    }
}

/// Stages that may run in parallel, up to `pool_size` at a time.
#[derive(Clone)]
pub struct StageGroup {
    pub pool_size: usize,
    pub steps: Vec<PipelineStep>,
}

impl StageGroup {
    pub fn parallel(pool_size: usize, steps: Vec<PipelineStep>) -> Self {
        Self {
            pool_size: pool_size.max(1),
            steps,
        }
    }

    pub fn sequential(steps: Vec<PipelineStep>) -> Self {
        Self::parallel(1, steps)
    }
}

/// Ordered concurrency groups and the reports a successful run must publish.
#[derive(Clone)]
pub struct Pipeline {
    pub groups: Vec<StageGroup>,
    /// Logical report name -> path under `reports/<task_id>/`.
    pub outputs: BTreeMap<String, String>,
    pub publish_dir: PathBuf,
}

impl Pipeline {
    pub fn new(groups: Vec<StageGroup>, outputs: BTreeMap<String, String>) -> Self {
        Self {
            groups,
            outputs,
            publish_dir: PathBuf::from("."),
        }
    }

    pub fn with_publish_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.publish_dir = dir.into();
        self
    }

    /// Build process stages from a validated pipeline declaration.
    pub fn from_config(config: &PipelineConfig, default_timeout: Duration) -> Self {
        let groups = config
            .groups
            .iter()
            .map(|group| {
                let steps = group
                    .stages
                    .iter()
                    .map(|stage| PipelineStep {
                        stage: Arc::new(ProcessStage::from_config(stage, default_timeout)),
                        requires_artifacts: stage.requires_artifacts,
                        publish_before: stage.publish_before.clone(),
                    })
                    .collect();
                StageGroup::parallel(group.pool_size, steps)
            })
            .collect();

        Self {
            groups,
            outputs: config.outputs.clone(),
            publish_dir: config.publish_dir.clone(),
        }
    }

    /// Remote keys every successful run of `task_id` must have produced.
    pub fn expected_outputs(&self, task_id: &str) -> BTreeMap<String, String> {
        self.outputs
            .iter()
            .map(|(name, path)| (name.clone(), report_key(task_id, path)))
            .collect()
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.groups
            .iter()
            .flat_map(|g| g.steps.iter().map(|s| s.stage.name()))
            .collect()
    }
}
