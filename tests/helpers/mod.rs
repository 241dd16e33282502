//! Test harness wiring the orchestrator and consumer to in-memory doubles

#![allow(dead_code)]

use analysis_worker::services::{
    consumer::QueueConsumer,
    orchestrator::TaskOrchestrator,
    pipeline::{Pipeline, PipelineStep, StageGroup},
    workspace::Workspace,
};
use analysis_worker::testing::{
    MemoryArtifactStore, MemoryQueue, MemoryStatusStore, ScriptedStage, StageLog,
};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub const PARALLEL_STAGES: [&str; 2] = ["product_analysis", "competitor_analysis"];
pub const SEQUENTIAL_STAGES: [&str; 4] = [
    "standard_deviation",
    "rename_branding",
    "brand_template",
    "final_report",
];

pub struct Harness {
    pub storage: Arc<MemoryArtifactStore>,
    pub status: Arc<MemoryStatusStore>,
    pub queue: Arc<MemoryQueue>,
    pub log: Arc<StageLog>,
    pub work_dir: TempDir,
    pub publish_dir: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            storage: Arc::new(MemoryArtifactStore::new()),
            status: Arc::new(MemoryStatusStore::new()),
            queue: Arc::new(MemoryQueue::new()),
            log: StageLog::new(),
            work_dir: tempfile::tempdir().expect("temp work dir"),
            publish_dir: tempfile::tempdir().expect("temp publish dir"),
        }
    }

    pub fn outputs() -> BTreeMap<String, String> {
        [
            ("final_report", "final_report.pdf"),
            ("brand_marketing", "pdfs/brand_marketing.pdf"),
            ("content_marketing", "pdfs/content_marketing.pdf"),
            ("social_media_marketing", "pdfs/social_media_marketing.pdf"),
        ]
        .into_iter()
        .map(|(name, path)| (name.to_string(), path.to_string()))
        .collect()
    }

    /// Stage that succeeds; the final stage also publishes the four reports.
    pub fn stage(&self, name: &str) -> ScriptedStage {
        let stage = ScriptedStage::new(name, self.log.clone());
        if name == "final_report" {
            stage.produces(
                self.storage.clone(),
                Self::outputs()
                    .values()
                    .map(|path| format!("reports/{{task_id}}/{}", path)),
            )
        } else {
            stage
        }
    }

    /// Two parallel analysis stages followed by four sequential ones.
    /// `customize` may alter any stage by name.
    pub fn analysis_pipeline<F>(&self, customize: F) -> Pipeline
    where
        F: Fn(&str, ScriptedStage) -> ScriptedStage,
    {
        let step = |name: &str| {
            let stage: Arc<dyn analysis_worker::services::stage::Stage> =
                Arc::new(customize(name, self.stage(name)));
            PipelineStep::new(stage)
        };

        let parallel = PARALLEL_STAGES
            .into_iter()
            .map(|name| step(name).requires_artifacts())
            .collect();
        let sequential = SEQUENTIAL_STAGES
            .into_iter()
            .map(|name| {
                if name == "brand_template" {
                    step(name).requires_artifacts()
                } else {
                    step(name)
                }
            })
            .collect();

        Pipeline::new(
            vec![
                StageGroup::parallel(2, parallel),
                StageGroup::sequential(sequential),
            ],
            Self::outputs(),
        )
        .with_publish_dir(self.publish_dir.path())
    }

    pub fn default_pipeline(&self) -> Pipeline {
        self.analysis_pipeline(|_, stage| stage)
    }

    pub fn orchestrator(&self, pipeline: Pipeline) -> TaskOrchestrator {
        TaskOrchestrator::new(
            self.storage.clone(),
            self.status.clone(),
            pipeline,
            Workspace::new(self.work_dir.path()),
        )
    }

    pub fn consumer(&self, pipeline: Pipeline) -> QueueConsumer {
        QueueConsumer::new(self.queue.clone(), self.orchestrator(pipeline))
            .poll_wait(Duration::from_millis(10))
            .error_backoff(Duration::from_millis(10))
            .max_receive_count(3)
    }

    pub fn product_dir(&self, task_id: &str) -> PathBuf {
        self.work_dir.path().join("product_images").join(task_id)
    }

    pub fn competitor_dir(&self, task_id: &str) -> PathBuf {
        self.work_dir.path().join("competitor_images").join(task_id)
    }
}
