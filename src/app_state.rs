use sqlx::PgPool;
use std::sync::Arc;

use crate::config::WorkerConfig;
use crate::services::{
    consumer::QueueConsumer,
    orchestrator::TaskOrchestrator,
    pipeline::Pipeline,
    queue::RedisWorkQueue,
    status::PgStatusStore,
    storage::S3Client,
    workspace::Workspace,
};

/// Process-wide infrastructure handles shared by every job.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub storage: Arc<S3Client>,
    pub status: Arc<PgStatusStore>,
    pub queue: Arc<RedisWorkQueue>,
}

impl AppState {
    pub fn new(db: PgPool, storage: S3Client, queue: RedisWorkQueue) -> Self {
        Self {
            status: Arc::new(PgStatusStore::new(db.clone())),
            db,
            storage: Arc::new(storage),
            queue: Arc::new(queue),
        }
    }

    /// Wire a consumer for `pipeline` using the configured policies.
    pub fn consumer(&self, config: &WorkerConfig, pipeline: Pipeline) -> QueueConsumer {
        let orchestrator = TaskOrchestrator::new(
            self.storage.clone(),
            self.status.clone(),
            pipeline,
            Workspace::new(&config.work_dir),
        )
        .keep_failed_workdirs(config.keep_failed_workdirs);

        QueueConsumer::new(self.queue.clone(), orchestrator)
            .poll_wait(config.poll_wait())
            .error_backoff(config.error_backoff())
            .max_receive_count(config.max_receive_count)
    }
}
