use async_trait::async_trait;
use sqlx::PgPool;

use crate::db::queries;
use crate::models::status::{StatusRecord, StatusUpdate};

/// Durable per-task status record, keyed by task id.
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Write the named fields of `update`, creating the record if needed.
    async fn update_status(&self, task_id: &str, update: &StatusUpdate) -> Result<(), StatusError>;

    async fn get_status(&self, task_id: &str) -> Result<Option<StatusRecord>, StatusError>;
}

/// Status table in PostgreSQL.
#[derive(Clone)]
pub struct PgStatusStore {
    pool: PgPool,
}

impl PgStatusStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StatusStore for PgStatusStore {
    async fn update_status(&self, task_id: &str, update: &StatusUpdate) -> Result<(), StatusError> {
        queries::apply_status_update(&self.pool, task_id, update).await?;
        Ok(())
    }

    async fn get_status(&self, task_id: &str) -> Result<Option<StatusRecord>, StatusError> {
        Ok(queries::get_status(&self.pool, task_id).await?)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StatusError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Status store unavailable: {0}")]
    Unavailable(String),
}
