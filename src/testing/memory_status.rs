//! In-memory status store.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

use crate::models::job::TaskStatus;
use crate::models::status::{StatusRecord, StatusUpdate};
use crate::services::status::{StatusError, StatusStore};

/// Status store that keeps records in a map and remembers every update.
#[derive(Debug, Default)]
pub struct MemoryStatusStore {
    records: RwLock<HashMap<String, StatusRecord>>,
    history: RwLock<Vec<(String, StatusUpdate)>>,
    fail_updates: AtomicBool,
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following update fail until switched off again.
    pub fn fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    pub async fn record(&self, task_id: &str) -> Option<StatusRecord> {
        self.records.read().await.get(task_id).cloned()
    }

    /// Status values written for `task_id`, in order.
    pub async fn transitions(&self, task_id: &str) -> Vec<TaskStatus> {
        self.history
            .read()
            .await
            .iter()
            .filter(|(id, _)| id == task_id)
            .filter_map(|(_, update)| update.status())
            .collect()
    }
}

#[async_trait]
impl StatusStore for MemoryStatusStore {
    async fn update_status(&self, task_id: &str, update: &StatusUpdate) -> Result<(), StatusError> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(StatusError::Unavailable("status store offline".to_string()));
        }

        let mut records = self.records.write().await;
        let record = records
            .entry(task_id.to_string())
            .or_insert_with(|| StatusRecord {
                task_id: task_id.to_string(),
                ..Default::default()
            });
        update.apply_to(record);

        self.history
            .write()
            .await
            .push((task_id.to_string(), update.clone()));
        Ok(())
    }

    async fn get_status(&self, task_id: &str) -> Result<Option<StatusRecord>, StatusError> {
        Ok(self.record(task_id).await)
    }
}
