//! In-memory artifact store.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::RwLock;

use crate::services::storage::{ArtifactStore, StorageError};

/// Object store backed by a map of key -> bytes.
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    objects: RwLock<HashMap<String, Vec<u8>>>,
    downloads: RwLock<Vec<String>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put_object(&self, key: impl Into<String>, data: impl Into<Vec<u8>>) {
        self.objects.write().await.insert(key.into(), data.into());
    }

    pub async fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.read().await.get(key).cloned()
    }

    /// Keys downloaded so far, in order.
    pub async fn downloads(&self) -> Vec<String> {
        self.downloads.read().await.clone()
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn download(&self, key: &str, local_path: &Path) -> Result<(), StorageError> {
        let data = self
            .object(key)
            .await
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;

        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| StorageError::io(parent, source))?;
        }
        tokio::fs::write(local_path, data)
            .await
            .map_err(|source| StorageError::io(local_path, source))?;

        self.downloads.write().await.push(key.to_string());
        Ok(())
    }

    async fn upload(&self, local_path: &Path, key: &str) -> Result<(), StorageError> {
        let data = tokio::fs::read(local_path)
            .await
            .map_err(|source| StorageError::io(local_path, source))?;
        self.put_object(key, data).await;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.objects.read().await.contains_key(key))
    }
}
