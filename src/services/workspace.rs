use std::path::{Path, PathBuf};

use crate::models::job::ArtifactKind;

/// Process-wide temp root under which task directories are created.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn task_dirs(&self, task_id: &str) -> TaskDirs {
        TaskDirs {
            product: self.root.join(ArtifactKind::Product.dir_name()).join(task_id),
            competitor: self.root.join(ArtifactKind::Competitor.dir_name()).join(task_id),
        }
    }

    /// Create empty task directories, discarding anything a previous
    /// attempt at the same task left behind.
    pub async fn prepare(&self, task_id: &str) -> std::io::Result<TaskDirs> {
        let dirs = self.task_dirs(task_id);
        for dir in [&dirs.product, &dirs.competitor] {
            match tokio::fs::remove_dir_all(dir).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
            tokio::fs::create_dir_all(dir).await?;
        }
        Ok(dirs)
    }
}

/// The `product/` and `competitor/` directory pair owned by one task.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskDirs {
    pub product: PathBuf,
    pub competitor: PathBuf,
}

impl TaskDirs {
    pub fn for_kind(&self, kind: ArtifactKind) -> &Path {
        match kind {
            ArtifactKind::Product => &self.product,
            ArtifactKind::Competitor => &self.competitor,
        }
    }

    /// Remove both directories. Failures are logged, never returned.
    pub async fn cleanup(&self, task_id: &str) {
        for dir in [&self.product, &self.competitor] {
            match tokio::fs::remove_dir_all(dir).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(
                        task_id = %task_id,
                        path = %dir.display(),
                        error = %e,
                        "Failed to remove task directory"
                    );
                }
            }
        }
        tracing::debug!(task_id = %task_id, "Removed task directories");
    }
}
