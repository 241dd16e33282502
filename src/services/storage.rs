use async_trait::async_trait;
use s3::creds::Credentials;
use s3::error::S3Error;
use s3::{Bucket, Region};
use std::path::{Path, PathBuf};

/// Remote object store holding input images and published reports.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Fetch `key` into `local_path`, creating parent directories as needed.
    async fn download(&self, key: &str, local_path: &Path) -> Result<(), StorageError>;

    /// Store the file at `local_path` under `key`.
    async fn upload(&self, local_path: &Path, key: &str) -> Result<(), StorageError>;

    async fn exists(&self, key: &str) -> Result<bool, StorageError>;
}

/// Client for S3-compatible object storage.
pub struct S3Client {
    bucket: Box<Bucket>,
}

impl S3Client {
    pub fn new(
        bucket_name: &str,
        endpoint: &str,
        region: &str,
        access_key: &str,
        secret_key: &str,
    ) -> Result<Self, StorageError> {
        let region = Region::Custom {
            region: region.to_string(),
            endpoint: endpoint.to_string(),
        };

        let credentials =
            Credentials::new(Some(access_key), Some(secret_key), None, None, None)
                .map_err(|e| StorageError::Config(e.to_string()))?;

        let bucket = Bucket::new(bucket_name, region, credentials)
            .map_err(|e| StorageError::Config(e.to_string()))?
            .with_path_style();

        Ok(Self { bucket })
    }
}

#[async_trait]
impl ArtifactStore for S3Client {
    async fn download(&self, key: &str, local_path: &Path) -> Result<(), StorageError> {
        let response = self.bucket.get_object(key).await.map_err(|e| map_s3(key, e))?;
        match response.status_code() {
            200..=299 => {}
            404 => return Err(StorageError::NotFound(key.to_string())),
            status => {
                return Err(StorageError::Status {
                    key: key.to_string(),
                    status,
                })
            }
        }

        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| StorageError::io(parent, source))?;
        }
        tokio::fs::write(local_path, response.to_vec())
            .await
            .map_err(|source| StorageError::io(local_path, source))?;

        tracing::debug!(key = %key, path = %local_path.display(), "Downloaded object");
        Ok(())
    }

    async fn upload(&self, local_path: &Path, key: &str) -> Result<(), StorageError> {
        let data = tokio::fs::read(local_path)
            .await
            .map_err(|source| StorageError::io(local_path, source))?;

        let response = self
            .bucket
            .put_object_with_content_type(key, &data, content_type_for(key))
            .await
            .map_err(|e| map_s3(key, e))?;
        if !(200..300).contains(&response.status_code()) {
            return Err(StorageError::Status {
                key: key.to_string(),
                status: response.status_code(),
            });
        }

        tracing::debug!(key = %key, path = %local_path.display(), bytes = data.len(), "Uploaded object");
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        match self.bucket.head_object(key).await {
            Ok((_, status)) if (200..300).contains(&status) => Ok(true),
            Ok((_, 404)) => Ok(false),
            Ok((_, status)) => Err(StorageError::Status {
                key: key.to_string(),
                status,
            }),
            Err(S3Error::HttpFailWithBody(404, _)) => Ok(false),
            Err(e) => Err(StorageError::S3(e)),
        }
    }
}

fn map_s3(key: &str, error: S3Error) -> StorageError {
    match error {
        S3Error::HttpFailWithBody(404, _) => StorageError::NotFound(key.to_string()),
        other => StorageError::S3(other),
    }
}

fn content_type_for(key: &str) -> &'static str {
    let ext = key.rsplit('.').next().unwrap_or_default().to_ascii_lowercase();
    match ext.as_str() {
        "pdf" => "application/pdf",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "json" => "application/json",
        _ => "application/octet-stream",
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("S3 operation failed: {0}")]
    S3(#[from] S3Error),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Unexpected status {status} for {key}")]
    Status { key: String, status: u16 },

    #[error("Local file error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Storage configuration error: {0}")]
    Config(String),
}

impl StorageError {
    pub fn io(path: &Path, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}
