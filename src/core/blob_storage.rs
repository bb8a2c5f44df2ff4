//! Content storage for published skill files
//!
//! Files are stored under opaque content ids. The moderation core only needs
//! to persist bytes at publish time and read them back for scanning.

use crate::core::service::ServiceError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// Trait for blob storage backends
#[async_trait]
pub trait BlobStorage: Send + Sync {
    /// Store data under a content id, returning the id
    async fn upload(&self, content_id: &str, data: &[u8]) -> Result<String, ServiceError>;

    /// Fetch the bytes previously stored under a content id
    async fn download(&self, content_id: &str) -> Result<Vec<u8>, ServiceError>;

    async fn exists(&self, content_id: &str) -> Result<bool, ServiceError>;

    /// Delete a content id; deleting a missing id is not an error
    async fn delete(&self, content_id: &str) -> Result<(), ServiceError>;
}

/// Fetch a stored text file
pub async fn download_text(
    storage: &dyn BlobStorage,
    content_id: &str,
) -> Result<String, ServiceError> {
    let bytes = storage.download(content_id).await?;
    String::from_utf8(bytes)
        .map_err(|_| ServiceError::Validation(format!("Content {} is not UTF-8 text", content_id)))
}

/// Local filesystem blob storage
pub struct LocalBlobStorage {
    base_path: PathBuf,
}

impl LocalBlobStorage {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn resolve(&self, content_id: &str) -> Result<PathBuf, ServiceError> {
        let relative = Path::new(content_id);
        let safe = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if !safe || content_id.is_empty() {
            return Err(ServiceError::Validation(format!(
                "Invalid content id: {}",
                content_id
            )));
        }
        Ok(self.base_path.join(relative))
    }
}

#[async_trait]
impl BlobStorage for LocalBlobStorage {
    async fn upload(&self, content_id: &str, data: &[u8]) -> Result<String, ServiceError> {
        let full_path = self.resolve(content_id)?;

        if let Some(parent) = full_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(ServiceError::Io)?;
        }

        tokio::fs::write(&full_path, data).await.map_err(ServiceError::Io)?;

        Ok(content_id.to_string())
    }

    async fn download(&self, content_id: &str) -> Result<Vec<u8>, ServiceError> {
        let full_path = self.resolve(content_id)?;
        match tokio::fs::read(&full_path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ServiceError::NotFound(
                format!("Content {} not found", content_id),
            )),
            Err(e) => Err(ServiceError::Io(e)),
        }
    }

    async fn exists(&self, content_id: &str) -> Result<bool, ServiceError> {
        let full_path = self.resolve(content_id)?;
        Ok(tokio::fs::try_exists(&full_path).await.unwrap_or(false))
    }

    async fn delete(&self, content_id: &str) -> Result<(), ServiceError> {
        let full_path = self.resolve(content_id)?;
        match tokio::fs::remove_file(&full_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ServiceError::Io(e)),
        }
    }
}

/// In-memory blob storage
#[derive(Default)]
pub struct MemoryBlobStorage {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStorage for MemoryBlobStorage {
    async fn upload(&self, content_id: &str, data: &[u8]) -> Result<String, ServiceError> {
        self.blobs
            .write()
            .await
            .insert(content_id.to_string(), data.to_vec());
        Ok(content_id.to_string())
    }

    async fn download(&self, content_id: &str) -> Result<Vec<u8>, ServiceError> {
        self.blobs
            .read()
            .await
            .get(content_id)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound(format!("Content {} not found", content_id)))
    }

    async fn exists(&self, content_id: &str) -> Result<bool, ServiceError> {
        Ok(self.blobs.read().await.contains_key(content_id))
    }

    async fn delete(&self, content_id: &str) -> Result<(), ServiceError> {
        self.blobs.write().await.remove(content_id);
        Ok(())
    }
}

/// Blob storage configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlobStorageConfig {
    /// `local` or `memory`
    pub storage_type: String,
    pub base_path: PathBuf,
}

impl Default for BlobStorageConfig {
    fn default() -> Self {
        Self {
            storage_type: "memory".to_string(),
            base_path: PathBuf::from("./artifacts"),
        }
    }
}

/// Create blob storage from configuration
pub fn create_blob_storage(config: &BlobStorageConfig) -> Result<Arc<dyn BlobStorage>, ServiceError> {
    match config.storage_type.as_str() {
        "local" => {
            info!("Using local blob storage at {}", config.base_path.display());
            Ok(Arc::new(LocalBlobStorage::new(config.base_path.clone())))
        }
        "memory" => Ok(Arc::new(MemoryBlobStorage::new())),
        other => Err(ServiceError::Config(format!(
            "Unsupported storage type: {}",
            other
        ))),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_local_storage_roundtrip() {
        let dir = TempDir::new().unwrap();
        let storage = LocalBlobStorage::new(dir.path().to_path_buf());

        storage.upload("v1/SKILL.md", b"# Hello").await.unwrap();
        assert!(storage.exists("v1/SKILL.md").await.unwrap());
        assert_eq!(
            download_text(&storage, "v1/SKILL.md").await.unwrap(),
            "# Hello"
        );

        storage.delete("v1/SKILL.md").await.unwrap();
        storage.delete("v1/SKILL.md").await.unwrap();
        assert!(matches!(
            storage.download("v1/SKILL.md").await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_local_storage_rejects_traversal() {
        let dir = TempDir::new().unwrap();
        let storage = LocalBlobStorage::new(dir.path().to_path_buf());
        assert!(storage.upload("../escape", b"x").await.is_err());
        assert!(storage.upload("/abs", b"x").await.is_err());
    }

    #[test]
    fn test_create_blob_storage_rejects_unknown_type() {
        let config = BlobStorageConfig {
            storage_type: "s3".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            create_blob_storage(&config),
            Err(ServiceError::Config(_))
        ));
    }
}
