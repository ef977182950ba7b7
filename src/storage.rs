//! Object storage for uploaded images, behind a trait so the HTTP layer does
//! not care whether bytes land on local disk or a hosted bucket.

use async_trait::async_trait;
use std::path::PathBuf;
use tracing::info;
use uuid::Uuid;

use crate::errors::ServiceError;

pub const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;
const ALLOWED_CONTENT_TYPES: &[(&str, &str)] =
    &[("image/jpeg", "jpg"), ("image/png", "png"), ("image/webp", "webp")];

/// Maps a content type to the stored file extension, rejecting anything that
/// is not an accepted image format.
pub fn extension_for(content_type: &str) -> Result<&'static str, ServiceError> {
    ALLOWED_CONTENT_TYPES
        .iter()
        .find(|(ct, _)| *ct == content_type)
        .map(|(_, ext)| *ext)
        .ok_or_else(|| {
            ServiceError::InvalidInput(format!("unsupported image type: {content_type}"))
        })
}

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Stores the bytes and returns the public URL they are served under.
    async fn store(
        &self,
        prefix: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<String, ServiceError>;

    /// Removes a previously stored object by its public URL. Unknown URLs
    /// are ignored.
    async fn remove(&self, url: &str) -> Result<(), ServiceError>;
}

/// Local-disk storage serving files under a public base URL.
pub struct LocalDiskStorage {
    root: PathBuf,
    base_url: String,
}

impl LocalDiskStorage {
    pub fn new(root: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            base_url: base_url.into(),
        }
    }

    fn key_from_url<'a>(&self, url: &'a str) -> Option<&'a str> {
        url.strip_prefix(&self.base_url)
            .map(|rest| rest.trim_start_matches('/'))
            .filter(|key| !key.is_empty() && !key.contains(".."))
    }
}

#[async_trait]
impl ObjectStorage for LocalDiskStorage {
    async fn store(
        &self,
        prefix: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<String, ServiceError> {
        if bytes.len() > MAX_IMAGE_BYTES {
            return Err(ServiceError::InvalidInput(format!(
                "image exceeds the {MAX_IMAGE_BYTES} byte limit"
            )));
        }
        let ext = extension_for(content_type)?;
        let key = format!("{prefix}-{}.{ext}", Uuid::new_v4().simple());
        let path = self.root.join(&key);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ServiceError::StorageError(e.to_string()))?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| ServiceError::StorageError(e.to_string()))?;

        info!(%key, "image stored");
        Ok(format!("{}/{}", self.base_url.trim_end_matches('/'), key))
    }

    async fn remove(&self, url: &str) -> Result<(), ServiceError> {
        let Some(key) = self.key_from_url(url) else {
            return Ok(());
        };
        match tokio::fs::remove_file(self.root.join(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ServiceError::StorageError(e.to_string())),
        }
    }
}
