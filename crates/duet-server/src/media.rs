//! Image storage.
//!
//! The message service only talks to the [`ImageStore`] trait, so a CDN-backed
//! store can replace the local one. [`DiskImageStore`] keeps images as plain
//! files under a base directory and is served back by the `/media/:id` route.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::ServerError;

/// An image accepted by the media store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredImage {
    /// URL clients load the image from.
    pub url: String,
    /// Handle for [`ImageStore::destroy`].
    pub public_id: String,
}

#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn upload(&self, data: &[u8], content_type: &str) -> Result<StoredImage, ServerError>;

    async fn destroy(&self, public_id: &str) -> Result<(), ServerError>;
}

/// Decode a `data:<mime>;base64,<payload>` URI into its MIME type and bytes.
pub fn decode_data_uri(uri: &str) -> Result<(String, Vec<u8>), ServerError> {
    let rest = uri
        .trim()
        .strip_prefix("data:")
        .ok_or_else(|| ServerError::BadRequest("Image must be a data URI".into()))?;
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| ServerError::BadRequest("Malformed data URI".into()))?;
    let mime = meta
        .strip_suffix(";base64")
        .ok_or_else(|| ServerError::BadRequest("Data URI must be base64 encoded".into()))?;
    if !mime.starts_with("image/") {
        return Err(ServerError::BadRequest(format!("Unsupported media type: {mime}")));
    }
    let bytes = STANDARD
        .decode(payload.trim())
        .map_err(|e| ServerError::BadRequest(format!("Invalid base64: {e}")))?;
    Ok((mime.to_string(), bytes))
}

/// Decode `uri` and upload it, giving up after `timeout`.
pub async fn upload_data_uri(
    store: &dyn ImageStore,
    uri: &str,
    timeout: Duration,
) -> Result<StoredImage, ServerError> {
    let (mime, bytes) = decode_data_uri(uri)?;
    match tokio::time::timeout(timeout, store.upload(&bytes, &mime)).await {
        Ok(result) => result,
        Err(_) => Err(ServerError::MediaStorage(format!(
            "upload timed out after {}s",
            timeout.as_secs()
        ))),
    }
}

fn extension_for(content_type: &str) -> Option<&'static str> {
    match content_type {
        "image/png" => Some("png"),
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        _ => None,
    }
}

/// Content type of a stored file, from its extension.
pub fn content_type_for(public_id: &str) -> &'static str {
    match public_id.rsplit_once('.').map(|(_, ext)| ext) {
        Some("png") => "image/png",
        Some("jpg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    }
}

/// Verify that a resolved path stays within the expected base directory.
/// Prevents path traversal attacks.
fn ensure_within(base: &Path, target: &Path) -> Result<PathBuf, ServerError> {
    let canonical_base = base.canonicalize().unwrap_or_else(|_| base.to_path_buf());
    let mut resolved = canonical_base.clone();
    for component in target
        .strip_prefix(base)
        .unwrap_or(target)
        .components()
    {
        match component {
            std::path::Component::Normal(c) => resolved.push(c),
            std::path::Component::ParentDir => {
                return Err(ServerError::BadRequest("Path traversal detected".to_string()));
            }
            _ => {} // RootDir, CurDir, Prefix: skip
        }
    }
    if !resolved.starts_with(&canonical_base) {
        return Err(ServerError::BadRequest("Path traversal detected".to_string()));
    }
    Ok(resolved)
}

#[derive(Debug, Clone)]
pub struct DiskImageStore {
    base_path: PathBuf,
    max_size: usize,
    public_base_url: String,
}

impl DiskImageStore {
    pub async fn new(
        base_path: PathBuf,
        max_size: usize,
        public_base_url: impl Into<String>,
    ) -> Result<Self, ServerError> {
        fs::create_dir_all(&base_path).await.map_err(|e| {
            ServerError::MediaStorage(format!(
                "Failed to create media directory '{}': {}",
                base_path.display(),
                e
            ))
        })?;

        info!(path = %base_path.display(), "Media store initialized");

        Ok(Self {
            base_path,
            max_size,
            public_base_url: public_base_url.into(),
        })
    }

    /// Read a stored image back.
    pub async fn get(&self, public_id: &str) -> Result<Vec<u8>, ServerError> {
        let path = self.safe_path(public_id)?;

        if !path.exists() {
            return Err(ServerError::MediaNotFound(public_id.to_string()));
        }

        let data = fs::read(&path).await.map_err(|e| {
            ServerError::MediaStorage(format!("Failed to read image {public_id}: {e}"))
        })?;

        debug!(id = %public_id, size = data.len(), "Retrieved image");
        Ok(data)
    }

    /// Resolve a public id to a file path, rejecting anything that is not a
    /// bare file name.
    fn safe_path(&self, public_id: &str) -> Result<PathBuf, ServerError> {
        if public_id.is_empty()
            || public_id.contains('/')
            || public_id.contains('\\')
            || public_id.contains("..")
        {
            return Err(ServerError::BadRequest("Path traversal detected".to_string()));
        }
        ensure_within(&self.base_path, &self.base_path.join(public_id))
    }
}

#[async_trait]
impl ImageStore for DiskImageStore {
    async fn upload(&self, data: &[u8], content_type: &str) -> Result<StoredImage, ServerError> {
        if data.is_empty() {
            return Err(ServerError::MediaStorage("Empty image".to_string()));
        }
        if data.len() > self.max_size {
            return Err(ServerError::ImageTooLarge {
                size: data.len(),
                max: self.max_size,
            });
        }
        let ext = extension_for(content_type).ok_or_else(|| {
            ServerError::BadRequest(format!("Unsupported media type: {content_type}"))
        })?;

        let public_id = format!("{}.{ext}", Uuid::new_v4());
        let path = self.safe_path(&public_id)?;

        fs::write(&path, data).await.map_err(|e| {
            ServerError::MediaStorage(format!("Failed to write image {public_id}: {e}"))
        })?;

        debug!(id = %public_id, size = data.len(), "Stored image");
        Ok(StoredImage {
            url: format!("{}/media/{public_id}", self.public_base_url),
            public_id,
        })
    }

    async fn destroy(&self, public_id: &str) -> Result<(), ServerError> {
        let path = self.safe_path(public_id)?;

        if !path.exists() {
            return Err(ServerError::MediaNotFound(public_id.to_string()));
        }

        fs::remove_file(&path).await.map_err(|e| {
            ServerError::MediaStorage(format!("Failed to delete image {public_id}: {e}"))
        })?;

        debug!(id = %public_id, "Deleted image");
        Ok(())
    }
}
