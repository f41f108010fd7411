//! Image uploads to object storage

pub mod gcs;
pub mod transcode;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;

pub use gcs::{GcsBlobStore, ServiceAccountKey};

pub const DEFAULT_FOLDER: &str = "uploads";
pub const DEFAULT_WEBP_QUALITY: u8 = 85;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage is not configured")]
    NotConfigured,

    #[error("Invalid storage credentials: {0}")]
    Credentials(String),

    #[error("Storage authentication failed: {0}")]
    Auth(String),

    #[error("Upload rejected ({status}): {message}")]
    Upload { status: u16, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid upload: {0}")]
    InvalidInput(String),
}

/// Object storage that can publish files under a public URL
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` at `path` with public read access and return the public URL
    async fn put_public(&self, path: &str, bytes: Vec<u8>, content_type: &str)
        -> StorageResult<String>;

    fn bucket(&self) -> &str;

    fn backend_name(&self) -> &'static str;
}

/// Blob store kept in memory, for development and tests
pub struct InMemoryBlobStore {
    bucket: String,
    objects: Mutex<HashMap<String, (Vec<u8>, String)>>,
}

impl InMemoryBlobStore {
    pub fn new(bucket: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            objects: Mutex::new(HashMap::new()),
        }
    }

    /// Stored bytes and content type for `path`
    pub async fn get(&self, path: &str) -> Option<(Vec<u8>, String)> {
        self.objects.lock().await.get(path).cloned()
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn put_public(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> StorageResult<String> {
        self.objects
            .lock()
            .await
            .insert(path.to_string(), (bytes, content_type.to_string()));
        Ok(format!("memory://{}/{}", self.bucket, path))
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

/// A file received from a client
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
    pub folder: String,
    pub convert_webp: bool,
    /// Lossy WebP quality, 1-100
    pub webp_quality: u8,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoredFile {
    pub file_url: String,
    pub file_name: String,
    pub storage_method: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StorageHealth {
    pub status: &'static str,
    pub message: String,
    pub bucket_initialized: bool,
    pub bucket_name: String,
    pub project_id: String,
}

/// Converts and stores uploaded images
pub struct UploadService {
    store: Option<Arc<dyn BlobStore>>,
    bucket_name: String,
    project_id: String,
}

impl UploadService {
    pub fn new(store: Option<Arc<dyn BlobStore>>, bucket_name: &str, project_id: &str) -> Self {
        Self {
            store,
            bucket_name: bucket_name.to_string(),
            project_id: project_id.to_string(),
        }
    }

    pub fn health(&self) -> StorageHealth {
        match &self.store {
            Some(store) => StorageHealth {
                status: "healthy",
                message: "Storage is available".to_string(),
                bucket_initialized: true,
                bucket_name: store.bucket().to_string(),
                project_id: self.project_id.clone(),
            },
            None => StorageHealth {
                status: "error",
                message: "Storage not available".to_string(),
                bucket_initialized: false,
                bucket_name: self.bucket_name.clone(),
                project_id: self.project_id.clone(),
            },
        }
    }

    pub async fn upload(&self, request: UploadRequest) -> StorageResult<StoredFile> {
        let store = self.store.as_ref().ok_or(StorageError::NotConfigured)?;

        if request.bytes.is_empty() {
            return Err(StorageError::InvalidInput("file is empty".to_string()));
        }
        let folder = sanitize_folder(&request.folder)?;

        let mut content_type = request
            .content_type
            .clone()
            .unwrap_or_else(|| "application/octet-stream".to_string());
        let mut extension = file_extension(request.file_name.as_deref());
        let mut bytes = request.bytes;

        if request.convert_webp && content_type.starts_with("image/") {
            let original = bytes.clone();
            let quality = request.webp_quality;
            let converted = tokio::task::spawn_blocking(move || {
                transcode::convert_to_webp(&original, transcode::MAX_WIDTH, quality)
            })
            .await;

            match converted {
                Ok(Ok(webp_bytes)) if webp_bytes.len() < bytes.len() => {
                    tracing::info!(
                        original_bytes = bytes.len(),
                        webp_bytes = webp_bytes.len(),
                        quality,
                        "Converted upload to WebP"
                    );
                    bytes = webp_bytes;
                    content_type = "image/webp".to_string();
                    extension = ".webp".to_string();
                }
                Ok(Ok(webp_bytes)) => {
                    tracing::info!(
                        original_bytes = bytes.len(),
                        webp_bytes = webp_bytes.len(),
                        quality,
                        "WebP not smaller than original, storing original"
                    );
                }
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "WebP conversion failed, storing original");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "WebP conversion task failed, storing original");
                }
            }
        }

        let file_name = format!("{}{}", uuid::Uuid::new_v4(), extension);
        let path = format!("{}/{}", folder, file_name);
        let file_url = store.put_public(&path, bytes, &content_type).await?;

        Ok(StoredFile {
            file_url,
            file_name,
            storage_method: store.backend_name().to_string(),
        })
    }
}

/// Normalise a client-supplied folder into a safe relative object prefix
pub fn sanitize_folder(folder: &str) -> StorageResult<String> {
    let segments: Vec<&str> = folder
        .split('/')
        .map(str::trim)
        .filter(|s| !s.is_empty() && *s != ".")
        .collect();

    if segments.is_empty() {
        return Ok(DEFAULT_FOLDER.to_string());
    }

    for segment in &segments {
        if *segment == ".."
            || !segment
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(StorageError::InvalidInput(format!(
                "invalid folder name: {}",
                folder
            )));
        }
    }

    Ok(segments.join("/"))
}

/// Lower-cased extension including the dot, or empty
fn file_extension(file_name: Option<&str>) -> String {
    file_name
        .and_then(|name| std::path::Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .filter(|ext| ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat};
    use std::io::Cursor;
    use super::transcode::tests::{jpeg_bytes, noisy_photo};

    fn png() -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(noisy_photo(64, 64))
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    fn request(bytes: Vec<u8>, content_type: &str, convert: bool) -> UploadRequest {
        UploadRequest {
            file_name: Some("Dealer.PNG".to_string()),
            content_type: Some(content_type.to_string()),
            bytes,
            folder: "dealers/emma".to_string(),
            convert_webp: convert,
            webp_quality: DEFAULT_WEBP_QUALITY,
        }
    }

    fn service() -> (UploadService, Arc<InMemoryBlobStore>) {
        let store = Arc::new(InMemoryBlobStore::new("test-bucket"));
        (
            UploadService::new(Some(store.clone()), "test-bucket", "test-project"),
            store,
        )
    }

    #[test]
    fn test_sanitize_folder() {
        assert_eq!(sanitize_folder("").unwrap(), "uploads");
        assert_eq!(sanitize_folder("/dealers//emma/").unwrap(), "dealers/emma");
        assert_eq!(sanitize_folder("./avatars").unwrap(), "avatars");
        assert!(sanitize_folder("../secrets").is_err());
        assert!(sanitize_folder("dealers/../../etc").is_err());
        assert!(sanitize_folder("with space").is_err());
    }

    #[test]
    fn test_file_extension() {
        assert_eq!(file_extension(Some("photo.JPG")), ".jpg");
        assert_eq!(file_extension(Some("noext")), "");
        assert_eq!(file_extension(None), "");
    }

    #[tokio::test]
    async fn test_image_upload_is_converted() {
        let (service, store) = service();
        let stored = service.upload(request(png(), "image/png", true)).await.unwrap();

        assert!(stored.file_name.ends_with(".webp"));
        assert_eq!(stored.storage_method, "memory");

        let path = format!("dealers/emma/{}", stored.file_name);
        let (bytes, content_type) = store.get(&path).await.unwrap();
        assert_eq!(content_type, "image/webp");
        assert_eq!(image::guess_format(&bytes).unwrap(), ImageFormat::WebP);
    }

    async fn stored_size(jpeg: &[u8], quality: u8) -> (String, usize) {
        let (service, store) = service();
        let mut req = request(jpeg.to_vec(), "image/jpeg", true);
        req.webp_quality = quality;
        let stored = service.upload(req).await.unwrap();
        let (bytes, _) = store
            .get(&format!("dealers/emma/{}", stored.file_name))
            .await
            .unwrap();
        (stored.file_name, bytes.len())
    }

    #[tokio::test]
    async fn test_jpeg_upload_shrinks_with_quality() {
        let jpeg = jpeg_bytes(&noisy_photo(800, 600), 95);

        let (name, default_size) = stored_size(&jpeg, DEFAULT_WEBP_QUALITY).await;
        assert!(name.ends_with(".webp"));
        assert!(default_size < jpeg.len(), "{} >= {}", default_size, jpeg.len());

        let (_, low_size) = stored_size(&jpeg, 30).await;
        assert!(low_size < default_size, "{} >= {}", low_size, default_size);
    }

    #[tokio::test]
    async fn test_larger_webp_keeps_original() {
        let (service, store) = service();
        let source = transcode::convert_to_webp(&png(), transcode::MAX_WIDTH, 5).unwrap();

        let mut req = request(source.clone(), "image/webp", true);
        req.file_name = Some("tiny.webp".to_string());
        req.webp_quality = 100;
        let stored = service.upload(req).await.unwrap();

        let (bytes, _) = store
            .get(&format!("dealers/emma/{}", stored.file_name))
            .await
            .unwrap();
        assert_eq!(bytes, source);
    }

    #[tokio::test]
    async fn test_conversion_failure_keeps_original() {
        let (service, store) = service();
        let stored = service
            .upload(request(b"not really a png".to_vec(), "image/png", true))
            .await
            .unwrap();

        assert!(stored.file_name.ends_with(".png"));
        let (bytes, content_type) = store
            .get(&format!("dealers/emma/{}", stored.file_name))
            .await
            .unwrap();
        assert_eq!(bytes, b"not really a png");
        assert_eq!(content_type, "image/png");
    }

    #[tokio::test]
    async fn test_conversion_can_be_disabled() {
        let (service, _) = service();
        let stored = service.upload(request(png(), "image/png", false)).await.unwrap();
        assert!(stored.file_name.ends_with(".png"));
    }

    #[tokio::test]
    async fn test_unconfigured_storage() {
        let service = UploadService::new(None, "bucket", "project");
        assert!(matches!(
            service.upload(request(png(), "image/png", true)).await,
            Err(StorageError::NotConfigured)
        ));
        let health = service.health();
        assert_eq!(health.status, "error");
        assert!(!health.bucket_initialized);
    }

    #[tokio::test]
    async fn test_empty_file_rejected() {
        let (service, _) = service();
        assert!(matches!(
            service.upload(request(Vec::new(), "image/png", true)).await,
            Err(StorageError::InvalidInput(_))
        ));
    }
}
