//! Pluggable storage backends for attachment content.
//!
//! Attachment metadata always lives in the database; the bytes go to one
//! of these backends:
//!
//! - **Filesystem**: store files on the local filesystem (default)
//! - **S3**: store files in S3-compatible object storage
//!
//! The choice of backend is configured via `[storage]` in the config.
//! Backends address content by storage key, an opaque string generated
//! when the attachment is uploaded and recorded in the attachments table.

use std::{path::Path, sync::Arc};

use async_trait::async_trait;
use thiserror::Error;
#[cfg(feature = "s3-storage")]
use tracing::error;
use tracing::{debug, info, instrument, warn};

#[cfg(feature = "s3-storage")]
use crate::config::S3StorageConfig;
use crate::config::{FilesystemStorageConfig, StorageBackend, StorageConfig};

/// Errors that can occur during attachment storage operations.
#[derive(Debug, Error)]
pub enum FileStorageError {
    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("S3 error: {0}")]
    S3(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type FileStorageResult<T> = Result<T, FileStorageError>;

/// Trait for pluggable attachment storage backends.
///
/// Implementations must be `Send + Sync` to support async contexts.
#[async_trait]
pub trait FileStorage: Send + Sync {
    /// Store content under the given storage key.
    async fn store(&self, storage_key: &str, content: &[u8]) -> FileStorageResult<()>;

    /// Retrieve content by storage key.
    async fn retrieve(&self, storage_key: &str) -> FileStorageResult<Vec<u8>>;

    /// Delete content by storage key. Idempotent: deleting a key that is
    /// already gone succeeds.
    async fn delete(&self, storage_key: &str) -> FileStorageResult<()>;

    /// Check whether content exists for a storage key.
    async fn exists(&self, storage_key: &str) -> FileStorageResult<bool>;

    /// Get the backend type name (for logging/debugging).
    fn backend_name(&self) -> &'static str;
}

/// Filesystem attachment storage backend.
///
/// Stores content on the local filesystem as `{base_path}/{storage_key}`.
pub struct FilesystemFileStorage {
    config: FilesystemStorageConfig,
}

impl FilesystemFileStorage {
    pub fn new(config: FilesystemStorageConfig) -> FileStorageResult<Self> {
        let storage = Self { config };

        // Ensure the storage directory exists if create_dir is enabled
        if storage.config.create_dir {
            let path = Path::new(&storage.config.path);
            if !path.exists() {
                info!(path = %storage.config.path, "Creating attachment storage directory");
                std::fs::create_dir_all(path)?;

                // Set directory permissions on Unix
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    std::fs::set_permissions(
                        path,
                        std::fs::Permissions::from_mode(storage.config.dir_mode),
                    )?;
                }
            }
        }

        Ok(storage)
    }

    fn file_path(&self, storage_key: &str) -> std::path::PathBuf {
        self.config.file_path(storage_key)
    }
}

#[async_trait]
impl FileStorage for FilesystemFileStorage {
    #[instrument(skip(self, content), fields(size = content.len()))]
    async fn store(&self, storage_key: &str, content: &[u8]) -> FileStorageResult<()> {
        let path = self.file_path(storage_key);
        debug!(storage_key, path = %path.display(), size = content.len(), "Storing file on filesystem");

        // Write to a temp file first, then rename for atomicity
        let temp_path = path.with_extension("tmp");

        tokio::fs::write(&temp_path, content).await?;

        // Set file permissions on Unix
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(
                &temp_path,
                std::fs::Permissions::from_mode(self.config.file_mode),
            )
            .await?;
        }

        // Atomic rename
        tokio::fs::rename(&temp_path, &path).await?;

        info!(storage_key, path = %path.display(), "File stored successfully");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn retrieve(&self, storage_key: &str) -> FileStorageResult<Vec<u8>> {
        let path = self.file_path(storage_key);
        debug!(path = %path.display(), "Retrieving file from filesystem");

        match tokio::fs::read(&path).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(FileStorageError::NotFound(storage_key.to_string()))
            }
            Err(e) => Err(FileStorageError::Io(e)),
        }
    }

    #[instrument(skip(self))]
    async fn delete(&self, storage_key: &str) -> FileStorageResult<()> {
        let path = self.file_path(storage_key);
        debug!(path = %path.display(), "Deleting file from filesystem");

        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                info!(path = %path.display(), "File deleted successfully");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "File not found during deletion");
                Ok(())
            }
            Err(e) => Err(FileStorageError::Io(e)),
        }
    }

    #[instrument(skip(self))]
    async fn exists(&self, storage_key: &str) -> FileStorageResult<bool> {
        let path = self.file_path(storage_key);
        Ok(tokio::fs::metadata(&path).await.is_ok())
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }
}

/// S3-compatible object storage backend.
///
/// Stores attachment content in an S3 bucket. Supports:
/// - AWS S3
/// - MinIO
/// - Cloudflare R2
/// - DigitalOcean Spaces
/// - Any S3-compatible service
///
/// Requires the `s3-storage` feature.
#[cfg(feature = "s3-storage")]
pub struct S3FileStorage {
    config: S3StorageConfig,
    client: aws_sdk_s3::Client,
}

#[cfg(feature = "s3-storage")]
impl S3FileStorage {
    pub async fn new(config: S3StorageConfig) -> FileStorageResult<Self> {
        info!(bucket = %config.bucket, "Initializing S3 attachment storage");

        let mut sdk_config_builder = aws_config::defaults(aws_config::BehaviorVersion::latest());

        // Set region if specified
        if let Some(region) = &config.region {
            sdk_config_builder = sdk_config_builder.region(aws_config::Region::new(region.clone()));
        }

        // Set credentials if specified in config
        if let (Some(access_key), Some(secret_key)) =
            (&config.access_key_id, &config.secret_access_key)
        {
            let credentials = aws_credential_types::Credentials::new(
                access_key.clone(),
                secret_key.clone(),
                None, // session token
                None, // expiry
                "trajan-config",
            );
            sdk_config_builder = sdk_config_builder.credentials_provider(credentials);
        }

        let sdk_config = sdk_config_builder.load().await;

        // Build S3 client with custom endpoint if specified
        let mut s3_config_builder = aws_sdk_s3::config::Builder::from(&sdk_config);

        if let Some(endpoint) = &config.endpoint {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint);
        }

        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = aws_sdk_s3::Client::from_conf(s3_config_builder.build());

        Ok(Self { config, client })
    }

    fn object_key(&self, storage_key: &str) -> String {
        self.config.file_key(storage_key)
    }
}

#[cfg(feature = "s3-storage")]
#[async_trait]
impl FileStorage for S3FileStorage {
    #[instrument(skip(self, content), fields(size = content.len(), bucket = %self.config.bucket))]
    async fn store(&self, storage_key: &str, content: &[u8]) -> FileStorageResult<()> {
        let key = self.object_key(storage_key);
        debug!(storage_key, key, size = content.len(), "Storing file in S3");

        let mut request = self
            .client
            .put_object()
            .bucket(&self.config.bucket)
            .key(&key)
            .body(aws_sdk_s3::primitives::ByteStream::from(content.to_vec()));

        // Set storage class if specified
        if let Some(storage_class) = &self.config.storage_class {
            request = request.storage_class(storage_class.as_str().into());
        }

        // Set server-side encryption if configured
        if let Some(sse) = &self.config.server_side_encryption {
            match sse {
                crate::config::S3ServerSideEncryption::Aes256 => {
                    request = request
                        .server_side_encryption(aws_sdk_s3::types::ServerSideEncryption::Aes256);
                }
                crate::config::S3ServerSideEncryption::Kms { key_id } => {
                    request = request
                        .server_side_encryption(aws_sdk_s3::types::ServerSideEncryption::AwsKms)
                        .ssekms_key_id(key_id);
                }
            }
        }

        request.send().await.map_err(|e| {
            error!(error = %e, "Failed to upload to S3");
            FileStorageError::S3(e.to_string())
        })?;

        info!(storage_key, key, bucket = %self.config.bucket, "File stored in S3");
        Ok(())
    }

    #[instrument(skip(self), fields(bucket = %self.config.bucket))]
    async fn retrieve(&self, storage_key: &str) -> FileStorageResult<Vec<u8>> {
        let key = self.object_key(storage_key);
        debug!(key, "Retrieving file from S3");

        let result = self
            .client
            .get_object()
            .bucket(&self.config.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| {
                if e.to_string().contains("NoSuchKey") || e.to_string().contains("NotFound") {
                    FileStorageError::NotFound(storage_key.to_string())
                } else {
                    error!(error = %e, "Failed to download from S3");
                    FileStorageError::S3(e.to_string())
                }
            })?;

        let content = result
            .body
            .collect()
            .await
            .map_err(|e| FileStorageError::S3(format!("Failed to read S3 response body: {}", e)))?
            .to_vec();

        Ok(content)
    }

    #[instrument(skip(self), fields(bucket = %self.config.bucket))]
    async fn delete(&self, storage_key: &str) -> FileStorageResult<()> {
        let key = self.object_key(storage_key);
        debug!(key, "Deleting file from S3");

        self.client
            .delete_object()
            .bucket(&self.config.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to delete from S3");
                FileStorageError::S3(e.to_string())
            })?;

        info!(key, bucket = %self.config.bucket, "File deleted from S3");
        Ok(())
    }

    #[instrument(skip(self), fields(bucket = %self.config.bucket))]
    async fn exists(&self, storage_key: &str) -> FileStorageResult<bool> {
        let key = self.object_key(storage_key);

        match self
            .client
            .head_object()
            .bucket(&self.config.bucket)
            .key(&key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                if e.to_string().contains("NotFound") || e.to_string().contains("NoSuchKey") {
                    Ok(false)
                } else {
                    Err(FileStorageError::S3(e.to_string()))
                }
            }
        }
    }

    fn backend_name(&self) -> &'static str {
        "s3"
    }
}

/// Create an attachment storage backend from configuration.
pub async fn create_file_storage(config: &StorageConfig) -> FileStorageResult<Arc<dyn FileStorage>> {
    match config.backend {
        StorageBackend::Filesystem => {
            info!(path = %config.filesystem.path, "Using filesystem attachment storage backend");
            Ok(Arc::new(FilesystemFileStorage::new(
                config.filesystem.clone(),
            )?))
        }
        #[cfg(feature = "s3-storage")]
        StorageBackend::S3 => {
            let s3_config = config.s3.clone().ok_or_else(|| {
                FileStorageError::Config(
                    "S3 backend requires [storage.s3] config".to_string(),
                )
            })?;
            info!(bucket = %s3_config.bucket, "Using S3 attachment storage backend");
            Ok(Arc::new(S3FileStorage::new(s3_config).await?))
        }
        #[cfg(not(feature = "s3-storage"))]
        StorageBackend::S3 => Err(FileStorageError::Config(
            "S3 attachment storage backend requires the 's3-storage' feature. \
                Rebuild with: cargo build --features s3-storage"
                .to_string(),
        )),
    }
}
