// Submodules for local file system storage and S3 storage
mod local;
mod s3;

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tracing::info;

pub use crate::storage::{local::LocalStorage, s3::S3Storage};
use crate::config::Config;

// Storage error types
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("File not found: {0}")]
    NotFound(String), // Returned when a blob cannot be found

    #[error("Io Error: {0}")]
    IoError(#[from] std::io::Error), // Wraps standard I/O errors

    #[error("Invalid blob name: {0}")]
    InvalidName(String),

    #[error("Upload Error: {0}")]
    UploadError(String), // Errors during upload to storage

    #[error("Delete Error: {0}")]
    DeleteError(String), // Errors during deletion from storage

    #[error("List Error: {0}")]
    ListError(String),
}

/// The two blob namespaces: full-size images and thumbnails.
/// A thumbnail shares its base name with the full-size blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    Images,
    Thumbnails,
}

impl Namespace {
    /// Directory (local) or key prefix (S3) for the namespace.
    pub fn prefix(self) -> &'static str {
        match self {
            Namespace::Images => "img",
            Namespace::Thumbnails => "thumbs",
        }
    }

    pub fn key(self, name: &str) -> String {
        format!("{}/{}", self.prefix(), name)
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// Blob names are flat: no separators, and never `.` or `..` themselves.
/// Dots inside a name are fine.
pub(crate) fn validate_name(name: &str) -> Result<(), StorageError> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(StorageError::InvalidName(name.to_string()));
    }
    Ok(())
}

// Async Storage trait
#[async_trait]
pub trait Storage: Send + Sync {
    /// Write a blob, replacing any previous content under the same name.
    async fn write(&self, namespace: Namespace, name: &str, content: Bytes) -> Result<(), StorageError>;

    /// Read a blob's content.
    async fn read(&self, namespace: Namespace, name: &str) -> Result<Bytes, StorageError>;

    async fn exists(&self, namespace: Namespace, name: &str) -> Result<bool, StorageError>;

    /// Delete a blob. Deleting a missing blob is not an error.
    async fn delete(&self, namespace: Namespace, name: &str) -> Result<(), StorageError>;

    /// Names of every blob in a namespace.
    async fn list(&self, namespace: Namespace) -> Result<Vec<String>, StorageError>;
}

// Enum to represent storage backends
#[derive(Clone)]
pub enum StorageBackend {
    Local(LocalStorage),  // Local filesystem storage
    S3(S3Storage),        // AWS S3 or MinIO storage
}

// Implement Storage trait for StorageBackend enum
// Delegates calls to the chosen backend
#[async_trait]
impl Storage for StorageBackend {
    async fn write(&self, namespace: Namespace, name: &str, content: Bytes) -> Result<(), StorageError> {
        match self {
            StorageBackend::Local(s) => s.write(namespace, name, content).await,
            StorageBackend::S3(s) => s.write(namespace, name, content).await,
        }
    }

    async fn read(&self, namespace: Namespace, name: &str) -> Result<Bytes, StorageError> {
        match self {
            StorageBackend::Local(s) => s.read(namespace, name).await,
            StorageBackend::S3(s) => s.read(namespace, name).await,
        }
    }

    async fn exists(&self, namespace: Namespace, name: &str) -> Result<bool, StorageError> {
        match self {
            StorageBackend::Local(s) => s.exists(namespace, name).await,
            StorageBackend::S3(s) => s.exists(namespace, name).await,
        }
    }

    async fn delete(&self, namespace: Namespace, name: &str) -> Result<(), StorageError> {
        match self {
            StorageBackend::Local(s) => s.delete(namespace, name).await,
            StorageBackend::S3(s) => s.delete(namespace, name).await,
        }
    }

    async fn list(&self, namespace: Namespace) -> Result<Vec<String>, StorageError> {
        match self {
            StorageBackend::Local(s) => s.list(namespace).await,
            StorageBackend::S3(s) => s.list(namespace).await,
        }
    }
}

// Initialize the storage backend based on config
pub async fn init_storage(config: &Config) -> Result<StorageBackend, StorageError> {
    if config.use_s3 {
        info!("Initializing S3 storage");
        Ok(StorageBackend::S3(S3Storage::new(config).await))
    } else {
        info!("Initializing Local storage at {}", config.storage_path);
        Ok(StorageBackend::Local(LocalStorage::new(&config.storage_path).await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespaces_map_to_prefixes() {
        assert_eq!(Namespace::Images.key("a.jpg"), "img/a.jpg");
        assert_eq!(Namespace::Thumbnails.key("a.jpg"), "thumbs/a.jpg");
    }

    #[test]
    fn names_with_path_components_are_rejected() {
        assert!(validate_name("photo.jpg").is_ok());
        assert!(validate_name("../etc/passwd").is_err());
        assert!(validate_name("nested/photo.jpg").is_err());
        assert!(validate_name("").is_err());
        assert!(validate_name("..").is_err());
        assert!(validate_name(".").is_err());
        assert!(validate_name("back\\slash.jpg").is_err());
    }

    #[test]
    fn dots_inside_a_flat_name_are_allowed() {
        assert!(validate_name("my..photo.jpg").is_ok());
        assert!(validate_name("..jpg").is_ok());
        assert!(validate_name("v1..2.png").is_ok());
    }
}
