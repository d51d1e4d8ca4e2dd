use std::path::{Path, PathBuf};
use bytes::Bytes;
use super::{validate_name, Namespace, Storage, StorageError};
use async_trait::async_trait;
use tokio::{fs, io::AsyncWriteExt};

// Local filesystem storage
#[derive(Clone)]
pub struct LocalStorage{
    base_path: PathBuf, // Base directory; one subdirectory per namespace
}

impl LocalStorage {
    /// Creates a new LocalStorage instance and ensures the namespace directories exist
    pub async fn new(base_path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let base_path = base_path.as_ref().to_path_buf();
        for namespace in [Namespace::Images, Namespace::Thumbnails] {
            fs::create_dir_all(base_path.join(namespace.prefix())).await?;
        }
        Ok(Self { base_path })
    }

    /// Returns the full path of a blob inside its namespace directory
    fn get_full_path(&self, namespace: Namespace, name: &str) -> Result<PathBuf, StorageError> {
        validate_name(name)?;
        Ok(self.base_path.join(namespace.prefix()).join(name))
    }
}

#[async_trait]
impl Storage for LocalStorage {

    async fn write(&self, namespace: Namespace, name: &str, content: Bytes)
    -> Result<(), StorageError> {
        let full_path = self.get_full_path(namespace, name)?;

        // Create (or truncate) the file and write content
        let mut file = fs::File::create(&full_path).await?;
        file.write_all(&content).await?;
        file.flush().await?;

        tracing::debug!("Saved blob at {:?}", full_path);
        Ok(())
    }

    async fn read(&self, namespace: Namespace, name: &str) -> Result<Bytes, StorageError> {
        let full_path = self.get_full_path(namespace, name)?;

        match fs::read(&full_path).await {
            Ok(content) => Ok(Bytes::from(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(namespace.key(name)))
            }
            Err(e) => Err(StorageError::IoError(e)),
        }
    }

    async fn exists(&self, namespace: Namespace, name: &str) -> Result<bool, StorageError> {
        let full_path = self.get_full_path(namespace, name)?;
        Ok(fs::try_exists(&full_path).await?)
    }

    async fn delete(&self, namespace: Namespace, name: &str) -> Result<(), StorageError> {
        let full_path = self.get_full_path(namespace, name)?;

        match fs::remove_file(&full_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::DeleteError(format!("{}: {}", full_path.display(), e))),
        }
    }

    async fn list(&self, namespace: Namespace) -> Result<Vec<String>, StorageError> {
        let mut entries = fs::read_dir(self.base_path.join(namespace.prefix())).await?;
        let mut names = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }

        names.sort();
        Ok(names)
    }
}
