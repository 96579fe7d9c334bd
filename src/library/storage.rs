use async_trait::async_trait;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::debug;

/// Backing-file primitives over the directory holding uploaded images.
#[async_trait]
pub trait ImageDirectory: Send + Sync {
    async fn write(&self, file_name: &str, bytes: &[u8]) -> Result<(), std::io::Error>;

    async fn exists(&self, file_name: &str) -> Result<bool, std::io::Error>;

    /// Returns whether a file was removed. A missing file is not an error.
    async fn delete_if_exists(&self, file_name: &str) -> Result<bool, std::io::Error>;
}

pub type DynImageDirectory = Arc<dyn ImageDirectory>;

pub struct LocalImageDirectory {
    root: PathBuf,
}

impl LocalImageDirectory {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Only the final path component is honored, so stored names can never
    /// point outside the directory.
    fn resolve(&self, file_name: &str) -> Option<PathBuf> {
        let name = Path::new(file_name).file_name()?;
        Some(self.root.join(name))
    }
}

#[async_trait]
impl ImageDirectory for LocalImageDirectory {
    async fn write(&self, file_name: &str, bytes: &[u8]) -> Result<(), std::io::Error> {
        let path = self.resolve(file_name).ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("Invalid image file name: {}", file_name),
            )
        })?;

        tokio::fs::create_dir_all(&self.root).await?;
        tokio::fs::write(&path, bytes).await?;
        debug!("Wrote {} bytes to {:?}", bytes.len(), path);
        Ok(())
    }

    async fn exists(&self, file_name: &str) -> Result<bool, std::io::Error> {
        match self.resolve(file_name) {
            Some(path) => tokio::fs::try_exists(path).await,
            None => Ok(false),
        }
    }

    async fn delete_if_exists(&self, file_name: &str) -> Result<bool, std::io::Error> {
        let Some(path) = self.resolve(file_name) else {
            return Ok(false);
        };

        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!("Removed backing file {:?}", path);
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_exists_delete() {
        let temp_dir = TempDir::new().unwrap();
        let images = LocalImageDirectory::new(temp_dir.path().join("uploaded-images"));

        images.write("a.png", b"png bytes").await.unwrap();
        assert!(images.exists("a.png").await.unwrap());

        assert!(images.delete_if_exists("a.png").await.unwrap());
        assert!(!images.exists("a.png").await.unwrap());

        // Second delete is a no-op
        assert!(!images.delete_if_exists("a.png").await.unwrap());
    }

    #[tokio::test]
    async fn test_names_are_confined_to_root() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("images");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(temp_dir.path().join("outside.png"), b"keep me").unwrap();

        let images = LocalImageDirectory::new(root.clone());
        assert!(!images.exists("../outside.png").await.unwrap());
        assert!(!images.delete_if_exists("../outside.png").await.unwrap());
        assert!(temp_dir.path().join("outside.png").exists());

        images.write("nested/dir/b.png", b"b").await.unwrap();
        assert!(root.join("b.png").exists());

        assert!(images.write("..", b"x").await.is_err());
    }
}
