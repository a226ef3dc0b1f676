//! Local-filesystem storage for uploaded and received file bytes.

use std::path::{Path, PathBuf};

use tokio::fs;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum BlobStoreError {
    #[error("blob io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid storage key: {0}")]
    InvalidKey(String),
}

#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write bytes under a fresh key scoped by owner; returns the key.
    pub async fn put(
        &self,
        scope: &str,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<String, BlobStoreError> {
        let key = format!(
            "{}/{}-{}",
            sanitize_segment(scope),
            Uuid::new_v4(),
            sanitize_segment(file_name)
        );
        let path = self.path_for(&key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, bytes).await?;
        Ok(key)
    }

    pub async fn get(&self, key: &str) -> Result<Vec<u8>, BlobStoreError> {
        Ok(fs::read(self.path_for(key)?).await?)
    }

    /// Missing blobs are not an error.
    pub async fn delete(&self, key: &str) -> Result<(), BlobStoreError> {
        match fs::remove_file(self.path_for(key)?).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, BlobStoreError> {
        if key.is_empty()
            || key.starts_with('/')
            || key.split('/').any(|segment| segment.is_empty() || segment == "..")
        {
            return Err(BlobStoreError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(key))
    }
}

fn sanitize_segment(value: &str) -> String {
    let cleaned: String = value
        .chars()
        .map(|ch| {
            if ch.is_alphanumeric() || matches!(ch, '.' | '-' | '_') {
                ch
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim_matches('.');
    if trimmed.is_empty() {
        "file".to_string()
    } else {
        trimmed.to_string()
    }
}
