//! Proof-file storage backends.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::FileStorage;
use crate::error::BrokerError;

/// Writes proofs to a local directory served under a public base URL.
#[derive(Debug, Clone)]
pub struct LocalFileStorage {
    dir: PathBuf,
    base_url: String,
}

impl LocalFileStorage {
    /// Creates storage rooted at `dir`, publishing files under `base_url`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl FileStorage for LocalFileStorage {
    async fn upload(&self, name: &str, data: Vec<u8>) -> Result<String, BrokerError> {
        check_name(name)?;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| BrokerError::Storage(format!("cannot create upload dir: {e}")))?;
        let path = self.dir.join(name);
        tokio::fs::write(&path, data)
            .await
            .map_err(|e| BrokerError::Storage(format!("cannot write {}: {e}", path.display())))?;

        tracing::debug!(file = %path.display(), "stored proof file");
        Ok(format!("{}/{name}", self.base_url.trim_end_matches('/')))
    }

    async fn remove(&self, name: &str) -> Result<(), BrokerError> {
        check_name(name)?;
        let path = self.dir.join(name);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                tracing::debug!(file = %path.display(), "removed proof file");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BrokerError::Storage(format!(
                "cannot remove {}: {e}",
                path.display()
            ))),
        }
    }
}

fn check_name(name: &str) -> Result<(), BrokerError> {
    if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
        return Err(BrokerError::Validation(format!("invalid file name: {name}")));
    }
    Ok(())
}

/// Keeps uploads in memory. Used by tests and persistence-less runs.
#[derive(Debug, Default)]
pub struct MemoryFileStorage {
    files: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryFileStorage {
    /// Creates empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the stored bytes for `name`, if any.
    pub async fn get(&self, name: &str) -> Option<Vec<u8>> {
        self.files.lock().await.get(name).cloned()
    }

    /// Number of stored files.
    pub async fn len(&self) -> usize {
        self.files.lock().await.len()
    }

    /// Returns `true` if nothing was uploaded yet.
    pub async fn is_empty(&self) -> bool {
        self.files.lock().await.is_empty()
    }
}

#[async_trait]
impl FileStorage for MemoryFileStorage {
    async fn upload(&self, name: &str, data: Vec<u8>) -> Result<String, BrokerError> {
        self.files.lock().await.insert(name.to_string(), data);
        Ok(format!("memory://{name}"))
    }

    async fn remove(&self, name: &str) -> Result<(), BrokerError> {
        self.files.lock().await.remove(name);
        Ok(())
    }
}
