//! Bootstrap sentinel
//!
//! A local marker file: present once the node finished its one-time
//! bootstrap. Created once, never rewritten or removed.

use std::path::PathBuf;

use crate::error::Result;

/// Marker file for a completed bootstrap
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sentinel {
    path: PathBuf,
}

impl Sentinel {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Whether the bootstrap already completed
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Mark the bootstrap complete
    pub async fn create(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, b"").await?;
        tracing::info!("Created sentinel {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_in_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let sentinel = Sentinel::new(dir.path().join("state/deployed"));
        assert!(!sentinel.exists());

        sentinel.create().await.unwrap();
        assert!(sentinel.exists());

        // Creating twice is harmless
        sentinel.create().await.unwrap();
        assert!(sentinel.exists());
    }
}
