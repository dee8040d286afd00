//! Last fetched window of a source, kept as a JSON array on disk.

use anyhow::Result;
use serde_json::Value;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Replaces the file atomically: write a sibling temp file, then rename.
    pub async fn write(&self, records: &[Value]) -> Result<()> {
        let bytes = serde_json::to_vec(records)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        fs_err::tokio::write(&tmp, &bytes).await?;
        fs_err::tokio::rename(&tmp, &self.path).await?;
        Ok(())
    }

    /// Moves a legacy snapshot into place when this one does not exist yet.
    pub async fn adopt_legacy(&self, legacy: &Path) -> Result<bool> {
        if self.exists() || !legacy.exists() {
            return Ok(false);
        }
        fs_err::tokio::rename(legacy, &self.path).await?;
        log::info!("Renamed {} to {}", legacy.display(), self.path.display());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_then_read() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path().join("transactions-test.json"));
        assert!(!store.exists());

        store.write(&[json!({"ID": "1"}), json!({"ID": "2"})]).await.unwrap();
        store.write(&[json!({"ID": "3"})]).await.unwrap();

        let stored: Vec<Value> = serde_json::from_slice(&std::fs::read(store.path()).unwrap()).unwrap();
        assert_eq!(stored, vec![json!({"ID": "3"})]);
        assert!(!dir.path().join("transactions-test.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_adopt_legacy() {
        let dir = TempDir::new().unwrap();
        let legacy = dir.path().join("transactions.json");
        std::fs::write(&legacy, "[]").unwrap();

        let store = SnapshotStore::new(dir.path().join("transactions-privat24.json"));
        assert!(store.adopt_legacy(&legacy).await.unwrap());
        assert!(store.exists());
        assert!(!legacy.exists());
        assert!(!store.adopt_legacy(&legacy).await.unwrap());
    }
}
