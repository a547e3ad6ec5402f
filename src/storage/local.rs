// src/storage/local.rs

//! Local filesystem cache store.
//!
//! JSON files written atomically (write to temp, then rename), so a crash
//! mid-commit leaves the previous state intact. All commits go through one
//! async mutex: single-writer discipline even with both source tasks
//! committing.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::{AppError, Result};
use crate::models::{CacheConfig, FetchCursor, UnifiedRecord};
use crate::storage::{CacheData, CacheSnapshot, CacheStore};

const CURSORS_FILE: &str = "cursors.json";
const RECORDS_FILE: &str = "records.json";

/// Cache store backed by JSON files under a root directory.
pub struct JsonCacheStore {
    root_dir: PathBuf,
    pretty: bool,
    write_lock: Mutex<()>,
}

impl JsonCacheStore {
    /// Create a new store rooted at the given directory.
    pub fn new(root_dir: impl Into<PathBuf>, config: &CacheConfig) -> Self {
        Self {
            root_dir: root_dir.into(),
            pretty: config.pretty_json,
            write_lock: Mutex::new(()),
        }
    }

    /// Get the full path for a relative key.
    fn path(&self, key: &str) -> PathBuf {
        self.root_dir.join(key)
    }

    /// Ensure the root directory exists.
    async fn ensure_dir(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.root_dir)
            .await
            .map_err(AppError::cache_write)
    }

    /// Write bytes atomically (write to temp, then rename).
    async fn write_bytes(&self, key: &str, bytes: &[u8]) -> Result<()> {
        self.ensure_dir().await?;
        let path = self.path(key);
        let tmp = path.with_extension("tmp");

        let mut file = tokio::fs::File::create(&tmp)
            .await
            .map_err(AppError::cache_write)?;
        file.write_all(bytes).await.map_err(AppError::cache_write)?;
        file.flush().await.map_err(AppError::cache_write)?;
        drop(file);

        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(AppError::cache_write)
    }

    /// Write JSON data.
    async fn write_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let bytes = if self.pretty {
            serde_json::to_vec_pretty(value)
        } else {
            serde_json::to_vec(value)
        }
        .map_err(AppError::cache_write)?;
        self.write_bytes(key, &bytes).await
    }

    /// Read bytes, returning None if the file doesn't exist.
    async fn read_bytes(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    /// Read JSON data.
    async fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.read_bytes(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl CacheStore for JsonCacheStore {
    async fn load(&self) -> Result<CacheSnapshot> {
        let cursors: Vec<FetchCursor> = self.read_json(CURSORS_FILE).await?.unwrap_or_default();
        let records = self
            .read_json::<CacheData>(RECORDS_FILE)
            .await?
            .map(|data| data.records)
            .unwrap_or_default();

        Ok(CacheSnapshot { cursors, records })
    }

    async fn commit(&self, cursors: &[FetchCursor], records: &[UnifiedRecord]) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        // Skip rewrites when nothing changed, which also makes re-committing
        // the same state a no-op.
        let existing: Vec<FetchCursor> = self.read_json(CURSORS_FILE).await?.unwrap_or_default();
        if existing != cursors {
            self.write_json(CURSORS_FILE, cursors).await?;
        }

        let existing = self
            .read_json::<CacheData>(RECORDS_FILE)
            .await?
            .map(|data| data.records)
            .unwrap_or_default();
        if existing != records {
            self.write_json(RECORDS_FILE, &CacheData::new(records.to_vec()))
                .await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use tempfile::TempDir;

    use crate::models::SourceKind;

    fn store(tmp: &TempDir) -> JsonCacheStore {
        JsonCacheStore::new(tmp.path(), &CacheConfig::default())
    }

    fn sample_record(native_id: &str) -> UnifiedRecord {
        UnifiedRecord {
            id: UnifiedRecord::qualified_id(SourceKind::Flickr, native_id),
            title: Some("Test".to_string()),
            author: None,
            created_at: None,
            tags: vec!["test".to_string()],
            media_url: format!("https://example.com/{native_id}"),
            source: SourceKind::Flickr,
            raw: json!({"id": native_id}),
            fetched_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_load_empty_on_first_run() {
        let tmp = TempDir::new().unwrap();
        let snapshot = store(&tmp).load().await.unwrap();

        assert!(snapshot.cursors.is_empty());
        assert!(snapshot.records.is_empty());
    }

    #[tokio::test]
    async fn test_commit_then_load_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);

        let mut cursor = FetchCursor::new(SourceKind::Flickr);
        cursor.advance(Some("2".to_string()));
        let records = vec![sample_record("1"), sample_record("2")];

        store.commit(&[cursor.clone()], &records).await.unwrap();
        let snapshot = store.load().await.unwrap();

        assert_eq!(snapshot.cursors, vec![cursor]);
        assert_eq!(snapshot.records, records);
    }

    #[tokio::test]
    async fn test_commit_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);

        let cursors = vec![FetchCursor::new(SourceKind::Archive)];
        let records = vec![sample_record("1")];

        store.commit(&cursors, &records).await.unwrap();
        let first = tokio::fs::read(tmp.path().join(RECORDS_FILE)).await.unwrap();

        store.commit(&cursors, &records).await.unwrap();
        let second = tokio::fs::read(tmp.path().join(RECORDS_FILE)).await.unwrap();

        // Byte-identical: the second commit did not rewrite anything.
        assert_eq!(first, second);

        let snapshot = store.load().await.unwrap();
        assert_eq!(snapshot.records.len(), 1);
    }

    #[tokio::test]
    async fn test_commit_updates_changed_records() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);

        let cursors = vec![FetchCursor::new(SourceKind::Flickr)];
        store.commit(&cursors, &[sample_record("1")]).await.unwrap();
        store
            .commit(&cursors, &[sample_record("1"), sample_record("2")])
            .await
            .unwrap();

        let snapshot = store.load().await.unwrap();
        assert_eq!(snapshot.records.len(), 2);
    }

    #[tokio::test]
    async fn test_no_leftover_temp_files() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);

        store
            .commit(&[FetchCursor::new(SourceKind::Flickr)], &[sample_record("1")])
            .await
            .unwrap();

        let mut entries = tokio::fs::read_dir(tmp.path()).await.unwrap();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            let name = entry.file_name();
            assert!(!name.to_string_lossy().ends_with(".tmp"));
        }
    }
}
