//! Durable extraction progress
//!
//! The checkpoint is a small JSON document:
//!
//! ```json
//! {
//!   "partition_key": 2022,
//!   "page": 5,
//!   "total_count": 1200,
//!   "extracted_ids": [10, 11, 12],
//!   "updated_at": "2024-03-01T12:00:00Z"
//! }
//! ```
//!
//! `page` is always the next page to fetch for `partition_key`. The document
//! is rewritten in full after every page transition, through a temporary file
//! and a rename so a crash mid-write leaves the previous version intact.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

use crate::error::{PersistenceError, Result};
use crate::types::{Position, RecordId};

/// Persisted extraction progress
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Partition being worked on (None for an empty checkpoint)
    #[serde(default)]
    pub partition_key: Option<i32>,
    /// Next page to fetch within `partition_key`
    #[serde(default)]
    pub page: u32,
    /// Records in the output when the checkpoint was written
    #[serde(default)]
    pub total_count: u64,
    /// Identifiers already ingested, ascending
    #[serde(default)]
    pub extracted_ids: Vec<RecordId>,
    /// When the checkpoint was written
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Checkpoint {
    /// Checkpoint for `position`, stamped with the current time
    pub fn at(position: Position, total_count: u64, mut extracted_ids: Vec<RecordId>) -> Self {
        extracted_ids.sort_unstable();
        extracted_ids.dedup();
        Self {
            partition_key: Some(position.partition),
            page: position.page,
            total_count,
            extracted_ids,
            updated_at: Some(Utc::now()),
        }
    }

    /// Whether no progress has been recorded
    pub fn is_empty(&self) -> bool {
        self.partition_key.is_none()
    }

    /// Recorded position, if any
    pub fn position(&self) -> Option<Position> {
        self.partition_key.map(|partition| Position {
            partition,
            page: self.page.max(1),
        })
    }
}

/// Reads, writes and removes the checkpoint document
#[derive(Clone, Debug)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    /// Store backed by the file at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the checkpoint document
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the checkpoint
    ///
    /// A missing file is an empty checkpoint. A file that cannot be parsed is
    /// logged and also treated as empty; the output file still protects
    /// against duplicates.
    ///
    /// # Errors
    /// Returns error if the file exists but cannot be read
    pub async fn load(&self) -> Result<Checkpoint> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "No checkpoint found");
                return Ok(Checkpoint::default());
            }
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_str::<Checkpoint>(&text) {
            Ok(checkpoint) => {
                if let Some(position) = checkpoint.position() {
                    tracing::info!(
                        path = %self.path.display(),
                        position = %position,
                        total_count = checkpoint.total_count,
                        ids = checkpoint.extracted_ids.len(),
                        "Loaded checkpoint"
                    );
                }
                Ok(checkpoint)
            }
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Could not parse checkpoint, starting from scratch"
                );
                Ok(Checkpoint::default())
            }
        }
    }

    /// Write the whole checkpoint document
    pub async fn save(&self, checkpoint: &Checkpoint) -> std::result::Result<(), PersistenceError> {
        let failed = |reason: String| PersistenceError::CheckpointWrite {
            path: self.path.clone(),
            reason,
        };

        let json = serde_json::to_vec_pretty(checkpoint).map_err(|e| failed(e.to_string()))?;
        let temp_path = self.temp_path();

        let mut file = tokio::fs::File::create(&temp_path)
            .await
            .map_err(|e| failed(format!("create {}: {}", temp_path.display(), e)))?;
        file.write_all(&json)
            .await
            .map_err(|e| failed(e.to_string()))?;
        file.sync_all().await.map_err(|e| failed(e.to_string()))?;
        drop(file);

        tokio::fs::rename(&temp_path, &self.path)
            .await
            .map_err(|e| failed(format!("rename from {}: {}", temp_path.display(), e)))?;

        tracing::debug!(
            path = %self.path.display(),
            partition = ?checkpoint.partition_key,
            page = checkpoint.page,
            "Checkpoint saved"
        );
        Ok(())
    }

    /// Delete the checkpoint document
    ///
    /// Returns whether a file was removed.
    pub async fn clear(&self) -> std::result::Result<bool, PersistenceError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                tracing::info!(path = %self.path.display(), "Checkpoint cleared");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(PersistenceError::CheckpointRemove {
                path: self.path.clone(),
                reason: e.to_string(),
            }),
        }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = OsString::from(self.path.as_os_str());
        name.push(".tmp");
        PathBuf::from(name)
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn ids(values: &[u64]) -> Vec<RecordId> {
        values.iter().copied().map(RecordId).collect()
    }

    #[tokio::test]
    async fn round_trip_preserves_fields() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("progress.json"));

        let checkpoint = Checkpoint::at(
            Position {
                partition: 2022,
                page: 5,
            },
            1200,
            ids(&[10, 11, 12]),
        );
        store.save(&checkpoint).await.unwrap();

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.partition_key, Some(2022));
        assert_eq!(loaded.page, 5);
        assert_eq!(loaded.total_count, 1200);
        assert_eq!(loaded.extracted_ids, ids(&[10, 11, 12]));
        assert_eq!(loaded.updated_at, checkpoint.updated_at);
        assert_eq!(loaded, checkpoint);
    }

    #[tokio::test]
    async fn document_uses_documented_field_names() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("progress.json");
        let store = CheckpointStore::new(&path);

        store
            .save(&Checkpoint::at(
                Position {
                    partition: 2021,
                    page: 2,
                },
                3,
                ids(&[3, 1, 2, 2]),
            ))
            .await
            .unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["partition_key"], 2021);
        assert_eq!(raw["page"], 2);
        assert_eq!(raw["total_count"], 3);
        // sorted and deduplicated
        assert_eq!(raw["extracted_ids"], serde_json::json!([1, 2, 3]));
        assert!(raw["updated_at"].is_string());
    }

    #[tokio::test]
    async fn missing_file_is_an_empty_checkpoint() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("absent.json"));

        let loaded = store.load().await.unwrap();
        assert!(loaded.is_empty());
        assert_eq!(loaded.position(), None);
    }

    #[tokio::test]
    async fn corrupt_file_is_treated_as_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("progress.json");
        std::fs::write(&path, "{ not json").unwrap();

        let loaded = CheckpointStore::new(&path).load().await.unwrap();
        assert!(loaded.is_empty());
    }

    #[tokio::test]
    async fn legacy_fields_missing_fall_back_to_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("progress.json");
        std::fs::write(&path, r#"{ "partition_key": 2020, "page": 0 }"#).unwrap();

        let loaded = CheckpointStore::new(&path).load().await.unwrap();
        assert!(loaded.extracted_ids.is_empty());
        assert_eq!(loaded.updated_at, None);
        // page 0 resumes at the first page
        assert_eq!(
            loaded.position(),
            Some(Position {
                partition: 2020,
                page: 1
            })
        );
    }

    #[tokio::test]
    async fn save_replaces_previous_version_and_leaves_no_temp_file() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("progress.json"));

        for page in 1..=3 {
            store
                .save(&Checkpoint::at(
                    Position {
                        partition: 2024,
                        page,
                    },
                    0,
                    vec![],
                ))
                .await
                .unwrap();
        }

        assert_eq!(store.load().await.unwrap().page, 3);
        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1, "temp file should have been renamed away");
    }

    #[tokio::test]
    async fn clear_removes_document_once() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("progress.json"));
        store.save(&Checkpoint::default()).await.unwrap();

        assert!(store.clear().await.unwrap());
        assert!(!store.path().exists());
        assert!(!store.clear().await.unwrap());
    }

    #[tokio::test]
    async fn save_into_missing_directory_is_a_persistence_error() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("missing").join("progress.json"));

        let err = store.save(&Checkpoint::default()).await.unwrap_err();
        assert!(matches!(err, PersistenceError::CheckpointWrite { .. }));
    }
}
