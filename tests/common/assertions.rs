//! Custom assertions over the files a session leaves behind

use std::path::Path;

use catalog_harvest::{Checkpoint, CheckpointStore, RecordId};

/// Identifiers in the output file, in row order
pub fn output_ids(path: &Path) -> Vec<u64> {
    let mut reader = csv::Reader::from_path(path).unwrap();
    let headers = reader.headers().unwrap().clone();
    let column = headers.iter().position(|h| h == "id").unwrap();
    reader
        .records()
        .map(|record| record.unwrap()[column].parse().unwrap())
        .collect()
}

/// Assert that no identifier appears twice in the output
pub fn assert_no_duplicates(path: &Path) {
    let mut ids = output_ids(path);
    let total = ids.len();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), total, "output contains duplicate ids");
}

/// Load the checkpoint at `path`
pub async fn load_checkpoint(path: &Path) -> Checkpoint {
    CheckpointStore::new(path).load().await.unwrap()
}

/// Identifiers as `RecordId`s
pub fn record_ids(ids: &[u64]) -> Vec<RecordId> {
    ids.iter().copied().map(RecordId).collect()
}
