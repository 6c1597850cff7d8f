//! Set of record identifiers already ingested
//!
//! Seeded from the existing output file and the checkpoint at startup, then
//! grown as records are written. Membership is the only question asked of it.

use std::collections::HashSet;
use std::path::Path;

use crate::error::Result;
use crate::types::RecordId;

/// Header name of the identifier column in the output file
const ID_COLUMN: &str = "id";

/// In-memory set of ingested identifiers
#[derive(Clone, Debug, Default)]
pub struct DedupIndex {
    ids: HashSet<RecordId>,
}

impl DedupIndex {
    /// Empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Add every identifier found in the `id` column of an existing output file
    ///
    /// A missing or empty file adds nothing. Rows whose identifier does not
    /// decode are skipped with a warning. A last row with no line terminator
    /// was cut short by a crash and is left out, since its id may be
    /// truncated too. Returns the number of identifiers read from the file.
    ///
    /// # Errors
    /// Returns error if the file exists but cannot be read
    pub fn seed_from_output(&mut self, path: &Path) -> Result<usize> {
        if !path.exists() {
            return Ok(0);
        }

        let bytes = std::fs::read(path)?;
        let torn_tail = !bytes.is_empty() && !bytes.ends_with(b"\n");

        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(bytes.as_slice());

        let headers = reader.byte_headers()?.clone();
        let Some(column) = headers.iter().position(|h| h == ID_COLUMN.as_bytes()) else {
            if !headers.is_empty() {
                tracing::warn!(path = %path.display(), "Output file has no id column, nothing to seed");
            }
            return Ok(0);
        };

        let mut seeded = 0;
        let mut records = reader.byte_records().enumerate().peekable();
        while let Some((row, record)) = records.next() {
            let record = record?;
            if torn_tail && records.peek().is_none() {
                tracing::warn!(
                    path = %path.display(),
                    row = row + 2,
                    "Ignoring unterminated last row"
                );
                break;
            }

            let id = record
                .get(column)
                .and_then(|field| std::str::from_utf8(field).ok())
                .and_then(|field| field.parse::<RecordId>().ok());
            match id {
                Some(id) => {
                    self.ids.insert(id);
                    seeded += 1;
                }
                None => {
                    tracing::warn!(
                        path = %path.display(),
                        row = row + 2,
                        "Skipping row with unreadable id"
                    );
                }
            }
        }

        tracing::info!(path = %path.display(), seeded, "Seeded identifiers from existing output");
        Ok(seeded)
    }

    /// Add identifiers recorded in a checkpoint
    pub fn extend(&mut self, ids: impl IntoIterator<Item = RecordId>) {
        self.ids.extend(ids);
    }

    /// Whether `id` has already been ingested
    pub fn contains(&self, id: RecordId) -> bool {
        self.ids.contains(&id)
    }

    /// Record `id` as ingested; returns false if it was already present
    pub fn insert(&mut self, id: RecordId) -> bool {
        self.ids.insert(id)
    }

    /// Number of distinct identifiers
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the index is empty
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// All identifiers in ascending order
    pub fn sorted_ids(&self) -> Vec<RecordId> {
        let mut ids: Vec<RecordId> = self.ids.iter().copied().collect();
        ids.sort_unstable();
        ids
    }
}
