//! Append-only CSV output
//!
//! Each record is flushed and synced before the write is reported as
//! successful, so a record is never counted as ingested unless it is on disk.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{PersistenceError, Result};
use crate::types::{CATALOG_COLUMNS, CatalogRecord};

/// Destination for flattened records
pub struct OutputSink {
    path: PathBuf,
    writer: csv::Writer<File>,
    written: u64,
}

impl OutputSink {
    /// Open the output file for appending
    ///
    /// A missing or empty file is created with the header row. A non-empty
    /// file is appended to without writing the header again.
    ///
    /// # Errors
    /// Returns error if the file cannot be opened or the header cannot be written
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)?;

        let existing_len = file.metadata()?.len();
        if existing_len > 0 {
            check_header(&path);
            // a crash can leave a partial last row; start ours on a fresh line
            if !ends_with_newline(&mut file, existing_len)? {
                tracing::warn!(path = %path.display(), "Output file does not end with a newline, terminating last row");
                file.write_all(b"\n")?;
            }
        }

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);

        if existing_len == 0 {
            writer.write_record(CATALOG_COLUMNS)?;
            writer.flush()?;
            tracing::info!(path = %path.display(), "Created output file");
        } else {
            tracing::info!(path = %path.display(), bytes = existing_len, "Appending to existing output file");
        }

        Ok(Self {
            path,
            writer,
            written: 0,
        })
    }

    /// Location of the output file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records written through this sink
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Append one record and make it durable
    pub fn write(&mut self, record: &CatalogRecord) -> std::result::Result<(), PersistenceError> {
        let failed = |reason: String| PersistenceError::RecordWrite {
            id: record.id.get(),
            path: self.path.clone(),
            reason,
        };

        self.writer
            .serialize(record)
            .map_err(|e| failed(e.to_string()))?;
        self.writer.flush().map_err(|e| failed(e.to_string()))?;
        self.writer
            .get_ref()
            .sync_data()
            .map_err(|e| failed(e.to_string()))?;

        self.written += 1;
        Ok(())
    }
}

impl std::fmt::Debug for OutputSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputSink")
            .field("path", &self.path)
            .field("written", &self.written)
            .finish_non_exhaustive()
    }
}

fn ends_with_newline(file: &mut File, len: u64) -> std::io::Result<bool> {
    file.seek(SeekFrom::Start(len - 1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

fn check_header(path: &Path) {
    let header = csv::Reader::from_path(path)
        .and_then(|mut reader| reader.headers().cloned());
    match header {
        Ok(header) if header.iter().eq(CATALOG_COLUMNS.iter().copied()) => {}
        Ok(header) => tracing::warn!(
            path = %path.display(),
            found = ?header.iter().collect::<Vec<_>>(),
            "Existing output file has unexpected columns"
        ),
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "Could not read output header"),
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RecordId;
    use tempfile::tempdir;

    fn record(id: u64, title: &str) -> CatalogRecord {
        CatalogRecord {
            id: RecordId(id),
            title: title.to_string(),
            release_date: "2021-07-04".to_string(),
            year: "2021".to_string(),
            runtime: Some(100),
            overview: "An overview, with a comma".to_string(),
            genres: "Drama, Thriller".to_string(),
            director: "A".to_string(),
            cast: "X, Y".to_string(),
            vote_average: Some(7.5),
            vote_count: Some(10),
            popularity: Some(1.25),
            budget: None,
            revenue: None,
            original_language: "en".to_string(),
            production_companies: String::new(),
            tagline: String::new(),
        }
    }

    fn read_back(path: &Path) -> (csv::StringRecord, Vec<CatalogRecord>) {
        let mut reader = csv::Reader::from_path(path).unwrap();
        let header = reader.headers().unwrap().clone();
        let rows = reader.deserialize().collect::<std::result::Result<_, _>>().unwrap();
        (header, rows)
    }

    #[test]
    fn new_file_gets_header_once() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.csv");

        let mut sink = OutputSink::open(&path).unwrap();
        sink.write(&record(1, "First")).unwrap();
        sink.write(&record(2, "Second")).unwrap();
        assert_eq!(sink.written(), 2);
        drop(sink);

        let (header, rows) = read_back(&path);
        assert!(header.iter().eq(CATALOG_COLUMNS.iter().copied()));
        assert_eq!(rows, vec![record(1, "First"), record(2, "Second")]);
    }

    #[test]
    fn header_written_even_without_records() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.csv");

        drop(OutputSink::open(&path).unwrap());

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.trim_end(), CATALOG_COLUMNS.join(","));
    }

    #[test]
    fn reopening_appends_without_second_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.csv");

        OutputSink::open(&path)
            .unwrap()
            .write(&record(1, "First"))
            .unwrap();
        OutputSink::open(&path)
            .unwrap()
            .write(&record(2, "Second"))
            .unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.matches("production_companies").count(), 1);
        let (_, rows) = read_back(&path);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].id, RecordId(2));
    }

    #[test]
    fn partial_last_row_is_terminated_before_appending() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.csv");
        std::fs::write(&path, format!("{}\n1,Trunc", CATALOG_COLUMNS.join(","))).unwrap();

        OutputSink::open(&path)
            .unwrap()
            .write(&record(2, "Whole"))
            .unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1], "1,Trunc");
        assert!(lines[2].starts_with("2,Whole,"));
    }

    #[test]
    fn quoted_fields_survive_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.csv");

        let mut tricky = record(3, "Say \"hi\", again");
        tricky.overview = "commas, and \"quotes\"".to_string();
        OutputSink::open(&path).unwrap().write(&tricky).unwrap();

        let (_, rows) = read_back(&path);
        assert_eq!(rows, vec![tricky]);
    }

    #[test]
    fn open_in_missing_directory_fails() {
        let dir = tempdir().unwrap();
        assert!(OutputSink::open(dir.path().join("missing").join("out.csv")).is_err());
    }
}
