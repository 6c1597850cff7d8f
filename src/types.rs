//! Core types for catalog-harvest

use serde::{Deserialize, Deserializer, Serialize};

use crate::policy::FailureChoice;

/// Unique identifier of a catalog entity
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct RecordId(pub u64);

impl RecordId {
    /// Create a new RecordId
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the inner u64 value
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl From<u64> for RecordId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl From<RecordId> for u64 {
    fn from(id: RecordId) -> Self {
        id.0
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RecordId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.trim().parse()?))
    }
}

/// A position in the iteration space: the next page to fetch for a partition
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    /// Partition key (release year)
    pub partition: i32,
    /// Page number, 1-based
    pub page: u32,
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "year {}, page {}", self.partition, self.page)
    }
}

/// One flattened output row
///
/// Field order is the CSV column order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CatalogRecord {
    /// Unique identifier
    pub id: RecordId,
    /// Primary title
    pub title: String,
    /// Release date as reported upstream (YYYY-MM-DD)
    pub release_date: String,
    /// First four characters of the release date
    pub year: String,
    /// Runtime in minutes
    pub runtime: Option<u32>,
    /// Synopsis with line breaks flattened
    pub overview: String,
    /// Genre names, comma separated
    pub genres: String,
    /// First credited director
    pub director: String,
    /// Top-billed cast names, comma separated
    pub cast: String,
    /// Aggregate rating
    pub vote_average: Option<f64>,
    /// Number of votes behind the rating
    pub vote_count: Option<u64>,
    /// Upstream popularity score
    pub popularity: Option<f64>,
    /// Production budget
    pub budget: Option<u64>,
    /// Box-office revenue
    pub revenue: Option<u64>,
    /// ISO 639-1 language code
    pub original_language: String,
    /// Studio names, comma separated
    pub production_companies: String,
    /// Tagline with line breaks flattened
    pub tagline: String,
}

/// Column names of the output CSV, in order
pub const CATALOG_COLUMNS: [&str; 17] = [
    "id",
    "title",
    "release_date",
    "year",
    "runtime",
    "overview",
    "genres",
    "director",
    "cast",
    "vote_average",
    "vote_count",
    "popularity",
    "budget",
    "revenue",
    "original_language",
    "production_companies",
    "tagline",
];

/// A page from the discover endpoint
#[derive(Clone, Debug, Default, Deserialize)]
pub struct DiscoverPage {
    /// Page number echoed by the API
    #[serde(default)]
    pub page: u32,
    /// Total pages available for the query
    #[serde(default)]
    pub total_pages: u32,
    /// Candidate items on this page
    #[serde(default, deserialize_with = "null_as_default")]
    pub results: Vec<DiscoverItem>,
}

/// A candidate item listed on a discover page
#[derive(Clone, Debug, Deserialize)]
pub struct DiscoverItem {
    /// Entity identifier (absent or zero entries are ignored)
    #[serde(default)]
    pub id: Option<RecordId>,
    /// Title, used for log context only
    #[serde(default)]
    pub title: Option<String>,
}

/// Detail payload for one entity, with credits appended
#[derive(Clone, Debug, Default, Deserialize)]
pub struct MovieDetails {
    /// Entity identifier
    pub id: RecordId,
    /// Primary title
    #[serde(default)]
    pub title: Option<String>,
    /// Release date (YYYY-MM-DD), may be empty
    #[serde(default)]
    pub release_date: Option<String>,
    /// Runtime in minutes
    #[serde(default)]
    pub runtime: Option<u32>,
    /// Synopsis
    #[serde(default)]
    pub overview: Option<String>,
    /// Tagline
    #[serde(default)]
    pub tagline: Option<String>,
    /// Aggregate rating
    #[serde(default)]
    pub vote_average: Option<f64>,
    /// Number of votes
    #[serde(default)]
    pub vote_count: Option<u64>,
    /// Popularity score
    #[serde(default)]
    pub popularity: Option<f64>,
    /// Production budget
    #[serde(default)]
    pub budget: Option<u64>,
    /// Revenue
    #[serde(default)]
    pub revenue: Option<u64>,
    /// Original language code
    #[serde(default)]
    pub original_language: Option<String>,
    /// Genres
    #[serde(default, deserialize_with = "null_as_default")]
    pub genres: Vec<NamedEntity>,
    /// Production companies
    #[serde(default, deserialize_with = "null_as_default")]
    pub production_companies: Vec<NamedEntity>,
    /// Cast and crew
    #[serde(default)]
    pub credits: Option<Credits>,
}

/// Cast and crew lists
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Credits {
    /// Cast in billing order
    #[serde(default, deserialize_with = "null_as_default")]
    pub cast: Vec<CastMember>,
    /// Crew in upstream order
    #[serde(default, deserialize_with = "null_as_default")]
    pub crew: Vec<CrewMember>,
}

/// A cast entry
#[derive(Clone, Debug, Default, Deserialize)]
pub struct CastMember {
    /// Performer name
    #[serde(default)]
    pub name: Option<String>,
}

/// A crew entry
#[derive(Clone, Debug, Default, Deserialize)]
pub struct CrewMember {
    /// Person name
    #[serde(default)]
    pub name: Option<String>,
    /// Role tag (e.g., "Director")
    #[serde(default)]
    pub job: Option<String>,
}

/// Genre, studio or other named sub-entity
#[derive(Clone, Debug, Default, Deserialize)]
pub struct NamedEntity {
    /// Display name
    #[serde(default)]
    pub name: Option<String>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Running counters for one extraction session
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    /// Records known to be in the output (existing plus written this run)
    pub total_records: u64,
    /// Records written during this run
    pub records_written: u64,
    /// API calls that failed terminally
    pub failed_requests: u64,
    /// Candidate items skipped because their detail fetch or transform failed
    pub skipped_items: u64,
    /// Checkpoint or output writes that failed
    pub persistence_failures: u64,
}

/// Why the session asked the failure policy for a decision
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    /// The page could not be fetched after automatic retries
    PageFetchFailed {
        /// Description of the last error
        message: String,
    },
    /// Too many empty pages in a row
    EmptyPages {
        /// Length of the empty streak
        streak: u32,
    },
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::PageFetchFailed { message } => {
                write!(f, "failed to fetch page: {message}")
            }
            FailureReason::EmptyPages { streak } => {
                write!(f, "{streak} consecutive empty pages")
            }
        }
    }
}

/// Event emitted while the session runs
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Partition already completed in a previous run
    PartitionSkipped {
        /// Partition key
        partition: i32,
    },

    /// Partition processing started
    PartitionStarted {
        /// Partition key
        partition: i32,
        /// First page that will be fetched
        start_page: u32,
    },

    /// A page with results was fetched
    PageFetched {
        /// Partition key
        partition: i32,
        /// Page number
        page: u32,
        /// Clamped total page count
        total_pages: u32,
        /// Items listed on the page
        items: usize,
        /// Items that were not already in the index
        new_items: usize,
    },

    /// A page came back without results
    EmptyPage {
        /// Partition key
        partition: i32,
        /// Page number
        page: u32,
        /// Current empty streak
        streak: u32,
    },

    /// A record was appended to the output
    RecordWritten {
        /// Record identifier
        id: RecordId,
        /// Record title
        title: String,
    },

    /// Record count crossed a progress milestone
    Milestone {
        /// Records in the output
        total_records: u64,
        /// Records written for the current partition
        partition_records: u64,
    },

    /// A candidate item was skipped
    ItemFailed {
        /// Item identifier
        id: RecordId,
        /// Failure description
        reason: String,
    },

    /// Checkpoint document written
    CheckpointSaved {
        /// Position stored in the checkpoint
        position: Position,
    },

    /// Checkpoint or output write failed
    PersistenceFailed {
        /// Failure description
        message: String,
    },

    /// The failure policy was consulted
    Escalated {
        /// Where the failure happened
        position: Position,
        /// Why the policy was consulted
        reason: FailureReason,
        /// The decision that was applied
        choice: FailureChoice,
    },

    /// Partition finished
    PartitionFinished {
        /// Partition key
        partition: i32,
        /// Records written for this partition during this run
        records: u64,
        /// Whether the operator abandoned it before the last page
        abandoned: bool,
    },
}

/// How a session run ended
#[derive(Clone, Debug, PartialEq)]
pub enum RunOutcome {
    /// Every partition finished; the checkpoint was removed
    Completed {
        /// Final counters
        stats: SessionStats,
    },
    /// The failure policy chose to abort; the checkpoint was kept
    Aborted {
        /// Where the next run resumes
        position: Position,
        /// Final counters
        stats: SessionStats,
    },
    /// A termination signal arrived; a best-effort checkpoint was written
    Interrupted {
        /// Where the next run resumes, if any page had been reached
        position: Option<Position>,
        /// Final counters
        stats: SessionStats,
    },
}

impl RunOutcome {
    /// Counters at the end of the run
    pub fn stats(&self) -> &SessionStats {
        match self {
            RunOutcome::Completed { stats }
            | RunOutcome::Aborted { stats, .. }
            | RunOutcome::Interrupted { stats, .. } => stats,
        }
    }

    /// Whether the run finished every partition
    pub fn is_complete(&self) -> bool {
        matches!(self, RunOutcome::Completed { .. })
    }
}
