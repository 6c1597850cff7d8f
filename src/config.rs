//! Configuration types for catalog-harvest
//!
//! Every field has a default, so an empty JSON object (`{}`) is a valid
//! configuration apart from the API key, which must be supplied either in the
//! file or on the command line.

use crate::error::{Error, Result};
use crate::policy::FailureChoice;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Upstream API settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL all endpoints are joined onto (default: "https://api.themoviedb.org/3")
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Static bearer credential sent with every request
    #[serde(default)]
    pub api_key: String,

    /// Per-request timeout (default: 15 seconds)
    #[serde(default = "default_request_timeout", with = "duration_ms_serde")]
    pub timeout: Duration,

    /// User-Agent header value
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Entity fetched once at startup to validate the credential (None = skip the probe)
    #[serde(default = "default_probe_id")]
    pub probe_id: Option<u64>,

    /// Sort order passed to the discover endpoint (default: "popularity.desc")
    #[serde(default = "default_sort_by")]
    pub sort_by: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: String::new(),
            timeout: default_request_timeout(),
            user_agent: default_user_agent(),
            probe_id: default_probe_id(),
            sort_by: default_sort_by(),
        }
    }
}

/// Request pacing and settle delays
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PacingConfig {
    /// Minimum gap between two consecutive requests (default: 300 ms)
    #[serde(default = "default_request_interval", with = "duration_ms_serde")]
    pub request_interval: Duration,

    /// Pause after a page has been fully consumed (default: 500 ms)
    #[serde(default = "default_page_settle", with = "duration_ms_serde")]
    pub page_settle: Duration,

    /// Pause after a page came back empty (default: 1 second)
    #[serde(default = "default_empty_page_settle", with = "duration_ms_serde")]
    pub empty_page_settle: Duration,

    /// Cooldown after an HTTP 429 response (default: 10 seconds)
    #[serde(default = "default_rate_limit_cooldown", with = "duration_ms_serde")]
    pub rate_limit_cooldown: Duration,

    /// Consecutive 429 cooldowns tolerated for one call before giving up (default: 30)
    #[serde(default = "default_max_rate_limit_waits")]
    pub max_rate_limit_waits: u32,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            request_interval: default_request_interval(),
            page_settle: default_page_settle(),
            empty_page_settle: default_empty_page_settle(),
            rate_limit_cooldown: default_rate_limit_cooldown(),
            max_rate_limit_waits: default_max_rate_limit_waits(),
        }
    }
}

/// Automatic retry settings for a single API call
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per call, first try included (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Fixed delay between attempts (default: 2 seconds)
    #[serde(default = "default_backoff", with = "duration_ms_serde")]
    pub backoff: Duration,

    /// Add random jitter to the backoff (default: false)
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff: default_backoff(),
            jitter: false,
        }
    }
}

/// What to extract and where to keep it
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Release years to walk, in order (default: 2020 through 2025)
    #[serde(default = "default_partitions")]
    pub partitions: Vec<i32>,

    /// Ceiling applied to the page count the API reports (default: 500)
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,

    /// Consecutive empty pages before asking the failure policy (default: 3)
    #[serde(default = "default_empty_page_threshold")]
    pub empty_page_threshold: u32,

    /// Number of cast members kept per record (default: 10)
    #[serde(default = "default_cast_limit")]
    pub cast_limit: usize,

    /// Emit a progress milestone every N records (default: 100)
    #[serde(default = "default_progress_interval")]
    pub progress_interval: u64,

    /// Output CSV path (default: "tmdb_movies.csv")
    #[serde(default = "default_output_path")]
    pub output_path: PathBuf,

    /// Checkpoint document path (default: "tmdb_extraction_progress.json")
    #[serde(default = "default_checkpoint_path")]
    pub checkpoint_path: PathBuf,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            partitions: default_partitions(),
            max_pages: default_max_pages(),
            empty_page_threshold: default_empty_page_threshold(),
            cast_limit: default_cast_limit(),
            progress_interval: default_progress_interval(),
            output_path: default_output_path(),
            checkpoint_path: default_checkpoint_path(),
        }
    }
}

/// How page-level failures are resolved once automatic retries are spent
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicyMode {
    /// Ask the operator on the console (default)
    #[default]
    Prompt,
    /// Always abandon the current partition
    Abandon,
    /// Always abort the session, keeping the checkpoint
    Abort,
    /// Always skip the failing page and carry on
    Continue,
}

impl FailurePolicyMode {
    /// The fixed choice for unattended modes, `None` for [`FailurePolicyMode::Prompt`]
    pub fn fixed_choice(self) -> Option<FailureChoice> {
        match self {
            FailurePolicyMode::Prompt => None,
            FailurePolicyMode::Abandon => Some(FailureChoice::AbandonPartition),
            FailurePolicyMode::Abort => Some(FailureChoice::AbortSession),
            FailurePolicyMode::Continue => Some(FailureChoice::ContinueNextPage),
        }
    }
}

/// Main configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Upstream API settings
    #[serde(default)]
    pub api: ApiConfig,

    /// Pacing and cooldowns
    #[serde(default)]
    pub pacing: PacingConfig,

    /// Automatic retries
    #[serde(default)]
    pub retry: RetryConfig,

    /// Partitions, limits and file locations
    #[serde(default)]
    pub extraction: ExtractionConfig,

    /// Failure escalation strategy
    #[serde(default)]
    pub failure_policy: FailurePolicyMode,
}

impl Config {
    /// Load a configuration from a JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::Config {
            message: format!("cannot read {}: {}", path.display(), e),
            key: None,
        })?;
        serde_json::from_str(&text).map_err(|e| Error::Config {
            message: format!("invalid config {}: {}", path.display(), e),
            key: None,
        })
    }

    /// Reject settings the session cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.api.api_key.trim().is_empty() {
            return Err(Error::config(
                "an API key is required (config file or TMDB_API_KEY)",
                "api.api_key",
            ));
        }
        if url::Url::parse(&self.api.base_url).is_err() {
            return Err(Error::config(
                format!("'{}' is not a valid URL", self.api.base_url),
                "api.base_url",
            ));
        }
        if self.extraction.partitions.is_empty() {
            return Err(Error::config(
                "at least one partition is required",
                "extraction.partitions",
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::config(
                "must allow at least one attempt",
                "retry.max_attempts",
            ));
        }
        if self.extraction.max_pages == 0 {
            return Err(Error::config("must be at least 1", "extraction.max_pages"));
        }
        if self.extraction.empty_page_threshold == 0 {
            return Err(Error::config(
                "must be at least 1",
                "extraction.empty_page_threshold",
            ));
        }
        Ok(())
    }
}

fn default_base_url() -> String {
    "https://api.themoviedb.org/3".to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(15)
}

fn default_user_agent() -> String {
    concat!("catalog-harvest/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_probe_id() -> Option<u64> {
    Some(550)
}

fn default_sort_by() -> String {
    "popularity.desc".to_string()
}

fn default_request_interval() -> Duration {
    Duration::from_millis(300)
}

fn default_page_settle() -> Duration {
    Duration::from_millis(500)
}

fn default_empty_page_settle() -> Duration {
    Duration::from_secs(1)
}

fn default_rate_limit_cooldown() -> Duration {
    Duration::from_secs(10)
}

fn default_max_rate_limit_waits() -> u32 {
    30
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff() -> Duration {
    Duration::from_secs(2)
}

fn default_partitions() -> Vec<i32> {
    (2020..=2025).collect()
}

fn default_max_pages() -> u32 {
    500
}

fn default_empty_page_threshold() -> u32 {
    3
}

fn default_cast_limit() -> usize {
    10
}

fn default_progress_interval() -> u64 {
    100
}

fn default_output_path() -> PathBuf {
    PathBuf::from("tmdb_movies.csv")
}

fn default_checkpoint_path() -> PathBuf {
    PathBuf::from("tmdb_extraction_progress.json")
}

// Durations are stored as whole milliseconds; pacing intervals are sub-second.
mod duration_ms_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
