//! # catalog-harvest
//!
//! Resumable, rate-limited extraction of a paginated movie catalog into CSV.
//!
//! ## Design Philosophy
//!
//! catalog-harvest is designed to be:
//! - **Resumable** - Progress is checkpointed after every page; rerunning picks up where the last run stopped
//! - **Idempotent** - A record is never written twice, across any number of runs
//! - **Polite** - Requests are paced and 429 responses are waited out
//! - **Event-driven** - Consumers subscribe to progress events, no polling required
//!
//! ## Quick Start
//!
//! ```no_run
//! use catalog_harvest::{Config, ExtractionSession, FailureChoice, FixedPolicy};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = Config::default();
//!     config.api.api_key = std::env::var("TMDB_API_KEY")?;
//!     config.extraction.partitions = vec![2023, 2024];
//!
//!     let policy = FixedPolicy::new(FailureChoice::AbandonPartition);
//!     let mut session = ExtractionSession::new(config, Box::new(policy))?;
//!
//!     // Subscribe to events
//!     let mut events = session.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let outcome = session.run_until(catalog_harvest::shutdown_signal()).await?;
//!     println!("{:?}", outcome.stats());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Checkpoint persistence
pub mod checkpoint;
/// HTTP client for the catalog API
pub mod client;
/// Configuration types
pub mod config;
/// Identifier deduplication
pub mod dedup;
/// Error types
pub mod error;
/// CSV output
pub mod output;
/// Request pacing
pub mod pacing;
/// Per-partition page iteration
pub mod pagination;
/// Operator escalation
pub mod policy;
/// Retry logic with fixed backoff and rate-limit cooldown
pub mod retry;
/// Extraction session
pub mod session;
/// Detail payload to output row mapping
pub mod transform;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use checkpoint::{Checkpoint, CheckpointStore};
pub use client::ApiClient;
pub use config::{Config, FailurePolicyMode};
pub use error::{Error, FetchError, PersistenceError, Result};
pub use policy::{ConsolePolicy, FailureChoice, FailureContext, FailurePolicy, FixedPolicy};
pub use session::ExtractionSession;
pub use types::{
    CatalogRecord, Event, FailureReason, Position, RecordId, RunOutcome, SessionStats,
};

/// Resolves once the process is asked to stop
///
/// Pass it to [`ExtractionSession::run_until`] so an interrupted run writes
/// its checkpoint before exiting. On Unix both SIGINT and SIGTERM count;
/// elsewhere only Ctrl+C does.
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = terminate.recv() => tracing::info!("Stop requested (SIGTERM)"),
                    _ = interrupt() => {}
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM unavailable, stopping on Ctrl+C only");
                interrupt().await;
            }
        }
    }

    #[cfg(not(unix))]
    interrupt().await;
}

/// Ctrl+C, or never if the handler cannot be installed
async fn interrupt() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Stop requested (Ctrl+C)"),
        Err(e) => {
            tracing::error!(error = %e, "Cannot listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    }
}
