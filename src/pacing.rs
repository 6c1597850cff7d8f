//! Fixed-interval request pacing
//!
//! The upstream quota is expressed as requests per time window, so the client
//! keeps a minimum gap between the start of two consecutive requests. The gap
//! is fixed; the pacer does not adapt to response times or to 429s (those are
//! handled by the retry cooldown).

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Sentinel for "no request has been made yet"
const NEVER: u64 = u64::MAX;

/// Enforces a minimum interval between consecutive requests
///
/// Cloning is cheap and clones share the same schedule, so a handle can be
/// moved into each retry attempt.
///
/// # Examples
///
/// ```
/// use catalog_harvest::pacing::RequestPacer;
/// use std::time::Duration;
///
/// # #[tokio::main]
/// # async fn main() {
/// let pacer = RequestPacer::new(Duration::from_millis(5));
/// pacer.wait().await; // first request goes out immediately
/// pacer.wait().await; // second waits ~5ms
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct RequestPacer {
    interval: Duration,
    /// Reference point for `last_request`
    origin: Instant,
    /// Start of the last request, nanoseconds since `origin`
    last_request: Arc<AtomicU64>,
}

impl RequestPacer {
    /// Create a pacer with the given minimum interval (zero disables pacing)
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            origin: Instant::now(),
            last_request: Arc::new(AtomicU64::new(NEVER)),
        }
    }

    /// The configured interval
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Time left before the next request may start
    pub fn remaining(&self) -> Duration {
        let last = self.last_request.load(Ordering::SeqCst);
        if last == NEVER {
            return Duration::ZERO;
        }
        let since_last = self.elapsed_nanos().saturating_sub(last);
        self.interval
            .saturating_sub(Duration::from_nanos(since_last))
    }

    /// Wait until the next request may start, then mark it as started
    pub async fn wait(&self) {
        let remaining = self.remaining();
        if !remaining.is_zero() {
            tokio::time::sleep(remaining).await;
        }
        self.last_request
            .store(self.elapsed_nanos(), Ordering::SeqCst);
    }

    fn elapsed_nanos(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_nanos()).unwrap_or(NEVER - 1)
    }
}
