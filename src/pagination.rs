//! Per-partition page iteration
//!
//! A partition moves through `NotStarted -> InProgress -> Exhausted`. The
//! total page count is only known once a page has been fetched successfully;
//! until then the cursor keeps going. A failed fetch never moves the cursor,
//! only the failure policy does.

use crate::checkpoint::Checkpoint;
use crate::types::Position;

/// What to do with a partition given the saved checkpoint
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PartitionPlan {
    /// Partition was finished in a previous run
    Skip,
    /// Start (or resume) at this page
    StartAt(u32),
}

/// Decide how a partition relates to the checkpoint
///
/// Partitions before the checkpoint's are skipped, the checkpoint's own
/// partition resumes at the saved page, later ones start at page 1.
pub fn plan_partition(key: i32, checkpoint: &Checkpoint) -> PartitionPlan {
    match checkpoint.position() {
        Some(saved) if key < saved.partition => PartitionPlan::Skip,
        Some(saved) if key == saved.partition => PartitionPlan::StartAt(saved.page),
        _ => PartitionPlan::StartAt(1),
    }
}

/// Where a cursor stands
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CursorState {
    /// No page requested yet
    NotStarted {
        /// First page that will be requested
        start_page: u32,
    },
    /// Iterating
    InProgress {
        /// Next page to fetch
        page: u32,
        /// Clamped total, once a response has reported it
        total_pages: Option<u32>,
    },
    /// No more pages for this partition
    Exhausted,
}

/// Outcome of recording an empty page
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EmptyPageOutcome {
    /// Streak is below the threshold; move on
    Continue {
        /// Current streak length
        streak: u32,
    },
    /// Streak reached the threshold; ask the failure policy
    Escalate {
        /// Current streak length
        streak: u32,
    },
}

/// Page cursor for one partition
#[derive(Clone, Debug)]
pub struct PartitionCursor {
    partition: i32,
    state: CursorState,
    max_pages: u32,
    empty_threshold: u32,
    empty_streak: u32,
}

impl PartitionCursor {
    /// Cursor starting at `start_page`, never going past `max_pages`
    pub fn new(partition: i32, start_page: u32, max_pages: u32, empty_threshold: u32) -> Self {
        Self {
            partition,
            state: CursorState::NotStarted {
                start_page: start_page.max(1),
            },
            max_pages,
            empty_threshold: empty_threshold.max(1),
            empty_streak: 0,
        }
    }

    /// Next page to fetch, or `None` once the partition is exhausted
    pub fn next_page(&mut self) -> Option<u32> {
        if let CursorState::NotStarted { start_page } = self.state {
            self.state = if start_page > self.max_pages {
                CursorState::Exhausted
            } else {
                CursorState::InProgress {
                    page: start_page,
                    total_pages: None,
                }
            };
        }
        match self.state {
            CursorState::InProgress { page, .. } => Some(page),
            _ => None,
        }
    }

    /// Position of the next page to fetch
    ///
    /// For an exhausted cursor there is no position; callers persist the
    /// last position they saw instead.
    pub fn position(&self) -> Option<Position> {
        let page = match self.state {
            CursorState::NotStarted { start_page } => start_page,
            CursorState::InProgress { page, .. } => page,
            CursorState::Exhausted => return None,
        };
        Some(Position {
            partition: self.partition,
            page,
        })
    }

    /// Clamped total page count, if known
    pub fn total_pages(&self) -> Option<u32> {
        match self.state {
            CursorState::InProgress { total_pages, .. } => total_pages,
            _ => None,
        }
    }

    /// Record the total reported by a successful response
    ///
    /// Returns the clamped value.
    pub fn record_total(&mut self, reported: u32) -> u32 {
        let clamped = reported.min(self.max_pages);
        if let CursorState::InProgress { total_pages, .. } = &mut self.state {
            *total_pages = Some(clamped);
        }
        clamped
    }

    /// Current page had results
    pub fn page_had_results(&mut self) {
        self.empty_streak = 0;
    }

    /// Current page had no results
    pub fn page_was_empty(&mut self) -> EmptyPageOutcome {
        self.empty_streak += 1;
        if self.empty_streak >= self.empty_threshold {
            EmptyPageOutcome::Escalate {
                streak: self.empty_streak,
            }
        } else {
            EmptyPageOutcome::Continue {
                streak: self.empty_streak,
            }
        }
    }

    /// Length of the current empty-page streak
    pub fn empty_streak(&self) -> u32 {
        self.empty_streak
    }

    /// Move to the next page, exhausting the cursor past the last page
    pub fn advance(&mut self) {
        if let CursorState::InProgress { page, total_pages } = self.state {
            let next = page.saturating_add(1);
            let last = total_pages.unwrap_or(self.max_pages).min(self.max_pages);
            self.state = if next > last {
                CursorState::Exhausted
            } else {
                CursorState::InProgress {
                    page: next,
                    total_pages,
                }
            };
        }
    }

    /// Fetch the same page again after an empty-page escalation
    ///
    /// Only the streak is cleared. A retry after a failed fetch needs no
    /// call at all: the cursor has not moved and the streak still counts.
    pub fn retry_after_empty(&mut self) {
        self.empty_streak = 0;
    }

    /// Give up on the rest of the partition
    pub fn abandon(&mut self) {
        self.state = CursorState::Exhausted;
    }

    /// Whether the partition has no more pages
    pub fn is_exhausted(&self) -> bool {
        self.state == CursorState::Exhausted
    }
}
