//! Operator escalation once automatic remediation is spent
//!
//! The session consults a [`FailurePolicy`] when a page cannot be fetched after
//! all retries, or when too many empty pages arrive in a row. Two
//! implementations are provided:
//!
//! - [`ConsolePolicy`]: prints the situation and blocks on a 1–4 answer
//! - [`FixedPolicy`]: always returns the same answer, for unattended runs
//!
//! This is the only place in the crate that waits on a human.

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::types::{FailureReason, Position, SessionStats};

/// The four ways a page-level failure can be resolved
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureChoice {
    /// 1. Save the checkpoint here and move on to the next partition
    AbandonPartition,
    /// 2. Fetch the same page again
    RetryPage,
    /// 3. Save the checkpoint and stop; the next run resumes here
    AbortSession,
    /// 4. Skip this page and keep going, accepting a possible gap
    ContinueNextPage,
}

impl FailureChoice {
    /// Parse the operator's 1–4 answer
    pub fn from_answer(answer: &str) -> Option<Self> {
        match answer.trim() {
            "1" => Some(FailureChoice::AbandonPartition),
            "2" => Some(FailureChoice::RetryPage),
            "3" => Some(FailureChoice::AbortSession),
            "4" => Some(FailureChoice::ContinueNextPage),
            _ => None,
        }
    }
}

impl std::fmt::Display for FailureChoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            FailureChoice::AbandonPartition => "abandon partition",
            FailureChoice::RetryPage => "retry page",
            FailureChoice::AbortSession => "abort session",
            FailureChoice::ContinueNextPage => "continue with next page",
        };
        f.write_str(label)
    }
}

/// Everything the policy gets to see when asked for a decision
#[derive(Clone, Debug)]
pub struct FailureContext {
    /// Partition and page where the failure happened
    pub position: Position,
    /// What went wrong
    pub reason: FailureReason,
    /// Counters at the time of the failure
    pub stats: SessionStats,
}

/// Strategy for resolving page-level failures
#[async_trait]
pub trait FailurePolicy: Send {
    /// Pick one of the four choices for the failure described by `context`
    async fn decide(&mut self, context: &FailureContext) -> FailureChoice;

    /// Human-readable name for logging
    fn name(&self) -> &'static str;
}

/// Policy that always answers with the same choice
#[derive(Clone, Copy, Debug)]
pub struct FixedPolicy {
    choice: FailureChoice,
}

impl FixedPolicy {
    /// Create a policy that always returns `choice`
    pub fn new(choice: FailureChoice) -> Self {
        Self { choice }
    }
}

#[async_trait]
impl FailurePolicy for FixedPolicy {
    async fn decide(&mut self, context: &FailureContext) -> FailureChoice {
        tracing::warn!(
            position = %context.position,
            reason = %context.reason,
            choice = %self.choice,
            "Applying fixed failure policy"
        );
        self.choice
    }

    fn name(&self) -> &'static str {
        "fixed"
    }
}

/// Policy that asks an operator
///
/// Invalid answers are re-prompted. End of input or a read error is treated
/// as [`FailureChoice::AbortSession`] so the checkpoint survives.
pub struct ConsolePolicy<R, W> {
    reader: R,
    writer: W,
}

impl ConsolePolicy<BufReader<tokio::io::Stdin>, tokio::io::Stdout> {
    /// Prompt on the process's stdin/stdout
    pub fn stdio() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
    }
}

impl<R, W> ConsolePolicy<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    /// Prompt on an arbitrary reader/writer pair
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }

    /// Give back the underlying reader and writer
    pub fn into_inner(self) -> (R, W) {
        (self.reader, self.writer)
    }

    async fn ask(&mut self, context: &FailureContext) -> std::io::Result<FailureChoice> {
        let banner = "!".repeat(60);
        let prompt = format!(
            "\n{banner}\n\
             ERROR OCCURRED: {reason}\n\
             Location: {position}\n\
             Records extracted so far: {total}\n\
             Failed requests: {failed}\n\
             {banner}\n\
             \nOptions:\n\
             \x20 1. Continue to next partition (skip remaining pages)\n\
             \x20 2. Retry this page\n\
             \x20 3. Stop extraction and save progress\n\
             \x20 4. Continue anyway (skip this page)\n",
            reason = context.reason,
            position = context.position,
            total = context.stats.total_records,
            failed = context.stats.failed_requests,
        );
        self.writer.write_all(prompt.as_bytes()).await?;

        loop {
            self.writer.write_all(b"\nEnter choice (1-4): ").await?;
            self.writer.flush().await?;

            let mut line = String::new();
            if self.reader.read_line(&mut line).await? == 0 {
                tracing::warn!("Operator input closed, aborting session");
                return Ok(FailureChoice::AbortSession);
            }
            match FailureChoice::from_answer(&line) {
                Some(choice) => return Ok(choice),
                None => {
                    self.writer
                        .write_all(b"Invalid choice. Please enter 1, 2, 3, or 4.\n")
                        .await?;
                }
            }
        }
    }
}

#[async_trait]
impl<R, W> FailurePolicy for ConsolePolicy<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn decide(&mut self, context: &FailureContext) -> FailureChoice {
        match self.ask(context).await {
            Ok(choice) => {
                tracing::info!(position = %context.position, choice = %choice, "Operator decision");
                choice
            }
            Err(e) => {
                tracing::error!(error = %e, "Operator console failed, aborting session");
                FailureChoice::AbortSession
            }
        }
    }

    fn name(&self) -> &'static str {
        "console"
    }
}
