//! Extraction session
//!
//! [`ExtractionSession`] wires the fetch client, pagination, dedup index,
//! output sink, checkpoint store and failure policy together. It walks the
//! configured partitions in ascending order, page by page, and persists the
//! position after every page so an interrupted run resumes where it stopped.

use std::future::Future;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::client::ApiClient;
use crate::config::Config;
use crate::dedup::DedupIndex;
use crate::error::{FetchError, PersistenceError, Result};
use crate::output::OutputSink;
use crate::pagination::{EmptyPageOutcome, PartitionCursor, PartitionPlan, plan_partition};
use crate::policy::{FailureChoice, FailureContext, FailurePolicy};
use crate::transform;
use crate::types::{
    CatalogRecord, DiscoverPage, Event, FailureReason, Position, RecordId, RunOutcome,
    SessionStats,
};

/// Capacity of the event channel
const EVENT_CAPACITY: usize = 1000;

/// How one partition ended
enum PartitionEnd {
    Finished,
    Aborted(Position),
}

/// One extraction run over all configured partitions
pub struct ExtractionSession {
    config: Config,
    client: ApiClient,
    store: CheckpointStore,
    policy: Box<dyn FailurePolicy>,
    index: DedupIndex,
    stats: SessionStats,
    event_tx: broadcast::Sender<Event>,
    /// Next page to fetch, as last known
    last_position: Option<Position>,
}

impl ExtractionSession {
    /// Create a session
    ///
    /// Validates the configuration and builds the HTTP client. No file or
    /// network access happens until [`run`](Self::run).
    ///
    /// # Errors
    /// Returns error if the configuration is invalid
    pub fn new(mut config: Config, policy: Box<dyn FailurePolicy>) -> Result<Self> {
        config.validate()?;

        let partitions = &mut config.extraction.partitions;
        partitions.sort_unstable();
        partitions.dedup();

        let client = ApiClient::new(&config)?;
        let store = CheckpointStore::new(config.extraction.checkpoint_path.clone());
        let (event_tx, _rx) = broadcast::channel(EVENT_CAPACITY);

        Ok(Self {
            config,
            client,
            store,
            policy,
            index: DedupIndex::new(),
            stats: SessionStats::default(),
            event_tx,
            last_position: None,
        })
    }

    /// Subscribe to session events
    ///
    /// Events are dropped when nobody is subscribed.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// The effective configuration (partitions sorted and deduplicated)
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Current counters
    pub fn stats(&self) -> SessionStats {
        let mut stats = self.stats.clone();
        stats.failed_requests = self.client.failed_requests();
        stats
    }

    /// Next page to fetch, as last known
    pub fn last_position(&self) -> Option<Position> {
        self.last_position
    }

    /// Run until `shutdown` resolves or the extraction ends
    ///
    /// On shutdown the in-flight work is dropped and the checkpoint is
    /// written at the last known position.
    ///
    /// # Errors
    /// Same as [`run`](Self::run)
    pub async fn run_until<S>(&mut self, shutdown: S) -> Result<RunOutcome>
    where
        S: Future<Output = ()>,
    {
        {
            let run = self.run();
            tokio::pin!(run);
            tokio::select! {
                result = &mut run => return result,
                _ = shutdown => {}
            }
        }

        tracing::warn!(position = ?self.last_position, "Extraction interrupted");
        if let Some(position) = self.last_position {
            self.persist(position).await;
        }
        Ok(RunOutcome::Interrupted {
            position: self.last_position,
            stats: self.stats(),
        })
    }

    /// Run the extraction over every configured partition
    ///
    /// # Errors
    /// Returns [`Error::Authentication`](crate::Error::Authentication) as soon
    /// as the upstream rejects the credential (the checkpoint is left
    /// untouched), or an error if the checkpoint or output file cannot be
    /// opened.
    pub async fn run(&mut self) -> Result<RunOutcome> {
        if let Some(probe_id) = self.config.api.probe_id {
            self.verify_credentials(RecordId(probe_id)).await?;
        }

        let checkpoint = self.store.load().await?;
        let output_path = self.config.extraction.output_path.clone();
        self.index.seed_from_output(&output_path)?;
        self.index.extend(checkpoint.extracted_ids.iter().copied());
        self.stats.total_records = self.index.len() as u64;

        let mut sink = OutputSink::open(&output_path)?;

        tracing::info!(
            partitions = ?self.config.extraction.partitions,
            known_records = self.stats.total_records,
            resume = ?checkpoint.position(),
            "Starting extraction"
        );

        let partitions = self.config.extraction.partitions.clone();
        for partition in partitions {
            let start_page = match plan_partition(partition, &checkpoint) {
                PartitionPlan::Skip => {
                    tracing::info!(partition, "Skipping partition (already completed)");
                    self.emit(Event::PartitionSkipped { partition });
                    continue;
                }
                PartitionPlan::StartAt(page) => page,
            };

            match self.run_partition(partition, start_page, &mut sink).await? {
                PartitionEnd::Finished => {}
                PartitionEnd::Aborted(position) => {
                    tracing::warn!(position = %position, "Extraction aborted, checkpoint kept");
                    return Ok(RunOutcome::Aborted {
                        position,
                        stats: self.stats(),
                    });
                }
            }
        }

        if let Err(e) = self.store.clear().await {
            self.persistence_failed(&e);
        }

        let stats = self.stats();
        tracing::info!(
            total_records = stats.total_records,
            records_written = stats.records_written,
            failed_requests = stats.failed_requests,
            skipped_items = stats.skipped_items,
            output = %output_path.display(),
            "Extraction complete"
        );
        Ok(RunOutcome::Completed { stats })
    }

    async fn verify_credentials(&mut self, probe_id: RecordId) -> Result<()> {
        match self.client.verify_credentials(probe_id).await {
            Ok(()) => {
                tracing::info!("Credential check passed");
                Ok(())
            }
            Err(e) if e.is_authentication() => {
                tracing::error!(error = %e, "Credential check failed");
                Err(e.into())
            }
            Err(e) => {
                // the probe entity may be gone; only an auth failure is conclusive
                tracing::warn!(error = %e, "Credential check inconclusive, continuing");
                Ok(())
            }
        }
    }

    async fn run_partition(
        &mut self,
        partition: i32,
        start_page: u32,
        sink: &mut OutputSink,
    ) -> Result<PartitionEnd> {
        let extraction = &self.config.extraction;
        let mut cursor = PartitionCursor::new(
            partition,
            start_page,
            extraction.max_pages,
            extraction.empty_page_threshold,
        );
        let page_settle = self.config.pacing.page_settle;
        let empty_page_settle = self.config.pacing.empty_page_settle;

        if start_page > 1 {
            tracing::info!(partition, start_page, "Resuming partition");
        } else {
            tracing::info!(partition, "Processing partition");
        }
        self.emit(Event::PartitionStarted {
            partition,
            start_page,
        });

        let mut partition_records = 0u64;
        let mut abandoned = false;

        while cursor.next_page().is_some() {
            let Some(position) = cursor.position() else {
                break;
            };
            let page = position.page;
            self.last_position = Some(position);

            let listing = match self.client.discover(partition, page).await {
                Ok(listing) => listing,
                Err(e) => {
                    let reason = FailureReason::PageFetchFailed {
                        message: self.page_failure(e)?,
                    };
                    match self.escalate(position, reason).await {
                        FailureChoice::AbandonPartition => {
                            self.persist(position).await;
                            cursor.abandon();
                            abandoned = true;
                        }
                        // same page again; the empty-page streak carries over
                        FailureChoice::RetryPage => {}
                        FailureChoice::AbortSession => {
                            self.persist(position).await;
                            return Ok(PartitionEnd::Aborted(position));
                        }
                        FailureChoice::ContinueNextPage => {
                            cursor.advance();
                            self.persist_next(position).await;
                        }
                    }
                    continue;
                }
            };

            let total_pages = cursor.record_total(listing.total_pages);

            if listing.results.is_empty() {
                let outcome = cursor.page_was_empty();
                let streak = cursor.empty_streak();
                tracing::warn!(partition, page, total_pages, streak, "Page has no results");
                self.emit(Event::EmptyPage {
                    partition,
                    page,
                    streak,
                });

                if let EmptyPageOutcome::Escalate { streak } = outcome {
                    let reason = FailureReason::EmptyPages { streak };
                    match self.escalate(position, reason).await {
                        FailureChoice::AbandonPartition => {
                            self.persist(position).await;
                            cursor.abandon();
                            abandoned = true;
                            continue;
                        }
                        FailureChoice::RetryPage => {
                            cursor.retry_after_empty();
                            continue;
                        }
                        FailureChoice::AbortSession => {
                            self.persist(position).await;
                            return Ok(PartitionEnd::Aborted(position));
                        }
                        FailureChoice::ContinueNextPage => {}
                    }
                }

                cursor.advance();
                self.persist_next(position).await;
                settle(empty_page_settle).await;
                continue;
            }

            cursor.page_had_results();
            let written = self
                .ingest_page(position, total_pages, &listing, sink, &mut partition_records)
                .await?;
            if written == 0 {
                tracing::debug!(partition, page, "No new records on this page");
            }

            cursor.advance();
            self.persist_next(position).await;
            settle(page_settle).await;
        }

        tracing::info!(
            partition,
            records = partition_records,
            total_records = self.stats.total_records,
            abandoned,
            "Partition finished"
        );
        self.emit(Event::PartitionFinished {
            partition,
            records: partition_records,
            abandoned,
        });
        Ok(PartitionEnd::Finished)
    }

    /// Fetch, transform and write every new item on a page
    ///
    /// Returns the number of records written.
    async fn ingest_page(
        &mut self,
        position: Position,
        total_pages: u32,
        listing: &DiscoverPage,
        sink: &mut OutputSink,
        partition_records: &mut u64,
    ) -> Result<u64> {
        let mut candidates: Vec<(RecordId, &str)> = Vec::new();
        for item in &listing.results {
            let Some(id) = item.id.filter(|id| id.get() != 0) else {
                continue;
            };
            if self.index.contains(id) || candidates.iter().any(|(seen, _)| *seen == id) {
                continue;
            }
            candidates.push((id, item.title.as_deref().unwrap_or("Unknown")));
        }

        tracing::info!(
            partition = position.partition,
            page = position.page,
            total_pages,
            items = listing.results.len(),
            new_items = candidates.len(),
            "Fetched page"
        );
        self.emit(Event::PageFetched {
            partition: position.partition,
            page: position.page,
            total_pages,
            items: listing.results.len(),
            new_items: candidates.len(),
        });

        let cast_limit = self.config.extraction.cast_limit;
        let mut written = 0;
        for (id, title) in candidates {
            let details = match self.client.details(id, title).await {
                Ok(details) => details,
                Err(e) if e.is_authentication() => return Err(e.into()),
                Err(e) => {
                    self.item_failed(id, e.to_string());
                    continue;
                }
            };

            let Some(record) = transform::to_record_with_cast_limit(Some(&details), cast_limit)
            else {
                self.item_failed(id, "detail payload could not be transformed".to_string());
                continue;
            };

            if self.store_record(record, sink, *partition_records) {
                *partition_records += 1;
                written += 1;
            }
        }
        Ok(written)
    }

    /// Write one record; returns whether it reached the output
    fn store_record(
        &mut self,
        record: CatalogRecord,
        sink: &mut OutputSink,
        partition_records: u64,
    ) -> bool {
        if let Err(e) = sink.write(&record) {
            self.persistence_failed(&e);
            return false;
        }

        self.index.insert(record.id);
        self.stats.records_written += 1;
        self.stats.total_records += 1;
        tracing::debug!(id = %record.id, title = %record.title, "Record written");
        self.emit(Event::RecordWritten {
            id: record.id,
            title: record.title,
        });

        let interval = self.config.extraction.progress_interval;
        if interval > 0 && self.stats.total_records % interval == 0 {
            tracing::info!(
                total_records = self.stats.total_records,
                partition_records = partition_records + 1,
                "Extraction progress"
            );
            self.emit(Event::Milestone {
                total_records: self.stats.total_records,
                partition_records: partition_records + 1,
            });
        }
        true
    }

    /// Classify a failed page fetch
    ///
    /// Authentication failures end the session; anything else becomes the
    /// message handed to the failure policy.
    fn page_failure(&mut self, error: FetchError) -> Result<String> {
        if error.is_authentication() {
            tracing::error!(error = %error, "Credential rejected, stopping");
            return Err(error.into());
        }
        tracing::error!(error = %error, "Page fetch failed");
        Ok(error.to_string())
    }

    fn item_failed(&mut self, id: RecordId, reason: String) {
        self.stats.skipped_items += 1;
        tracing::warn!(id = %id, reason = %reason, "Skipping item");
        self.emit(Event::ItemFailed { id, reason });
    }

    async fn escalate(&mut self, position: Position, reason: FailureReason) -> FailureChoice {
        let context = FailureContext {
            position,
            reason: reason.clone(),
            stats: self.stats(),
        };
        let choice = self.policy.decide(&context).await;
        tracing::info!(
            position = %position,
            reason = %reason,
            choice = %choice,
            policy = self.policy.name(),
            "Failure policy decided"
        );
        self.emit(Event::Escalated {
            position,
            reason,
            choice,
        });
        choice
    }

    /// Persist the page after `position` as the next one to fetch
    async fn persist_next(&mut self, position: Position) {
        let next = Position {
            partition: position.partition,
            page: position.page.saturating_add(1),
        };
        self.last_position = Some(next);
        self.persist(next).await;
    }

    async fn persist(&mut self, position: Position) {
        let checkpoint = Checkpoint::at(position, self.stats.total_records, self.index.sorted_ids());
        match self.store.save(&checkpoint).await {
            Ok(()) => self.emit(Event::CheckpointSaved { position }),
            Err(e) => self.persistence_failed(&e),
        }
    }

    fn persistence_failed(&mut self, error: &PersistenceError) {
        self.stats.persistence_failures += 1;
        tracing::error!(error = %error, "Persistence failure, continuing");
        self.emit(Event::PersistenceFailed {
            message: error.to_string(),
        });
    }

    fn emit(&self, event: Event) {
        // no receivers is fine
        self.event_tx.send(event).ok();
    }
}

impl std::fmt::Debug for ExtractionSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractionSession")
            .field("partitions", &self.config.extraction.partitions)
            .field("policy", &self.policy.name())
            .field("stats", &self.stats)
            .field("last_position", &self.last_position)
            .finish_non_exhaustive()
    }
}

async fn settle(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}
