//! Harvest coordinator - the resumable pagination loop
//!
//! The loop is a state machine. Every phase is handled by its own transition
//! method that performs the phase's side effects and returns the next [`Step`]:
//!
//! ```text
//! Init -> Fetching -> (Retrying -> Fetching | Normalizing)
//!      -> Ingesting -> Checkpointing -> Fetching | Done
//! ```
//!
//! A fatal upstream failure or a storage error ends the loop in the failed
//! phase and is returned to the caller. The cursor is only checkpointed after
//! the page's batch has been committed, so a crash replays at most one page,
//! and replaying a page is harmless because every write is an upsert.

use crate::config::{load_credential, Config, Credential};
use crate::crawler::fetcher::{FetchFailure, GraphqlFetcher, PageFetcher, SearchPage};
use crate::crawler::governor::{Pause, RateGovernor};
use crate::crawler::normalizer::normalize_page;
use crate::crawler::retry::{RetryController, RetryDecision};
use crate::crawler::sleeper::{ShutdownSignal, Sleeper, TokioSleeper};
use crate::state::{CrawlPhase, ProgressTracker};
use crate::storage::{CatalogEntry, RunStatus, SqliteStorage, Storage};
use crate::HarvestError;
use chrono::Utc;
use std::path::Path;
use std::time::Duration;

/// Why a harvest stopped without failing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The requested number of records has been ingested
    TargetReached,
    /// The upstream reported no further pages
    Exhausted,
    /// A page produced no usable records
    EmptyPage,
    /// An external stop was requested
    Shutdown,
}

/// One state of the harvest loop, carrying the data the next transition needs
#[derive(Debug)]
pub enum Step {
    Init,
    Fetching,
    Retrying {
        failure: FetchFailure,
        delay: Duration,
    },
    Normalizing(SearchPage),
    Ingesting {
        entries: Vec<CatalogEntry>,
        next_cursor: Option<String>,
        has_next: bool,
    },
    Checkpointing {
        next_cursor: Option<String>,
        has_next: bool,
    },
    Done(StopReason),
}

impl Step {
    pub fn phase(&self) -> CrawlPhase {
        match self {
            Self::Init => CrawlPhase::Init,
            Self::Fetching => CrawlPhase::Fetching,
            Self::Retrying { .. } => CrawlPhase::Retrying,
            Self::Normalizing(_) => CrawlPhase::Normalizing,
            Self::Ingesting { .. } => CrawlPhase::Ingesting,
            Self::Checkpointing { .. } => CrawlPhase::Checkpointing,
            Self::Done(_) => CrawlPhase::Done,
        }
    }
}

/// Summary of a finished harvest
#[derive(Debug, Clone, PartialEq)]
pub struct HarvestOutcome {
    pub reason: StopReason,
    pub records_fetched: u64,
    pub pages: u64,
    pub commits: u64,
    pub checkpoint_writes: u64,
    pub retries: u64,
    pub rejected: u64,
    /// Match count the upstream reported with the first page of this run
    pub upstream_total: Option<u64>,
    pub elapsed: Duration,
}

/// Main harvest coordinator
pub struct Harvester<S: Storage> {
    config: Config,
    config_hash: String,
    storage: S,
    fetcher: Box<dyn PageFetcher>,
    sleeper: Box<dyn Sleeper>,
    shutdown: ShutdownSignal,
    retry: RetryController,
    governor: RateGovernor,
    progress: ProgressTracker,
    phase: CrawlPhase,
    cursor: Option<String>,
    pending_pause: Option<Duration>,
    run_id: Option<i64>,
    upstream_total: Option<u64>,
    commits: u64,
    checkpoint_writes: u64,
    retries: u64,
    rejected: u64,
}

impl Harvester<SqliteStorage> {
    /// Opens the configured database and builds the GraphQL fetcher
    ///
    /// Requires an already-resolved credential, so a harvest without one can
    /// never reach the network or the database.
    pub fn connect(config: Config, credential: Credential) -> Result<Self, HarvestError> {
        let storage = SqliteStorage::new(Path::new(&config.storage.database_path))?;
        let fetcher = GraphqlFetcher::new(
            &config.upstream,
            credential,
            config.harvest.search_query.clone(),
        )?;

        Ok(Self::new(
            config,
            storage,
            Box::new(fetcher),
            Box::new(TokioSleeper),
        ))
    }
}

impl<S: Storage> Harvester<S> {
    /// Creates a harvester from explicit collaborators
    pub fn new(
        config: Config,
        storage: S,
        fetcher: Box<dyn PageFetcher>,
        sleeper: Box<dyn Sleeper>,
    ) -> Self {
        let retry = RetryController::new(&config.retry);
        let governor = RateGovernor::new(&config.quota);
        let progress = ProgressTracker::new(config.harvest.target_count);

        Self {
            config,
            config_hash: String::new(),
            storage,
            fetcher,
            sleeper,
            shutdown: ShutdownSignal::new(),
            retry,
            governor,
            progress,
            phase: CrawlPhase::Init,
            cursor: None,
            pending_pause: None,
            run_id: None,
            upstream_total: None,
            commits: 0,
            checkpoint_writes: 0,
            retries: 0,
            rejected: 0,
        }
    }

    /// Uses an externally owned stop flag
    pub fn with_shutdown(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Records the config file hash on the harvest run
    pub fn with_config_hash(mut self, hash: impl Into<String>) -> Self {
        self.config_hash = hash.into();
        self
    }

    pub fn phase(&self) -> CrawlPhase {
        self.phase
    }

    /// Cursor of the last committed page in this run
    pub fn cursor(&self) -> Option<&str> {
        self.cursor.as_deref()
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn into_storage(self) -> S {
        self.storage
    }

    /// Runs the loop until it stops or fails
    pub async fn run(&mut self) -> Result<HarvestOutcome, HarvestError> {
        let mut step = Step::Init;

        let reason = loop {
            if let Step::Done(reason) = step {
                break reason;
            }

            self.phase = step.phase();
            tracing::trace!("Entering phase {}", self.phase);
            step = match self.advance(step).await {
                Ok(next) => next,
                Err(e) => {
                    self.phase = CrawlPhase::Failed;
                    self.finish_run(RunStatus::Failed);
                    return Err(e);
                }
            };
        };

        self.phase = CrawlPhase::Done;
        let status = if reason == StopReason::Shutdown {
            RunStatus::Interrupted
        } else {
            RunStatus::Completed
        };
        self.finish_run(status);

        let outcome = self.outcome(reason);
        let minutes = outcome.elapsed.as_secs_f64() / 60.0;
        let rate = if outcome.elapsed.as_secs_f64() > 0.0 {
            outcome.records_fetched as f64 / outcome.elapsed.as_secs_f64()
        } else {
            0.0
        };
        tracing::info!(
            "Harvest finished ({:?}): {} records in {:.2} minutes ({:.1} records/sec)",
            reason,
            outcome.records_fetched,
            minutes,
            rate
        );

        Ok(outcome)
    }

    /// Performs one transition
    pub async fn advance(&mut self, step: Step) -> Result<Step, HarvestError> {
        match step {
            Step::Init => self.init(),
            Step::Fetching => self.fetch().await,
            Step::Retrying { failure, delay } => Ok(self.retry_after(failure, delay).await),
            Step::Normalizing(page) => Ok(self.normalize(page)),
            Step::Ingesting {
                entries,
                next_cursor,
                has_next,
            } => self.ingest(entries, next_cursor, has_next),
            Step::Checkpointing {
                next_cursor,
                has_next,
            } => self.checkpoint(next_cursor, has_next),
            Step::Done(reason) => Ok(Step::Done(reason)),
        }
    }

    fn init(&mut self) -> Result<Step, HarvestError> {
        let key = &self.config.harvest.checkpoint_key;

        self.cursor = self.storage.read_checkpoint(key)?;
        self.retry.on_success();
        self.pending_pause = None;
        self.upstream_total = None;
        self.progress = ProgressTracker::new(self.config.harvest.target_count);
        self.run_id = Some(self.storage.create_run(key, &self.config_hash)?);

        match &self.cursor {
            Some(cursor) => tracing::info!("Resuming from checkpoint '{}' at {}", key, cursor),
            None => tracing::info!("No checkpoint under '{}', starting from the first page", key),
        }
        tracing::info!(
            "Starting harvest: target={}, page_size={}",
            self.config.harvest.target_count,
            self.config.harvest.effective_page_size()
        );

        Ok(Step::Fetching)
    }

    async fn fetch(&mut self) -> Result<Step, HarvestError> {
        if let Some(pause) = self.pending_pause.take() {
            if self.shutdown.is_requested() {
                return Ok(Step::Done(StopReason::Shutdown));
            }
            self.sleeper.sleep(pause).await;
        }

        if self.shutdown.is_requested() {
            return Ok(Step::Done(StopReason::Shutdown));
        }

        let page_size = self.config.harvest.effective_page_size();
        match self
            .fetcher
            .fetch_page(self.cursor.as_deref(), page_size)
            .await
        {
            Ok(page) => {
                self.retry.on_success();
                if self.upstream_total.is_none() {
                    if let Some(total) = page.total_count {
                        self.upstream_total = Some(total);
                        tracing::info!(
                            "Upstream reports {} matching repositories for '{}'",
                            total,
                            self.config.harvest.search_query
                        );
                    }
                }
                self.apply_governor(&page);
                Ok(Step::Normalizing(page))
            }
            Err(failure) => match self.retry.on_failure(&failure) {
                RetryDecision::Retry(delay) => Ok(Step::Retrying { failure, delay }),
                RetryDecision::Fatal => Err(HarvestError::Upstream(failure)),
            },
        }
    }

    fn apply_governor(&mut self, page: &SearchPage) {
        let pause = self.governor.evaluate(&page.quota, Utc::now());
        match pause {
            Pause::UntilReset(wait) => tracing::info!(
                "Rate limit low ({} remaining), sleeping {}s before next request",
                page.quota.remaining.unwrap_or_default(),
                wait.as_secs()
            ),
            Pause::Fallback(wait) => tracing::warn!(
                "Rate limit low and reset time unreadable ({:?}), sleeping {}s",
                page.quota.reset_at,
                wait.as_secs()
            ),
            Pause::Soft(_) | Pause::None => {}
        }
        self.pending_pause = pause.duration();
    }

    async fn retry_after(&mut self, failure: FetchFailure, delay: Duration) -> Step {
        if self.shutdown.is_requested() {
            return Step::Done(StopReason::Shutdown);
        }

        tracing::warn!(
            "{} - retrying in {:.1}s (streak {})",
            failure,
            delay.as_secs_f64(),
            self.retry.consecutive_failures()
        );
        self.sleeper.sleep(delay).await;
        self.retries += 1;

        Step::Fetching
    }

    fn normalize(&mut self, page: SearchPage) -> Step {
        let normalized = normalize_page(&page.entries);
        self.rejected += normalized.rejected.len() as u64;

        if normalized.entries.is_empty() {
            if page.has_next {
                tracing::warn!(
                    "Page after {} had no usable entries ({} nodes) although more pages were reported; stopping",
                    self.cursor.as_deref().unwrap_or("<start>"),
                    page.entries.len()
                );
            } else {
                tracing::info!("No nodes returned");
            }
            return Step::Done(StopReason::EmptyPage);
        }

        Step::Ingesting {
            entries: normalized.entries,
            next_cursor: page.next_cursor,
            has_next: page.has_next,
        }
    }

    fn ingest(
        &mut self,
        entries: Vec<CatalogEntry>,
        next_cursor: Option<String>,
        has_next: bool,
    ) -> Result<Step, HarvestError> {
        let today = Utc::now().date_naive();
        let written = self.storage.upsert_batch(&entries, today)?;
        self.commits += 1;
        self.progress.record_batch(written);

        let report = self.progress.report();
        tracing::info!(
            "Progress: {}/{} records | Rate: {:.1}/s | ETA: {:.1}min",
            report.fetched,
            report.target,
            report.rate,
            report.eta.map(|eta| eta.as_secs_f64() / 60.0).unwrap_or(0.0)
        );

        Ok(Step::Checkpointing {
            next_cursor,
            has_next,
        })
    }

    fn checkpoint(
        &mut self,
        next_cursor: Option<String>,
        has_next: bool,
    ) -> Result<Step, HarvestError> {
        let advanced = next_cursor.is_some();
        if let Some(cursor) = next_cursor {
            self.storage
                .write_checkpoint(&self.config.harvest.checkpoint_key, &cursor)?;
            self.checkpoint_writes += 1;
            self.cursor = Some(cursor);
        }

        if !has_next {
            tracing::info!("No more pages");
            return Ok(Step::Done(StopReason::Exhausted));
        }

        if !advanced {
            tracing::warn!("Upstream reported more pages without a cursor; stopping");
            return Ok(Step::Done(StopReason::Exhausted));
        }

        if self.progress.target_reached() {
            return Ok(Step::Done(StopReason::TargetReached));
        }

        Ok(Step::Fetching)
    }

    fn finish_run(&mut self, status: RunStatus) {
        if let Some(run_id) = self.run_id {
            if let Err(e) = self
                .storage
                .finish_run(run_id, status, self.progress.fetched())
            {
                tracing::warn!("Could not record end of run {}: {}", run_id, e);
            }
        }
    }

    fn outcome(&self, reason: StopReason) -> HarvestOutcome {
        HarvestOutcome {
            reason,
            records_fetched: self.progress.fetched(),
            pages: self.progress.pages(),
            commits: self.commits,
            checkpoint_writes: self.checkpoint_writes,
            retries: self.retries,
            rejected: self.rejected,
            upstream_total: self.upstream_total,
            elapsed: self.progress.elapsed(),
        }
    }
}

/// Runs a complete harvest
///
/// The credential is resolved before anything else, so a missing token fails
/// without opening the database or touching the network.
///
/// # Example
///
/// ```no_run
/// use repo_harvest::config::load_config;
/// use repo_harvest::crawler::{run_harvest, ShutdownSignal};
/// use std::path::Path;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = load_config(Path::new("harvest.toml"))?;
/// let outcome = run_harvest(config, "", ShutdownSignal::new()).await?;
/// println!("{} records", outcome.records_fetched);
/// # Ok(())
/// # }
/// ```
pub async fn run_harvest(
    config: Config,
    config_hash: &str,
    shutdown: ShutdownSignal,
) -> Result<HarvestOutcome, HarvestError> {
    let credential = load_credential(&config.upstream)?;
    let mut harvester = Harvester::connect(config, credential)?
        .with_config_hash(config_hash)
        .with_shutdown(shutdown);
    harvester.run().await
}
