use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

use super::report::{IngestionResult, RunReport};
use crate::content::{HtmlSanitizer, RegexSanitizer};
use crate::feed::{self, FetchError, ParseError};
use crate::filter::{self, FilterRuleSet};
use crate::storage::{Database, DatabaseError, FeedRecord};

/// Errors confined to one feed's pipeline.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("Store upsert failed: {0}")]
    StoreUpsert(#[from] DatabaseError),
    #[error("Store upsert timed out after {0:?}")]
    StoreTimeout(Duration),
    #[error("Run timed out before this feed finished")]
    RunTimeout,
    #[error("Feed task failed: {0}")]
    TaskFailed(String),
}

/// Tunables for one ingestion run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestSettings {
    /// Deadline for one feed's HTTP exchange, body included
    pub fetch_timeout: Duration,
    /// Deadline for one feed's upsert
    pub store_timeout: Duration,
    /// Deadline for the whole run; `None` waits for every feed
    pub run_timeout: Option<Duration>,
    pub max_concurrent_feeds: usize,
    pub max_feed_bytes: usize,
    pub user_agent: String,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(30),
            store_timeout: Duration::from_secs(30),
            run_timeout: None,
            max_concurrent_feeds: 10,
            max_feed_bytes: feed::DEFAULT_MAX_FEED_BYTES,
            user_agent: feed::DEFAULT_USER_AGENT.to_owned(),
        }
    }
}

/// Runs the fetch → parse → filter → upsert pipeline for every enabled feed.
///
/// Cheap to clone; clones share the store pool, HTTP client and sanitizer.
#[derive(Clone)]
pub struct Ingestor {
    db: Database,
    client: reqwest::Client,
    sanitizer: Arc<dyn HtmlSanitizer>,
    settings: Arc<IngestSettings>,
}

impl Ingestor {
    /// Build an ingestor with the default [`RegexSanitizer`].
    pub fn new(db: Database, settings: IngestSettings) -> Result<Self, reqwest::Error> {
        let client = feed::build_client(&settings.user_agent)?;
        Ok(Self {
            db,
            client,
            sanitizer: Arc::new(RegexSanitizer),
            settings: Arc::new(settings),
        })
    }

    pub fn with_sanitizer(mut self, sanitizer: Arc<dyn HtmlSanitizer>) -> Self {
        self.sanitizer = sanitizer;
        self
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn settings(&self) -> &IngestSettings {
        &self.settings
    }

    /// One full run over the registry's enabled feeds.
    ///
    /// Only a failure to list feeds fails the run. Per-feed failures land in
    /// the report, and failing to record them in the registry is logged.
    pub async fn run(&self) -> Result<RunReport, DatabaseError> {
        let feeds = self.db.list_enabled_feeds().await?;
        let report = self.ingest_all(feeds).await;

        if let Err(e) = self.db.record_feed_outcomes(&report.outcomes()).await {
            tracing::warn!(error = %e, "Failed to record feed outcomes");
        }

        tracing::info!(
            feeds = report.totals.feeds,
            succeeded = report.totals.succeeded,
            failed = report.totals.failed,
            upserted = report.totals.upserted,
            elapsed_ms = (report.finished_at - report.started_at).num_milliseconds(),
            "Ingestion run finished"
        );
        Ok(report)
    }

    /// Ingest `feeds` concurrently and join every result into one report.
    ///
    /// Each feed runs in its own task, at most `max_concurrent_feeds` at a
    /// time. A panicking task is reported as that feed's error. When a run
    /// timeout is set, feeds still pending at the deadline are aborted and
    /// reported as errors; finished feeds keep their results.
    pub async fn ingest_all(&self, feeds: Vec<FeedRecord>) -> RunReport {
        let started_at = Utc::now();
        let deadline = self.settings.run_timeout.map(|t| Instant::now() + t);
        let concurrency = self.settings.max_concurrent_feeds.max(1);

        let results: Vec<IngestionResult> = stream::iter(feeds)
            .map(|feed| {
                let this = self.clone();
                async move { this.spawn_feed(feed, deadline).await }
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        RunReport::new(started_at, Utc::now(), results)
    }

    async fn spawn_feed(&self, feed: FeedRecord, deadline: Option<Instant>) -> IngestionResult {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            return IngestionResult::failed(&feed, IngestError::RunTimeout);
        }

        let mut handle = tokio::spawn({
            let this = self.clone();
            let feed = feed.clone();
            async move { this.ingest_feed(&feed).await }
        });

        let joined = match deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    handle.abort();
                    tracing::warn!(feed = %feed.source_url, "Run deadline reached, abandoning feed");
                    return IngestionResult::failed(&feed, IngestError::RunTimeout);
                }
            },
            None => handle.await,
        };

        joined.unwrap_or_else(|e| {
            tracing::error!(feed = %feed.source_url, error = %e, "Feed task panicked");
            IngestionResult::failed(&feed, IngestError::TaskFailed(e.to_string()))
        })
    }

    /// Run one feed's pipeline. Never fails: errors become an `Error` result.
    pub async fn ingest_feed(&self, feed: &FeedRecord) -> IngestionResult {
        // Parsed once; never re-read during the run
        let rules = FilterRuleSet::from_blob_or_empty(&feed.id, feed.filter_rules.as_deref());

        match self.process(feed, &rules).await {
            Ok(result) => {
                tracing::info!(
                    feed = %feed.source_url,
                    total = result.total_parsed,
                    filtered = result.filtered_out,
                    upserted = result.upserted,
                    status = ?result.status,
                    "Feed ingested"
                );
                result
            }
            Err(e) => {
                tracing::warn!(feed = %feed.source_url, error = %e, "Feed ingestion failed");
                IngestionResult::failed(feed, e)
            }
        }
    }

    async fn process(
        &self,
        feed: &FeedRecord,
        rules: &FilterRuleSet,
    ) -> Result<IngestionResult, IngestError> {
        let bytes = feed::fetch_feed(
            &self.client,
            &feed.source_url,
            self.settings.fetch_timeout,
            self.settings.max_feed_bytes,
        )
        .await?;

        let parsed = feed::parse_feed(&bytes, &feed.id, self.sanitizer.as_ref(), Utc::now())?;
        let total = parsed.articles.len();

        let outcome = filter::apply(parsed.articles, rules);

        let upserted = if outcome.kept.is_empty() {
            0
        } else {
            let timeout = self.settings.store_timeout;
            tokio::time::timeout(timeout, self.db.upsert_articles(&outcome.kept))
                .await
                .map_err(|_| IngestError::StoreTimeout(timeout))??
        };

        Ok(IngestionResult::completed(
            feed,
            total,
            parsed.skipped,
            outcome.filtered_out,
            upserted,
        ))
    }
}
