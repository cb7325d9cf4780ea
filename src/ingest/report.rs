use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

use crate::storage::FeedRecord;

/// Final state of one feed's pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    Success,
    NoArticles,
    NoArticlesAfterFilter,
    Error,
}

impl IngestStatus {
    /// Status of a feed whose fetch, parse and upsert all succeeded.
    pub fn from_counts(total_parsed: usize, kept: usize) -> Self {
        if total_parsed == 0 {
            IngestStatus::NoArticles
        } else if kept == 0 {
            IngestStatus::NoArticlesAfterFilter
        } else {
            IngestStatus::Success
        }
    }
}

/// Counters and outcome for one feed in one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestionResult {
    pub feed_id: String,
    pub feed_name: String,
    pub total_parsed: usize,
    /// Entries dropped during normalization (no URL, or duplicate URL)
    pub skipped: usize,
    pub filtered_out: usize,
    pub upserted: usize,
    pub status: IngestStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IngestionResult {
    pub fn completed(
        feed: &FeedRecord,
        total_parsed: usize,
        skipped: usize,
        filtered_out: usize,
        upserted: usize,
    ) -> Self {
        Self {
            feed_id: feed.id.clone(),
            feed_name: feed.name.clone(),
            total_parsed,
            skipped,
            filtered_out,
            upserted,
            status: IngestStatus::from_counts(total_parsed, total_parsed - filtered_out),
            error: None,
        }
    }

    pub fn failed(feed: &FeedRecord, error: impl fmt::Display) -> Self {
        Self {
            feed_id: feed.id.clone(),
            feed_name: feed.name.clone(),
            total_parsed: 0,
            skipped: 0,
            filtered_out: 0,
            upserted: 0,
            status: IngestStatus::Error,
            error: Some(error.to_string()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.status == IngestStatus::Error
    }

    /// The per-feed object returned by the trigger endpoint.
    pub fn to_response(&self) -> FeedReport {
        match (&self.status, &self.error) {
            (IngestStatus::Error, error) => FeedReport::Failed {
                feed: self.feed_name.clone(),
                error: error.clone().unwrap_or_else(|| "unknown error".to_owned()),
            },
            (status, _) => FeedReport::Completed {
                feed: self.feed_name.clone(),
                total: self.total_parsed,
                filtered: self.filtered_out,
                upserted: self.upserted,
                status: *status,
            },
        }
    }
}

/// Wire shape of one feed's result: `{feed, total, filtered, upserted, status}` or `{feed, error}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FeedReport {
    Completed {
        feed: String,
        total: usize,
        filtered: usize,
        upserted: usize,
        status: IngestStatus,
    },
    Failed {
        feed: String,
        error: String,
    },
}

/// Run-wide sums.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunTotals {
    pub feeds: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub parsed: usize,
    pub filtered_out: usize,
    pub upserted: usize,
}

/// Joined results of every feed in one run. Feed order is completion order.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub totals: RunTotals,
    pub results: Vec<IngestionResult>,
}

impl RunReport {
    pub fn new(
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        results: Vec<IngestionResult>,
    ) -> Self {
        let totals = results.iter().fold(
            RunTotals {
                feeds: results.len(),
                ..Default::default()
            },
            |mut acc, r| {
                if r.is_error() {
                    acc.failed += 1;
                } else {
                    acc.succeeded += 1;
                }
                acc.parsed += r.total_parsed;
                acc.filtered_out += r.filtered_out;
                acc.upserted += r.upserted;
                acc
            },
        );

        Self {
            started_at,
            finished_at,
            totals,
            results,
        }
    }

    pub fn responses(&self) -> Vec<FeedReport> {
        self.results.iter().map(IngestionResult::to_response).collect()
    }

    /// `(feed_id, error)` pairs for the registry bookkeeping update.
    pub fn outcomes(&self) -> Vec<(String, Option<String>)> {
        self.results
            .iter()
            .map(|r| (r.feed_id.clone(), r.error.clone()))
            .collect()
    }

    /// Look up one feed's result.
    pub fn result_for(&self, feed_id: &str) -> Option<&IngestionResult> {
        self.results.iter().find(|r| r.feed_id == feed_id)
    }
}
