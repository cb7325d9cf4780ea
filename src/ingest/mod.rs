//! Per-feed ingestion pipeline and run aggregation.
//!
//! [`Ingestor::run`] lists enabled feeds, fans out one task per feed
//! (fetch → parse → filter → upsert), and joins the outcomes into a
//! [`RunReport`]. One feed's failure never affects another's.

mod pipeline;
mod report;

pub use pipeline::{IngestError, IngestSettings, Ingestor};
pub use report::{FeedReport, IngestStatus, IngestionResult, RunReport, RunTotals};
