//! Feed ingestion pipeline.
//!
//! Fetches configured RSS/Atom feeds concurrently, normalizes each entry into
//! a [`storage::CanonicalArticle`], applies per-feed filter rules and upserts
//! the survivors into SQLite keyed by `(feed_id, url)`.
//!
//! ```
//! let text = noctua::content::sanitize("<p>Hello &amp; <b>welcome</b></p>");
//! assert_eq!(text.as_deref(), Some("Hello & welcome"));
//! ```

pub mod config;
pub mod content;
pub mod feed;
pub mod filter;
pub mod ingest;
pub mod storage;
pub mod web;
