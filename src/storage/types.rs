use chrono::{DateTime, TimeZone, Utc};
use sha2::{Digest, Sha256};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with operator-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another writer held the database lock past the busy timeout
    #[error("Database is locked by another writer; try again later")]
    Locked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Tags or filter rules could not be encoded as JSON
    #[error("Failed to encode column value: {0}")]
    Encode(#[from] serde_json::Error),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Classify a sqlx error, mapping SQLite lock conditions to [`DatabaseError::Locked`]
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let error_string = err.to_string().to_lowercase();

        // SQLITE_BUSY (5): database is locked
        // SQLITE_LOCKED (6): database table is locked
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
            || error_string.contains("sqlite_busy")
            || error_string.contains("sqlite_locked")
        {
            return DatabaseError::Locked;
        }

        DatabaseError::Other(err)
    }
}

// ============================================================================
// Registry Types
// ============================================================================

/// One configured feed source as the registry hands it to the pipeline.
///
/// `filter_rules` is the already-resolved rule set serialized as JSON. The
/// pipeline parses it once at start and never re-reads it mid-run.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct FeedRecord {
    pub id: String,
    pub name: String,
    pub section: String,
    #[sqlx(rename = "url")]
    pub source_url: String,
    pub enabled: bool,
    pub filter_rules: Option<String>,
}

impl FeedRecord {
    /// Build an enabled record whose id is derived from its URL.
    pub fn new(name: &str, section: &str, source_url: &str, filter_rules: Option<String>) -> Self {
        Self {
            id: Self::id_for_url(source_url),
            name: name.to_owned(),
            section: section.to_owned(),
            source_url: source_url.to_owned(),
            enabled: true,
            filter_rules,
        }
    }

    /// Stable opaque id: first 16 hex characters of the URL's SHA-256 digest.
    pub fn id_for_url(url: &str) -> String {
        let digest = Sha256::digest(url.trim().as_bytes());
        let mut hex = format!("{:x}", digest);
        hex.truncate(16);
        hex
    }
}

// ============================================================================
// Article Types
// ============================================================================

/// An entry after normalization, ready for filtering and upsert.
///
/// Invariants upheld by the parser: `url` is non-empty, `summary` is plain
/// text, and `tags` is `None` rather than an empty list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalArticle {
    pub feed_id: String,
    pub title: String,
    pub url: String,
    pub published_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// The feed gave no date and both timestamps are the ingestion time.
    /// An upsert never lets an inferred date replace a stored one.
    pub date_inferred: bool,
    pub author: Option<String>,
    pub summary: Option<String>,
    pub image_url: Option<String>,
    pub tags: Option<Vec<String>>,
}

impl CanonicalArticle {
    /// Title given to entries that have none.
    pub const UNTITLED: &'static str = "Untitled";
}

/// Internal row type for article queries (used by sqlx FromRow)
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ArticleDbRow {
    pub id: i64,
    pub feed_id: String,
    pub url: String,
    pub title: String,
    pub published_at: i64,
    pub updated_at: i64,
    pub date_inferred: bool,
    pub author: Option<String>,
    pub summary: Option<String>,
    pub image_url: Option<String>,
    pub tags: Option<String>,
    pub first_seen_at: i64,
    pub last_seen_at: i64,
}

impl ArticleDbRow {
    pub(crate) fn into_stored(self) -> StoredArticle {
        // A tags column we cannot decode reads back as "no tags" rather than failing the query
        let tags = self
            .tags
            .and_then(|raw| serde_json::from_str::<Vec<String>>(&raw).ok())
            .filter(|tags| !tags.is_empty());

        StoredArticle {
            id: self.id,
            article: CanonicalArticle {
                feed_id: self.feed_id,
                title: self.title,
                url: self.url,
                published_at: from_timestamp(self.published_at),
                updated_at: from_timestamp(self.updated_at),
                date_inferred: self.date_inferred,
                author: self.author,
                summary: self.summary,
                image_url: self.image_url,
                tags,
            },
            first_seen_at: from_timestamp(self.first_seen_at),
            last_seen_at: from_timestamp(self.last_seen_at),
        }
    }
}

/// A persisted article row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArticle {
    pub id: i64,
    pub article: CanonicalArticle,
    /// When the (feed, url) pair was first written; preserved across updates
    pub first_seen_at: DateTime<Utc>,
    /// When the pair was last written by an ingestion run
    pub last_seen_at: DateTime<Utc>,
}

fn from_timestamp(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feed_id_is_stable_and_short() {
        let a = FeedRecord::id_for_url("https://example.com/feed.xml");
        let b = FeedRecord::id_for_url("  https://example.com/feed.xml ");
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_feed_id_differs_per_url() {
        assert_ne!(
            FeedRecord::id_for_url("https://example.com/a.xml"),
            FeedRecord::id_for_url("https://example.com/b.xml")
        );
    }

    #[test]
    fn test_row_with_empty_tag_list_reads_back_as_none() {
        let row = ArticleDbRow {
            id: 1,
            feed_id: "f".into(),
            url: "https://example.com/a".into(),
            title: "A".into(),
            published_at: 1_700_000_000,
            updated_at: 1_700_000_000,
            date_inferred: false,
            author: None,
            summary: None,
            image_url: None,
            tags: Some("[]".into()),
            first_seen_at: 1_700_000_000,
            last_seen_at: 1_700_000_000,
        };
        assert_eq!(row.into_stored().article.tags, None);
    }
}
