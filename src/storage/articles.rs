use sqlx::QueryBuilder;

use super::schema::Database;
use super::types::{ArticleDbRow, CanonicalArticle, DatabaseError, StoredArticle};

/// Rows per INSERT statement: 12 columns * 50 = 600 bound parameters,
/// under SQLite's historical 999-parameter limit.
const BATCH_SIZE: usize = 50;

/// Maximum number of articles to return from any single query (OOM protection)
const MAX_ARTICLES: i64 = 2000;

impl Database {
    // ========================================================================
    // Article Operations
    // ========================================================================

    /// Upsert articles keyed by `(feed_id, url)`, returns the number of rows written.
    ///
    /// Uses INSERT ... ON CONFLICT DO UPDATE so every row is created or updated
    /// by a single statement; there is no read-then-write window. Existing rows
    /// keep their `id` and `first_seen_at` and get every other field refreshed,
    /// except that an inferred date never overwrites the stored dates.
    ///
    /// All batches for one call share a transaction: a failure leaves this
    /// call's rows untouched and never affects rows written by other calls.
    ///
    /// Callers must not pass the same `(feed_id, url)` twice in one call; the
    /// parser deduplicates within a feed.
    pub async fn upsert_articles(&self, articles: &[CanonicalArticle]) -> Result<usize, DatabaseError> {
        if articles.is_empty() {
            return Ok(0);
        }

        let now = chrono::Utc::now().timestamp();

        // Encode tags up front so the query builder can borrow them
        let encoded_tags = articles
            .iter()
            .map(|a| a.tags.as_ref().map(serde_json::to_string).transpose())
            .collect::<Result<Vec<Option<String>>, _>>()?;

        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;
        let mut written: u64 = 0;

        for (chunk, tags_chunk) in articles
            .chunks(BATCH_SIZE)
            .zip(encoded_tags.chunks(BATCH_SIZE))
        {
            let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
                "INSERT INTO articles (feed_id, url, title, published_at, updated_at, date_inferred, \
                 author, summary, image_url, tags, first_seen_at, last_seen_at) ",
            );

            builder.push_values(chunk.iter().zip(tags_chunk), |mut b, (article, tags)| {
                b.push_bind(&article.feed_id)
                    .push_bind(&article.url)
                    .push_bind(&article.title)
                    .push_bind(article.published_at.timestamp())
                    .push_bind(article.updated_at.timestamp())
                    .push_bind(article.date_inferred)
                    .push_bind(&article.author)
                    .push_bind(&article.summary)
                    .push_bind(&article.image_url)
                    .push_bind(tags)
                    .push_bind(now)
                    .push_bind(now);
            });

            builder.push(
                " ON CONFLICT(feed_id, url) DO UPDATE SET \
                 title = excluded.title, \
                 published_at = CASE WHEN excluded.date_inferred \
                     THEN articles.published_at ELSE excluded.published_at END, \
                 updated_at = CASE WHEN excluded.date_inferred \
                     THEN articles.updated_at ELSE excluded.updated_at END, \
                 date_inferred = articles.date_inferred AND excluded.date_inferred, \
                 author = excluded.author, \
                 summary = excluded.summary, \
                 image_url = excluded.image_url, \
                 tags = excluded.tags, \
                 last_seen_at = excluded.last_seen_at",
            );

            let result = builder
                .build()
                .execute(&mut *tx)
                .await
                .map_err(DatabaseError::from_sqlx)?;
            written += result.rows_affected();
        }

        tx.commit().await.map_err(DatabaseError::from_sqlx)?;
        Ok(written as usize)
    }

    // ========================================================================
    // Article Queries
    // ========================================================================

    /// Articles for one feed, newest first, capped at `MAX_ARTICLES`.
    pub async fn get_articles_for_feed(&self, feed_id: &str) -> Result<Vec<StoredArticle>, DatabaseError> {
        let rows = sqlx::query_as::<_, ArticleDbRow>(
            r#"
            SELECT id, feed_id, url, title, published_at, updated_at, date_inferred, author, summary,
                   image_url, tags, first_seen_at, last_seen_at
            FROM articles
            WHERE feed_id = ?
            ORDER BY published_at DESC, id DESC
            LIMIT ?
        "#,
        )
        .bind(feed_id)
        .bind(MAX_ARTICLES)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ArticleDbRow::into_stored).collect())
    }

    /// Number of stored article rows, optionally restricted to one feed.
    pub async fn count_articles(&self, feed_id: Option<&str>) -> Result<i64, DatabaseError> {
        let (count,): (i64,) = match feed_id {
            Some(id) => {
                sqlx::query_as("SELECT COUNT(*) FROM articles WHERE feed_id = ?")
                    .bind(id)
                    .fetch_one(&self.pool)
                    .await?
            }
            None => {
                sqlx::query_as("SELECT COUNT(*) FROM articles")
                    .fetch_one(&self.pool)
                    .await?
            }
        };
        Ok(count)
    }
}
