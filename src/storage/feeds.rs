use sqlx::QueryBuilder;

use super::schema::Database;
use super::types::{DatabaseError, FeedRecord};

impl Database {
    // ========================================================================
    // Feed Registry Operations
    // ========================================================================

    /// Sync the registry with the configured feed list.
    ///
    /// Feeds are upserted by id (name, section, URL, enabled flag and filter
    /// blob are refreshed). Feeds missing from `feeds` are disabled, never
    /// deleted, so their articles keep a valid parent row.
    ///
    /// Batched INSERTs in chunks of 100 inside one transaction.
    pub async fn sync_feeds(&self, feeds: &[FeedRecord]) -> Result<(), DatabaseError> {
        const BATCH_SIZE: usize = 100;
        let mut tx = self.pool.begin().await?;

        for chunk in feeds.chunks(BATCH_SIZE) {
            let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
                "INSERT INTO feeds (id, name, section, url, enabled, filter_rules) ",
            );

            builder.push_values(chunk, |mut b, feed| {
                b.push_bind(&feed.id)
                    .push_bind(&feed.name)
                    .push_bind(&feed.section)
                    .push_bind(&feed.source_url)
                    .push_bind(feed.enabled)
                    .push_bind(&feed.filter_rules);
            });

            builder.push(
                " ON CONFLICT(id) DO UPDATE SET \
                 name = excluded.name, \
                 section = excluded.section, \
                 url = excluded.url, \
                 enabled = excluded.enabled, \
                 filter_rules = excluded.filter_rules",
            );

            builder.build().execute(&mut *tx).await?;
        }

        // Disable everything the config no longer mentions
        let mut disable: QueryBuilder<sqlx::Sqlite> =
            QueryBuilder::new("UPDATE feeds SET enabled = 0");
        if !feeds.is_empty() {
            disable.push(" WHERE id NOT IN (");
            let mut separated = disable.separated(", ");
            for feed in feeds {
                separated.push_bind(&feed.id);
            }
            separated.push_unseparated(")");
        }
        let disabled = disable.build().execute(&mut *tx).await?.rows_affected();

        tx.commit().await?;

        tracing::info!(
            configured = feeds.len(),
            disabled = disabled,
            "Feed registry synced"
        );
        Ok(())
    }

    /// All enabled feeds, ordered by section then name.
    pub async fn list_enabled_feeds(&self) -> Result<Vec<FeedRecord>, DatabaseError> {
        let feeds = sqlx::query_as::<_, FeedRecord>(
            r#"
            SELECT id, name, section, url, enabled, filter_rules
            FROM feeds
            WHERE enabled = 1
            ORDER BY section, name
        "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(feeds)
    }

    /// Every feed in the registry, including disabled ones.
    pub async fn list_feeds(&self) -> Result<Vec<FeedRecord>, DatabaseError> {
        let feeds = sqlx::query_as::<_, FeedRecord>(
            "SELECT id, name, section, url, enabled, filter_rules FROM feeds ORDER BY section, name",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(feeds)
    }

    /// The last recorded error for a feed, if any.
    pub async fn feed_last_error(&self, feed_id: &str) -> Result<Option<String>, DatabaseError> {
        let row: Option<(Option<String>,)> =
            sqlx::query_as("SELECT last_error FROM feeds WHERE id = ?")
                .bind(feed_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.and_then(|(error,)| error))
    }

    /// Record the outcome of a run for many feeds in a single UPDATE statement.
    ///
    /// Uses a bulk UPDATE with CASE expressions instead of one UPDATE per feed.
    /// Every listed feed gets `last_ingested_at = now`; `None` clears the error.
    ///
    /// # Arguments
    ///
    /// * `outcomes` - Slice of (feed_id, error_message) tuples.
    pub async fn record_feed_outcomes(
        &self,
        outcomes: &[(String, Option<String>)],
    ) -> Result<(), DatabaseError> {
        if outcomes.is_empty() {
            return Ok(());
        }

        let now = chrono::Utc::now().timestamp();

        // Build: UPDATE feeds SET last_ingested_at = ?, last_error = CASE id
        //            WHEN 'a' THEN 'error1'
        //            WHEN 'b' THEN NULL
        //        END
        //        WHERE id IN ('a', 'b')
        let mut builder: QueryBuilder<sqlx::Sqlite> =
            QueryBuilder::new("UPDATE feeds SET last_ingested_at = ");
        builder.push_bind(now);
        builder.push(", last_error = CASE id ");

        for (feed_id, error) in outcomes {
            builder.push("WHEN ");
            builder.push_bind(feed_id);
            builder.push(" THEN ");
            builder.push_bind(error);
            builder.push(" ");
        }

        builder.push("END WHERE id IN (");
        let mut separated = builder.separated(", ");
        for (feed_id, _) in outcomes {
            separated.push_bind(feed_id);
        }
        separated.push_unseparated(")");

        builder.build().execute(&self.pool).await?;
        Ok(())
    }
}
