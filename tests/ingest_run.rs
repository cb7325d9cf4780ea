//! End-to-end ingestion runs against mocked feed servers.
//!
//! Each test opens its own in-memory SQLite database and a wiremock server
//! standing in for the feed sources.

use pretty_assertions::assert_eq;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use noctua::ingest::{IngestSettings, IngestStatus, Ingestor};
use noctua::storage::{Database, FeedRecord};

const TECH_FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Example Tech</title>
    <link>https://example.com</link>
    <description>Tech news</description>
    <item>
      <title>Rust 2.0 announced</title>
      <link>https://example.com/tech/2024/rust</link>
      <description>&lt;p&gt;The &lt;b&gt;big&lt;/b&gt; one.&lt;/p&gt;</description>
      <pubDate>Mon, 01 Jan 2024 10:00:00 GMT</pubDate>
    </item>
    <item>
      <title>Sponsored: Deal of the day</title>
      <link>https://example.com/deals/1</link>
    </item>
    <item>
      <title>Today's Deal</title>
      <link>https://example.com/tech/deal</link>
    </item>
  </channel>
</rss>"#;

const EMPTY_FEED: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>Quiet</title><link>https://example.com</link><description>d</description></channel></rss>"#;

async fn test_db() -> Database {
    Database::open(":memory:").await.unwrap()
}

async fn mount(server: &MockServer, route: &str, template: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(template)
        .mount(server)
        .await;
}

fn feed(server: &MockServer, name: &str, route: &str, rules: Option<&str>) -> FeedRecord {
    FeedRecord::new(
        name,
        "tech",
        &format!("{}{}", server.uri(), route),
        rules.map(str::to_owned),
    )
}

async fn ingestor(db: Database, feeds: &[FeedRecord], settings: IngestSettings) -> Ingestor {
    db.sync_feeds(feeds).await.unwrap();
    Ingestor::new(db, settings).unwrap()
}

#[tokio::test]
async fn test_failing_feed_does_not_affect_sibling() {
    let server = MockServer::start().await;
    mount(&server, "/ok.xml", ResponseTemplate::new(200).set_body_string(TECH_FEED)).await;
    mount(&server, "/broken.xml", ResponseTemplate::new(500)).await;

    let ok = feed(&server, "Healthy", "/ok.xml", None);
    let broken = feed(&server, "Broken", "/broken.xml", None);
    let ingestor = ingestor(test_db().await, &[ok.clone(), broken.clone()], IngestSettings::default()).await;

    let report = ingestor.run().await.unwrap();
    assert_eq!(report.totals.feeds, 2);
    assert_eq!(report.totals.succeeded, 1);
    assert_eq!(report.totals.failed, 1);

    let ok_result = report.result_for(&ok.id).unwrap();
    assert_eq!(ok_result.status, IngestStatus::Success);
    assert_eq!(ok_result.total_parsed, 3);
    assert_eq!(ok_result.upserted, 3);

    let broken_result = report.result_for(&broken.id).unwrap();
    assert_eq!(broken_result.status, IngestStatus::Error);
    assert_eq!(broken_result.error.as_deref(), Some("HTTP error: status 500"));

    let db = ingestor.database();
    assert_eq!(db.count_articles(Some(&ok.id)).await.unwrap(), 3);
    assert_eq!(db.count_articles(Some(&broken.id)).await.unwrap(), 0);
    assert_eq!(
        db.feed_last_error(&broken.id).await.unwrap().as_deref(),
        Some("HTTP error: status 500")
    );
    assert_eq!(db.feed_last_error(&ok.id).await.unwrap(), None);
}

#[tokio::test]
async fn test_repeated_runs_do_not_duplicate_articles() {
    let server = MockServer::start().await;
    mount(&server, "/feed.xml", ResponseTemplate::new(200).set_body_string(TECH_FEED)).await;

    let f = feed(&server, "Example", "/feed.xml", None);
    let ingestor = ingestor(test_db().await, &[f.clone()], IngestSettings::default()).await;

    ingestor.run().await.unwrap();
    let first = ingestor.database().get_articles_for_feed(&f.id).await.unwrap();

    let report = ingestor.run().await.unwrap();
    assert_eq!(report.totals.upserted, 3);
    let second = ingestor.database().get_articles_for_feed(&f.id).await.unwrap();

    assert_eq!(first.len(), 3);
    assert_eq!(second.len(), 3);
    for before in &first {
        let after = second
            .iter()
            .find(|s| s.article.url == before.article.url)
            .unwrap();
        assert_eq!(after.id, before.id);
        assert_eq!(after.first_seen_at, before.first_seen_at);
    }
}

#[tokio::test]
async fn test_article_fields_are_sanitized() {
    let server = MockServer::start().await;
    mount(&server, "/feed.xml", ResponseTemplate::new(200).set_body_string(TECH_FEED)).await;

    let f = feed(&server, "Example", "/feed.xml", None);
    let ingestor = ingestor(test_db().await, &[f.clone()], IngestSettings::default()).await;
    ingestor.run().await.unwrap();

    let stored = ingestor.database().get_articles_for_feed(&f.id).await.unwrap();
    let rust = stored
        .iter()
        .find(|s| s.article.title == "Rust 2.0 announced")
        .unwrap();
    assert_eq!(rust.article.summary.as_deref(), Some("The big one."));
    assert_eq!(rust.article.feed_id, f.id);
}

#[tokio::test]
async fn test_cascaded_rules_filter_entries() {
    let server = MockServer::start().await;
    mount(&server, "/feed.xml", ResponseTemplate::new(200).set_body_string(TECH_FEED)).await;

    let rules = r#"{"exclude_title_keywords":["sponsored"],"include_url_substrings":["/tech/"]}"#;
    let f = feed(&server, "Example", "/feed.xml", Some(rules));
    let ingestor = ingestor(test_db().await, &[f.clone()], IngestSettings::default()).await;

    let report = ingestor.run().await.unwrap();
    let result = report.result_for(&f.id).unwrap();
    assert_eq!(result.status, IngestStatus::Success);
    assert_eq!(result.total_parsed, 3);
    assert_eq!(result.filtered_out, 1);
    assert_eq!(result.upserted, 2);

    let titles: Vec<String> = ingestor
        .database()
        .get_articles_for_feed(&f.id)
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.article.title)
        .collect();
    assert!(titles.contains(&"Today's Deal".to_string()));
    assert!(!titles.iter().any(|t| t.starts_with("Sponsored")));
}

#[tokio::test]
async fn test_everything_filtered_reports_no_articles_after_filter() {
    let server = MockServer::start().await;
    mount(&server, "/feed.xml", ResponseTemplate::new(200).set_body_string(TECH_FEED)).await;

    let f = feed(
        &server,
        "Example",
        "/feed.xml",
        Some(r#"{"require_keywords":["kubernetes"]}"#),
    );
    let ingestor = ingestor(test_db().await, &[f.clone()], IngestSettings::default()).await;

    let report = ingestor.run().await.unwrap();
    let result = report.result_for(&f.id).unwrap();
    assert_eq!(result.status, IngestStatus::NoArticlesAfterFilter);
    assert_eq!(result.filtered_out, 3);
    assert_eq!(result.upserted, 0);
    assert_eq!(ingestor.database().count_articles(Some(&f.id)).await.unwrap(), 0);
}

#[tokio::test]
async fn test_empty_feed_reports_no_articles() {
    let server = MockServer::start().await;
    mount(&server, "/feed.xml", ResponseTemplate::new(200).set_body_string(EMPTY_FEED)).await;

    let f = feed(&server, "Quiet", "/feed.xml", None);
    let ingestor = ingestor(test_db().await, &[f.clone()], IngestSettings::default()).await;

    let report = ingestor.run().await.unwrap();
    let result = report.result_for(&f.id).unwrap();
    assert_eq!(result.status, IngestStatus::NoArticles);
    assert_eq!(result.total_parsed, 0);
    assert_eq!(result.error, None);
}

#[tokio::test]
async fn test_malformed_rules_disable_filtering() {
    let server = MockServer::start().await;
    mount(&server, "/feed.xml", ResponseTemplate::new(200).set_body_string(TECH_FEED)).await;

    let f = feed(&server, "Example", "/feed.xml", Some("{not json"));
    let ingestor = ingestor(test_db().await, &[f.clone()], IngestSettings::default()).await;

    let report = ingestor.run().await.unwrap();
    let result = report.result_for(&f.id).unwrap();
    assert_eq!(result.status, IngestStatus::Success);
    assert_eq!(result.filtered_out, 0);
    assert_eq!(result.upserted, 3);
}

#[tokio::test]
async fn test_run_timeout_keeps_finished_feeds() {
    let server = MockServer::start().await;
    mount(&server, "/fast.xml", ResponseTemplate::new(200).set_body_string(TECH_FEED)).await;
    mount(
        &server,
        "/slow.xml",
        ResponseTemplate::new(200)
            .set_body_string(TECH_FEED)
            .set_delay(Duration::from_secs(5)),
    )
    .await;

    let fast = feed(&server, "Fast", "/fast.xml", None);
    let slow = feed(&server, "Slow", "/slow.xml", None);
    let settings = IngestSettings {
        run_timeout: Some(Duration::from_millis(500)),
        ..IngestSettings::default()
    };
    let ingestor = ingestor(test_db().await, &[fast.clone(), slow.clone()], settings).await;

    let report = ingestor.run().await.unwrap();
    assert_eq!(report.totals.feeds, 2);
    assert_eq!(report.result_for(&fast.id).unwrap().status, IngestStatus::Success);

    let slow_result = report.result_for(&slow.id).unwrap();
    assert_eq!(slow_result.status, IngestStatus::Error);
    assert_eq!(
        slow_result.error.as_deref(),
        Some("Run timed out before this feed finished")
    );
}

#[tokio::test]
async fn test_disabled_feeds_are_not_fetched() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(TECH_FEED))
        .expect(0)
        .mount(&server)
        .await;

    let mut f = feed(&server, "Off", "/feed.xml", None);
    f.enabled = false;
    let ingestor = ingestor(test_db().await, &[f], IngestSettings::default()).await;

    let report = ingestor.run().await.unwrap();
    assert_eq!(report.totals.feeds, 0);
    assert!(report.responses().is_empty());
}

const UNDATED_FEED: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>Undated</title><link>https://example.com</link><description>d</description>
  <item><title>No date here</title><link>https://example.com/a</link></item>
</channel></rss>"#;

#[tokio::test]
async fn test_undated_article_keeps_its_first_seen_dates() {
    let server = MockServer::start().await;
    mount(&server, "/feed.xml", ResponseTemplate::new(200).set_body_string(UNDATED_FEED)).await;

    let f = feed(&server, "Undated", "/feed.xml", None);
    let ingestor = ingestor(test_db().await, &[f.clone()], IngestSettings::default()).await;

    ingestor.run().await.unwrap();
    let first = ingestor.database().get_articles_for_feed(&f.id).await.unwrap();

    // Timestamps are stored with second precision
    tokio::time::sleep(Duration::from_millis(1100)).await;
    ingestor.run().await.unwrap();
    let second = ingestor.database().get_articles_for_feed(&f.id).await.unwrap();

    assert_eq!(second.len(), 1);
    assert!(second[0].article.date_inferred);
    assert_eq!(second[0].article.published_at, first[0].article.published_at);
    assert_eq!(second[0].article.updated_at, first[0].article.updated_at);
    assert!(second[0].last_seen_at > first[0].last_seen_at);
}

const REPOSTED_FEED: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>Reposts</title><link>https://example.com</link><description>d</description>
  <item><title>Same story</title><link>https://example.com/a</link></item>
  <item><title>Same story</title><link>https://example.com/a/</link></item>
  <item><title>Same Story!</title><link>https://example.com/b</link></item>
  <item><title>Different story</title><link>https://example.com/c</link></item>
</channel></rss>"#;

#[tokio::test]
async fn test_reposted_entries_are_deduplicated() {
    let server = MockServer::start().await;
    mount(&server, "/feed.xml", ResponseTemplate::new(200).set_body_string(REPOSTED_FEED)).await;

    let f = feed(&server, "Reposts", "/feed.xml", None);
    let ingestor = ingestor(test_db().await, &[f.clone()], IngestSettings::default()).await;

    let report = ingestor.run().await.unwrap();
    let result = report.result_for(&f.id).unwrap();
    assert_eq!(result.total_parsed, 4);
    assert_eq!(result.filtered_out, 2);
    assert_eq!(result.upserted, 2);
    assert_eq!(ingestor.database().count_articles(Some(&f.id)).await.unwrap(), 2);
}

#[tokio::test]
async fn test_deduplication_can_be_turned_off_per_feed() {
    let server = MockServer::start().await;
    mount(&server, "/feed.xml", ResponseTemplate::new(200).set_body_string(REPOSTED_FEED)).await;

    let f = feed(&server, "Reposts", "/feed.xml", Some(r#"{"deduplicate":false}"#));
    let ingestor = ingestor(test_db().await, &[f.clone()], IngestSettings::default()).await;

    let report = ingestor.run().await.unwrap();
    let result = report.result_for(&f.id).unwrap();
    assert_eq!(result.filtered_out, 0);
    assert_eq!(result.upserted, 4);
}
