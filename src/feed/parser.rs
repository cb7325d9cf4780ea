use chrono::{DateTime, Utc};
use feed_rs::model::Entry;
use std::collections::HashSet;
use thiserror::Error;

use crate::content::HtmlSanitizer;
use crate::storage::CanonicalArticle;

#[derive(Debug, Error)]
pub enum ParseError {
    /// The document is not RSS 2.0, RSS 1.0, or Atom, or is not well-formed
    #[error("Parse error: {0}")]
    Malformed(#[from] feed_rs::parser::ParseFeedError),
}

/// Normalized entries of one feed plus how many entries were dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseResult {
    pub articles: Vec<CanonicalArticle>,
    /// Entries with no usable URL, or repeating an earlier entry's URL
    pub skipped: usize,
}

/// Fields pulled out of a dialect-specific entry before normalization.
struct RawEntry {
    id: String,
    title: Option<String>,
    link: Option<String>,
    summary: Option<String>,
    content: Option<String>,
    author: Option<String>,
    categories: Vec<String>,
    media_image: Option<String>,
    published: Option<DateTime<Utc>>,
    updated: Option<DateTime<Utc>>,
}

impl RawEntry {
    fn from_entry(entry: Entry) -> Self {
        // Enclosure links are attachments, not the article itself
        let link = entry
            .links
            .iter()
            .filter(|l| !l.href.trim().is_empty())
            .find(|l| l.rel.as_deref() != Some("enclosure"))
            .or_else(|| entry.links.iter().find(|l| !l.href.trim().is_empty()))
            .map(|l| l.href.trim().to_owned());

        let media_image = media_image(&entry);

        let author = entry
            .authors
            .iter()
            .map(|p| p.name.trim())
            .find(|name| !name.is_empty())
            .map(str::to_owned);

        let categories = entry
            .categories
            .iter()
            .map(|c| c.label.clone().unwrap_or_else(|| c.term.clone()))
            .collect();

        Self {
            id: entry.id,
            title: entry.title.map(|t| t.content),
            link,
            summary: entry.summary.map(|t| t.content),
            content: entry.content.and_then(|c| c.body),
            author,
            categories,
            media_image,
            published: entry.published,
            updated: entry.updated,
        }
    }
}

/// Media attachments in priority order: typed media content, thumbnails, enclosure links.
fn media_image(entry: &Entry) -> Option<String> {
    let from_content = entry
        .media
        .iter()
        .flat_map(|m| m.content.iter())
        .filter(|c| {
            c.content_type
                .as_ref()
                .is_some_and(|mime| mime.ty() == "image")
        })
        .find_map(|c| c.url.as_ref().map(|u| u.as_str().to_owned()));

    let from_thumbnail = || {
        entry
            .media
            .iter()
            .flat_map(|m| m.thumbnails.iter())
            .map(|t| t.image.uri.trim())
            .find(|uri| !uri.is_empty())
            .map(str::to_owned)
    };

    let from_links = || {
        entry
            .links
            .iter()
            .filter(|l| l.rel.as_deref() == Some("enclosure"))
            .filter(|l| {
                l.media_type
                    .as_deref()
                    .is_some_and(|t| t.to_ascii_lowercase().starts_with("image/"))
            })
            .map(|l| l.href.trim())
            .find(|href| !href.is_empty())
            .map(str::to_owned)
    };

    from_content
        .or_else(from_thumbnail)
        .or_else(from_links)
        .filter(|url| !url.is_empty())
}

/// Parse raw feed bytes into canonical articles for `feed_id`.
///
/// Accepts RSS 2.0, RSS 1.0 and Atom. The whole feed fails only when the
/// document itself cannot be parsed; individual entries without a link or id
/// are skipped, as are repeats of a URL already seen in this feed.
///
/// Missing dates default to `now` and mark the article `date_inferred`.
pub fn parse_feed(
    bytes: &[u8],
    feed_id: &str,
    sanitizer: &dyn HtmlSanitizer,
    now: DateTime<Utc>,
) -> Result<ParseResult, ParseError> {
    // Entries without an id get an empty one instead of a synthesized hash,
    // so "no link and no id" stays detectable.
    let parser = feed_rs::parser::Builder::new()
        .id_generator(|_links, _title, _uri| String::new())
        .build();
    let feed = parser.parse(bytes)?;

    let mut seen: HashSet<String> = HashSet::new();
    let mut articles = Vec::with_capacity(feed.entries.len());
    let mut skipped = 0;

    for entry in feed.entries {
        let raw = RawEntry::from_entry(entry);
        match normalize(raw, feed_id, sanitizer, now) {
            Some(article) if seen.insert(article.url.clone()) => articles.push(article),
            Some(article) => {
                tracing::debug!(feed_id = %feed_id, url = %article.url, "Skipping duplicate entry");
                skipped += 1;
            }
            None => skipped += 1,
        }
    }

    if skipped > 0 {
        tracing::warn!(feed_id = %feed_id, skipped = skipped, "Skipped unusable feed entries");
    }

    Ok(ParseResult { articles, skipped })
}

/// Turn one raw entry into a canonical article; `None` when it has no URL.
fn normalize(
    raw: RawEntry,
    feed_id: &str,
    sanitizer: &dyn HtmlSanitizer,
    now: DateTime<Utc>,
) -> Option<CanonicalArticle> {
    let id = raw.id.trim();
    let url = raw
        .link
        .or_else(|| (!id.is_empty()).then(|| id.to_owned()))?;

    let title = raw
        .title
        .as_deref()
        .and_then(|t| sanitizer.sanitize_title(t))
        .unwrap_or_else(|| CanonicalArticle::UNTITLED.to_owned());

    let summary_source = non_blank(raw.summary.as_deref()).or(non_blank(raw.content.as_deref()));
    let summary = summary_source.and_then(|s| sanitizer.sanitize(s));

    let image_url = raw
        .media_image
        .map(|img| crate::content::resolve_url(&img, &url))
        .or_else(|| {
            [raw.content.as_deref(), raw.summary.as_deref()]
                .into_iter()
                .flatten()
                .find_map(|html| sanitizer.extract_image(html, Some(&url)))
        });

    let author = raw
        .author
        .map(|a| sanitizer.decode_entities(&a).trim().to_owned())
        .filter(|a| !a.is_empty());

    let mut tags: Vec<String> = Vec::new();
    for category in &raw.categories {
        let tag = sanitizer.decode_entities(category).trim().to_owned();
        if !tag.is_empty() && !tags.contains(&tag) {
            tags.push(tag);
        }
    }

    let date_inferred = raw.published.is_none() && raw.updated.is_none();
    let published_at = raw.published.or(raw.updated).unwrap_or(now);
    let updated_at = raw.updated.or(raw.published).unwrap_or(now);

    Some(CanonicalArticle {
        feed_id: feed_id.to_owned(),
        title,
        url,
        published_at,
        updated_at,
        date_inferred,
        author,
        summary,
        image_url,
        tags: (!tags.is_empty()).then_some(tags),
    })
}

fn non_blank(text: Option<&str>) -> Option<&str> {
    text.filter(|t| !t.trim().is_empty())
}
