use chrono::{DateTime, Utc};
use regex::Regex;
use std::collections::HashSet;
use std::fmt;
use std::sync::OnceLock;

use super::rules::FilterRuleSet;
use crate::storage::CanonicalArticle;

/// Why an article was dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterReason {
    TitleKeyword(String),
    SummaryKeyword(String),
    MissingUrlSubstring(String),
    ExcludedUrlSubstring(String),
    MissingRequiredKeyword,
    TooOld { age_hours: i64, max_age_hours: u64 },
    /// Same URL as an earlier kept entry, ignoring case and a trailing `/`
    DuplicateUrl,
    /// Same title as an earlier kept entry, ignoring case, punctuation and spacing
    DuplicateTitle,
}

impl fmt::Display for FilterReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterReason::TitleKeyword(k) => write!(f, "title contains excluded keyword {k:?}"),
            FilterReason::SummaryKeyword(k) => {
                write!(f, "summary contains excluded keyword {k:?}")
            }
            FilterReason::MissingUrlSubstring(s) => write!(f, "URL lacks required part {s:?}"),
            FilterReason::ExcludedUrlSubstring(s) => write!(f, "URL contains excluded part {s:?}"),
            FilterReason::MissingRequiredKeyword => write!(f, "no required keyword present"),
            FilterReason::TooOld {
                age_hours,
                max_age_hours,
            } => write!(f, "published {age_hours}h ago, limit is {max_age_hours}h"),
            FilterReason::DuplicateUrl => write!(f, "duplicate URL"),
            FilterReason::DuplicateTitle => write!(f, "duplicate title"),
        }
    }
}

/// Result of running one feed's entries through its rule set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterOutcome {
    pub kept: Vec<CanonicalArticle>,
    pub total: usize,
    pub filtered_out: usize,
}

/// Apply `rules` to `entries`, evaluating age limits against the current time.
pub fn apply(entries: Vec<CanonicalArticle>, rules: &FilterRuleSet) -> FilterOutcome {
    apply_at(entries, rules, Utc::now())
}

/// Apply `rules` to `entries` with an explicit evaluation time.
///
/// Order of kept entries is preserved. With deduplication on, an entry that
/// passes the rules is still dropped when it repeats an earlier kept entry.
pub fn apply_at(
    entries: Vec<CanonicalArticle>,
    rules: &FilterRuleSet,
    now: DateTime<Utc>,
) -> FilterOutcome {
    let total = entries.len();
    let prepared = PreparedRules::new(rules);
    let mut seen = rules.dedupes().then(SeenEntries::default);

    let kept: Vec<CanonicalArticle> = entries
        .into_iter()
        .filter(|article| {
            let reason = prepared
                .evaluate(article, now)
                .or_else(|| seen.as_mut().and_then(|s| s.check(article)));
            match reason {
                Some(reason) => {
                    tracing::debug!(
                        feed_id = %article.feed_id,
                        url = %article.url,
                        reason = %reason,
                        "Article filtered out"
                    );
                    false
                }
                None => true,
            }
        })
        .collect();

    FilterOutcome {
        filtered_out: total - kept.len(),
        kept,
        total,
    }
}

/// Evaluate a single article; `None` means it is kept.
pub fn evaluate(
    article: &CanonicalArticle,
    rules: &FilterRuleSet,
    now: DateTime<Utc>,
) -> Option<FilterReason> {
    PreparedRules::new(rules).evaluate(article, now)
}

/// Rule set with every needle lowercased once.
struct PreparedRules<'a> {
    source: &'a FilterRuleSet,
    exclude_title: Vec<String>,
    exclude_summary: Vec<String>,
    include_url: Vec<String>,
    exclude_url: Vec<String>,
    require: Vec<String>,
}

impl<'a> PreparedRules<'a> {
    fn new(rules: &'a FilterRuleSet) -> Self {
        fn lower(values: &[String]) -> Vec<String> {
            values.iter().map(|v| v.to_lowercase()).collect()
        }

        Self {
            source: rules,
            exclude_title: lower(&rules.exclude_title_keywords),
            exclude_summary: lower(&rules.exclude_summary_keywords),
            include_url: lower(&rules.include_url_substrings),
            exclude_url: lower(&rules.exclude_url_substrings),
            require: lower(&rules.require_keywords),
        }
    }

    fn evaluate(&self, article: &CanonicalArticle, now: DateTime<Utc>) -> Option<FilterReason> {
        let rules = self.source;
        let title = article.title.to_lowercase();
        let summary = article
            .summary
            .as_deref()
            .map(str::to_lowercase)
            .unwrap_or_default();
        let url = article.url.to_lowercase();

        if let Some(i) = first_match(&self.exclude_title, &title) {
            return Some(FilterReason::TitleKeyword(rules.exclude_title_keywords[i].clone()));
        }

        if let Some(i) = first_match(&self.exclude_summary, &summary) {
            return Some(FilterReason::SummaryKeyword(
                rules.exclude_summary_keywords[i].clone(),
            ));
        }

        // Conjunctive: every listed part must be present
        if let Some(i) = self.include_url.iter().position(|part| !url.contains(part)) {
            return Some(FilterReason::MissingUrlSubstring(
                rules.include_url_substrings[i].clone(),
            ));
        }

        if let Some(i) = first_match(&self.exclude_url, &url) {
            return Some(FilterReason::ExcludedUrlSubstring(
                rules.exclude_url_substrings[i].clone(),
            ));
        }

        if !self.require.is_empty()
            && first_match(&self.require, &title).is_none()
            && first_match(&self.require, &summary).is_none()
        {
            return Some(FilterReason::MissingRequiredKeyword);
        }

        // An inferred date is the ingestion time and says nothing about age
        if let (Some(max_age_hours), false) = (rules.max_age_hours, article.date_inferred) {
            let age = now.signed_duration_since(article.published_at);
            let limit_secs = i64::try_from(max_age_hours)
                .unwrap_or(i64::MAX)
                .saturating_mul(3600);
            if age.num_seconds() > limit_secs {
                return Some(FilterReason::TooOld {
                    age_hours: age.num_hours(),
                    max_age_hours,
                });
            }
        }

        None
    }
}

/// URL and title keys of the entries kept so far.
#[derive(Default)]
struct SeenEntries {
    urls: HashSet<String>,
    titles: HashSet<String>,
}

impl SeenEntries {
    /// Record `article` unless it repeats an earlier one.
    fn check(&mut self, article: &CanonicalArticle) -> Option<FilterReason> {
        let url_key = url_key(&article.url);
        if self.urls.contains(&url_key) {
            return Some(FilterReason::DuplicateUrl);
        }

        // Placeholder and punctuation-only titles never count as repeats
        let title_key = (article.title != CanonicalArticle::UNTITLED)
            .then(|| title_key(&article.title))
            .filter(|key| !key.is_empty());
        if let Some(key) = &title_key {
            if self.titles.contains(key) {
                return Some(FilterReason::DuplicateTitle);
            }
        }

        self.urls.insert(url_key);
        if let Some(key) = title_key {
            self.titles.insert(key);
        }
        None
    }
}

fn url_key(url: &str) -> String {
    url.trim().to_lowercase().trim_end_matches('/').to_owned()
}

fn title_key(title: &str) -> String {
    static PUNCTUATION: OnceLock<Regex> = OnceLock::new();
    static WHITESPACE: OnceLock<Regex> = OnceLock::new();
    let punctuation = PUNCTUATION.get_or_init(|| compile(r"[^\w\s]"));
    let whitespace = WHITESPACE.get_or_init(|| compile(r"\s+"));

    let lowered = title.to_lowercase();
    let stripped = punctuation.replace_all(&lowered, "");
    whitespace.replace_all(&stripped, " ").trim().to_owned()
}

fn compile(pattern: &str) -> Regex {
    match Regex::new(pattern) {
        Ok(re) => re,
        Err(e) => panic!("invalid built-in pattern {pattern:?}: {e}"),
    }
}

fn first_match(needles: &[String], haystack: &str) -> Option<usize> {
    needles.iter().position(|needle| haystack.contains(needle.as_str()))
}
