use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A rule blob could not be decoded. Never fatal: callers fall back to no filtering.
#[derive(Debug, Error)]
pub enum FilterConfigError {
    #[error("Malformed filter rules: {0}")]
    Malformed(#[from] serde_json::Error),
}

// ============================================================================
// Cascading configuration
// ============================================================================

/// One layer of filter configuration (global, section, or feed).
///
/// Every category is optional. When a layer sets a category it replaces the
/// inherited value for that category outright; unset categories fall through.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct FilterConfig {
    pub exclude_title_keywords: Option<Vec<String>>,
    pub exclude_summary_keywords: Option<Vec<String>>,
    pub include_url_substrings: Option<Vec<String>>,
    pub exclude_url_substrings: Option<Vec<String>>,
    pub require_keywords: Option<Vec<String>>,
    pub max_age_hours: Option<u64>,
    pub deduplicate: Option<bool>,
}

impl FilterConfig {
    /// Layer `child` over `self`: categories `child` sets win, the rest are inherited.
    pub fn overlay(&self, child: &FilterConfig) -> FilterConfig {
        FilterConfig {
            exclude_title_keywords: child
                .exclude_title_keywords
                .clone()
                .or_else(|| self.exclude_title_keywords.clone()),
            exclude_summary_keywords: child
                .exclude_summary_keywords
                .clone()
                .or_else(|| self.exclude_summary_keywords.clone()),
            include_url_substrings: child
                .include_url_substrings
                .clone()
                .or_else(|| self.include_url_substrings.clone()),
            exclude_url_substrings: child
                .exclude_url_substrings
                .clone()
                .or_else(|| self.exclude_url_substrings.clone()),
            require_keywords: child
                .require_keywords
                .clone()
                .or_else(|| self.require_keywords.clone()),
            max_age_hours: child.max_age_hours.or(self.max_age_hours),
            deduplicate: child.deduplicate.or(self.deduplicate),
        }
    }

    /// Resolve global → section → feed into the rule set a feed runs with.
    pub fn cascade(
        global: Option<&FilterConfig>,
        section: Option<&FilterConfig>,
        feed: Option<&FilterConfig>,
    ) -> FilterRuleSet {
        [global, section, feed]
            .into_iter()
            .flatten()
            .fold(FilterConfig::default(), |acc, layer| acc.overlay(layer))
            .into_rule_set()
    }

    /// Flatten into a rule set; unset categories become empty.
    pub fn into_rule_set(self) -> FilterRuleSet {
        FilterRuleSet {
            exclude_title_keywords: self.exclude_title_keywords.unwrap_or_default(),
            exclude_summary_keywords: self.exclude_summary_keywords.unwrap_or_default(),
            include_url_substrings: self.include_url_substrings.unwrap_or_default(),
            exclude_url_substrings: self.exclude_url_substrings.unwrap_or_default(),
            require_keywords: self.require_keywords.unwrap_or_default(),
            max_age_hours: self.max_age_hours,
            deduplicate: self.deduplicate,
        }
        .normalized()
    }
}

// ============================================================================
// Resolved rule set
// ============================================================================

/// The resolved, immutable rules for one feed.
///
/// Stored as the feed's JSON blob in the registry. Both `snake_case` and
/// `camelCase` keys are accepted when decoding.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct FilterRuleSet {
    #[serde(alias = "excludeTitleKeywords")]
    pub exclude_title_keywords: Vec<String>,
    #[serde(alias = "excludeSummaryKeywords")]
    pub exclude_summary_keywords: Vec<String>,
    #[serde(alias = "includeURLSubstrings", alias = "includeUrlSubstrings")]
    pub include_url_substrings: Vec<String>,
    #[serde(alias = "excludeURLSubstrings", alias = "excludeUrlSubstrings")]
    pub exclude_url_substrings: Vec<String>,
    #[serde(alias = "requireKeywords")]
    pub require_keywords: Vec<String>,
    #[serde(alias = "maxAgeHours", skip_serializing_if = "Option::is_none")]
    pub max_age_hours: Option<u64>,
    /// Drop repeats by normalized URL or title; unset means on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deduplicate: Option<bool>,
}

impl FilterRuleSet {
    /// Decode a rule blob. Blank entries are dropped, the rest trimmed.
    pub fn from_json(json: &str) -> Result<Self, FilterConfigError> {
        let rules: FilterRuleSet = serde_json::from_str(json)?;
        Ok(rules.normalized())
    }

    /// Decode the registry blob for `feed_id`, degrading to no filtering on error.
    ///
    /// A missing or blank blob is the empty rule set. A malformed one is logged
    /// and also treated as empty.
    pub fn from_blob_or_empty(feed_id: &str, blob: Option<&str>) -> Self {
        let Some(json) = blob.map(str::trim).filter(|s| !s.is_empty()) else {
            return Self::default();
        };

        match Self::from_json(json) {
            Ok(rules) => rules,
            Err(e) => {
                tracing::warn!(feed_id = %feed_id, error = %e, "Ignoring malformed filter rules");
                Self::default()
            }
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Whether repeated entries are dropped. On unless explicitly disabled.
    pub fn dedupes(&self) -> bool {
        self.deduplicate.unwrap_or(true)
    }

    /// True when no category is set; such a rule set still deduplicates.
    pub fn is_empty(&self) -> bool {
        self.exclude_title_keywords.is_empty()
            && self.exclude_summary_keywords.is_empty()
            && self.include_url_substrings.is_empty()
            && self.exclude_url_substrings.is_empty()
            && self.require_keywords.is_empty()
            && self.max_age_hours.is_none()
            && self.deduplicate.is_none()
    }

    fn normalized(self) -> Self {
        fn clean(values: Vec<String>) -> Vec<String> {
            values
                .into_iter()
                .map(|v| v.trim().to_owned())
                .filter(|v| !v.is_empty())
                .collect()
        }

        Self {
            exclude_title_keywords: clean(self.exclude_title_keywords),
            exclude_summary_keywords: clean(self.exclude_summary_keywords),
            include_url_substrings: clean(self.include_url_substrings),
            exclude_url_substrings: clean(self.exclude_url_substrings),
            require_keywords: clean(self.require_keywords),
            max_age_hours: self.max_age_hours,
            deduplicate: self.deduplicate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn words(items: &[&str]) -> Option<Vec<String>> {
        Some(items.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn test_feed_category_replaces_inherited_category() {
        let global = FilterConfig {
            exclude_title_keywords: words(&["sponsored", "ad"]),
            ..Default::default()
        };
        let feed = FilterConfig {
            exclude_title_keywords: words(&["podcast"]),
            ..Default::default()
        };

        let rules = FilterConfig::cascade(Some(&global), None, Some(&feed));
        assert_eq!(rules.exclude_title_keywords, vec!["podcast"]);
    }

    #[test]
    fn test_unset_categories_fall_through_each_level() {
        let global = FilterConfig {
            exclude_title_keywords: words(&["sponsored"]),
            max_age_hours: Some(72),
            ..Default::default()
        };
        let section = FilterConfig {
            include_url_substrings: words(&["/tech/"]),
            ..Default::default()
        };
        let feed = FilterConfig {
            exclude_url_substrings: words(&["/jobs/"]),
            ..Default::default()
        };

        let rules = FilterConfig::cascade(Some(&global), Some(&section), Some(&feed));
        assert_eq!(
            rules,
            FilterRuleSet {
                exclude_title_keywords: vec!["sponsored".into()],
                include_url_substrings: vec!["/tech/".into()],
                exclude_url_substrings: vec!["/jobs/".into()],
                max_age_hours: Some(72),
                ..Default::default()
            }
        );
    }

    #[test]
    fn test_explicit_empty_list_clears_inherited_category() {
        let section = FilterConfig {
            exclude_title_keywords: words(&["sponsored"]),
            ..Default::default()
        };
        let feed = FilterConfig {
            exclude_title_keywords: Some(Vec::new()),
            ..Default::default()
        };
        let rules = FilterConfig::cascade(None, Some(&section), Some(&feed));
        assert!(rules.exclude_title_keywords.is_empty());
    }

    #[test]
    fn test_cascade_with_no_layers_is_empty() {
        let rules = FilterConfig::cascade(None, None, None);
        assert!(rules.is_empty());
        assert!(rules.dedupes());
    }

    #[test]
    fn test_feed_can_disable_deduplication() {
        let global = FilterConfig {
            deduplicate: Some(true),
            ..Default::default()
        };
        let feed = FilterConfig {
            deduplicate: Some(false),
            ..Default::default()
        };

        let rules = FilterConfig::cascade(Some(&global), None, Some(&feed));
        assert!(!rules.dedupes());
        assert!(!rules.is_empty());

        let json = rules.to_json().unwrap();
        assert!(!FilterRuleSet::from_json(&json).unwrap().dedupes());
    }

    #[test]
    fn test_from_json_accepts_camel_case_keys() {
        let rules = FilterRuleSet::from_json(
            r#"{"excludeTitleKeywords":["Sponsored"],"includeURLSubstrings":["/tech/"],"maxAgeHours":24}"#,
        )
        .unwrap();
        assert_eq!(rules.exclude_title_keywords, vec!["Sponsored"]);
        assert_eq!(rules.include_url_substrings, vec!["/tech/"]);
        assert_eq!(rules.max_age_hours, Some(24));
    }

    #[test]
    fn test_from_json_drops_blank_keywords() {
        let rules =
            FilterRuleSet::from_json(r#"{"exclude_title_keywords":["", "  ", " deal "]}"#).unwrap();
        assert_eq!(rules.exclude_title_keywords, vec!["deal"]);
    }

    #[test]
    fn test_malformed_blob_degrades_to_empty() {
        let rules = FilterRuleSet::from_blob_or_empty("feed-1", Some("{not json"));
        assert!(rules.is_empty());

        let wrong_shape =
            FilterRuleSet::from_blob_or_empty("feed-1", Some(r#"{"exclude_title_keywords":"x"}"#));
        assert!(wrong_shape.is_empty());
    }

    #[test]
    fn test_missing_blob_is_empty() {
        assert!(FilterRuleSet::from_blob_or_empty("feed-1", None).is_empty());
        assert!(FilterRuleSet::from_blob_or_empty("feed-1", Some("  ")).is_empty());
    }

    #[test]
    fn test_json_round_trip() {
        let rules = FilterRuleSet {
            exclude_summary_keywords: vec!["webinar".into()],
            require_keywords: vec!["rust".into()],
            ..Default::default()
        };
        let json = rules.to_json().unwrap();
        assert_eq!(FilterRuleSet::from_json(&json).unwrap(), rules);
    }

    #[test]
    fn test_filter_config_deserializes_from_toml() {
        let config: FilterConfig = toml::from_str(
            r#"
            exclude_title_keywords = ["sponsored"]
            max_age_hours = 48
        "#,
        )
        .unwrap();
        assert_eq!(config.exclude_title_keywords, words(&["sponsored"]));
        assert_eq!(config.max_age_hours, Some(48));
        assert_eq!(config.include_url_substrings, None);
    }
}
