use regex::Regex;
use std::sync::OnceLock;

/// Elements whose content is dropped along with the tags themselves.
const REMOVED_ELEMENTS: &[&str] = &["script", "style", "noscript", "nav", "header", "footer"];

/// Capability used by the parser to turn entry markup into plain text.
///
/// All methods are pure: no network access, no shared state.
pub trait HtmlSanitizer: Send + Sync {
    /// Strip markup to plain text. Returns `None` when nothing readable remains.
    fn sanitize(&self, html: &str) -> Option<String>;

    /// Strip markup from a title. Defaults to [`HtmlSanitizer::sanitize`].
    fn sanitize_title(&self, html: &str) -> Option<String> {
        self.sanitize(html)
    }

    /// Best-effort preview image: first `<img src>`, then `og:image`, then `twitter:image`.
    fn extract_image(&self, html: &str, base_url: Option<&str>) -> Option<String>;

    /// Resolve named and numeric character references.
    fn decode_entities(&self, text: &str) -> String {
        decode_entities(text)
    }
}

/// Regex-driven sanitizer. Tolerant of malformed markup, not a full HTML parser.
#[derive(Debug, Default, Clone, Copy)]
pub struct RegexSanitizer;

impl HtmlSanitizer for RegexSanitizer {
    fn sanitize(&self, html: &str) -> Option<String> {
        sanitize(html)
    }

    fn sanitize_title(&self, html: &str) -> Option<String> {
        sanitize_title(html)
    }

    fn extract_image(&self, html: &str, base_url: Option<&str>) -> Option<String> {
        extract_image(html, base_url)
    }
}

// ============================================================================
// Patterns
// ============================================================================

struct Patterns {
    comments: Regex,
    removed: Vec<Regex>,
    unterminated: Regex,
    inline_tags: Regex,
    any_tag: Regex,
    whitespace: Regex,
    img_tag: Regex,
    meta_tag: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        comments: compile(r"(?s)<!--.*?(?:-->|\z)"),
        removed: REMOVED_ELEMENTS
            .iter()
            .map(|name| compile(&format!(r"(?is)<{name}\b[^>]*>.*?</{name}\s*>")))
            .collect(),
        unterminated: compile(r"(?is)<(?:script|style)\b[^>]*>.*\z"),
        inline_tags: compile(
            r"(?i)</?(?:a|b|i|u|em|strong|span|sub|sup|code|small|big)(?:\s[^>]*)?/?>",
        ),
        any_tag: compile(r"(?s)<[!/?]?[a-zA-Z][^>]*>"),
        whitespace: compile(r"\s+"),
        img_tag: compile(r"(?is)<img\b[^>]*>"),
        meta_tag: compile(r"(?is)<meta\b[^>]*>"),
    })
}

// The patterns are fixed literals; a failure here is a programming error caught by the unit tests.
fn compile(pattern: &str) -> Regex {
    match Regex::new(pattern) {
        Ok(re) => re,
        Err(e) => panic!("invalid built-in pattern {pattern:?}: {e}"),
    }
}

fn attr_pattern(name: &str) -> &'static Regex {
    static SRC: OnceLock<Regex> = OnceLock::new();
    static CONTENT: OnceLock<Regex> = OnceLock::new();
    static PROPERTY: OnceLock<Regex> = OnceLock::new();
    static NAME: OnceLock<Regex> = OnceLock::new();

    let cell = match name {
        "src" => &SRC,
        "content" => &CONTENT,
        "property" => &PROPERTY,
        _ => &NAME,
    };
    // The leading whitespace requirement keeps `data-src` from matching `src`
    cell.get_or_init(|| {
        compile(&format!(
            r#"(?is)\s{name}\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#
        ))
    })
}

// ============================================================================
// Operations
// ============================================================================

/// Strip markup from `html`, returning plain text or `None` when nothing is left.
///
/// Comments and the content of script/style/noscript/nav/header/footer elements
/// are removed. Inline formatting tags are unwrapped in place; any other tag
/// becomes a word boundary. Entities are decoded last, and anything tag-shaped
/// that decoding reveals is stripped again.
///
/// ```
/// use noctua::content::sanitize;
///
/// assert_eq!(
///     sanitize("<p>Hello <b>wor</b>ld</p><script>x()</script>").as_deref(),
///     Some("Hello world")
/// );
/// assert_eq!(sanitize("<br/>   "), None);
/// ```
pub fn sanitize(html: &str) -> Option<String> {
    clean(html, false)
}

/// Like [`sanitize`], but a `<` or `>` that is not part of a tag is kept.
///
/// ```
/// use noctua::content::sanitize_title;
///
/// assert_eq!(sanitize_title("C++ <3 <b>Rust</b>").as_deref(), Some("C++ <3 Rust"));
/// ```
pub fn sanitize_title(html: &str) -> Option<String> {
    clean(html, true)
}

fn clean(html: &str, keep_literal_angles: bool) -> Option<String> {
    if html.trim().is_empty() {
        return None;
    }

    let p = patterns();
    let mut text = p.comments.replace_all(html, " ").into_owned();
    for re in &p.removed {
        text = re.replace_all(&text, " ").into_owned();
    }
    text = p.unterminated.replace_all(&text, " ").into_owned();
    text = strip_tags(&text);

    let mut decoded = decode_entities(&text);
    if decoded.contains('<') {
        decoded = strip_tags(&decoded);
    }

    let cleaned: String = decoded
        .chars()
        .filter_map(|c| match c {
            '<' | '>' if !keep_literal_angles => None,
            c if c.is_whitespace() => Some(' '),
            c if c.is_control() => None,
            c => Some(c),
        })
        .collect();

    let collapsed = p.whitespace.replace_all(&cleaned, " ");
    let trimmed = collapsed.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_owned())
    }
}

fn strip_tags(text: &str) -> String {
    let p = patterns();
    let unwrapped = p.inline_tags.replace_all(text, "");
    p.any_tag.replace_all(&unwrapped, " ").into_owned()
}

/// Resolve named (`&amp;`) and numeric (`&#128049;`, `&#x1F989;`) references.
///
/// ```
/// use noctua::content::decode_entities;
///
/// assert_eq!(decode_entities("&#128049;"), "\u{1F431}");
/// assert_eq!(decode_entities("Fish &amp; Chips"), "Fish & Chips");
/// ```
pub fn decode_entities(text: &str) -> String {
    html_escape::decode_html_entities(text).into_owned()
}

/// Find a preview image in `html`.
///
/// Priority: the first `<img>` with a usable `src`, then the `og:image` meta
/// content, then `twitter:image`. Relative URLs are resolved against
/// `base_url` when one is given. Inline `data:` URIs are skipped.
pub fn extract_image(html: &str, base_url: Option<&str>) -> Option<String> {
    let p = patterns();

    let from_img = p
        .img_tag
        .find_iter(html)
        .filter_map(|tag| attr_value(tag.as_str(), "src"))
        .find(|src| is_usable_image(src));

    from_img
        .or_else(|| meta_image(html, "og:image"))
        .or_else(|| meta_image(html, "twitter:image"))
        .map(|raw| match base_url {
            Some(base) => resolve_url(&raw, base),
            None => raw,
        })
}

fn meta_image(html: &str, key: &str) -> Option<String> {
    patterns()
        .meta_tag
        .find_iter(html)
        .map(|m| m.as_str())
        .filter(|tag| {
            ["property", "name"].iter().any(|attr| {
                attr_value(tag, attr).is_some_and(|v| v.eq_ignore_ascii_case(key))
            })
        })
        .filter_map(|tag| attr_value(tag, "content"))
        .find(|content| is_usable_image(content))
}

/// Extracts an attribute value from a single tag, entity-decoded and trimmed.
fn attr_value(tag: &str, name: &str) -> Option<String> {
    let caps = attr_pattern(name).captures(tag)?;
    let raw = caps
        .get(1)
        .or_else(|| caps.get(2))
        .or_else(|| caps.get(3))?
        .as_str();
    Some(decode_entities(raw).trim().to_owned())
}

fn is_usable_image(url: &str) -> bool {
    !url.is_empty() && !url.to_ascii_lowercase().starts_with("data:")
}

/// Resolves a potentially relative URL against a base URL.
pub(crate) fn resolve_url(href: &str, base_url: &str) -> String {
    // Already absolute
    if href.starts_with("http://") || href.starts_with("https://") {
        return href.to_owned();
    }

    // Protocol-relative: parse so the result is normalized
    if href.starts_with("//") {
        if let Ok(parsed) = url::Url::parse(&format!("https:{}", href)) {
            return parsed.to_string();
        }
    }

    if let Ok(base) = url::Url::parse(base_url) {
        if let Ok(resolved) = base.join(href) {
            return resolved.to_string();
        }
    }

    // Fallback: return as-is
    href.to_owned()
}
