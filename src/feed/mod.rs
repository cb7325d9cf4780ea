//! Feed retrieval and normalization.
//!
//! - `fetcher` - one bounded HTTP GET per feed, with a body size cap
//! - `parser` - RSS 2.0 / RSS 1.0 / Atom into [`CanonicalArticle`]s via `feed-rs`
//!
//! [`CanonicalArticle`]: crate::storage::CanonicalArticle

mod fetcher;
mod parser;

pub use fetcher::{build_client, fetch_feed, FetchError, DEFAULT_MAX_FEED_BYTES, DEFAULT_USER_AGENT};
pub use parser::{parse_feed, ParseError, ParseResult};
