//! Markup handling for entry titles, summaries and preview images.
//!
//! - [`sanitize`] strips HTML to plain text
//! - [`sanitize_title`] does the same but keeps literal `<` and `>`
//! - [`decode_entities`] resolves named and numeric character references
//! - [`extract_image`] finds a preview image in entry markup
//!
//! The parser consumes these through the [`HtmlSanitizer`] trait so an
//! alternative implementation can be swapped in.

mod sanitizer;

pub use sanitizer::{
    decode_entities, extract_image, sanitize, sanitize_title, HtmlSanitizer, RegexSanitizer,
};
pub(crate) use sanitizer::resolve_url;
