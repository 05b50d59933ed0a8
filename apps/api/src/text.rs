//! Text cleaning helpers shared by the cache key derivation, keyword analysis
//! and gap prompt construction. Everything here is pure.

use std::sync::LazyLock;

use regex::Regex;

static MARKUP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->|<[^>]*>").expect("markup pattern is valid"));

static ENTITY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&(nbsp|amp|lt|gt|quot|#39);").expect("entity pattern is valid"));

/// Strips HTML/XML tags and the handful of entities that show up in pasted
/// job descriptions, then collapses whitespace runs to a single space.
pub fn clean_markup(text: &str) -> String {
    let without_tags = MARKUP_RE.replace_all(text, " ");
    let decoded = ENTITY_RE.replace_all(&without_tags, |caps: &regex::Captures| {
        match &caps[1] {
            "nbsp" => " ",
            "amp" => "&",
            "lt" => "<",
            "gt" => ">",
            "quot" => "\"",
            _ => "'",
        }
        .to_string()
    });
    collapse_whitespace(&decoded)
}

/// Canonical form used for content hashing: cleaned, collapsed, lowercased.
pub fn normalize_content(text: &str) -> String {
    clean_markup(text).to_lowercase()
}

pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Truncates to at most `max_chars` characters without splitting a code point.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
