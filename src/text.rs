//! Text normalization for scraped wiki content.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref RE_REFERENCES: Regex = Regex::new(r"\[\d+\]").unwrap();
    static ref RE_TEMPLATES: Regex = Regex::new(r"\{\{.*?\}\}").unwrap();
    static ref RE_TAGS: Regex = Regex::new(r"<.*?>").unwrap();
    static ref RE_WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
}

/// Normalize an HTML-adjacent text fragment into plain prose: drop numeric
/// reference markers, wiki template markup, and residual tags, then collapse
/// all whitespace runs to single spaces.
pub fn clean_text(text: &str) -> String {
    let text = RE_REFERENCES.replace_all(text, "");
    let text = RE_TEMPLATES.replace_all(&text, "");
    let text = RE_TAGS.replace_all(&text, "");
    let text = text.replace(['\n', '\t'], " ");
    RE_WHITESPACE.replace_all(&text, " ").trim().to_string()
}

/// First `max` characters of `s`. Field budgets are character counts, so
/// slicing must never land inside a multi-byte sequence.
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Last `max` characters of `s`.
pub fn tail_chars(s: &str, max: usize) -> &str {
    let len = s.chars().count();
    if len <= max {
        return s;
    }
    match s.char_indices().nth(len - max) {
        Some((idx, _)) => &s[idx..],
        None => s,
    }
}
