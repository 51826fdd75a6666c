//! Keyword tokenizing and the snapshot-scan match rule.

use crate::models::LocalizedName;

/// Lowercase the keyword and split it on whitespace.
pub fn tokenize(keyword: &str) -> Vec<String> {
    keyword
        .to_lowercase()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// Text the snapshot scan matches against: `lowercase(en + " " + zh)`.
pub fn name_text(name: &LocalizedName) -> String {
    format!("{} {}", name.en, name.zh).to_lowercase()
}

/// True when every char of `needle` occurs in `haystack` in the same order.
pub fn is_subsequence(needle: &str, haystack: &str) -> bool {
    let mut rest = haystack.chars();
    needle.chars().all(|c| rest.any(|h| h == c))
}

/// Every token must be a substring of `text` or, failing that, a subsequence.
pub fn matches_fuzzy(tokens: &[String], text: &str) -> bool {
    tokens
        .iter()
        .all(|token| text.contains(token.as_str()) || is_subsequence(token, text))
}
