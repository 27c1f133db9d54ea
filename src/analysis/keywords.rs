//! Keyword normalization and fallback naming

use std::collections::HashSet;
use std::path::Path;

/// Words that carry no search value in a filename
const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "but", "of", "in", "on", "at", "to", "for", "with", "by",
    "from", "into", "over", "under", "is", "are", "was", "were", "be", "this", "that", "these",
    "those", "it", "its", "as",
];

const MAX_STEM_LEN: usize = 30;

/// Turn free-form text into lowercase alphanumeric tokens
fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
}

fn dedupe(tokens: impl Iterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    tokens.filter(|token| seen.insert(token.clone())).collect()
}

/// Normalize a backend reply into at most `max_keywords` unique tokens
///
/// Models sometimes wrap the answer in quotes or add an explanatory line; the
/// first line that looks like a hyphenated keyword list (three or more parts)
/// wins, otherwise the whole reply is tokenized.
pub fn normalize_response(response: &str, max_keywords: usize) -> Vec<String> {
    let cleaned = response
        .trim()
        .trim_matches(|c| matches!(c, '"' | '\'' | '`'))
        .to_lowercase();

    let chosen = cleaned
        .lines()
        .map(str::trim)
        .find(|line| line.contains('-') && line.split('-').count() >= 3)
        .unwrap_or(&cleaned);

    let tokens = tokenize(chosen).filter(|token| !STOP_WORDS.contains(&token.as_str()));

    let mut keywords = dedupe(tokens);
    keywords.truncate(max_keywords);
    keywords
}

/// Deterministic name tokens for when analysis is unavailable
///
/// `[prefix, stem tokens..., timestamp]`; the original stem is cut to 30
/// characters and ignored when it is too short to say anything.
pub fn fallback_keywords(prefix: &str, source: &Path, timestamp: i64) -> Vec<String> {
    let mut tokens: Vec<String> = tokenize(prefix).collect();
    if tokens.is_empty() {
        tokens.push("image".to_string());
    }

    let stem = source
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_lowercase();
    let stem: String = stem.chars().take(MAX_STEM_LEN).collect();
    let stem_tokens: Vec<String> = tokenize(&stem).collect();

    if stem_tokens.join("-").len() > 2 {
        tokens.extend(stem_tokens);
    }

    tokens.push(timestamp.to_string());
    dedupe(tokens.into_iter())
}
