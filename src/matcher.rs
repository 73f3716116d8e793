// src/matcher.rs
//! Keyword matcher: case-insensitive substring containment over title + body.

use std::collections::BTreeSet;

use crate::ingest::types::NormalizedItem;
use crate::watch::WatchRegistry;

/// Enabled keywords contained in the item, one entry per keyword, in
/// registration order. Returned texts are the registered spellings.
pub fn match_item(item: &NormalizedItem, registry: &WatchRegistry) -> Vec<String> {
    match_scoped(item, registry, None)
}

/// As `match_item`, restricted to `scope` (lowercased keys) when it is non-empty.
pub fn match_scoped(
    item: &NormalizedItem,
    registry: &WatchRegistry,
    scope: Option<&BTreeSet<String>>,
) -> Vec<String> {
    let haystack = item.combined_text().to_lowercase();
    let scope = scope.filter(|s| !s.is_empty());
    registry
        .enabled_keys()
        .filter(|(key, _)| scope.map_or(true, |s| s.contains(*key)))
        .filter(|(key, _)| haystack.contains(key))
        .map(|(_, kw)| kw.keyword.clone())
        .collect()
}

/// Short excerpt around the first occurrence of `keyword`, on char boundaries.
pub fn snippet(text: &str, keyword: &str, radius: usize) -> String {
    let lower = text.to_lowercase();
    let needle = keyword.trim().to_lowercase();
    let chars: Vec<char> = text.chars().collect();
    // Lowercasing can change byte lengths, so locate by char index.
    let hit_char = lower
        .find(&needle)
        .map(|byte| lower[..byte].chars().count())
        .unwrap_or(0);
    let start = hit_char.saturating_sub(radius);
    let end = (hit_char + needle.chars().count() + radius).min(chars.len());
    let start = start.min(end);
    let excerpt: String = chars[start..end].iter().collect();
    let mut out = excerpt.trim().to_string();
    if start > 0 {
        out.insert_str(0, "...");
    }
    if end < chars.len() {
        out.push_str("...");
    }
    out
}
