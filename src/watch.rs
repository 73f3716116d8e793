// src/watch.rs
//! # Watch Registry
//!
//! The keywords under surveillance, each with an enabled flag and hit
//! statistics. Plain state: no locking and no I/O here. The processor keeps
//! it behind the same mutex as the sequencer so counters and sequence numbers
//! move together.
//!
//! Keywords are matched case-insensitively, so the registry keys on the
//! lowercased text while keeping the spelling it was registered with.

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct WatchKeyword {
    pub keyword: String,
    pub enabled: bool,
    pub hit_count: u64,
    pub last_hit: Option<DateTime<Utc>>,
}

impl WatchKeyword {
    fn new(keyword: &str) -> Self {
        Self {
            keyword: keyword.to_string(),
            enabled: true,
            hit_count: 0,
            last_hit: None,
        }
    }
}

/// Insertion-ordered keyword table.
#[derive(Debug, Clone, Default)]
pub struct WatchRegistry {
    entries: Vec<(String, WatchKeyword)>,
}

fn key_of(keyword: &str) -> String {
    keyword.trim().to_lowercase()
}

impl WatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_keywords<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut r = Self::new();
        for k in keywords {
            r.add(k.as_ref());
        }
        r
    }

    fn position(&self, keyword: &str) -> Option<usize> {
        let key = key_of(keyword);
        self.entries.iter().position(|(k, _)| *k == key)
    }

    /// Register an enabled keyword. Returns `false` for blanks and duplicates.
    pub fn add(&mut self, keyword: &str) -> bool {
        let key = key_of(keyword);
        if key.is_empty() || self.position(&key).is_some() {
            return false;
        }
        self.entries.push((key, WatchKeyword::new(keyword.trim())));
        true
    }

    pub fn get(&self, keyword: &str) -> Option<&WatchKeyword> {
        self.position(keyword).map(|i| &self.entries[i].1)
    }

    /// Flip the enabled flag; returns the new state, `None` if unknown.
    pub fn toggle(&mut self, keyword: &str) -> Option<bool> {
        let i = self.position(keyword)?;
        let kw = &mut self.entries[i].1;
        kw.enabled = !kw.enabled;
        Some(kw.enabled)
    }

    pub fn set_enabled(&mut self, keyword: &str, enabled: bool) -> bool {
        match self.position(keyword) {
            Some(i) => {
                self.entries[i].1.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Bump the hit statistics of a keyword. `false` if unknown.
    pub fn record_hit(&mut self, keyword: &str, at: DateTime<Utc>) -> bool {
        match self.position(keyword) {
            Some(i) => {
                let kw = &mut self.entries[i].1;
                kw.hit_count += 1;
                kw.last_hit = Some(at);
                true
            }
            None => false,
        }
    }

    /// Lowercased texts of enabled keywords, in registration order.
    pub fn enabled_keys(&self) -> impl Iterator<Item = (&str, &WatchKeyword)> {
        self.entries
            .iter()
            .filter(|(_, kw)| kw.enabled)
            .map(|(k, kw)| (k.as_str(), kw))
    }

    /// Clear hit statistics; enabled flags survive.
    pub fn reset_counters(&mut self) {
        for (_, kw) in &mut self.entries {
            kw.hit_count = 0;
            kw.last_hit = None;
        }
    }

    pub fn snapshot(&self) -> Vec<WatchKeyword> {
        self.entries.iter().map(|(_, kw)| kw.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn lookups_are_case_insensitive_and_keep_spelling() {
        let mut r = WatchRegistry::with_keywords(["Cyber", "cyber ", "corruption", ""]);
        assert_eq!(r.len(), 2);
        assert_eq!(r.get("CYBER").unwrap().keyword, "Cyber");
        assert_eq!(r.toggle("cYbEr"), Some(false));
        assert_eq!(r.toggle("missing"), None);
    }

    #[test]
    fn disabled_keywords_are_not_enabled_keys() {
        let mut r = WatchRegistry::with_keywords(["cyber", "fraud"]);
        r.set_enabled("fraud", false);
        let keys: Vec<&str> = r.enabled_keys().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["cyber"]);
    }

    #[test]
    fn reset_keeps_flags() {
        let at = Utc.with_ymd_and_hms(2025, 3, 4, 10, 0, 0).unwrap();
        let mut r = WatchRegistry::with_keywords(["cyber"]);
        r.record_hit("cyber", at);
        r.toggle("cyber");
        r.reset_counters();
        let kw = r.get("cyber").unwrap();
        assert_eq!((kw.hit_count, kw.last_hit, kw.enabled), (0, None, false));
    }
}
