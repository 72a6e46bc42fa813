//! Short-lived cache for expensive rac queries.
//!
//! Several collectors need the same listing within one scrape (sessions and
//! licenses both read `session list`). A small TTL window coalesces those
//! into a single rac invocation. Callers perform their own check-then-populate;
//! the cache itself only stores and expires.

use ahash::AHashMap as HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::rac::parser::Record;

/// TTL-bounded store of parsed rac listings keyed by query signature.
pub struct QueryCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

struct CacheEntry {
    records: Vec<Record>,
    expires_at: Instant,
}

impl QueryCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the cached records for the signature, treating expired
    /// entries as absent.
    pub fn get(&self, signature: &str) -> Option<Vec<Record>> {
        let entries = self.entries.lock().expect("query cache lock poisoned");
        entries.get(signature).and_then(|entry| {
            if entry.expires_at > Instant::now() {
                Some(entry.records.clone())
            } else {
                None
            }
        })
    }

    /// Stores records under the signature with a fresh expiry.
    pub fn put(&self, signature: &str, records: Vec<Record>) {
        let mut entries = self.entries.lock().expect("query cache lock poisoned");
        entries.insert(
            signature.to_string(),
            CacheEntry {
                records,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rac::parser::parse_text;

    #[test]
    fn miss_then_hit() {
        let cache = QueryCache::new(Duration::from_secs(5));
        assert!(cache.get("session list").is_none());

        cache.put("session list", parse_text("session-id : 1\n"));
        let records = cache.get("session list").expect("hit");
        assert_eq!(records[0]["session-id"], "1");
    }

    #[test]
    fn expired_entries_behave_as_miss() {
        let cache = QueryCache::new(Duration::from_millis(0));
        cache.put("process list", parse_text("pid : 42\n"));
        assert!(cache.get("process list").is_none());
    }

    #[test]
    fn signatures_are_independent() {
        let cache = QueryCache::new(Duration::from_secs(5));
        cache.put("a", parse_text("k : 1\n"));
        assert!(cache.get("b").is_none());
        assert!(cache.get("a").is_some());
    }
}
