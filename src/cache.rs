//! In-memory audit cache keyed by fingerprint
//!
//! Identical resubmissions (same task, candidate, rubric, and workflow
//! config) are served the prior verdict instead of re-invoking the judge.
//! Entries live in a bounded LRU and expire on a per-entry TTL.

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::judge::JudgeVerdict;

struct CacheEntry {
    verdict: JudgeVerdict,
    cached_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn expired(&self) -> bool {
        self.cached_at.elapsed() > self.ttl
    }
}

pub struct AuditCache {
    inner: Mutex<LruCache<String, CacheEntry>>,
    default_ttl: Duration,
    enabled: bool,
}

impl AuditCache {
    pub fn new(capacity: usize, default_ttl: Duration, enabled: bool) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity is at least 1");
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
            default_ttl,
            enabled,
        }
    }

    /// Fetch a fresh verdict for the fingerprint, if one is cached
    pub fn get(&self, fingerprint: &str) -> Option<JudgeVerdict> {
        if !self.enabled {
            return None;
        }
        let mut inner = self.inner.lock().unwrap();
        match inner.get(fingerprint) {
            Some(entry) if !entry.expired() => {
                debug!("audit cache hit for {fingerprint}");
                Some(entry.verdict.clone())
            }
            Some(_) => {
                inner.pop(fingerprint);
                None
            }
            None => None,
        }
    }

    /// Store a verdict under the fingerprint, with an optional TTL override
    pub fn put(&self, fingerprint: &str, verdict: JudgeVerdict, ttl: Option<Duration>) {
        if !self.enabled {
            return;
        }
        let mut inner = self.inner.lock().unwrap();
        inner.put(
            fingerprint.to_string(),
            CacheEntry {
                verdict,
                cached_at: Instant::now(),
                ttl: ttl.unwrap_or(self.default_ttl),
            },
        );
    }

    pub fn invalidate(&self, fingerprint: &str) {
        self.inner.lock().unwrap().pop(fingerprint);
    }

    pub fn invalidate_all(&self) {
        self.inner.lock().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::judge::VerdictKind;

    fn verdict(overall: u32) -> JudgeVerdict {
        JudgeVerdict {
            overall,
            verdict: VerdictKind::Pass,
            ..JudgeVerdict::default()
        }
    }

    #[test]
    fn put_then_get_within_ttl_returns_the_verdict() {
        let cache = AuditCache::new(8, Duration::from_secs(600), true);
        cache.put("fp-1", verdict(90), None);
        let hit = cache.get("fp-1").expect("entry is fresh");
        assert_eq!(hit.overall, 90);
    }

    #[test]
    fn expired_entries_are_evicted_on_read() {
        let cache = AuditCache::new(8, Duration::from_millis(0), true);
        cache.put("fp-1", verdict(90), None);
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get("fp-1").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn capacity_bound_evicts_least_recently_used() {
        let cache = AuditCache::new(2, Duration::from_secs(600), true);
        cache.put("a", verdict(1), None);
        cache.put("b", verdict(2), None);
        cache.get("a");
        cache.put("c", verdict(3), None);
        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn invalidate_removes_single_entry() {
        let cache = AuditCache::new(8, Duration::from_secs(600), true);
        cache.put("a", verdict(1), None);
        cache.put("b", verdict(2), None);
        cache.invalidate("a");
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());
        cache.invalidate_all();
        assert!(cache.is_empty());
    }

    #[test]
    fn disabled_cache_never_stores() {
        let cache = AuditCache::new(8, Duration::from_secs(600), false);
        cache.put("a", verdict(1), None);
        assert!(cache.get("a").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn per_entry_ttl_overrides_default() {
        let cache = AuditCache::new(8, Duration::from_millis(0), true);
        cache.put("long", verdict(1), Some(Duration::from_secs(600)));
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get("long").is_some());
    }
}
