//! In-memory STRM resolved-URL cache (§4.8 "consult in-memory cache, then
//! the `StrmUrlMapping` table"). TTL-expired entries are lazily evicted on
//! read rather than swept on a timer, matching §5's "STRM in-memory URL
//! cache — guarded by one `Mutex`; TTL-expired entries are lazily evicted on
//! read."

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

/// Identity of one resolved-URL cache slot. Mirrors
/// [`crate::db::repositories::strm_mappings::StrmMappingKey`] but owned, since
/// it doubles as a `HashMap` key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StrmCacheKey {
    pub site: String,
    pub slug: String,
    pub season: i32,
    pub episode: i32,
    pub language: String,
    pub provider: String,
}

struct Entry {
    url: String,
    cached_at: Instant,
}

/// Process-local read-through cache sitting in front of the `strm_url_mapping`
/// table. Holding a TTL of zero or less disables caching — every read misses.
pub struct StrmUrlCache {
    ttl: Duration,
    entries: Mutex<HashMap<StrmCacheKey, Entry>>,
}

impl StrmUrlCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get(&self, key: &StrmCacheKey) -> Option<String> {
        if self.ttl.is_zero() {
            return None;
        }
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if entry.cached_at.elapsed() <= self.ttl => Some(entry.url.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub async fn put(&self, key: StrmCacheKey, url: String) {
        if self.ttl.is_zero() {
            return;
        }
        self.entries.lock().await.insert(
            key,
            Entry {
                url,
                cached_at: Instant::now(),
            },
        );
    }

    pub async fn invalidate(&self, key: &StrmCacheKey) {
        self.entries.lock().await.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> StrmCacheKey {
        StrmCacheKey {
            site: "aniworld".into(),
            slug: "my-show".into(),
            season: 1,
            episode: 1,
            language: "German Dub".into(),
            provider: "VOE".into(),
        }
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let cache = StrmUrlCache::new(Duration::from_secs(60));
        cache.put(key(), "https://example.com/a".into()).await;
        assert_eq!(cache.get(&key()).await, Some("https://example.com/a".into()));
    }

    #[tokio::test]
    async fn zero_ttl_never_caches() {
        let cache = StrmUrlCache::new(Duration::ZERO);
        cache.put(key(), "https://example.com/a".into()).await;
        assert_eq!(cache.get(&key()).await, None);
    }

    #[tokio::test]
    async fn invalidate_clears_entry() {
        let cache = StrmUrlCache::new(Duration::from_secs(60));
        cache.put(key(), "https://example.com/a".into()).await;
        cache.invalidate(&key()).await;
        assert_eq!(cache.get(&key()).await, None);
    }
}
