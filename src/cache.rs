//! Server-side watchlist cache.
//!
//! Scrapes are cached per normalised username for a fixed TTL. Expired
//! entries are not swept; they read as a miss and get overwritten by the
//! next successful scrape. Failures are never cached.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::info;

use crate::canonical::normalize_username;
use crate::error::WatchlistError;
use crate::fetch::{FetchEvent, FetchOptions, PageFetcher, fetch_watchlist_uris};

/// Default lifetime of a cached watchlist (5 minutes).
pub const CACHE_TTL: Duration = Duration::from_secs(300);

/// Page cap used for API scrapes.
pub const API_MAX_PAGES: i64 = 20;

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<Instant>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += by;
        }
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.now.lock().map(|n| *n).unwrap_or_else(|e| *e.into_inner())
    }
}

struct CacheEntry {
    uris: Arc<Vec<String>>,
    expires: Instant,
}

pub struct WatchlistCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl WatchlistCache {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            clock,
        }
    }

    /// Cached URIs for `id`, unless missing or expired.
    pub fn get(&self, id: &str) -> Option<Arc<Vec<String>>> {
        let now = self.clock.now();
        self.entries.read().ok().and_then(|guard| {
            guard
                .get(id)
                .filter(|e| now < e.expires)
                .map(|e| Arc::clone(&e.uris))
        })
    }

    pub fn insert(&self, id: String, uris: Arc<Vec<String>>) {
        let expires = self.clock.now() + self.ttl;
        if let Ok(mut guard) = self.entries.write() {
            guard.insert(id, CacheEntry { uris, expires });
        }
    }
}

impl Default for WatchlistCache {
    fn default() -> Self {
        Self::new(CACHE_TTL, Arc::new(SystemClock))
    }
}

/// Result of a cached lookup.
#[derive(Debug, Clone)]
pub struct Lookup {
    pub id: String,
    pub uris: Arc<Vec<String>>,
    pub cached: bool,
}

/// Watchlist scraping behind the TTL cache.
///
/// Concurrent misses for the same user are not merged: both scrape and the
/// last one to finish wins the cache slot.
pub struct WatchlistService {
    fetcher: Arc<dyn PageFetcher>,
    cache: WatchlistCache,
    max_pages: i64,
}

impl WatchlistService {
    pub fn new(fetcher: Arc<dyn PageFetcher>, cache: WatchlistCache) -> Self {
        Self {
            fetcher,
            cache,
            max_pages: API_MAX_PAGES,
        }
    }

    pub fn with_max_pages(mut self, max_pages: i64) -> Self {
        self.max_pages = max_pages;
        self
    }

    pub async fn lookup(&self, username: &str) -> Result<Lookup, WatchlistError> {
        self.lookup_with_progress(username, None).await
    }

    /// Cached lookup that reports scrape progress on `progress`. Cache hits
    /// emit nothing.
    pub async fn lookup_with_progress(
        &self,
        username: &str,
        progress: Option<mpsc::Sender<FetchEvent>>,
    ) -> Result<Lookup, WatchlistError> {
        let id = normalize_username(username);
        if id.is_empty() {
            return Err(WatchlistError::UsernameRequired);
        }

        if let Some(uris) = self.cache.get(&id) {
            info!("[fetch] cache hit: {} ({} URIs)", id, uris.len());
            return Ok(Lookup {
                id,
                uris,
                cached: true,
            });
        }

        let opts = FetchOptions {
            max_pages: Some(self.max_pages),
            log: true,
            progress,
        };
        let uris = Arc::new(fetch_watchlist_uris(self.fetcher.as_ref(), &id, &opts).await?);
        self.cache.insert(id.clone(), Arc::clone(&uris));
        Ok(Lookup {
            id,
            uris,
            cached: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::testing::{FakeFetcher, poster_page};

    fn service(fetcher: Arc<FakeFetcher>, clock: Arc<ManualClock>) -> WatchlistService {
        WatchlistService::new(fetcher, WatchlistCache::new(CACHE_TTL, clock))
    }

    #[test]
    fn entries_expire_after_ttl() {
        let clock = Arc::new(ManualClock::new());
        let cache = WatchlistCache::new(Duration::from_secs(10), clock.clone());
        cache.insert("a".into(), Arc::new(vec!["x".into()]));

        clock.advance(Duration::from_secs(9));
        assert!(cache.get("a").is_some());

        clock.advance(Duration::from_secs(1));
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_none());
    }

    #[tokio::test]
    async fn second_lookup_within_ttl_is_a_hit() {
        let fetcher = Arc::new(FakeFetcher::default().page("moviefanx", 1, 200, poster_page(0, 4)));
        let clock = Arc::new(ManualClock::new());
        let svc = service(fetcher.clone(), clock.clone());

        let first = svc.lookup("MovieFanX").await.unwrap();
        clock.advance(Duration::from_secs(299));
        let second = svc.lookup(" @moviefanx").await.unwrap();

        assert!(!first.cached);
        assert!(second.cached);
        assert_eq!(second.uris.len(), 4);
        // page 1 plus the missing page 2 that ended pagination
        assert_eq!(fetcher.request_count(), 2);
    }

    #[tokio::test]
    async fn expired_entry_is_scraped_again() {
        let fetcher = Arc::new(FakeFetcher::default().page("u", 1, 200, poster_page(0, 1)));
        let clock = Arc::new(ManualClock::new());
        let svc = service(fetcher.clone(), clock.clone());

        svc.lookup("u").await.unwrap();
        clock.advance(CACHE_TTL);
        let again = svc.lookup("u").await.unwrap();

        assert!(!again.cached);
        assert_eq!(fetcher.request_count(), 4);
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let fetcher = Arc::new(FakeFetcher::default());
        let svc = service(fetcher.clone(), Arc::new(ManualClock::new()));

        assert!(svc.lookup("nobody").await.is_err());
        assert!(svc.lookup("nobody").await.is_err());
        assert_eq!(fetcher.request_count(), 2);
    }
}
