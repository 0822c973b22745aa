//! Origin-tracking store backing the hijack detector.
//!
//! Two logical maps keyed by prefix: the single known origin and the set
//! of origins ever observed (MOAS). A short-lived local cache fronts an
//! optional Redis backing store with a 48-hour entry lifetime; the MOAS
//! set lives in Redis alone. Store failures are logged and swallowed;
//! the detector must never error.
//!
//! The known origin is deliberately never overwritten once learned: a
//! detected hijack only extends the MOAS set, so a genuine prefix
//! transfer keeps flagging the new origin until the external entry
//! expires. Without Redis the store degrades to learning-only
//! process-local memory with no MOAS history, and a restart re-learns
//! every prefix from its first sighting.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tracing::debug;

const LOCAL_CACHE_TTL: Duration = Duration::from_secs(5 * 60);
const STORE_TTL_SECS: u64 = 48 * 60 * 60;

struct CachedOrigin {
    asn: u32,
    stored_at: Instant,
}

/// Shared origin store: local read-through cache plus optional Redis.
pub struct OriginStore {
    origins: RwLock<HashMap<String, CachedOrigin>>,
    redis: Option<MultiplexedConnection>,
    local_ttl: Duration,
}

impl OriginStore {
    pub fn new(redis: Option<MultiplexedConnection>) -> Self {
        Self::with_local_ttl(redis, LOCAL_CACHE_TTL)
    }

    pub fn with_local_ttl(redis: Option<MultiplexedConnection>, local_ttl: Duration) -> Self {
        Self {
            origins: RwLock::new(HashMap::new()),
            redis,
            local_ttl,
        }
    }

    fn origin_key(prefix: &str) -> String {
        format!("bgp:prefix:{prefix}:origin")
    }

    fn moas_key(prefix: &str) -> String {
        format!("bgp:prefix:{prefix}:origins")
    }

    /// Known origin for a prefix, or None if never seen (or expired).
    /// Fresh local entries win; stale ones fall through to Redis.
    pub async fn known_origin(&self, prefix: &str) -> Option<u32> {
        {
            let cache = self.origins.read();
            if let Some(entry) = cache.get(prefix) {
                if entry.stored_at.elapsed() < self.local_ttl {
                    return Some(entry.asn);
                }
            }
        }

        if let Some(conn) = &self.redis {
            let mut conn = conn.clone();
            let result: redis::RedisResult<Option<u64>> =
                conn.get(Self::origin_key(prefix)).await;
            match result {
                Ok(Some(origin)) => {
                    let origin = origin as u32;
                    self.origins.write().insert(
                        prefix.to_string(),
                        CachedOrigin {
                            asn: origin,
                            stored_at: Instant::now(),
                        },
                    );
                    return Some(origin);
                }
                Ok(None) => {}
                Err(e) => debug!("redis get failed for {}: {}", prefix, e),
            }
        }

        None
    }

    /// Record the origin for a newly seen prefix, locally and in Redis.
    pub async fn record_origin(&self, prefix: &str, origin: u32) {
        self.origins.write().insert(
            prefix.to_string(),
            CachedOrigin {
                asn: origin,
                stored_at: Instant::now(),
            },
        );

        if let Some(conn) = &self.redis {
            let mut conn = conn.clone();
            let result: redis::RedisResult<()> = conn
                .set_ex(Self::origin_key(prefix), origin, STORE_TTL_SECS)
                .await;
            if let Err(e) = result {
                debug!("redis set failed for {}: {}", prefix, e);
            }
        }
    }

    /// Whether this origin was previously observed for the prefix. MOAS
    /// history lives only in the external store so entries age with its
    /// 48-hour lifetime; without Redis there is no history and every
    /// repeat divergence looks new.
    pub async fn is_known_moas(&self, prefix: &str, origin: u32) -> bool {
        let conn = match &self.redis {
            Some(conn) => conn,
            None => return false,
        };

        let mut conn = conn.clone();
        let result: redis::RedisResult<bool> =
            conn.sismember(Self::moas_key(prefix), origin).await;
        match result {
            Ok(member) => member,
            Err(e) => {
                debug!("redis sismember failed for {}: {}", prefix, e);
                false
            }
        }
    }

    /// Add an observed origin to the prefix's MOAS set. No-op without
    /// Redis.
    pub async fn add_moas(&self, prefix: &str, origin: u32) {
        let conn = match &self.redis {
            Some(conn) => conn,
            None => return,
        };

        let mut conn = conn.clone();
        let key = Self::moas_key(prefix);
        let result: redis::RedisResult<()> = conn.sadd(&key, origin).await;
        if let Err(e) = result {
            debug!("redis sadd failed for {}: {}", prefix, e);
            return;
        }
        let result: redis::RedisResult<()> = conn.expire(&key, STORE_TTL_SECS as i64).await;
        if let Err(e) = result {
            debug!("redis expire failed for {}: {}", prefix, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn learns_and_returns_origin() {
        let store = OriginStore::new(None);
        assert_eq!(store.known_origin("1.2.3.0/24").await, None);

        store.record_origin("1.2.3.0/24", 64500).await;
        assert_eq!(store.known_origin("1.2.3.0/24").await, Some(64500));
        // Independent prefixes do not interfere
        assert_eq!(store.known_origin("4.5.6.0/24").await, None);
    }

    #[tokio::test]
    async fn stale_local_entry_is_ignored() {
        let store = OriginStore::with_local_ttl(None, Duration::ZERO);
        store.record_origin("1.2.3.0/24", 64500).await;
        // Without a backing store, an expired cache entry means unknown
        assert_eq!(store.known_origin("1.2.3.0/24").await, None);
    }

    #[tokio::test]
    async fn no_moas_history_without_backing_store() {
        let store = OriginStore::new(None);
        assert!(!store.is_known_moas("1.2.3.0/24", 64501).await);

        // Without Redis the set cannot be recorded at all
        store.add_moas("1.2.3.0/24", 64501).await;
        assert!(!store.is_known_moas("1.2.3.0/24", 64501).await);
    }

    #[test]
    fn key_layout() {
        assert_eq!(
            OriginStore::origin_key("1.2.3.0/24"),
            "bgp:prefix:1.2.3.0/24:origin"
        );
        assert_eq!(
            OriginStore::moas_key("1.2.3.0/24"),
            "bgp:prefix:1.2.3.0/24:origins"
        );
    }
}
