use crate::nl2sql::models::DatabaseSchema;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

struct CacheEntry {
    schema: Arc<DatabaseSchema>,
    stored_at: Instant,
}

/// Process-wide cache of schema snapshots with a time-to-live.
///
/// Reads are concurrent. Refreshes are serialized per key: a caller that
/// finds the entry stale waits for any refresh already in flight and reuses
/// its result instead of starting another one.
pub struct SchemaCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    refresh_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    ttl: Duration,
}

impl SchemaCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            refresh_locks: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the cached snapshot for `key` if it is younger than the TTL.
    pub async fn get(&self, key: &str) -> Option<Arc<DatabaseSchema>> {
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|entry| entry.stored_at.elapsed() < self.ttl)
            .map(|entry| Arc::clone(&entry.schema))
    }

    /// Returns a fresh snapshot for `key`, running `refresh` when the entry is
    /// missing, expired, or `force` is set.
    ///
    /// The cache lock is never held while `refresh` runs; only the per-key
    /// refresh lock is.
    pub async fn get_or_refresh<F, Fut, E>(
        &self,
        key: &str,
        force: bool,
        refresh: F,
    ) -> Result<Arc<DatabaseSchema>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<DatabaseSchema, E>>,
    {
        if !force {
            if let Some(schema) = self.get(key).await {
                debug!("Schema cache hit for {}", key);
                return Ok(schema);
            }
        }

        let requested_at = Instant::now();
        let key_lock = self.refresh_lock(key).await;
        let _guard = key_lock.lock().await;

        // Another caller may have refreshed while we waited for the lock.
        {
            let entries = self.entries.read().await;
            if let Some(entry) = entries.get(key) {
                let fresh = entry.stored_at.elapsed() < self.ttl;
                let refreshed_while_waiting = entry.stored_at >= requested_at;
                if fresh && (refreshed_while_waiting || !force) {
                    debug!("Reusing schema refreshed concurrently for {}", key);
                    return Ok(Arc::clone(&entry.schema));
                }
            }
        }

        info!("Refreshing schema cache entry {}", key);
        let schema = Arc::new(refresh().await?);

        let mut entries = self.entries.write().await;
        entries.insert(
            key.to_string(),
            CacheEntry {
                schema: Arc::clone(&schema),
                stored_at: Instant::now(),
            },
        );

        Ok(schema)
    }

    pub async fn invalidate(&self, key: &str) {
        self.entries.write().await.remove(key);
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
        info!("Schema cache cleared");
    }

    async fn refresh_lock(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.refresh_locks.lock().await;
        Arc::clone(locks.entry(key.to_string()).or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nl2sql::models::TableInfo;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn snapshot(name: &str) -> DatabaseSchema {
        DatabaseSchema::new(vec![TableInfo::new(name, Vec::new())])
    }

    #[tokio::test]
    async fn serves_cached_snapshot_within_ttl() {
        let cache = SchemaCache::new(Duration::from_secs(3600));
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let schema = cache
                .get_or_refresh("schema", false, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>(snapshot("a"))
                })
                .await
                .unwrap();
            assert_eq!(schema.table_names(), vec!["a"]);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn expired_entries_are_refreshed() {
        let cache = SchemaCache::new(Duration::ZERO);
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            cache
                .get_or_refresh("schema", false, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>(snapshot("a"))
                })
                .await
                .unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(cache.get("schema").await.is_none());
    }

    #[tokio::test]
    async fn force_bypasses_cache_and_clear_empties_it() {
        let cache = SchemaCache::new(Duration::from_secs(3600));

        cache
            .get_or_refresh("schema", false, || async { Ok::<_, String>(snapshot("a")) })
            .await
            .unwrap();
        let forced = cache
            .get_or_refresh("schema", true, || async { Ok::<_, String>(snapshot("b")) })
            .await
            .unwrap();
        assert_eq!(forced.table_names(), vec!["b"]);

        cache.clear().await;
        assert!(cache.get("schema").await.is_none());
    }

    #[tokio::test]
    async fn failed_refresh_leaves_cache_untouched() {
        let cache = SchemaCache::new(Duration::from_secs(3600));
        let err = cache
            .get_or_refresh("schema", false, || async { Err::<DatabaseSchema, _>("down") })
            .await
            .unwrap_err();

        assert_eq!(err, "down");
        assert!(cache.get("schema").await.is_none());
    }

    #[tokio::test]
    async fn concurrent_misses_refresh_once() {
        let cache = Arc::new(SchemaCache::new(Duration::from_secs(3600)));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_refresh("schema", false, || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok::<_, String>(snapshot("a"))
                    })
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
