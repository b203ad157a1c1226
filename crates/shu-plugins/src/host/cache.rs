use lru::LruCache;
use serde_json::Value;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    expires_at: Instant,
}

/// Size-bounded TTL cache shared by all plugins; entries are keyed by plugin.
#[derive(Clone)]
pub struct PluginCache {
    entries: Arc<Mutex<LruCache<(String, String), CacheEntry>>>,
}

impl PluginCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Arc::new(Mutex::new(LruCache::new(capacity))),
        }
    }

    pub(crate) fn scoped(&self, plugin: &str) -> CacheCapability {
        CacheCapability {
            plugin: plugin.to_string(),
            cache: self.clone(),
        }
    }
}

impl Default for PluginCache {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[derive(Clone)]
pub struct CacheCapability {
    plugin: String,
    cache: PluginCache,
}

impl CacheCapability {
    fn key(&self, key: &str) -> (String, String) {
        (self.plugin.clone(), key.to_string())
    }

    /// Expired entries read as absent and are evicted.
    pub async fn get(&self, key: &str) -> Option<Value> {
        let mut entries = self.cache.entries.lock().await;
        let cache_key = self.key(key);
        match entries.get(&cache_key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            Some(_) => {
                entries.pop(&cache_key);
                None
            }
            None => None,
        }
    }

    pub async fn set(&self, key: &str, value: Value, ttl: Duration) {
        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + ttl,
        };
        self.cache.entries.lock().await.put(self.key(key), entry);
    }

    pub async fn delete(&self, key: &str) -> bool {
        self.cache.entries.lock().await.pop(&self.key(key)).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry() {
        let cache = PluginCache::new(16).scoped("gmail");
        cache.set("labels", json!(["inbox"]), Duration::from_secs(60)).await;
        assert_eq!(cache.get("labels").await, Some(json!(["inbox"])));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(cache.get("labels").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_scoped_per_plugin_and_bounded() {
        let shared = PluginCache::new(2);
        let gmail = shared.scoped("gmail");
        let calendar = shared.scoped("calendar");

        gmail.set("k", json!(1), Duration::from_secs(60)).await;
        assert!(calendar.get("k").await.is_none());

        calendar.set("a", json!(2), Duration::from_secs(60)).await;
        calendar.set("b", json!(3), Duration::from_secs(60)).await;
        // Capacity 2: the least recently used gmail entry is evicted.
        assert!(gmail.get("k").await.is_none());
        assert!(calendar.delete("a").await);
        assert!(!calendar.delete("a").await);
    }
}
