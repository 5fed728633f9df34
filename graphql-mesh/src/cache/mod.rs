//! Key/value cache handed to handlers and resolvers through the mesh context.

use std::num::NonZeroUsize;

use async_trait::async_trait;

use crate::json_ext::Value;

pub(crate) mod storage;

use storage::CacheStorage;

pub(crate) const DEFAULT_CACHE_CAPACITY: NonZeroUsize = match NonZeroUsize::new(1000) {
    Some(capacity) => capacity,
    None => NonZeroUsize::MIN,
};

/// A key/value cache.
#[async_trait]
pub trait KeyValueCache: Send + Sync {
    async fn get(&self, key: &str) -> Option<Value>;

    async fn set(&self, key: String, value: Value);

    /// Removes a key, returning whether it was present.
    async fn delete(&self, key: &str) -> bool;
}

/// The default [`KeyValueCache`]: a bounded in-process LRU.
#[derive(Clone)]
pub struct InMemoryCache {
    storage: CacheStorage<String, Value>,
}

impl InMemoryCache {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            storage: CacheStorage::new(capacity),
        }
    }

    pub async fn len(&self) -> usize {
        self.storage.len().await
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

#[async_trait]
impl KeyValueCache for InMemoryCache {
    async fn get(&self, key: &str) -> Option<Value> {
        self.storage.get(&key.to_string()).await
    }

    async fn set(&self, key: String, value: Value) {
        self.storage.insert(key, value).await
    }

    async fn delete(&self, key: &str) -> bool {
        self.storage.remove(&key.to_string()).await.is_some()
    }
}

#[cfg(test)]
mod tests {
    use serde_json_bytes::json;

    use super::*;

    #[tokio::test]
    async fn set_get_delete() {
        let cache = InMemoryCache::default();
        assert_eq!(cache.get("sdl").await, None);

        cache.set("sdl".into(), json!("type Query { a: Int }")).await;
        assert_eq!(cache.get("sdl").await, Some(json!("type Query { a: Int }")));
        assert_eq!(cache.len().await, 1);

        assert!(cache.delete("sdl").await);
        assert!(!cache.delete("sdl").await);
    }
}
