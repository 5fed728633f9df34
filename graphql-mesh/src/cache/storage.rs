use std::fmt;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use tokio::sync::Mutex;

pub(crate) trait KeyType: Clone + fmt::Debug + Hash + Eq + Send + Sync {}
pub(crate) trait ValueType: Clone + fmt::Debug + Send + Sync {}

// Blanket implementation which satisfies the compiler
impl<K> KeyType for K where K: Clone + fmt::Debug + Hash + Eq + Send + Sync {}

// Blanket implementation which satisfies the compiler
impl<V> ValueType for V where V: Clone + fmt::Debug + Send + Sync {}

/// In memory LRU storage shared by the mesh caches.
#[derive(Clone)]
pub(crate) struct CacheStorage<K: KeyType, V: ValueType> {
    inner: Arc<Mutex<LruCache<K, V>>>,
}

impl<K, V> CacheStorage<K, V>
where
    K: KeyType,
    V: ValueType,
{
    pub(crate) fn new(max_capacity: NonZeroUsize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(LruCache::new(max_capacity))),
        }
    }

    pub(crate) async fn get(&self, key: &K) -> Option<V> {
        self.inner.lock().await.get(key).cloned()
    }

    pub(crate) async fn insert(&self, key: K, value: V) {
        self.inner.lock().await.put(key, value);
    }

    pub(crate) async fn remove(&self, key: &K) -> Option<V> {
        self.inner.lock().await.pop(key)
    }

    pub(crate) async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }
}
