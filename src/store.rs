//! Bucket storage interface and the in-memory backend.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::bucket::{Bucket, BucketState};
use crate::error::Result;
use crate::limit::Limit;

/// Storage collaborator for bucket state.
///
/// The single operation is an atomic read-transform-write: the backend
/// loads (or creates) the bucket under the key, runs the transform while
/// holding whatever lock or watch the backend provides, and persists the
/// result. The transform's return value is passed through.
pub trait BucketStore: Send + Sync {
    /// Atomically update the bucket stored under `key`.
    fn safe_update(
        &self,
        limit: &Arc<Limit>,
        key: &str,
        transform: &mut dyn FnMut(&mut Bucket) -> Option<f64>,
    ) -> Result<(Bucket, Option<f64>)>;
}

/// Process-local bucket storage, suitable for a single-node deployment
/// and for tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    buckets: Mutex<HashMap<String, BucketState>>,
}

impl MemoryStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of buckets currently stored.
    pub fn bucket_count(&self) -> usize {
        self.buckets.lock().len()
    }

    /// All stored bucket keys.
    pub fn keys(&self) -> Vec<String> {
        self.buckets.lock().keys().cloned().collect()
    }

    /// The persisted state under a key, if present.
    pub fn get(&self, key: &str) -> Option<BucketState> {
        self.buckets.lock().get(key).cloned()
    }
}

impl BucketStore for MemoryStore {
    fn safe_update(
        &self,
        limit: &Arc<Limit>,
        key: &str,
        transform: &mut dyn FnMut(&mut Bucket) -> Option<f64>,
    ) -> Result<(Bucket, Option<f64>)> {
        let mut buckets = self.buckets.lock();

        let mut bucket = match buckets.get(key) {
            Some(state) => Bucket::hydrate(limit.clone(), key, state.clone()),
            None => {
                trace!(key, "creating bucket");
                Bucket::new(limit.clone(), key)
            }
        };

        let result = transform(&mut bucket);
        buckets.insert(key.to_string(), bucket.dehydrate());

        Ok((bucket, result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limit::tests::make_limit;
    use crate::Params;

    #[test]
    fn test_safe_update_creates_bucket() {
        let store = MemoryStore::new();
        let limit = make_limit(10, "100");

        let (bucket, result) =
            store
                .safe_update(&limit, "k", &mut |b| b.delay(&Params::new(), 1000000.0))
                .unwrap();

        assert_eq!(result, None);
        assert_eq!(bucket.level(), 10.0);
        assert_eq!(store.bucket_count(), 1);
        assert_eq!(store.get("k").unwrap().level, 10.0);
    }

    #[test]
    fn test_safe_update_accumulates_state() {
        let store = MemoryStore::new();
        let limit = make_limit(10, "100");

        for _ in 0..3 {
            store
                .safe_update(&limit, "k", &mut |b| b.delay(&Params::new(), 1000000.0))
                .unwrap();
        }

        assert_eq!(store.get("k").unwrap().level, 30.0);
    }

    #[test]
    fn test_safe_update_persists_even_when_denied() {
        let store = MemoryStore::new();
        // value=1 per 100 seconds: the second message at the same instant
        // is over limit
        let limit = make_limit(1, "100");

        store
            .safe_update(&limit, "k", &mut |b| b.delay(&Params::new(), 1000000.0))
            .unwrap();
        let (bucket, result) = store
            .safe_update(&limit, "k", &mut |b| b.delay(&Params::new(), 1000000.0))
            .unwrap();

        assert_eq!(result, Some(100.0));
        assert_eq!(bucket.next(), Some(1000100.0));
        // The denial's next time is persisted with the untouched level
        let state = store.get("k").unwrap();
        assert_eq!(state.next, Some(1000100.0));
        assert_eq!(state.level, 100.0);
    }

    #[test]
    fn test_buckets_are_keyed_independently() {
        let store = MemoryStore::new();
        let limit = make_limit(10, "100");

        store
            .safe_update(&limit, "a", &mut |b| b.delay(&Params::new(), 1000000.0))
            .unwrap();
        store
            .safe_update(&limit, "b", &mut |b| b.delay(&Params::new(), 1000000.0))
            .unwrap();

        assert_eq!(store.bucket_count(), 2);
        let mut keys = store.keys();
        keys.sort();
        assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);
    }
}
