//! Weak-reference memoisation cache for parameterised flow factories.
//!
//! Keyed flows reuse the existing instance for a given key while it's still
//! referenced somewhere, rather than allocating a fresh one per call; the
//! cached value is a `Weak` handle so an unreferenced entry is reclaimed once
//! every caller has dropped their clone of it, instead of living forever.
//!
//! Lookup takes one of two shapes depending on how the cache was built: the
//! default (`new`) cache keys a `HashMap` directly, an O(1) lookup; a cache
//! built with a custom [`ParamEquals`] (`with_equals`) can't hash by that
//! looser equality, so it falls back to an O(n) linear scan comparing keys.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, RwLock, Weak};

/// How cache keys are compared to find an existing entry.
pub type ParamEquals<K> = Arc<dyn Fn(&K, &K) -> bool + Send + Sync>;

struct Slot<T> {
    value: Weak<T>,
}

enum Storage<K, T> {
    /// Default equality: direct `HashMap` lookup.
    Hashed(HashMap<K, Slot<T>>),
    /// Custom `param_equals`: linear scan, since the looser equality isn't
    /// necessarily hash-compatible.
    Linear(Vec<(K, Slot<T>)>),
}

/// Caches flows keyed by a constructor parameter, so calling the factory
/// twice with "the same" parameter returns the same flow instance rather
/// than building a duplicate.
pub struct ParamCache<K, T> {
    equals: Option<ParamEquals<K>>,
    storage: RwLock<Storage<K, T>>,
}

impl<K, T> Default for ParamCache<K, T> {
    fn default() -> Self { Self { equals: None, storage: RwLock::new(Storage::Hashed(HashMap::new())) } }
}

impl<K, T> ParamCache<K, T> {
    pub fn new() -> Self { Self::default() }

    /// Use a custom equality instead of the default direct `HashMap` lookup;
    /// falls back to a linear scan since `eq` need not agree with `K: Hash`.
    pub fn with_equals(equals: ParamEquals<K>) -> Self { Self { equals: Some(equals), storage: RwLock::new(Storage::Linear(Vec::new())) } }

    /// Returns the cached flow for `key` if one is both present and still
    /// referenced elsewhere, otherwise builds one with `make`, stores a weak
    /// handle, and returns it.
    pub fn get_or_create(&self, key: K, make: impl FnOnce() -> Arc<T>) -> Arc<T>
    where K: Hash + Eq {
        {
            let storage = self.storage.read().unwrap();
            if let Some(value) = Self::lookup(&storage, &self.equals, &key) {
                return value;
            }
        }
        let value = make();
        let mut storage = self.storage.write().unwrap();
        // Re-check under the write lock: another caller may have created
        // (and still hold) an entry for this key while we were building ours.
        if let Some(existing) = Self::lookup(&storage, &self.equals, &key) {
            return existing;
        }
        Self::insert(&mut storage, key, &value);
        value
    }

    fn lookup(storage: &Storage<K, T>, equals: &Option<ParamEquals<K>>, key: &K) -> Option<Arc<T>>
    where K: Hash + Eq {
        match storage {
            Storage::Hashed(map) => map.get(key).and_then(|slot| slot.value.upgrade()),
            Storage::Linear(entries) => {
                let eq = equals.as_ref().expect("Linear storage is only ever built via with_equals");
                entries.iter().find(|(k, _)| eq(k, key)).and_then(|(_, slot)| slot.value.upgrade())
            }
        }
    }

    fn insert(storage: &mut Storage<K, T>, key: K, value: &Arc<T>)
    where K: Hash + Eq {
        let weak = Arc::downgrade(value);
        match storage {
            Storage::Hashed(map) => {
                map.retain(|_, slot| slot.value.strong_count() > 0);
                map.insert(key, Slot { value: weak });
            }
            Storage::Linear(entries) => {
                entries.retain(|(_, slot)| slot.value.strong_count() > 0);
                entries.push((key, Slot { value: weak }));
            }
        }
    }

    /// Number of entries still backed by a live strong reference.
    pub fn live_count(&self) -> usize {
        match &*self.storage.read().unwrap() {
            Storage::Hashed(map) => map.values().filter(|s| s.value.strong_count() > 0).count(),
            Storage::Linear(entries) => entries.iter().filter(|(_, s)| s.value.strong_count() > 0).count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::computed::Computed;

    #[test]
    fn reuses_instance_for_equal_key_while_referenced() {
        let cache: ParamCache<i32, Computed<i32>> = ParamCache::new();
        let make = |k: i32| Arc::new(Computed::new(move |_ctx| Ok(k * 2)));

        let a = cache.get_or_create(7, || make(7));
        let b = cache.get_or_create(7, || make(7));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.live_count(), 1);
    }

    #[test]
    fn recreates_once_dropped() {
        let cache: ParamCache<i32, Computed<i32>> = ParamCache::new();
        let make = |k: i32| Arc::new(Computed::new(move |_ctx| Ok(k)));

        let a = cache.get_or_create(1, || make(1));
        drop(a);
        assert_eq!(cache.live_count(), 0);
        let _b = cache.get_or_create(1, || make(1));
        assert_eq!(cache.live_count(), 1);
    }

    #[test]
    fn custom_equals_uses_the_linear_scan_path() {
        // Case-insensitive string keys: not hash-compatible with default
        // `Hash`, so this cache must have been built with `with_equals`.
        let cache: ParamCache<String, Computed<i32>> =
            ParamCache::with_equals(Arc::new(|a: &String, b: &String| a.eq_ignore_ascii_case(b)));
        let make = |k: &str| {
            let k = k.to_string();
            Arc::new(Computed::new(move |_ctx| Ok(k.len() as i32)))
        };

        let a = cache.get_or_create("Hello".to_string(), || make("Hello"));
        let b = cache.get_or_create("HELLO".to_string(), || make("HELLO"));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.live_count(), 1);
    }
}
