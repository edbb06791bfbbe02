//! Bounded LRU cache of compiled expression evaluators.
//!
//! One mutex covers the map and the recency list, and entry builds run under
//! it, so at most one evaluator compile is in flight per process. Eviction
//! drops the callable, unloads the entry's isolate, and nudges reclamation a
//! bounded number of times; a delayed release is tolerated (an in-flight
//! invocation may still hold the module).

use crate::debug::eval::EvalError;
use crate::vm::{EntryHandle, LoadedModule, ModuleIsolate};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Reclamation probes performed per evicted entry.
const RELEASE_NUDGES: usize = 10;

pub(crate) struct CacheEntry {
    pub callable: EntryHandle,
    pub isolate: Arc<ModuleIsolate>,
    pub weak: Weak<LoadedModule>,
}

struct CacheInner {
    entries: FxHashMap<String, CacheEntry>,
    /// Keys ordered most-recently-used first.
    order: VecDeque<String>,
}

pub(crate) struct EvalCache {
    capacity: usize,
    inner: Mutex<CacheInner>,
}

impl EvalCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(CacheInner {
                entries: FxHashMap::default(),
                order: VecDeque::new(),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Fetch the callable for `key`, building and installing the entry on a
    /// miss. The build runs under the cache mutex.
    pub fn get_or_insert(
        &self,
        key: &str,
        build: impl FnOnce() -> Result<CacheEntry, EvalError>,
    ) -> Result<EntryHandle, EvalError> {
        let mut inner = self.inner.lock();

        if let Some(entry) = inner.entries.get(key) {
            let callable = entry.callable.clone();
            touch(&mut inner.order, key);
            return Ok(callable);
        }

        let entry = build()?;
        let callable = entry.callable.clone();
        inner.entries.insert(key.to_string(), entry);
        inner.order.push_front(key.to_string());

        let mut evicted = Vec::new();
        while inner.entries.len() > self.capacity {
            let Some(old_key) = inner.order.pop_back() else {
                break;
            };
            if let Some(old) = inner.entries.remove(&old_key) {
                evicted.push((old_key, old));
            }
        }
        drop(inner);

        // Release outside the lock so reclamation probes never stall other
        // evaluations.
        for (old_key, old) in evicted {
            release_entry(&old_key, old);
        }
        Ok(callable)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Cached keys, most-recently-used first.
    pub fn keys(&self) -> Vec<String> {
        self.inner.lock().order.iter().cloned().collect()
    }

    /// Liveness handle of a cached entry's isolate.
    pub fn entry_weak(&self, key: &str) -> Option<Weak<LoadedModule>> {
        self.inner.lock().entries.get(key).map(|e| e.weak.clone())
    }
}

fn touch(order: &mut VecDeque<String>, key: &str) {
    if let Some(pos) = order.iter().position(|k| k == key) {
        let key = order.remove(pos).expect("position is valid");
        order.push_front(key);
    }
}

fn release_entry(key: &str, entry: CacheEntry) {
    let CacheEntry {
        callable,
        isolate,
        weak,
    } = entry;
    drop(callable);
    isolate.unload();
    for _ in 0..RELEASE_NUDGES {
        if weak.upgrade().is_none() {
            tracing::debug!(key, "evicted evaluator released");
            return;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    tracing::debug!(key, "evicted evaluator release delayed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{compile, CompileOptions};

    fn entry(n: usize) -> CacheEntry {
        let module = compile(
            "function __evaluate() { return 1; }",
            &CompileOptions::expression("__eval"),
        )
        .unwrap();
        let isolate = ModuleIsolate::load(format!("cache-test-{}", n), module);
        CacheEntry {
            callable: isolate.entry("__eval.__evaluate").unwrap(),
            weak: isolate.weak(),
            isolate,
        }
    }

    #[test]
    fn test_capacity_bound_and_eviction_order() {
        let cache = EvalCache::new(2);
        cache.get_or_insert("e1", || Ok(entry(1))).unwrap();
        cache.get_or_insert("e2", || Ok(entry(2))).unwrap();
        let w1 = cache.entry_weak("e1").unwrap();
        cache.get_or_insert("e3", || Ok(entry(3))).unwrap();

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.keys(), vec!["e3", "e2"]);
        assert!(w1.upgrade().is_none(), "evicted isolate must release");
    }

    #[test]
    fn test_hit_refreshes_recency() {
        let cache = EvalCache::new(2);
        cache.get_or_insert("e1", || Ok(entry(1))).unwrap();
        cache.get_or_insert("e2", || Ok(entry(2))).unwrap();
        // Touch e1, then insert e3: e2 is now the LRU victim.
        cache.get_or_insert("e1", || panic!("hit must not rebuild")).unwrap();
        cache.get_or_insert("e3", || Ok(entry(3))).unwrap();
        assert_eq!(cache.keys(), vec!["e3", "e1"]);
    }

    #[test]
    fn test_failed_build_not_cached() {
        let cache = EvalCache::new(2);
        let result = cache.get_or_insert("bad", || {
            Err(EvalError::Compile("does not compile".into()))
        });
        assert!(result.is_err());
        assert_eq!(cache.len(), 0);
        // A later successful build for the same key works.
        cache.get_or_insert("bad", || Ok(entry(1))).unwrap();
        assert_eq!(cache.len(), 1);
    }
}
