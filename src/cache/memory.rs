//! First-level in-process cache.
//!
//! Best effort: entries may be evicted at any time and races between sessions
//! are tolerated. The scope stores stay authoritative.

use std::sync::{Arc, Mutex};

use lru::LruCache;

use crate::domain::entities::CachedObject;
use crate::domain::types::ObjectKind;

use super::config::CacheConfig;
use super::lock::mutex_lock;

const SOURCE: &str = "cache::memory";

#[derive(Debug, Clone, PartialEq)]
pub enum MemoryValue {
    /// Raw value of a named var, stored without encoding.
    Var(serde_json::Value),
    /// Object together with the kinds needed to use it.
    Object {
        object: CachedObject,
        kinds: Vec<ObjectKind>,
    },
}

pub trait MemoryCache: Send + Sync {
    /// `false` for implementations that never hold anything.
    fn enabled(&self) -> bool {
        true
    }

    fn get(&self, key: &str) -> Option<MemoryValue>;

    fn set(&self, key: String, value: MemoryValue);

    fn remove(&self, key: &str);

    /// Remove every key starting with `prefix`; returns how many were removed.
    fn remove_prefix(&self, prefix: &str) -> usize;

    /// Remove every key containing `marker`.
    fn clear_matching(&self, marker: &str) -> usize;

    fn clear(&self);
}

/// Pick the implementation once, from configuration.
pub fn from_config(config: &CacheConfig) -> Arc<dyn MemoryCache> {
    if config.memory_enabled {
        Arc::new(LruMemoryCache::new(config))
    } else {
        Arc::new(NoopMemoryCache)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMemoryCache;

impl MemoryCache for NoopMemoryCache {
    fn enabled(&self) -> bool {
        false
    }

    fn get(&self, _key: &str) -> Option<MemoryValue> {
        None
    }

    fn set(&self, _key: String, _value: MemoryValue) {}

    fn remove(&self, _key: &str) {}

    fn remove_prefix(&self, _prefix: &str) -> usize {
        0
    }

    fn clear_matching(&self, _marker: &str) -> usize {
        0
    }

    fn clear(&self) {}
}

/// Bounded LRU map shared by every session of an engine.
pub struct LruMemoryCache {
    entries: Mutex<LruCache<String, MemoryValue>>,
}

impl LruMemoryCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(config.memory_limit_non_zero())),
        }
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn remove_where(&self, op: &'static str, predicate: impl Fn(&str) -> bool) -> usize {
        let mut entries = mutex_lock(&self.entries, SOURCE, op);
        let doomed: Vec<String> = entries
            .iter()
            .filter(|(key, _)| predicate(key.as_str()))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &doomed {
            entries.pop(key);
        }
        doomed.len()
    }
}

impl MemoryCache for LruMemoryCache {
    fn get(&self, key: &str) -> Option<MemoryValue> {
        mutex_lock(&self.entries, SOURCE, "get").get(key).cloned()
    }

    fn set(&self, key: String, value: MemoryValue) {
        mutex_lock(&self.entries, SOURCE, "set").put(key, value);
    }

    fn remove(&self, key: &str) {
        mutex_lock(&self.entries, SOURCE, "remove").pop(key);
    }

    fn remove_prefix(&self, prefix: &str) -> usize {
        self.remove_where("remove_prefix", |key| key.starts_with(prefix))
    }

    fn clear_matching(&self, marker: &str) -> usize {
        self.remove_where("clear_matching", |key| key.contains(marker))
    }

    fn clear(&self) {
        mutex_lock(&self.entries, SOURCE, "clear").clear();
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn lru(limit: usize) -> LruMemoryCache {
        let config = CacheConfig {
            memory_enabled: true,
            memory_limit: limit,
            ..CacheConfig::new("/tmp/sectio-memory")
        };
        LruMemoryCache::new(&config)
    }

    #[test]
    fn noop_never_holds_values() {
        let cache = NoopMemoryCache;
        cache.set("k".to_string(), MemoryValue::Var(json!(1)));
        assert!(cache.get("k").is_none());
        assert!(!cache.enabled());
    }

    #[test]
    fn lru_evicts_least_recently_used() {
        let cache = lru(2);
        cache.set("a".to_string(), MemoryValue::Var(json!("a")));
        cache.set("b".to_string(), MemoryValue::Var(json!("b")));
        assert!(cache.get("a").is_some());

        cache.set("c".to_string(), MemoryValue::Var(json!("c")));
        assert!(cache.get("b").is_none());
        assert!(cache.get("a").is_some());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn prefix_and_marker_removal() {
        let cache = lru(16);
        for key in ["sectio:var:1:menu:en", "sectio:var:1:menu_top:de", "sectio:var:2:menu:en", "other:x"] {
            cache.set(key.to_string(), MemoryValue::Var(json!(true)));
        }

        assert_eq!(cache.remove_prefix("sectio:var:1:menu"), 2);
        assert_eq!(cache.clear_matching("sectio:"), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.get("other:x").is_some());

        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn factory_respects_flag() {
        let config = CacheConfig::new("/tmp/sectio-memory");
        assert!(!from_config(&config).enabled());

        let config = CacheConfig {
            memory_enabled: true,
            ..config
        };
        assert!(from_config(&config).enabled());
    }
}
