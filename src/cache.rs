//! In-process cache with per-entry TTL and a bounded capacity.
//!
//! The cache is an explicitly constructed, injected dependency rather than a
//! module-level static: in a serverless deployment every cold start begins
//! with an empty cache, and that reset is a documented property of this type.

use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Cache lock poisoned")]
    Poisoned,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: String,
    inserted_at: Instant,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn new(value: String, ttl: Option<Duration>) -> Self {
        let now = Instant::now();
        Self {
            value,
            inserted_at: now,
            expires_at: ttl.map(|d| now + d),
        }
    }

    fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => Instant::now() > expires_at,
            None => false,
        }
    }
}

/// Bounded in-memory cache. When full, expired entries are dropped first and
/// the oldest live entry is evicted if none were expired.
#[derive(Debug, Clone)]
pub struct InMemoryCache {
    store: Arc<RwLock<HashMap<String, CacheEntry>>>,
    capacity: usize,
    default_ttl: Option<Duration>,
}

impl InMemoryCache {
    pub fn new(capacity: usize, default_ttl: Option<Duration>) -> Self {
        Self {
            store: Arc::new(RwLock::new(HashMap::new())),
            capacity: capacity.max(1),
            default_ttl,
        }
    }

    pub fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        {
            let store = self.store.read().map_err(|_| CacheError::Poisoned)?;
            match store.get(key) {
                Some(entry) if !entry.is_expired() => return Ok(Some(entry.value.clone())),
                Some(_) => {}
                None => return Ok(None),
            }
        }
        // Expired entry found; drop it under a write lock.
        let mut store = self.store.write().map_err(|_| CacheError::Poisoned)?;
        store.remove(key);
        Ok(None)
    }

    pub fn set(&self, key: &str, value: String) -> Result<(), CacheError> {
        let mut store = self.store.write().map_err(|_| CacheError::Poisoned)?;

        if !store.contains_key(key) && store.len() >= self.capacity {
            store.retain(|_, entry| !entry.is_expired());
            if store.len() >= self.capacity {
                if let Some(oldest) = store
                    .iter()
                    .min_by_key(|(_, entry)| entry.inserted_at)
                    .map(|(k, _)| k.clone())
                {
                    store.remove(&oldest);
                }
            }
        }

        store.insert(key.to_string(), CacheEntry::new(value, self.default_ttl));
        Ok(())
    }

    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        match self.get(key)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn set_json<T: Serialize>(&self, key: &str, value: &T) -> Result<(), CacheError> {
        self.set(key, serde_json::to_string(value)?)
    }

    pub fn len(&self) -> usize {
        self.store.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_returns_inserted_value() {
        let cache = InMemoryCache::new(10, None);
        cache.set("a", "1".into()).unwrap();
        assert_eq!(cache.get("a").unwrap().as_deref(), Some("1"));
    }

    #[test]
    fn expired_entries_are_dropped_on_read() {
        let cache = InMemoryCache::new(10, Some(Duration::from_millis(0)));
        cache.set("a", "1".into()).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.get("a").unwrap(), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn capacity_evicts_oldest_entry() {
        let cache = InMemoryCache::new(2, None);
        cache.set("a", "1".into()).unwrap();
        cache.set("b", "2".into()).unwrap();
        cache.set("c", "3".into()).unwrap();
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a").unwrap(), None);
        assert_eq!(cache.get("c").unwrap().as_deref(), Some("3"));
    }

    #[test]
    fn json_round_trip() {
        let cache = InMemoryCache::new(10, None);
        cache.set_json("nums", &vec![1, 2, 3]).unwrap();
        let nums: Vec<i32> = cache.get_json("nums").unwrap().unwrap();
        assert_eq!(nums, vec![1, 2, 3]);
    }
}
