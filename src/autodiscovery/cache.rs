//! TTL-bounded detection cache
//!
//! Entries expire `ttl` after insertion and are dropped lazily on read or
//! eagerly via `purge_expired`. Time comes from an injected `Clock`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use super::ProviderDetection;

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

struct CachedDetection {
    detection: ProviderDetection,
    expires_at: Instant,
}

/// Domain -> last detection result
pub struct DetectionCache {
    ttl: Duration,
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<String, CachedDetection>>,
}

impl DetectionCache {
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl,
            clock,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, domain: &str) -> Option<ProviderDetection> {
        let now = self.clock.now();
        let mut entries = self.lock();

        match entries.get(domain) {
            Some(cached) if cached.expires_at > now => Some(cached.detection.clone()),
            Some(_) => {
                entries.remove(domain);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, domain: &str, detection: ProviderDetection) {
        let expires_at = self.clock.now() + self.ttl;
        self.lock().insert(
            domain.to_string(),
            CachedDetection {
                detection,
                expires_at,
            },
        );
    }

    /// Drop expired entries, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, cached| cached.expires_at > now);
        before - entries.len()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CachedDetection>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
