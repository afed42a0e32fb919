//! Tenant range cache: published tenant views kept warm by watches.
//!
//! Each cached tenant view owns the watch on its `tenant/{t}/{r}` key.
//! The watch is opened before the view is read, so a change committed
//! between the read and the insert still invalidates the entry. Any event
//! on the key marks the entry invalid and evicts it; the next lookup loads
//! the view again. Evicting an entry closes its watch.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, trace};

use keygrid_propagation::{Event, PropagationEngine, WatchEngine, WatchRegistry, tenant_key};
use keygrid_state::{TenantResource, TenantResourceRange};

use crate::error::{ProxyError, ProxyResult};

pub const DEFAULT_CACHE_CAPACITY: usize = 1024;

struct CacheEntry {
    range: Arc<TenantResourceRange>,
    generation: u64,
    invalidated: Arc<AtomicBool>,
    watch: WatchEngine,
}

impl CacheEntry {
    fn is_valid(&self) -> bool {
        !self.invalidated.load(Ordering::Acquire)
    }
}

#[derive(Debug, Default)]
struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    loads: AtomicU64,
    invalidations: AtomicU64,
    evictions: AtomicU64,
}

/// Point-in-time copy of the cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStatsSnapshot {
    pub entries: u64,
    pub hits: u64,
    pub misses: u64,
    pub loads: u64,
    pub invalidations: u64,
    pub evictions: u64,
}

struct CacheInner {
    entries: Mutex<HashMap<TenantResource, CacheEntry>>,
    next_generation: AtomicU64,
    stats: CacheStats,
}

impl CacheInner {
    /// Remove the entry if it is still the one created at `generation`.
    fn evict_generation(&self, id: &TenantResource, generation: u64) -> Option<CacheEntry> {
        let mut entries = self.entries.lock();
        match entries.get(id) {
            Some(entry) if entry.generation == generation => {
                self.stats.evictions.fetch_add(1, Ordering::Relaxed);
                entries.remove(id)
            }
            _ => None,
        }
    }
}

/// Cache of published tenant views, shared by every resolver.
#[derive(Clone)]
pub struct TenantRangeCache {
    inner: Arc<CacheInner>,
    propagation: PropagationEngine,
    registry: WatchRegistry,
    capacity: usize,
}

impl TenantRangeCache {
    pub fn new(propagation: PropagationEngine, registry: WatchRegistry) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                entries: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(1),
                stats: CacheStats::default(),
            }),
            propagation,
            registry,
            capacity: DEFAULT_CACHE_CAPACITY,
        }
    }

    /// Set the maximum number of cached tenant views.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// The published tenant view, from cache or loaded from the store.
    pub fn get(&self, tenant: &str, resource: &str) -> ProxyResult<Arc<TenantResourceRange>> {
        let id = TenantResource {
            tenant: tenant.to_string(),
            resource: resource.to_string(),
        };

        let stale = {
            let mut entries = self.inner.entries.lock();
            match entries.get(&id) {
                Some(entry) if entry.is_valid() => {
                    self.inner.stats.hits.fetch_add(1, Ordering::Relaxed);
                    trace!(%id, "tenant range cache hit");
                    return Ok(entry.range.clone());
                }
                Some(_) => {
                    self.inner.stats.evictions.fetch_add(1, Ordering::Relaxed);
                    entries.remove(&id)
                }
                None => None,
            }
        };
        // Closing a watch cancels its subscription; keep that out of the lock.
        drop(stale);

        self.inner.stats.misses.fetch_add(1, Ordering::Relaxed);
        self.load(id)
    }

    fn load(&self, id: TenantResource) -> ProxyResult<Arc<TenantResourceRange>> {
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let invalidated = Arc::new(AtomicBool::new(false));
        let watch = self.open_watch(&id, generation, invalidated.clone())?;

        let Some(range) = self
            .propagation
            .read_tenant_resource_range(&id.tenant, &id.resource)?
        else {
            debug!(%id, "no published tenant view");
            return Err(ProxyError::NotFound(format!("tenant resource {id}")));
        };
        self.inner.stats.loads.fetch_add(1, Ordering::Relaxed);
        let range = Arc::new(range);

        let mut released = Vec::new();
        let result = {
            let mut entries = self.inner.entries.lock();
            match entries.get(&id) {
                // Another caller loaded it first; keep theirs.
                Some(existing) if existing.is_valid() => {
                    released.push(watch);
                    existing.range.clone()
                }
                _ => {
                    if let Some(previous) = entries.remove(&id) {
                        released.push(previous.watch);
                    }
                    if entries.len() >= self.capacity {
                        let oldest = entries
                            .iter()
                            .min_by_key(|(_, e)| e.generation)
                            .map(|(k, _)| k.clone());
                        if let Some(oldest) = oldest.and_then(|k| entries.remove(&k)) {
                            self.inner.stats.evictions.fetch_add(1, Ordering::Relaxed);
                            released.push(oldest.watch);
                        }
                    }
                    entries.insert(
                        id.clone(),
                        CacheEntry {
                            range: range.clone(),
                            generation,
                            invalidated,
                            watch,
                        },
                    );
                    range
                }
            }
        };
        drop(released);
        debug!(%id, generation, "tenant range cached");
        Ok(result)
    }

    fn open_watch(
        &self,
        id: &TenantResource,
        generation: u64,
        invalidated: Arc<AtomicBool>,
    ) -> ProxyResult<WatchEngine> {
        let key = tenant_key(&id.tenant, &id.resource);
        let cache: Weak<CacheInner> = Arc::downgrade(&self.inner);
        let owner = id.clone();
        let watched = key.clone();

        let watch = self.registry.watch(&key, move |event: Event| {
            // The prefix also matches longer resource names.
            if event.key != watched {
                return Ok(());
            }
            invalidated.store(true, Ordering::Release);
            if let Some(cache) = cache.upgrade() {
                cache.stats.invalidations.fetch_add(1, Ordering::Relaxed);
                let evicted = cache.evict_generation(&owner, generation);
                debug!(id = %owner, kind = ?event.kind, evicted = evicted.is_some(), "tenant range invalidated");
                drop(evicted);
            }
            Ok(())
        })?;
        Ok(watch)
    }

    /// Drop a cached view and close its watch. Returns whether one was cached.
    pub fn invalidate(&self, tenant: &str, resource: &str) -> bool {
        let id = TenantResource {
            tenant: tenant.to_string(),
            resource: resource.to_string(),
        };
        let removed = self.inner.entries.lock().remove(&id);
        let existed = removed.is_some();
        if existed {
            self.inner.stats.evictions.fetch_add(1, Ordering::Relaxed);
        }
        drop(removed);
        existed
    }

    /// Drop every cached view and close every watch.
    pub fn clear(&self) {
        let drained: Vec<CacheEntry> = self.inner.entries.lock().drain().map(|(_, e)| e).collect();
        let count = drained.len();
        self.inner
            .stats
            .evictions
            .fetch_add(count as u64, Ordering::Relaxed);
        drop(drained);
        info!(count, "tenant range cache cleared");
    }

    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        let s = &self.inner.stats;
        CacheStatsSnapshot {
            entries: self.len() as u64,
            hits: s.hits.load(Ordering::Relaxed),
            misses: s.misses.load(Ordering::Relaxed),
            loads: s.loads.load(Ordering::Relaxed),
            invalidations: s.invalidations.load(Ordering::Relaxed),
            evictions: s.evictions.load(Ordering::Relaxed),
        }
    }
}
