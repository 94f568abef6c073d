//! The response cache: keyed entry table with byte accounting and eviction.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::entry::{CacheEntry, ENTRY_OVERHEAD};

/// Shared store state. Entries hold a weak reference back to this so a
/// committed refresh can re-account its size.
///
/// Lock order is store-then-entry everywhere; no lock is held across an
/// `.await`.
pub(crate) struct StoreShared {
    max_size: usize,
    inner: Mutex<StoreInner>,
}

struct StoreInner {
    entries: HashMap<String, Arc<CacheEntry>>,
    total_size: usize,
}

impl StoreShared {
    /// Re-run eviction accounting for an entry's new size, then commit it.
    /// Growing an entry can evict other idle entries. An entry that has
    /// been evicted in the meantime only updates its own bookkeeping.
    pub(crate) fn set_size(&self, entry: &Arc<CacheEntry>, bytes: usize) {
        let mut inner = self.inner.lock();
        let registered = inner
            .entries
            .get(entry.key())
            .is_some_and(|registered| Arc::ptr_eq(registered, entry));
        if registered {
            let old = entry.size();
            inner.total_size = inner.total_size.saturating_sub(old);
            Self::allocate_locked(&mut inner, self.max_size, bytes, Some(entry.key()));
            inner.total_size += bytes;
        }
        entry.set_size_raw(bytes);
    }

    /// Make room for `bytes`, evicting idle entries as needed.
    ///
    /// Pass 1 drops every idle entry whose expiry has passed. Pass 2 evicts
    /// idle entries least-recently-used first. Entries with subscribers are
    /// never evicted; when nothing evictable remains, over-budget is
    /// tolerated. The entry named by `exclude` (one mid-resize) is skipped
    /// by both passes: its old size is already deducted, so dropping it
    /// would corrupt the total.
    fn allocate_locked(
        inner: &mut StoreInner,
        max_size: usize,
        bytes: usize,
        exclude: Option<&str>,
    ) {
        if inner.total_size + bytes <= max_size {
            return;
        }

        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(key, entry)| {
                exclude != Some(key.as_str()) && !entry.has_subscribers() && entry.is_expired()
            })
            .map(|(key, _)| key.clone())
            .collect();
        for key in expired {
            Self::evict_locked(inner, &key);
        }

        while inner.total_size + bytes > max_size {
            let candidate = inner
                .entries
                .iter()
                .filter(|(key, entry)| {
                    exclude != Some(key.as_str()) && !entry.has_subscribers()
                })
                .min_by_key(|(_, entry)| entry.last_used())
                .map(|(key, _)| key.clone());
            match candidate {
                Some(key) => Self::evict_locked(inner, &key),
                None => break,
            }
        }
    }

    fn evict_locked(inner: &mut StoreInner, key: &str) {
        if let Some(entry) = inner.entries.remove(key) {
            inner.total_size = inner.total_size.saturating_sub(entry.size());
            entry.abort_in_flight();
            tracing::debug!(target: "meridian_graphql::cache", key, "entry evicted");
        }
    }
}

/// The process-wide response cache.
///
/// Unbounded in entry count, bounded in aggregate byte size. Entries are
/// removed only by eviction, never while subscribed.
#[derive(Clone)]
pub struct CacheStore {
    shared: Arc<StoreShared>,
}

impl CacheStore {
    pub(crate) fn new(max_size: usize) -> Self {
        Self {
            shared: Arc::new(StoreShared {
                max_size,
                inner: Mutex::new(StoreInner {
                    entries: HashMap::new(),
                    total_size: 0,
                }),
            }),
        }
    }

    /// Look up an entry, or create and register one via `factory`.
    ///
    /// A hit updates `last_used` and returns the entry unchanged, unless
    /// `no_cache` is set and the entry is idle: no-cache never reuses an
    /// idle entry, so the stale one is evicted and a fresh one created.
    /// Newly created entries trigger their first refresh before returning.
    pub(crate) fn get_or_create<F>(&self, key: &str, no_cache: bool, factory: F) -> Arc<CacheEntry>
    where
        F: FnOnce(Weak<StoreShared>) -> Arc<CacheEntry>,
    {
        let (entry, created) = {
            let mut inner = self.shared.inner.lock();

            let reusable = match inner.entries.get(key) {
                Some(existing) if !no_cache || existing.has_subscribers() => {
                    Some(Arc::clone(existing))
                }
                Some(_) => None,
                None => None,
            };

            if let Some(existing) = reusable {
                existing.touch();
                (existing, false)
            } else {
                if inner.entries.contains_key(key) {
                    StoreShared::evict_locked(&mut inner, key);
                }
                let entry = factory(Arc::downgrade(&self.shared));
                StoreShared::allocate_locked(&mut inner, self.shared.max_size, ENTRY_OVERHEAD, None);
                inner.total_size += ENTRY_OVERHEAD;
                inner.entries.insert(key.to_string(), Arc::clone(&entry));
                (entry, true)
            }
        };

        if created {
            let _ = entry.refresh();
        }
        entry
    }

    /// Look up an entry without creating one.
    pub fn get(&self, key: &str) -> Option<Arc<CacheEntry>> {
        self.shared.inner.lock().entries.get(key).cloned()
    }

    /// Number of entries currently registered.
    pub fn len(&self) -> usize {
        self.shared.inner.lock().entries.len()
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current aggregate size in bytes.
    pub fn total_size(&self) -> usize {
        self.shared.inner.lock().total_size
    }

    /// Make room for `bytes` by evicting idle entries.
    pub fn allocate(&self, bytes: usize) {
        let mut inner = self.shared.inner.lock();
        StoreShared::allocate_locked(&mut inner, self.shared.max_size, bytes, None);
    }

    /// Re-run eviction accounting for an entry's new size, then commit it.
    /// Growing an entry can evict other idle entries.
    pub fn set_size(&self, entry: &Arc<CacheEntry>, bytes: usize) {
        self.shared.set_size(entry, bytes);
    }

    /// Expire everything, then purge every evictable entry. Entries with
    /// subscribers survive and keep serving their cached data.
    pub fn clear(&self) {
        let entries: Vec<Arc<CacheEntry>> = {
            self.shared.inner.lock().entries.values().cloned().collect()
        };
        for entry in &entries {
            entry.expire_now();
        }
        let mut inner = self.shared.inner.lock();
        StoreShared::allocate_locked(&mut inner, self.shared.max_size, self.shared.max_size, None);
        tracing::debug!(target: "meridian_graphql::cache", remaining = inner.entries.len(), "cache cleared");
    }

    /// Clear, then refetch every surviving subscribed entry. With `force`,
    /// in-flight fetches are cancelled and restarted; otherwise loading
    /// entries keep their in-flight attempt.
    pub fn refresh_all(&self, force: bool) {
        self.clear();
        for entry in self.subscribed_entries() {
            let _ = if force {
                entry.force_refresh()
            } else {
                entry.refresh()
            };
        }
    }

    /// Clear, then publish an explicit `None` to every surviving subscribed
    /// entry's subscribers before refetching.
    pub fn reset(&self) {
        self.clear();
        for entry in self.subscribed_entries() {
            let _ = entry.clear_and_refresh();
        }
    }

    fn subscribed_entries(&self) -> Vec<Arc<CacheEntry>> {
        self.shared
            .inner
            .lock()
            .entries
            .values()
            .filter(|entry| entry.has_subscribers())
            .cloned()
            .collect()
    }
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.shared.inner.lock();
        f.debug_struct("CacheStore")
            .field("entries", &inner.entries.len())
            .field("total_size", &inner.total_size)
            .field("max_size", &self.shared.max_size)
            .finish()
    }
}
