//! Cache entries and their live response cell.

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use futures_util::future::{BoxFuture, Shared};
use futures_util::FutureExt;
use parking_lot::Mutex;

use super::store::StoreShared;
use crate::executor::Execution;
use crate::operation::FetchPolicy;
use crate::result::OperationResult;
use crate::transport::AbortHandle;

/// Fixed per-entry accounting overhead, on top of the result size.
pub(crate) const ENTRY_OVERHEAD: usize = 256;

/// Callback notified with each committed result, or `None` when the entry's
/// value is explicitly cleared.
pub type ResultSubscriber = Arc<dyn Fn(Option<&OperationResult>) + Send + Sync>;

/// A cloneable future resolving to the result of one refresh attempt.
///
/// Concurrent refreshes of a loading entry receive clones of the same
/// future, so a single transport call serves them all.
pub type SharedResult = Shared<BoxFuture<'static, OperationResult>>;

/// Produces one [`Execution`] per refresh attempt; wired to the query
/// executor when the entry is created.
pub(crate) type Fetcher = Arc<dyn Fn() -> Execution + Send + Sync>;

struct CellState {
    result: Option<OperationResult>,
    loading: bool,
    /// Token identifying the current in-flight attempt. A completion whose
    /// token no longer matches was superseded and is dropped.
    attempt: u64,
    in_flight: Option<SharedResult>,
    cancel: Option<AbortHandle>,
    size: usize,
    /// `None` means already expired.
    expires: Option<Instant>,
    last_used: Instant,
    subscribers: Vec<(u64, ResultSubscriber)>,
    next_subscriber: u64,
}

/// A cache entry owned by the [`CacheStore`](super::CacheStore).
///
/// Invariants: at most one request in flight at any time; `loading == false`
/// together with an unset cancel handle implies no outstanding request. An
/// entry with subscribers is never evicted.
pub struct CacheEntry {
    key: String,
    policy: FetchPolicy,
    cache_expiry: Duration,
    fetcher: Fetcher,
    store: Weak<StoreShared>,
    state: Mutex<CellState>,
}

impl CacheEntry {
    pub(crate) fn new(
        key: String,
        policy: FetchPolicy,
        cache_expiry: Duration,
        fetcher: Fetcher,
        store: Weak<StoreShared>,
    ) -> Arc<Self> {
        Arc::new(Self {
            key,
            policy,
            cache_expiry,
            fetcher,
            store,
            state: Mutex::new(CellState {
                result: None,
                loading: false,
                attempt: 0,
                in_flight: None,
                cancel: None,
                size: ENTRY_OVERHEAD,
                expires: None,
                last_used: Instant::now(),
                subscribers: Vec::new(),
                next_subscriber: 0,
            }),
        })
    }

    /// The operation key addressing this entry.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The fetch policy the entry was created under.
    pub fn fetch_policy(&self) -> FetchPolicy {
        self.policy
    }

    /// The most recently committed result, if any.
    pub fn current_result(&self) -> Option<OperationResult> {
        self.state.lock().result.clone()
    }

    /// Whether a refresh is currently in flight.
    pub fn is_loading(&self) -> bool {
        self.state.lock().loading
    }

    pub(crate) fn is_expired(&self) -> bool {
        let state = self.state.lock();
        !state.expires.is_some_and(|at| at > Instant::now())
    }

    pub(crate) fn has_subscribers(&self) -> bool {
        !self.state.lock().subscribers.is_empty()
    }

    pub(crate) fn size(&self) -> usize {
        self.state.lock().size
    }

    pub(crate) fn set_size_raw(&self, bytes: usize) {
        self.state.lock().size = bytes;
    }

    pub(crate) fn last_used(&self) -> Instant {
        self.state.lock().last_used
    }

    pub(crate) fn touch(&self) {
        self.state.lock().last_used = Instant::now();
    }

    /// Force immediate expiry without removing the entry.
    pub(crate) fn expire_now(&self) {
        self.state.lock().expires = None;
    }

    /// Abort the current in-flight attempt, if any. Advisory: the attempt
    /// resolves with an aborted network-error result.
    pub(crate) fn abort_in_flight(&self) -> bool {
        let cancel = self.state.lock().cancel.clone();
        match cancel {
            Some(cancel) => cancel.abort(),
            None => false,
        }
    }

    /// Refresh the entry, reusing the in-flight attempt when one exists.
    pub fn refresh(self: &Arc<Self>) -> SharedResult {
        let future = {
            let mut state = self.state.lock();
            if let Some(in_flight) = &state.in_flight {
                return in_flight.clone();
            }
            state.loading = true;
            state.attempt += 1;
            let attempt = state.attempt;

            let execution = (self.fetcher)();
            state.cancel = Some(execution.abort.clone());

            let entry = Arc::clone(self);
            let future: SharedResult = async move {
                let result = execution.result.await;
                entry.commit(attempt, &result);
                result
            }
            .boxed()
            .shared();
            state.in_flight = Some(future.clone());
            future
        };
        // Drive the attempt to completion even if every handle is dropped.
        tokio::spawn(future.clone());
        future
    }

    /// Cancel any in-flight attempt without notifying subscribers, then
    /// refresh again.
    pub fn force_refresh(self: &Arc<Self>) -> SharedResult {
        self.cancel_in_flight();
        self.refresh()
    }

    /// Cancel any in-flight attempt, publish an explicit `None` to
    /// subscribers if a prior result existed, then refresh.
    pub fn clear_and_refresh(self: &Arc<Self>) -> SharedResult {
        self.cancel_in_flight();
        let had_result = self.state.lock().result.take().is_some();
        if had_result {
            self.notify(None);
        }
        self.refresh()
    }

    fn cancel_in_flight(&self) {
        let cancel = {
            let mut state = self.state.lock();
            if !state.loading {
                return;
            }
            state.loading = false;
            state.in_flight = None;
            // Orphan the cancelled attempt so its completion is dropped.
            state.attempt += 1;
            state.cancel.take()
        };
        if let Some(cancel) = cancel {
            cancel.abort();
        }
    }

    /// Serve the cached result when it is still fresh; refresh otherwise.
    pub fn ensure_fresh(self: &Arc<Self>) -> SharedResult {
        {
            let mut state = self.state.lock();
            state.last_used = Instant::now();
            let fresh = state.expires.is_some_and(|at| at > Instant::now());
            if fresh && let Some(result) = &state.result {
                let result = result.clone();
                return futures_util::future::ready(result).boxed().shared();
            }
        }
        self.refresh()
    }

    /// Commit a completed attempt, unless it has been superseded.
    fn commit(self: &Arc<Self>, attempt: u64, result: &OperationResult) {
        let new_size = {
            let mut state = self.state.lock();
            if state.attempt != attempt {
                tracing::debug!(target: "meridian_graphql::cache", key = %self.key, "stale completion dropped");
                return;
            }
            state.loading = false;
            state.cancel = None;
            state.in_flight = None;
            state.result = Some(result.clone());
            state.last_used = Instant::now();
            if result.has_errors() {
                // Errors are never served from cache.
                state.expires = None;
                None
            } else {
                state.expires = match self.policy {
                    FetchPolicy::NoCache => None,
                    _ => Some(Instant::now() + self.cache_expiry),
                };
                Some(result.size + ENTRY_OVERHEAD)
            }
        };

        if let Some(bytes) = new_size
            && let Some(store) = self.store.upgrade()
        {
            store.set_size(self, bytes);
        }

        self.notify(Some(result));
    }

    /// Register a subscriber. The entry counts as in use (exempt from
    /// eviction and expiry-driven removal) while any subscription is held.
    pub fn subscribe(self: &Arc<Self>, callback: ResultSubscriber) -> CacheSubscription {
        let id = {
            let mut state = self.state.lock();
            state.next_subscriber += 1;
            let id = state.next_subscriber;
            state.subscribers.push((id, callback));
            state.last_used = Instant::now();
            id
        };
        CacheSubscription {
            entry: Arc::downgrade(self),
            id,
        }
    }

    fn notify(&self, result: Option<&OperationResult>) {
        let subscribers: Vec<ResultSubscriber> = {
            let state = self.state.lock();
            state.subscribers.iter().map(|(_, cb)| cb.clone()).collect()
        };
        for subscriber in subscribers {
            subscriber(result);
        }
    }

    #[cfg(test)]
    pub(crate) fn set_expires_for_test(&self, expires: Option<Instant>) {
        self.state.lock().expires = expires;
    }

    #[cfg(test)]
    pub(crate) fn set_last_used_for_test(&self, last_used: Instant) {
        self.state.lock().last_used = last_used;
    }
}

impl std::fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("CacheEntry")
            .field("key", &self.key)
            .field("loading", &state.loading)
            .field("size", &state.size)
            .field("subscribers", &state.subscribers.len())
            .finish()
    }
}

/// Removes its callback from the entry when dropped or explicitly
/// unsubscribed.
pub struct CacheSubscription {
    entry: Weak<CacheEntry>,
    id: u64,
}

impl CacheSubscription {
    /// Remove exactly this subscription's callback.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for CacheSubscription {
    fn drop(&mut self) {
        if let Some(entry) = self.entry.upgrade() {
            let mut state = entry.state.lock();
            state.subscribers.retain(|(id, _)| *id != self.id);
            state.last_used = Instant::now();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::OperationResult;
    use futures_util::FutureExt;
    use parking_lot::Mutex as SyncMutex;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn canned_fetcher(data: serde_json::Value, delay: Duration, calls: Arc<AtomicUsize>) -> Fetcher {
        Arc::new(move || {
            calls.fetch_add(1, Ordering::SeqCst);
            let data = data.clone();
            let (abort, _rx) = AbortHandle::new();
            Execution {
                result: async move {
                    tokio::time::sleep(delay).await;
                    OperationResult {
                        data: Some(data),
                        errors: None,
                        network_error: false,
                        size: 64,
                        extensions: None,
                    }
                }
                .boxed(),
                abort,
            }
        })
    }

    fn entry_with(fetcher: Fetcher) -> Arc<CacheEntry> {
        CacheEntry::new(
            "key".into(),
            FetchPolicy::CacheFirst,
            Duration::from_secs(60),
            fetcher,
            Weak::new(),
        )
    }

    #[tokio::test]
    async fn test_refresh_single_flight() {
        let calls = Arc::new(AtomicUsize::new(0));
        let entry = entry_with(canned_fetcher(
            json!({"x": 1}),
            Duration::from_millis(20),
            calls.clone(),
        ));

        let first = entry.refresh();
        let second = entry.refresh();
        let (a, b) = tokio::join!(first, second);

        assert_eq!(a, b);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!entry.is_loading());
    }

    #[tokio::test]
    async fn test_force_refresh_supersedes_slow_attempt() {
        let calls = Arc::new(AtomicUsize::new(0));
        let slow_calls = calls.clone();
        let entry = entry_with(Arc::new(move || {
            let attempt = slow_calls.fetch_add(1, Ordering::SeqCst);
            let (abort, _rx) = AbortHandle::new();
            Execution {
                result: async move {
                    if attempt == 0 {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        OperationResult {
                            data: Some(json!({"v": "old"})),
                            errors: None,
                            network_error: false,
                            size: 16,
                            extensions: None,
                        }
                    } else {
                        OperationResult {
                            data: Some(json!({"v": "new"})),
                            errors: None,
                            network_error: false,
                            size: 16,
                            extensions: None,
                        }
                    }
                }
                .boxed(),
                abort,
            }
        }));

        let _first = entry.refresh();
        let result = entry.force_refresh().await;
        assert_eq!(result.data, Some(json!({"v": "new"})));

        // Let the superseded attempt complete; it must not overwrite.
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(
            entry.current_result().unwrap().data,
            Some(json!({"v": "new"}))
        );
    }

    #[tokio::test]
    async fn test_subscribers_notified_on_commit() {
        let calls = Arc::new(AtomicUsize::new(0));
        let entry = entry_with(canned_fetcher(json!({"x": 1}), Duration::ZERO, calls));

        let seen: Arc<SyncMutex<Vec<Option<serde_json::Value>>>> =
            Arc::new(SyncMutex::new(Vec::new()));
        let sink = seen.clone();
        let subscription = entry.subscribe(Arc::new(move |result| {
            sink.lock().push(result.and_then(|r| r.data.clone()));
        }));

        entry.refresh().await;
        assert_eq!(seen.lock().as_slice(), &[Some(json!({"x": 1}))]);

        subscription.unsubscribe();
        entry.force_refresh().await;
        // No further notifications after unsubscribe.
        assert_eq!(seen.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_clear_and_refresh_publishes_none_first() {
        let calls = Arc::new(AtomicUsize::new(0));
        let entry = entry_with(canned_fetcher(json!({"x": 1}), Duration::ZERO, calls));
        entry.refresh().await;

        let seen: Arc<SyncMutex<Vec<Option<serde_json::Value>>>> =
            Arc::new(SyncMutex::new(Vec::new()));
        let sink = seen.clone();
        let _subscription = entry.subscribe(Arc::new(move |result| {
            sink.lock().push(result.and_then(|r| r.data.clone()));
        }));

        entry.clear_and_refresh().await;
        assert_eq!(
            seen.lock().as_slice(),
            &[None, Some(json!({"x": 1}))]
        );
    }

    #[tokio::test]
    async fn test_error_result_expires_immediately() {
        let entry = entry_with(Arc::new(|| {
            let (abort, _rx) = AbortHandle::new();
            Execution {
                result: futures_util::future::ready(OperationResult::errors_only(
                    vec![crate::result::GraphQLError::new("boom")],
                    8,
                ))
                .boxed(),
                abort,
            }
        }));

        entry.refresh().await;
        assert!(entry.is_expired());
        assert!(entry.current_result().unwrap().has_errors());
    }

    #[tokio::test]
    async fn test_ensure_fresh_serves_cached_value() {
        let calls = Arc::new(AtomicUsize::new(0));
        let entry = entry_with(canned_fetcher(
            json!({"x": 1}),
            Duration::ZERO,
            calls.clone(),
        ));

        entry.refresh().await;
        let cached = entry.ensure_fresh().await;
        assert_eq!(cached.data, Some(json!({"x": 1})));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        entry.expire_now();
        entry.ensure_fresh().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
