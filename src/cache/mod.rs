/*
 * Read-through memoization for idempotent chain reads
 */

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::metrics::{CacheOutcome, QuoterMetrics};
use crate::models::{QuoterError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    /// Values that drift, e.g. gas price.
    Ttl(Duration),
    /// Immutable facts: decimals, symbols, chain id, discovered pools.
    Forever,
}

impl CachePolicy {
    #[must_use]
    pub fn ttl_ms(ms: u64) -> Self {
        CachePolicy::Ttl(Duration::from_millis(ms))
    }

    fn expiry_from(self, now: Instant) -> Option<Instant> {
        match self {
            CachePolicy::Ttl(ttl) => Some(now + ttl),
            CachePolicy::Forever => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    owner: u64,
    operation: &'static str,
    args: String,
}

type Value = Arc<dyn Any + Send + Sync>;
type PendingRead = Shared<BoxFuture<'static, Result<Value>>>;

enum Slot {
    Ready {
        value: Value,
        expires_at: Option<Instant>,
    },
    Pending {
        id: u64,
        read: PendingRead,
    },
}

#[derive(Default)]
struct Store {
    slots: Mutex<HashMap<CacheKey, Slot>>,
    next_id: AtomicU64,
}

impl Store {
    fn slots(&self) -> MutexGuard<'_, HashMap<CacheKey, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

/// Cache handle bound to one owning instance.
///
/// Handles created with [`MemoCache::scoped`] share storage but never each
/// other's entries. A read that misses is started once; callers arriving
/// while it is in flight await the same future.
#[derive(Clone)]
pub struct MemoCache {
    store: Arc<Store>,
    owner: u64,
    metrics: Option<Arc<QuoterMetrics>>,
}

impl Default for MemoCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoCache {
    #[must_use]
    pub fn new() -> Self {
        let store = Arc::new(Store::default());
        let owner = store.next_id();
        Self {
            store,
            owner,
            metrics: None,
        }
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<QuoterMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// A handle for another owner over the same storage.
    #[must_use]
    pub fn scoped(&self) -> Self {
        Self {
            store: self.store.clone(),
            owner: self.store.next_id(),
            metrics: self.metrics.clone(),
        }
    }

    pub async fn get_or_fetch<T, A, Fut, F>(
        &self,
        operation: &'static str,
        args: &A,
        policy: CachePolicy,
        fetch: F,
    ) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
        A: Serialize + ?Sized,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let key = self.key(operation, args)?;

        let read = {
            let mut slots = self.store.slots();
            match slots.get(&key) {
                Some(Slot::Ready { value, expires_at })
                    if expires_at.map_or(true, |at| Instant::now() < at) =>
                {
                    self.record(operation, CacheOutcome::Hit);
                    return downcast(operation, value);
                }
                Some(Slot::Pending { read, .. }) => {
                    self.record(operation, CacheOutcome::Joined);
                    read.clone()
                }
                _ => {
                    self.record(operation, CacheOutcome::Miss);
                    debug!("Cache miss for {} {}", operation, key.args);
                    let id = self.store.next_id();
                    let read = settle(
                        Arc::downgrade(&self.store),
                        key.clone(),
                        id,
                        policy,
                        fetch(),
                    );
                    slots.insert(key, Slot::Pending { id, read: read.clone() });
                    read
                }
            }
        };

        let value = read.await?;
        downcast(operation, &value)
    }

    pub fn invalidate<A: Serialize + ?Sized>(&self, operation: &'static str, args: &A) -> Result<()> {
        let key = self.key(operation, args)?;
        self.store.slots().remove(&key);
        Ok(())
    }

    fn key<A: Serialize + ?Sized>(&self, operation: &'static str, args: &A) -> Result<CacheKey> {
        let args = serde_json::to_string(args).map_err(|e| {
            QuoterError::CalculationError(format!("Cannot serialize cache key for {operation}: {e}"))
        })?;
        Ok(CacheKey {
            owner: self.owner,
            operation,
            args,
        })
    }

    fn record(&self, operation: &'static str, outcome: CacheOutcome) {
        if let Some(metrics) = &self.metrics {
            metrics.record_cache(operation, outcome);
        }
    }
}

/// Wraps a read so that its completion replaces the pending slot: a value
/// becomes a ready entry, an error clears the slot so the next call retries.
fn settle<T, Fut>(
    store: Weak<Store>,
    key: CacheKey,
    id: u64,
    policy: CachePolicy,
    read: Fut,
) -> PendingRead
where
    T: Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    async move {
        let result = read.await.map(|value| Arc::new(value) as Value);
        if let Some(store) = store.upgrade() {
            let mut slots = store.slots();
            let still_ours = matches!(slots.get(&key), Some(Slot::Pending { id: pending, .. }) if *pending == id);
            if still_ours {
                match &result {
                    Ok(value) => {
                        slots.insert(
                            key,
                            Slot::Ready {
                                value: value.clone(),
                                expires_at: policy.expiry_from(Instant::now()),
                            },
                        );
                    }
                    Err(_) => {
                        slots.remove(&key);
                    }
                }
            }
        }
        result
    }
    .boxed()
    .shared()
}

fn downcast<T: Clone + 'static>(operation: &str, value: &Value) -> Result<T> {
    value.downcast_ref::<T>().cloned().ok_or_else(|| {
        QuoterError::CalculationError(format!("Cached value for {operation} has an unexpected type"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::join_all;
    use std::sync::atomic::AtomicUsize;

    fn counting_read(
        calls: &Arc<AtomicUsize>,
        value: u64,
    ) -> impl Future<Output = Result<u64>> + Send + 'static {
        let calls = calls.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(value)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_reads_share_one_backing_call() {
        let cache = MemoCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let policy = CachePolicy::ttl_ms(5_000);

        let reads = (0..10).map(|_| {
            cache.get_or_fetch("gas_price", &(), policy, || counting_read(&calls, 42))
        });
        let results = join_all(reads).await;

        assert!(results.iter().all(|r| matches!(r, Ok(42))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let hit: u64 = cache
            .get_or_fetch("gas_price", &(), policy, || counting_read(&calls, 7))
            .await
            .unwrap();
        assert_eq!(hit, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_millis(5_001)).await;

        let refreshed: u64 = cache
            .get_or_fetch("gas_price", &(), policy, || counting_read(&calls, 43))
            .await
            .unwrap();
        assert_eq!(refreshed, 43);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn forever_policy_never_refetches() {
        let cache = MemoCache::new();
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let v: u64 = cache
                .get_or_fetch("decimals", &"0xabc", CachePolicy::Forever, || counting_read(&calls, 18))
                .await
                .unwrap();
            assert_eq!(v, 18);
            tokio::time::advance(Duration::from_secs(3_600)).await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn errors_are_shared_but_not_cached() {
        let cache = MemoCache::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let failing = || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::task::yield_now().await;
                Err::<u64, _>(QuoterError::RpcError("boom".to_string()))
            }
        };

        let (a, b) = tokio::join!(
            cache.get_or_fetch("chain_id", &(), CachePolicy::Forever, failing),
            cache.get_or_fetch("chain_id", &(), CachePolicy::Forever, failing),
        );
        assert!(matches!(a, Err(QuoterError::RpcError(_))));
        assert!(matches!(b, Err(QuoterError::RpcError(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let ok: u64 = cache
            .get_or_fetch("chain_id", &(), CachePolicy::Forever, || async { Ok(56u64) })
            .await
            .unwrap();
        assert_eq!(ok, 56);
    }

    #[tokio::test]
    async fn owners_and_arguments_are_isolated() {
        let cache = MemoCache::new();
        let other = cache.scoped();

        let a: u64 = cache
            .get_or_fetch("decimals", &"a", CachePolicy::Forever, || async { Ok(18u64) })
            .await
            .unwrap();
        let b: u64 = cache
            .get_or_fetch("decimals", &"b", CachePolicy::Forever, || async { Ok(6u64) })
            .await
            .unwrap();
        let c: u64 = other
            .get_or_fetch("decimals", &"a", CachePolicy::Forever, || async { Ok(9u64) })
            .await
            .unwrap();
        assert_eq!((a, b, c), (18, 6, 9));
    }

    #[tokio::test]
    async fn invalidate_forces_a_new_read() {
        let cache = MemoCache::new();
        let first: u64 = cache
            .get_or_fetch("symbol", &(), CachePolicy::Forever, || async { Ok(1u64) })
            .await
            .unwrap();
        cache.invalidate("symbol", &()).unwrap();
        let second: u64 = cache
            .get_or_fetch("symbol", &(), CachePolicy::Forever, || async { Ok(2u64) })
            .await
            .unwrap();
        assert_eq!((first, second), (1, 2));
    }

    #[tokio::test]
    async fn hits_are_counted() {
        let metrics = Arc::new(QuoterMetrics::new().unwrap());
        let cache = MemoCache::new().with_metrics(metrics.clone());
        for _ in 0..3 {
            let _: u64 = cache
                .get_or_fetch("chain_id", &(), CachePolicy::Forever, || async { Ok(56u64) })
                .await
                .unwrap();
        }
        assert_eq!(metrics.cache_count("chain_id", CacheOutcome::Miss), 1);
        assert_eq!(metrics.cache_count("chain_id", CacheOutcome::Hit), 2);
    }
}
