//! Bounded pool of vector-store clients.
//!
//! Acquire suspends up to a timeout, then fails with `PoolExhausted`. Health
//! is checked in three tiers (liveness, schema probe, canary round trip),
//! clients recycle after an age or operation count, and a retry wrapper
//! applies exponential backoff with jitter to idempotent operations only.

use super::{Filter, Payload, Point, VectorStore};
use crate::config::PoolConfig;
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

const CANARY_COLLECTION: &str = "_canary";

/// One pooled store client with its recycling bookkeeping.
pub struct StoreClient {
    store: Arc<dyn VectorStore>,
    created_at: Instant,
    ops: AtomicU64,
    healthy: AtomicBool,
}

impl StoreClient {
    fn new(store: Arc<dyn VectorStore>) -> Self {
        Self {
            store,
            created_at: Instant::now(),
            ops: AtomicU64::new(0),
            healthy: AtomicBool::new(true),
        }
    }

    pub fn store(&self) -> &dyn VectorStore {
        self.ops.fetch_add(1, Ordering::Relaxed);
        self.store.as_ref()
    }

    /// Mark the client bad; it is discarded instead of returned to the pool.
    pub fn mark_unhealthy(&self) {
        self.healthy.store(false, Ordering::Relaxed);
    }

    fn due_for_recycle(&self, config: &PoolConfig) -> bool {
        self.created_at.elapsed() >= Duration::from_millis(config.recycle_after_ms)
            || self.ops.load(Ordering::Relaxed) >= config.recycle_after_ops
    }
}

/// Aggregate pool counters; all atomic so stats reads never block.
#[derive(Debug, Default)]
pub struct PoolStats {
    pub acquired: AtomicU64,
    pub acquire_timeouts: AtomicU64,
    pub recycled: AtomicU64,
    pub discarded: AtomicU64,
    pub health_failures: AtomicU64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct PoolStatsSnapshot {
    pub acquired: u64,
    pub acquire_timeouts: u64,
    pub recycled: u64,
    pub discarded: u64,
    pub health_failures: u64,
    pub idle: usize,
    pub max: usize,
}

/// Bounded pool over a store factory.
pub struct StorePool {
    factory: Box<dyn Fn() -> Arc<dyn VectorStore> + Send + Sync>,
    idle: Mutex<Vec<Arc<StoreClient>>>,
    semaphore: Arc<Semaphore>,
    config: PoolConfig,
    stats: PoolStats,
}

impl StorePool {
    /// Pool over a shared backend instance.
    pub fn new(store: Arc<dyn VectorStore>, config: PoolConfig) -> Arc<Self> {
        Self::with_factory(move || Arc::clone(&store), config)
    }

    /// Pool creating clients through `factory`, pre-warmed to `config.min`.
    pub fn with_factory(
        factory: impl Fn() -> Arc<dyn VectorStore> + Send + Sync + 'static,
        config: PoolConfig,
    ) -> Arc<Self> {
        let max = config.max.max(1);
        let pool = Arc::new(Self {
            idle: Mutex::new(Vec::with_capacity(max)),
            semaphore: Arc::new(Semaphore::new(max)),
            factory: Box::new(factory),
            config,
            stats: PoolStats::default(),
        });
        {
            let mut idle = pool.idle.lock();
            for _ in 0..pool.config.min.min(max) {
                idle.push(Arc::new(StoreClient::new((pool.factory)())));
            }
        }
        pool
    }

    /// Acquire a client, suspending at most the configured timeout.
    pub async fn acquire(self: &Arc<Self>) -> Result<PooledClient> {
        self.acquire_timeout(Duration::from_millis(self.config.acquire_timeout_ms))
            .await
    }

    pub async fn acquire_timeout(self: &Arc<Self>, timeout: Duration) -> Result<PooledClient> {
        let started = Instant::now();
        let permit = match tokio::time::timeout(
            timeout,
            Arc::clone(&self.semaphore).acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(Error::storage("pool is closed")),
            Err(_) => {
                self.stats.acquire_timeouts.fetch_add(1, Ordering::Relaxed);
                return Err(Error::PoolExhausted {
                    waited_ms: started.elapsed().as_millis() as u64,
                });
            }
        };

        let client = {
            let mut idle = self.idle.lock();
            idle.pop()
        }
        .unwrap_or_else(|| Arc::new(StoreClient::new((self.factory)())));

        self.stats.acquired.fetch_add(1, Ordering::Relaxed);
        Ok(PooledClient {
            client,
            pool: Arc::clone(self),
            _permit: permit,
        })
    }

    fn release(&self, client: Arc<StoreClient>) {
        if !client.healthy.load(Ordering::Relaxed) {
            self.stats.discarded.fetch_add(1, Ordering::Relaxed);
            return;
        }
        if client.due_for_recycle(&self.config) {
            self.stats.recycled.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.idle.lock().push(client);
    }

    /// Fast tier: does some client answer a trivial call.
    pub fn health_fast(&self) -> bool {
        let client = (self.factory)();
        client.count(CANARY_COLLECTION, &Filter::new()).is_ok()
            || client.ensure_collection(CANARY_COLLECTION, 4).is_ok()
    }

    /// Medium tier: schema probe of the canary collection.
    pub fn health_medium(&self) -> Result<()> {
        let client = (self.factory)();
        client.ensure_collection(CANARY_COLLECTION, 4)?;
        let dimension = client.dimension(CANARY_COLLECTION)?;
        if dimension != 4 {
            self.stats.health_failures.fetch_add(1, Ordering::Relaxed);
            return Err(Error::storage(format!(
                "canary dimension drifted to {dimension}"
            )));
        }
        Ok(())
    }

    /// Deep tier: full round trip through a pooled client.
    pub async fn health_deep(self: &Arc<Self>) -> Result<()> {
        let pooled = self.acquire().await?;
        let store = pooled.client().store();
        store.ensure_collection(CANARY_COLLECTION, 4)?;
        let id = "canary".to_string();
        let result = store
            .upsert(
                CANARY_COLLECTION,
                vec![Point {
                    id: id.clone(),
                    vector: vec![0.5, 0.5, 0.5, 0.5],
                    payload: Payload::default(),
                }],
            )
            .and_then(|()| store.delete(CANARY_COLLECTION, std::slice::from_ref(&id)))
            .map(|_| ());
        if result.is_err() {
            self.stats.health_failures.fetch_add(1, Ordering::Relaxed);
            pooled.client().mark_unhealthy();
        }
        result
    }

    pub fn stats(&self) -> PoolStatsSnapshot {
        PoolStatsSnapshot {
            acquired: self.stats.acquired.load(Ordering::Relaxed),
            acquire_timeouts: self.stats.acquire_timeouts.load(Ordering::Relaxed),
            recycled: self.stats.recycled.load(Ordering::Relaxed),
            discarded: self.stats.discarded.load(Ordering::Relaxed),
            health_failures: self.stats.health_failures.load(Ordering::Relaxed),
            idle: self.idle.lock().len(),
            max: self.config.max,
        }
    }
}

/// RAII guard: the client returns to the pool on every exit path.
pub struct PooledClient {
    client: Arc<StoreClient>,
    pool: Arc<StorePool>,
    _permit: OwnedSemaphorePermit,
}

impl PooledClient {
    pub fn client(&self) -> &StoreClient {
        &self.client
    }

    pub fn store(&self) -> &dyn VectorStore {
        self.client.store()
    }
}

impl Drop for PooledClient {
    fn drop(&mut self) {
        self.pool.release(Arc::clone(&self.client));
    }
}

/// Retry an idempotent operation with exponential backoff and jitter.
///
/// Callers must only hand idempotent closures here (upsert by id, delete);
/// non-idempotent operations are not retried anywhere in the engine.
pub async fn retry_idempotent<T, F, Fut>(operation: &str, attempts: u32, mut run: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut delay = Duration::from_millis(50);
    let mut last_error = None;
    for attempt in 0..attempts.max(1) {
        match run().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt + 1 < attempts => {
                tracing::debug!(operation, attempt, "retrying after transient error: {e}");
                let jitter = Duration::from_millis(
                    (std::time::SystemTime::now()
                        .duration_since(std::time::UNIX_EPOCH)
                        .map(|d| d.subsec_nanos() as u64)
                        .unwrap_or(0))
                        % delay.as_millis().max(1) as u64,
                );
                tokio::time::sleep(delay + jitter).await;
                delay = delay.saturating_mul(2);
                last_error = Some(e);
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_error.unwrap_or_else(|| Error::storage(format!("{operation} failed"))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LocalVectorStore;

    fn pool_with(max: usize) -> Arc<StorePool> {
        let store: Arc<dyn VectorStore> = Arc::new(LocalVectorStore::in_memory());
        StorePool::new(
            store,
            PoolConfig {
                min: 1,
                max,
                acquire_timeout_ms: 50,
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn acquire_and_release() {
        let pool = pool_with(2);
        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        drop(a);
        drop(b);
        let stats = pool.stats();
        assert_eq!(stats.acquired, 2);
        assert_eq!(stats.acquire_timeouts, 0);
    }

    #[tokio::test]
    async fn exhausted_pool_times_out() {
        let pool = pool_with(1);
        let _held = pool.acquire().await.unwrap();
        let result = pool.acquire().await;
        assert!(matches!(result, Err(Error::PoolExhausted { .. })));
        assert_eq!(pool.stats().acquire_timeouts, 1);
    }

    #[tokio::test]
    async fn released_client_unblocks_waiter() {
        let pool = pool_with(1);
        let held = pool.acquire().await.unwrap();

        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.acquire_timeout(Duration::from_secs(1)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(held);

        assert!(waiter.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn unhealthy_client_is_discarded() {
        let pool = pool_with(1);
        {
            let pooled = pool.acquire().await.unwrap();
            pooled.client().mark_unhealthy();
        }
        assert_eq!(pool.stats().discarded, 1);
        // The pool still hands out a fresh client afterwards.
        assert!(pool.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn health_tiers_pass_on_live_store() {
        let pool = pool_with(2);
        assert!(pool.health_fast());
        pool.health_medium().unwrap();
        pool.health_deep().await.unwrap();
    }

    #[tokio::test]
    async fn retry_succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&calls);
        let result = retry_idempotent("test", 3, move || {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(Error::storage("transient"))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_gives_up_on_non_retryable() {
        let calls = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&calls);
        let result: Result<()> = retry_idempotent("test", 5, move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(Error::validation("bad input"))
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
