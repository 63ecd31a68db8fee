//! Bounded pool of object store sessions
//!
//! `acquire` pops an idle session when one is available, opens a new one while
//! the pool is below `max_connections`, and otherwise waits for a release
//! until `connection_timeout` elapses. Checked-out plus idle sessions never
//! exceed `max_connections`.

use std::collections::VecDeque;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{ConnectionFactory, ObjectStoreClient};
use crate::config::PoolConfig;
use crate::error::{Result, StoreError};

/// Snapshot of pool occupancy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Sessions currently checked out
    pub active: usize,
    /// Sessions waiting in the idle queue
    pub idle: usize,
    pub max_connections: usize,
}

struct PoolState {
    idle: VecDeque<Arc<dyn ObjectStoreClient>>,
    /// Live sessions, checked out or idle
    live: usize,
    closed: bool,
}

struct PoolInner {
    factory: Arc<dyn ConnectionFactory>,
    config: PoolConfig,
    state: Mutex<PoolState>,
    available: Notify,
}

impl PoolInner {
    fn give_back(&self, client: Arc<dyn ObjectStoreClient>) {
        let mut state = self.state.lock();
        if !state.closed && state.idle.len() < self.config.max_idle {
            state.idle.push_back(client);
        } else {
            // Idle queue full or pool closed: the session is dropped here.
            state.live = state.live.saturating_sub(1);
        }
        drop(state);
        self.available.notify_one();
    }
}

/// A slot counted in `live` before its session exists. Released on drop
/// unless kept.
struct Reservation<'a> {
    pool: &'a PoolInner,
    armed: bool,
}

impl<'a> Reservation<'a> {
    fn new(pool: &'a PoolInner) -> Self {
        Self { pool, armed: true }
    }

    fn keep(mut self) {
        self.armed = false;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        {
            let mut state = self.pool.state.lock();
            state.live = state.live.saturating_sub(1);
        }
        self.pool.available.notify_one();
    }
}

/// Clonable handle to a shared session pool
#[derive(Clone)]
pub struct ClientPool {
    inner: Arc<PoolInner>,
}

impl fmt::Debug for ClientPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientPool")
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish()
    }
}

impl ClientPool {
    pub fn new(factory: Arc<dyn ConnectionFactory>, config: PoolConfig) -> Self {
        let state = PoolState {
            idle: VecDeque::with_capacity(config.max_idle),
            live: 0,
            closed: false,
        };
        Self {
            inner: Arc::new(PoolInner {
                factory,
                config,
                state: Mutex::new(state),
                available: Notify::new(),
            }),
        }
    }

    /// Check out a session, waiting up to `connection_timeout` for one to free up
    pub async fn acquire(&self) -> Result<PooledClient> {
        let timeout = self.inner.config.connection_timeout;
        let deadline = Instant::now() + timeout;

        loop {
            let notified = self.inner.available.notified();
            let mut notified = std::pin::pin!(notified);
            notified.as_mut().enable();

            let reserved = {
                let mut state = self.inner.state.lock();
                if state.closed {
                    return Err(StoreError::connection("pool is closed"));
                }
                if let Some(client) = state.idle.pop_front() {
                    return Ok(self.wrap(client));
                }
                if state.live < self.inner.config.max_connections {
                    state.live += 1;
                    true
                } else {
                    false
                }
            };

            if reserved {
                // Dropped with the future if the caller gives up mid-connect
                let reservation = Reservation::new(&self.inner);
                let client = self.inner.factory.connect().await?;
                reservation.keep();
                debug!(
                    max_connections = self.inner.config.max_connections,
                    "Opened new object store connection"
                );
                return Ok(self.wrap(client));
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "Timed out waiting for an available object store connection"
                );
                return Err(StoreError::ConnectionTimeout(timeout));
            }
        }
    }

    /// Return a session to the pool. Dropping the guard does the same.
    pub fn release(&self, client: PooledClient) {
        drop(client);
    }

    /// Drain and drop idle sessions. Checked-out sessions are discarded when
    /// they come back.
    pub fn close(&self) {
        let drained = {
            let mut state = self.inner.state.lock();
            state.closed = true;
            let drained = state.idle.len();
            state.idle.clear();
            state.live = state.live.saturating_sub(drained);
            drained
        };
        debug!(drained, "Closed object store connection pool");
        self.inner.available.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.inner.state.lock();
        PoolStats {
            active: state.live - state.idle.len(),
            idle: state.idle.len(),
            max_connections: self.inner.config.max_connections,
        }
    }

    fn wrap(&self, client: Arc<dyn ObjectStoreClient>) -> PooledClient {
        PooledClient {
            client,
            pool: Arc::clone(&self.inner),
        }
    }
}

/// A checked-out session. Returned to the pool on drop.
pub struct PooledClient {
    client: Arc<dyn ObjectStoreClient>,
    pool: Arc<PoolInner>,
}

impl Deref for PooledClient {
    type Target = dyn ObjectStoreClient;

    fn deref(&self) -> &Self::Target {
        self.client.as_ref()
    }
}

impl fmt::Debug for PooledClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledClient").finish_non_exhaustive()
    }
}

impl Drop for PooledClient {
    fn drop(&mut self) {
        self.pool.give_back(Arc::clone(&self.client));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::InMemoryObjectStore;
    use async_trait::async_trait;
    use std::time::Duration;

    /// Opens sessions only after `delay`
    struct SlowFactory {
        store: InMemoryObjectStore,
        delay: Duration,
    }

    #[async_trait]
    impl ConnectionFactory for SlowFactory {
        async fn connect(&self) -> Result<Arc<dyn ObjectStoreClient>> {
            tokio::time::sleep(self.delay).await;
            Ok(Arc::new(self.store.clone()))
        }
    }

    fn pool(store: &InMemoryObjectStore, max: usize, timeout_ms: u64) -> ClientPool {
        ClientPool::new(
            Arc::new(store.clone()),
            PoolConfig::new(max, Duration::from_millis(timeout_ms)),
        )
    }

    // =========================================================================
    // Acquire / Release Tests
    // =========================================================================

    #[tokio::test]
    async fn test_reuses_idle_connection() {
        let store = InMemoryObjectStore::new();
        let pool = pool(&store, 2, 100);

        let c = pool.acquire().await.unwrap();
        pool.release(c);
        let _c = pool.acquire().await.unwrap();

        assert_eq!(store.connections_opened(), 1);
        assert_eq!(
            pool.stats(),
            PoolStats {
                active: 1,
                idle: 0,
                max_connections: 2
            }
        );
    }

    #[tokio::test]
    async fn test_timeout_when_exhausted() {
        let store = InMemoryObjectStore::new();
        let pool = pool(&store, 1, 50);

        let _held = pool.acquire().await.unwrap();
        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, StoreError::ConnectionTimeout(_)));
        assert_eq!(store.connections_opened(), 1);
    }

    #[tokio::test]
    async fn test_waiter_gets_released_connection() {
        let store = InMemoryObjectStore::new();
        let pool = pool(&store, 1, 2_000);

        let held = pool.acquire().await.unwrap();
        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(held);

        waiter.await.unwrap().unwrap();
        assert_eq!(store.connections_opened(), 1);
    }

    #[tokio::test]
    async fn test_failed_connect_frees_slot() {
        let store = InMemoryObjectStore::new();
        let pool = pool(&store, 1, 50);

        store.fail_next_connects(1);
        assert!(matches!(
            pool.acquire().await,
            Err(StoreError::Connection { .. })
        ));
        assert_eq!(pool.stats().active, 0);
        assert!(pool.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn test_full_idle_queue_drops_connection() {
        let store = InMemoryObjectStore::new();
        let mut config = PoolConfig::new(2, Duration::from_millis(50));
        config.max_idle = 1;
        let pool = ClientPool::new(Arc::new(store.clone()), config);

        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        drop(a);
        drop(b);

        assert_eq!(pool.stats().idle, 1);
        assert_eq!(pool.stats().active, 0);
    }

    // =========================================================================
    // Close Tests
    // =========================================================================

    #[tokio::test]
    async fn test_close_drains_and_rejects() {
        let store = InMemoryObjectStore::new();
        let pool = pool(&store, 2, 50);

        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        drop(a);
        pool.close();
        assert_eq!(pool.stats().idle, 0);

        drop(b);
        assert_eq!(pool.stats().active, 0);
        assert!(pool.is_closed());

        let err = pool.acquire().await.unwrap_err();
        assert!(err.to_string().contains("pool is closed"));
    }

    #[tokio::test]
    async fn test_close_with_checked_out_session() {
        let store = InMemoryObjectStore::new();
        let pool = pool(&store, 2, 50);

        let held = pool.acquire().await.unwrap();
        pool.close();

        let err = pool.acquire().await.unwrap_err();
        assert!(err.to_string().contains("pool is closed"));
        assert_eq!(pool.stats().active, 1);

        drop(held);
        assert_eq!(
            pool.stats(),
            PoolStats {
                active: 0,
                idle: 0,
                max_connections: 2
            }
        );
    }

    // =========================================================================
    // Cancellation Tests
    // =========================================================================

    #[tokio::test]
    async fn test_cancelled_connect_frees_slot() {
        let store = InMemoryObjectStore::new();
        let slow = ClientPool::new(
            Arc::new(SlowFactory {
                store: store.clone(),
                delay: Duration::from_millis(500),
            }),
            PoolConfig::new(1, Duration::from_millis(50)),
        );

        let abandoned = tokio::time::timeout(Duration::from_millis(20), slow.acquire()).await;
        assert!(abandoned.is_err());
        assert_eq!(slow.stats().active, 0);
        assert_eq!(slow.stats().idle, 0);
    }

    #[tokio::test]
    async fn test_waiter_takes_slot_after_cancelled_connect() {
        let store = InMemoryObjectStore::new();
        let slow = ClientPool::new(
            Arc::new(SlowFactory {
                store,
                delay: Duration::from_millis(30),
            }),
            PoolConfig::new(1, Duration::from_millis(500)),
        );

        let first = {
            let pool = slow.clone();
            tokio::spawn(async move { pool.acquire().await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        let waiter = {
            let pool = slow.clone();
            tokio::spawn(async move { pool.acquire().await.map(drop) })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        first.abort();

        waiter.await.unwrap().unwrap();
        assert_eq!(slow.stats().active, 0);
        assert_eq!(slow.stats().idle, 1);
    }
}
