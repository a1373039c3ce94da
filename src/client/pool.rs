//! Backend Connection Pool
//!
//! Bounds in-flight REST calls: one counting semaphore per backend plus a
//! process-wide ceiling. The pool is created once and handed to every
//! [`RestClient`](crate::client::RestClient) by reference.
//!
//! Acquisition waits in FIFO order with no timeout. If an array never
//! frees capacity, callers wait until their future is dropped.
//!
//! The backend slot is taken before the global one, so callers queued on a
//! saturated array never hold a global slot another array could use.

use crate::error::{Error, Result};
use crate::metrics;
use dashmap::DashMap;
use prometheus::IntGauge;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info};

/// Default per-backend concurrency
pub const DEFAULT_MAX_CLIENT_THREADS: usize = 30;

/// Lower clamp for per-backend concurrency
pub const MIN_MAX_CLIENT_THREADS: usize = 1;

/// Upper clamp for per-backend concurrency
pub const MAX_MAX_CLIENT_THREADS: usize = 50;

/// Default process-wide ceiling
pub const DEFAULT_MAX_TOTAL_REQUESTS: usize = 200;

/// Clamp a configured per-backend limit into the supported range
pub fn clamp_max_client_threads(configured: Option<usize>) -> usize {
    configured
        .unwrap_or(DEFAULT_MAX_CLIENT_THREADS)
        .clamp(MIN_MAX_CLIENT_THREADS, MAX_MAX_CLIENT_THREADS)
}

/// Permits held for the duration of one HTTP exchange
pub struct CallPermit {
    _global: OwnedSemaphorePermit,
    _backend: OwnedSemaphorePermit,
    in_flight: IntGauge,
}

impl fmt::Debug for CallPermit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallPermit")
            .field("in_flight", &self.in_flight.get())
            .finish()
    }
}

impl Drop for CallPermit {
    fn drop(&mut self) {
        self.in_flight.dec();
    }
}

/// Registry of per-backend semaphores
pub struct BackendConnectionPool {
    global: Arc<Semaphore>,
    backends: DashMap<String, Arc<Semaphore>>,
}

impl BackendConnectionPool {
    pub fn new(max_total_requests: usize) -> Arc<Self> {
        Arc::new(Self {
            global: Arc::new(Semaphore::new(max_total_requests.max(1))),
            backends: DashMap::new(),
        })
    }

    /// Create the backend's semaphore if it does not exist yet
    pub fn register(&self, backend: &str, max_client_threads: Option<usize>) {
        self.backends.entry(backend.to_string()).or_insert_with(|| {
            let permits = clamp_max_client_threads(max_client_threads);
            info!(backend, permits, "Registered backend connection limit");
            Arc::new(Semaphore::new(permits))
        });
    }

    /// Wait for a global slot and a backend slot
    pub async fn acquire(&self, backend: &str) -> Result<CallPermit> {
        let semaphore = match self.backends.get(backend) {
            Some(entry) => Arc::clone(entry.value()),
            None => {
                return Err(Error::BackendClosed {
                    backend: backend.to_string(),
                })
            }
        };

        let local = semaphore
            .acquire_owned()
            .await
            .map_err(|_| Error::BackendClosed {
                backend: backend.to_string(),
            })?;
        let global = Arc::clone(&self.global)
            .acquire_owned()
            .await
            .map_err(|_| Error::Internal("global connection limiter closed".into()))?;

        let in_flight = metrics::metrics().in_flight.with_label_values(&[backend]);
        in_flight.inc();

        Ok(CallPermit {
            _global: global,
            _backend: local,
            in_flight,
        })
    }

    /// Free slots for a backend
    pub fn available(&self, backend: &str) -> Option<usize> {
        self.backends
            .get(backend)
            .map(|entry| entry.value().available_permits())
    }

    /// Tear down a backend removed at runtime. Waiters fail with
    /// [`Error::BackendClosed`]; calls already in flight finish normally.
    pub fn close(&self, backend: &str) {
        if let Some((_, semaphore)) = self.backends.remove(backend) {
            semaphore.close();
            debug!(backend, "Closed backend connection limit");
        }
    }
}

impl Default for BackendConnectionPool {
    fn default() -> Self {
        Self {
            global: Arc::new(Semaphore::new(DEFAULT_MAX_TOTAL_REQUESTS)),
            backends: DashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_clamp() {
        assert_eq!(clamp_max_client_threads(None), DEFAULT_MAX_CLIENT_THREADS);
        assert_eq!(clamp_max_client_threads(Some(0)), MIN_MAX_CLIENT_THREADS);
        assert_eq!(clamp_max_client_threads(Some(500)), MAX_MAX_CLIENT_THREADS);
        assert_eq!(clamp_max_client_threads(Some(8)), 8);
    }

    #[tokio::test]
    async fn test_permits_are_returned_on_drop() {
        let pool = BackendConnectionPool::new(10);
        pool.register("array-a", Some(2));

        let p1 = pool.acquire("array-a").await.unwrap();
        let _p2 = pool.acquire("array-a").await.unwrap();
        assert_eq!(pool.available("array-a"), Some(0));

        drop(p1);
        assert_eq!(pool.available("array-a"), Some(1));
    }

    #[test]
    fn test_waiter_woken_by_release() {
        use tokio_test::{assert_pending, assert_ready_ok, task};

        let pool = BackendConnectionPool::new(10);
        pool.register("array-a", Some(1));
        let held = tokio_test::block_on(pool.acquire("array-a")).unwrap();

        let mut waiter = task::spawn(pool.acquire("array-a"));
        assert_pending!(waiter.poll());

        drop(held);
        assert!(waiter.is_woken());
        assert_ready_ok!(waiter.poll());
    }

    #[tokio::test]
    async fn test_saturated_backend_does_not_starve_others() {
        let pool = BackendConnectionPool::new(2);
        pool.register("array-a", Some(1));
        pool.register("array-b", Some(1));

        let held = pool.acquire("array-a").await.unwrap();
        let mut queued = tokio_test::task::spawn(pool.acquire("array-a"));
        tokio_test::assert_pending!(queued.poll());

        let other = tokio::time::timeout(
            std::time::Duration::from_millis(200),
            pool.acquire("array-b"),
        )
        .await;
        assert!(other.is_ok(), "array-b blocked behind array-a waiters");
        assert_eq!(pool.available("array-b"), Some(0));

        drop(other);
        drop(held);
        tokio_test::assert_ready_ok!(queued.poll());
    }

    #[tokio::test]
    async fn test_register_is_idempotent() {
        let pool = BackendConnectionPool::new(10);
        pool.register("array-a", Some(2));
        pool.register("array-a", Some(40));
        assert_eq!(pool.available("array-a"), Some(2));
    }

    #[tokio::test]
    async fn test_closed_backend_rejects_callers() {
        let pool = BackendConnectionPool::new(10);
        pool.register("array-a", Some(1));
        pool.close("array-a");

        let err = pool.acquire("array-a").await.err().unwrap();
        assert_matches!(err, Error::BackendClosed { .. });
        assert_eq!(pool.available("array-a"), None);
    }

    #[tokio::test]
    async fn test_global_ceiling() {
        let pool = BackendConnectionPool::new(1);
        pool.register("array-a", Some(5));
        pool.register("array-b", Some(5));

        let held = pool.acquire("array-a").await.unwrap();
        let waiting = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            pool.acquire("array-b"),
        )
        .await;
        assert!(waiting.is_err());

        drop(held);
        pool.acquire("array-b").await.unwrap();
    }
}
