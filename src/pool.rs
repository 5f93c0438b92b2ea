use crate::{Connector, Error, Result};
use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Debug, Clone)]
pub struct PoolOptions {
    /// Upper bound on concurrently open connections.
    pub max_connections: usize,
    /// How long `acquire` may wait for a free slot before failing.
    pub acquire_timeout: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            max_connections: 10,
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

/// Bounded connection pool. Cheap to clone, all clones share the same
/// connections.
///
/// Connections open lazily on demand and return to the idle list when their
/// lease drops. Waiters queue on a fair semaphore, so acquisition is
/// first-come first-served under contention.
pub struct Pool<C: Connector> {
    inner: Arc<PoolInner<C>>,
}

impl<C: Connector> Clone for Pool<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct PoolInner<C: Connector> {
    connector: C,
    idle: Mutex<Vec<C::Backend>>,
    permits: Arc<Semaphore>,
    options: PoolOptions,
}

impl<C: Connector> Pool<C> {
    pub fn new(connector: C, options: PoolOptions) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                connector,
                idle: Mutex::new(Vec::new()),
                permits: Arc::new(Semaphore::new(options.max_connections)),
                options,
            }),
        }
    }

    pub fn options(&self) -> &PoolOptions {
        &self.inner.options
    }

    /// Number of idle connections currently pooled.
    pub fn idle_count(&self) -> usize {
        self.inner
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Lease a connection, reusing an idle one when available and opening a
    /// fresh one otherwise. Fails with [`Error::PoolTimeout`] when no slot
    /// frees up within `acquire_timeout`.
    pub async fn acquire(&self) -> Result<PooledConn<C>> {
        let permit = tokio::time::timeout(
            self.inner.options.acquire_timeout,
            self.inner.permits.clone().acquire_owned(),
        )
        .await
        .map_err(|_| Error::PoolTimeout)?
        .map_err(|_| Error::execution("connection pool is closed"))?;
        let reused = self
            .inner
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();
        let backend = match reused {
            Some(backend) => backend,
            None => self.inner.connector.connect().await?,
        };
        Ok(PooledConn {
            backend: Some(backend),
            discard: false,
            pool: self.inner.clone(),
            _permit: permit,
        })
    }
}

/// RAII lease of one pooled connection.
///
/// Dropping the lease returns the connection to the pool, unless it was
/// marked for discard: a discarded connection is closed instead, which
/// implicitly rolls back any transaction still open on it.
pub struct PooledConn<C: Connector> {
    backend: Option<C::Backend>,
    discard: bool,
    pool: Arc<PoolInner<C>>,
    _permit: OwnedSemaphorePermit,
}

impl<C: Connector> PooledConn<C> {
    pub fn backend_mut(&mut self) -> &mut C::Backend {
        self.backend
            .as_mut()
            .expect("backend is present until the lease drops")
    }

    /// Mark the connection so its drop closes it instead of pooling it.
    pub fn set_discard(&mut self, discard: bool) {
        self.discard = discard;
    }

    pub fn discard(&self) -> bool {
        self.discard
    }
}

impl<C: Connector> Drop for PooledConn<C> {
    fn drop(&mut self) {
        if self.discard {
            return;
        }
        if let Some(backend) = self.backend.take() {
            self.pool
                .idle
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(backend);
        }
    }
}
