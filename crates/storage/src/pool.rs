//! Explicit connection pool for the remote object store.
//!
//! Connections are leased with [`ConnectionPool::acquire`] and handed back
//! with [`Lease::release`]. A lease carries exactly one of two outcomes:
//! `Reusable` puts the connection back on the idle list, `Discard` closes it.
//! Dropping a lease without releasing it discards the connection, so a reader
//! that stops early can never return a connection with unread response bytes
//! still on the wire.

use crate::error::StorageResult;
use async_trait::async_trait;
use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// A connection that can sit idle in the pool.
#[async_trait]
pub trait PooledConnection: Send + 'static {
    /// Wait until the connection can carry another request. Returns false if
    /// the peer closed it while it was idle.
    async fn ready(&mut self) -> bool;
}

/// What to do with a connection when its lease ends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Release {
    /// The exchange completed cleanly; keep the connection.
    Reusable,
    /// The connection's protocol state is unknown; close it.
    Discard,
}

/// Pool counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Connections currently idle.
    pub idle: usize,
    /// Connections opened since the pool was created.
    pub created: u64,
    /// Leases served by an idle connection.
    pub reused: u64,
    /// Connections closed instead of returned.
    pub discarded: u64,
}

struct PoolInner<C> {
    idle: Mutex<Vec<C>>,
    max_idle: usize,
    created: AtomicU64,
    reused: AtomicU64,
    discarded: AtomicU64,
}

impl<C> PoolInner<C> {
    fn lock_idle(&self) -> std::sync::MutexGuard<'_, Vec<C>> {
        // A panic while holding the lock cannot leave the Vec inconsistent.
        self.idle.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn put_back(&self, conn: C) {
        let mut idle = self.lock_idle();
        if idle.len() < self.max_idle {
            idle.push(conn);
        } else {
            drop(idle);
            self.discarded.fetch_add(1, Ordering::Relaxed);
            drop(conn);
        }
    }

    fn discard(&self, conn: C) {
        self.discarded.fetch_add(1, Ordering::Relaxed);
        drop(conn);
    }
}

/// Process-wide pool of connections to one remote endpoint.
pub struct ConnectionPool<C> {
    inner: Arc<PoolInner<C>>,
}

impl<C> Clone for ConnectionPool<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: PooledConnection> ConnectionPool<C> {
    /// Create a pool keeping at most `max_idle` idle connections.
    pub fn new(max_idle: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                idle: Mutex::new(Vec::with_capacity(max_idle)),
                max_idle,
                created: AtomicU64::new(0),
                reused: AtomicU64::new(0),
                discarded: AtomicU64::new(0),
            }),
        }
    }

    /// Lease a connection: an idle one that is still usable, or a new one
    /// from `connect`.
    pub async fn acquire<F, Fut>(&self, connect: F) -> StorageResult<Lease<C>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = StorageResult<C>>,
    {
        loop {
            let candidate = self.inner.lock_idle().pop();
            let Some(mut conn) = candidate else { break };
            if conn.ready().await {
                self.inner.reused.fetch_add(1, Ordering::Relaxed);
                return Ok(self.lease(conn));
            }
            tracing::debug!("discarding idle connection closed by peer");
            self.inner.discard(conn);
        }

        let conn = connect().await?;
        self.inner.created.fetch_add(1, Ordering::Relaxed);
        Ok(self.lease(conn))
    }

    fn lease(&self, conn: C) -> Lease<C> {
        Lease {
            conn: Some(conn),
            pool: Arc::clone(&self.inner),
        }
    }

    /// Number of idle connections.
    pub fn idle_count(&self) -> usize {
        self.inner.lock_idle().len()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            idle: self.idle_count(),
            created: self.inner.created.load(Ordering::Relaxed),
            reused: self.inner.reused.load(Ordering::Relaxed),
            discarded: self.inner.discarded.load(Ordering::Relaxed),
        }
    }
}

/// Exclusive use of one pooled connection.
pub struct Lease<C> {
    conn: Option<C>,
    pool: Arc<PoolInner<C>>,
}

impl<C> Lease<C> {
    /// End the lease with the given outcome.
    pub fn release(mut self, outcome: Release) {
        if let Some(conn) = self.conn.take() {
            match outcome {
                Release::Reusable => self.pool.put_back(conn),
                Release::Discard => self.pool.discard(conn),
            }
        }
    }
}

impl<C> Deref for Lease<C> {
    type Target = C;

    fn deref(&self) -> &C {
        // Only `release` and `drop` take the connection, and both consume the lease.
        self.conn.as_ref().unwrap_or_else(|| unreachable!("lease used after release"))
    }
}

impl<C> DerefMut for Lease<C> {
    fn deref_mut(&mut self) -> &mut C {
        self.conn.as_mut().unwrap_or_else(|| unreachable!("lease used after release"))
    }
}

impl<C> Drop for Lease<C> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.discard(conn);
        }
    }
}
