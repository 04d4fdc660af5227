//! Fixed-size pool of long-lived storage connections.
//!
//! The pool is filled once at construction and never grows or shrinks. A
//! semaphore with one permit per connection bounds the number of outstanding
//! borrows; callers past that bound wait in [`ConnectionPool::acquire`] until a
//! [`PooledConnection`] is dropped.
//!
//! A borrower that finds its connection unusable calls
//! [`PooledConnection::invalidate`]. The connection is then discarded on
//! release instead of going back on the idle stack, and the next borrower of
//! that permit opens a fresh one through the [`Connector`].

use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::StorageError;

/// Opens physical connections for a [`ConnectionPool`].
pub trait Connector: Send + Sync + 'static {
    type Connection: Send + 'static;

    fn connect(&self) -> impl Future<Output = Result<Self::Connection, StorageError>> + Send;
}

/// Concurrency figures captured when a connection was checked out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkout {
    pub active: u32,
    pub max_concurrent: u32,
}

/// Point-in-time view of the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    pub size: usize,
    pub active: u32,
    pub idle: usize,
    pub max_concurrent: u32,
}

#[derive(Debug, Default)]
struct Counters {
    active: u32,
    max_concurrent: u32,
}

pub struct ConnectionPool<C: Connector> {
    connector: C,
    size: usize,
    /// Idle connections. Fewer than `size - active` entries means some were
    /// discarded and will be reopened lazily.
    idle: Mutex<Vec<C::Connection>>,
    permits: Arc<Semaphore>,
    counters: Mutex<Counters>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<C: Connector> ConnectionPool<C> {
    /// Open `size` connections up front and wrap them in a pool.
    pub async fn new(connector: C, size: usize) -> Result<Arc<Self>, StorageError> {
        if size == 0 {
            return Err(StorageError::InvalidPoolSize);
        }

        let mut idle = Vec::with_capacity(size);
        for _ in 0..size {
            idle.push(connector.connect().await?);
        }

        tracing::debug!(size, "connection pool ready");

        Ok(Arc::new(Self {
            connector,
            size,
            idle: Mutex::new(idle),
            permits: Arc::new(Semaphore::new(size)),
            counters: Mutex::new(Counters::default()),
        }))
    }

    /// Borrow a connection, waiting while all of them are checked out.
    pub async fn acquire(self: &Arc<Self>) -> Result<PooledConnection<C>, StorageError> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| StorageError::PoolClosed)?;

        let reused = lock(&self.idle).pop();
        let conn = match reused {
            Some(conn) => conn,
            None => {
                // Dropping `permit` on the error path hands the slot to the next waiter.
                let conn = self.connector.connect().await.inspect_err(|e| {
                    tracing::error!(error = %e, "failed to reopen pool connection");
                })?;
                tracing::info!("reopened discarded pool connection");
                conn
            }
        };

        let checkout = {
            let mut counters = lock(&self.counters);
            counters.active += 1;
            counters.max_concurrent = counters.max_concurrent.max(counters.active);
            Checkout {
                active: counters.active,
                max_concurrent: counters.max_concurrent,
            }
        };

        Ok(PooledConnection {
            pool: Arc::clone(self),
            conn: Some(conn),
            checkout,
            broken: false,
            _permit: permit,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn status(&self) -> PoolStatus {
        let idle = lock(&self.idle).len();
        let counters = lock(&self.counters);
        PoolStatus {
            size: self.size,
            active: counters.active,
            idle,
            max_concurrent: counters.max_concurrent,
        }
    }

    fn release(&self, conn: Option<C::Connection>) {
        if let Some(conn) = conn {
            lock(&self.idle).push(conn);
        }
        let mut counters = lock(&self.counters);
        counters.active = counters.active.saturating_sub(1);
    }
}

/// A connection borrowed from a [`ConnectionPool`]; returned when dropped.
pub struct PooledConnection<C: Connector> {
    pool: Arc<ConnectionPool<C>>,
    conn: Option<C::Connection>,
    checkout: Checkout,
    broken: bool,
    // Released after `Drop::drop` has put the connection back.
    _permit: OwnedSemaphorePermit,
}

impl<C: Connector> PooledConnection<C> {
    pub fn checkout(&self) -> Checkout {
        self.checkout
    }

    /// Discard this connection on release instead of reusing it.
    pub fn invalidate(&mut self) {
        self.broken = true;
    }
}

impl<C: Connector> Deref for PooledConnection<C> {
    type Target = C::Connection;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref().expect("connection is only taken on drop")
    }
}

impl<C: Connector> DerefMut for PooledConnection<C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().expect("connection is only taken on drop")
    }
}

impl<C: Connector> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        let conn = self.conn.take();
        if self.broken {
            tracing::warn!("discarding broken pool connection");
            self.pool.release(None);
        } else {
            self.pool.release(conn);
        }
    }
}
