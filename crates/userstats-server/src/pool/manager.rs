//! Bounded pool of reusable outbound connections.
//!
//! This module defines the [`ConnectionPool`] contract consumed by the
//! aggregation coordinator and its production implementation, [`Pool`].
//!
//! A [`Pool`] never holds more than `capacity` live connections (idle plus
//! checked out). Idle connections live in a lock-free bounded queue so the
//! common borrow/return paths never contend on a lock; only the `active`
//! counter sits behind a mutex.
//!
//! Borrowing follows three steps:
//!
//! 1. Pop an idle connection if there is one.
//! 2. Otherwise reserve a slot and dial a new connection, if under capacity.
//! 3. Otherwise wait until another holder returns a connection.
//!
//! There is no built-in deadline on step 3. Callers that need a bounded wait
//! wrap [`ConnectionPool::get`] in [`tokio::time::timeout`] or race it against
//! a cancellation token; dropping the future is always safe.

use super::connector::{Connector, GrpcConnector};
use crate::telemetry::increment_connections_dialed;
use core::future::Future;
use core::sync::atomic::{AtomicBool, Ordering};
use core::time::Duration;
use crossbeam::queue::ArrayQueue;
use parking_lot::Mutex;
use tokio::sync::Notify;
use userstats_core::{Error, Result};

/// Borrow/return contract for a pool of connections.
pub trait ConnectionPool: Send + Sync + 'static {
    type Conn: Send + 'static;

    /// Borrows a connection, dialing or waiting as needed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connect`] if a new connection could not be
    /// established and [`Error::PoolClosed`] once the pool has been closed.
    fn get(&self) -> impl Future<Output = Result<Self::Conn>> + Send;

    /// Returns a borrowed connection. Never blocks and never fails.
    ///
    /// Only connections obtained from [`get`](Self::get) may be returned. A
    /// connection that does not fit in the idle set is closed and counted
    /// against the live total, so putting a connection the pool never handed
    /// out lowers that total below the number actually open.
    fn put(&self, conn: Self::Conn);

    /// Closes every idle connection. Checked-out connections are closed when
    /// they are returned.
    fn close(&self);
}

/// Bounded connection pool bound to the target of its [`Connector`].
pub struct Pool<C: Connector> {
    connector: C,
    capacity: usize,
    idle: ArrayQueue<C::Conn>,
    active: Mutex<usize>,
    returned: Notify,
    closed: AtomicBool,
}

impl Pool<GrpcConnector> {
    /// Builds a pool of gRPC channels to `target`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `max_size` is zero or `target` is not a
    /// valid URI.
    pub fn grpc(
        target: impl Into<String>,
        max_size: usize,
        connect_timeout: Duration,
    ) -> Result<Self> {
        Self::new(GrpcConnector::new(target, connect_timeout)?, max_size)
    }
}

impl<C: Connector> Pool<C> {
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `max_size` is zero.
    pub fn new(connector: C, max_size: usize) -> Result<Self> {
        if max_size == 0 {
            return Err(Error::config("max_size must be greater than 0"));
        }

        Ok(Self {
            connector,
            capacity: max_size,
            idle: ArrayQueue::new(max_size),
            active: Mutex::new(0),
            returned: Notify::new(),
            closed: AtomicBool::new(false),
        })
    }

    pub fn target(&self) -> &str {
        self.connector.target()
    }

    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Live connections, idle and checked out.
    pub fn active(&self) -> usize {
        *self.active.lock()
    }

    pub fn idle(&self) -> usize {
        self.idle.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Claims one unit of capacity, if any is left.
    fn try_reserve(&self) -> Option<Reservation<'_, C>> {
        let mut active = self.active.lock();
        if *active < self.capacity {
            *active += 1;
            Some(Reservation {
                pool: self,
                armed: true,
            })
        } else {
            None
        }
    }

    /// Gives one unit of capacity back and lets a waiter dial with it.
    fn release(&self) {
        {
            let mut active = self.active.lock();
            *active = active.saturating_sub(1);
        }
        self.returned.notify_one();
    }

    fn discard(&self, conn: C::Conn) {
        self.connector.close(conn);
        self.release();
    }

    fn drain_idle(&self) {
        while let Some(conn) = self.idle.pop() {
            self.discard(conn);
        }
    }

    async fn acquire(&self) -> Result<C::Conn> {
        loop {
            // Register interest before looking, so a `put` or `close` that
            // lands between the checks below and the await is not missed.
            let returned = self.returned.notified();
            tokio::pin!(returned);
            returned.as_mut().enable();

            if self.is_closed() {
                return Err(Error::PoolClosed);
            }

            if let Some(conn) = self.idle.pop() {
                return Ok(conn);
            }

            if let Some(reservation) = self.try_reserve() {
                let conn = self.connector.connect().await?;
                reservation.commit();
                increment_connections_dialed();
                tracing::debug!(target_addr = self.target(), active = self.active(), "dialed new connection");
                return Ok(conn);
            }

            tracing::trace!(target_addr = self.target(), "pool exhausted, waiting for a returned connection");
            returned.await;
        }
    }

    fn release_conn(&self, conn: C::Conn) {
        if self.is_closed() {
            self.discard(conn);
            return;
        }

        match self.idle.push(conn) {
            Ok(()) => {
                // `close` may have drained the queue between the check above
                // and the push.
                if self.is_closed() {
                    self.drain_idle();
                } else {
                    self.returned.notify_one();
                }
            }
            Err(conn) => self.discard(conn),
        }
    }

    fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        self.drain_idle();
        self.returned.notify_waiters();
        tracing::debug!(target_addr = self.target(), active = self.active(), "connection pool closed");
    }
}

impl<C: Connector> ConnectionPool for Pool<C> {
    type Conn = C::Conn;

    fn get(&self) -> impl Future<Output = Result<C::Conn>> + Send {
        self.acquire()
    }

    fn put(&self, conn: C::Conn) {
        self.release_conn(conn);
    }

    fn close(&self) {
        self.shutdown();
    }
}

impl<C: Connector> Drop for Pool<C> {
    fn drop(&mut self) {
        while let Some(conn) = self.idle.pop() {
            self.connector.close(conn);
        }
    }
}

/// A slot claimed against the pool's capacity while a dial is in flight.
///
/// Released on drop unless committed, so a failed or cancelled dial never
/// leaks capacity.
struct Reservation<'a, C: Connector> {
    pool: &'a Pool<C>,
    armed: bool,
}

impl<C: Connector> Reservation<'_, C> {
    fn commit(mut self) {
        self.armed = false;
    }
}

impl<C: Connector> Drop for Reservation<'_, C> {
    fn drop(&mut self) {
        if self.armed {
            self.pool.release();
        }
    }
}
