//! Bus Connection Pool
//!
//! A fixed set of bus connections shared by request callers and broker
//! workers. It is sized independently of the worker pool, so a slow binding
//! holds one connection without serializing every other binding behind it.

use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::bus::Bus;
use crate::{BusError, BusResult};

/// Opens bus connections
pub trait Connector: Send + Sync {
    fn connect(&self) -> BusResult<Arc<dyn Bus>>;
}

impl<F> Connector for F
where
    F: Fn() -> BusResult<Arc<dyn Bus>> + Send + Sync,
{
    fn connect(&self) -> BusResult<Arc<dyn Bus>> {
        self()
    }
}

/// Pool of reusable bus connections
pub struct ConnectionPool {
    connector: Arc<dyn Connector>,
    idle: Mutex<Vec<Arc<dyn Bus>>>,
    available: Condvar,
    size: usize,
    checkout_timeout: Duration,
}

impl ConnectionPool {
    /// Open `size` connections up front
    pub fn new(connector: Arc<dyn Connector>, size: usize) -> BusResult<Self> {
        let size = size.max(1);
        let mut idle = Vec::with_capacity(size);
        for _ in 0..size {
            idle.push(connector.connect()?);
        }
        tracing::info!(size, "Bus connection pool ready");

        Ok(Self {
            connector,
            idle: Mutex::new(idle),
            available: Condvar::new(),
            size,
            checkout_timeout: Duration::from_secs(5),
        })
    }

    /// Pool whose every slot is the same shared connection
    pub fn shared(bus: Arc<dyn Bus>, size: usize) -> BusResult<Self> {
        let connector = move || -> BusResult<Arc<dyn Bus>> { Ok(Arc::clone(&bus)) };
        Self::new(Arc::new(connector), size)
    }

    pub fn with_checkout_timeout(mut self, timeout: Duration) -> Self {
        self.checkout_timeout = timeout;
        self
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn idle(&self) -> usize {
        self.idle.lock().len()
    }

    /// Check out a connection, waiting up to the checkout timeout
    pub fn get(&self) -> BusResult<PooledConnection<'_>> {
        let mut idle = self.idle.lock();
        loop {
            if let Some(conn) = idle.pop() {
                return Ok(PooledConnection { pool: self, conn });
            }
            if self
                .available
                .wait_for(&mut idle, self.checkout_timeout)
                .timed_out()
                && idle.is_empty()
            {
                return Err(BusError::PoolExhausted(self.checkout_timeout));
            }
        }
    }

    /// Open a connection outside the pool, for long-lived subscriptions
    pub fn dedicated(&self) -> BusResult<Arc<dyn Bus>> {
        self.connector.connect()
    }

    fn release(&self, conn: Arc<dyn Bus>) {
        self.idle.lock().push(conn);
        self.available.notify_one();
    }
}

/// A checked-out connection, returned to the pool on drop
pub struct PooledConnection<'a> {
    pool: &'a ConnectionPool,
    conn: Arc<dyn Bus>,
}

impl Deref for PooledConnection<'_> {
    type Target = dyn Bus;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref()
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        self.pool.release(Arc::clone(&self.conn));
    }
}
