use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common_types::SurgeError;
use redis::aio::MultiplexedConnection;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::config::RedisConfig;

/// Fixed pool of multiplexed connections, same lease shape as the HTTP
/// pool: a semaphore bounds outstanding leases, round-robin picks the
/// connection behind each one.
pub struct RedisConnectionPool {
    connections: Vec<MultiplexedConnection>,
    permits: Arc<Semaphore>,
    next: AtomicUsize,
    closed: AtomicBool,
    size: usize,
}

pub struct RedisLease {
    pub connection: MultiplexedConnection,
    pub(crate) _permit: OwnedSemaphorePermit,
}

impl RedisConnectionPool {
    pub async fn new(cfg: &RedisConfig) -> Result<Self, SurgeError> {
        let client = redis::Client::open(cfg.url())
            .map_err(|err| SurgeError::PoolInit(format!("invalid redis url: {err}")))?;
        let size = cfg.pool.size;
        let mut connections = Vec::with_capacity(size);
        for _ in 0..size {
            // A partial failure drops every connection already built.
            let connection = client
                .get_multiplexed_async_connection()
                .await
                .map_err(|err| {
                    SurgeError::PoolInit(format!("failed to connect to redis: {err}"))
                })?;
            connections.push(connection);
        }
        debug!(size, "redis connection pool ready");
        Ok(Self {
            connections,
            permits: Arc::new(Semaphore::new(size)),
            next: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            size,
        })
    }

    pub async fn acquire(&self, deadline: Duration) -> Result<RedisLease, SurgeError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SurgeError::PoolClosed);
        }
        let permit = match tokio::time::timeout(deadline, self.permits.clone().acquire_owned())
            .await
        {
            Err(_) => return Err(SurgeError::PoolExhausted),
            Ok(Err(_)) => return Err(SurgeError::PoolClosed),
            Ok(Ok(permit)) => permit,
        };
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.size;
        Ok(RedisLease {
            connection: self.connections[index].clone(),
            _permit: permit,
        })
    }

    pub fn in_flight(&self) -> usize {
        if self.closed.load(Ordering::Acquire) {
            return 0;
        }
        self.size - self.permits.available_permits()
    }

    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.permits.close();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
