use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use common_metrics::subs::TcpMetrics;
use common_types::SurgeError;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::config::TcpConfig;

/// Lending pool of connected sockets. Unlike the HTTP and Redis pools the
/// handles here are exclusive: a leased stream leaves the deque, and a
/// stream returned unhealthy is dropped and replaced by a fresh dial on the
/// next acquire.
pub struct TcpSocketPool {
    config: TcpConfig,
    sockets: Mutex<VecDeque<TcpStream>>,
    permits: Arc<Semaphore>,
    closed: AtomicBool,
    size: usize,
    metrics: Arc<TcpMetrics>,
}

impl TcpSocketPool {
    pub async fn new(config: TcpConfig, metrics: Arc<TcpMetrics>) -> Result<Self, SurgeError> {
        let size = config.pool.size;
        let pool = Self {
            config,
            sockets: Mutex::new(VecDeque::with_capacity(size)),
            permits: Arc::new(Semaphore::new(size)),
            closed: AtomicBool::new(false),
            size,
            metrics,
        };
        for _ in 0..size {
            // A partial failure drops every socket already dialed.
            let stream = pool
                .dial()
                .await
                .map_err(|err| SurgeError::PoolInit(err.to_string()))?;
            pool.sockets.lock().await.push_back(stream);
        }
        debug!(size, addr = %pool.config.address, "tcp socket pool ready");
        Ok(pool)
    }

    pub(crate) async fn dial(&self) -> Result<TcpStream, SurgeError> {
        let started = Instant::now();
        let stream = tokio::time::timeout(
            self.config.connect_timeout,
            TcpStream::connect(&self.config.address),
        )
        .await
        .map_err(|_| {
            SurgeError::Transport(format!("connect to {} timed out", self.config.address))
        })?
        .map_err(|err| {
            SurgeError::Transport(format!("connect to {} failed: {err}", self.config.address))
        })?;
        if self.config.nodelay {
            stream
                .set_nodelay(true)
                .map_err(|err| SurgeError::Transport(format!("set_nodelay failed: {err}")))?;
        }
        self.metrics
            .record_connect_ms(started.elapsed().as_secs_f64() * 1e3);
        Ok(stream)
    }

    pub async fn acquire(
        &self,
        deadline: Duration,
    ) -> Result<(TcpStream, OwnedSemaphorePermit), SurgeError> {
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
        let pooled = self.sockets.lock().await.pop_front();
        let stream = match pooled {
            Some(stream) => stream,
            // A previously retired handle gets replaced here.
            None => self.dial().await?,
        };
        Ok((stream, permit))
    }

    /// Return a leased stream. Broken streams are discarded, never leaked;
    /// after close everything is discarded.
    pub async fn release(
        &self,
        stream: TcpStream,
        _permit: OwnedSemaphorePermit,
        reusable: bool,
    ) {
        if reusable && !self.closed.load(Ordering::Acquire) {
            self.sockets.lock().await.push_back(stream);
        }
    }

    pub fn in_flight(&self) -> usize {
        if self.closed.load(Ordering::Acquire) {
            return 0;
        }
        self.size - self.permits.available_permits()
    }

    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.permits.close();
        self.sockets.lock().await.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
