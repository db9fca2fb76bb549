use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common_types::SurgeError;
use http::header::{HeaderMap, HeaderName, HeaderValue};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::config::HttpConfig;

/// Fixed pool of prebuilt clients. A semaphore bounds the number of
/// outstanding leases at the configured size; the client behind each lease
/// is selected round-robin. Leases return to the pool when dropped.
pub struct HttpClientPool {
    clients: Vec<reqwest::Client>,
    permits: Arc<Semaphore>,
    next: AtomicUsize,
    closed: AtomicBool,
    size: usize,
}

pub struct HttpLease {
    pub client: reqwest::Client,
    _permit: OwnedSemaphorePermit,
}

impl HttpClientPool {
    pub fn new(cfg: &HttpConfig) -> Result<Self, SurgeError> {
        let size = cfg.pool.size;
        let mut clients = Vec::with_capacity(size);
        for _ in 0..size {
            // A partial failure drops every client already built.
            clients.push(build_client(cfg)?);
        }
        debug!(size, "http client pool ready");
        Ok(Self {
            clients,
            permits: Arc::new(Semaphore::new(size)),
            next: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            size,
        })
    }

    pub async fn acquire(&self, deadline: Duration) -> Result<HttpLease, SurgeError> {
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
        Ok(HttpLease {
            client: self.clients[index].clone(),
            _permit: permit,
        })
    }

    /// Outstanding leases; 0 once the pool is closed.
    pub fn in_flight(&self) -> usize {
        if self.closed.load(Ordering::Acquire) {
            return 0;
        }
        self.size - self.permits.available_permits()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Idempotent; subsequent acquires fail with `PoolClosed`.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.permits.close();
        }
    }
}

fn build_client(cfg: &HttpConfig) -> Result<reqwest::Client, SurgeError> {
    let mut headers = HeaderMap::new();
    for (name, value) in &cfg.headers {
        let name: HeaderName = name
            .parse()
            .map_err(|_| SurgeError::ConfigInvalid(format!("invalid header name {name:?}")))?;
        let value: HeaderValue = value
            .parse()
            .map_err(|_| SurgeError::ConfigInvalid(format!("invalid header value for {name:?}")))?;
        headers.insert(name, value);
    }

    let redirect = if cfg.redirect.follow {
        reqwest::redirect::Policy::limited(cfg.redirect.max_redirects)
    } else {
        reqwest::redirect::Policy::none()
    };

    let mut builder = reqwest::Client::builder()
        .user_agent(cfg.user_agent.clone())
        .default_headers(headers)
        .redirect(redirect);
    if let Some(tls) = &cfg.tls {
        builder = tls.apply(builder)?;
    }
    builder
        .build()
        .map_err(|err| SurgeError::PoolInit(format!("failed to build http client: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(size: usize) -> HttpClientPool {
        let cfg = HttpConfig {
            base_url: "http://localhost:1".into(),
            pool: crate::config::PoolConfig {
                size,
                acquire_timeout: Duration::from_millis(50),
            },
            ..HttpConfig::default()
        };
        HttpClientPool::new(&cfg).unwrap()
    }

    #[tokio::test]
    async fn leases_are_bounded_by_the_pool_size() {
        let pool = pool(2);
        let first = pool.acquire(Duration::from_millis(50)).await.unwrap();
        let _second = pool.acquire(Duration::from_millis(50)).await.unwrap();
        assert_eq!(pool.in_flight(), 2);

        let exhausted = pool.acquire(Duration::from_millis(50)).await;
        assert_eq!(exhausted.err(), Some(SurgeError::PoolExhausted));

        drop(first);
        pool.acquire(Duration::from_millis(50)).await.unwrap();
    }

    #[tokio::test]
    async fn close_is_idempotent_and_fails_acquires() {
        let pool = pool(2);
        pool.close();
        pool.close();
        assert!(pool.is_closed());
        assert_eq!(pool.in_flight(), 0);
        let err = pool.acquire(Duration::from_millis(10)).await;
        assert_eq!(err.err(), Some(SurgeError::PoolClosed));
    }

    #[test]
    fn bad_default_headers_fail_construction() {
        let mut cfg = HttpConfig {
            base_url: "http://localhost:1".into(),
            ..HttpConfig::default()
        };
        cfg.headers.insert("bad header".into(), "v".into());
        assert!(HttpClientPool::new(&cfg).is_err());
    }
}
