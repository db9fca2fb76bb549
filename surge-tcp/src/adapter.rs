use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use common_metrics::subs::TcpMetrics;
use common_metrics::MetricsCollector;
use common_types::{Operation, OperationResult, ParamValue, SurgeError};
use surge_core::adapter::{not_connected, unsupported, ProtocolAdapter};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::RwLock;
use tracing::info;

use crate::config::TcpConfig;
use crate::pool::TcpSocketPool;

const SUPPORTED: &[&str] = &["echo_test", "send_only", "receive_only", "bidirectional"];

pub struct TcpAdapter {
    config: TcpConfig,
    pool: RwLock<Option<Arc<TcpSocketPool>>>,
    connected: AtomicBool,
    collector: Arc<MetricsCollector>,
    tcp_metrics: Arc<TcpMetrics>,
}

struct IoOutcome {
    bytes_sent: usize,
    bytes_received: usize,
    received: Option<Vec<u8>>,
}

impl TcpAdapter {
    pub fn new(config: TcpConfig) -> Self {
        let tcp_metrics = Arc::new(TcpMetrics::new());
        let collector = Arc::new(MetricsCollector::with_protocol(Box::new(
            tcp_metrics.clone(),
        )));
        Self {
            config,
            pool: RwLock::new(None),
            connected: AtomicBool::new(false),
            collector,
            tcp_metrics,
        }
    }

    pub async fn in_flight(&self) -> usize {
        match self.pool.read().await.as_ref() {
            Some(pool) => pool.in_flight(),
            None => 0,
        }
    }

    async fn read_some(
        &self,
        stream: &mut TcpStream,
        max_bytes: usize,
    ) -> Result<Vec<u8>, SurgeError> {
        let mut buf = vec![0u8; max_bytes.max(1)];
        let n = tokio::time::timeout(self.config.read_timeout, stream.read(&mut buf))
            .await
            .map_err(|_| SurgeError::Timeout(self.config.read_timeout))?
            .map_err(|err| SurgeError::Transport(format!("read failed: {err}")))?;
        if n == 0 {
            return Err(SurgeError::Transport("connection closed by peer".into()));
        }
        buf.truncate(n);
        Ok(buf)
    }

    async fn read_exact(
        &self,
        stream: &mut TcpStream,
        len: usize,
    ) -> Result<Vec<u8>, SurgeError> {
        let mut buf = vec![0u8; len];
        tokio::time::timeout(self.config.read_timeout, stream.read_exact(&mut buf))
            .await
            .map_err(|_| SurgeError::Timeout(self.config.read_timeout))?
            .map_err(|err| SurgeError::Transport(format!("read failed: {err}")))?;
        Ok(buf)
    }

    async fn write_all(
        &self,
        stream: &mut TcpStream,
        payload: &[u8],
    ) -> Result<(), SurgeError> {
        stream
            .write_all(payload)
            .await
            .map_err(|err| SurgeError::Transport(format!("write failed: {err}")))?;
        stream
            .flush()
            .await
            .map_err(|err| SurgeError::Transport(format!("flush failed: {err}")))
    }

    async fn run_io(
        &self,
        stream: &mut TcpStream,
        op: &Operation,
    ) -> Result<IoOutcome, SurgeError> {
        let payload = op.value().map(|b| b.to_vec()).unwrap_or_default();
        match op.op_type() {
            "echo_test" => {
                if payload.is_empty() {
                    return Err(SurgeError::ConfigInvalid(
                        "echo_test requires a payload".into(),
                    ));
                }
                self.write_all(stream, &payload).await?;
                let received = self.read_exact(stream, payload.len()).await?;
                if received != payload {
                    return Err(SurgeError::Protocol(
                        "echo reply does not match the sent bytes".into(),
                    ));
                }
                Ok(IoOutcome {
                    bytes_sent: payload.len(),
                    bytes_received: received.len(),
                    received: Some(received),
                })
            }
            "send_only" => {
                if payload.is_empty() {
                    return Err(SurgeError::ConfigInvalid(
                        "send_only requires a payload".into(),
                    ));
                }
                self.write_all(stream, &payload).await?;
                Ok(IoOutcome {
                    bytes_sent: payload.len(),
                    bytes_received: 0,
                    received: None,
                })
            }
            "receive_only" => {
                let max_bytes = op
                    .param("max_bytes")
                    .and_then(ParamValue::as_i64)
                    .map(|n| n.max(1) as usize)
                    .unwrap_or(4096);
                let received = self.read_some(stream, max_bytes).await?;
                Ok(IoOutcome {
                    bytes_sent: 0,
                    bytes_received: received.len(),
                    received: Some(received),
                })
            }
            "bidirectional" => {
                if payload.is_empty() {
                    return Err(SurgeError::ConfigInvalid(
                        "bidirectional requires a payload".into(),
                    ));
                }
                self.write_all(stream, &payload).await?;
                let received = self.read_some(stream, payload.len()).await?;
                Ok(IoOutcome {
                    bytes_sent: payload.len(),
                    bytes_received: received.len(),
                    received: Some(received),
                })
            }
            // Unknown tags are rejected in `execute` before reaching here.
            other => Err(SurgeError::UnsupportedOperation(other.to_owned())),
        }
    }
}

#[async_trait]
impl ProtocolAdapter for TcpAdapter {
    fn protocol_name(&self) -> &'static str {
        "tcp"
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn supported_operations(&self) -> &'static [&'static str] {
        SUPPORTED
    }

    fn collector(&self) -> Arc<MetricsCollector> {
        self.collector.clone()
    }

    async fn connect(&self) -> Result<(), SurgeError> {
        self.config.validate()?;
        let pool = Arc::new(
            TcpSocketPool::new(self.config.clone(), self.tcp_metrics.clone()).await?,
        );
        *self.pool.write().await = Some(pool);
        self.connected.store(true, Ordering::Release);
        info!(addr = %self.config.address, "tcp adapter connected");
        Ok(())
    }

    async fn execute(&self, op: &Operation) -> OperationResult {
        if !self.is_connected() {
            return not_connected(op);
        }
        if !SUPPORTED.contains(&op.op_type()) {
            return unsupported(op, Instant::now());
        }
        let pool = match self.pool.read().await.as_ref() {
            Some(pool) => pool.clone(),
            None => return not_connected(op),
        };
        let is_read = op.op_type() == "receive_only";

        let acquire_started = Instant::now();
        let (mut stream, permit) = match pool.acquire(self.config.pool.acquire_timeout).await {
            Ok(acquired) => acquired,
            Err(err) => {
                return OperationResult::fail(acquire_started.elapsed(), err).read(is_read)
            }
        };

        let started = Instant::now();
        let outcome = self.run_io(&mut stream, op).await;
        let duration = started.elapsed();
        pool.release(stream, permit, outcome.is_ok()).await;

        match outcome {
            Ok(io) => {
                let mut result = OperationResult::ok(duration)
                    .read(is_read)
                    .with_metadata("bytes_sent", io.bytes_sent)
                    .with_metadata("bytes_received", io.bytes_received);
                if let Some(received) = io.received {
                    result = result.with_value(received);
                }
                result
            }
            Err(err) => OperationResult::fail(duration, err).read(is_read),
        }
    }

    async fn health_check(&self) -> Result<(), SurgeError> {
        let pool = self
            .pool
            .read()
            .await
            .as_ref()
            .cloned()
            .ok_or(SurgeError::PoolClosed)?;
        // A fresh dial proves the peer still accepts connections.
        let stream = pool.dial().await?;
        drop(stream);
        Ok(())
    }

    async fn close(&self) -> Result<(), SurgeError> {
        self.connected.store(false, Ordering::Release);
        if let Some(pool) = self.pool.write().await.take() {
            pool.close().await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use super::*;

    async fn spawn_echo_server() -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind echo listener");
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(async move {
                    let mut buf = [0u8; 4096];
                    loop {
                        match socket.read(&mut buf).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => {
                                if socket.write_all(&buf[..n]).await.is_err() {
                                    return;
                                }
                            }
                        }
                    }
                });
            }
        });
        addr
    }

    fn config_for(addr: SocketAddr) -> TcpConfig {
        TcpConfig {
            address: addr.to_string(),
            read_timeout: Duration::from_millis(500),
            pool: crate::config::PoolConfig {
                size: 4,
                acquire_timeout: Duration::from_secs(1),
            },
            ..TcpConfig::default()
        }
    }

    fn echo_op(payload: Vec<u8>) -> Operation {
        Operation::new("echo_test", "echo").with_value(payload).with_op_kind(false)
    }

    #[tokio::test]
    async fn echo_round_trips_byte_for_byte() {
        let addr = spawn_echo_server().await;
        let adapter = TcpAdapter::new(config_for(addr));
        adapter.connect().await.unwrap();

        let payload = surge_core::factory::fill_payload(128);
        for _ in 0..100 {
            let result = adapter.execute(&echo_op(payload.clone())).await;
            assert!(result.success, "{:?}", result.error);
            assert_eq!(result.value.as_deref(), Some(payload.as_slice()));
            adapter.collector().record(&result);
        }

        let snapshot = adapter.collector().snapshot();
        assert_eq!(snapshot.success_ops, 100);
        let protocol = snapshot.protocol_metrics.unwrap();
        assert_eq!(protocol["bytes_sent"], 128 * 100);
        assert_eq!(protocol["bytes_received"], 128 * 100);
        assert!(protocol["connects"].as_u64().unwrap() >= 4);
        assert_eq!(adapter.in_flight().await, 0);
        adapter.close().await.unwrap();
    }

    #[tokio::test]
    async fn send_only_never_waits_for_a_reply() {
        let addr = spawn_echo_server().await;
        let adapter = TcpAdapter::new(config_for(addr));
        adapter.connect().await.unwrap();

        let op = Operation::new("send_only", "s")
            .with_value(vec![1u8; 64])
            .with_op_kind(false);
        let result = adapter.execute(&op).await;
        assert!(result.success);
        assert_eq!(result.meta_i64("bytes_sent"), Some(64));
        assert_eq!(result.meta_i64("bytes_received"), Some(0));
    }

    #[tokio::test]
    async fn receive_with_nothing_to_read_times_out() {
        let addr = spawn_echo_server().await;
        let mut config = config_for(addr);
        config.read_timeout = Duration::from_millis(100);
        let adapter = TcpAdapter::new(config);
        adapter.connect().await.unwrap();

        let op = Operation::new("receive_only", "r")
            .with_param("max_bytes", 128usize)
            .with_op_kind(true);
        let result = adapter.execute(&op).await;
        assert!(!result.success);
        assert!(matches!(result.error, Some(SurgeError::Timeout(_))));
        assert!(result.is_read);
    }

    #[tokio::test]
    async fn unknown_tags_fail_without_panicking() {
        let addr = spawn_echo_server().await;
        let adapter = TcpAdapter::new(config_for(addr));
        adapter.connect().await.unwrap();
        let result = adapter.execute(&Operation::new("udp_blast", "k")).await;
        assert!(matches!(
            result.error,
            Some(SurgeError::UnsupportedOperation(_))
        ));
    }

    #[tokio::test]
    async fn close_is_idempotent_and_terminal() {
        let addr = spawn_echo_server().await;
        let adapter = TcpAdapter::new(config_for(addr));
        adapter.connect().await.unwrap();
        adapter.close().await.unwrap();
        adapter.close().await.unwrap();
        let result = adapter.execute(&echo_op(vec![0u8; 8])).await;
        assert_eq!(result.error, Some(SurgeError::PoolClosed));
        assert_eq!(adapter.in_flight().await, 0);
    }

    #[tokio::test]
    async fn connect_fails_when_nothing_listens() {
        let config = TcpConfig {
            address: "127.0.0.1:1".into(),
            connect_timeout: Duration::from_millis(500),
            ..TcpConfig::default()
        };
        let adapter = TcpAdapter::new(config);
        let err = adapter.connect().await.unwrap_err();
        assert!(matches!(err, SurgeError::PoolInit(_)));
        assert!(!adapter.is_connected());
    }
}
