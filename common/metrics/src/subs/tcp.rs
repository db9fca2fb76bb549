use std::sync::Mutex;

use common_types::OperationResult;
use serde::Serialize;

use super::ProtocolMetrics;

const CONNECT_SAMPLE_CAP: usize = 1000;

/// TCP sub-collector: byte counters and a connect-latency distribution fed
/// from the pool's dial times.
pub struct TcpMetrics {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    bytes_sent: u64,
    bytes_received: u64,
    connect_samples: Vec<f64>,
    connect_count: u64,
    connect_min_ms: f64,
    connect_max_ms: f64,
    connect_total_ms: f64,
}

#[derive(Serialize)]
struct TcpSnapshot {
    bytes_sent: u64,
    bytes_received: u64,
    connects: u64,
    connect_min_ms: f64,
    connect_avg_ms: f64,
    connect_max_ms: f64,
}

impl TcpMetrics {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Called by the socket pool whenever it dials a connection.
    pub fn record_connect_ms(&self, connect_ms: f64) {
        let mut inner = self.inner.lock().expect("poisoned tcp metrics");
        if inner.connect_count == 0 || connect_ms < inner.connect_min_ms {
            inner.connect_min_ms = connect_ms;
        }
        if connect_ms > inner.connect_max_ms {
            inner.connect_max_ms = connect_ms;
        }
        inner.connect_count += 1;
        inner.connect_total_ms += connect_ms;
        if inner.connect_samples.len() < CONNECT_SAMPLE_CAP {
            inner.connect_samples.push(connect_ms);
        }
    }
}

impl Default for TcpMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolMetrics for TcpMetrics {
    fn protocol(&self) -> &'static str {
        "tcp"
    }

    fn record(&self, result: &OperationResult) {
        let mut inner = self.inner.lock().expect("poisoned tcp metrics");
        if let Some(sent) = result.meta_i64("bytes_sent") {
            inner.bytes_sent += sent.max(0) as u64;
        }
        if let Some(received) = result.meta_i64("bytes_received") {
            inner.bytes_received += received.max(0) as u64;
        }
    }

    fn snapshot(&self) -> serde_json::Value {
        let inner = self.inner.lock().expect("poisoned tcp metrics");
        let view = TcpSnapshot {
            bytes_sent: inner.bytes_sent,
            bytes_received: inner.bytes_received,
            connects: inner.connect_count,
            connect_min_ms: if inner.connect_count == 0 {
                0.0
            } else {
                inner.connect_min_ms
            },
            connect_avg_ms: if inner.connect_count == 0 {
                0.0
            } else {
                inner.connect_total_ms / inner.connect_count as f64
            },
            connect_max_ms: inner.connect_max_ms,
        };
        serde_json::to_value(view).unwrap_or(serde_json::Value::Null)
    }

    fn reset(&self) {
        *self.inner.lock().expect("poisoned tcp metrics") = Inner::default();
    }
}
