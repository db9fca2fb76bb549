use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use common_types::OperationResult;
use serde::Serialize;

use super::ProtocolMetrics;

/// HTTP sub-collector: status-code, method, URL, and content-type tables
/// plus coarse timing slots, all keyed from result metadata.
pub struct HttpMetrics {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    status: BTreeMap<u16, StatusEntry>,
    methods: BTreeMap<String, MethodEntry>,
    urls: BTreeMap<String, UrlEntry>,
    content_types: BTreeMap<String, u64>,
    timing_slots: TimingSlots,
}

#[derive(Default, Clone, Serialize)]
struct StatusEntry {
    count: u64,
    success_count: u64,
    total_latency_ms: f64,
}

#[derive(Default, Clone, Serialize)]
struct MethodEntry {
    count: u64,
    success_count: u64,
    failed_count: u64,
    min_latency_ms: f64,
    total_latency_ms: f64,
    max_latency_ms: f64,
}

#[derive(Default, Clone, Serialize)]
struct UrlEntry {
    count: u64,
    success_count: u64,
    total_latency_ms: f64,
}

/// Coarse network timing slots by total operation latency.
#[derive(Default, Clone, Serialize)]
struct TimingSlots {
    lt_10ms: u64,
    lt_50ms: u64,
    lt_100ms: u64,
    lt_500ms: u64,
    lt_1s: u64,
    gte_1s: u64,
}

#[derive(Serialize)]
struct HttpSnapshot {
    status_codes: BTreeMap<String, StatusView>,
    methods: BTreeMap<String, MethodView>,
    urls: BTreeMap<String, UrlView>,
    content_types: BTreeMap<String, u64>,
    timing_slots: TimingSlots,
}

#[derive(Serialize)]
struct StatusView {
    count: u64,
    success_count: u64,
    avg_latency_ms: f64,
}

#[derive(Serialize)]
struct MethodView {
    count: u64,
    success_count: u64,
    failed_count: u64,
    min_latency_ms: f64,
    avg_latency_ms: f64,
    max_latency_ms: f64,
}

#[derive(Serialize)]
struct UrlView {
    count: u64,
    success_count: u64,
    avg_latency_ms: f64,
}

impl HttpMetrics {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }
}

impl Default for HttpMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolMetrics for HttpMetrics {
    fn protocol(&self) -> &'static str {
        "http"
    }

    fn record(&self, result: &OperationResult) {
        let latency_ms = result.duration.as_secs_f64() * 1e3;
        let mut inner = self.inner.lock().expect("poisoned http metrics");

        // Reachability failures without a status code stay out of the table.
        if let Some(code) = result.meta_i64("status_code") {
            let entry = inner.status.entry(code as u16).or_default();
            entry.count += 1;
            if result.success {
                entry.success_count += 1;
            }
            entry.total_latency_ms += latency_ms;
        }

        if let Some(method) = result.meta_str("method") {
            let entry = inner.methods.entry(method.to_owned()).or_default();
            if entry.count == 0 || latency_ms < entry.min_latency_ms {
                entry.min_latency_ms = latency_ms;
            }
            if latency_ms > entry.max_latency_ms {
                entry.max_latency_ms = latency_ms;
            }
            entry.count += 1;
            if result.success {
                entry.success_count += 1;
            } else {
                entry.failed_count += 1;
            }
            entry.total_latency_ms += latency_ms;
        }

        if let Some(path) = result.meta_str("path") {
            let entry = inner.urls.entry(path.to_owned()).or_default();
            entry.count += 1;
            if result.success {
                entry.success_count += 1;
            }
            entry.total_latency_ms += latency_ms;
        }

        if let Some(content_type) = result.meta_str("content_type") {
            *inner
                .content_types
                .entry(content_type.to_owned())
                .or_insert(0) += 1;
        }

        let slots = &mut inner.timing_slots;
        if result.duration < Duration::from_millis(10) {
            slots.lt_10ms += 1;
        } else if result.duration < Duration::from_millis(50) {
            slots.lt_50ms += 1;
        } else if result.duration < Duration::from_millis(100) {
            slots.lt_100ms += 1;
        } else if result.duration < Duration::from_millis(500) {
            slots.lt_500ms += 1;
        } else if result.duration < Duration::from_secs(1) {
            slots.lt_1s += 1;
        } else {
            slots.gte_1s += 1;
        }
    }

    fn snapshot(&self) -> serde_json::Value {
        let inner = self.inner.lock().expect("poisoned http metrics");
        let avg = |total: f64, count: u64| if count == 0 { 0.0 } else { total / count as f64 };
        let view = HttpSnapshot {
            status_codes: inner
                .status
                .iter()
                .map(|(code, e)| {
                    (
                        code.to_string(),
                        StatusView {
                            count: e.count,
                            success_count: e.success_count,
                            avg_latency_ms: avg(e.total_latency_ms, e.count),
                        },
                    )
                })
                .collect(),
            methods: inner
                .methods
                .iter()
                .map(|(method, e)| {
                    (
                        method.clone(),
                        MethodView {
                            count: e.count,
                            success_count: e.success_count,
                            failed_count: e.failed_count,
                            min_latency_ms: e.min_latency_ms,
                            avg_latency_ms: avg(e.total_latency_ms, e.count),
                            max_latency_ms: e.max_latency_ms,
                        },
                    )
                })
                .collect(),
            urls: inner
                .urls
                .iter()
                .map(|(path, e)| {
                    (
                        path.clone(),
                        UrlView {
                            count: e.count,
                            success_count: e.success_count,
                            avg_latency_ms: avg(e.total_latency_ms, e.count),
                        },
                    )
                })
                .collect(),
            content_types: inner.content_types.clone(),
            timing_slots: inner.timing_slots.clone(),
        };
        serde_json::to_value(view).unwrap_or(serde_json::Value::Null)
    }

    fn reset(&self) {
        *self.inner.lock().expect("poisoned http metrics") = Inner::default();
    }
}
