//! The metrics pipeline: every operation result is ingested exactly once,
//! aggregated into lock-minimizing counters, a bounded latency ring, a
//! sliding RPS window, and a per-protocol sub-collector, and exported as
//! owned snapshots.

pub mod latency;
pub mod snapshot;
pub mod subs;
pub mod window;

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use common_types::{ErrorKind, OperationResult};
use tracing::warn;

use crate::latency::{percentile, LatencyRing};
use crate::snapshot::{LatencySnapshot, MetricsSnapshot};
use crate::subs::ProtocolMetrics;
use crate::window::RpsWindow;

/// Samples above this are treated as anomalies and clamped; a wall-clock
/// latency of an hour in a load test means the measurement itself broke.
const LATENCY_SANITY_CAP: Duration = Duration::from_secs(3600);

/// Process-wide collector shared by every worker. `record` never blocks on
/// I/O and never fails; the hot counters are atomics, and the ring, window,
/// and error table each sit behind their own short critical section.
pub struct MetricsCollector {
    start: Mutex<Instant>,
    total: AtomicU64,
    success: AtomicU64,
    failed: AtomicU64,
    read: AtomicU64,
    write: AtomicU64,
    canceled: AtomicU64,
    anomalies: AtomicU64,
    total_latency_ns: AtomicU64,
    min_latency_ns: AtomicU64,
    max_latency_ns: AtomicU64,
    latencies: Mutex<LatencyRing>,
    window: Mutex<RpsWindow>,
    errors: Mutex<HashMap<&'static str, u64>>,
    sub: Option<Box<dyn ProtocolMetrics>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Collector with a protocol sub-collector attached; the sub-collector
    /// sees every recorded result and contributes the protocol object of the
    /// snapshot.
    pub fn with_protocol(sub: Box<dyn ProtocolMetrics>) -> Self {
        Self::build(Some(sub))
    }

    fn build(sub: Option<Box<dyn ProtocolMetrics>>) -> Self {
        Self {
            start: Mutex::new(Instant::now()),
            total: AtomicU64::new(0),
            success: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            read: AtomicU64::new(0),
            write: AtomicU64::new(0),
            canceled: AtomicU64::new(0),
            anomalies: AtomicU64::new(0),
            total_latency_ns: AtomicU64::new(0),
            min_latency_ns: AtomicU64::new(u64::MAX),
            max_latency_ns: AtomicU64::new(0),
            latencies: Mutex::new(LatencyRing::default()),
            window: Mutex::new(RpsWindow::default()),
            errors: Mutex::new(HashMap::new()),
            sub,
        }
    }

    /// Ingest one result. Safe for concurrent callers; must not fail. The
    /// total counter is bumped last so a concurrent snapshot never observes
    /// a total above the sum of its parts.
    pub fn record(&self, result: &OperationResult) {
        let mut duration = result.duration;
        if duration > LATENCY_SANITY_CAP {
            warn!(
                duration_secs = duration.as_secs(),
                "clamping implausible operation latency"
            );
            duration = LATENCY_SANITY_CAP;
            self.anomalies.fetch_add(1, Ordering::Relaxed);
        }

        if result.success {
            self.success.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        if result.is_read {
            self.read.fetch_add(1, Ordering::Relaxed);
        } else {
            self.write.fetch_add(1, Ordering::Relaxed);
        }

        if let Some(error) = &result.error {
            if error.kind() == ErrorKind::Canceled {
                self.canceled.fetch_add(1, Ordering::Relaxed);
            }
            let category = error.category();
            let mut errors = self.errors.lock().expect("poisoned error table");
            *errors.entry(category).or_insert(0) += 1;
        }

        let nanos = duration.as_nanos().min(u128::from(u64::MAX)) as u64;
        self.total_latency_ns.fetch_add(nanos, Ordering::Relaxed);
        self.min_latency_ns.fetch_min(nanos, Ordering::Relaxed);
        self.max_latency_ns.fetch_max(nanos, Ordering::Relaxed);
        self.latencies
            .lock()
            .expect("poisoned latency ring")
            .push(duration);
        self.window.lock().expect("poisoned rps window").record();

        if let Some(sub) = &self.sub {
            sub.record(result);
        }

        self.total.fetch_add(1, Ordering::Release);
    }

    pub fn total_ops(&self) -> u64 {
        self.total.load(Ordering::Acquire)
    }

    /// Sliding-window throughput without paying for a full snapshot; used by
    /// the engine's progress reporting.
    pub fn current_rps(&self) -> f64 {
        self.window.lock().expect("poisoned rps window").rps()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let total = self.total.load(Ordering::Acquire);
        let success = self.success.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);
        let read = self.read.load(Ordering::Relaxed);
        let write = self.write.load(Ordering::Relaxed);
        let canceled = self.canceled.load(Ordering::Relaxed);
        let anomalies = self.anomalies.load(Ordering::Relaxed);

        let elapsed = self.start.lock().expect("poisoned start time").elapsed();
        let elapsed_secs = elapsed.as_secs_f64();

        let counted = total.saturating_sub(canceled);
        let counted_failed = failed.saturating_sub(canceled);
        let success_rate = ratio_percent(success, counted);
        let error_rate = ratio_percent(counted_failed, counted);
        let read_write_ratio = if write == 0 {
            read as f64
        } else {
            read as f64 / write as f64
        };

        let sorted = self
            .latencies
            .lock()
            .expect("poisoned latency ring")
            .sorted();
        let latency = self.latency_snapshot(&sorted, total);
        let rps = self.window.lock().expect("poisoned rps window").rps();
        let overall_rps = if elapsed_secs > 0.0 {
            total as f64 / elapsed_secs
        } else {
            0.0
        };

        let errors: BTreeMap<String, u64> = self
            .errors
            .lock()
            .expect("poisoned error table")
            .iter()
            .map(|(category, count)| ((*category).to_owned(), *count))
            .collect();

        MetricsSnapshot {
            protocol: self.sub.as_ref().map(|sub| sub.protocol().to_owned()),
            elapsed_secs,
            total_ops: total,
            success_ops: success,
            failed_ops: failed,
            read_ops: read,
            write_ops: write,
            canceled_ops: canceled,
            metric_anomaly_count: anomalies,
            success_rate,
            error_rate,
            read_write_ratio,
            rps,
            overall_rps,
            latency,
            errors,
            protocol_metrics: self.sub.as_ref().map(|sub| sub.snapshot()),
        }
    }

    fn latency_snapshot(&self, sorted: &[Duration], total: u64) -> LatencySnapshot {
        if sorted.is_empty() || total == 0 {
            return LatencySnapshot::default();
        }
        let min = self.min_latency_ns.load(Ordering::Relaxed);
        let max = self.max_latency_ns.load(Ordering::Relaxed);
        let sum = self.total_latency_ns.load(Ordering::Relaxed);
        let as_ms = |nanos: u64| nanos as f64 / 1e6;
        let pct_ms =
            |p: f64| percentile(sorted, p).map_or(0.0, |d| d.as_secs_f64() * 1e3);
        LatencySnapshot {
            samples: sorted.len(),
            min_ms: if min == u64::MAX { 0.0 } else { as_ms(min) },
            avg_ms: as_ms(sum / total),
            max_ms: as_ms(max),
            p50_ms: pct_ms(50.0),
            p90_ms: pct_ms(90.0),
            p95_ms: pct_ms(95.0),
            p99_ms: pct_ms(99.0),
            p999_ms: pct_ms(99.9),
        }
    }

    /// Flat key/value export of the current snapshot.
    pub fn export(&self) -> BTreeMap<String, String> {
        self.snapshot().export()
    }

    /// Clears all state back to its post-initialization form and rebases the
    /// start time; the collector's identity (and its sub-collector) survive.
    pub fn reset(&self) {
        self.total.store(0, Ordering::Relaxed);
        self.success.store(0, Ordering::Relaxed);
        self.failed.store(0, Ordering::Relaxed);
        self.read.store(0, Ordering::Relaxed);
        self.write.store(0, Ordering::Relaxed);
        self.canceled.store(0, Ordering::Relaxed);
        self.anomalies.store(0, Ordering::Relaxed);
        self.total_latency_ns.store(0, Ordering::Relaxed);
        self.min_latency_ns.store(u64::MAX, Ordering::Relaxed);
        self.max_latency_ns.store(0, Ordering::Relaxed);
        self.latencies
            .lock()
            .expect("poisoned latency ring")
            .clear();
        let now = Instant::now();
        self.window.lock().expect("poisoned rps window").reset(now);
        self.errors.lock().expect("poisoned error table").clear();
        if let Some(sub) = &self.sub {
            sub.reset();
        }
        *self.start.lock().expect("poisoned start time") = now;
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

fn ratio_percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use common_types::SurgeError;

    use super::*;

    fn ok(ms: u64, is_read: bool) -> OperationResult {
        OperationResult::ok(Duration::from_millis(ms)).read(is_read)
    }

    fn fail(ms: u64, error: SurgeError) -> OperationResult {
        OperationResult::fail(Duration::from_millis(ms), error)
    }

    #[test]
    fn counters_balance_after_a_mixed_load() {
        let collector = MetricsCollector::new();
        for i in 0..100u64 {
            if i % 4 == 0 {
                collector.record(&fail(20, SurgeError::Transport("refused".into())));
            } else {
                collector.record(&ok(10, i % 2 == 0));
            }
        }
        let snapshot = collector.snapshot();
        assert_eq!(snapshot.total_ops, 100);
        assert_eq!(
            snapshot.total_ops,
            snapshot.success_ops + snapshot.failed_ops
        );
        assert_eq!(snapshot.total_ops, snapshot.read_ops + snapshot.write_ops);
        assert_eq!(snapshot.failed_ops, 25);
        assert_eq!(snapshot.error_rate, 25.0);
        assert_eq!(snapshot.errors.get("connection"), Some(&25));
    }

    #[test]
    fn latency_statistics_are_ordered() {
        let collector = MetricsCollector::new();
        for ms in 1..=1000u64 {
            collector.record(&ok(ms, false));
        }
        let latency = collector.snapshot().latency;
        assert!(latency.min_ms <= latency.avg_ms);
        assert!(latency.avg_ms <= latency.max_ms);
        assert!(latency.p50_ms <= latency.p90_ms);
        assert!(latency.p90_ms <= latency.p95_ms);
        assert!(latency.p95_ms <= latency.p99_ms);
        assert!(latency.p99_ms <= latency.max_ms);
        assert_eq!(latency.min_ms, 1.0);
        assert_eq!(latency.max_ms, 1000.0);
    }

    #[test]
    fn cancellations_do_not_count_toward_the_error_rate() {
        let collector = MetricsCollector::new();
        for _ in 0..8 {
            collector.record(&ok(5, false));
        }
        collector.record(&fail(5, SurgeError::Canceled));
        collector.record(&fail(5, SurgeError::Canceled));
        let snapshot = collector.snapshot();
        assert_eq!(snapshot.total_ops, 10);
        assert_eq!(snapshot.failed_ops, 2);
        assert_eq!(snapshot.canceled_ops, 2);
        assert_eq!(snapshot.error_rate, 0.0);
        assert_eq!(snapshot.success_rate, 100.0);
    }

    #[test]
    fn implausible_latencies_are_clamped_and_counted() {
        let collector = MetricsCollector::new();
        let mut result = ok(1, false);
        result.duration = Duration::from_secs(7200);
        collector.record(&result);
        let snapshot = collector.snapshot();
        assert_eq!(snapshot.metric_anomaly_count, 1);
        assert!(snapshot.latency.max_ms <= LATENCY_SANITY_CAP.as_secs_f64() * 1e3);
    }

    #[test]
    fn reset_returns_to_post_init_state() {
        let collector = MetricsCollector::new();
        collector.record(&ok(10, true));
        collector.record(&fail(10, SurgeError::Timeout(Duration::from_secs(1))));
        collector.reset();
        let snapshot = collector.snapshot();
        assert_eq!(snapshot.total_ops, 0);
        assert_eq!(snapshot.success_ops, 0);
        assert_eq!(snapshot.failed_ops, 0);
        assert!(snapshot.errors.is_empty());
        assert_eq!(snapshot.latency.samples, 0);
        assert_eq!(snapshot.latency.min_ms, 0.0);
        assert!(snapshot.elapsed_secs < 1.0);
    }

    #[tokio::test]
    async fn concurrent_recording_stays_consistent() {
        let collector = Arc::new(MetricsCollector::new());
        let mut handles = Vec::new();
        for worker in 0..8 {
            let collector = collector.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..500u64 {
                    collector.record(&ok(1 + (i % 5), (i + worker) % 2 == 0));
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        let snapshot = collector.snapshot();
        assert_eq!(snapshot.total_ops, 4000);
        assert_eq!(
            snapshot.total_ops,
            snapshot.success_ops + snapshot.failed_ops
        );
        assert_eq!(snapshot.total_ops, snapshot.read_ops + snapshot.write_ops);
    }

    #[test]
    fn export_is_flat_and_complete() {
        let collector = MetricsCollector::new();
        collector.record(&ok(10, true));
        let exported = collector.export();
        assert_eq!(exported.get("total_ops"), Some(&"1".to_string()));
        assert!(exported.contains_key("latency_p99_ms"));
        assert!(exported.contains_key("rps"));
    }
}
