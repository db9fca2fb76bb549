use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use common_metrics::MetricsCollector;
use common_types::{BenchmarkConfig, OperationResult, SurgeError};
use metrics::counter;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::adapter::ProtocolAdapter;
use crate::factory::OperationFactory;

/// Drives a workload through one adapter under the benchmark configuration:
/// a pool of long-running workers over a shared job-index source, a ramp-up
/// gate, per-job timeouts, and exactly-once result fan-in to the collector.
pub struct Engine {
    cfg: BenchmarkConfig,
}

/// Lightweight totals the engine keeps for progress display and the run
/// summary; the collector remains the source of truth for metrics.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub completed: u64,
    pub failed: u64,
    pub elapsed: Duration,
    /// Set when the consecutive-failure threshold aborted the run.
    pub aborted_on_errors: bool,
}

struct Shared {
    next_job: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    consecutive_failures: AtomicU32,
    aborted: AtomicBool,
}

impl Engine {
    pub fn new(cfg: BenchmarkConfig) -> Result<Self, SurgeError> {
        cfg.validate()?;
        Ok(Self { cfg })
    }

    pub fn config(&self) -> &BenchmarkConfig {
        &self.cfg
    }

    /// Run to completion. Stops when all `total` jobs are done, the duration
    /// cap elapses, the external token fires, or the consecutive-failure
    /// threshold trips.
    pub async fn run(
        &self,
        adapter: Arc<dyn ProtocolAdapter>,
        factory: Arc<dyn OperationFactory>,
        collector: Arc<MetricsCollector>,
        cancel: CancellationToken,
    ) -> Result<RunSummary, SurgeError> {
        if !adapter.is_connected() {
            return Err(SurgeError::ConfigInvalid(format!(
                "{} adapter is not connected",
                adapter.protocol_name()
            )));
        }

        let started = Instant::now();
        let run_token = cancel.child_token();
        let shared = Arc::new(Shared {
            next_job: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            consecutive_failures: AtomicU32::new(0),
            aborted: AtomicBool::new(false),
        });

        if let Some(duration) = self.cfg.duration {
            let token = run_token.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(duration) => token.cancel(),
                    _ = token.cancelled() => {}
                }
            });
        }

        let gate = Arc::new(Semaphore::new(0));
        tokio::spawn(pace_ramp_up(
            gate.clone(),
            run_token.clone(),
            self.cfg.ramp_up,
            self.cfg.parallels,
        ));

        tokio::spawn(report_progress(
            collector.clone(),
            shared.clone(),
            run_token.child_token(),
        ));

        info!(
            protocol = adapter.protocol_name(),
            total = self.cfg.total,
            parallels = self.cfg.parallels,
            "starting benchmark run"
        );

        let mut workers = JoinSet::new();
        for _ in 0..self.cfg.parallels {
            workers.spawn(run_worker(
                adapter.clone(),
                factory.clone(),
                collector.clone(),
                shared.clone(),
                gate.clone(),
                run_token.clone(),
                self.cfg.clone(),
            ));
        }
        while let Some(joined) = workers.join_next().await {
            if let Err(err) = joined {
                warn!("worker task failed to join: {err}");
            }
        }
        // Winds down the pacer, the progress reporter, and the duration
        // watcher; the child token never cancels the caller's token.
        run_token.cancel();

        let summary = RunSummary {
            completed: shared.completed.load(Ordering::Relaxed),
            failed: shared.failed.load(Ordering::Relaxed),
            elapsed: started.elapsed(),
            aborted_on_errors: shared.aborted.load(Ordering::Relaxed),
        };
        info!(
            completed = summary.completed,
            failed = summary.failed,
            elapsed_secs = summary.elapsed.as_secs_f64(),
            "benchmark run finished"
        );
        Ok(summary)
    }
}

/// Interval between ramp-up slots so that active concurrency rises linearly
/// from 1 to `parallels` over `ramp_up`.
pub(crate) fn ramp_interval(ramp_up: Duration, parallels: usize) -> Duration {
    if parallels <= 1 {
        return Duration::ZERO;
    }
    ramp_up / (parallels as u32 - 1)
}

async fn pace_ramp_up(
    gate: Arc<Semaphore>,
    token: CancellationToken,
    ramp_up: Duration,
    parallels: usize,
) {
    if ramp_up.is_zero() || parallels <= 1 {
        gate.add_permits(parallels);
        return;
    }
    gate.add_permits(1);
    let interval = ramp_interval(ramp_up, parallels);
    for _ in 1..parallels {
        tokio::select! {
            _ = tokio::time::sleep(interval) => gate.add_permits(1),
            _ = token.cancelled() => return,
        }
    }
}

async fn report_progress(
    collector: Arc<MetricsCollector>,
    shared: Arc<Shared>,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    // The first tick of a tokio interval fires immediately; skip it.
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                info!(
                    completed = shared.completed.load(Ordering::Relaxed),
                    failed = shared.failed.load(Ordering::Relaxed),
                    rps = format!("{:.1}", collector.current_rps()),
                    "progress"
                );
            }
            _ = token.cancelled() => return,
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_worker(
    adapter: Arc<dyn ProtocolAdapter>,
    factory: Arc<dyn OperationFactory>,
    collector: Arc<MetricsCollector>,
    shared: Arc<Shared>,
    gate: Arc<Semaphore>,
    token: CancellationToken,
    cfg: BenchmarkConfig,
) {
    // Ramp-up slot, held for the worker's lifetime: the number of released
    // permits is the concurrency ceiling at any instant.
    let _slot = tokio::select! {
        permit = gate.clone().acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => return,
        },
        _ = token.cancelled() => return,
    };

    loop {
        if token.is_cancelled() {
            return;
        }
        let job = shared.next_job.fetch_add(1, Ordering::Relaxed);
        if cfg.total > 0 && job >= cfg.total {
            return;
        }

        let op = factory.build(job);
        let started = Instant::now();
        let (result, canceled) = tokio::select! {
            executed = tokio::time::timeout(cfg.timeout, adapter.execute(&op)) => {
                match executed {
                    Ok(result) => (result, false),
                    // The deadline dropped the in-flight execute; its wire
                    // operation is aborted with it.
                    Err(_) => (
                        OperationResult::fail(cfg.timeout, SurgeError::Timeout(cfg.timeout))
                            .read(op.is_read()),
                        false,
                    ),
                }
            }
            _ = token.cancelled() => (
                OperationResult::fail(started.elapsed(), SurgeError::Canceled)
                    .read(op.is_read()),
                true,
            ),
        };

        let success = result.success;
        collector.record(&result);
        counter!("surge_engine_jobs_total").increment(1);
        shared.completed.fetch_add(1, Ordering::Relaxed);
        if !success {
            shared.failed.fetch_add(1, Ordering::Relaxed);
            counter!("surge_engine_jobs_failed").increment(1);
        }

        if canceled {
            return;
        }
        if success {
            shared.consecutive_failures.store(0, Ordering::Relaxed);
        } else if let Some(threshold) = cfg.error_abort_threshold {
            let run = shared.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
            if run >= threshold && !shared.aborted.swap(true, Ordering::Relaxed) {
                warn!(
                    consecutive = run,
                    threshold, "aborting run: consecutive-failure threshold exceeded"
                );
                token.cancel();
                return;
            }
        } else {
            shared.consecutive_failures.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use common_types::Operation;

    use super::*;

    /// Adapter double with a configurable latency and failure pattern; tracks
    /// the maximum concurrency it observed.
    struct MockAdapter {
        collector: Arc<MetricsCollector>,
        latency: Duration,
        fail: bool,
        connected: AtomicBool,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl MockAdapter {
        fn new(latency: Duration, fail: bool) -> Self {
            Self {
                collector: Arc::new(MetricsCollector::new()),
                latency,
                fail,
                connected: AtomicBool::new(true),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ProtocolAdapter for MockAdapter {
        fn protocol_name(&self) -> &'static str {
            "mock"
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::Relaxed)
        }

        fn supported_operations(&self) -> &'static [&'static str] {
            &["noop"]
        }

        fn collector(&self) -> Arc<MetricsCollector> {
            self.collector.clone()
        }

        async fn connect(&self) -> Result<(), SurgeError> {
            self.connected.store(true, Ordering::Relaxed);
            Ok(())
        }

        async fn execute(&self, op: &Operation) -> OperationResult {
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(current, Ordering::SeqCst);
            let started = Instant::now();
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if self.fail {
                OperationResult::fail(
                    started.elapsed(),
                    SurgeError::Transport("mock failure".into()),
                )
                .read(op.is_read())
            } else {
                OperationResult::ok(started.elapsed()).read(op.is_read())
            }
        }

        async fn health_check(&self) -> Result<(), SurgeError> {
            Ok(())
        }

        async fn close(&self) -> Result<(), SurgeError> {
            self.connected.store(false, Ordering::Relaxed);
            Ok(())
        }
    }

    struct MockFactory;

    impl OperationFactory for MockFactory {
        fn protocol(&self) -> &'static str {
            "mock"
        }

        fn build(&self, job_id: u64) -> Operation {
            Operation::new("noop", format!("i:{job_id}"))
                .with_params(HashMap::new())
                .with_op_kind(job_id % 2 == 0)
        }
    }

    fn cfg(total: u64) -> BenchmarkConfig {
        BenchmarkConfig {
            total,
            ..BenchmarkConfig::default()
        }
    }

    #[tokio::test]
    async fn runs_exactly_total_jobs() {
        let adapter = Arc::new(MockAdapter::new(Duration::ZERO, false));
        let collector = adapter.collector();
        let engine = Engine::new(BenchmarkConfig {
            total: 100,
            parallels: 4,
            ..BenchmarkConfig::default()
        })
        .unwrap();
        let summary = engine
            .run(
                adapter.clone(),
                Arc::new(MockFactory),
                collector.clone(),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(summary.completed, 100);
        assert_eq!(summary.failed, 0);
        assert!(!summary.aborted_on_errors);
        let snapshot = collector.snapshot();
        assert_eq!(snapshot.total_ops, 100);
        assert_eq!(snapshot.success_ops, 100);
        // Factory labeled even jobs as reads.
        assert_eq!(snapshot.read_ops, 50);
        assert_eq!(snapshot.write_ops, 50);
    }

    #[tokio::test]
    async fn single_worker_never_overlaps_executes() {
        let adapter = Arc::new(MockAdapter::new(Duration::from_millis(1), false));
        let collector = adapter.collector();
        let engine = Engine::new(BenchmarkConfig {
            total: 50,
            parallels: 1,
            ..BenchmarkConfig::default()
        })
        .unwrap();
        engine
            .run(
                adapter.clone(),
                Arc::new(MockFactory),
                collector,
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(adapter.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrency_is_bounded_by_parallels() {
        let adapter = Arc::new(MockAdapter::new(Duration::from_millis(10), false));
        let collector = adapter.collector();
        let engine = Engine::new(BenchmarkConfig {
            total: 80,
            parallels: 8,
            ..BenchmarkConfig::default()
        })
        .unwrap();
        engine
            .run(
                adapter.clone(),
                Arc::new(MockFactory),
                collector,
                CancellationToken::new(),
            )
            .await
            .unwrap();
        let max = adapter.max_in_flight.load(Ordering::SeqCst);
        assert!(max <= 8, "observed {max} concurrent executes");
        assert!(max >= 2, "workers never ran concurrently");
    }

    #[tokio::test]
    async fn duration_cap_stops_an_unbounded_run() {
        let adapter = Arc::new(MockAdapter::new(Duration::from_millis(1), false));
        let collector = adapter.collector();
        let engine = Engine::new(BenchmarkConfig {
            total: 0,
            parallels: 2,
            duration: Some(Duration::from_millis(300)),
            ..BenchmarkConfig::default()
        })
        .unwrap();
        let started = Instant::now();
        let summary = engine
            .run(
                adapter,
                Arc::new(MockFactory),
                collector.clone(),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_millis(300));
        assert!(started.elapsed() < Duration::from_secs(3));
        assert!(summary.completed >= 1);
        assert!(collector.total_ops() >= 1);
    }

    #[tokio::test]
    async fn per_job_timeouts_become_timeout_results() {
        let adapter = Arc::new(MockAdapter::new(Duration::from_millis(200), false));
        let collector = adapter.collector();
        let engine = Engine::new(BenchmarkConfig {
            total: 10,
            parallels: 2,
            timeout: Duration::from_millis(20),
            ..BenchmarkConfig::default()
        })
        .unwrap();
        let summary = engine
            .run(
                adapter,
                Arc::new(MockFactory),
                collector.clone(),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(summary.completed, 10);
        assert_eq!(summary.failed, 10);
        let snapshot = collector.snapshot();
        assert_eq!(snapshot.failed_ops, 10);
        assert_eq!(snapshot.errors.get("timeout"), Some(&10));
    }

    #[tokio::test]
    async fn external_cancellation_returns_promptly() {
        let adapter = Arc::new(MockAdapter::new(Duration::from_millis(5), false));
        let collector = adapter.collector();
        let engine = Engine::new(BenchmarkConfig {
            total: 0,
            parallels: 4,
            duration: Some(Duration::from_secs(10)),
            ..BenchmarkConfig::default()
        })
        .unwrap();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });
        let started = Instant::now();
        let summary = engine
            .run(adapter, Arc::new(MockFactory), collector.clone(), cancel)
            .await
            .unwrap();
        assert!(
            started.elapsed() < Duration::from_millis(600),
            "engine took {:?} to wind down",
            started.elapsed()
        );
        assert!(summary.completed >= 1);
    }

    #[tokio::test]
    async fn consecutive_failures_abort_when_thresholded() {
        let adapter = Arc::new(MockAdapter::new(Duration::ZERO, true));
        let collector = adapter.collector();
        let engine = Engine::new(BenchmarkConfig {
            total: 10_000,
            parallels: 2,
            error_abort_threshold: Some(5),
            ..BenchmarkConfig::default()
        })
        .unwrap();
        let summary = engine
            .run(
                adapter,
                Arc::new(MockFactory),
                collector,
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(summary.aborted_on_errors);
        assert!(summary.completed < 10_000);
    }

    #[tokio::test]
    async fn disconnected_adapters_are_refused() {
        let adapter = Arc::new(MockAdapter::new(Duration::ZERO, false));
        adapter.close().await.unwrap();
        let collector = adapter.collector();
        let engine = Engine::new(cfg(10)).unwrap();
        let err = engine
            .run(
                adapter,
                Arc::new(MockFactory),
                collector,
                CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SurgeError::ConfigInvalid(_)));
    }

    #[test]
    fn ramp_interval_divides_the_window() {
        assert_eq!(
            ramp_interval(Duration::from_secs(9), 10),
            Duration::from_secs(1)
        );
        assert_eq!(ramp_interval(Duration::from_secs(9), 1), Duration::ZERO);
    }
}
