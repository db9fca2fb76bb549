use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use common_metrics::MetricsCollector;
use common_types::{Operation, OperationResult, SurgeError};

/// The uniform verb set every protocol implements. Adapters are shared
/// behind an `Arc` by all workers; the surface must be thread-safe once
/// `connect` has returned.
///
/// `execute` is infallible at the signature level: wire errors come back
/// attached to a failed [`OperationResult`], and the engine owns the
/// decision of whether a failure is terminal. Adapters never retry
/// internally beyond what their client library does on its own.
#[async_trait]
pub trait ProtocolAdapter: Send + Sync {
    fn protocol_name(&self) -> &'static str;

    fn is_connected(&self) -> bool;

    fn supported_operations(&self) -> &'static [&'static str];

    /// The collector this adapter's results are ingested into, with its
    /// protocol sub-collector already attached.
    fn collector(&self) -> Arc<MetricsCollector>;

    /// Validate the config, build the pool, then run an initial health
    /// check. Failure at any step leaves the adapter disconnected with all
    /// partial resources released.
    async fn connect(&self) -> Result<(), SurgeError>;

    async fn execute(&self, op: &Operation) -> OperationResult;

    /// Cheap liveness probe. A reachable-but-unhappy peer (4xx HTTP,
    /// unknown topic) counts as healthy.
    async fn health_check(&self) -> Result<(), SurgeError>;

    /// Idempotent; cancels outstanding pool work. `execute` after close
    /// fails with `PoolClosed`.
    async fn close(&self) -> Result<(), SurgeError>;
}

/// Failed result for an `execute` called before `connect` or after `close`.
pub fn not_connected(op: &Operation) -> OperationResult {
    OperationResult::fail(Duration::ZERO, SurgeError::PoolClosed).read(op.is_read())
}

/// Failed result for an operation tag the adapter does not recognize.
pub fn unsupported(op: &Operation, started: Instant) -> OperationResult {
    OperationResult::fail(
        started.elapsed(),
        SurgeError::UnsupportedOperation(op.op_type().to_owned()),
    )
    .read(op.is_read())
}
