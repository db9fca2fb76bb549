//! Protocol sub-collectors. Each one extracts protocol-specific signal from
//! result metadata and contributes the protocol object of the snapshot.

mod http;
mod kafka;
mod redis;
mod tcp;

use std::sync::Arc;

use common_types::OperationResult;

pub use http::HttpMetrics;
pub use kafka::KafkaMetrics;
pub use redis::RedisMetrics;
pub use tcp::TcpMetrics;

pub trait ProtocolMetrics: Send + Sync {
    fn protocol(&self) -> &'static str;
    /// Extract protocol-specific signal from a result's metadata. Unknown or
    /// missing keys are skipped, never an error.
    fn record(&self, result: &OperationResult);
    fn snapshot(&self) -> serde_json::Value;
    fn reset(&self);
}

// Adapters keep a typed handle to their sub-collector (for signals that do
// not travel through results, like watermarks or rebalances) while the
// collector owns it as a trait object; both share one Arc.
impl<T: ProtocolMetrics + ?Sized> ProtocolMetrics for Arc<T> {
    fn protocol(&self) -> &'static str {
        (**self).protocol()
    }

    fn record(&self, result: &OperationResult) {
        (**self).record(result)
    }

    fn snapshot(&self) -> serde_json::Value {
        (**self).snapshot()
    }

    fn reset(&self) {
        (**self).reset()
    }
}
