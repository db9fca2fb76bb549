use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use common_types::OperationResult;
use serde::Serialize;

use super::ProtocolMetrics;

/// Kafka sub-collector: per-(topic, partition) produce/consume bookkeeping
/// with high-water marks and consumer lag, plus producer/consumer aggregates
/// and rebalance/commit counters.
///
/// The high-water mark is advanced from produce acks and consumed offsets as
/// a lower bound, and overwritten by real broker watermarks whenever the
/// adapter fetches them.
pub struct KafkaMetrics {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    partitions: BTreeMap<(String, i32), PartitionStats>,
    producer: SideStats,
    consumer: SideStats,
    rebalances: u64,
    commits: u64,
}

#[derive(Default, Clone)]
struct PartitionStats {
    produced_count: u64,
    consumed_count: u64,
    last_produce_time: Option<DateTime<Utc>>,
    last_consume_time: Option<DateTime<Utc>>,
    high_water_mark: i64,
    consumer_offset: i64,
}

#[derive(Default, Clone, Serialize)]
struct SideStats {
    messages: u64,
    bytes: u64,
    errors: u64,
}

#[derive(Serialize)]
struct KafkaSnapshot {
    partitions: Vec<PartitionView>,
    producer: SideStats,
    consumer: SideStats,
    rebalances: u64,
    commits: u64,
}

#[derive(Serialize)]
struct PartitionView {
    topic: String,
    partition: i32,
    produced_count: u64,
    consumed_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_produce_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_consume_time: Option<DateTime<Utc>>,
    high_water_mark: i64,
    consumer_offset: i64,
    lag: i64,
}

impl KafkaMetrics {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Overwrite a partition's high-water mark with a broker-reported value.
    pub fn record_watermark(&self, topic: &str, partition: i32, high_water_mark: i64) {
        let mut inner = self.inner.lock().expect("poisoned kafka metrics");
        let stats = inner
            .partitions
            .entry((topic.to_owned(), partition))
            .or_default();
        stats.high_water_mark = stats.high_water_mark.max(high_water_mark);
    }

    pub fn record_rebalance(&self) {
        self.inner.lock().expect("poisoned kafka metrics").rebalances += 1;
    }

    pub fn record_commit(&self) {
        self.inner.lock().expect("poisoned kafka metrics").commits += 1;
    }
}

impl Default for KafkaMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolMetrics for KafkaMetrics {
    fn protocol(&self) -> &'static str {
        "kafka"
    }

    fn record(&self, result: &OperationResult) {
        let mut inner = self.inner.lock().expect("poisoned kafka metrics");

        let bytes = result.meta_i64("message_size").unwrap_or(0).max(0) as u64;
        let count = result.meta_i64("message_count").unwrap_or(1).max(0) as u64;
        // Consumes are the read side of the workload.
        let side = if result.is_read {
            &mut inner.consumer
        } else {
            &mut inner.producer
        };
        if result.success {
            side.messages += count;
            side.bytes += bytes;
        } else {
            side.errors += 1;
        }

        // Admin verbs and reachability failures carry no topic metadata.
        let (Some(topic), Some(partition)) =
            (result.meta_str("topic"), result.meta_i64("partition"))
        else {
            return;
        };
        if !result.success {
            return;
        }
        let topic = topic.to_owned();
        let is_read = result.is_read;
        let offset = result.meta_i64("offset");
        let stats = inner
            .partitions
            .entry((topic, partition as i32))
            .or_default();
        let now = Utc::now();
        if is_read {
            stats.consumed_count += count;
            stats.last_consume_time = Some(now);
            if let Some(offset) = offset {
                stats.consumer_offset = stats.consumer_offset.max(offset + 1);
                stats.high_water_mark = stats.high_water_mark.max(offset + 1);
            }
        } else {
            stats.produced_count += count;
            stats.last_produce_time = Some(now);
            if let Some(offset) = offset {
                stats.high_water_mark = stats.high_water_mark.max(offset + 1);
            }
        }
    }

    fn snapshot(&self) -> serde_json::Value {
        let inner = self.inner.lock().expect("poisoned kafka metrics");
        let view = KafkaSnapshot {
            partitions: inner
                .partitions
                .iter()
                .map(|((topic, partition), stats)| PartitionView {
                    topic: topic.clone(),
                    partition: *partition,
                    produced_count: stats.produced_count,
                    consumed_count: stats.consumed_count,
                    last_produce_time: stats.last_produce_time,
                    last_consume_time: stats.last_consume_time,
                    high_water_mark: stats.high_water_mark,
                    consumer_offset: stats.consumer_offset,
                    lag: (stats.high_water_mark - stats.consumer_offset).max(0),
                })
                .collect(),
            producer: inner.producer.clone(),
            consumer: inner.consumer.clone(),
            rebalances: inner.rebalances,
            commits: inner.commits,
        };
        serde_json::to_value(view).unwrap_or(serde_json::Value::Null)
    }

    fn reset(&self) {
        *self.inner.lock().expect("poisoned kafka metrics") = Inner::default();
    }
}
