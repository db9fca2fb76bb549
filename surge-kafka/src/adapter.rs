use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use common_metrics::subs::KafkaMetrics;
use common_metrics::MetricsCollector;
use common_types::{BenchmarkConfig, Operation, OperationResult, ParamValue, SurgeError};
use futures::future::join_all;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::{Header, Message, OwnedHeaders};
use rdkafka::producer::{FutureRecord, Producer};
use rdkafka::util::Timeout;
use surge_core::adapter::{not_connected, unsupported, ProtocolAdapter};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::config::KafkaConfig;
use crate::pool::{KafkaConsumerPool, KafkaProducerPool};

const METADATA_TIMEOUT: Duration = Duration::from_secs(10);

const SUPPORTED: &[&str] = &[
    "produce",
    "produce_message",
    "produce_batch",
    "consume",
    "consume_message",
    "consume_batch",
    "create_topic",
    "delete_topic",
    "list_topics",
    "describe_consumer_groups",
];

pub struct KafkaAdapter {
    config: KafkaConfig,
    needs_consumer: bool,
    producer: RwLock<Option<Arc<KafkaProducerPool>>>,
    consumer: RwLock<Option<Arc<KafkaConsumerPool>>>,
    connected: AtomicBool,
    collector: Arc<MetricsCollector>,
    kafka_metrics: Arc<KafkaMetrics>,
}

impl KafkaAdapter {
    pub fn new(config: KafkaConfig, bench: &BenchmarkConfig) -> Self {
        let kafka_metrics = Arc::new(KafkaMetrics::new());
        let collector = Arc::new(MetricsCollector::with_protocol(Box::new(
            kafka_metrics.clone(),
        )));
        let needs_consumer = matches!(
            bench.test_case.as_str(),
            "consume" | "consume_message" | "consume_batch" | "mixed"
        );
        Self {
            config,
            needs_consumer,
            producer: RwLock::new(None),
            consumer: RwLock::new(None),
            connected: AtomicBool::new(false),
            collector,
            kafka_metrics,
        }
    }

    fn topic_for<'a>(&'a self, op: &'a Operation) -> &'a str {
        op.param("topic")
            .and_then(ParamValue::as_str)
            .unwrap_or(&self.config.topic)
    }

    /// Broker reachability probe. An unknown topic still proves the cluster
    /// answers metadata requests, so it is accepted; real watermarks are
    /// recorded for every partition the topic already has.
    fn probe_metadata(&self, producer: &Arc<KafkaProducerPool>) -> Result<(), SurgeError> {
        let client = producer.acquire()?;
        let metadata = client
            .client()
            .fetch_metadata(Some(&self.config.topic), Timeout::After(METADATA_TIMEOUT))
            .map_err(|err| map_kafka_error(&err))?;
        let Some(topic) = metadata
            .topics()
            .iter()
            .find(|t| t.name() == self.config.topic)
        else {
            return Ok(());
        };
        if let Some(err) = topic.error() {
            let code = RDKafkaErrorCode::from(err);
            if code != RDKafkaErrorCode::UnknownTopicOrPartition {
                return Err(SurgeError::Protocol(format!(
                    "topic {} metadata error: {code}",
                    self.config.topic
                )));
            }
            warn!(topic = %self.config.topic, "topic does not exist yet; broker is reachable");
            return Ok(());
        }
        for partition in topic.partitions() {
            match client.client().fetch_watermarks(
                &self.config.topic,
                partition.id(),
                Timeout::After(METADATA_TIMEOUT),
            ) {
                Ok((_, high)) => {
                    self.kafka_metrics
                        .record_watermark(&self.config.topic, partition.id(), high)
                }
                Err(err) => warn!(
                    partition = partition.id(),
                    "failed to fetch watermarks: {err}"
                ),
            }
        }
        Ok(())
    }

    async fn produce_one(&self, op: &Operation) -> OperationResult {
        let pool = match self.producer.read().await.as_ref() {
            Some(pool) => pool.clone(),
            None => return not_connected(op),
        };
        let producer = match pool.acquire() {
            Ok(producer) => producer.clone(),
            Err(err) => return OperationResult::fail(Duration::ZERO, err),
        };
        let topic = self.topic_for(op).to_owned();
        let payload = op.value().map(|b| b.to_vec()).unwrap_or_default();
        let size = payload.len();

        let started = Instant::now();
        let mut record = FutureRecord::to(&topic).key(op.key()).payload(&payload);
        if let Some(partition) = op.param("partition").and_then(ParamValue::as_i64) {
            record = record.partition(partition as i32);
        }
        if let Some(headers) = op.param("headers").and_then(ParamValue::as_map) {
            let mut owned = OwnedHeaders::new();
            for (name, value) in headers {
                if let Some(value) = value.as_str() {
                    owned = owned.insert(Header {
                        key: name.as_str(),
                        value: Some(value),
                    });
                }
            }
            record = record.headers(owned);
        }

        match producer.send(record, Timeout::After(Duration::ZERO)).await {
            Ok((partition, offset)) => OperationResult::ok(started.elapsed())
                .with_metadata("topic", topic)
                .with_metadata("partition", i64::from(partition))
                .with_metadata("offset", offset)
                .with_metadata("message_size", size),
            Err((err, _)) => OperationResult::fail(started.elapsed(), map_kafka_error(&err))
                .with_metadata("topic", topic),
        }
    }

    async fn produce_batch(&self, op: &Operation) -> OperationResult {
        let pool = match self.producer.read().await.as_ref() {
            Some(pool) => pool.clone(),
            None => return not_connected(op),
        };
        let producer = match pool.acquire() {
            Ok(producer) => producer.clone(),
            Err(err) => return OperationResult::fail(Duration::ZERO, err),
        };
        let topic = self.topic_for(op).to_owned();

        let mut messages: Vec<(String, Vec<u8>)> = Vec::new();
        match op.param("messages").and_then(ParamValue::as_list) {
            Some(list) => {
                for entry in list {
                    let Some(map) = entry.as_map() else { continue };
                    let key = map
                        .get("key")
                        .and_then(ParamValue::as_str)
                        .unwrap_or(op.key())
                        .to_owned();
                    let value = map
                        .get("value")
                        .and_then(ParamValue::as_bytes)
                        .map(<[u8]>::to_vec)
                        .unwrap_or_default();
                    messages.push((key, value));
                }
            }
            None => {
                return OperationResult::fail(
                    Duration::ZERO,
                    SurgeError::ConfigInvalid("produce_batch requires a messages list".into()),
                )
            }
        }
        if messages.is_empty() {
            return OperationResult::fail(
                Duration::ZERO,
                SurgeError::ConfigInvalid("produce_batch messages list is empty".into()),
            );
        }

        let batch_size = messages.len();
        let total_bytes: usize = messages.iter().map(|(_, value)| value.len()).sum();
        let started = Instant::now();
        let sends = messages.iter().map(|(key, value)| {
            let producer = producer.clone();
            let topic = topic.clone();
            async move {
                let record = FutureRecord::to(&topic).key(key).payload(value);
                producer.send(record, Timeout::After(Duration::ZERO)).await
            }
        });
        let outcomes = join_all(sends).await;

        let mut delivered = 0usize;
        let mut last_error = None;
        let mut last_partition = None;
        let mut max_offset = None;
        for outcome in outcomes {
            match outcome {
                Ok((partition, offset)) => {
                    delivered += 1;
                    last_partition = Some(i64::from(partition));
                    max_offset = Some(max_offset.map_or(offset, |prev: i64| prev.max(offset)));
                }
                Err((err, _)) => last_error = Some(map_kafka_error(&err)),
            }
        }

        let duration = started.elapsed();
        let mut result = match last_error {
            None => OperationResult::ok(duration),
            Some(err) => OperationResult::fail(duration, err),
        };
        result = result
            .with_metadata("topic", topic)
            .with_metadata("batch_size", batch_size)
            .with_metadata("message_count", delivered)
            .with_metadata("message_size", total_bytes);
        if let Some(partition) = last_partition {
            result = result.with_metadata("partition", partition);
        }
        if let Some(offset) = max_offset {
            result = result.with_metadata("offset", offset);
        }
        result
    }

    async fn consume_one(&self, _op: &Operation) -> OperationResult {
        let pool = match self.consumer.read().await.as_ref() {
            Some(pool) => pool.clone(),
            None => {
                return OperationResult::fail(
                    Duration::ZERO,
                    SurgeError::ConfigInvalid(
                        "consumer is not configured for this run".into(),
                    ),
                )
                .read(true)
            }
        };
        let deadline = self.config.consumer.batch_timeout;
        let started = Instant::now();
        let consumer = match pool.acquire() {
            Ok(consumer) => consumer,
            Err(err) => return OperationResult::fail(started.elapsed(), err).read(true),
        };
        match tokio::time::timeout(deadline, consumer.recv()).await {
            Err(_) => {
                OperationResult::fail(started.elapsed(), SurgeError::Timeout(deadline)).read(true)
            }
            Ok(Err(err)) => {
                OperationResult::fail(started.elapsed(), map_kafka_error(&err)).read(true)
            }
            Ok(Ok(message)) => {
                let payload = message.payload().map(<[u8]>::to_vec).unwrap_or_default();
                let size = payload.len();
                OperationResult::ok(started.elapsed())
                    .read(true)
                    .with_metadata("topic", message.topic())
                    .with_metadata("partition", i64::from(message.partition()))
                    .with_metadata("offset", message.offset())
                    .with_metadata("message_size", size)
                    .with_value(payload)
            }
        }
    }

    async fn consume_batch(&self, op: &Operation) -> OperationResult {
        let pool = match self.consumer.read().await.as_ref() {
            Some(pool) => pool.clone(),
            None => {
                return OperationResult::fail(
                    Duration::ZERO,
                    SurgeError::ConfigInvalid(
                        "consumer is not configured for this run".into(),
                    ),
                )
                .read(true)
            }
        };
        let max_messages = op
            .param("max_messages")
            .and_then(ParamValue::as_i64)
            .map(|n| n.max(1) as usize)
            .unwrap_or(self.config.consumer.max_messages);
        let batch_timeout = self.config.consumer.batch_timeout;

        let started = Instant::now();
        let consumer = match pool.acquire() {
            Ok(consumer) => consumer,
            Err(err) => return OperationResult::fail(started.elapsed(), err).read(true),
        };

        let mut collected = 0usize;
        let mut total_bytes = 0usize;
        let mut last = None;
        let mut wire_error = None;
        while collected < max_messages {
            let elapsed = started.elapsed();
            if elapsed >= batch_timeout {
                break;
            }
            match tokio::time::timeout(batch_timeout - elapsed, consumer.recv()).await {
                Err(_) => break,
                Ok(Err(err)) => {
                    wire_error = Some(map_kafka_error(&err));
                    break;
                }
                Ok(Ok(message)) => {
                    collected += 1;
                    total_bytes += message.payload().map_or(0, <[u8]>::len);
                    last = Some((
                        message.topic().to_owned(),
                        message.partition(),
                        message.offset(),
                    ));
                }
            }
        }

        let duration = started.elapsed();
        // A timeout with some messages already gathered is a partial
        // success; an empty batch is a failure.
        if collected == 0 {
            let error = wire_error.unwrap_or(SurgeError::Timeout(batch_timeout));
            return OperationResult::fail(duration, error).read(true);
        }
        let mut result = OperationResult::ok(duration)
            .read(true)
            .with_metadata("message_count", collected)
            .with_metadata("message_size", total_bytes);
        if collected < max_messages {
            result = result.with_metadata("partial", true);
        }
        if let Some((topic, partition, offset)) = last {
            result = result
                .with_metadata("topic", topic)
                .with_metadata("partition", i64::from(partition))
                .with_metadata("offset", offset);
        }
        result
    }
}

fn map_kafka_error(err: &KafkaError) -> SurgeError {
    match err.rdkafka_error_code() {
        Some(
            RDKafkaErrorCode::BrokerTransportFailure
            | RDKafkaErrorCode::AllBrokersDown
            | RDKafkaErrorCode::NetworkException
            | RDKafkaErrorCode::OperationTimedOut
            | RDKafkaErrorCode::MessageTimedOut,
        ) => SurgeError::Transport(err.to_string()),
        _ => SurgeError::Protocol(err.to_string()),
    }
}

#[async_trait]
impl ProtocolAdapter for KafkaAdapter {
    fn protocol_name(&self) -> &'static str {
        "kafka"
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

        let producer = Arc::new(KafkaProducerPool::new(&self.config)?);
        let consumer = if self.needs_consumer {
            match KafkaConsumerPool::new(&self.config, self.kafka_metrics.clone()) {
                Ok(pool) => Some(Arc::new(pool)),
                Err(err) => {
                    producer.close();
                    return Err(err);
                }
            }
        } else {
            None
        };

        if let Err(err) = self.probe_metadata(&producer) {
            producer.close();
            if let Some(consumer) = consumer {
                consumer.close();
            }
            self.connected.store(false, Ordering::Release);
            return Err(err);
        }

        *self.producer.write().await = Some(producer);
        *self.consumer.write().await = consumer;
        self.connected.store(true, Ordering::Release);
        info!(brokers = %self.config.brokers, topic = %self.config.topic, "kafka adapter connected");
        Ok(())
    }

    async fn execute(&self, op: &Operation) -> OperationResult {
        if !self.is_connected() {
            return not_connected(op);
        }
        let started = Instant::now();
        match op.op_type() {
            "produce" | "produce_message" => self.produce_one(op).await,
            "produce_batch" => self.produce_batch(op).await,
            "consume" | "consume_message" => self.consume_one(op).await,
            "consume_batch" => self.consume_batch(op).await,
            "create_topic" | "delete_topic" | "list_topics" | "describe_consumer_groups" => {
                OperationResult::fail(
                    started.elapsed(),
                    SurgeError::NotImplemented(op.op_type().to_owned()),
                )
            }
            _ => unsupported(op, started),
        }
    }

    async fn health_check(&self) -> Result<(), SurgeError> {
        let producer = self
            .producer
            .read()
            .await
            .as_ref()
            .cloned()
            .ok_or(SurgeError::PoolClosed)?;
        self.probe_metadata(&producer)
    }

    async fn close(&self) -> Result<(), SurgeError> {
        self.connected.store(false, Ordering::Release);
        if let Some(producer) = self.producer.write().await.take() {
            producer.close();
        }
        if let Some(consumer) = self.consumer.write().await.take() {
            consumer.close();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rdkafka::mocking::MockCluster;
    use surge_core::factory::OperationFactory;

    use crate::factory::KafkaOperationFactory;

    use super::*;

    fn bench(test_case: &str) -> BenchmarkConfig {
        BenchmarkConfig {
            test_case: test_case.into(),
            data_size: 32,
            ..BenchmarkConfig::default()
        }
    }

    async fn mock_adapter(test_case: &str) -> (MockCluster<'static, rdkafka::producer::DefaultProducerContext>, KafkaAdapter)
    {
        let cluster = MockCluster::new(1).expect("failed to create mock cluster");
        let config = KafkaConfig {
            brokers: cluster.bootstrap_servers(),
            topic: "bench-events".into(),
            ..KafkaConfig::default()
        };
        let adapter = KafkaAdapter::new(config, &bench(test_case));
        adapter.connect().await.expect("adapter failed to connect");
        (cluster, adapter)
    }

    #[tokio::test]
    async fn produces_against_a_mocked_cluster() {
        let (_cluster, adapter) = mock_adapter("produce").await;
        let factory = KafkaOperationFactory::new(
            KafkaConfig {
                topic: "bench-events".into(),
                ..KafkaConfig::default()
            },
            bench("produce"),
        );

        for job in 0..20 {
            let op = factory.build(job);
            let result = adapter.execute(&op).await;
            assert!(result.success, "{:?}", result.error);
            assert!(!result.is_read);
            assert_eq!(result.meta_str("topic"), Some("bench-events"));
            assert!(result.meta_i64("offset").is_some());
            adapter.collector().record(&result);
        }

        let snapshot = adapter.collector().snapshot();
        assert_eq!(snapshot.success_ops, 20);
        let protocol = snapshot.protocol_metrics.unwrap();
        assert_eq!(protocol["producer"]["messages"], 20);
        adapter.close().await.unwrap();
    }

    #[tokio::test]
    async fn produce_batches_deliver_every_message() {
        let (_cluster, adapter) = mock_adapter("produce_batch").await;
        let factory = KafkaOperationFactory::new(
            KafkaConfig {
                topic: "bench-events".into(),
                ..KafkaConfig::default()
            },
            bench("produce_batch"),
        );

        let op = factory.build(0);
        let result = adapter.execute(&op).await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.meta_i64("batch_size"), Some(10));
        assert_eq!(result.meta_i64("message_count"), Some(10));
        adapter.close().await.unwrap();
    }

    #[tokio::test]
    async fn consume_without_a_consumer_fails_cleanly() {
        let (_cluster, adapter) = mock_adapter("produce").await;
        let result = adapter
            .execute(&Operation::new("consume_message", "k").with_op_kind(true))
            .await;
        assert!(!result.success);
        assert!(matches!(result.error, Some(SurgeError::ConfigInvalid(_))));
    }

    #[tokio::test]
    async fn admin_verbs_are_stubs() {
        let (_cluster, adapter) = mock_adapter("produce").await;
        for verb in [
            "create_topic",
            "delete_topic",
            "list_topics",
            "describe_consumer_groups",
        ] {
            let result = adapter.execute(&Operation::new(verb, "t")).await;
            assert!(matches!(result.error, Some(SurgeError::NotImplemented(_))));
        }
    }

    #[tokio::test]
    async fn unknown_tags_fail_without_panicking() {
        let (_cluster, adapter) = mock_adapter("produce").await;
        let result = adapter.execute(&Operation::new("compact_topic", "t")).await;
        assert!(matches!(
            result.error,
            Some(SurgeError::UnsupportedOperation(_))
        ));
    }

    #[tokio::test]
    async fn execute_after_close_fails_with_pool_closed() {
        let (_cluster, adapter) = mock_adapter("produce").await;
        adapter.close().await.unwrap();
        adapter.close().await.unwrap();
        let result = adapter
            .execute(&Operation::new("produce_message", "k"))
            .await;
        assert_eq!(result.error, Some(SurgeError::PoolClosed));
    }
}
