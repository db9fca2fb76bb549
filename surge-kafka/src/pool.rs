use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common_metrics::subs::KafkaMetrics;
use common_types::SurgeError;
use rdkafka::consumer::{BaseConsumer, Consumer, ConsumerContext, Rebalance, StreamConsumer};
use rdkafka::error::KafkaResult;
use rdkafka::producer::{FutureProducer, Producer};
use rdkafka::{ClientConfig, ClientContext, TopicPartitionList};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::KafkaConfig;

const FLUSH_TIMEOUT: Duration = Duration::from_secs(30);

fn base_client_config(cfg: &KafkaConfig) -> ClientConfig {
    let mut client_config = ClientConfig::new();
    client_config.set("bootstrap.servers", &cfg.brokers);
    if let Some(client_id) = &cfg.client_id {
        client_config.set("client.id", client_id);
    }
    if cfg.security.tls {
        client_config.set("security.protocol", "ssl").set(
            "enable.ssl.certificate.verification",
            cfg.security.verify_certificates.to_string(),
        );
    }
    client_config
}

/// Producer wrapper. Shared-client pool shape: the underlying client
/// multiplexes broker connections internally, so acquire/return are no-ops
/// and closing flushes the in-memory queue.
pub struct KafkaProducerPool {
    producer: FutureProducer,
    closed: AtomicBool,
}

impl KafkaProducerPool {
    pub fn new(cfg: &KafkaConfig) -> Result<Self, SurgeError> {
        let mut client_config = base_client_config(cfg);
        client_config
            .set("linger.ms", cfg.producer.linger_ms.to_string())
            .set(
                "message.timeout.ms",
                cfg.producer.message_timeout_ms.to_string(),
            )
            .set("compression.codec", &cfg.producer.compression)
            .set("acks", &cfg.producer.acks)
            .set(
                "queue.buffering.max.kbytes",
                (cfg.producer.queue_mib * 1024).to_string(),
            )
            .set(
                "enable.idempotence",
                cfg.producer.enable_idempotence.to_string(),
            );
        debug!("rdkafka producer configuration: {:?}", client_config);
        let producer: FutureProducer = client_config
            .create()
            .map_err(|err| SurgeError::PoolInit(format!("failed to create producer: {err}")))?;
        Ok(Self {
            producer,
            closed: AtomicBool::new(false),
        })
    }

    pub fn acquire(&self) -> Result<&FutureProducer, SurgeError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SurgeError::PoolClosed);
        }
        Ok(&self.producer)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Idempotent; flushes queued messages before marking the pool closed.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Err(err) = self.producer.flush(FLUSH_TIMEOUT) {
            warn!("failed to flush producer on close: {err}");
        }
    }
}

/// Consumer context wiring rebalance and commit callbacks into the Kafka
/// sub-collector.
pub struct SurgeConsumerContext {
    metrics: Arc<KafkaMetrics>,
}

impl ClientContext for SurgeConsumerContext {}

impl ConsumerContext for SurgeConsumerContext {
    fn post_rebalance(&self, _consumer: &BaseConsumer<Self>, rebalance: &Rebalance<'_>) {
        info!("consumer group rebalanced: {:?}", rebalance);
        self.metrics.record_rebalance();
    }

    fn commit_callback(&self, result: KafkaResult<()>, _offsets: &TopicPartitionList) {
        match result {
            Ok(()) => self.metrics.record_commit(),
            Err(err) => warn!("offset commit failed: {err}"),
        }
    }
}

pub type SurgeStreamConsumer = StreamConsumer<SurgeConsumerContext>;

/// Consumer wrapper, subscribed at construction. Same shared-client shape
/// as the producer side.
pub struct KafkaConsumerPool {
    consumer: SurgeStreamConsumer,
    closed: AtomicBool,
}

impl KafkaConsumerPool {
    pub fn new(cfg: &KafkaConfig, metrics: Arc<KafkaMetrics>) -> Result<Self, SurgeError> {
        let group_id = if cfg.consumer.group_id.is_empty() {
            format!("surge-{}", Uuid::new_v4())
        } else {
            cfg.consumer.group_id.clone()
        };
        let mut client_config = base_client_config(cfg);
        client_config
            .set("group.id", &group_id)
            .set("auto.offset.reset", &cfg.consumer.offset_reset)
            .set("enable.auto.commit", cfg.consumer.auto_commit.to_string())
            .set(
                "auto.commit.interval.ms",
                cfg.consumer.auto_commit_interval_ms.to_string(),
            )
            .set("enable.partition.eof", "false");
        debug!(%group_id, "rdkafka consumer configuration: {:?}", client_config);
        let consumer: SurgeStreamConsumer = client_config
            .create_with_context(SurgeConsumerContext { metrics })
            .map_err(|err| SurgeError::PoolInit(format!("failed to create consumer: {err}")))?;
        consumer
            .subscribe(&[cfg.topic.as_str()])
            .map_err(|err| SurgeError::PoolInit(format!("failed to subscribe: {err}")))?;
        Ok(Self {
            consumer,
            closed: AtomicBool::new(false),
        })
    }

    pub fn acquire(&self) -> Result<&SurgeStreamConsumer, SurgeError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SurgeError::PoolClosed);
        }
        Ok(&self.consumer)
    }

    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.consumer.unsubscribe();
    }
}
