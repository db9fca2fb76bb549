use std::time::Duration;

use common_types::config::de_duration;
use common_types::SurgeError;
use serde::Deserialize;

const VALID_ACKS: &[&str] = &["0", "1", "all"];
const VALID_COMPRESSION: &[&str] = &["none", "gzip", "snappy", "lz4", "zstd"];
const VALID_OFFSET_RESET: &[&str] = &["earliest", "latest"];

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct KafkaConfig {
    /// Comma-separated bootstrap servers.
    pub brokers: String,
    pub topic: String,
    pub client_id: Option<String>,
    pub producer: ProducerConfig,
    pub consumer: ConsumerConfig,
    pub security: SecurityConfig,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".into(),
            topic: String::new(),
            client_id: None,
            producer: ProducerConfig::default(),
            consumer: ConsumerConfig::default(),
            security: SecurityConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProducerConfig {
    pub acks: String,
    pub compression: String,
    /// Maximum time between producer batches during low traffic.
    pub linger_ms: u32,
    /// Time before the client stops retrying a message.
    pub message_timeout_ms: u32,
    /// Size of the in-memory producer queue in mebibytes.
    pub queue_mib: u32,
    pub enable_idempotence: bool,
    /// Messages per `produce_batch` operation.
    pub batch_messages: usize,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            acks: "all".into(),
            compression: "none".into(),
            linger_ms: 5,
            message_timeout_ms: 20_000,
            queue_mib: 400,
            enable_idempotence: false,
            batch_messages: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConsumerConfig {
    /// Consumer group; a unique group id is generated when empty.
    pub group_id: String,
    pub offset_reset: String,
    /// Cap for one `consume_batch` operation.
    pub max_messages: usize,
    /// Deadline for a single consume or a whole batch.
    #[serde(deserialize_with = "de_duration")]
    pub batch_timeout: Duration,
    pub auto_commit: bool,
    pub auto_commit_interval_ms: u32,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            group_id: String::new(),
            offset_reset: "earliest".into(),
            max_messages: 100,
            batch_timeout: Duration::from_secs(1),
            auto_commit: true,
            auto_commit_interval_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SecurityConfig {
    pub tls: bool,
    /// Verify broker certificates when TLS is on.
    pub verify_certificates: bool,
}

impl KafkaConfig {
    pub fn validate(&self) -> Result<(), SurgeError> {
        if self.brokers.trim().is_empty() {
            return Err(SurgeError::ConfigInvalid("brokers is required".into()));
        }
        if self.topic.is_empty() {
            return Err(SurgeError::ConfigInvalid("topic is required".into()));
        }
        if !VALID_ACKS.contains(&self.producer.acks.as_str()) {
            return Err(SurgeError::ConfigInvalid(format!(
                "producer.acks must be one of {VALID_ACKS:?}, got {:?}",
                self.producer.acks
            )));
        }
        if !VALID_COMPRESSION.contains(&self.producer.compression.as_str()) {
            return Err(SurgeError::ConfigInvalid(format!(
                "producer.compression must be one of {VALID_COMPRESSION:?}, got {:?}",
                self.producer.compression
            )));
        }
        if self.producer.batch_messages == 0 {
            return Err(SurgeError::ConfigInvalid(
                "producer.batch_messages must be at least 1".into(),
            ));
        }
        if !VALID_OFFSET_RESET.contains(&self.consumer.offset_reset.as_str()) {
            return Err(SurgeError::ConfigInvalid(format!(
                "consumer.offset_reset must be one of {VALID_OFFSET_RESET:?}, got {:?}",
                self.consumer.offset_reset
            )));
        }
        if self.consumer.max_messages == 0 {
            return Err(SurgeError::ConfigInvalid(
                "consumer.max_messages must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
