use std::collections::HashMap;

use common_types::{BenchmarkConfig, Operation, ParamValue};
use surge_core::factory::{fill_payload, key_for, OperationFactory};

use crate::config::KafkaConfig;

/// Builds produce/consume operations keyed by the benchmark `test_case`:
/// `produce` (default), `produce_batch`, `consume`, `consume_batch`, or
/// `mixed` (alternating produce and consume).
pub struct KafkaOperationFactory {
    config: KafkaConfig,
    bench: BenchmarkConfig,
}

impl KafkaOperationFactory {
    pub fn new(config: KafkaConfig, bench: BenchmarkConfig) -> Self {
        Self { config, bench }
    }

    fn produce_op(&self, job_id: u64) -> Operation {
        Operation::new("produce_message", key_for(job_id, self.bench.random_keys))
            .with_value(fill_payload(self.bench.data_size))
            .with_param("topic", self.config.topic.as_str())
            .with_op_kind(false)
    }

    fn produce_batch_op(&self, job_id: u64) -> Operation {
        let batch = self.config.producer.batch_messages;
        let messages: Vec<ParamValue> = (0..batch)
            .map(|n| {
                let mut message = HashMap::new();
                message.insert(
                    "key".to_owned(),
                    ParamValue::from(format!("i:{}", job_id * batch as u64 + n as u64)),
                );
                message.insert(
                    "value".to_owned(),
                    ParamValue::from(fill_payload(self.bench.data_size)),
                );
                ParamValue::Map(message)
            })
            .collect();
        Operation::new("produce_batch", key_for(job_id, 0))
            .with_param("topic", self.config.topic.as_str())
            .with_param("messages", ParamValue::List(messages))
            .with_op_kind(false)
    }

    fn consume_op(&self, job_id: u64) -> Operation {
        Operation::new("consume_message", key_for(job_id, 0))
            .with_param("topic", self.config.topic.as_str())
            .with_op_kind(true)
    }

    fn consume_batch_op(&self, job_id: u64) -> Operation {
        Operation::new("consume_batch", key_for(job_id, 0))
            .with_param("topic", self.config.topic.as_str())
            .with_param("max_messages", self.config.consumer.max_messages)
            .with_op_kind(true)
    }
}

impl OperationFactory for KafkaOperationFactory {
    fn protocol(&self) -> &'static str {
        "kafka"
    }

    fn build(&self, job_id: u64) -> Operation {
        match self.bench.test_case.as_str() {
            "consume" | "consume_message" => self.consume_op(job_id),
            "consume_batch" => self.consume_batch_op(job_id),
            "produce_batch" => self.produce_batch_op(job_id),
            "mixed" => {
                if job_id % 2 == 0 {
                    self.produce_op(job_id)
                } else {
                    self.consume_op(job_id)
                }
            }
            // `produce`, `produce_message`, and anything unrecognized drive
            // the produce path.
            _ => self.produce_op(job_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn factory(test_case: &str) -> KafkaOperationFactory {
        let config = KafkaConfig {
            topic: "orders".into(),
            ..KafkaConfig::default()
        };
        let bench = BenchmarkConfig {
            test_case: test_case.into(),
            data_size: 16,
            random_keys: 0,
            ..BenchmarkConfig::default()
        };
        KafkaOperationFactory::new(config, bench)
    }

    #[test]
    fn produce_ops_carry_topic_and_payload() {
        let op = factory("produce").build(3);
        assert_eq!(op.op_type(), "produce_message");
        assert_eq!(op.key(), "i:3");
        assert_eq!(op.param("topic").and_then(ParamValue::as_str), Some("orders"));
        assert_eq!(op.value().map(|v| v.len()), Some(16));
        assert!(!op.is_read());
    }

    #[test]
    fn batch_ops_carry_the_configured_message_count() {
        let op = factory("produce_batch").build(0);
        assert_eq!(op.op_type(), "produce_batch");
        let messages = op.param("messages").and_then(ParamValue::as_list).unwrap();
        assert_eq!(messages.len(), 10);
        let first = messages[0].as_map().unwrap();
        assert_eq!(first.get("key").and_then(ParamValue::as_str), Some("i:0"));
        assert_eq!(
            first.get("value").and_then(ParamValue::as_bytes).map(<[u8]>::len),
            Some(16)
        );
    }

    #[test]
    fn consume_ops_are_reads() {
        let op = factory("consume").build(0);
        assert_eq!(op.op_type(), "consume_message");
        assert!(op.is_read());

        let op = factory("consume_batch").build(0);
        assert_eq!(op.op_type(), "consume_batch");
        assert_eq!(op.param("max_messages").and_then(ParamValue::as_i64), Some(100));
    }

    #[test]
    fn mixed_alternates_produce_and_consume() {
        let factory = factory("mixed");
        assert_eq!(factory.build(0).op_type(), "produce_message");
        assert_eq!(factory.build(1).op_type(), "consume_message");
        assert_eq!(factory.build(2).op_type(), "produce_message");
    }
}
