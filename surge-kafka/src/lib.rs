//! Kafka protocol support: producer/consumer wrappers over rdkafka, the
//! adapter translating operations into produce/consume calls, and the
//! `test_case`-keyed factory.

pub mod adapter;
pub mod config;
pub mod factory;
pub mod pool;

pub use adapter::KafkaAdapter;
pub use config::KafkaConfig;
pub use factory::KafkaOperationFactory;
