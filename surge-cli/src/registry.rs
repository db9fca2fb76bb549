use std::collections::HashMap;
use std::sync::Arc;

use common_types::SurgeError;
use surge_core::{OperationFactory, ProtocolAdapter};
use surge_http::{HttpAdapter, HttpOperationFactory};
use surge_kafka::{KafkaAdapter, KafkaOperationFactory};
use surge_redis::{RedisAdapter, RedisOperationFactory};
use surge_tcp::{TcpAdapter, TcpOperationFactory};

use crate::config::RunnerConfig;

type AdapterPair = (Arc<dyn ProtocolAdapter>, Arc<dyn OperationFactory>);
type BuilderFn = fn(&RunnerConfig) -> Result<AdapterPair, SurgeError>;

/// Table mapping protocol name to its adapter and factory constructors.
/// Each constructed adapter carries its own collector with the protocol
/// sub-collector already attached.
pub struct AdapterRegistry {
    builders: HashMap<&'static str, BuilderFn>,
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        let mut builders: HashMap<&'static str, BuilderFn> = HashMap::new();
        builders.insert("http", build_http);
        builders.insert("kafka", build_kafka);
        builders.insert("redis", build_redis);
        builders.insert("tcp", build_tcp);
        Self { builders }
    }
}

impl AdapterRegistry {
    pub fn build(&self, protocol: &str, config: &RunnerConfig) -> Result<AdapterPair, SurgeError> {
        let builder = self.builders.get(protocol).ok_or_else(|| {
            let mut known = self.protocols();
            known.sort_unstable();
            SurgeError::ConfigInvalid(format!(
                "unknown protocol {protocol:?}; known protocols: {}",
                known.join(", ")
            ))
        })?;
        builder(config)
    }

    pub fn protocols(&self) -> Vec<&'static str> {
        self.builders.keys().copied().collect()
    }
}

fn missing_section(protocol: &str) -> SurgeError {
    SurgeError::ConfigInvalid(format!(
        "the {protocol} section is missing from the configuration"
    ))
}

fn build_http(config: &RunnerConfig) -> Result<AdapterPair, SurgeError> {
    let http = config.http.clone().ok_or_else(|| missing_section("http"))?;
    let adapter = Arc::new(HttpAdapter::new(http.clone()));
    let factory = Arc::new(HttpOperationFactory::new(http, config.benchmark.clone()));
    Ok((adapter, factory))
}

fn build_kafka(config: &RunnerConfig) -> Result<AdapterPair, SurgeError> {
    let kafka = config
        .kafka
        .clone()
        .ok_or_else(|| missing_section("kafka"))?;
    let adapter = Arc::new(KafkaAdapter::new(kafka.clone(), &config.benchmark));
    let factory = Arc::new(KafkaOperationFactory::new(kafka, config.benchmark.clone()));
    Ok((adapter, factory))
}

fn build_redis(config: &RunnerConfig) -> Result<AdapterPair, SurgeError> {
    let redis = config
        .redis
        .clone()
        .ok_or_else(|| missing_section("redis"))?;
    let adapter = Arc::new(RedisAdapter::new(redis.clone()));
    let factory = Arc::new(RedisOperationFactory::new(redis, config.benchmark.clone()));
    Ok((adapter, factory))
}

fn build_tcp(config: &RunnerConfig) -> Result<AdapterPair, SurgeError> {
    let tcp = config.tcp.clone().ok_or_else(|| missing_section("tcp"))?;
    let adapter = Arc::new(TcpAdapter::new(tcp));
    let factory = Arc::new(TcpOperationFactory::new(config.benchmark.clone()));
    Ok((adapter, factory))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_protocols_build_matched_pairs() {
        let registry = AdapterRegistry::default();
        let config = RunnerConfig::from_yaml(
            r#"
            http:
              base_url: "http://localhost:1"
            "#,
        )
        .unwrap();
        let (adapter, factory) = registry.build("http", &config).unwrap();
        assert_eq!(adapter.protocol_name(), "http");
        assert_eq!(factory.protocol(), "http");
        assert!(!adapter.is_connected());
        assert!(adapter.supported_operations().contains(&"http_get"));
    }

    #[test]
    fn unknown_protocols_and_missing_sections_fail() {
        let registry = AdapterRegistry::default();
        let config = RunnerConfig::default();
        assert!(matches!(
            registry.build("quic", &config),
            Err(SurgeError::ConfigInvalid(_))
        ));
        assert!(matches!(
            registry.build("redis", &config),
            Err(SurgeError::ConfigInvalid(_))
        ));
    }

    #[test]
    fn every_protocol_has_a_builder() {
        let mut protocols = AdapterRegistry::default().protocols();
        protocols.sort_unstable();
        assert_eq!(protocols, vec!["http", "kafka", "redis", "tcp"]);
    }
}
