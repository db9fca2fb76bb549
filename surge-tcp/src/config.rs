use std::time::Duration;

use common_types::config::de_duration;
use common_types::SurgeError;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TcpConfig {
    /// Target as `host:port`.
    pub address: String,
    pub nodelay: bool,
    #[serde(deserialize_with = "de_duration")]
    pub connect_timeout: Duration,
    /// Deadline for a single read inside receive-style operations.
    #[serde(deserialize_with = "de_duration")]
    pub read_timeout: Duration,
    pub pool: PoolConfig,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            nodelay: true,
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(5),
            pool: PoolConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolConfig {
    pub size: usize,
    #[serde(deserialize_with = "de_duration")]
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: 8,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

impl TcpConfig {
    pub fn validate(&self) -> Result<(), SurgeError> {
        if self.address.is_empty() {
            return Err(SurgeError::ConfigInvalid("address is required".into()));
        }
        if !self.address.contains(':') {
            return Err(SurgeError::ConfigInvalid(format!(
                "address must be host:port, got {:?}",
                self.address
            )));
        }
        if self.pool.size == 0 {
            return Err(SurgeError::ConfigInvalid(
                "pool.size must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_is_required_with_a_port() {
        assert!(TcpConfig::default().validate().is_err());
        let cfg = TcpConfig {
            address: "echo-host".into(),
            ..TcpConfig::default()
        };
        assert!(cfg.validate().is_err());
        let cfg = TcpConfig {
            address: "echo-host:7".into(),
            ..TcpConfig::default()
        };
        cfg.validate().unwrap();
    }

    #[test]
    fn yaml_shape_round_trips() {
        let cfg: TcpConfig = serde_yaml::from_str(
            r#"
            address: "10.0.0.9:7000"
            nodelay: false
            connect_timeout: "1s"
            read_timeout: "250ms"
            pool:
              size: 2
            "#,
        )
        .unwrap();
        assert_eq!(cfg.address, "10.0.0.9:7000");
        assert!(!cfg.nodelay);
        assert_eq!(cfg.read_timeout, Duration::from_millis(250));
        assert_eq!(cfg.pool.size, 2);
        cfg.validate().unwrap();
    }
}
