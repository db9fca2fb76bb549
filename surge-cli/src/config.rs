use std::path::Path;
use std::time::Duration;

use common_types::config::{parse_duration, DurationString};
use common_types::{BenchmarkConfig, SurgeError};
use envconfig::Envconfig;
use serde::Deserialize;
use surge_http::HttpConfig;
use surge_kafka::KafkaConfig;
use surge_redis::RedisConfig;
use surge_tcp::TcpConfig;

use crate::cli::Cli;
use crate::report::ReportConfig;

/// The full run configuration, assembled from four sources overlaid
/// key-by-key, lowest priority first: built-in defaults, the YAML file,
/// `<PROTO>_RUNNER_*` environment variables, and command-line flags.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunnerConfig {
    pub protocol: Option<String>,
    pub benchmark: BenchmarkConfig,
    pub report: ReportConfig,
    pub http: Option<HttpConfig>,
    pub kafka: Option<KafkaConfig>,
    pub redis: Option<RedisConfig>,
    pub tcp: Option<TcpConfig>,
}

impl RunnerConfig {
    pub fn from_yaml(text: &str) -> Result<Self, SurgeError> {
        serde_yaml::from_str(text)
            .map_err(|err| SurgeError::ConfigInvalid(format!("invalid configuration: {err}")))
    }

    pub fn from_file(path: &Path) -> Result<Self, SurgeError> {
        let text = std::fs::read_to_string(path).map_err(|err| {
            SurgeError::ConfigInvalid(format!("cannot read config file {path:?}: {err}"))
        })?;
        Self::from_yaml(&text)
    }

    /// The protocol this run drives: explicit selection first, otherwise
    /// inferred when exactly one protocol section is configured.
    pub fn resolve_protocol(&self) -> Result<String, SurgeError> {
        if let Some(protocol) = &self.protocol {
            return Ok(protocol.clone());
        }
        let configured: Vec<&str> = [
            ("http", self.http.is_some()),
            ("kafka", self.kafka.is_some()),
            ("redis", self.redis.is_some()),
            ("tcp", self.tcp.is_some()),
        ]
        .iter()
        .filter_map(|(name, present)| present.then_some(*name))
        .collect();
        match configured.as_slice() {
            [single] => Ok((*single).to_string()),
            [] => Err(SurgeError::ConfigInvalid(
                "no protocol configured; pass --protocol or add a protocol section".into(),
            )),
            many => Err(SurgeError::ConfigInvalid(format!(
                "multiple protocol sections configured ({}); pass --protocol to pick one",
                many.join(", ")
            ))),
        }
    }
}

/// Benchmark keys shared by every protocol's environment and flag layers.
#[derive(Debug, Default)]
struct BenchPatch {
    total: Option<u64>,
    parallels: Option<usize>,
    duration: Option<Duration>,
    timeout: Option<Duration>,
    ramp_up: Option<Duration>,
    data_size: Option<usize>,
    read_percent: Option<u8>,
    random_keys: Option<u64>,
    test_case: Option<String>,
}

impl BenchPatch {
    fn apply(self, bench: &mut BenchmarkConfig) {
        if let Some(total) = self.total {
            bench.total = total;
        }
        if let Some(parallels) = self.parallels {
            bench.parallels = parallels;
        }
        if let Some(duration) = self.duration {
            bench.duration = Some(duration);
        }
        if let Some(timeout) = self.timeout {
            bench.timeout = timeout;
        }
        if let Some(ramp_up) = self.ramp_up {
            bench.ramp_up = ramp_up;
        }
        if let Some(data_size) = self.data_size {
            bench.data_size = data_size;
        }
        if let Some(read_percent) = self.read_percent {
            bench.read_percent = read_percent;
        }
        if let Some(random_keys) = self.random_keys {
            bench.random_keys = random_keys;
        }
        if let Some(test_case) = self.test_case {
            bench.test_case = test_case;
        }
    }
}

#[derive(Envconfig, Debug)]
pub struct HttpEnv {
    #[envconfig(from = "HTTP_RUNNER_BASE_URL")]
    pub base_url: Option<String>,
    #[envconfig(from = "HTTP_RUNNER_METHOD")]
    pub method: Option<String>,
    #[envconfig(from = "HTTP_RUNNER_PATH")]
    pub path: Option<String>,
    #[envconfig(from = "HTTP_RUNNER_TOTAL")]
    pub total: Option<u64>,
    #[envconfig(from = "HTTP_RUNNER_PARALLELS")]
    pub parallels: Option<usize>,
    #[envconfig(from = "HTTP_RUNNER_DURATION")]
    pub duration: Option<DurationString>,
    #[envconfig(from = "HTTP_RUNNER_TIMEOUT")]
    pub timeout: Option<DurationString>,
    #[envconfig(from = "HTTP_RUNNER_RAMP_UP")]
    pub ramp_up: Option<DurationString>,
    #[envconfig(from = "HTTP_RUNNER_DATA_SIZE")]
    pub data_size: Option<usize>,
    #[envconfig(from = "HTTP_RUNNER_READ_PERCENT")]
    pub read_percent: Option<u8>,
    #[envconfig(from = "HTTP_RUNNER_RANDOM_KEYS")]
    pub random_keys: Option<u64>,
    #[envconfig(from = "HTTP_RUNNER_TEST_CASE")]
    pub test_case: Option<String>,
}

#[derive(Envconfig, Debug)]
pub struct KafkaEnv {
    #[envconfig(from = "KAFKA_RUNNER_BROKERS")]
    pub brokers: Option<String>,
    #[envconfig(from = "KAFKA_RUNNER_TOPIC")]
    pub topic: Option<String>,
    #[envconfig(from = "KAFKA_RUNNER_CLIENT_ID")]
    pub client_id: Option<String>,
    #[envconfig(from = "KAFKA_RUNNER_GROUP_ID")]
    pub group_id: Option<String>,
    #[envconfig(from = "KAFKA_RUNNER_TOTAL")]
    pub total: Option<u64>,
    #[envconfig(from = "KAFKA_RUNNER_PARALLELS")]
    pub parallels: Option<usize>,
    #[envconfig(from = "KAFKA_RUNNER_DURATION")]
    pub duration: Option<DurationString>,
    #[envconfig(from = "KAFKA_RUNNER_TIMEOUT")]
    pub timeout: Option<DurationString>,
    #[envconfig(from = "KAFKA_RUNNER_RAMP_UP")]
    pub ramp_up: Option<DurationString>,
    #[envconfig(from = "KAFKA_RUNNER_DATA_SIZE")]
    pub data_size: Option<usize>,
    #[envconfig(from = "KAFKA_RUNNER_READ_PERCENT")]
    pub read_percent: Option<u8>,
    #[envconfig(from = "KAFKA_RUNNER_RANDOM_KEYS")]
    pub random_keys: Option<u64>,
    #[envconfig(from = "KAFKA_RUNNER_TEST_CASE")]
    pub test_case: Option<String>,
}

#[derive(Envconfig, Debug)]
pub struct RedisEnv {
    #[envconfig(from = "REDIS_RUNNER_ADDRS")]
    pub addrs: Option<String>,
    #[envconfig(from = "REDIS_RUNNER_DB")]
    pub db: Option<u8>,
    #[envconfig(from = "REDIS_RUNNER_PASSWORD")]
    pub password: Option<String>,
    #[envconfig(from = "REDIS_RUNNER_TOTAL")]
    pub total: Option<u64>,
    #[envconfig(from = "REDIS_RUNNER_PARALLELS")]
    pub parallels: Option<usize>,
    #[envconfig(from = "REDIS_RUNNER_DURATION")]
    pub duration: Option<DurationString>,
    #[envconfig(from = "REDIS_RUNNER_TIMEOUT")]
    pub timeout: Option<DurationString>,
    #[envconfig(from = "REDIS_RUNNER_RAMP_UP")]
    pub ramp_up: Option<DurationString>,
    #[envconfig(from = "REDIS_RUNNER_DATA_SIZE")]
    pub data_size: Option<usize>,
    #[envconfig(from = "REDIS_RUNNER_READ_PERCENT")]
    pub read_percent: Option<u8>,
    #[envconfig(from = "REDIS_RUNNER_RANDOM_KEYS")]
    pub random_keys: Option<u64>,
    #[envconfig(from = "REDIS_RUNNER_TEST_CASE")]
    pub test_case: Option<String>,
}

#[derive(Envconfig, Debug)]
pub struct TcpEnv {
    #[envconfig(from = "TCP_RUNNER_ADDRESS")]
    pub address: Option<String>,
    #[envconfig(from = "TCP_RUNNER_TOTAL")]
    pub total: Option<u64>,
    #[envconfig(from = "TCP_RUNNER_PARALLELS")]
    pub parallels: Option<usize>,
    #[envconfig(from = "TCP_RUNNER_DURATION")]
    pub duration: Option<DurationString>,
    #[envconfig(from = "TCP_RUNNER_TIMEOUT")]
    pub timeout: Option<DurationString>,
    #[envconfig(from = "TCP_RUNNER_RAMP_UP")]
    pub ramp_up: Option<DurationString>,
    #[envconfig(from = "TCP_RUNNER_DATA_SIZE")]
    pub data_size: Option<usize>,
    #[envconfig(from = "TCP_RUNNER_READ_PERCENT")]
    pub read_percent: Option<u8>,
    #[envconfig(from = "TCP_RUNNER_RANDOM_KEYS")]
    pub random_keys: Option<u64>,
    #[envconfig(from = "TCP_RUNNER_TEST_CASE")]
    pub test_case: Option<String>,
}

fn env_error(err: envconfig::Error) -> SurgeError {
    SurgeError::ConfigInvalid(format!("invalid environment override: {err}"))
}

/// Apply the environment layer for the selected protocol, creating its
/// section when the environment configures a protocol that the file did not.
pub fn apply_env(config: &mut RunnerConfig, protocol: &str) -> Result<(), SurgeError> {
    let patch = match protocol {
        "http" => {
            let env = HttpEnv::init_from_env().map_err(env_error)?;
            let section = config.http.get_or_insert_with(HttpConfig::default);
            if let Some(base_url) = env.base_url {
                section.base_url = base_url;
            }
            if let Some(method) = env.method {
                section.method = method;
            }
            if let Some(path) = env.path {
                section.path = path;
            }
            BenchPatch {
                total: env.total,
                parallels: env.parallels,
                duration: env.duration.map(|d| d.0),
                timeout: env.timeout.map(|d| d.0),
                ramp_up: env.ramp_up.map(|d| d.0),
                data_size: env.data_size,
                read_percent: env.read_percent,
                random_keys: env.random_keys,
                test_case: env.test_case,
            }
        }
        "kafka" => {
            let env = KafkaEnv::init_from_env().map_err(env_error)?;
            let section = config.kafka.get_or_insert_with(KafkaConfig::default);
            if let Some(brokers) = env.brokers {
                section.brokers = brokers;
            }
            if let Some(topic) = env.topic {
                section.topic = topic;
            }
            if let Some(client_id) = env.client_id {
                section.client_id = Some(client_id);
            }
            if let Some(group_id) = env.group_id {
                section.consumer.group_id = group_id;
            }
            BenchPatch {
                total: env.total,
                parallels: env.parallels,
                duration: env.duration.map(|d| d.0),
                timeout: env.timeout.map(|d| d.0),
                ramp_up: env.ramp_up.map(|d| d.0),
                data_size: env.data_size,
                read_percent: env.read_percent,
                random_keys: env.random_keys,
                test_case: env.test_case,
            }
        }
        "redis" => {
            let env = RedisEnv::init_from_env().map_err(env_error)?;
            let section = config.redis.get_or_insert_with(RedisConfig::default);
            if let Some(addrs) = env.addrs {
                section.addrs = addrs.split(',').map(|s| s.trim().to_owned()).collect();
            }
            if let Some(db) = env.db {
                section.db = db;
            }
            if let Some(password) = env.password {
                section.password = password;
            }
            BenchPatch {
                total: env.total,
                parallels: env.parallels,
                duration: env.duration.map(|d| d.0),
                timeout: env.timeout.map(|d| d.0),
                ramp_up: env.ramp_up.map(|d| d.0),
                data_size: env.data_size,
                read_percent: env.read_percent,
                random_keys: env.random_keys,
                test_case: env.test_case,
            }
        }
        "tcp" => {
            let env = TcpEnv::init_from_env().map_err(env_error)?;
            let section = config.tcp.get_or_insert_with(TcpConfig::default);
            if let Some(address) = env.address {
                section.address = address;
            }
            BenchPatch {
                total: env.total,
                parallels: env.parallels,
                duration: env.duration.map(|d| d.0),
                timeout: env.timeout.map(|d| d.0),
                ramp_up: env.ramp_up.map(|d| d.0),
                data_size: env.data_size,
                read_percent: env.read_percent,
                random_keys: env.random_keys,
                test_case: env.test_case,
            }
        }
        other => {
            return Err(SurgeError::ConfigInvalid(format!(
                "unknown protocol {other:?}"
            )))
        }
    };
    patch.apply(&mut config.benchmark);
    Ok(())
}

/// Apply the flag layer (highest priority) for the selected protocol.
pub fn apply_flags(config: &mut RunnerConfig, protocol: &str, cli: &Cli) -> Result<(), SurgeError> {
    let parse = |label: &str, value: &Option<String>| -> Result<Option<Duration>, SurgeError> {
        value
            .as_deref()
            .map(|text| {
                parse_duration(text)
                    .map_err(|err| SurgeError::ConfigInvalid(format!("--{label}: {err}")))
            })
            .transpose()
    };
    let patch = BenchPatch {
        total: cli.total,
        parallels: cli.parallels,
        duration: parse("duration", &cli.duration)?,
        timeout: parse("timeout", &cli.timeout)?,
        ramp_up: parse("rampup", &cli.ramp_up)?,
        data_size: None,
        read_percent: None,
        random_keys: None,
        test_case: cli.test_case.clone(),
    };
    patch.apply(&mut config.benchmark);

    match protocol {
        "http" => {
            let section = config.http.get_or_insert_with(HttpConfig::default);
            if let Some(url) = &cli.url {
                section.base_url = url.clone();
            }
            if let Some(method) = &cli.method {
                section.method = method.clone();
            }
            if let Some(path) = &cli.path {
                section.path = path.clone();
            }
        }
        "kafka" => {
            let section = config.kafka.get_or_insert_with(KafkaConfig::default);
            if let Some(brokers) = &cli.brokers {
                section.brokers = brokers.clone();
            }
            if let Some(topic) = &cli.topic {
                section.topic = topic.clone();
            }
            if let Some(client_id) = &cli.client_id {
                section.client_id = Some(client_id.clone());
            }
        }
        "redis" => {
            let section = config.redis.get_or_insert_with(RedisConfig::default);
            if let Some(addr) = &cli.addr {
                section.addrs = vec![addr.clone()];
            }
        }
        "tcp" => {
            let section = config.tcp.get_or_insert_with(TcpConfig::default);
            if let Some(addr) = &cli.addr {
                section.address = addr.clone();
            }
        }
        other => {
            return Err(SurgeError::ConfigInvalid(format!(
                "unknown protocol {other:?}"
            )))
        }
    }
    if let Some(format) = cli.report {
        config.report.format = format;
    }
    if let Some(output) = &cli.output {
        config.report.output = Some(output.clone());
    }
    Ok(())
}

/// Assemble the effective configuration: defaults < YAML < environment <
/// flags, then resolve the protocol the run drives.
pub fn load(cli: &Cli) -> Result<(RunnerConfig, String), SurgeError> {
    let mut config = match &cli.config {
        Some(path) => RunnerConfig::from_file(path)?,
        None => RunnerConfig::default(),
    };
    if let Some(protocol) = &cli.protocol {
        config.protocol = Some(protocol.clone());
    }
    let protocol = config.resolve_protocol().or_else(|err| {
        // With no file section, the flags alone can still pick a protocol.
        match (&cli.url, &cli.brokers) {
            (Some(_), None) => Ok("http".to_string()),
            (None, Some(_)) => Ok("kafka".to_string()),
            _ => Err(err),
        }
    })?;
    apply_env(&mut config, &protocol)?;
    apply_flags(&mut config, &protocol, cli)?;
    config.benchmark.validate()?;
    Ok((config, protocol))
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    fn cli(args: &[&str]) -> Cli {
        let mut full = vec!["surge"];
        full.extend_from_slice(args);
        Cli::parse_from(full)
    }

    #[test]
    fn yaml_configures_sections_and_benchmark() {
        let config = RunnerConfig::from_yaml(
            r#"
            http:
              base_url: "http://localhost:18080"
              path: /ok
            benchmark:
              total: 1000
              parallels: 10
              timeout: "2s"
            report:
              format: json
            "#,
        )
        .unwrap();
        assert_eq!(config.resolve_protocol().unwrap(), "http");
        assert_eq!(config.benchmark.total, 1000);
        assert_eq!(config.benchmark.timeout, Duration::from_secs(2));
    }

    #[test]
    fn protocol_inference_requires_exactly_one_section() {
        let config = RunnerConfig::from_yaml(
            r#"
            http:
              base_url: "http://localhost:1"
            tcp:
              address: "localhost:7"
            "#,
        )
        .unwrap();
        assert!(config.resolve_protocol().is_err());
        assert!(RunnerConfig::default().resolve_protocol().is_err());
    }

    #[test]
    fn env_overrides_the_file_layer() {
        std::env::set_var("KAFKA_RUNNER_BROKERS", "k1:9092");
        std::env::set_var("KAFKA_RUNNER_TOTAL", "2000");
        std::env::set_var("KAFKA_RUNNER_TIMEOUT", "750ms");

        let mut config = RunnerConfig::from_yaml(
            r#"
            kafka:
              brokers: "file:9092"
              topic: t
            benchmark:
              total: 100
            "#,
        )
        .unwrap();
        apply_env(&mut config, "kafka").unwrap();
        let kafka = config.kafka.as_ref().unwrap();
        assert_eq!(kafka.brokers, "k1:9092");
        assert_eq!(kafka.topic, "t");
        assert_eq!(config.benchmark.total, 2000);
        assert_eq!(config.benchmark.timeout, Duration::from_millis(750));

        std::env::remove_var("KAFKA_RUNNER_BROKERS");
        std::env::remove_var("KAFKA_RUNNER_TOTAL");
        std::env::remove_var("KAFKA_RUNNER_TIMEOUT");
    }

    #[test]
    fn flags_overlay_everything_else() {
        std::env::set_var("TCP_RUNNER_ADDRESS", "env-host:7");
        std::env::set_var("TCP_RUNNER_TOTAL", "500");

        let cli = cli(&[
            "-P", "tcp", "-a", "flag-host:7", "-n", "900", "--duration", "5s",
        ]);
        let (config, protocol) = load(&cli).unwrap();
        assert_eq!(protocol, "tcp");
        // Flags beat the environment key-by-key; untouched env keys stay.
        assert_eq!(config.tcp.as_ref().unwrap().address, "flag-host:7");
        assert_eq!(config.benchmark.total, 900);
        assert_eq!(config.benchmark.duration, Some(Duration::from_secs(5)));

        std::env::remove_var("TCP_RUNNER_ADDRESS");
        std::env::remove_var("TCP_RUNNER_TOTAL");
    }

    #[test]
    fn a_url_flag_alone_selects_http() {
        let cli = cli(&["-u", "http://localhost:8080", "-n", "10"]);
        let (config, protocol) = load(&cli).unwrap();
        assert_eq!(protocol, "http");
        assert_eq!(
            config.http.as_ref().unwrap().base_url,
            "http://localhost:8080"
        );
    }

    #[test]
    fn bad_flag_durations_are_config_errors() {
        let cli = cli(&["-P", "http", "-u", "http://x", "--timeout", "soon"]);
        let err = load(&cli).unwrap_err();
        assert!(matches!(err, SurgeError::ConfigInvalid(_)));
    }
}
