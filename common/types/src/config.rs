use std::str::FromStr;
use std::time::Duration;

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer};

use crate::error::SurgeError;

/// Run-wide benchmark knobs, read-only for the duration of a run. Loaded
/// from the `benchmark` section of the YAML config and overridden by
/// environment and flags.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BenchmarkConfig {
    /// Finite job count; 0 means duration-only.
    pub total: u64,
    /// Worker count.
    pub parallels: usize,
    /// Optional wall-clock cap for the run.
    #[serde(deserialize_with = "de_duration_opt")]
    pub duration: Option<Duration>,
    /// Window over which active concurrency rises linearly from 1 to
    /// `parallels`. Zero disables ramp-up.
    #[serde(deserialize_with = "de_duration")]
    pub ramp_up: Duration,
    /// Per-operation deadline.
    #[serde(deserialize_with = "de_duration")]
    pub timeout: Duration,
    /// Read share of the workload mix, 0..=100.
    pub read_percent: u8,
    /// Key space for random key generation; 0 selects sequential keys.
    pub random_keys: u64,
    /// Payload size in bytes for generated values.
    pub data_size: usize,
    /// Protocol-interpreted scenario selector (e.g. `produce`, `echo_test`).
    pub test_case: String,
    /// Abort the run after this many consecutive failures. Disabled when
    /// unset.
    pub error_abort_threshold: Option<u32>,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            total: 1000,
            parallels: 1,
            duration: None,
            ramp_up: Duration::ZERO,
            timeout: Duration::from_secs(10),
            read_percent: 50,
            random_keys: 10_000,
            data_size: 64,
            test_case: String::new(),
            error_abort_threshold: None,
        }
    }
}

impl BenchmarkConfig {
    pub fn validate(&self) -> Result<(), SurgeError> {
        if self.parallels == 0 {
            return Err(SurgeError::ConfigInvalid(
                "parallels must be at least 1".into(),
            ));
        }
        if self.read_percent > 100 {
            return Err(SurgeError::ConfigInvalid(format!(
                "read_percent must be within 0..=100, got {}",
                self.read_percent
            )));
        }
        if self.total == 0 && self.duration.is_none() {
            return Err(SurgeError::ConfigInvalid(
                "either total or duration must bound the run".into(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(SurgeError::ConfigInvalid("timeout must be non-zero".into()));
        }
        if let Some(0) = self.error_abort_threshold {
            return Err(SurgeError::ConfigInvalid(
                "error_abort_threshold must be at least 1 when set".into(),
            ));
        }
        Ok(())
    }
}

/// Duration syntax accepted in YAML, environment values, and flags:
/// `"500ms"`, `"2s"`, `"1m"`, `"1h"`, or a bare number of seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DurationString(pub Duration);

impl FromStr for DurationString {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (number, unit) = match s.find(|c: char| c.is_ascii_alphabetic()) {
            Some(idx) => s.split_at(idx),
            None => (s, "s"),
        };
        let value: f64 = number
            .parse()
            .map_err(|_| format!("invalid duration: {s:?}"))?;
        if !value.is_finite() || value < 0.0 {
            return Err(format!("invalid duration: {s:?}"));
        }
        let secs = match unit {
            "ms" => value / 1000.0,
            "s" => value,
            "m" => value * 60.0,
            "h" => value * 3600.0,
            other => return Err(format!("unknown duration unit {other:?} in {s:?}")),
        };
        Ok(DurationString(Duration::from_secs_f64(secs)))
    }
}

pub fn parse_duration(s: &str) -> Result<Duration, String> {
    DurationString::from_str(s).map(|d| d.0)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DurationRepr {
    Seconds(f64),
    Text(String),
}

fn duration_from_repr<'de, D: Deserializer<'de>>(repr: DurationRepr) -> Result<Duration, D::Error> {
    match repr {
        DurationRepr::Seconds(secs) if secs.is_finite() && secs >= 0.0 => {
            Ok(Duration::from_secs_f64(secs))
        }
        DurationRepr::Seconds(secs) => {
            Err(D::Error::custom(format!("invalid duration: {secs}")))
        }
        DurationRepr::Text(text) => parse_duration(&text).map_err(D::Error::custom),
    }
}

pub fn de_duration<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    duration_from_repr::<D>(DurationRepr::deserialize(deserializer)?)
}

pub fn de_duration_opt<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<Duration>, D::Error> {
    match Option::<DurationRepr>::deserialize(deserializer)? {
        None => Ok(None),
        Some(repr) => duration_from_repr::<D>(repr).map(Some),
    }
}
