use std::collections::BTreeMap;
use std::sync::Mutex;

use common_types::OperationResult;
use serde::Serialize;

use super::ProtocolMetrics;

/// Redis sub-collector: command-type distribution and hit/miss for `get`,
/// derived from result value presence.
pub struct RedisMetrics {
    inner: Mutex<Inner>,
}

#[derive(Default, Serialize)]
struct Inner {
    commands: BTreeMap<String, u64>,
    hits: u64,
    misses: u64,
}

impl RedisMetrics {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }
}

impl Default for RedisMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolMetrics for RedisMetrics {
    fn protocol(&self) -> &'static str {
        "redis"
    }

    fn record(&self, result: &OperationResult) {
        let Some(command) = result.meta_str("command") else {
            return;
        };
        let mut inner = self.inner.lock().expect("poisoned redis metrics");
        *inner.commands.entry(command.to_owned()).or_insert(0) += 1;
        if command == "get" && result.success {
            if result.value.is_some() {
                inner.hits += 1;
            } else {
                inner.misses += 1;
            }
        }
    }

    fn snapshot(&self) -> serde_json::Value {
        let inner = self.inner.lock().expect("poisoned redis metrics");
        serde_json::to_value(&*inner).unwrap_or(serde_json::Value::Null)
    }

    fn reset(&self) {
        *self.inner.lock().expect("poisoned redis metrics") = Inner::default();
    }
}
