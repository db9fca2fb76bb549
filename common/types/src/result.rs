use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;

use crate::error::SurgeError;
use crate::value::ParamValue;

/// Outcome of one adapter execute call, uniform across protocols. Produced
/// by exactly one adapter call (or by the engine for timeouts and
/// cancellations) and consumed once by the metrics collector.
#[derive(Debug, Clone)]
pub struct OperationResult {
    pub success: bool,
    pub is_read: bool,
    pub duration: Duration,
    pub value: Option<Bytes>,
    pub error: Option<SurgeError>,
    pub metadata: HashMap<String, ParamValue>,
}

impl OperationResult {
    pub fn ok(duration: Duration) -> Self {
        Self {
            success: true,
            is_read: false,
            duration,
            value: None,
            error: None,
            metadata: HashMap::new(),
        }
    }

    pub fn fail(duration: Duration, error: SurgeError) -> Self {
        Self {
            success: false,
            is_read: false,
            duration,
            value: None,
            error: Some(error),
            metadata: HashMap::new(),
        }
    }

    pub fn read(mut self, is_read: bool) -> Self {
        self.is_read = is_read;
        self
    }

    pub fn with_value(mut self, value: impl Into<Bytes>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_metadata(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.metadata.insert(name.into(), value.into());
        self
    }

    pub fn meta_str(&self, name: &str) -> Option<&str> {
        self.metadata.get(name).and_then(ParamValue::as_str)
    }

    pub fn meta_i64(&self, name: &str) -> Option<i64> {
        self.metadata.get(name).and_then(ParamValue::as_i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_carries_the_error_and_the_duration() {
        let result = OperationResult::fail(
            Duration::from_millis(250),
            SurgeError::Transport("reset by peer".into()),
        );
        assert!(!result.success);
        assert_eq!(result.duration, Duration::from_millis(250));
        assert_eq!(result.error.as_ref().unwrap().category(), "connection");
    }

    #[test]
    fn metadata_accessors_match_kinds() {
        let result = OperationResult::ok(Duration::from_millis(1))
            .with_metadata("status_code", 200i64)
            .with_metadata("method", "GET");
        assert_eq!(result.meta_i64("status_code"), Some(200));
        assert_eq!(result.meta_str("method"), Some("GET"));
        assert_eq!(result.meta_i64("method"), None);
    }
}
