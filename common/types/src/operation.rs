use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;

use crate::value::ParamValue;

/// Metadata key the factories use to label an operation as a read; the
/// engine falls back to it when it has to synthesize a timeout or canceled
/// result without going through the adapter.
pub const META_OP_KIND: &str = "op_kind";
pub const OP_KIND_READ: &str = "read";
pub const OP_KIND_WRITE: &str = "write";

/// A request-to-execute. Protocol-neutral on its face, with a
/// protocol-tagged `op_type` the adapter dispatches on and a free-form
/// param map for protocol-specific directives (topic, path, headers,
/// partition, batch messages). Immutable once the factory returns it.
#[derive(Debug, Clone)]
pub struct Operation {
    op_type: String,
    key: String,
    value: Option<Bytes>,
    ttl: Option<Duration>,
    params: HashMap<String, ParamValue>,
    metadata: HashMap<String, String>,
}

impl Operation {
    pub fn new(op_type: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            op_type: op_type.into(),
            key: key.into(),
            value: None,
            ttl: None,
            params: HashMap::new(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_value(mut self, value: impl Into<Bytes>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn with_params(mut self, params: HashMap<String, ParamValue>) -> Self {
        self.params.extend(params);
        self
    }

    pub fn with_metadata(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(name.into(), value.into());
        self
    }

    /// Labels the operation as a read or a write for the metrics pipeline.
    pub fn with_op_kind(self, is_read: bool) -> Self {
        let kind = if is_read { OP_KIND_READ } else { OP_KIND_WRITE };
        self.with_metadata(META_OP_KIND, kind)
    }

    pub fn op_type(&self) -> &str {
        &self.op_type
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> Option<&Bytes> {
        self.value.as_ref()
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    pub fn param(&self, name: &str) -> Option<&ParamValue> {
        self.params.get(name)
    }

    pub fn params(&self) -> &HashMap<String, ParamValue> {
        &self.params
    }

    pub fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }

    pub fn is_read(&self) -> bool {
        self.metadata
            .get(META_OP_KIND)
            .is_some_and(|kind| kind == OP_KIND_READ)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_collects_fields() {
        let op = Operation::new("set", "i:42")
            .with_value(vec![0u8; 16])
            .with_ttl(Duration::from_secs(60))
            .with_param("topic", "orders")
            .with_op_kind(false);

        assert_eq!(op.op_type(), "set");
        assert_eq!(op.key(), "i:42");
        assert_eq!(op.value().map(|v| v.len()), Some(16));
        assert_eq!(op.ttl(), Some(Duration::from_secs(60)));
        assert_eq!(op.param("topic").and_then(ParamValue::as_str), Some("orders"));
        assert!(!op.is_read());
    }

    #[test]
    fn op_kind_defaults_to_write_when_unlabeled() {
        assert!(!Operation::new("get", "k").is_read());
        assert!(Operation::new("get", "k").with_op_kind(true).is_read());
    }
}
