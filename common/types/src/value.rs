use std::collections::HashMap;
use std::time::Duration;

/// Tagged union for the values crossing the factory/adapter/metrics
/// boundaries. Adapters reject unexpected variants at their boundary instead
/// of panicking on a bad downcast.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Duration(Duration),
    Bytes(Vec<u8>),
    List(Vec<ParamValue>),
    Map(HashMap<String, ParamValue>),
}

impl ParamValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ParamValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Float(v) => Some(*v),
            ParamValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            ParamValue::Duration(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            ParamValue::Bytes(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[ParamValue]> {
        match self {
            ParamValue::List(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&HashMap<String, ParamValue>> {
        match self {
            ParamValue::Map(v) => Some(v),
            _ => None,
        }
    }

    /// Conversion used when a JSON body or template lands in a param map.
    /// JSON numbers become `Int` when they fit, `Float` otherwise.
    pub fn from_json(value: &serde_json::Value) -> ParamValue {
        match value {
            serde_json::Value::Null => ParamValue::Str(String::new()),
            serde_json::Value::Bool(b) => ParamValue::Bool(*b),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(ParamValue::Int)
                .unwrap_or_else(|| ParamValue::Float(n.as_f64().unwrap_or(0.0))),
            serde_json::Value::String(s) => ParamValue::Str(s.clone()),
            serde_json::Value::Array(items) => {
                ParamValue::List(items.iter().map(ParamValue::from_json).collect())
            }
            serde_json::Value::Object(map) => ParamValue::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), ParamValue::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Inverse of [`ParamValue::from_json`] for the variants JSON can carry.
    /// Durations serialize as integral milliseconds, bytes as lossy UTF-8.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            ParamValue::Int(v) => serde_json::Value::from(*v),
            ParamValue::Float(v) => serde_json::Value::from(*v),
            ParamValue::Bool(v) => serde_json::Value::from(*v),
            ParamValue::Str(v) => serde_json::Value::from(v.clone()),
            ParamValue::Duration(v) => serde_json::Value::from(v.as_millis() as u64),
            ParamValue::Bytes(v) => {
                serde_json::Value::from(String::from_utf8_lossy(v).into_owned())
            }
            ParamValue::List(items) => {
                serde_json::Value::Array(items.iter().map(ParamValue::to_json).collect())
            }
            ParamValue::Map(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<u64> for ParamValue {
    fn from(v: u64) -> Self {
        ParamValue::Int(v as i64)
    }
}

impl From<i32> for ParamValue {
    fn from(v: i32) -> Self {
        ParamValue::Int(i64::from(v))
    }
}

impl From<usize> for ParamValue {
    fn from(v: usize) -> Self {
        ParamValue::Int(v as i64)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Str(v.to_owned())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::Str(v)
    }
}

impl From<Duration> for ParamValue {
    fn from(v: Duration) -> Self {
        ParamValue::Duration(v)
    }
}

impl From<Vec<u8>> for ParamValue {
    fn from(v: Vec<u8>) -> Self {
        ParamValue::Bytes(v)
    }
}
