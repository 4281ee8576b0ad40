//! Wire value model shared by the harness and the worker.
//!
//! [`Value`] is the closed union every non-scalar payload is encoded as.
//! [`codec`] maps interpreter objects to and from it, [`opaque`] carries
//! objects the union cannot represent, and [`json`] converts plain JSON.

pub mod codec;
pub mod json;
pub mod opaque;

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

pub use codec::{unwrap, wrap, CodecError, Extension, Strict};
pub use opaque::OpaqueCodec;

/// Tagged wire value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    Nothing,
    Boolean(bool),
    Integer(i64),
    Float(#[serde(with = "wire_float")] f64),
    String(String),
    Bytes(#[serde(with = "b64")] Vec<u8>),
    List(Vec<Value>),
    Set(Vec<Value>),
    Dict(Vec<DictItem>),
    Struct(StructValue),
    Time(DateTime<Utc>),
    Duration(Duration),
    Custom(Custom),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DictItem {
    pub k: Value,
    pub v: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructValue {
    pub ctor: Box<Value>,
    pub fields: BTreeMap<String, Value>,
}

/// Fixed-point duration: whole seconds plus a nanosecond remainder carrying
/// the same sign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Duration {
    pub seconds: i64,
    pub nanos: i32,
}

impl Duration {
    pub fn from_time_delta(delta: TimeDelta) -> Self {
        Self {
            seconds: delta.num_seconds(),
            nanos: delta.subsec_nanos(),
        }
    }

    pub fn to_time_delta(self) -> Option<TimeDelta> {
        let secs = TimeDelta::try_seconds(self.seconds)?;
        secs.checked_add(&TimeDelta::nanoseconds(i64::from(self.nanos)))
    }

    pub fn from_std(duration: std::time::Duration) -> Self {
        Self {
            seconds: duration.as_secs() as i64,
            nanos: duration.subsec_nanos() as i32,
        }
    }

    /// Negative durations clamp to zero.
    pub fn to_std(self) -> std::time::Duration {
        if self.seconds < 0 || (self.seconds == 0 && self.nanos < 0) {
            return std::time::Duration::ZERO;
        }
        std::time::Duration::new(self.seconds as u64, self.nanos.max(0) as u32)
    }
}

/// Value only the executor that produced it can turn back into an object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Custom {
    pub executor_id: String,
    #[serde(with = "b64")]
    pub data: Vec<u8>,
    /// Best-effort plain rendering for the orchestrator's benefit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Box<Value>>,
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nothing => "nothing",
            Value::Boolean(_) => "boolean",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::List(_) => "list",
            Value::Set(_) => "set",
            Value::Dict(_) => "dict",
            Value::Struct(_) => "struct",
            Value::Time(_) => "time",
            Value::Duration(_) => "duration",
            Value::Custom(_) => "custom",
        }
    }

    pub fn is_nothing(&self) -> bool {
        matches!(self, Value::Nothing)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Build a dict from string keys, keeping the given order.
    pub fn dict<K, I>(items: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Dict(
            items
                .into_iter()
                .map(|(k, v)| DictItem {
                    k: Value::String(k.into()),
                    v,
                })
                .collect(),
        )
    }

    /// Look up a dict entry by string key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Dict(items) => items
                .iter()
                .find(|item| item.k.as_str() == Some(key))
                .map(|item| &item.v),
            Value::Struct(s) => s.fields.get(key),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nothing, Value::Nothing) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Set(a), Value::Set(b)) => same_members(a, b),
            (Value::Dict(a), Value::Dict(b)) => same_members(a, b),
            (Value::Struct(a), Value::Struct(b)) => a == b,
            (Value::Time(a), Value::Time(b)) => a == b,
            (Value::Duration(a), Value::Duration(b)) => a == b,
            (Value::Custom(a), Value::Custom(b)) => a == b,
            _ => false,
        }
    }
}

/// Order-insensitive comparison for sets and dicts.
fn same_members<T: PartialEq>(a: &[T], b: &[T]) -> bool {
    a.len() == b.len() && a.iter().all(|x| b.contains(x)) && b.iter().all(|y| a.contains(y))
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nothing => write!(f, "nothing"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Integer(n) => write!(f, "{n}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::String(s) => write!(f, "{s:?}"),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Value::List(items) | Value::Set(items) => {
                let (open, close) = if matches!(self, Value::List(_)) {
                    ("[", "]")
                } else {
                    ("{", "}")
                };
                write!(f, "{open}")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "{close}")
            }
            Value::Dict(items) => {
                write!(f, "{{")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", item.k, item.v)?;
                }
                write!(f, "}}")
            }
            Value::Struct(s) => {
                write!(f, "{}(", s.ctor)?;
                for (i, (name, value)) in s.fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{name}={value}")?;
                }
                write!(f, ")")
            }
            Value::Time(t) => write!(f, "{}", t.to_rfc3339()),
            Value::Duration(d) => write!(f, "{}.{:09}s", d.seconds, d.nanos.unsigned_abs()),
            Value::Custom(c) => write!(f, "<custom from {}>", c.executor_id),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Integer(i64::from(n))
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

/// Base64 (standard alphabet) serde adapter for binary payload fields.
pub mod b64 {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(raw.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// Floats as JSON numbers, with NaN and the infinities spelled `"nan"`,
/// `"inf"` and `"-inf"` since JSON has no literal for them.
pub mod wire_float {
    use std::fmt;

    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(x: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if x.is_nan() {
            serializer.serialize_str("nan")
        } else if x.is_infinite() {
            serializer.serialize_str(if *x > 0.0 { "inf" } else { "-inf" })
        } else {
            serializer.serialize_f64(*x)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        deserializer.deserialize_any(FloatVisitor)
    }

    struct FloatVisitor;

    impl Visitor<'_> for FloatVisitor {
        type Value = f64;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a number or one of \"nan\", \"inf\", \"-inf\"")
        }

        fn visit_f64<E: de::Error>(self, x: f64) -> Result<f64, E> {
            Ok(x)
        }

        fn visit_i64<E: de::Error>(self, n: i64) -> Result<f64, E> {
            Ok(n as f64)
        }

        fn visit_u64<E: de::Error>(self, n: u64) -> Result<f64, E> {
            Ok(n as f64)
        }

        fn visit_str<E: de::Error>(self, s: &str) -> Result<f64, E> {
            match s {
                "nan" => Ok(f64::NAN),
                "inf" => Ok(f64::INFINITY),
                "-inf" => Ok(f64::NEG_INFINITY),
                other => Err(E::invalid_value(de::Unexpected::Str(other), &self)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_finite_floats_cross_the_wire() {
        let nan = serde_json::to_string(&Value::Float(f64::NAN)).unwrap();
        assert_eq!(nan, r#"{"float":"nan"}"#);
        let back: Value = serde_json::from_str(&nan).unwrap();
        assert!(matches!(back, Value::Float(x) if x.is_nan()));

        for x in [f64::INFINITY, f64::NEG_INFINITY, -948310382962.2949, 0.1] {
            let text = serde_json::to_string(&Value::Float(x)).unwrap();
            let back: Value = serde_json::from_str(&text).unwrap();
            assert_eq!(back, Value::Float(x), "{text}");
        }
        assert!(serde_json::from_str::<Value>(r#"{"float":"lots"}"#).is_err());
    }

    #[test]
    fn dict_equality_ignores_order() {
        let a = Value::dict([("a", Value::from(1)), ("b", Value::from(2))]);
        let b = Value::dict([("b", Value::from(2)), ("a", Value::from(1))]);
        assert_eq!(a, b);
    }

    #[test]
    fn list_equality_is_ordered() {
        let a = Value::List(vec![1.into(), 2.into()]);
        let b = Value::List(vec![2.into(), 1.into()]);
        assert_ne!(a, b);
    }

    #[test]
    fn bytes_serialize_as_base64() {
        let json = serde_json::to_string(&Value::Bytes(b"hi".to_vec())).unwrap();
        assert_eq!(json, r#"{"bytes":"aGk="}"#);
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Value::Bytes(b"hi".to_vec()));
    }

    #[test]
    fn nothing_serializes_as_tag() {
        assert_eq!(serde_json::to_string(&Value::Nothing).unwrap(), r#""nothing""#);
    }

    #[test]
    fn duration_keeps_sign_in_nanos() {
        let d = Duration::from_time_delta(TimeDelta::milliseconds(-1500));
        assert_eq!(d.seconds, -1);
        assert_eq!(d.nanos, -500_000_000);
        assert_eq!(d.to_time_delta(), Some(TimeDelta::milliseconds(-1500)));
        assert_eq!(d.to_std(), std::time::Duration::ZERO);
    }
}
