//! Object <-> [`Value`] mapping.

use std::collections::BTreeMap;
use std::rc::Rc;

use chrono::{Offset, Utc};

use super::{Custom, DictItem, Duration, StructValue, Value};
use crate::script::object::{Dict, Object, Record};

const MAX_DEPTH: usize = 256;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CodecError {
    #[error("cannot encode value of type '{0}'")]
    Unsupported(String),
    #[error("custom value belongs to executor '{found}', not '{expected}'")]
    ForeignExecutor { expected: String, found: String },
    #[error("invalid custom payload: {0}")]
    InvalidPayload(String),
    #[error("duration out of range: {seconds}s {nanos}ns")]
    DurationRange { seconds: i64, nanos: i32 },
    #[error("value nested deeper than {MAX_DEPTH} levels")]
    TooDeep,
}

/// Fallback for objects the closed union has no case for.
pub trait Extension {
    fn wrap_unhandled(&self, obj: &Object) -> Result<Value, CodecError>;
    fn unwrap_custom(&self, custom: &Custom) -> Result<Object, CodecError>;
}

/// Extension that refuses everything it is asked to handle.
pub struct Strict;

impl Extension for Strict {
    fn wrap_unhandled(&self, obj: &Object) -> Result<Value, CodecError> {
        Err(CodecError::Unsupported(obj.type_name()))
    }

    fn unwrap_custom(&self, custom: &Custom) -> Result<Object, CodecError> {
        Err(CodecError::ForeignExecutor {
            expected: String::new(),
            found: custom.executor_id.clone(),
        })
    }
}

pub fn wrap(obj: &Object, ext: &dyn Extension) -> Result<Value, CodecError> {
    wrap_at(obj, ext, 0)
}

pub fn unwrap(value: &Value, ext: &dyn Extension) -> Result<Object, CodecError> {
    unwrap_at(value, ext, 0)
}

fn wrap_all(items: &[Object], ext: &dyn Extension, depth: usize) -> Result<Vec<Value>, CodecError> {
    items.iter().map(|item| wrap_at(item, ext, depth + 1)).collect()
}

fn wrap_fields(
    type_name: &str,
    fields: &BTreeMap<String, Object>,
    ext: &dyn Extension,
    depth: usize,
) -> Result<Value, CodecError> {
    let mut wrapped = BTreeMap::new();
    for (name, field) in fields {
        wrapped.insert(name.clone(), wrap_at(field, ext, depth + 1)?);
    }
    Ok(Value::Struct(StructValue {
        ctor: Box::new(Value::String(type_name.to_string())),
        fields: wrapped,
    }))
}

fn wrap_at(obj: &Object, ext: &dyn Extension, depth: usize) -> Result<Value, CodecError> {
    if depth > MAX_DEPTH {
        return Err(CodecError::TooDeep);
    }
    let value = match obj {
        Object::None => Value::Nothing,
        // Booleans have their own variant and never fall through to Integer.
        Object::Bool(b) => Value::Boolean(*b),
        Object::Int(n) => Value::Integer(*n),
        Object::Float(x) => Value::Float(*x),
        Object::Str(s) => Value::String(s.to_string()),
        Object::Bytes(b) => Value::Bytes(b.to_vec()),
        Object::List(items) => Value::List(wrap_all(&items.borrow(), ext, depth)?),
        Object::Tuple(items) => Value::List(wrap_all(items, ext, depth)?),
        Object::Set(items) => Value::Set(wrap_all(&items.borrow(), ext, depth)?),
        Object::Dict(dict) => {
            let mut items = Vec::with_capacity(dict.borrow().len());
            for (k, v) in dict.borrow().iter() {
                items.push(DictItem {
                    k: wrap_at(k, ext, depth + 1)?,
                    v: wrap_at(v, ext, depth + 1)?,
                });
            }
            Value::Dict(items)
        }
        Object::DateTime(t) => Value::Time(t.with_timezone(&Utc)),
        Object::TimeDelta(d) => Value::Duration(Duration::from_time_delta(*d)),
        Object::Instance(instance) => {
            wrap_fields(&instance.class.name, &instance.fields.borrow(), ext, depth)?
        }
        Object::Record(record) => wrap_fields(&record.type_name, &record.fields, ext, depth)?,
        Object::Exception(err) => {
            let mut fields = BTreeMap::new();
            fields.insert("message".to_string(), Object::str(&err.message));
            wrap_fields(err.kind.name(), &fields, ext, depth)?
        }
        Object::Function(_)
        | Object::Native(_)
        | Object::BoundMethod(_)
        | Object::Class(_)
        | Object::Module(_) => ext.wrap_unhandled(obj)?,
    };
    Ok(value)
}

fn unwrap_all(items: &[Value], ext: &dyn Extension, depth: usize) -> Result<Vec<Object>, CodecError> {
    items.iter().map(|item| unwrap_at(item, ext, depth + 1)).collect()
}

fn unwrap_at(value: &Value, ext: &dyn Extension, depth: usize) -> Result<Object, CodecError> {
    if depth > MAX_DEPTH {
        return Err(CodecError::TooDeep);
    }
    let obj = match value {
        Value::Nothing => Object::None,
        Value::Boolean(b) => Object::Bool(*b),
        Value::Integer(n) => Object::Int(*n),
        Value::Float(x) => Object::Float(*x),
        Value::String(s) => Object::str(s),
        Value::Bytes(b) => Object::bytes(b),
        Value::List(items) => Object::list(unwrap_all(items, ext, depth)?),
        Value::Set(items) => Object::set(unwrap_all(items, ext, depth)?),
        Value::Dict(items) => {
            let mut dict = Dict::new();
            for item in items {
                dict.insert(
                    unwrap_at(&item.k, ext, depth + 1)?,
                    unwrap_at(&item.v, ext, depth + 1)?,
                );
            }
            Object::dict(dict)
        }
        Value::Struct(s) => {
            let type_name = match s.ctor.as_ref() {
                Value::String(name) => name.clone(),
                other => other.to_string(),
            };
            let mut fields = BTreeMap::new();
            for (name, field) in &s.fields {
                fields.insert(name.clone(), unwrap_at(field, ext, depth + 1)?);
            }
            Object::Record(Rc::new(Record { type_name, fields }))
        }
        Value::Time(t) => Object::DateTime(t.with_timezone(&Utc.fix())),
        Value::Duration(d) => Object::TimeDelta(d.to_time_delta().ok_or(
            CodecError::DurationRange {
                seconds: d.seconds,
                nanos: d.nanos,
            },
        )?),
        Value::Custom(custom) => ext.unwrap_custom(custom)?,
    };
    Ok(obj)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::interp::{Interpreter, StdHost};
    use crate::script::parser::parse_module;
    use chrono::{FixedOffset, TimeDelta, TimeZone};
    use proptest::prelude::*;

    fn roundtrip(obj: &Object) -> Object {
        unwrap(&wrap(obj, &Strict).unwrap(), &Strict).unwrap()
    }

    #[test]
    fn scalars_and_containers_roundtrip() {
        let mut dict = Dict::new();
        dict.insert(Object::from("k"), Object::list(vec![Object::Int(1)]));
        let samples = vec![
            Object::None,
            Object::Bool(true),
            Object::Int(-3),
            Object::Float(2.5),
            Object::from("text"),
            Object::bytes(b"\x00\xff"),
            Object::list(vec![Object::Int(1), Object::from("a")]),
            Object::set(vec![Object::Int(1), Object::Int(2)]),
            Object::dict(dict),
            Object::TimeDelta(TimeDelta::milliseconds(1500)),
        ];
        for sample in samples {
            assert_eq!(roundtrip(&sample), sample);
        }
    }

    #[test]
    fn booleans_are_not_integers() {
        assert_eq!(wrap(&Object::Bool(true), &Strict).unwrap(), Value::Boolean(true));
        assert_eq!(wrap(&Object::Int(1), &Strict).unwrap(), Value::Integer(1));
    }

    #[test]
    fn tuples_come_back_as_lists() {
        let tuple = Object::tuple(vec![Object::Int(1), Object::Int(2)]);
        assert_eq!(
            roundtrip(&tuple),
            Object::list(vec![Object::Int(1), Object::Int(2)])
        );
    }

    #[test]
    fn times_normalize_to_utc() {
        let offset = FixedOffset::east_opt(2 * 3600).unwrap();
        let local = offset.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let Value::Time(t) = wrap(&Object::DateTime(local), &Strict).unwrap() else {
            panic!("expected time");
        };
        assert_eq!(t.to_rfc3339(), "2024-05-01T10:00:00+00:00");
        assert_eq!(roundtrip(&Object::DateTime(local)), Object::DateTime(local));
    }

    #[test]
    fn instances_become_records_with_same_fields() {
        let source = "class Order:\n    id = 0\n    items = []\n\norder = Order(7, ['a'])\n";
        let module = parse_module(source, "wf", "wf.flow").unwrap();
        let mut interp = Interpreter::new(Rc::new(StdHost::new()));
        let module = interp.exec_module(&module, source).unwrap();
        let order = module.get("order").unwrap();

        let value = wrap(&order, &Strict).unwrap();
        let Value::Struct(s) = &value else {
            panic!("expected struct");
        };
        assert_eq!(*s.ctor, Value::String("Order".into()));

        let Object::Record(record) = unwrap(&value, &Strict).unwrap() else {
            panic!("expected record");
        };
        assert_eq!(record.type_name, "Order");
        assert_eq!(record.fields.get("id"), Some(&Object::Int(7)));
        assert_eq!(
            record.fields.get("items"),
            Some(&Object::list(vec![Object::from("a")]))
        );
    }

    #[test]
    fn functions_need_an_extension() {
        let source = "def f():\n    pass\n";
        let module = parse_module(source, "wf", "wf.flow").unwrap();
        let mut interp = Interpreter::new(Rc::new(StdHost::new()));
        let module = interp.exec_module(&module, source).unwrap();
        let err = wrap(&module.get("f").unwrap(), &Strict).unwrap_err();
        assert_eq!(err, CodecError::Unsupported("function".into()));
    }

    #[test]
    fn self_referencing_lists_hit_the_depth_limit() {
        let list = Object::list(Vec::new());
        if let Object::List(items) = &list {
            items.borrow_mut().push(list.clone());
        }
        assert_eq!(wrap(&list, &Strict).unwrap_err(), CodecError::TooDeep);
        // Break the cycle so the test does not leak.
        if let Object::List(items) = &list {
            items.borrow_mut().clear();
        }
    }

    fn leaf() -> impl Strategy<Value = Object> {
        prop_oneof![
            Just(Object::None),
            any::<bool>().prop_map(Object::Bool),
            any::<i64>().prop_map(Object::Int),
            (-1e12f64..1e12).prop_map(Object::Float),
            ".{0,12}".prop_map(Object::from),
            proptest::collection::vec(any::<u8>(), 0..16).prop_map(|b| Object::bytes(&b)),
            (-10_000_000i64..10_000_000).prop_map(|ms| Object::TimeDelta(TimeDelta::milliseconds(ms))),
        ]
    }

    fn tree() -> impl Strategy<Value = Object> {
        leaf().prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                proptest::collection::vec(inner.clone(), 0..4).prop_map(Object::list),
                proptest::collection::vec((".{0,6}", inner), 0..4).prop_map(|entries| {
                    Object::dict(
                        entries
                            .into_iter()
                            .map(|(k, v)| (Object::from(k), v))
                            .collect(),
                    )
                }),
            ]
        })
    }

    proptest! {
        #[test]
        fn unwrap_inverts_wrap(obj in tree()) {
            prop_assert_eq!(roundtrip(&obj), obj);
        }

        #[test]
        fn wire_json_preserves_values(obj in tree()) {
            let value = wrap(&obj, &Strict).unwrap();
            let text = serde_json::to_string(&value).unwrap();
            let back: Value = serde_json::from_str(&text).unwrap();
            prop_assert_eq!(back, value);
        }
    }
}
