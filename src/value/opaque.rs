//! Executor-local encoding for objects the wire union cannot represent.
//!
//! The object graph is written as a JSON snapshot that keeps exact types
//! (tuples, class instances, bound methods). Leaves that cannot be
//! serialized at all (functions, classes, modules) are parked in a handle
//! table owned by this codec, so only the executor that produced a
//! [`Custom`] value can turn it back into an object.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use super::codec::{self, CodecError, Extension};
use super::{b64, wire_float, Custom, Duration, Value};
use crate::cache::{reference_digest, LargeObjectCache};
use crate::script::object::{BoundMethod, Dict, Instance, Object, Record};

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "t", content = "v", rename_all = "snake_case")]
enum Snapshot {
    None,
    Bool(bool),
    Int(i64),
    Float(#[serde(with = "wire_float")] f64),
    Str(String),
    Bytes(#[serde(with = "b64")] Vec<u8>),
    List(Vec<Snapshot>),
    Tuple(Vec<Snapshot>),
    Set(Vec<Snapshot>),
    Dict(Vec<(Snapshot, Snapshot)>),
    DateTime(DateTime<FixedOffset>),
    TimeDelta(Duration),
    Instance {
        class: usize,
        fields: BTreeMap<String, Snapshot>,
    },
    Record {
        type_name: String,
        fields: BTreeMap<String, Snapshot>,
    },
    Bound {
        receiver: Box<Snapshot>,
        func: Box<Snapshot>,
    },
    Handle(usize),
}

pub struct OpaqueCodec {
    executor_id: String,
    handles: RefCell<Vec<Object>>,
    cache: Option<Arc<LargeObjectCache>>,
}

impl OpaqueCodec {
    pub fn new(executor_id: impl Into<String>) -> Self {
        Self {
            executor_id: executor_id.into(),
            handles: RefCell::new(Vec::new()),
            cache: None,
        }
    }

    /// Externalize snapshots larger than the cache threshold.
    pub fn with_cache(mut self, cache: Arc<LargeObjectCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn executor_id(&self) -> &str {
        &self.executor_id
    }

    fn handle(&self, obj: &Object) -> usize {
        let mut handles = self.handles.borrow_mut();
        if let Some(index) = handles.iter().position(|h| h.identical(obj)) {
            return index;
        }
        handles.push(obj.clone());
        handles.len() - 1
    }

    fn resolve_handle(&self, index: usize) -> Result<Object, CodecError> {
        self.handles
            .borrow()
            .get(index)
            .cloned()
            .ok_or_else(|| CodecError::InvalidPayload(format!("unknown handle {index}")))
    }

    fn snapshot(&self, obj: &Object, depth: usize) -> Result<Snapshot, CodecError> {
        if depth > 256 {
            return Err(CodecError::TooDeep);
        }
        let all = |items: &[Object]| -> Result<Vec<Snapshot>, CodecError> {
            items.iter().map(|i| self.snapshot(i, depth + 1)).collect()
        };
        let fields = |fields: &BTreeMap<String, Object>| -> Result<BTreeMap<String, Snapshot>, CodecError> {
            fields
                .iter()
                .map(|(k, v)| Ok((k.clone(), self.snapshot(v, depth + 1)?)))
                .collect()
        };
        Ok(match obj {
            Object::None => Snapshot::None,
            Object::Bool(b) => Snapshot::Bool(*b),
            Object::Int(n) => Snapshot::Int(*n),
            Object::Float(x) => Snapshot::Float(*x),
            Object::Str(s) => Snapshot::Str(s.to_string()),
            Object::Bytes(b) => Snapshot::Bytes(b.to_vec()),
            Object::List(items) => Snapshot::List(all(&items.borrow())?),
            Object::Tuple(items) => Snapshot::Tuple(all(items)?),
            Object::Set(items) => Snapshot::Set(all(&items.borrow())?),
            Object::Dict(dict) => {
                let mut entries = Vec::new();
                for (k, v) in dict.borrow().iter() {
                    entries.push((self.snapshot(k, depth + 1)?, self.snapshot(v, depth + 1)?));
                }
                Snapshot::Dict(entries)
            }
            Object::DateTime(t) => Snapshot::DateTime(*t),
            Object::TimeDelta(d) => Snapshot::TimeDelta(Duration::from_time_delta(*d)),
            Object::Instance(instance) => Snapshot::Instance {
                class: self.handle(&Object::Class(instance.class.clone())),
                fields: fields(&instance.fields.borrow())?,
            },
            Object::Record(record) => Snapshot::Record {
                type_name: record.type_name.clone(),
                fields: fields(&record.fields)?,
            },
            Object::BoundMethod(method) => Snapshot::Bound {
                receiver: Box::new(self.snapshot(&method.receiver, depth + 1)?),
                func: Box::new(self.snapshot(&method.func, depth + 1)?),
            },
            Object::Function(_)
            | Object::Native(_)
            | Object::Class(_)
            | Object::Module(_)
            | Object::Exception(_) => Snapshot::Handle(self.handle(obj)),
        })
    }

    fn restore(&self, snapshot: Snapshot) -> Result<Object, CodecError> {
        let all = |items: Vec<Snapshot>| -> Result<Vec<Object>, CodecError> {
            items.into_iter().map(|i| self.restore(i)).collect()
        };
        let fields = |fields: BTreeMap<String, Snapshot>| -> Result<BTreeMap<String, Object>, CodecError> {
            fields
                .into_iter()
                .map(|(k, v)| Ok((k, self.restore(v)?)))
                .collect()
        };
        Ok(match snapshot {
            Snapshot::None => Object::None,
            Snapshot::Bool(b) => Object::Bool(b),
            Snapshot::Int(n) => Object::Int(n),
            Snapshot::Float(x) => Object::Float(x),
            Snapshot::Str(s) => Object::from(s),
            Snapshot::Bytes(b) => Object::bytes(&b),
            Snapshot::List(items) => Object::list(all(items)?),
            Snapshot::Tuple(items) => Object::tuple(all(items)?),
            Snapshot::Set(items) => Object::set(all(items)?),
            Snapshot::Dict(entries) => {
                let mut dict = Dict::new();
                for (k, v) in entries {
                    dict.insert(self.restore(k)?, self.restore(v)?);
                }
                Object::dict(dict)
            }
            Snapshot::DateTime(t) => Object::DateTime(t),
            Snapshot::TimeDelta(d) => Object::TimeDelta(d.to_time_delta().ok_or(
                CodecError::DurationRange {
                    seconds: d.seconds,
                    nanos: d.nanos,
                },
            )?),
            Snapshot::Instance { class, fields: f } => match self.resolve_handle(class)? {
                Object::Class(class) => Object::Instance(Rc::new(Instance {
                    class,
                    fields: RefCell::new(fields(f)?),
                })),
                other => {
                    return Err(CodecError::InvalidPayload(format!(
                        "handle {class} is a {}, not a class",
                        other.type_name()
                    )))
                }
            },
            Snapshot::Record { type_name, fields: f } => Object::Record(Rc::new(Record {
                type_name,
                fields: fields(f)?,
            })),
            Snapshot::Bound { receiver, func } => Object::BoundMethod(Rc::new(BoundMethod {
                receiver: self.restore(*receiver)?,
                func: self.restore(*func)?,
            })),
            Snapshot::Handle(index) => self.resolve_handle(index)?,
        })
    }

    /// Best-effort plain rendering carried alongside the opaque payload.
    fn preview(&self, obj: &Object) -> Value {
        codec::wrap(obj, &codec::Strict).unwrap_or_else(|_| Value::String(obj.repr()))
    }
}

impl Extension for OpaqueCodec {
    fn wrap_unhandled(&self, obj: &Object) -> Result<Value, CodecError> {
        let snapshot = self.snapshot(obj, 0)?;
        let mut data = serde_json::to_vec(&snapshot)
            .map_err(|e| CodecError::InvalidPayload(e.to_string()))?;
        if let Some(cache) = &self.cache {
            data = cache
                .externalize(data)
                .map_err(|e| CodecError::InvalidPayload(e.to_string()))?;
        }
        Ok(Value::Custom(Custom {
            executor_id: self.executor_id.clone(),
            data,
            value: Some(Box::new(self.preview(obj))),
        }))
    }

    fn unwrap_custom(&self, custom: &Custom) -> Result<Object, CodecError> {
        if custom.executor_id != self.executor_id {
            return Err(CodecError::ForeignExecutor {
                expected: self.executor_id.clone(),
                found: custom.executor_id.clone(),
            });
        }
        let data = match (reference_digest(&custom.data), &self.cache) {
            (Some(digest), Some(cache)) => cache
                .get(digest)
                .map_err(|e| CodecError::InvalidPayload(e.to_string()))?,
            (Some(digest), None) => {
                return Err(CodecError::InvalidPayload(format!(
                    "payload {digest} is cached but no cache is configured"
                )))
            }
            (None, _) => custom.data.clone(),
        };
        let snapshot: Snapshot = serde_json::from_slice(&data)
            .map_err(|e| CodecError::InvalidPayload(e.to_string()))?;
        self.restore(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::interp::{Interpreter, StdHost};
    use crate::script::parser::parse_module;
    use crate::value::{unwrap, wrap};
    use tempfile::TempDir;

    fn load(source: &str) -> Rc<crate::script::object::ModuleObject> {
        let module = parse_module(source, "wf", "wf.flow").unwrap();
        let mut interp = Interpreter::new(Rc::new(StdHost::new()));
        interp.exec_module(&module, source).unwrap()
    }

    #[test]
    fn functions_roundtrip_within_the_same_executor() {
        let module = load("def f(x):\n    return x\n");
        let f = module.get("f").unwrap();
        let codec = OpaqueCodec::new("exec-1");

        let value = wrap(&f, &codec).unwrap();
        let Value::Custom(custom) = &value else {
            panic!("expected custom");
        };
        assert_eq!(custom.executor_id, "exec-1");
        assert!(matches!(custom.value.as_deref(), Some(Value::String(s)) if s.contains("function f")));

        let back = unwrap(&value, &codec).unwrap();
        assert!(back.identical(&f));
    }

    #[test]
    fn other_executors_cannot_unwrap() {
        let module = load("def f(x):\n    return x\n");
        let value = wrap(&module.get("f").unwrap(), &OpaqueCodec::new("exec-1")).unwrap();
        let err = unwrap(&value, &OpaqueCodec::new("exec-2")).unwrap_err();
        assert!(matches!(err, CodecError::ForeignExecutor { .. }));
    }

    #[test]
    fn bound_methods_keep_their_receiver_class() {
        let module = load("\
class Counter:
    n = 1

    def bump(self):
        self.n += 1
        return self.n

method = Counter(5).bump
");
        let method = module.get("method").unwrap();
        let codec = OpaqueCodec::new("exec-1");
        let back = unwrap(&wrap(&method, &codec).unwrap(), &codec).unwrap();
        let Object::BoundMethod(bound) = back else {
            panic!("expected bound method");
        };
        let Object::Instance(instance) = &bound.receiver else {
            panic!("receiver should stay an instance");
        };
        assert_eq!(instance.class.name, "Counter");
        assert_eq!(instance.fields.borrow().get("n"), Some(&Object::Int(5)));
    }

    #[test]
    fn large_snapshots_go_through_the_cache() {
        let module = load("\
class Blob:
    data = ''

    def size(self):
        return len(self.data)

method = Blob('x' * 4096).size
");
        let dir = TempDir::new().unwrap();
        let cache = Arc::new(LargeObjectCache::open(dir.path(), 256).unwrap());
        let codec = OpaqueCodec::new("exec-1").with_cache(cache);

        let value = wrap(&module.get("method").unwrap(), &codec).unwrap();
        let Value::Custom(custom) = &value else {
            panic!("expected custom");
        };
        assert!(reference_digest(&custom.data).is_some());
        assert!(unwrap(&value, &codec).is_ok());
    }
}
