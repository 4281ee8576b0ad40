//! Runtime objects of the workflow language.
//!
//! Objects are single-threaded (`Rc`/`RefCell`); only wire [`Value`]s cross
//! thread boundaries.
//!
//! [`Value`]: crate::value::Value

use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write;
use std::rc::Rc;

use chrono::{DateTime, FixedOffset, TimeDelta};

use super::ast::FunctionDef;
use super::error::ScriptError;
use super::interp::Interpreter;

pub type NativeFn = fn(&mut Interpreter, Args) -> Result<Object, ScriptError>;

#[derive(Clone)]
pub enum Object {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    Bytes(Rc<[u8]>),
    List(Rc<RefCell<Vec<Object>>>),
    Tuple(Rc<[Object]>),
    Set(Rc<RefCell<Vec<Object>>>),
    Dict(Rc<RefCell<Dict>>),
    DateTime(DateTime<FixedOffset>),
    TimeDelta(TimeDelta),
    Function(Rc<Function>),
    Native(Rc<NativeFunction>),
    BoundMethod(Rc<BoundMethod>),
    Class(Rc<Class>),
    Instance(Rc<Instance>),
    Record(Rc<Record>),
    Module(Rc<ModuleObject>),
    Exception(Rc<ScriptError>),
}

/// Variable scope. Function scopes chain to the scope they were defined in.
#[derive(Default)]
pub struct Env {
    pub vars: RefCell<HashMap<String, Object>>,
    pub parent: Option<Rc<Env>>,
}

impl Env {
    pub fn new(parent: Option<Rc<Env>>) -> Rc<Self> {
        Rc::new(Self {
            vars: RefCell::new(HashMap::new()),
            parent,
        })
    }

    pub fn get(&self, name: &str) -> Option<Object> {
        if let Some(value) = self.vars.borrow().get(name) {
            return Some(value.clone());
        }
        self.parent.as_ref().and_then(|p| p.get(name))
    }

    pub fn set(&self, name: impl Into<String>, value: Object) {
        self.vars.borrow_mut().insert(name.into(), value);
    }
}

pub struct Function {
    pub name: String,
    pub qualname: String,
    pub module: Rc<str>,
    pub file: Rc<str>,
    pub line: u32,
    pub def: Rc<FunctionDef>,
    pub defaults: Vec<Option<Object>>,
    pub globals: Rc<Env>,
    pub closure: Option<Rc<Env>>,
    /// Set by the `activity` decorator.
    pub activity: Cell<bool>,
}

pub struct NativeFunction {
    pub name: String,
    pub module: String,
    pub func: NativeFn,
}

impl NativeFunction {
    pub fn new(module: impl Into<String>, name: impl Into<String>, func: NativeFn) -> Rc<Self> {
        Rc::new(Self {
            name: name.into(),
            module: module.into(),
            func,
        })
    }
}

/// A callable bound to its receiver. For native methods the receiver is
/// passed as the first positional argument.
pub struct BoundMethod {
    pub receiver: Object,
    pub func: Object,
}

pub struct Class {
    pub name: String,
    pub module: Rc<str>,
    /// Field defaults in declaration order.
    pub fields: Vec<(String, Object)>,
    pub methods: HashMap<String, Object>,
    pub activity: Cell<bool>,
}

impl Class {
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.module, self.name)
    }
}

pub struct Instance {
    pub class: Rc<Class>,
    pub fields: RefCell<BTreeMap<String, Object>>,
}

/// Generic named record produced when a struct value is decoded.
#[derive(Clone)]
pub struct Record {
    pub type_name: String,
    pub fields: BTreeMap<String, Object>,
}

pub struct ModuleObject {
    pub name: String,
    pub file: String,
    pub globals: Rc<Env>,
}

impl ModuleObject {
    pub fn new(name: impl Into<String>, file: impl Into<String>) -> Rc<Self> {
        Rc::new(Self {
            name: name.into(),
            file: file.into(),
            globals: Env::new(None),
        })
    }

    pub fn get(&self, name: &str) -> Option<Object> {
        self.globals.get(name)
    }

    /// Names of the functions the module defines itself.
    pub fn exported_functions(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .globals
            .vars
            .borrow()
            .iter()
            .filter_map(|(name, value)| match value {
                Object::Function(f) if *f.module == self.name && !name.starts_with('_') => {
                    Some(name.clone())
                }
                _ => None,
            })
            .collect();
        names.sort();
        names
    }
}

/// Insertion-ordered mapping with linear lookup.
#[derive(Clone, Default)]
pub struct Dict {
    entries: Vec<(Object, Object)>,
}

impl Dict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &Object) -> Option<&Object> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn insert(&mut self, key: Object, value: Object) {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn remove(&mut self, key: &Object) -> Option<Object> {
        let pos = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(pos).1)
    }

    pub fn contains(&self, key: &Object) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Object, Object)> {
        self.entries.iter()
    }

    pub fn keys(&self) -> Vec<Object> {
        self.entries.iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl FromIterator<(Object, Object)> for Dict {
    fn from_iter<T: IntoIterator<Item = (Object, Object)>>(iter: T) -> Self {
        let mut dict = Dict::new();
        for (k, v) in iter {
            dict.insert(k, v);
        }
        dict
    }
}

/// Positional and keyword arguments of one call.
#[derive(Clone, Default)]
pub struct Args {
    pub positional: Vec<Object>,
    pub keywords: Vec<(String, Object)>,
}

impl Args {
    pub fn new(positional: Vec<Object>) -> Self {
        Self {
            positional,
            keywords: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.positional.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.keywords.is_empty()
    }

    /// Positional argument `index`, or the keyword `name`.
    pub fn get(&self, index: usize, name: &str) -> Option<&Object> {
        self.positional
            .get(index)
            .or_else(|| self.keyword(name))
    }

    pub fn keyword(&self, name: &str) -> Option<&Object> {
        self.keywords
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v)
    }

    pub fn required(&self, index: usize, name: &str, func: &str) -> Result<&Object, ScriptError> {
        self.get(index, name).ok_or_else(|| {
            ScriptError::type_error(format!("{func}() missing required argument '{name}'"))
        })
    }

    pub fn expect_max(&self, max: usize, func: &str) -> Result<(), ScriptError> {
        if self.positional.len() > max {
            return Err(ScriptError::type_error(format!(
                "{func}() takes at most {max} arguments ({} given)",
                self.positional.len()
            )));
        }
        Ok(())
    }
}

/// Identity of a callable as seen by the determinism classifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallTarget {
    /// Module the callable was defined in (`builtins` for builtin types).
    pub module: String,
    /// Dotted name within the module, `Type.method` for methods.
    pub qualname: String,
    /// Receiver type for bound methods: the bare builtin type name, or
    /// `module.Class` for user instances.
    pub receiver_type: Option<String>,
    pub activity: bool,
}

impl CallTarget {
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.module, self.qualname)
    }
}

impl Object {
    pub fn str(s: &str) -> Self {
        Object::Str(Rc::from(s))
    }

    pub fn list(items: Vec<Object>) -> Self {
        Object::List(Rc::new(RefCell::new(items)))
    }

    pub fn tuple(items: Vec<Object>) -> Self {
        Object::Tuple(Rc::from(items))
    }

    pub fn set(items: Vec<Object>) -> Self {
        let mut unique: Vec<Object> = Vec::with_capacity(items.len());
        for item in items {
            if !unique.contains(&item) {
                unique.push(item);
            }
        }
        Object::Set(Rc::new(RefCell::new(unique)))
    }

    pub fn dict(dict: Dict) -> Self {
        Object::Dict(Rc::new(RefCell::new(dict)))
    }

    pub fn bytes(data: &[u8]) -> Self {
        Object::Bytes(Rc::from(data))
    }

    pub fn type_name(&self) -> String {
        match self {
            Object::None => "NoneType".into(),
            Object::Bool(_) => "bool".into(),
            Object::Int(_) => "int".into(),
            Object::Float(_) => "float".into(),
            Object::Str(_) => "str".into(),
            Object::Bytes(_) => "bytes".into(),
            Object::List(_) => "list".into(),
            Object::Tuple(_) => "tuple".into(),
            Object::Set(_) => "set".into(),
            Object::Dict(_) => "dict".into(),
            Object::DateTime(_) => "datetime".into(),
            Object::TimeDelta(_) => "timedelta".into(),
            Object::Function(_) | Object::Native(_) => "function".into(),
            Object::BoundMethod(_) => "method".into(),
            Object::Class(_) => "type".into(),
            Object::Instance(i) => i.class.name.clone(),
            Object::Record(r) => r.type_name.clone(),
            Object::Module(_) => "module".into(),
            Object::Exception(e) => e.kind.name().into(),
        }
    }

    /// Type name used for receiver classification.
    pub fn receiver_type(&self) -> String {
        match self {
            Object::Instance(i) => i.class.qualified_name(),
            Object::Record(_) => "record".into(),
            Object::Class(c) => c.qualified_name(),
            Object::Module(m) => m.name.clone(),
            other => other.type_name(),
        }
    }

    pub fn is_callable(&self) -> bool {
        self.call_target().is_some()
    }

    pub fn call_target(&self) -> Option<CallTarget> {
        match self {
            Object::Function(f) => Some(CallTarget {
                module: f.module.to_string(),
                qualname: f.qualname.clone(),
                receiver_type: None,
                activity: f.activity.get(),
            }),
            Object::Native(n) => Some(CallTarget {
                module: n.module.clone(),
                qualname: n.name.clone(),
                receiver_type: None,
                activity: false,
            }),
            Object::Class(c) => Some(CallTarget {
                module: c.module.to_string(),
                qualname: c.name.clone(),
                receiver_type: None,
                activity: c.activity.get(),
            }),
            Object::BoundMethod(m) => {
                let mut target = m.func.call_target()?;
                target.receiver_type = Some(m.receiver.receiver_type());
                if let Object::Instance(instance) = &m.receiver {
                    target.activity |= instance.class.activity.get();
                }
                Some(target)
            }
            _ => None,
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Object::None => false,
            Object::Bool(b) => *b,
            Object::Int(n) => *n != 0,
            Object::Float(x) => *x != 0.0,
            Object::Str(s) => !s.is_empty(),
            Object::Bytes(b) => !b.is_empty(),
            Object::List(items) | Object::Set(items) => !items.borrow().is_empty(),
            Object::Tuple(items) => !items.is_empty(),
            Object::Dict(d) => !d.borrow().is_empty(),
            Object::TimeDelta(d) => !d.is_zero(),
            _ => true,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Object::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Object::Int(n) => Some(*n),
            Object::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Object::Int(n) => Some(*n as f64),
            Object::Float(x) => Some(*x),
            Object::Bool(b) => Some(f64::from(u8::from(*b))),
            _ => None,
        }
    }

    /// Same underlying allocation (`is`).
    pub fn identical(&self, other: &Object) -> bool {
        match (self, other) {
            (Object::None, Object::None) => true,
            (Object::Bool(a), Object::Bool(b)) => a == b,
            (Object::List(a), Object::List(b)) | (Object::Set(a), Object::Set(b)) => {
                Rc::ptr_eq(a, b)
            }
            (Object::Dict(a), Object::Dict(b)) => Rc::ptr_eq(a, b),
            (Object::Function(a), Object::Function(b)) => Rc::ptr_eq(a, b),
            (Object::Native(a), Object::Native(b)) => Rc::ptr_eq(a, b),
            (Object::Class(a), Object::Class(b)) => Rc::ptr_eq(a, b),
            (Object::Instance(a), Object::Instance(b)) => Rc::ptr_eq(a, b),
            (Object::Module(a), Object::Module(b)) => Rc::ptr_eq(a, b),
            (Object::Exception(a), Object::Exception(b)) => Rc::ptr_eq(a, b),
            (Object::Int(a), Object::Int(b)) => a == b,
            (Object::Str(a), Object::Str(b)) => a == b,
            _ => false,
        }
    }

    pub fn compare(&self, other: &Object) -> Option<Ordering> {
        match (self, other) {
            (Object::Str(a), Object::Str(b)) => Some(a.cmp(b)),
            (Object::Bytes(a), Object::Bytes(b)) => Some(a.cmp(b)),
            (Object::DateTime(a), Object::DateTime(b)) => Some(a.cmp(b)),
            (Object::TimeDelta(a), Object::TimeDelta(b)) => Some(a.cmp(b)),
            (Object::List(a), Object::List(b)) => compare_seq(&a.borrow(), &b.borrow()),
            (Object::Tuple(a), Object::Tuple(b)) => compare_seq(a, b),
            (Object::Int(a), Object::Int(b)) => Some(a.cmp(b)),
            (a, b) => {
                let (x, y) = (a.as_float()?, b.as_float()?);
                x.partial_cmp(&y)
            }
        }
    }

    /// `str()` rendering.
    pub fn to_display(&self) -> String {
        match self {
            Object::Str(s) => s.to_string(),
            other => other.repr(),
        }
    }

    /// `repr()` rendering.
    pub fn repr(&self) -> String {
        let mut out = String::new();
        self.write_repr(&mut out, 0);
        out
    }

    fn write_repr(&self, out: &mut String, depth: usize) {
        if depth > 64 {
            out.push_str("...");
            return;
        }
        match self {
            Object::None => out.push_str("None"),
            Object::Bool(true) => out.push_str("True"),
            Object::Bool(false) => out.push_str("False"),
            Object::Int(n) => {
                let _ = write!(out, "{n}");
            }
            Object::Float(x) => out.push_str(&format_float(*x)),
            Object::Str(s) => {
                out.push('\'');
                for ch in s.chars() {
                    match ch {
                        '\'' => out.push_str("\\'"),
                        '\\' => out.push_str("\\\\"),
                        '\n' => out.push_str("\\n"),
                        '\t' => out.push_str("\\t"),
                        c => out.push(c),
                    }
                }
                out.push('\'');
            }
            Object::Bytes(b) => {
                out.push_str("b'");
                for byte in b.iter() {
                    match byte {
                        b'\'' => out.push_str("\\'"),
                        b'\\' => out.push_str("\\\\"),
                        0x20..=0x7e => out.push(*byte as char),
                        _ => {
                            let _ = write!(out, "\\x{byte:02x}");
                        }
                    }
                }
                out.push('\'');
            }
            Object::List(items) => {
                out.push('[');
                write_items(out, &items.borrow(), depth);
                out.push(']');
            }
            Object::Tuple(items) => {
                out.push('(');
                write_items(out, items, depth);
                if items.len() == 1 {
                    out.push(',');
                }
                out.push(')');
            }
            Object::Set(items) => {
                let items = items.borrow();
                if items.is_empty() {
                    out.push_str("set()");
                } else {
                    out.push('{');
                    write_items(out, &items, depth);
                    out.push('}');
                }
            }
            Object::Dict(d) => {
                out.push('{');
                for (i, (k, v)) in d.borrow().iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    k.write_repr(out, depth + 1);
                    out.push_str(": ");
                    v.write_repr(out, depth + 1);
                }
                out.push('}');
            }
            Object::DateTime(dt) => out.push_str(&dt.to_rfc3339()),
            Object::TimeDelta(d) => out.push_str(&format_timedelta(*d)),
            Object::Function(f) => {
                let _ = write!(out, "<function {}>", f.qualname);
            }
            Object::Native(n) => {
                let _ = write!(out, "<built-in function {}>", n.name);
            }
            Object::BoundMethod(m) => {
                let name = match &m.func {
                    Object::Function(f) => f.qualname.clone(),
                    Object::Native(n) => n.name.clone(),
                    _ => "?".into(),
                };
                let _ = write!(out, "<bound method {name}>");
            }
            Object::Class(c) => {
                let _ = write!(out, "<class '{}'>", c.qualified_name());
            }
            Object::Instance(i) => {
                let _ = write!(out, "{}(", i.class.name);
                write_fields(out, &i.fields.borrow(), depth);
                out.push(')');
            }
            Object::Record(r) => {
                let _ = write!(out, "{}(", r.type_name);
                write_fields(out, &r.fields, depth);
                out.push(')');
            }
            Object::Module(m) => {
                let _ = write!(out, "<module '{}'>", m.name);
            }
            Object::Exception(e) => {
                let _ = write!(out, "{}({:?})", e.kind.name(), e.message);
            }
        }
    }
}

fn write_items(out: &mut String, items: &[Object], depth: usize) {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        item.write_repr(out, depth + 1);
    }
}

fn write_fields(out: &mut String, fields: &BTreeMap<String, Object>, depth: usize) {
    for (i, (name, value)) in fields.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        out.push_str(name);
        out.push('=');
        value.write_repr(out, depth + 1);
    }
}

fn compare_seq(a: &[Object], b: &[Object]) -> Option<Ordering> {
    for (x, y) in a.iter().zip(b.iter()) {
        if x != y {
            return x.compare(y);
        }
    }
    Some(a.len().cmp(&b.len()))
}

pub fn format_float(x: f64) -> String {
    if x.is_nan() {
        "nan".into()
    } else if x.is_infinite() {
        if x > 0.0 { "inf".into() } else { "-inf".into() }
    } else if x.fract() == 0.0 && x.abs() < 1e16 {
        format!("{x:.1}")
    } else {
        format!("{x}")
    }
}

pub fn format_timedelta(d: TimeDelta) -> String {
    let total = d.num_seconds();
    let micros = d.subsec_nanos() / 1000;
    let (sign, total) = if total < 0 || (total == 0 && micros < 0) {
        ("-", -total)
    } else {
        ("", total)
    };
    let days = total / 86_400;
    let rem = total % 86_400;
    let mut out = String::from(sign);
    if days != 0 {
        let _ = write!(out, "{days} day{}, ", if days == 1 { "" } else { "s" });
    }
    let _ = write!(out, "{}:{:02}:{:02}", rem / 3600, (rem % 3600) / 60, rem % 60);
    if micros != 0 {
        let _ = write!(out, ".{:06}", micros.abs());
    }
    out
}

impl PartialEq for Object {
    fn eq(&self, other: &Object) -> bool {
        match (self, other) {
            (Object::None, Object::None) => true,
            (Object::Bool(a), Object::Bool(b)) => a == b,
            (Object::Int(a), Object::Int(b)) => a == b,
            (Object::Int(a), Object::Float(b)) | (Object::Float(b), Object::Int(a)) => {
                (*a as f64) == *b
            }
            (Object::Float(a), Object::Float(b)) => a == b,
            (Object::Str(a), Object::Str(b)) => a == b,
            (Object::Bytes(a), Object::Bytes(b)) => a == b,
            (Object::List(a), Object::List(b)) => {
                Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow()
            }
            (Object::Tuple(a), Object::Tuple(b)) => a == b,
            (Object::Set(a), Object::Set(b)) => {
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len() && a.iter().all(|x| b.contains(x))
            }
            (Object::Dict(a), Object::Dict(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len() && a.iter().all(|(k, v)| b.get(k) == Some(v))
            }
            (Object::DateTime(a), Object::DateTime(b)) => a == b,
            (Object::TimeDelta(a), Object::TimeDelta(b)) => a == b,
            (Object::Instance(a), Object::Instance(b)) => {
                Rc::ptr_eq(a, b)
                    || (Rc::ptr_eq(&a.class, &b.class) && *a.fields.borrow() == *b.fields.borrow())
            }
            (Object::Record(a), Object::Record(b)) => {
                a.type_name == b.type_name && a.fields == b.fields
            }
            (Object::BoundMethod(a), Object::BoundMethod(b)) => {
                a.receiver.identical(&b.receiver) && a.func.identical(&b.func)
            }
            (a, b) => a.identical(b),
        }
    }
}

impl std::fmt::Debug for Object {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.repr())
    }
}

impl From<bool> for Object {
    fn from(b: bool) -> Self {
        Object::Bool(b)
    }
}

impl From<i64> for Object {
    fn from(n: i64) -> Self {
        Object::Int(n)
    }
}

impl From<f64> for Object {
    fn from(x: f64) -> Self {
        Object::Float(x)
    }
}

impl From<&str> for Object {
    fn from(s: &str) -> Self {
        Object::str(s)
    }
}

impl From<String> for Object {
    fn from(s: String) -> Self {
        Object::Str(Rc::from(s))
    }
}
