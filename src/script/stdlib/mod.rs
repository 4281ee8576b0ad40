//! Builtins, builtin-type methods and host modules.

pub mod builtins;
pub mod durable;
pub mod http;
pub mod modules;
pub mod types;

use std::rc::Rc;

pub use builtins::BUILTIN_NAMES;

use super::error::ScriptError;
use super::object::{Args, ModuleObject, NativeFn, NativeFunction, Object};

/// Names of the modules [`host_module`] provides.
pub const HOST_MODULES: &[&str] = &[
    "base64", "datetime", "durable", "env", "http", "json", "math", "random", "re", "time",
    "uuid",
];

/// Build a fresh instance of a host module.
pub fn host_module(name: &str) -> Option<Rc<ModuleObject>> {
    let module = ModuleObject::new(name, format!("<{name}>"));
    match name {
        "base64" => modules::install_base64(&module),
        "datetime" => modules::install_datetime(&module),
        "durable" => durable::install(&module),
        "env" => modules::install_env(&module),
        "http" => http::install(&module),
        "json" => modules::install_json(&module),
        "math" => modules::install_math(&module),
        "random" => modules::install_random(&module),
        "re" => modules::install_re(&module),
        "time" => modules::install_time(&module),
        "uuid" => modules::install_uuid(&module),
        _ => return None,
    }
    Some(module)
}

pub(crate) fn define(module: &ModuleObject, name: &str, func: NativeFn) {
    module.globals.set(
        name,
        Object::Native(NativeFunction::new(module.name.clone(), name, func)),
    );
}

pub(crate) fn arg_str(args: &Args, index: usize, name: &str, func: &str) -> Result<Rc<str>, ScriptError> {
    match args.required(index, name, func)? {
        Object::Str(s) => Ok(s.clone()),
        other => Err(wrong_type(func, name, "str", other)),
    }
}

pub(crate) fn opt_str(args: &Args, index: usize, name: &str, func: &str) -> Result<Option<Rc<str>>, ScriptError> {
    match args.get(index, name) {
        None | Some(Object::None) => Ok(None),
        Some(Object::Str(s)) => Ok(Some(s.clone())),
        Some(other) => Err(wrong_type(func, name, "str", other)),
    }
}

pub(crate) fn arg_int(args: &Args, index: usize, name: &str, func: &str) -> Result<i64, ScriptError> {
    let value = args.required(index, name, func)?;
    match value {
        Object::Int(n) => Ok(*n),
        other => Err(wrong_type(func, name, "int", other)),
    }
}

pub(crate) fn opt_int(
    args: &Args,
    index: usize,
    name: &str,
    func: &str,
    default: i64,
) -> Result<i64, ScriptError> {
    match args.get(index, name) {
        None | Some(Object::None) => Ok(default),
        Some(Object::Int(n)) => Ok(*n),
        Some(other) => Err(wrong_type(func, name, "int", other)),
    }
}

pub(crate) fn arg_float(args: &Args, index: usize, name: &str, func: &str) -> Result<f64, ScriptError> {
    let value = args.required(index, name, func)?;
    match value {
        Object::Int(_) | Object::Float(_) => Ok(value.as_float().unwrap_or(0.0)),
        other => Err(wrong_type(func, name, "number", other)),
    }
}

/// Bytes argument; strings are accepted and UTF-8 encoded.
pub(crate) fn arg_bytes(args: &Args, index: usize, name: &str, func: &str) -> Result<Vec<u8>, ScriptError> {
    match args.required(index, name, func)? {
        Object::Bytes(b) => Ok(b.to_vec()),
        Object::Str(s) => Ok(s.as_bytes().to_vec()),
        other => Err(wrong_type(func, name, "bytes", other)),
    }
}

pub(crate) fn wrong_type(func: &str, name: &str, expected: &str, got: &Object) -> ScriptError {
    ScriptError::type_error(format!(
        "{func}() argument '{name}' must be {expected}, not {}",
        got.type_name()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_listed_host_module_exists() {
        for name in HOST_MODULES {
            let module = host_module(name).unwrap();
            assert_eq!(module.name, *name);
        }
        assert!(host_module("os").is_none());
    }
}
