//! Methods and attributes of builtin types.
//!
//! Native methods receive their receiver as the first positional argument.

use std::fmt::Write;
use std::rc::Rc;

use chrono::format::{Item, StrftimeItems};
use chrono::{Datelike, SecondsFormat, TimeDelta, Timelike};

use super::builtins::sort_objects;
use super::{arg_str, opt_int, opt_str, wrong_type};
use crate::script::error::{ErrorKind, ScriptError};
use crate::script::interp::{contains, Interpreter};
use crate::script::object::{format_float, Args, Dict, NativeFn, NativeFunction, Object};

/// Non-callable attribute of a builtin-typed value.
pub fn attribute(obj: &Object, name: &str) -> Option<Object> {
    let int = |n: i64| Some(Object::Int(n));
    match obj {
        Object::DateTime(t) => match name {
            "year" => int(i64::from(t.year())),
            "month" => int(i64::from(t.month())),
            "day" => int(i64::from(t.day())),
            "hour" => int(i64::from(t.hour())),
            "minute" => int(i64::from(t.minute())),
            "second" => int(i64::from(t.second())),
            "microsecond" => int(i64::from(t.nanosecond() / 1000)),
            _ => None,
        },
        Object::TimeDelta(d) => {
            // Normalized like the familiar timedelta: days may be negative,
            // seconds and microseconds never are.
            let micros = d.num_microseconds()?;
            let days = micros.div_euclid(86_400_000_000);
            let rest = micros.rem_euclid(86_400_000_000);
            match name {
                "days" => int(days),
                "seconds" => int(rest / 1_000_000),
                "microseconds" => int(rest % 1_000_000),
                _ => None,
            }
        }
        Object::Exception(err) => match name {
            "message" => Some(Object::str(&err.message)),
            "kind" => Some(Object::str(err.kind.name())),
            _ => None,
        },
        _ => None,
    }
}

/// Native method `name` of a builtin-typed value.
pub fn method(obj: &Object, name: &str) -> Option<Rc<NativeFunction>> {
    let (module, type_name, func): (&str, &str, NativeFn) = match obj {
        Object::Str(_) => ("builtins", "str", str_method(name)?),
        Object::Bytes(_) => ("builtins", "bytes", bytes_method(name)?),
        Object::List(_) => ("builtins", "list", list_method(name)?),
        Object::Tuple(_) => ("builtins", "tuple", tuple_method(name)?),
        Object::Dict(_) => ("builtins", "dict", dict_method(name)?),
        Object::Set(_) => ("builtins", "set", set_method(name)?),
        Object::DateTime(_) => ("datetime", "datetime", datetime_method(name)?),
        Object::TimeDelta(_) => ("datetime", "timedelta", timedelta_method(name)?),
        _ => return None,
    };
    Some(NativeFunction::new(module, format!("{type_name}.{name}"), func))
}

fn receiver_str(args: &Args) -> Result<Rc<str>, ScriptError> {
    match args.positional.first() {
        Some(Object::Str(s)) => Ok(s.clone()),
        _ => Err(ScriptError::type_error("descriptor requires a 'str' receiver")),
    }
}

/// Positional argument `index` counted after the receiver.
fn arg(args: &Args, index: usize, name: &str) -> Option<Object> {
    args.get(index + 1, name).cloned()
}

// ----------------------------------------------------------------------
// str
// ----------------------------------------------------------------------

fn str_method(name: &str) -> Option<NativeFn> {
    let func: NativeFn = match name {
        "upper" => |_, args| Ok(Object::from(receiver_str(&args)?.to_uppercase())),
        "lower" => |_, args| Ok(Object::from(receiver_str(&args)?.to_lowercase())),
        "strip" => |_, args| strip(args, true, true),
        "lstrip" => |_, args| strip(args, true, false),
        "rstrip" => |_, args| strip(args, false, true),
        "split" => str_split,
        "splitlines" => |_, args| {
            let s = receiver_str(&args)?;
            Ok(Object::list(s.lines().map(Object::from).collect()))
        },
        "join" => str_join,
        "replace" => |_, args| {
            let s = receiver_str(&args)?;
            let old = arg_str(&args, 1, "old", "str.replace")?;
            let new = arg_str(&args, 2, "new", "str.replace")?;
            Ok(Object::from(s.replace(&*old, &new)))
        },
        "startswith" => |_, args| {
            let s = receiver_str(&args)?;
            let prefix = arg_str(&args, 1, "prefix", "str.startswith")?;
            Ok(Object::Bool(s.starts_with(&*prefix)))
        },
        "endswith" => |_, args| {
            let s = receiver_str(&args)?;
            let suffix = arg_str(&args, 1, "suffix", "str.endswith")?;
            Ok(Object::Bool(s.ends_with(&*suffix)))
        },
        "find" => |_, args| {
            let s = receiver_str(&args)?;
            let needle = arg_str(&args, 1, "sub", "str.find")?;
            Ok(Object::Int(match s.find(&*needle) {
                Some(byte) => s[..byte].chars().count() as i64,
                None => -1,
            }))
        },
        "count" => |_, args| {
            let s = receiver_str(&args)?;
            let needle = arg_str(&args, 1, "sub", "str.count")?;
            if needle.is_empty() {
                return Ok(Object::Int(s.chars().count() as i64 + 1));
            }
            Ok(Object::Int(s.matches(&*needle).count() as i64))
        },
        "isdigit" => |_, args| {
            let s = receiver_str(&args)?;
            Ok(Object::Bool(!s.is_empty() && s.chars().all(|c| c.is_ascii_digit())))
        },
        "isalpha" => |_, args| {
            let s = receiver_str(&args)?;
            Ok(Object::Bool(!s.is_empty() && s.chars().all(char::is_alphabetic)))
        },
        "capitalize" => |_, args| {
            let s = receiver_str(&args)?;
            let mut chars = s.chars();
            Ok(Object::from(match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }))
        },
        "encode" => |_, args| Ok(Object::bytes(receiver_str(&args)?.as_bytes())),
        "format" => str_format,
        _ => return None,
    };
    Some(func)
}

fn strip(args: Args, left: bool, right: bool) -> Result<Object, ScriptError> {
    let s = receiver_str(&args)?;
    let chars = opt_str(&args, 1, "chars", "str.strip")?;
    let is_strip = |c: char| match &chars {
        Some(set) => set.contains(c),
        None => c.is_whitespace(),
    };
    let mut out: &str = &s;
    if left {
        out = out.trim_start_matches(is_strip);
    }
    if right {
        out = out.trim_end_matches(is_strip);
    }
    Ok(Object::str(out))
}

fn str_split(_: &mut Interpreter, args: Args) -> Result<Object, ScriptError> {
    let s = receiver_str(&args)?;
    let sep = opt_str(&args, 1, "sep", "str.split")?;
    let maxsplit = opt_int(&args, 2, "maxsplit", "str.split", -1)?;
    let parts: Vec<Object> = match sep {
        Some(sep) if sep.is_empty() => {
            return Err(ScriptError::value_error("empty separator"));
        }
        Some(sep) if maxsplit >= 0 => s
            .splitn(maxsplit as usize + 1, &*sep)
            .map(Object::from)
            .collect(),
        Some(sep) => s.split(&*sep).map(Object::from).collect(),
        None if maxsplit >= 0 => {
            let mut parts = Vec::new();
            let mut rest = s.trim_start();
            while !rest.is_empty() {
                if parts.len() as i64 == maxsplit {
                    parts.push(Object::str(rest));
                    break;
                }
                let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
                parts.push(Object::str(&rest[..end]));
                rest = rest[end..].trim_start();
            }
            parts
        }
        None => s.split_whitespace().map(Object::from).collect(),
    };
    Ok(Object::list(parts))
}

fn str_join(interp: &mut Interpreter, args: Args) -> Result<Object, ScriptError> {
    let sep = receiver_str(&args)?;
    let items = interp.iterate(args.required(1, "iterable", "str.join")?)?;
    let mut parts = Vec::with_capacity(items.len());
    for item in &items {
        match item {
            Object::Str(s) => parts.push(s.to_string()),
            other => {
                return Err(ScriptError::type_error(format!(
                    "sequence item: expected str instance, {} found",
                    other.type_name()
                )))
            }
        }
    }
    Ok(Object::from(parts.join(&sep)))
}

/// `str.format` with `{}`, `{0}`, `{name}` fields and an optional
/// `[<>^][width][.precision][fds]` spec.
fn str_format(_: &mut Interpreter, args: Args) -> Result<Object, ScriptError> {
    let template = receiver_str(&args)?;
    let values = &args.positional[1..];
    let mut out = String::new();
    let mut auto = 0usize;
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut field = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(c) => field.push(c),
                        None => {
                            return Err(ScriptError::value_error(
                                "single '{' encountered in format string",
                            ))
                        }
                    }
                }
                let (key, spec) = field.split_once(':').unwrap_or((field.as_str(), ""));
                let value = if key.is_empty() {
                    auto += 1;
                    values.get(auto - 1)
                } else if let Ok(index) = key.parse::<usize>() {
                    values.get(index)
                } else {
                    args.keyword(key)
                };
                let value = value.ok_or_else(|| {
                    ScriptError::new(ErrorKind::IndexError, format!("format field '{key}' not found"))
                })?;
                out.push_str(&format_spec(value, spec)?);
            }
            '}' => {
                return Err(ScriptError::value_error(
                    "single '}' encountered in format string",
                ))
            }
            c => out.push(c),
        }
    }
    Ok(Object::from(out))
}

fn format_spec(value: &Object, spec: &str) -> Result<String, ScriptError> {
    let bad = || ScriptError::value_error(format!("invalid format specifier '{spec}'"));
    let mut rest = spec;
    let align = match rest.chars().next() {
        Some(c @ ('<' | '>' | '^')) => {
            rest = &rest[1..];
            Some(c)
        }
        _ => None,
    };
    let width_end = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
    let width: usize = if width_end == 0 { 0 } else { rest[..width_end].parse().map_err(|_| bad())? };
    rest = &rest[width_end..];
    let mut precision = None;
    if let Some(after) = rest.strip_prefix('.') {
        let end = after.find(|c: char| !c.is_ascii_digit()).unwrap_or(after.len());
        precision = Some(after[..end].parse::<usize>().map_err(|_| bad())?);
        rest = &after[end..];
    }
    let body = match (rest, value) {
        ("f", v) => {
            let x = v.as_float().ok_or_else(bad)?;
            format!("{x:.*}", precision.unwrap_or(6))
        }
        ("d", Object::Int(n)) => n.to_string(),
        ("" | "s", Object::Float(x)) if precision.is_some() => {
            format!("{x:.*}", precision.unwrap_or(6))
        }
        ("" | "s", Object::Float(x)) => format_float(*x),
        ("" | "s", v) => {
            let text = v.to_display();
            match precision {
                Some(p) => text.chars().take(p).collect(),
                None => text,
            }
        }
        _ => return Err(bad()),
    };
    let len = body.chars().count();
    if len >= width {
        return Ok(body);
    }
    let pad = width - len;
    let numeric = matches!(value, Object::Int(_) | Object::Float(_));
    Ok(match align.unwrap_or(if numeric { '>' } else { '<' }) {
        '>' => format!("{}{body}", " ".repeat(pad)),
        '^' => format!("{}{body}{}", " ".repeat(pad / 2), " ".repeat(pad - pad / 2)),
        _ => format!("{body}{}", " ".repeat(pad)),
    })
}

// ----------------------------------------------------------------------
// bytes
// ----------------------------------------------------------------------

fn bytes_method(name: &str) -> Option<NativeFn> {
    let func: NativeFn = match name {
        "decode" => |_, args| {
            let Some(Object::Bytes(b)) = args.positional.first() else {
                return Err(ScriptError::type_error("descriptor requires a 'bytes' receiver"));
            };
            std::str::from_utf8(b)
                .map(Object::str)
                .map_err(|e| ScriptError::value_error(format!("invalid utf-8: {e}")))
        },
        "hex" => |_, args| {
            let Some(Object::Bytes(b)) = args.positional.first() else {
                return Err(ScriptError::type_error("descriptor requires a 'bytes' receiver"));
            };
            let mut out = String::with_capacity(b.len() * 2);
            for byte in b.iter() {
                let _ = write!(out, "{byte:02x}");
            }
            Ok(Object::from(out))
        },
        _ => return None,
    };
    Some(func)
}

// ----------------------------------------------------------------------
// list / tuple
// ----------------------------------------------------------------------

fn with_list<R>(
    args: &Args,
    f: impl FnOnce(&mut Vec<Object>) -> Result<R, ScriptError>,
) -> Result<R, ScriptError> {
    match args.positional.first() {
        Some(Object::List(items)) => f(&mut items.borrow_mut()),
        _ => Err(ScriptError::type_error("descriptor requires a 'list' receiver")),
    }
}

fn list_method(name: &str) -> Option<NativeFn> {
    let func: NativeFn = match name {
        "append" => |_, args| {
            let item = args.required(1, "object", "list.append")?.clone();
            with_list(&args, |items| {
                items.push(item);
                Ok(Object::None)
            })
        },
        "extend" => |interp, args| {
            let extra = interp.iterate(args.required(1, "iterable", "list.extend")?)?;
            with_list(&args, |items| {
                items.extend(extra);
                Ok(Object::None)
            })
        },
        "insert" => |_, args| {
            let index = super::arg_int(&args, 1, "index", "list.insert")?;
            let item = args.required(2, "object", "list.insert")?.clone();
            with_list(&args, |items| {
                let len = items.len() as i64;
                let at = if index < 0 { (index + len).max(0) } else { index.min(len) };
                items.insert(at as usize, item);
                Ok(Object::None)
            })
        },
        "pop" => |_, args| {
            let index = opt_int(&args, 1, "index", "list.pop", -1)?;
            with_list(&args, |items| {
                let len = items.len() as i64;
                let at = if index < 0 { index + len } else { index };
                if !(0..len).contains(&at) {
                    return Err(ScriptError::new(ErrorKind::IndexError, "pop index out of range"));
                }
                Ok(items.remove(at as usize))
            })
        },
        "remove" => |_, args| {
            let item = args.required(1, "value", "list.remove")?.clone();
            with_list(&args, |items| match items.iter().position(|x| *x == item) {
                Some(pos) => {
                    items.remove(pos);
                    Ok(Object::None)
                }
                None => Err(ScriptError::value_error("list.remove(x): x not in list")),
            })
        },
        "index" => |_, args| {
            let item = args.required(1, "value", "list.index")?.clone();
            with_list(&args, |items| index_of(items, &item))
        },
        "count" => |_, args| {
            let item = args.required(1, "value", "list.count")?.clone();
            with_list(&args, |items| {
                Ok(Object::Int(items.iter().filter(|x| **x == item).count() as i64))
            })
        },
        "reverse" => |_, args| {
            with_list(&args, |items| {
                items.reverse();
                Ok(Object::None)
            })
        },
        "clear" => |_, args| {
            with_list(&args, |items| {
                items.clear();
                Ok(Object::None)
            })
        },
        "copy" => |_, args| with_list(&args, |items| Ok(Object::list(items.clone()))),
        "sort" => list_sort,
        _ => return None,
    };
    Some(func)
}

fn list_sort(interp: &mut Interpreter, args: Args) -> Result<Object, ScriptError> {
    let Some(Object::List(items)) = args.positional.first() else {
        return Err(ScriptError::type_error("descriptor requires a 'list' receiver"));
    };
    let key = args.keyword("key").cloned().filter(|k| !matches!(k, Object::None));
    let reverse = args.keyword("reverse").is_some_and(Object::truthy);
    // The key function may touch the list, so sort a copy and write it back.
    let current = items.borrow().clone();
    let sorted = sort_objects(interp, current, key.as_ref(), reverse)?;
    *items.borrow_mut() = sorted;
    Ok(Object::None)
}

fn index_of(items: &[Object], item: &Object) -> Result<Object, ScriptError> {
    items
        .iter()
        .position(|x| x == item)
        .map(|pos| Object::Int(pos as i64))
        .ok_or_else(|| ScriptError::value_error(format!("{} is not in sequence", item.repr())))
}

fn tuple_method(name: &str) -> Option<NativeFn> {
    let func: NativeFn = match name {
        "index" => |_, args| {
            let Some(Object::Tuple(items)) = args.positional.first() else {
                return Err(ScriptError::type_error("descriptor requires a 'tuple' receiver"));
            };
            index_of(items, args.required(1, "value", "tuple.index")?)
        },
        "count" => |_, args| {
            let Some(Object::Tuple(items)) = args.positional.first() else {
                return Err(ScriptError::type_error("descriptor requires a 'tuple' receiver"));
            };
            let item = args.required(1, "value", "tuple.count")?;
            Ok(Object::Int(items.iter().filter(|x| *x == item).count() as i64))
        },
        _ => return None,
    };
    Some(func)
}

// ----------------------------------------------------------------------
// dict
// ----------------------------------------------------------------------

fn with_dict<R>(
    args: &Args,
    f: impl FnOnce(&mut Dict) -> Result<R, ScriptError>,
) -> Result<R, ScriptError> {
    match args.positional.first() {
        Some(Object::Dict(dict)) => f(&mut dict.borrow_mut()),
        _ => Err(ScriptError::type_error("descriptor requires a 'dict' receiver")),
    }
}

fn dict_method(name: &str) -> Option<NativeFn> {
    let func: NativeFn = match name {
        "get" => |_, args| {
            let key = args.required(1, "key", "dict.get")?.clone();
            let default = arg(&args, 1, "default").unwrap_or(Object::None);
            with_dict(&args, |dict| Ok(dict.get(&key).cloned().unwrap_or(default)))
        },
        "keys" => |_, args| with_dict(&args, |dict| Ok(Object::list(dict.keys()))),
        "values" => |_, args| {
            with_dict(&args, |dict| Ok(Object::list(dict.iter().map(|(_, v)| v.clone()).collect())))
        },
        "items" => |_, args| {
            with_dict(&args, |dict| {
                Ok(Object::list(
                    dict.iter()
                        .map(|(k, v)| Object::tuple(vec![k.clone(), v.clone()]))
                        .collect(),
                ))
            })
        },
        "pop" => |_, args| {
            let key = args.required(1, "key", "dict.pop")?.clone();
            let default = arg(&args, 1, "default");
            with_dict(&args, |dict| match (dict.remove(&key), default) {
                (Some(value), _) => Ok(value),
                (None, Some(default)) => Ok(default),
                (None, None) => Err(ScriptError::new(ErrorKind::KeyError, key.repr())),
            })
        },
        "setdefault" => |_, args| {
            let key = args.required(1, "key", "dict.setdefault")?.clone();
            let default = arg(&args, 1, "default").unwrap_or(Object::None);
            with_dict(&args, |dict| {
                if let Some(value) = dict.get(&key) {
                    return Ok(value.clone());
                }
                dict.insert(key, default.clone());
                Ok(default)
            })
        },
        "update" => |_, args| {
            let other = match args.positional.get(1) {
                Some(Object::Dict(other)) => other.borrow().clone(),
                Some(other) => return Err(wrong_type("dict.update", "other", "dict", other)),
                None => Dict::new(),
            };
            let keywords = args.keywords.clone();
            with_dict(&args, |dict| {
                for (k, v) in other.iter() {
                    dict.insert(k.clone(), v.clone());
                }
                for (k, v) in keywords {
                    dict.insert(Object::from(k), v);
                }
                Ok(Object::None)
            })
        },
        "copy" => |_, args| with_dict(&args, |dict| Ok(Object::dict(dict.clone()))),
        "clear" => |_, args| {
            with_dict(&args, |dict| {
                dict.clear();
                Ok(Object::None)
            })
        },
        _ => return None,
    };
    Some(func)
}

// ----------------------------------------------------------------------
// set
// ----------------------------------------------------------------------

fn set_items(args: &Args) -> Result<Vec<Object>, ScriptError> {
    match args.positional.first() {
        Some(Object::Set(items)) => Ok(items.borrow().clone()),
        _ => Err(ScriptError::type_error("descriptor requires a 'set' receiver")),
    }
}

fn set_method(name: &str) -> Option<NativeFn> {
    let func: NativeFn = match name {
        "add" => |_, args| {
            let item = args.required(1, "elem", "set.add")?.clone();
            if let Some(Object::Set(items)) = args.positional.first() {
                let mut items = items.borrow_mut();
                if !items.contains(&item) {
                    items.push(item);
                }
            }
            Ok(Object::None)
        },
        "discard" => |_, args| {
            let item = args.required(1, "elem", "set.discard")?.clone();
            if let Some(Object::Set(items)) = args.positional.first() {
                items.borrow_mut().retain(|x| *x != item);
            }
            Ok(Object::None)
        },
        "remove" => |_, args| {
            let item = args.required(1, "elem", "set.remove")?.clone();
            let Some(container) = args.positional.first() else {
                return Err(ScriptError::type_error("descriptor requires a 'set' receiver"));
            };
            if !contains(container, &item)? {
                return Err(ScriptError::new(ErrorKind::KeyError, item.repr()));
            }
            if let Object::Set(items) = container {
                items.borrow_mut().retain(|x| *x != item);
            }
            Ok(Object::None)
        },
        "union" => |interp, args| {
            let mut items = set_items(&args)?;
            for other in &args.positional[1..] {
                items.extend(interp.iterate(other)?);
            }
            Ok(Object::set(items))
        },
        "intersection" => |interp, args| {
            let mut items = set_items(&args)?;
            for other in &args.positional[1..] {
                let other = interp.iterate(other)?;
                items.retain(|x| other.contains(x));
            }
            Ok(Object::set(items))
        },
        "difference" => |interp, args| {
            let mut items = set_items(&args)?;
            for other in &args.positional[1..] {
                let other = interp.iterate(other)?;
                items.retain(|x| !other.contains(x));
            }
            Ok(Object::set(items))
        },
        "copy" => |_, args| Ok(Object::set(set_items(&args)?)),
        _ => return None,
    };
    Some(func)
}

// ----------------------------------------------------------------------
// datetime / timedelta
// ----------------------------------------------------------------------

fn datetime_method(name: &str) -> Option<NativeFn> {
    let func: NativeFn = match name {
        "isoformat" => |_, args| {
            let Some(Object::DateTime(t)) = args.positional.first() else {
                return Err(ScriptError::type_error("descriptor requires a 'datetime' receiver"));
            };
            Ok(Object::from(t.to_rfc3339_opts(SecondsFormat::AutoSi, false)))
        },
        "strftime" => |_, args| {
            let Some(Object::DateTime(t)) = args.positional.first() else {
                return Err(ScriptError::type_error("descriptor requires a 'datetime' receiver"));
            };
            let format = arg_str(&args, 1, "format", "datetime.strftime")?;
            let items: Vec<Item<'_>> = StrftimeItems::new(&format).collect();
            if items.iter().any(|item| matches!(item, Item::Error)) {
                return Err(ScriptError::value_error(format!("invalid format string '{format}'")));
            }
            let mut out = String::new();
            write!(out, "{}", t.format_with_items(items.into_iter()))
                .map_err(|_| ScriptError::value_error(format!("cannot format with '{format}'")))?;
            Ok(Object::from(out))
        },
        "timestamp" => |_, args| {
            let Some(Object::DateTime(t)) = args.positional.first() else {
                return Err(ScriptError::type_error("descriptor requires a 'datetime' receiver"));
            };
            Ok(Object::Float(
                t.timestamp() as f64 + f64::from(t.timestamp_subsec_micros()) / 1e6,
            ))
        },
        "weekday" => |_, args| {
            let Some(Object::DateTime(t)) = args.positional.first() else {
                return Err(ScriptError::type_error("descriptor requires a 'datetime' receiver"));
            };
            Ok(Object::Int(i64::from(t.weekday().num_days_from_monday())))
        },
        _ => return None,
    };
    Some(func)
}

fn timedelta_method(name: &str) -> Option<NativeFn> {
    let func: NativeFn = match name {
        "total_seconds" => |_, args| {
            let Some(Object::TimeDelta(d)) = args.positional.first() else {
                return Err(ScriptError::type_error("descriptor requires a 'timedelta' receiver"));
            };
            Ok(Object::Float(total_seconds(*d)))
        },
        _ => return None,
    };
    Some(func)
}

pub(crate) fn total_seconds(d: TimeDelta) -> f64 {
    d.num_seconds() as f64 + f64::from(d.subsec_nanos()) / 1e9
}

#[cfg(test)]
mod tests {
    use crate::script::interp::{Interpreter, StdHost};
    use crate::script::object::Object;
    use crate::script::parser::parse_module;
    use std::rc::Rc;

    fn eval(expr: &str) -> Object {
        let source = format!("result = {expr}\n");
        let module = parse_module(&source, "wf", "wf.flow").unwrap();
        let mut interp = Interpreter::new(Rc::new(StdHost::new()));
        interp
            .exec_module(&module, &source)
            .unwrap()
            .get("result")
            .unwrap()
    }

    #[test]
    fn string_methods() {
        assert_eq!(eval("'  a b  '.strip()"), Object::from("a b"));
        assert_eq!(eval("'a,b,,c'.split(',')"), eval("['a', 'b', '', 'c']"));
        assert_eq!(eval("' x  y '.split()"), eval("['x', 'y']"));
        assert_eq!(eval("'-'.join(['a', 'b'])"), Object::from("a-b"));
        assert_eq!(eval("'héllo'.find('l')"), Object::Int(2));
    }

    #[test]
    fn format_fields_and_specs() {
        assert_eq!(eval("'{} + {} = {total}'.format(1, 2, total=3)"), Object::from("1 + 2 = 3"));
        assert_eq!(eval("'{0:.2f}|{1:>4}|{{}}'.format(3.14159, 'x')"), Object::from("3.14|   x|{}"));
    }

    #[test]
    fn list_methods_mutate_in_place() {
        let source = "\
xs = [3, 1]
xs.append(2)
xs.sort()
last = xs.pop()
";
        let module = parse_module(source, "wf", "wf.flow").unwrap();
        let mut interp = Interpreter::new(Rc::new(StdHost::new()));
        let module = interp.exec_module(&module, source).unwrap();
        assert_eq!(module.get("xs").unwrap(), eval("[1, 2]"));
        assert_eq!(module.get("last").unwrap(), Object::Int(3));
    }

    #[test]
    fn dict_methods() {
        assert_eq!(eval("{'a': 1}.get('b', 0)"), Object::Int(0));
        assert_eq!(eval("{'a': 1, 'b': 2}.items()"), eval("[('a', 1), ('b', 2)]"));
    }

    #[test]
    fn timedelta_attributes_normalize() {
        let source = "\
from datetime import timedelta
d = -timedelta(seconds=1)
days = d.days
seconds = d.seconds
";
        let module = parse_module(source, "wf", "wf.flow").unwrap();
        let mut interp = Interpreter::new(Rc::new(StdHost::new()));
        let module = interp.exec_module(&module, source).unwrap();
        assert_eq!(module.get("days").unwrap(), Object::Int(-1));
        assert_eq!(module.get("seconds").unwrap(), Object::Int(86399));
    }
}
