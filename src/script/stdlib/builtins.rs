//! Functions available in every module without an import.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::Rc;

use super::{arg_int, arg_str, opt_int, wrong_type};
use crate::script::ast::BinOp;
use crate::script::error::{ErrorKind, ScriptError};
use crate::script::interp::{binary_op, Interpreter, HOOK_NAME};
use crate::script::object::{Args, Dict, Env, NativeFn, NativeFunction, Object};

/// Builtin names. Bare calls to these are never routed through the hook.
pub const BUILTIN_NAMES: &[&str] = &[
    "abs", "all", "any", "bool", "bytes", "callable", "chr", "dict", "enumerate", "filter",
    "float", "getattr", "hasattr", "int", "isinstance", "len", "list", "map", "max", "min", "ord",
    "print", "range", "repr", "reversed", "round", "set", "sorted", "str", "sum", "tuple", "type",
    "zip", "Exception", "ActivityError", "AttributeError", "ImportError", "IndexError",
    "KeyError", "NameError", "ProtocolError", "RuntimeError", "TypeError", "UsageError",
    "ValueError", "ZeroDivisionError",
];

const MAX_RANGE: i64 = 10_000_000;

pub fn install(env: &Env) {
    let functions: &[(&str, NativeFn)] = &[
        (HOOK_NAME, hook),
        ("abs", abs),
        ("all", all),
        ("any", any),
        ("bool", bool_),
        ("bytes", bytes),
        ("callable", callable),
        ("chr", chr),
        ("dict", dict),
        ("enumerate", enumerate),
        ("filter", filter),
        ("float", float),
        ("getattr", getattr),
        ("hasattr", hasattr),
        ("int", int),
        ("isinstance", isinstance),
        ("len", len),
        ("list", list),
        ("map", map),
        ("max", max),
        ("min", min),
        ("ord", ord),
        ("print", print),
        ("range", range),
        ("repr", repr),
        ("reversed", reversed),
        ("round", round),
        ("set", set),
        ("sorted", sorted),
        ("str", str_),
        ("sum", sum),
        ("tuple", tuple),
        ("type", type_),
        ("zip", zip),
    ];
    for (name, func) in functions {
        env.set(
            *name,
            Object::Native(NativeFunction::new("builtins", *name, *func)),
        );
    }
    let errors: &[(&str, NativeFn)] = &[
        ("Exception", exception),
        ("ActivityError", activity_error),
        ("AttributeError", attribute_error),
        ("ImportError", import_error),
        ("IndexError", index_error),
        ("KeyError", key_error),
        ("NameError", name_error),
        ("ProtocolError", protocol_error),
        ("RuntimeError", runtime_error),
        ("TypeError", type_error),
        ("UsageError", usage_error),
        ("ValueError", value_error),
        ("ZeroDivisionError", zero_division_error),
    ];
    for (name, func) in errors {
        env.set(
            *name,
            Object::Native(NativeFunction::new("builtins", *name, *func)),
        );
    }
}

/// `__hook__(callee, *args, **kwargs)`
fn hook(interp: &mut Interpreter, mut args: Args) -> Result<Object, ScriptError> {
    if args.positional.is_empty() {
        return Err(ScriptError::usage(format!(
            "{HOOK_NAME}() needs a callee ({})",
            interp.location()
        )));
    }
    let callee = args.positional.remove(0);
    interp.dispatch(callee, args)
}

macro_rules! error_constructors {
    ($($func:ident => $kind:ident),* $(,)?) => {
        $(
            fn $func(_: &mut Interpreter, args: Args) -> Result<Object, ScriptError> {
                let message = args.get(0, "message").map(Object::to_display).unwrap_or_default();
                Ok(Object::Exception(Rc::new(ScriptError::new(ErrorKind::$kind, message))))
            }
        )*
    };
}

error_constructors! {
    exception => Exception,
    activity_error => ActivityError,
    attribute_error => AttributeError,
    import_error => ImportError,
    index_error => IndexError,
    key_error => KeyError,
    name_error => NameError,
    protocol_error => ProtocolError,
    runtime_error => RuntimeError,
    type_error => TypeError,
    usage_error => UsageError,
    value_error => ValueError,
    zero_division_error => ZeroDivisionError,
}

fn print(interp: &mut Interpreter, args: Args) -> Result<Object, ScriptError> {
    let sep = match args.keyword("sep") {
        Some(Object::Str(s)) => s.to_string(),
        _ => " ".to_string(),
    };
    let text = args
        .positional
        .iter()
        .map(Object::to_display)
        .collect::<Vec<_>>()
        .join(&sep);
    interp.host().print(&text)?;
    Ok(Object::None)
}

fn len(_: &mut Interpreter, args: Args) -> Result<Object, ScriptError> {
    let n = match args.required(0, "obj", "len")? {
        Object::Str(s) => s.chars().count(),
        Object::Bytes(b) => b.len(),
        Object::List(items) | Object::Set(items) => items.borrow().len(),
        Object::Tuple(items) => items.len(),
        Object::Dict(d) => d.borrow().len(),
        Object::Record(r) => r.fields.len(),
        other => {
            return Err(ScriptError::type_error(format!(
                "object of type '{}' has no len()",
                other.type_name()
            )))
        }
    };
    Ok(Object::Int(n as i64))
}

fn range(_: &mut Interpreter, args: Args) -> Result<Object, ScriptError> {
    let (start, stop, step) = match args.len() {
        1 => (0, arg_int(&args, 0, "stop", "range")?, 1),
        2 => (
            arg_int(&args, 0, "start", "range")?,
            arg_int(&args, 1, "stop", "range")?,
            1,
        ),
        3 => (
            arg_int(&args, 0, "start", "range")?,
            arg_int(&args, 1, "stop", "range")?,
            arg_int(&args, 2, "step", "range")?,
        ),
        n => {
            return Err(ScriptError::type_error(format!(
                "range expected 1 to 3 arguments, got {n}"
            )))
        }
    };
    if step == 0 {
        return Err(ScriptError::value_error("range() arg 3 must not be zero"));
    }
    let (start, stop, step) = (i128::from(start), i128::from(stop), i128::from(step));
    let count = if step > 0 {
        (stop - start + step - 1).max(0) / step
    } else {
        (start - stop - step - 1).max(0) / -step
    };
    if count > i128::from(MAX_RANGE) {
        return Err(ScriptError::value_error(format!(
            "range() of {count} items is too large"
        )));
    }
    // every element lies between start and stop, so it fits in i64
    let items = (0..count)
        .map(|i| Object::Int((start + i * step) as i64))
        .collect();
    Ok(Object::list(items))
}

fn str_(_: &mut Interpreter, args: Args) -> Result<Object, ScriptError> {
    Ok(match args.get(0, "object") {
        None => Object::str(""),
        Some(Object::Str(s)) => Object::Str(s.clone()),
        Some(other) => Object::from(other.to_display()),
    })
}

fn repr(_: &mut Interpreter, args: Args) -> Result<Object, ScriptError> {
    Ok(Object::from(args.required(0, "obj", "repr")?.repr()))
}

fn int(_: &mut Interpreter, args: Args) -> Result<Object, ScriptError> {
    let value = match args.get(0, "x") {
        None => return Ok(Object::Int(0)),
        Some(value) => value,
    };
    match value {
        Object::Int(n) => Ok(Object::Int(*n)),
        Object::Bool(b) => Ok(Object::Int(i64::from(*b))),
        Object::Float(x) => {
            if !x.is_finite() || x.abs() >= 9.2e18 {
                return Err(ScriptError::value_error(format!(
                    "cannot convert float {x} to integer"
                )));
            }
            Ok(Object::Int(x.trunc() as i64))
        }
        Object::Str(s) => {
            let base = opt_int(&args, 1, "base", "int", 10)?;
            let base = u32::try_from(base)
                .ok()
                .filter(|b| (2..=36).contains(b))
                .ok_or_else(|| ScriptError::value_error("int() base must be >= 2 and <= 36"))?;
            let text = s.trim().replace('_', "");
            let (negative, digits) = match text.strip_prefix('-') {
                Some(rest) => (true, rest.to_string()),
                None => (false, text.trim_start_matches('+').to_string()),
            };
            let digits = match base {
                16 => digits.trim_start_matches("0x").to_string(),
                2 => digits.trim_start_matches("0b").to_string(),
                8 => digits.trim_start_matches("0o").to_string(),
                _ => digits,
            };
            i64::from_str_radix(&digits, base)
                .map(|n| Object::Int(if negative { -n } else { n }))
                .map_err(|_| {
                    ScriptError::value_error(format!(
                        "invalid literal for int() with base {base}: {}",
                        value.repr()
                    ))
                })
        }
        other => Err(wrong_type("int", "x", "a string or a number", other)),
    }
}

fn float(_: &mut Interpreter, args: Args) -> Result<Object, ScriptError> {
    match args.get(0, "x") {
        None => Ok(Object::Float(0.0)),
        Some(Object::Str(s)) => {
            let text = s.trim().to_ascii_lowercase();
            let parsed = match text.as_str() {
                "inf" | "+inf" | "infinity" => Ok(f64::INFINITY),
                "-inf" | "-infinity" => Ok(f64::NEG_INFINITY),
                "nan" => Ok(f64::NAN),
                _ => text.parse::<f64>(),
            };
            parsed.map(Object::Float).map_err(|_| {
                ScriptError::value_error(format!("could not convert string to float: '{s}'"))
            })
        }
        Some(value) => value
            .as_float()
            .map(Object::Float)
            .ok_or_else(|| wrong_type("float", "x", "a string or a number", value)),
    }
}

fn bool_(_: &mut Interpreter, args: Args) -> Result<Object, ScriptError> {
    Ok(Object::Bool(args.get(0, "x").is_some_and(Object::truthy)))
}

fn bytes(_: &mut Interpreter, args: Args) -> Result<Object, ScriptError> {
    match args.get(0, "source") {
        None => Ok(Object::bytes(&[])),
        Some(Object::Bytes(b)) => Ok(Object::Bytes(b.clone())),
        Some(Object::Str(s)) => Ok(Object::bytes(s.as_bytes())),
        Some(Object::List(items)) => {
            let items = items.borrow();
            let mut out = Vec::with_capacity(items.len());
            for item in items.iter() {
                let byte = item
                    .as_int()
                    .and_then(|n| u8::try_from(n).ok())
                    .ok_or_else(|| ScriptError::value_error("bytes must be in range(0, 256)"))?;
                out.push(byte);
            }
            Ok(Object::bytes(&out))
        }
        Some(other) => Err(wrong_type("bytes", "source", "str, bytes or list", other)),
    }
}

fn list(interp: &mut Interpreter, args: Args) -> Result<Object, ScriptError> {
    match args.get(0, "iterable") {
        None => Ok(Object::list(Vec::new())),
        Some(iterable) => Ok(Object::list(interp.iterate(iterable)?)),
    }
}

fn tuple(interp: &mut Interpreter, args: Args) -> Result<Object, ScriptError> {
    match args.get(0, "iterable") {
        None => Ok(Object::tuple(Vec::new())),
        Some(iterable) => Ok(Object::tuple(interp.iterate(iterable)?)),
    }
}

fn set(interp: &mut Interpreter, args: Args) -> Result<Object, ScriptError> {
    match args.get(0, "iterable") {
        None => Ok(Object::set(Vec::new())),
        Some(iterable) => Ok(Object::set(interp.iterate(iterable)?)),
    }
}

fn dict(interp: &mut Interpreter, args: Args) -> Result<Object, ScriptError> {
    let mut out = Dict::new();
    match args.positional.first() {
        None => {}
        Some(Object::Dict(source)) => {
            for (k, v) in source.borrow().iter() {
                out.insert(k.clone(), v.clone());
            }
        }
        Some(Object::Record(record)) => {
            for (k, v) in &record.fields {
                out.insert(Object::str(k), v.clone());
            }
        }
        Some(iterable) => {
            for pair in interp.iterate(iterable)? {
                let items = interp.iterate(&pair)?;
                let [k, v] = <[Object; 2]>::try_from(items).map_err(|_| {
                    ScriptError::value_error("dictionary update sequence element must have length 2")
                })?;
                out.insert(k, v);
            }
        }
    }
    for (name, value) in args.keywords {
        out.insert(Object::from(name), value);
    }
    Ok(Object::dict(out))
}

fn abs(_: &mut Interpreter, args: Args) -> Result<Object, ScriptError> {
    match args.required(0, "x", "abs")? {
        Object::Int(n) => n
            .checked_abs()
            .map(Object::Int)
            .ok_or_else(|| ScriptError::value_error("integer overflow")),
        Object::Float(x) => Ok(Object::Float(x.abs())),
        Object::TimeDelta(d) => Ok(Object::TimeDelta(d.abs())),
        other => Err(wrong_type("abs", "x", "a number", other)),
    }
}

fn all(interp: &mut Interpreter, args: Args) -> Result<Object, ScriptError> {
    let items = interp.iterate(args.required(0, "iterable", "all")?)?;
    Ok(Object::Bool(items.iter().all(Object::truthy)))
}

fn any(interp: &mut Interpreter, args: Args) -> Result<Object, ScriptError> {
    let items = interp.iterate(args.required(0, "iterable", "any")?)?;
    Ok(Object::Bool(items.iter().any(Object::truthy)))
}

fn callable(_: &mut Interpreter, args: Args) -> Result<Object, ScriptError> {
    Ok(Object::Bool(args.required(0, "obj", "callable")?.is_callable()))
}

fn chr(_: &mut Interpreter, args: Args) -> Result<Object, ScriptError> {
    let code = arg_int(&args, 0, "i", "chr")?;
    u32::try_from(code)
        .ok()
        .and_then(char::from_u32)
        .map(|c| Object::from(c.to_string()))
        .ok_or_else(|| ScriptError::value_error("chr() arg not in range"))
}

fn ord(_: &mut Interpreter, args: Args) -> Result<Object, ScriptError> {
    let s = arg_str(&args, 0, "c", "ord")?;
    let mut chars = s.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(Object::Int(i64::from(u32::from(c)))),
        _ => Err(ScriptError::type_error(
            "ord() expected a character",
        )),
    }
}

fn enumerate(interp: &mut Interpreter, args: Args) -> Result<Object, ScriptError> {
    let items = interp.iterate(args.required(0, "iterable", "enumerate")?)?;
    let start = opt_int(&args, 1, "start", "enumerate", 0)?;
    Ok(Object::list(
        items
            .into_iter()
            .enumerate()
            .map(|(i, item)| Object::tuple(vec![Object::Int(start + i as i64), item]))
            .collect(),
    ))
}

fn zip(interp: &mut Interpreter, args: Args) -> Result<Object, ScriptError> {
    let mut columns = Vec::with_capacity(args.len());
    for iterable in &args.positional {
        columns.push(interp.iterate(iterable)?);
    }
    let rows = columns.iter().map(Vec::len).min().unwrap_or(0);
    Ok(Object::list(
        (0..rows)
            .map(|i| Object::tuple(columns.iter().map(|c| c[i].clone()).collect()))
            .collect(),
    ))
}

fn reversed(interp: &mut Interpreter, args: Args) -> Result<Object, ScriptError> {
    let mut items = interp.iterate(args.required(0, "seq", "reversed")?)?;
    items.reverse();
    Ok(Object::list(items))
}

fn map(interp: &mut Interpreter, args: Args) -> Result<Object, ScriptError> {
    let func = args.required(0, "function", "map")?.clone();
    let items = interp.iterate(args.required(1, "iterable", "map")?)?;
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        out.push(interp.call(&func, Args::new(vec![item]))?);
    }
    Ok(Object::list(out))
}

fn filter(interp: &mut Interpreter, args: Args) -> Result<Object, ScriptError> {
    let func = args.required(0, "function", "filter")?.clone();
    let items = interp.iterate(args.required(1, "iterable", "filter")?)?;
    let mut out = Vec::new();
    for item in items {
        let keep = match &func {
            Object::None => item.truthy(),
            f => interp.call(f, Args::new(vec![item.clone()]))?.truthy(),
        };
        if keep {
            out.push(item);
        }
    }
    Ok(Object::list(out))
}

fn sum(interp: &mut Interpreter, args: Args) -> Result<Object, ScriptError> {
    let items = interp.iterate(args.required(0, "iterable", "sum")?)?;
    let mut total = args.get(1, "start").cloned().unwrap_or(Object::Int(0));
    for item in items {
        total = binary_op(BinOp::Add, &total, &item)?;
    }
    Ok(total)
}

fn round(_: &mut Interpreter, args: Args) -> Result<Object, ScriptError> {
    let x = args.required(0, "number", "round")?;
    let digits = match args.get(1, "ndigits") {
        None | Some(Object::None) => None,
        Some(Object::Int(n)) => Some(*n),
        Some(other) => return Err(wrong_type("round", "ndigits", "int", other)),
    };
    match (x, digits) {
        (Object::Int(n), _) => Ok(Object::Int(*n)),
        (Object::Float(f), None) => Ok(Object::Int(f.round_ties_even() as i64)),
        (Object::Float(f), Some(d)) => {
            let d = i32::try_from(d).map_err(|_| ScriptError::value_error("ndigits too large"))?;
            let scale = 10f64.powi(d);
            Ok(Object::Float((f * scale).round_ties_even() / scale))
        }
        (other, _) => Err(wrong_type("round", "number", "a number", other)),
    }
}

fn getattr(interp: &mut Interpreter, args: Args) -> Result<Object, ScriptError> {
    let obj = args.required(0, "object", "getattr")?.clone();
    let name = arg_str(&args, 1, "name", "getattr")?;
    match interp.get_attr(&obj, &name) {
        Ok(value) => Ok(value),
        Err(err) if err.kind == ErrorKind::AttributeError => match args.get(2, "default") {
            Some(default) => Ok(default.clone()),
            None => Err(err),
        },
        Err(err) => Err(err),
    }
}

fn hasattr(interp: &mut Interpreter, args: Args) -> Result<Object, ScriptError> {
    let obj = args.required(0, "object", "hasattr")?.clone();
    let name = arg_str(&args, 1, "name", "hasattr")?;
    Ok(Object::Bool(interp.get_attr(&obj, &name).is_ok()))
}

fn type_(_: &mut Interpreter, args: Args) -> Result<Object, ScriptError> {
    Ok(Object::from(args.required(0, "object", "type")?.type_name()))
}

fn isinstance(_: &mut Interpreter, args: Args) -> Result<Object, ScriptError> {
    let obj = args.required(0, "obj", "isinstance")?;
    let spec = args.required(1, "class_or_tuple", "isinstance")?;
    Ok(Object::Bool(instance_of(obj, spec)))
}

fn instance_of(obj: &Object, spec: &Object) -> bool {
    match spec {
        Object::Tuple(options) => options.iter().any(|o| instance_of(obj, o)),
        Object::Class(class) => {
            matches!(obj, Object::Instance(i) if Rc::ptr_eq(&i.class, class))
        }
        Object::Native(native) => match (native.name.as_str(), obj) {
            ("Exception", Object::Exception(_)) => true,
            (name, Object::Exception(err)) => err.kind.name() == name,
            // `bool` is a subtype of `int`.
            ("int", Object::Bool(_)) => true,
            (name, other) => other.type_name() == name,
        },
        _ => false,
    }
}

fn min(interp: &mut Interpreter, args: Args) -> Result<Object, ScriptError> {
    extreme(interp, args, "min", Ordering::Less)
}

fn max(interp: &mut Interpreter, args: Args) -> Result<Object, ScriptError> {
    extreme(interp, args, "max", Ordering::Greater)
}

fn extreme(
    interp: &mut Interpreter,
    args: Args,
    func: &str,
    want: Ordering,
) -> Result<Object, ScriptError> {
    let items = if args.len() == 1 {
        interp.iterate(&args.positional[0])?
    } else {
        args.positional.clone()
    };
    let key = args.keyword("key").cloned();
    let mut best: Option<(Object, Object)> = None;
    for item in items {
        let k = match &key {
            Some(f) => interp.call(f, Args::new(vec![item.clone()]))?,
            None => item.clone(),
        };
        let replace = match &best {
            None => true,
            Some((best_key, _)) => order(&k, best_key)? == want,
        };
        if replace {
            best = Some((k, item));
        }
    }
    match best {
        Some((_, item)) => Ok(item),
        None => match args.keyword("default") {
            Some(default) => Ok(default.clone()),
            None => Err(ScriptError::value_error(format!(
                "{func}() arg is an empty sequence"
            ))),
        },
    }
}

fn order(a: &Object, b: &Object) -> Result<Ordering, ScriptError> {
    a.compare(b).ok_or_else(|| {
        ScriptError::type_error(format!(
            "'<' not supported between instances of '{}' and '{}'",
            a.type_name(),
            b.type_name()
        ))
    })
}

fn sorted(interp: &mut Interpreter, args: Args) -> Result<Object, ScriptError> {
    let items = interp.iterate(args.required(0, "iterable", "sorted")?)?;
    let key = args.keyword("key").cloned().filter(|k| !matches!(k, Object::None));
    let reverse = args.keyword("reverse").is_some_and(Object::truthy);
    Ok(Object::list(sort_objects(interp, items, key.as_ref(), reverse)?))
}

/// Stable sort with an optional key function. The first comparison error
/// is reported after sorting finishes.
pub(crate) fn sort_objects(
    interp: &mut Interpreter,
    items: Vec<Object>,
    key: Option<&Object>,
    reverse: bool,
) -> Result<Vec<Object>, ScriptError> {
    let mut keyed = Vec::with_capacity(items.len());
    for item in items {
        let k = match key {
            Some(f) => interp.call(f, Args::new(vec![item.clone()]))?,
            None => item.clone(),
        };
        keyed.push((k, item));
    }
    let failure: RefCell<Option<ScriptError>> = RefCell::new(None);
    keyed.sort_by(|(a, _), (b, _)| match order(a, b) {
        Ok(ordering) => {
            if reverse {
                ordering.reverse()
            } else {
                ordering
            }
        }
        Err(err) => {
            failure.borrow_mut().get_or_insert(err);
            Ordering::Equal
        }
    });
    if let Some(err) = failure.into_inner() {
        return Err(err);
    }
    Ok(keyed.into_iter().map(|(_, item)| item).collect())
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
    fn conversions() {
        assert_eq!(eval("int(' 42 ')"), Object::Int(42));
        assert_eq!(eval("int('ff', 16)"), Object::Int(255));
        assert_eq!(eval("int(-2.7)"), Object::Int(-2));
        assert_eq!(eval("float('1.5')"), Object::Float(1.5));
        assert_eq!(eval("str(1.0)"), Object::from("1.0"));
        assert_eq!(eval("bool([])"), Object::Bool(false));
    }

    #[test]
    fn sequences() {
        assert_eq!(eval("len(range(0, 10, 3))"), Object::Int(4));
        assert_eq!(eval("sum([1, 2, 3], 10)"), Object::Int(16));
        assert_eq!(eval("sorted([3, 1, 2], reverse=True)"), eval("[3, 2, 1]"));
        assert_eq!(eval("sorted(['bb', 'a'], key=len)"), eval("['a', 'bb']"));
        assert_eq!(eval("max([1, 5, 3])"), Object::Int(5));
        assert_eq!(eval("min(4, 2, 8)"), Object::Int(2));
        assert_eq!(eval("list(zip([1, 2], 'ab'))"), eval("[(1, 'a'), (2, 'b')]"));
        assert_eq!(eval("dict([('a', 1)], b=2)"), eval("{'a': 1, 'b': 2}"));
    }

    #[test]
    fn isinstance_checks_builtin_types_and_errors() {
        assert_eq!(eval("isinstance('x', str)"), Object::Bool(true));
        assert_eq!(eval("isinstance(1, (str, int))"), Object::Bool(true));
        assert_eq!(eval("isinstance(ValueError('x'), Exception)"), Object::Bool(true));
    }

    #[test]
    fn sorting_mixed_types_fails() {
        let source = "result = sorted([1, 'a'])\n";
        let module = parse_module(source, "wf", "wf.flow").unwrap();
        let mut interp = Interpreter::new(Rc::new(StdHost::new()));
        assert!(interp.exec_module(&module, source).is_err());
    }

    #[test]
    fn range_bounds_near_the_int_limits() {
        assert_eq!(
            eval("range(-9223372036854775807, 9223372036854775807, 9223372036854775807)"),
            eval("[-9223372036854775807, 0]")
        );
        assert_eq!(
            eval("range(9223372036854775807, -9223372036854775807, -9223372036854775807)"),
            eval("[9223372036854775807, 0]")
        );

        let source = "result = range(-9223372036854775807, 9223372036854775807)\n";
        let module = parse_module(source, "wf", "wf.flow").unwrap();
        let mut interp = Interpreter::new(Rc::new(StdHost::new()));
        let err = interp.exec_module(&module, source).err().unwrap();
        assert_eq!(err.kind, crate::script::error::ErrorKind::ValueError);
        assert!(err.message.contains("too large"));
    }
}
