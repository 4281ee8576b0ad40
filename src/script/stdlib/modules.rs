//! Pure host modules: `base64`, `json`, `math`, `re`, `datetime`, `time`,
//! `random`, `env` and `uuid`.

use std::collections::BTreeMap;
use std::rc::Rc;

use base64::Engine;
use chrono::{
    DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Offset, TimeDelta, TimeZone, Utc,
};
use rand::Rng;
use regex::Regex;

use super::{arg_bytes, arg_float, arg_int, arg_str, define, opt_int, opt_str, wrong_type};
use crate::script::error::ScriptError;
use crate::script::interp::Interpreter;
use crate::script::object::{Args, Dict, ModuleObject, Object, Record};
use crate::value::{self, json, Strict};

// ----------------------------------------------------------------------
// base64
// ----------------------------------------------------------------------

pub fn install_base64(module: &ModuleObject) {
    use base64::engine::general_purpose::{STANDARD, URL_SAFE};

    define(module, "b64encode", |_, args| {
        Ok(Object::bytes(STANDARD.encode(arg_bytes(&args, 0, "s", "b64encode")?).as_bytes()))
    });
    define(module, "b64decode", |_, args| {
        STANDARD
            .decode(arg_bytes(&args, 0, "s", "b64decode")?)
            .map(|b| Object::bytes(&b))
            .map_err(|e| ScriptError::value_error(format!("invalid base64: {e}")))
    });
    define(module, "urlsafe_b64encode", |_, args| {
        Ok(Object::bytes(
            URL_SAFE.encode(arg_bytes(&args, 0, "s", "urlsafe_b64encode")?).as_bytes(),
        ))
    });
    define(module, "urlsafe_b64decode", |_, args| {
        URL_SAFE
            .decode(arg_bytes(&args, 0, "s", "urlsafe_b64decode")?)
            .map(|b| Object::bytes(&b))
            .map_err(|e| ScriptError::value_error(format!("invalid base64: {e}")))
    });
}

// ----------------------------------------------------------------------
// json
// ----------------------------------------------------------------------

pub fn install_json(module: &ModuleObject) {
    define(module, "dumps", json_dumps);
    define(module, "loads", json_loads);
}

fn json_dumps(_: &mut Interpreter, args: Args) -> Result<Object, ScriptError> {
    let obj = args.required(0, "obj", "dumps")?;
    let wrapped = value::wrap(obj, &Strict).map_err(|e| ScriptError::type_error(e.to_string()))?;
    let document = json::to_json(&wrapped);
    let indent = opt_int(&args, 1, "indent", "dumps", -1)?;
    let text = if indent >= 0 {
        serde_json::to_string_pretty(&document)
    } else {
        serde_json::to_string(&document)
    }
    .map_err(|e| ScriptError::value_error(e.to_string()))?;
    Ok(Object::from(text))
}

fn json_loads(_: &mut Interpreter, args: Args) -> Result<Object, ScriptError> {
    let text = match args.required(0, "s", "loads")? {
        Object::Str(s) => s.to_string(),
        Object::Bytes(b) => String::from_utf8(b.to_vec())
            .map_err(|e| ScriptError::value_error(format!("invalid utf-8: {e}")))?,
        other => return Err(wrong_type("loads", "s", "str or bytes", other)),
    };
    let document: serde_json::Value = serde_json::from_str(&text)
        .map_err(|e| ScriptError::value_error(format!("invalid JSON: {e}")))?;
    value::unwrap(&json::from_json(&document), &Strict)
        .map_err(|e| ScriptError::value_error(e.to_string()))
}

// ----------------------------------------------------------------------
// math
// ----------------------------------------------------------------------

pub fn install_math(module: &ModuleObject) {
    module.globals.set("pi", Object::Float(std::f64::consts::PI));
    module.globals.set("e", Object::Float(std::f64::consts::E));
    module.globals.set("inf", Object::Float(f64::INFINITY));
    module.globals.set("nan", Object::Float(f64::NAN));

    define(module, "sqrt", |_, args| {
        let x = arg_float(&args, 0, "x", "sqrt")?;
        if x < 0.0 {
            return Err(ScriptError::value_error("math domain error"));
        }
        Ok(Object::Float(x.sqrt()))
    });
    define(module, "floor", |_, args| rounding(args, "floor", f64::floor));
    define(module, "ceil", |_, args| rounding(args, "ceil", f64::ceil));
    define(module, "trunc", |_, args| rounding(args, "trunc", f64::trunc));
    define(module, "fabs", |_, args| Ok(Object::Float(arg_float(&args, 0, "x", "fabs")?.abs())));
    define(module, "exp", |_, args| Ok(Object::Float(arg_float(&args, 0, "x", "exp")?.exp())));
    define(module, "pow", |_, args| {
        let x = arg_float(&args, 0, "x", "pow")?;
        let y = arg_float(&args, 1, "y", "pow")?;
        Ok(Object::Float(x.powf(y)))
    });
    define(module, "log", |_, args| {
        let x = arg_float(&args, 0, "x", "log")?;
        if x <= 0.0 {
            return Err(ScriptError::value_error("math domain error"));
        }
        match args.get(1, "base") {
            None => Ok(Object::Float(x.ln())),
            Some(_) => Ok(Object::Float(x.log(arg_float(&args, 1, "base", "log")?))),
        }
    });
    define(module, "isnan", |_, args| Ok(Object::Bool(arg_float(&args, 0, "x", "isnan")?.is_nan())));
    define(module, "isinf", |_, args| {
        Ok(Object::Bool(arg_float(&args, 0, "x", "isinf")?.is_infinite()))
    });
}

fn rounding(args: Args, func: &str, op: fn(f64) -> f64) -> Result<Object, ScriptError> {
    match args.required(0, "x", func)? {
        Object::Int(n) => Ok(Object::Int(*n)),
        _ => {
            let x = op(arg_float(&args, 0, "x", func)?);
            if !x.is_finite() || x.abs() >= 9.2e18 {
                return Err(ScriptError::value_error(format!("cannot convert {x} to integer")));
            }
            Ok(Object::Int(x as i64))
        }
    }
}

// ----------------------------------------------------------------------
// re
// ----------------------------------------------------------------------

/// Regular expressions in `regex` crate syntax. Matches are returned as
/// `Match` records with `text`, `start`, `end`, `groups` and `named`.
pub fn install_re(module: &ModuleObject) {
    define(module, "match", |_, args| {
        let (pattern, text) = pattern_and_text(&args, "match")?;
        let re = compile(&format!(r"\A(?:{pattern})"))?;
        Ok(re.captures(&text).map_or(Object::None, |c| match_record(&re, &c)))
    });
    define(module, "fullmatch", |_, args| {
        let (pattern, text) = pattern_and_text(&args, "fullmatch")?;
        let re = compile(&format!(r"\A(?:{pattern})\z"))?;
        Ok(re.captures(&text).map_or(Object::None, |c| match_record(&re, &c)))
    });
    define(module, "search", |_, args| {
        let (pattern, text) = pattern_and_text(&args, "search")?;
        let re = compile(&pattern)?;
        Ok(re.captures(&text).map_or(Object::None, |c| match_record(&re, &c)))
    });
    define(module, "findall", |_, args| {
        let (pattern, text) = pattern_and_text(&args, "findall")?;
        let re = compile(&pattern)?;
        let groups = re.captures_len() - 1;
        let found = re
            .captures_iter(&text)
            .map(|caps| match groups {
                0 => group_text(&caps, 0),
                1 => group_text(&caps, 1),
                n => Object::tuple((1..=n).map(|i| group_text(&caps, i)).collect()),
            })
            .collect();
        Ok(Object::list(found))
    });
    define(module, "sub", |_, args| {
        let pattern = arg_str(&args, 0, "pattern", "sub")?;
        let replacement = arg_str(&args, 1, "repl", "sub")?;
        let text = arg_str(&args, 2, "string", "sub")?;
        let count = opt_int(&args, 3, "count", "sub", 0)?;
        let re = compile(&pattern)?;
        let replacement = translate_replacement(&replacement);
        let limit = usize::try_from(count.max(0)).unwrap_or(0);
        Ok(Object::from(re.replacen(&text, limit, replacement.as_str()).into_owned()))
    });
    define(module, "split", |_, args| {
        let (pattern, text) = pattern_and_text(&args, "split")?;
        let re = compile(&pattern)?;
        Ok(Object::list(re.split(&text).map(Object::from).collect()))
    });
    define(module, "escape", |_, args| {
        Ok(Object::from(regex::escape(&arg_str(&args, 0, "pattern", "escape")?)))
    });
}

fn pattern_and_text(args: &Args, func: &str) -> Result<(Rc<str>, Rc<str>), ScriptError> {
    Ok((
        arg_str(args, 0, "pattern", func)?,
        arg_str(args, 1, "string", func)?,
    ))
}

fn compile(pattern: &str) -> Result<Regex, ScriptError> {
    Regex::new(pattern).map_err(|e| ScriptError::value_error(format!("invalid pattern: {e}")))
}

fn group_text(caps: &regex::Captures<'_>, index: usize) -> Object {
    caps.get(index)
        .map_or(Object::None, |m| Object::str(m.as_str()))
}

fn match_record(re: &Regex, caps: &regex::Captures<'_>) -> Object {
    let mut fields = BTreeMap::new();
    let whole = caps.get(0);
    fields.insert("text".into(), group_text(caps, 0));
    fields.insert(
        "start".into(),
        Object::Int(whole.map_or(0, |m| m.start()) as i64),
    );
    fields.insert("end".into(), Object::Int(whole.map_or(0, |m| m.end()) as i64));
    fields.insert(
        "groups".into(),
        Object::tuple((1..caps.len()).map(|i| group_text(caps, i)).collect()),
    );
    let named: Dict = re
        .capture_names()
        .flatten()
        .map(|name| {
            let value = caps.name(name).map_or(Object::None, |m| Object::str(m.as_str()));
            (Object::str(name), value)
        })
        .collect();
    fields.insert("named".into(), Object::dict(named));
    Object::Record(Rc::new(Record {
        type_name: "Match".into(),
        fields,
    }))
}

/// `\1` style group references become `${1}`; literal `$` is escaped.
fn translate_replacement(replacement: &str) -> String {
    let mut out = String::with_capacity(replacement.len());
    let mut chars = replacement.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '$' => out.push_str("$$"),
            '\\' if chars.peek().is_some_and(char::is_ascii_digit) => {
                let mut digits = String::new();
                while let Some(d) = chars.peek().filter(|d| d.is_ascii_digit()) {
                    digits.push(*d);
                    chars.next();
                }
                out.push_str(&format!("${{{digits}}}"));
            }
            c => out.push(c),
        }
    }
    out
}

// ----------------------------------------------------------------------
// datetime
// ----------------------------------------------------------------------

pub fn install_datetime(module: &ModuleObject) {
    define(module, "datetime", datetime_new);
    define(module, "timedelta", timedelta_new);
    define(module, "strptime", strptime);
    define(module, "fromisoformat", fromisoformat);
    define(module, "fromtimestamp", |_, args| {
        let ts = arg_float(&args, 0, "timestamp", "fromtimestamp")?;
        let secs = ts.floor();
        let nanos = ((ts - secs) * 1e9).round() as u32;
        DateTime::from_timestamp(secs as i64, nanos.min(999_999_999))
            .map(|t| Object::DateTime(t.fixed_offset()))
            .ok_or_else(|| ScriptError::value_error("timestamp out of range"))
    });
    define(module, "now", |_, _| Ok(Object::DateTime(Utc::now().fixed_offset())));
    define(module, "utcnow", |_, _| Ok(Object::DateTime(Utc::now().fixed_offset())));
}

fn datetime_new(_: &mut Interpreter, args: Args) -> Result<Object, ScriptError> {
    let func = "datetime";
    let year = arg_int(&args, 0, "year", func)?;
    let month = arg_int(&args, 1, "month", func)?;
    let day = arg_int(&args, 2, "day", func)?;
    let hour = opt_int(&args, 3, "hour", func, 0)?;
    let minute = opt_int(&args, 4, "minute", func, 0)?;
    let second = opt_int(&args, 5, "second", func, 0)?;
    let micro = opt_int(&args, 6, "microsecond", func, 0)?;
    let offset_minutes = opt_int(&args, 7, "utcoffset_minutes", func, 0)?;

    let out_of_range = || ScriptError::value_error("datetime component out of range");
    let to_u32 = |n: i64| u32::try_from(n).map_err(|_| out_of_range());
    let date = NaiveDate::from_ymd_opt(
        i32::try_from(year).map_err(|_| out_of_range())?,
        to_u32(month)?,
        to_u32(day)?,
    )
    .ok_or_else(out_of_range)?;
    let time = NaiveTime::from_hms_micro_opt(to_u32(hour)?, to_u32(minute)?, to_u32(second)?, to_u32(micro)?)
        .ok_or_else(out_of_range)?;
    let offset = i32::try_from(offset_minutes * 60)
        .ok()
        .and_then(FixedOffset::east_opt)
        .ok_or_else(out_of_range)?;
    offset
        .from_local_datetime(&date.and_time(time))
        .single()
        .map(Object::DateTime)
        .ok_or_else(out_of_range)
}

fn timedelta_new(_: &mut Interpreter, args: Args) -> Result<Object, ScriptError> {
    const UNITS: &[(&str, f64)] = &[
        ("days", 86_400e6),
        ("seconds", 1e6),
        ("microseconds", 1.0),
        ("milliseconds", 1e3),
        ("minutes", 60e6),
        ("hours", 3_600e6),
        ("weeks", 604_800e6),
    ];
    let mut micros = 0f64;
    for (index, (name, scale)) in UNITS.iter().enumerate() {
        if let Some(amount) = args.get(index, name) {
            let amount = amount
                .as_float()
                .ok_or_else(|| wrong_type("timedelta", name, "a number", amount))?;
            micros += amount * scale;
        }
    }
    if !micros.is_finite() || micros.abs() > 9.0e18 {
        return Err(ScriptError::value_error("timedelta out of range"));
    }
    Ok(Object::TimeDelta(TimeDelta::microseconds(micros.round() as i64)))
}

fn strptime(_: &mut Interpreter, args: Args) -> Result<Object, ScriptError> {
    let text = arg_str(&args, 0, "date_string", "strptime")?;
    let format = arg_str(&args, 1, "format", "strptime")?;
    let fail = |e: chrono::ParseError| {
        ScriptError::value_error(format!("time data '{text}' does not match format '{format}': {e}"))
    };
    if format.contains("%z") || format.contains("%:z") {
        return DateTime::parse_from_str(&text, &format)
            .map(Object::DateTime)
            .map_err(fail);
    }
    let naive = match NaiveDateTime::parse_from_str(&text, &format) {
        Ok(naive) => naive,
        Err(_) => NaiveDate::parse_from_str(&text, &format)
            .map(|d| d.and_time(NaiveTime::MIN))
            .map_err(fail)?,
    };
    Ok(Object::DateTime(naive.and_utc().fixed_offset()))
}

fn fromisoformat(_: &mut Interpreter, args: Args) -> Result<Object, ScriptError> {
    let text = arg_str(&args, 0, "date_string", "fromisoformat")?;
    if let Ok(t) = DateTime::parse_from_rfc3339(&text) {
        return Ok(Object::DateTime(t));
    }
    let utc = Utc.fix();
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(&text, format) {
            return Ok(Object::DateTime(naive.and_utc().with_timezone(&utc)));
        }
    }
    NaiveDate::parse_from_str(&text, "%Y-%m-%d")
        .map(|d| Object::DateTime(d.and_time(NaiveTime::MIN).and_utc().with_timezone(&utc)))
        .map_err(|_| ScriptError::value_error(format!("invalid isoformat string: '{text}'")))
}

// ----------------------------------------------------------------------
// time
// ----------------------------------------------------------------------

pub fn install_time(module: &ModuleObject) {
    define(module, "time", |_, _| {
        let now = Utc::now();
        Ok(Object::Float(
            now.timestamp() as f64 + f64::from(now.timestamp_subsec_micros()) / 1e6,
        ))
    });
    define(module, "time_ns", |_, _| {
        Utc::now()
            .timestamp_nanos_opt()
            .map(Object::Int)
            .ok_or_else(|| ScriptError::value_error("time out of range"))
    });
    define(module, "monotonic", |_, _| {
        thread_local! {
            static ORIGIN: std::time::Instant = std::time::Instant::now();
        }
        Ok(Object::Float(ORIGIN.with(|origin| origin.elapsed().as_secs_f64())))
    });
}

// ----------------------------------------------------------------------
// random
// ----------------------------------------------------------------------

pub fn install_random(module: &ModuleObject) {
    define(module, "random", |_, _| Ok(Object::Float(rand::rng().random::<f64>())));
    define(module, "randint", |_, args| {
        let a = arg_int(&args, 0, "a", "randint")?;
        let b = arg_int(&args, 1, "b", "randint")?;
        if a > b {
            return Err(ScriptError::value_error(format!("empty range for randint({a}, {b})")));
        }
        Ok(Object::Int(rand::rng().random_range(a..=b)))
    });
    define(module, "uniform", |_, args| {
        let a = arg_float(&args, 0, "a", "uniform")?;
        let b = arg_float(&args, 1, "b", "uniform")?;
        Ok(Object::Float(a + (b - a) * rand::rng().random::<f64>()))
    });
    define(module, "choice", |interp, args| {
        let items = interp.iterate(args.required(0, "seq", "choice")?)?;
        if items.is_empty() {
            return Err(ScriptError::new(
                crate::script::error::ErrorKind::IndexError,
                "cannot choose from an empty sequence",
            ));
        }
        let index = rand::rng().random_range(0..items.len());
        Ok(items[index].clone())
    });
    define(module, "shuffle", |_, args| {
        use rand::seq::SliceRandom;
        match args.required(0, "x", "shuffle")? {
            Object::List(items) => {
                items.borrow_mut().shuffle(&mut rand::rng());
                Ok(Object::None)
            }
            other => Err(wrong_type("shuffle", "x", "list", other)),
        }
    });
}

// ----------------------------------------------------------------------
// env / uuid
// ----------------------------------------------------------------------

pub fn install_env(module: &ModuleObject) {
    define(module, "get", |interp, args| {
        let connection = arg_str(&args, 0, "connection", "get")?;
        let suffix = arg_str(&args, 1, "suffix", "get")?;
        let default = opt_str(&args, 2, "default", "get")?;
        Ok(match interp.host().get_env(&connection, &suffix) {
            Some(value) => Object::from(value),
            None => default.map_or(Object::None, Object::Str),
        })
    });
}

pub fn install_uuid(module: &ModuleObject) {
    define(module, "uuid4", |_, _| Ok(Object::from(uuid::Uuid::new_v4().to_string())));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::interp::StdHost;
    use crate::script::parser::parse_module;

    fn run(source: &str) -> Rc<ModuleObject> {
        let module = parse_module(source, "wf", "wf.flow").unwrap();
        let mut interp = Interpreter::new(Rc::new(StdHost::new()));
        interp.exec_module(&module, source).unwrap()
    }

    #[test]
    fn json_roundtrips_plain_data() {
        let module = run("\
import json
text = json.dumps({'a': [1, 2.5, None, True]})
back = json.loads(text)
");
        assert_eq!(module.get("text").unwrap(), Object::from(r#"{"a":[1,2.5,null,true]}"#));
        let Some(Object::Dict(back)) = module.get("back") else {
            panic!("expected dict");
        };
        assert_eq!(back.borrow().len(), 1);
    }

    #[test]
    fn base64_roundtrip() {
        let module = run("\
import base64
enc = base64.b64encode(b'hello')
dec = base64.b64decode(enc)
");
        assert_eq!(module.get("enc").unwrap(), Object::bytes(b"aGVsbG8="));
        assert_eq!(module.get("dec").unwrap(), Object::bytes(b"hello"));
    }

    #[test]
    fn regex_matches_and_substitutions() {
        let module = run(r#"
import re
m = re.match(r'(\w+)-(\d+)', 'order-42 shipped')
miss = re.match(r'\d+', 'order-42')
nums = re.findall(r'\d+', 'a1 b22 c333')
swapped = re.sub(r'(\w+)@(\w+)', r'\2 at \1', 'me@host')
"#);
        let Some(Object::Record(m)) = module.get("m") else {
            panic!("expected match record");
        };
        assert_eq!(m.fields["text"], Object::from("order-42"));
        assert_eq!(
            m.fields["groups"],
            Object::tuple(vec![Object::from("order"), Object::from("42")])
        );
        assert_eq!(module.get("miss").unwrap(), Object::None);
        assert_eq!(
            module.get("nums").unwrap(),
            Object::list(vec![Object::from("1"), Object::from("22"), Object::from("333")])
        );
        assert_eq!(module.get("swapped").unwrap(), Object::from("host at me"));
    }

    #[test]
    fn datetime_construction_and_arithmetic() {
        let module = run("\
from datetime import datetime, timedelta, fromisoformat
start = datetime(2024, 1, 31, 12)
later = start + timedelta(days=1, hours=2)
parsed = fromisoformat('2024-02-01T14:00:00+00:00')
same = later == parsed
iso = later.isoformat()
");
        assert_eq!(module.get("same").unwrap(), Object::Bool(true));
        assert_eq!(module.get("iso").unwrap(), Object::from("2024-02-01T14:00:00+00:00"));
    }

    #[test]
    fn math_and_random_stay_in_range() {
        let module = run("\
import math
import random
root = math.sqrt(16)
down = math.floor(-1.5)
roll = random.randint(1, 6)
");
        assert_eq!(module.get("root").unwrap(), Object::Float(4.0));
        assert_eq!(module.get("down").unwrap(), Object::Int(-2));
        let roll = module.get("roll").unwrap().as_int().unwrap();
        assert!((1..=6).contains(&roll));
    }

    #[test]
    fn replacement_translation() {
        assert_eq!(translate_replacement(r"\1-$"), "${1}-$$");
    }
}
