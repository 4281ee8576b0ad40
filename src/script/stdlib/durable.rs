//! The `durable` module: activity markers and syscalls into the session
//! host.

use std::collections::BTreeMap;
use std::rc::Rc;

use super::{arg_str, define, opt_str, wrong_type};
use crate::script::error::ScriptError;
use crate::script::interp::{timeout_arg, Interpreter};
use crate::script::object::{Args, ModuleObject, Object, Record};

pub fn install(module: &ModuleObject) {
    define(module, "activity", activity);
    define(module, "register_no_activity", register_no_activity);
    define(module, "sleep", sleep);
    define(module, "subscribe", subscribe);
    define(module, "unsubscribe", unsubscribe);
    define(module, "next_event", next_event);
    define(module, "signal", signal);
    define(module, "next_signal", next_signal);
    define(module, "store_get", |interp, args| {
        let key = arg_str(&args, 0, "key", "store_get")?;
        store(interp, &key, "get", Vec::new())
    });
    define(module, "store_set", |interp, args| {
        let key = arg_str(&args, 0, "key", "store_set")?;
        let value = interp.wrap(args.required(1, "value", "store_set")?)?;
        store(interp, &key, "set", vec![value])
    });
    define(module, "store_del", |interp, args| {
        let key = arg_str(&args, 0, "key", "store_del")?;
        store(interp, &key, "del", Vec::new())
    });
    define(module, "store_add", |interp, args| {
        let key = arg_str(&args, 0, "key", "store_add")?;
        let amount = interp.wrap(args.get(1, "amount").unwrap_or(&Object::Int(1)))?;
        store(interp, &key, "add", vec![amount])
    });
    define(module, "store_list", |interp, _| {
        let keys = interp.host().store_list()?;
        Ok(Object::list(keys.into_iter().map(Object::from).collect()))
    });
    define(module, "log", |interp, args| {
        let message = args.required(0, "message", "log")?.to_display();
        let level = opt_str(&args, 1, "level", "log")?;
        interp
            .host()
            .log(level.as_deref().unwrap_or("info"), &message)?;
        Ok(Object::None)
    });
}

/// `@activity`: always dispatch calls to this function or class as an
/// activity.
fn activity(_: &mut Interpreter, args: Args) -> Result<Object, ScriptError> {
    let target = args.required(0, "func", "activity")?;
    match target {
        Object::Function(f) => f.activity.set(true),
        Object::Class(c) => c.activity.set(true),
        other => return Err(wrong_type("activity", "func", "a function or class", other)),
    }
    Ok(target.clone())
}

/// Mark a callable as safe to run inline. Returns its argument so it can be
/// used as a decorator.
fn register_no_activity(interp: &mut Interpreter, args: Args) -> Result<Object, ScriptError> {
    let target = args.required(0, "func", "register_no_activity")?;
    let call_target = target.call_target().ok_or_else(|| {
        wrong_type("register_no_activity", "func", "callable", target)
    })?;
    interp.host().register_no_activity(&call_target.qualified_name());
    Ok(target.clone())
}

fn sleep(interp: &mut Interpreter, args: Args) -> Result<Object, ScriptError> {
    let duration = timeout_arg(Some(args.required(0, "seconds", "sleep")?), "sleep")?;
    interp.host().sleep(duration.unwrap_or_default())?;
    Ok(Object::None)
}

fn subscribe(interp: &mut Interpreter, args: Args) -> Result<Object, ScriptError> {
    let connection = arg_str(&args, 0, "connection", "subscribe")?;
    let filter = opt_str(&args, 1, "filter", "subscribe")?;
    let id = interp
        .host()
        .subscribe(&connection, filter.as_deref().unwrap_or(""))?;
    Ok(Object::from(id))
}

fn unsubscribe(interp: &mut Interpreter, args: Args) -> Result<Object, ScriptError> {
    let id = arg_str(&args, 0, "subscription_id", "unsubscribe")?;
    interp.host().unsubscribe(&id)?;
    Ok(Object::None)
}

/// A single string or an iterable of strings.
fn names(interp: &Interpreter, obj: &Object, func: &str, param: &str) -> Result<Vec<String>, ScriptError> {
    if let Object::Str(s) = obj {
        return Ok(vec![s.to_string()]);
    }
    interp
        .iterate(obj)?
        .into_iter()
        .map(|item| match item {
            Object::Str(s) => Ok(s.to_string()),
            other => Err(wrong_type(func, param, "str or a list of str", &other)),
        })
        .collect()
}

fn next_event(interp: &mut Interpreter, args: Args) -> Result<Object, ScriptError> {
    let ids = names(
        interp,
        args.required(0, "subscription_ids", "next_event")?,
        "next_event",
        "subscription_ids",
    )?;
    let timeout = timeout_arg(args.get(1, "timeout"), "next_event")?;
    match interp.host().next_event(&ids, timeout)? {
        Some(data) => interp.unwrap(&data),
        None => Ok(Object::None),
    }
}

fn signal(interp: &mut Interpreter, args: Args) -> Result<Object, ScriptError> {
    let session_id = arg_str(&args, 0, "session_id", "signal")?;
    let name = arg_str(&args, 1, "name", "signal")?;
    let payload = interp.wrap(args.get(2, "payload").unwrap_or(&Object::None))?;
    interp.host().signal(&session_id, &name, payload)?;
    Ok(Object::None)
}

fn next_signal(interp: &mut Interpreter, args: Args) -> Result<Object, ScriptError> {
    let wanted = names(
        interp,
        args.required(0, "names", "next_signal")?,
        "next_signal",
        "names",
    )?;
    let timeout = timeout_arg(args.get(1, "timeout"), "next_signal")?;
    let Some(signal) = interp.host().next_signal(&wanted, timeout)? else {
        return Ok(Object::None);
    };
    let mut fields = BTreeMap::new();
    fields.insert("name".to_string(), Object::from(signal.name));
    fields.insert("payload".to_string(), interp.unwrap(&signal.payload)?);
    Ok(Object::Record(Rc::new(Record {
        type_name: "Signal".into(),
        fields,
    })))
}

fn store(
    interp: &mut Interpreter,
    key: &str,
    operation: &str,
    operands: Vec<crate::value::Value>,
) -> Result<Object, ScriptError> {
    let result = interp.host().store_mutate(key, operation, operands)?;
    interp.unwrap(&result)
}

#[cfg(test)]
mod tests {
    use crate::script::error::ErrorKind;
    use crate::script::interp::{Interpreter, StdHost};
    use crate::script::object::Object;
    use crate::script::parser::parse_module;
    use std::rc::Rc;

    fn run(source: &str) -> Result<Rc<crate::script::object::ModuleObject>, crate::script::error::ScriptError> {
        let module = parse_module(source, "wf", "wf.flow").unwrap();
        let mut interp = Interpreter::new(Rc::new(StdHost::new()));
        interp.exec_module(&module, source)
    }

    #[test]
    fn activity_marks_functions() {
        let module = run("\
import durable

@durable.activity
def charge(amount):
    return amount
").unwrap();
        let target = module.get("charge").unwrap().call_target().unwrap();
        assert!(target.activity);
    }

    #[test]
    fn store_operations_use_the_host_store() {
        let module = run("\
import durable
durable.store_set('count', 1)
durable.store_add('count', 4)
count = durable.store_get('count')
keys = durable.store_list()
").unwrap();
        assert_eq!(module.get("count").unwrap(), Object::Int(5));
        assert_eq!(module.get("keys").unwrap(), Object::list(vec![Object::from("count")]));
    }

    #[test]
    fn malformed_timeouts_are_usage_errors() {
        let err = run("import durable\ndurable.sleep('soon')\n").err().unwrap();
        assert_eq!(err.kind, ErrorKind::UsageError);
    }

    #[test]
    fn waits_need_a_session() {
        let err = run("import durable\ndurable.next_signal('go')\n").err().unwrap();
        assert_eq!(err.kind, ErrorKind::RuntimeError);
    }
}
