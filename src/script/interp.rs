//! Tree-walking interpreter for workflow scripts.
//!
//! Every call expression goes through [`Interpreter::call`]. Instrumented
//! code routes calls through the `__hook__` builtin instead, which hands
//! them to the installed [`CallHook`].

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use std::time::Duration;

use chrono::TimeDelta;

use super::ast::{self, BinOp, BoolOp, CmpOp, Const, Expr, ExprKind, Stmt, StmtKind, UnaryOp};
use super::error::{ErrorKind, Frame, ScriptError};
use super::object::{
    Args, BoundMethod, Class, Dict, Env, Function, Instance, ModuleObject, Object,
};
use super::stdlib::{self, http::HttpRequest, http::HttpResponse};
use crate::comm::Signal;
use crate::value::{self, Extension, Strict, Value};

/// Name of the builtin the instrumenter routes calls through.
pub const HOOK_NAME: &str = "__hook__";

const MAX_DEPTH: usize = 200;

/// Receives every instrumented call.
pub trait CallHook {
    fn dispatch(
        &self,
        interp: &mut Interpreter,
        callee: Object,
        args: Args,
    ) -> Result<Object, ScriptError>;
}

/// Parsed source for a user module, ready to execute.
pub struct LoadedSource {
    pub module: ast::Module,
    pub source: String,
}

/// Resolves `import name` for modules that are not host modules.
pub trait SourceLoader {
    fn load(&self, name: &str) -> Result<Option<LoadedSource>, ScriptError>;
}

/// Services the host modules call into. Inside a session these become
/// worker RPCs.
pub trait Host {
    fn print(&self, text: &str) -> Result<(), ScriptError>;
    fn log(&self, level: &str, message: &str) -> Result<(), ScriptError>;
    fn sleep(&self, duration: Duration) -> Result<(), ScriptError>;
    fn subscribe(&self, connection: &str, filter: &str) -> Result<String, ScriptError>;
    fn unsubscribe(&self, subscription_id: &str) -> Result<(), ScriptError>;
    fn next_event(
        &self,
        subscription_ids: &[String],
        timeout: Option<Duration>,
    ) -> Result<Option<Value>, ScriptError>;
    fn signal(&self, session_id: &str, name: &str, payload: Value) -> Result<(), ScriptError>;
    fn next_signal(
        &self,
        names: &[String],
        timeout: Option<Duration>,
    ) -> Result<Option<Signal>, ScriptError>;
    fn store_mutate(
        &self,
        key: &str,
        operation: &str,
        operands: Vec<Value>,
    ) -> Result<Value, ScriptError>;
    fn store_list(&self) -> Result<Vec<String>, ScriptError>;
    fn register_no_activity(&self, qualified_name: &str);
    fn get_env(&self, connection: &str, suffix: &str) -> Option<String>;
    fn http_request(&self, request: HttpRequest) -> Result<HttpResponse, ScriptError>;
}

struct FrameState {
    file: Rc<str>,
    function: Rc<str>,
    line: Cell<u32>,
}

enum Flow {
    Normal,
    Return(Object),
    Break,
    Continue,
}

#[derive(Clone)]
struct Scope {
    env: Rc<Env>,
    globals: Rc<Env>,
    module: Rc<str>,
    file: Rc<str>,
    /// Qualified-name prefix for definitions in this scope.
    prefix: Option<String>,
    class_body: bool,
}

impl Scope {
    fn is_module_level(&self) -> bool {
        Rc::ptr_eq(&self.env, &self.globals)
    }

    fn qualify(&self, name: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}.{name}"),
            None => name.to_string(),
        }
    }
}

pub struct Interpreter {
    builtins: Rc<Env>,
    modules: HashMap<String, Rc<ModuleObject>>,
    loader: Option<Rc<dyn SourceLoader>>,
    hook: Option<Rc<dyn CallHook>>,
    host: Rc<dyn Host>,
    extension: Rc<dyn Extension>,
    sources: HashMap<String, Rc<Vec<String>>>,
    stack: Vec<FrameState>,
    /// Errors currently being handled, for bare `raise`.
    handling: Vec<ScriptError>,
}

impl Interpreter {
    pub fn new(host: Rc<dyn Host>) -> Self {
        let builtins = Env::new(None);
        stdlib::builtins::install(&builtins);
        Self {
            builtins,
            modules: HashMap::new(),
            loader: None,
            hook: None,
            host,
            extension: Rc::new(Strict),
            sources: HashMap::new(),
            stack: Vec::new(),
            handling: Vec::new(),
        }
    }

    pub fn set_hook(&mut self, hook: Rc<dyn CallHook>) {
        self.hook = Some(hook);
    }

    pub fn set_loader(&mut self, loader: Rc<dyn SourceLoader>) {
        self.loader = Some(loader);
    }

    pub fn set_extension(&mut self, extension: Rc<dyn Extension>) {
        self.extension = extension;
    }

    pub fn host(&self) -> Rc<dyn Host> {
        self.host.clone()
    }

    pub fn wrap(&self, obj: &Object) -> Result<Value, ScriptError> {
        value::wrap(obj, self.extension.as_ref()).map_err(|e| ScriptError::type_error(e.to_string()))
    }

    pub fn unwrap(&self, value: &Value) -> Result<Object, ScriptError> {
        value::unwrap(value, self.extension.as_ref())
            .map_err(|e| ScriptError::type_error(e.to_string()))
    }

    /// `file:line` of the statement or call currently executing.
    pub fn location(&self) -> String {
        match self.stack.last() {
            Some(frame) => format!("{}:{}", frame.file, frame.line.get()),
            None => "<unknown>".to_string(),
        }
    }

    pub fn builtin(&self, name: &str) -> Option<Object> {
        self.builtins.get(name)
    }

    /// Execute a parsed module and register it under its name.
    pub fn exec_module(
        &mut self,
        module: &ast::Module,
        source: &str,
    ) -> Result<Rc<ModuleObject>, ScriptError> {
        self.sources.insert(
            module.file.clone(),
            Rc::new(source.lines().map(str::to_string).collect()),
        );
        let object = ModuleObject::new(module.name.clone(), module.file.clone());
        object
            .globals
            .set("__name__", Object::str(&module.name));
        self.modules.insert(module.name.clone(), object.clone());

        let scope = Scope {
            env: object.globals.clone(),
            globals: object.globals.clone(),
            module: Rc::from(module.name.as_str()),
            file: Rc::from(module.file.as_str()),
            prefix: None,
            class_body: false,
        };
        self.stack.push(FrameState {
            file: scope.file.clone(),
            function: Rc::from("<module>"),
            line: Cell::new(1),
        });
        let result = self.exec_block(&module.body, &scope);
        let frame = self.stack.pop();
        if let Err(mut err) = result {
            self.modules.remove(&module.name);
            if let Some(frame) = frame {
                err.push_frame(self.frame_record(&frame));
            }
            return Err(err);
        }
        Ok(object)
    }

    pub fn import(&mut self, name: &str) -> Result<Rc<ModuleObject>, ScriptError> {
        if let Some(module) = self.modules.get(name) {
            return Ok(module.clone());
        }
        if let Some(module) = stdlib::host_module(name) {
            self.modules.insert(name.to_string(), module.clone());
            return Ok(module);
        }
        let loaded = match &self.loader {
            Some(loader) => loader.clone().load(name)?,
            None => None,
        };
        match loaded {
            Some(loaded) => self.exec_module(&loaded.module, &loaded.source),
            None => Err(ScriptError::new(
                ErrorKind::ImportError,
                format!("no module named '{name}'"),
            )),
        }
    }

    /// Route a call through the installed hook; without one, call directly.
    pub fn dispatch(&mut self, callee: Object, args: Args) -> Result<Object, ScriptError> {
        match self.hook.clone() {
            Some(hook) => hook.dispatch(self, callee, args),
            None => {
                if !callee.is_callable() {
                    return Err(ScriptError::usage(format!(
                        "'{}' object is not callable ({})",
                        callee.type_name(),
                        self.location()
                    )));
                }
                self.call(&callee, args)
            }
        }
    }

    /// Invoke a callable directly, bypassing the hook.
    pub fn call(&mut self, callee: &Object, args: Args) -> Result<Object, ScriptError> {
        match callee {
            Object::Function(func) => self.call_function(func, None, args),
            Object::Native(native) => (native.func)(self, args),
            Object::BoundMethod(method) => match &method.func {
                Object::Function(func) => {
                    self.call_function(func, Some(method.receiver.clone()), args)
                }
                Object::Native(native) => {
                    let mut args = args;
                    args.positional.insert(0, method.receiver.clone());
                    (native.func)(self, args)
                }
                other => self.call(other, args),
            },
            Object::Class(class) => self.instantiate(class, args),
            other => Err(ScriptError::type_error(format!(
                "'{}' object is not callable",
                other.type_name()
            ))),
        }
    }

    fn call_function(
        &mut self,
        func: &Rc<Function>,
        receiver: Option<Object>,
        args: Args,
    ) -> Result<Object, ScriptError> {
        if self.stack.len() >= MAX_DEPTH {
            return Err(ScriptError::runtime("maximum recursion depth exceeded"));
        }
        let env = Env::new(func.closure.clone());
        bind_params(func, receiver, args, &env)?;
        let scope = Scope {
            env,
            globals: func.globals.clone(),
            module: func.module.clone(),
            file: func.file.clone(),
            prefix: Some(format!("{}.<locals>", func.qualname)),
            class_body: false,
        };
        self.stack.push(FrameState {
            file: func.file.clone(),
            function: Rc::from(func.qualname.as_str()),
            line: Cell::new(func.line),
        });
        let result = self.exec_block(&func.def.body, &scope);
        let frame = self.stack.pop();
        match result {
            Ok(Flow::Return(value)) => Ok(value),
            Ok(_) => Ok(Object::None),
            Err(mut err) => {
                if let Some(frame) = frame {
                    err.push_frame(self.frame_record(&frame));
                }
                Err(err)
            }
        }
    }

    fn instantiate(&mut self, class: &Rc<Class>, args: Args) -> Result<Object, ScriptError> {
        let fields: BTreeMap<String, Object> = class.fields.iter().cloned().collect();
        let instance = Rc::new(Instance {
            class: class.clone(),
            fields: RefCell::new(fields),
        });
        let object = Object::Instance(instance.clone());
        if let Some(Object::Function(init)) = class.methods.get("__init__") {
            self.call_function(init, Some(object.clone()), args)?;
            return Ok(object);
        }

        // Field-wise constructor: positionals in declaration order, then keywords.
        if args.positional.len() > class.fields.len() {
            return Err(ScriptError::type_error(format!(
                "{}() takes {} positional arguments but {} were given",
                class.name,
                class.fields.len(),
                args.positional.len()
            )));
        }
        let mut fields = instance.fields.borrow_mut();
        for ((name, _), value) in class.fields.iter().zip(args.positional) {
            fields.insert(name.clone(), value);
        }
        for (name, value) in args.keywords {
            if !class.fields.iter().any(|(field, _)| *field == name) {
                return Err(ScriptError::type_error(format!(
                    "{}() got an unexpected keyword argument '{name}'",
                    class.name
                )));
            }
            fields.insert(name, value);
        }
        drop(fields);
        Ok(object)
    }

    fn frame_record(&self, frame: &FrameState) -> Frame {
        let line = frame.line.get();
        let source = self
            .sources
            .get(&*frame.file)
            .and_then(|lines| lines.get(line.saturating_sub(1) as usize))
            .map(|s| s.trim().to_string())
            .unwrap_or_default();
        Frame {
            file: frame.file.to_string(),
            line,
            source,
            function: frame.function.to_string(),
        }
    }

    fn set_line(&self, line: u32) {
        if let Some(frame) = self.stack.last() {
            frame.line.set(line);
        }
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn exec_block(&mut self, body: &[Stmt], scope: &Scope) -> Result<Flow, ScriptError> {
        for stmt in body {
            match self.exec_stmt(stmt, scope)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, stmt: &Stmt, scope: &Scope) -> Result<Flow, ScriptError> {
        self.set_line(stmt.line);
        match &stmt.kind {
            StmtKind::Expr(expr) => {
                self.eval(expr, scope)?;
            }
            StmtKind::Assign { target, value } => {
                let value = self.eval(value, scope)?;
                self.assign(target, value, scope)?;
            }
            StmtKind::AugAssign { target, op, value } => {
                let current = self.eval(target, scope)?;
                let rhs = self.eval(value, scope)?;
                let updated = match (*op, &current) {
                    // In-place extend keeps list identity.
                    (BinOp::Add, Object::List(items)) => {
                        let extra = self.iterate(&rhs)?;
                        items.borrow_mut().extend(extra);
                        current.clone()
                    }
                    _ => binary_op(*op, &current, &rhs)?,
                };
                self.assign(target, updated, scope)?;
            }
            StmtKind::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr, scope)?,
                    None => Object::None,
                };
                return Ok(Flow::Return(value));
            }
            StmtKind::If { test, body, orelse } => {
                let branch = if self.eval(test, scope)?.truthy() {
                    body
                } else {
                    orelse
                };
                return self.exec_block(branch, scope);
            }
            StmtKind::While { test, body } => {
                while self.eval(test, scope)?.truthy() {
                    match self.exec_block(body, scope)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
            }
            StmtKind::For { target, iter, body } => {
                let iterable = self.eval(iter, scope)?;
                for item in self.iterate(&iterable)? {
                    self.assign(target, item, scope)?;
                    match self.exec_block(body, scope)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
            }
            StmtKind::Def(def) => {
                let func = self.make_function(def, stmt.line, scope)?;
                let func = self.decorate(func, &def.decorators, scope)?;
                scope.env.set(def.name.clone(), func);
            }
            StmtKind::Class(class) => {
                let object = self.make_class(class, scope)?;
                let object = self.decorate(object, &class.decorators, scope)?;
                scope.env.set(class.name.clone(), object);
            }
            StmtKind::Try { body, handlers } => return self.exec_try(body, handlers, scope),
            StmtKind::Raise(value) => {
                let err = match value {
                    None => self.handling.last().cloned().ok_or_else(|| {
                        ScriptError::runtime("no active exception to re-raise")
                    })?,
                    Some(expr) => match self.eval(expr, scope)? {
                        Object::Exception(err) => {
                            let mut err = (*err).clone();
                            err.traceback.clear();
                            err
                        }
                        Object::Native(native) => match ErrorKind::parse(&native.name) {
                            Some(kind) => ScriptError::new(kind, ""),
                            None => {
                                return Err(ScriptError::type_error(
                                    "exceptions must be created from an error type",
                                ))
                            }
                        },
                        other => {
                            return Err(ScriptError::type_error(format!(
                                "exceptions must be created from an error type, not '{}'",
                                other.type_name()
                            )))
                        }
                    },
                };
                return Err(err);
            }
            StmtKind::Import { module, alias } => {
                let object = self.import(module)?;
                let name = match alias {
                    Some(alias) => alias.clone(),
                    None if module.contains('.') => {
                        return Err(ScriptError::new(
                            ErrorKind::ImportError,
                            format!("use 'import {module} as name' for dotted modules"),
                        ))
                    }
                    None => module.clone(),
                };
                scope.env.set(name, Object::Module(object));
            }
            StmtKind::FromImport { module, names } => {
                let object = self.import(module)?;
                for (name, alias) in names {
                    let value = object.get(name).ok_or_else(|| {
                        ScriptError::new(
                            ErrorKind::ImportError,
                            format!("cannot import name '{name}' from '{module}'"),
                        )
                    })?;
                    scope
                        .env
                        .set(alias.clone().unwrap_or_else(|| name.clone()), value);
                }
            }
            StmtKind::Break => return Ok(Flow::Break),
            StmtKind::Continue => return Ok(Flow::Continue),
            StmtKind::Pass => {}
        }
        Ok(Flow::Normal)
    }

    fn exec_try(
        &mut self,
        body: &[Stmt],
        handlers: &[ast::Handler],
        scope: &Scope,
    ) -> Result<Flow, ScriptError> {
        let err = match self.exec_block(body, scope) {
            Ok(flow) => return Ok(flow),
            Err(err) => err,
        };
        for handler in handlers {
            let matches = match &handler.kind {
                None => true,
                Some(kind) => kind == "Exception" || kind == err.kind.name(),
            };
            if !matches {
                continue;
            }
            self.set_line(handler.line);
            if let Some(name) = &handler.name {
                scope
                    .env
                    .set(name.clone(), Object::Exception(Rc::new(err.clone())));
            }
            self.handling.push(err);
            let result = self.exec_block(&handler.body, scope);
            self.handling.pop();
            return result;
        }
        Err(err)
    }

    fn make_function(
        &mut self,
        def: &Rc<ast::FunctionDef>,
        line: u32,
        scope: &Scope,
    ) -> Result<Object, ScriptError> {
        let mut defaults = Vec::with_capacity(def.params.len());
        for param in &def.params {
            defaults.push(match &param.default {
                Some(expr) => Some(self.eval(expr, scope)?),
                None => None,
            });
        }
        let closure = if scope.is_module_level() || scope.class_body {
            None
        } else {
            Some(scope.env.clone())
        };
        Ok(Object::Function(Rc::new(Function {
            name: def.name.clone(),
            qualname: scope.qualify(&def.name),
            module: scope.module.clone(),
            file: scope.file.clone(),
            line,
            def: def.clone(),
            defaults,
            globals: scope.globals.clone(),
            closure,
            activity: Cell::new(false),
        })))
    }

    fn make_class(&mut self, class: &ast::ClassDef, scope: &Scope) -> Result<Object, ScriptError> {
        let body_scope = Scope {
            env: Env::new(None),
            globals: scope.globals.clone(),
            module: scope.module.clone(),
            file: scope.file.clone(),
            prefix: Some(scope.qualify(&class.name)),
            class_body: true,
        };
        self.exec_block(&class.body, &body_scope)?;

        let vars = body_scope.env.vars.borrow();
        let mut fields = Vec::new();
        let mut methods = HashMap::new();
        for stmt in &class.body {
            match &stmt.kind {
                StmtKind::Assign { target, .. } => {
                    if let ExprKind::Name(name) = &target.kind {
                        if let Some(value) = vars.get(name) {
                            if !fields.iter().any(|(f, _): &(String, Object)| f == name) {
                                fields.push((name.clone(), value.clone()));
                            }
                        }
                    }
                }
                StmtKind::Def(def) => {
                    if let Some(value) = vars.get(&def.name) {
                        methods.insert(def.name.clone(), value.clone());
                    }
                }
                _ => {}
            }
        }
        Ok(Object::Class(Rc::new(Class {
            name: class.name.clone(),
            module: scope.module.clone(),
            fields,
            methods,
            activity: Cell::new(false),
        })))
    }

    fn decorate(
        &mut self,
        target: Object,
        decorators: &[Expr],
        scope: &Scope,
    ) -> Result<Object, ScriptError> {
        let mut resolved = Vec::with_capacity(decorators.len());
        for decorator in decorators {
            resolved.push(self.eval(decorator, scope)?);
        }
        let mut target = target;
        for decorator in resolved.iter().rev() {
            target = self.call(decorator, Args::new(vec![target]))?;
        }
        Ok(target)
    }

    fn assign(&mut self, target: &Expr, value: Object, scope: &Scope) -> Result<(), ScriptError> {
        match &target.kind {
            ExprKind::Name(name) => {
                scope.env.set(name.clone(), value);
                Ok(())
            }
            ExprKind::Attribute { value: obj, attr } => {
                let obj = self.eval(obj, scope)?;
                set_attr(&obj, attr, value)
            }
            ExprKind::Subscript { value: obj, index } => {
                let obj = self.eval(obj, scope)?;
                let index = self.eval(index, scope)?;
                set_item(&obj, index, value)
            }
            ExprKind::Tuple(targets) | ExprKind::List(targets) => {
                let items = self.iterate(&value)?;
                if items.len() != targets.len() {
                    return Err(ScriptError::value_error(format!(
                        "expected {} values to unpack, got {}",
                        targets.len(),
                        items.len()
                    )));
                }
                for (target, item) in targets.iter().zip(items) {
                    self.assign(target, item, scope)?;
                }
                Ok(())
            }
            _ => Err(ScriptError::usage("cannot assign to expression")),
        }
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn lookup(&self, name: &str, scope: &Scope) -> Result<Object, ScriptError> {
        scope
            .env
            .get(name)
            .or_else(|| scope.globals.get(name))
            .or_else(|| self.builtins.get(name))
            .ok_or_else(|| {
                ScriptError::new(
                    ErrorKind::NameError,
                    format!("name '{name}' is not defined"),
                )
            })
    }

    fn eval(&mut self, expr: &Expr, scope: &Scope) -> Result<Object, ScriptError> {
        match &expr.kind {
            ExprKind::Name(name) => self.lookup(name, scope),
            ExprKind::Const(c) => Ok(match c {
                Const::None => Object::None,
                Const::Bool(b) => Object::Bool(*b),
                Const::Int(n) => Object::Int(*n),
                Const::Float(x) => Object::Float(*x),
                Const::Str(s) => Object::str(s),
                Const::Bytes(b) => Object::bytes(b),
            }),
            ExprKind::List(items) => Ok(Object::list(self.eval_all(items, scope)?)),
            ExprKind::Tuple(items) => Ok(Object::tuple(self.eval_all(items, scope)?)),
            ExprKind::Set(items) => Ok(Object::set(self.eval_all(items, scope)?)),
            ExprKind::Dict(entries) => {
                let mut dict = Dict::new();
                for (k, v) in entries {
                    let key = self.eval(k, scope)?;
                    let value = self.eval(v, scope)?;
                    dict.insert(key, value);
                }
                Ok(Object::dict(dict))
            }
            ExprKind::Attribute { value, attr } => {
                let obj = self.eval(value, scope)?;
                self.get_attr(&obj, attr)
            }
            ExprKind::Subscript { value, index } => {
                let obj = self.eval(value, scope)?;
                if let ExprKind::Slice { lower, upper } = &index.kind {
                    let lower = match lower {
                        Some(e) => Some(self.eval(e, scope)?),
                        None => None,
                    };
                    let upper = match upper {
                        Some(e) => Some(self.eval(e, scope)?),
                        None => None,
                    };
                    return slice(&obj, lower.as_ref(), upper.as_ref());
                }
                let index = self.eval(index, scope)?;
                get_item(&obj, &index)
            }
            ExprKind::Slice { .. } => Err(ScriptError::usage("slice outside of a subscript")),
            ExprKind::Call { func, args, kwargs } => {
                let callee = self.eval(func, scope)?;
                let positional = self.eval_all(args, scope)?;
                let mut keywords = Vec::with_capacity(kwargs.len());
                for kw in kwargs {
                    keywords.push((kw.name.clone(), self.eval(&kw.value, scope)?));
                }
                self.set_line(expr.line);
                self.call(
                    &callee,
                    Args {
                        positional,
                        keywords,
                    },
                )
            }
            ExprKind::BinOp { left, op, right } => {
                let l = self.eval(left, scope)?;
                let r = self.eval(right, scope)?;
                binary_op(*op, &l, &r)
            }
            ExprKind::Unary { op, operand } => {
                let value = self.eval(operand, scope)?;
                match (op, &value) {
                    (UnaryOp::Not, v) => Ok(Object::Bool(!v.truthy())),
                    (UnaryOp::Neg, Object::Int(n)) => n
                        .checked_neg()
                        .map(Object::Int)
                        .ok_or_else(|| ScriptError::value_error("integer overflow")),
                    (UnaryOp::Neg, Object::Float(x)) => Ok(Object::Float(-x)),
                    (UnaryOp::Neg, Object::TimeDelta(d)) => Ok(Object::TimeDelta(-*d)),
                    (UnaryOp::Pos, Object::Int(_) | Object::Float(_)) => Ok(value.clone()),
                    (op, v) => Err(ScriptError::type_error(format!(
                        "bad operand type for unary {}: '{}'",
                        match op {
                            UnaryOp::Neg => "-",
                            UnaryOp::Pos => "+",
                            UnaryOp::Not => "not",
                        },
                        v.type_name()
                    ))),
                }
            }
            ExprKind::BoolOp { op, left, right } => {
                let l = self.eval(left, scope)?;
                match (op, l.truthy()) {
                    (BoolOp::And, false) | (BoolOp::Or, true) => Ok(l),
                    _ => self.eval(right, scope),
                }
            }
            ExprKind::Compare { left, ops } => {
                let mut l = self.eval(left, scope)?;
                for (op, right) in ops {
                    let r = self.eval(right, scope)?;
                    if !compare(*op, &l, &r)? {
                        return Ok(Object::Bool(false));
                    }
                    l = r;
                }
                Ok(Object::Bool(true))
            }
            ExprKind::IfExp { test, body, orelse } => {
                if self.eval(test, scope)?.truthy() {
                    self.eval(body, scope)
                } else {
                    self.eval(orelse, scope)
                }
            }
        }
    }

    fn eval_all(&mut self, exprs: &[Expr], scope: &Scope) -> Result<Vec<Object>, ScriptError> {
        exprs.iter().map(|e| self.eval(e, scope)).collect()
    }

    pub fn get_attr(&mut self, obj: &Object, name: &str) -> Result<Object, ScriptError> {
        let found = match obj {
            Object::Module(module) => module.get(name),
            Object::Instance(instance) => {
                let field = instance.fields.borrow().get(name).cloned();
                field.or_else(|| {
                    instance.class.methods.get(name).map(|method| {
                        Object::BoundMethod(Rc::new(BoundMethod {
                            receiver: obj.clone(),
                            func: method.clone(),
                        }))
                    })
                })
            }
            Object::Class(class) => class.methods.get(name).cloned().or_else(|| {
                class
                    .fields
                    .iter()
                    .find(|(field, _)| field == name)
                    .map(|(_, v)| v.clone())
            }),
            Object::Record(record) => record.fields.get(name).cloned(),
            _ => None,
        };
        if let Some(found) = found {
            return Ok(found);
        }
        if let Some(value) = stdlib::types::attribute(obj, name) {
            return Ok(value);
        }
        if let Some(method) = stdlib::types::method(obj, name) {
            return Ok(Object::BoundMethod(Rc::new(BoundMethod {
                receiver: obj.clone(),
                func: Object::Native(method),
            })));
        }
        Err(ScriptError::new(
            ErrorKind::AttributeError,
            format!("'{}' object has no attribute '{name}'", obj.type_name()),
        ))
    }

    /// Materialize an iterable into its items.
    pub fn iterate(&self, obj: &Object) -> Result<Vec<Object>, ScriptError> {
        match obj {
            Object::List(items) | Object::Set(items) => Ok(items.borrow().clone()),
            Object::Tuple(items) => Ok(items.to_vec()),
            Object::Dict(dict) => Ok(dict.borrow().keys()),
            Object::Str(s) => Ok(s.chars().map(|c| Object::from(c.to_string())).collect()),
            Object::Bytes(b) => Ok(b.iter().map(|x| Object::Int(i64::from(*x))).collect()),
            other => Err(ScriptError::type_error(format!(
                "'{}' object is not iterable",
                other.type_name()
            ))),
        }
    }
}

fn bind_params(
    func: &Function,
    receiver: Option<Object>,
    args: Args,
    env: &Env,
) -> Result<(), ScriptError> {
    let params = &func.def.params;
    let mut positional: Vec<Object> = receiver.into_iter().collect();
    positional.extend(args.positional);
    if positional.len() > params.len() {
        return Err(ScriptError::type_error(format!(
            "{}() takes {} positional arguments but {} were given",
            func.name,
            params.len(),
            positional.len()
        )));
    }
    let mut bound: Vec<Option<Object>> = vec![None; params.len()];
    for (slot, value) in bound.iter_mut().zip(positional) {
        *slot = Some(value);
    }
    for (name, value) in args.keywords {
        let index = params.iter().position(|p| p.name == name).ok_or_else(|| {
            ScriptError::type_error(format!(
                "{}() got an unexpected keyword argument '{name}'",
                func.name
            ))
        })?;
        if bound[index].is_some() {
            return Err(ScriptError::type_error(format!(
                "{}() got multiple values for argument '{name}'",
                func.name
            )));
        }
        bound[index] = Some(value);
    }
    for ((param, slot), default) in params.iter().zip(bound).zip(&func.defaults) {
        let value = match slot.or_else(|| default.clone()) {
            Some(value) => value,
            None => {
                return Err(ScriptError::type_error(format!(
                    "{}() missing required argument '{}'",
                    func.name, param.name
                )))
            }
        };
        env.set(param.name.clone(), value);
    }
    Ok(())
}

fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let i = if index < 0 { index + len } else { index };
    (0..len).contains(&i).then_some(i as usize)
}

fn slice_bounds(lower: Option<&Object>, upper: Option<&Object>, len: usize) -> Result<(usize, usize), ScriptError> {
    let clamp = |obj: Option<&Object>, default: usize| -> Result<usize, ScriptError> {
        match obj {
            None | Some(Object::None) => Ok(default),
            Some(obj) => {
                let n = obj
                    .as_int()
                    .ok_or_else(|| ScriptError::type_error("slice indices must be integers"))?;
                let n = if n < 0 { n + len as i64 } else { n };
                Ok(n.clamp(0, len as i64) as usize)
            }
        }
    };
    let start = clamp(lower, 0)?;
    let end = clamp(upper, len)?;
    Ok((start, end.max(start)))
}

fn slice(obj: &Object, lower: Option<&Object>, upper: Option<&Object>) -> Result<Object, ScriptError> {
    match obj {
        Object::List(items) => {
            let items = items.borrow();
            let (start, end) = slice_bounds(lower, upper, items.len())?;
            Ok(Object::list(items[start..end].to_vec()))
        }
        Object::Tuple(items) => {
            let (start, end) = slice_bounds(lower, upper, items.len())?;
            Ok(Object::tuple(items[start..end].to_vec()))
        }
        Object::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let (start, end) = slice_bounds(lower, upper, chars.len())?;
            Ok(Object::from(chars[start..end].iter().collect::<String>()))
        }
        Object::Bytes(b) => {
            let (start, end) = slice_bounds(lower, upper, b.len())?;
            Ok(Object::bytes(&b[start..end]))
        }
        other => Err(ScriptError::type_error(format!(
            "'{}' object is not sliceable",
            other.type_name()
        ))),
    }
}

pub(crate) fn get_item(obj: &Object, index: &Object) -> Result<Object, ScriptError> {
    let out_of_range = || ScriptError::new(ErrorKind::IndexError, "index out of range");
    match obj {
        Object::Dict(dict) => dict.borrow().get(index).cloned().ok_or_else(|| {
            ScriptError::new(ErrorKind::KeyError, index.repr())
        }),
        Object::List(_) | Object::Tuple(_) | Object::Str(_) | Object::Bytes(_) => {
            let i = index
                .as_int()
                .ok_or_else(|| ScriptError::type_error("indices must be integers"))?;
            match obj {
                Object::List(items) => {
                    let items = items.borrow();
                    let i = normalize_index(i, items.len()).ok_or_else(out_of_range)?;
                    Ok(items[i].clone())
                }
                Object::Tuple(items) => {
                    let i = normalize_index(i, items.len()).ok_or_else(out_of_range)?;
                    Ok(items[i].clone())
                }
                Object::Str(s) => {
                    let count = s.chars().count();
                    let i = normalize_index(i, count).ok_or_else(out_of_range)?;
                    Ok(s.chars().nth(i).map(|c| Object::from(c.to_string())).unwrap_or(Object::None))
                }
                Object::Bytes(b) => {
                    let i = normalize_index(i, b.len()).ok_or_else(out_of_range)?;
                    Ok(Object::Int(i64::from(b[i])))
                }
                _ => Err(out_of_range()),
            }
        }
        Object::Record(record) => {
            let key = index
                .as_str()
                .ok_or_else(|| ScriptError::type_error("record keys must be strings"))?;
            record
                .fields
                .get(key)
                .cloned()
                .ok_or_else(|| ScriptError::new(ErrorKind::KeyError, index.repr()))
        }
        other => Err(ScriptError::type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

fn set_item(obj: &Object, index: Object, value: Object) -> Result<(), ScriptError> {
    match obj {
        Object::Dict(dict) => {
            dict.borrow_mut().insert(index, value);
            Ok(())
        }
        Object::List(items) => {
            let i = index
                .as_int()
                .ok_or_else(|| ScriptError::type_error("list indices must be integers"))?;
            let mut items = items.borrow_mut();
            let len = items.len();
            let i = normalize_index(i, len)
                .ok_or_else(|| ScriptError::new(ErrorKind::IndexError, "list assignment index out of range"))?;
            items[i] = value;
            Ok(())
        }
        other => Err(ScriptError::type_error(format!(
            "'{}' object does not support item assignment",
            other.type_name()
        ))),
    }
}

fn set_attr(obj: &Object, name: &str, value: Object) -> Result<(), ScriptError> {
    match obj {
        Object::Instance(instance) => {
            instance.fields.borrow_mut().insert(name.to_string(), value);
            Ok(())
        }
        Object::Module(module) => {
            module.globals.set(name, value);
            Ok(())
        }
        other => Err(ScriptError::new(
            ErrorKind::AttributeError,
            format!("cannot set attribute '{name}' on '{}'", other.type_name()),
        )),
    }
}

pub(crate) fn contains(container: &Object, item: &Object) -> Result<bool, ScriptError> {
    match container {
        Object::List(items) | Object::Set(items) => Ok(items.borrow().contains(item)),
        Object::Tuple(items) => Ok(items.contains(item)),
        Object::Dict(dict) => Ok(dict.borrow().contains(item)),
        Object::Str(s) => match item {
            Object::Str(needle) => Ok(s.contains(&**needle)),
            other => Err(ScriptError::type_error(format!(
                "'in <string>' requires string as left operand, not {}",
                other.type_name()
            ))),
        },
        Object::Bytes(b) => match item {
            Object::Bytes(needle) => Ok(needle.is_empty()
                || b.windows(needle.len()).any(|w| w == &**needle)),
            Object::Int(n) => Ok(b.iter().any(|x| i64::from(*x) == *n)),
            _ => Ok(false),
        },
        Object::Record(record) => Ok(item.as_str().is_some_and(|k| record.fields.contains_key(k))),
        other => Err(ScriptError::type_error(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

fn compare(op: CmpOp, l: &Object, r: &Object) -> Result<bool, ScriptError> {
    use std::cmp::Ordering::*;
    let ordered = |l: &Object, r: &Object| {
        l.compare(r).ok_or_else(|| {
            ScriptError::type_error(format!(
                "'{}' not supported between instances of '{}' and '{}'",
                op.symbol(),
                l.type_name(),
                r.type_name()
            ))
        })
    };
    Ok(match op {
        CmpOp::Eq => l == r,
        CmpOp::NotEq => l != r,
        CmpOp::Lt => ordered(l, r)? == Less,
        CmpOp::LtE => ordered(l, r)? != Greater,
        CmpOp::Gt => ordered(l, r)? == Greater,
        CmpOp::GtE => ordered(l, r)? != Less,
        CmpOp::In => contains(r, l)?,
        CmpOp::NotIn => !contains(r, l)?,
        CmpOp::Is => l.identical(r),
        CmpOp::IsNot => !l.identical(r),
    })
}

pub(crate) fn binary_op(op: BinOp, l: &Object, r: &Object) -> Result<Object, ScriptError> {
    let overflow = || ScriptError::value_error("integer overflow");
    let zero = || ScriptError::new(ErrorKind::ZeroDivisionError, "division by zero");
    let result = match (op, l, r) {
        (_, Object::Int(a), Object::Int(b)) => {
            let (a, b) = (*a, *b);
            match op {
                BinOp::Add => a.checked_add(b).map(Object::Int).ok_or_else(overflow)?,
                BinOp::Sub => a.checked_sub(b).map(Object::Int).ok_or_else(overflow)?,
                BinOp::Mul => a.checked_mul(b).map(Object::Int).ok_or_else(overflow)?,
                BinOp::Div => {
                    if b == 0 {
                        return Err(zero());
                    }
                    Object::Float(a as f64 / b as f64)
                }
                BinOp::FloorDiv => {
                    if b == 0 {
                        return Err(zero());
                    }
                    let q = a.checked_div_euclid(b).ok_or_else(overflow)?;
                    let r = a.checked_rem_euclid(b).ok_or_else(overflow)?;
                    Object::Int(q - i64::from(b < 0 && r != 0))
                }
                BinOp::Mod => {
                    if b == 0 {
                        return Err(zero());
                    }
                    // i64::MIN % -1 overflows the euclidean form but is exactly 0
                    let m = a.checked_rem_euclid(b).unwrap_or(0);
                    Object::Int(if b < 0 && m != 0 { m + b } else { m })
                }
                BinOp::Pow => {
                    if b >= 0 {
                        let exp = u32::try_from(b).map_err(|_| overflow())?;
                        a.checked_pow(exp).map(Object::Int).ok_or_else(overflow)?
                    } else {
                        Object::Float((a as f64).powf(b as f64))
                    }
                }
            }
        }
        (_, Object::Int(_) | Object::Float(_), Object::Int(_) | Object::Float(_)) => {
            let (a, b) = (l.as_float().unwrap_or(0.0), r.as_float().unwrap_or(0.0));
            Object::Float(match op {
                BinOp::Add => a + b,
                BinOp::Sub => a - b,
                BinOp::Mul => a * b,
                BinOp::Div => {
                    if b == 0.0 {
                        return Err(zero());
                    }
                    a / b
                }
                BinOp::FloorDiv => {
                    if b == 0.0 {
                        return Err(zero());
                    }
                    (a / b).floor()
                }
                BinOp::Mod => {
                    if b == 0.0 {
                        return Err(zero());
                    }
                    a - b * (a / b).floor()
                }
                BinOp::Pow => a.powf(b),
            })
        }
        (BinOp::Add, Object::Str(a), Object::Str(b)) => Object::from(format!("{a}{b}")),
        (BinOp::Add, Object::Bytes(a), Object::Bytes(b)) => {
            Object::bytes(&[a.as_ref(), b.as_ref()].concat())
        }
        (BinOp::Add, Object::List(a), Object::List(b)) => {
            let mut items = a.borrow().clone();
            items.extend(b.borrow().iter().cloned());
            Object::list(items)
        }
        (BinOp::Add, Object::Tuple(a), Object::Tuple(b)) => {
            Object::tuple(a.iter().chain(b.iter()).cloned().collect())
        }
        (BinOp::Mul, Object::Str(s), Object::Int(n)) | (BinOp::Mul, Object::Int(n), Object::Str(s)) => {
            Object::from(s.repeat((*n).max(0) as usize))
        }
        (BinOp::Mul, Object::List(items), Object::Int(n))
        | (BinOp::Mul, Object::Int(n), Object::List(items)) => {
            let items = items.borrow();
            let mut out = Vec::new();
            for _ in 0..(*n).max(0) {
                out.extend(items.iter().cloned());
            }
            Object::list(out)
        }
        (BinOp::Sub, Object::Set(a), Object::Set(b)) => {
            let b = b.borrow();
            Object::set(a.borrow().iter().filter(|x| !b.contains(x)).cloned().collect())
        }
        (BinOp::Add, Object::DateTime(t), Object::TimeDelta(d))
        | (BinOp::Add, Object::TimeDelta(d), Object::DateTime(t)) => t
            .checked_add_signed(*d)
            .map(Object::DateTime)
            .ok_or_else(|| ScriptError::value_error("date value out of range"))?,
        (BinOp::Sub, Object::DateTime(t), Object::TimeDelta(d)) => t
            .checked_sub_signed(*d)
            .map(Object::DateTime)
            .ok_or_else(|| ScriptError::value_error("date value out of range"))?,
        (BinOp::Sub, Object::DateTime(a), Object::DateTime(b)) => {
            Object::TimeDelta(a.signed_duration_since(*b))
        }
        (BinOp::Add, Object::TimeDelta(a), Object::TimeDelta(b)) => {
            a.checked_add(b).map(Object::TimeDelta).ok_or_else(overflow)?
        }
        (BinOp::Sub, Object::TimeDelta(a), Object::TimeDelta(b)) => {
            a.checked_sub(b).map(Object::TimeDelta).ok_or_else(overflow)?
        }
        (BinOp::Mul, Object::TimeDelta(d), Object::Int(n))
        | (BinOp::Mul, Object::Int(n), Object::TimeDelta(d)) => {
            let n = i32::try_from(*n).map_err(|_| overflow())?;
            d.checked_mul(n).map(Object::TimeDelta).ok_or_else(overflow)?
        }
        (BinOp::Div, Object::TimeDelta(d), Object::Int(n)) => {
            let n = i32::try_from(*n).map_err(|_| overflow())?;
            if n == 0 {
                return Err(zero());
            }
            d.checked_div(n).map(Object::TimeDelta).ok_or_else(overflow)?
        }
        (BinOp::Div, Object::TimeDelta(a), Object::TimeDelta(b)) => {
            let denom = b.num_microseconds().unwrap_or(0);
            if denom == 0 {
                return Err(zero());
            }
            Object::Float(a.num_microseconds().unwrap_or(0) as f64 / denom as f64)
        }
        _ => {
            return Err(ScriptError::type_error(format!(
                "unsupported operand type(s) for {}: '{}' and '{}'",
                op.symbol(),
                l.type_name(),
                r.type_name()
            )))
        }
    };
    Ok(result)
}

/// Convert a timeout argument (seconds, timedelta or None) into a duration.
pub(crate) fn timeout_arg(obj: Option<&Object>, func: &str) -> Result<Option<Duration>, ScriptError> {
    match obj {
        None | Some(Object::None) => Ok(None),
        Some(Object::Int(n)) if *n >= 0 => Ok(Some(Duration::from_secs(*n as u64))),
        Some(Object::Float(x)) if x.is_finite() && *x >= 0.0 => Duration::try_from_secs_f64(*x)
            .map(Some)
            .map_err(|_| ScriptError::usage(format!("{func}(): timeout out of range"))),
        Some(Object::TimeDelta(d)) if *d >= TimeDelta::zero() => d
            .to_std()
            .map(Some)
            .map_err(|_| ScriptError::usage(format!("{func}(): timeout out of range"))),
        Some(other) => Err(ScriptError::usage(format!(
            "{func}(): timeout must be a non-negative number of seconds or a timedelta, got {}",
            other.repr()
        ))),
    }
}

/// Host used outside a workflow session: local stdout, in-process sleep and
/// an in-memory store. Durable waits are unavailable.
#[derive(Default)]
pub struct StdHost {
    store: RefCell<BTreeMap<String, Value>>,
}

impl StdHost {
    pub fn new() -> Self {
        Self::default()
    }

    fn unavailable(what: &str) -> ScriptError {
        ScriptError::runtime(format!("{what} is only available inside a workflow session"))
    }
}

impl Host for StdHost {
    fn print(&self, text: &str) -> Result<(), ScriptError> {
        println!("{text}");
        Ok(())
    }

    fn log(&self, level: &str, message: &str) -> Result<(), ScriptError> {
        match level {
            "error" => tracing::error!(target: "workflow", "{message}"),
            "warning" | "warn" => tracing::warn!(target: "workflow", "{message}"),
            "debug" => tracing::debug!(target: "workflow", "{message}"),
            _ => tracing::info!(target: "workflow", "{message}"),
        }
        Ok(())
    }

    fn sleep(&self, duration: Duration) -> Result<(), ScriptError> {
        std::thread::sleep(duration);
        Ok(())
    }

    fn subscribe(&self, _connection: &str, _filter: &str) -> Result<String, ScriptError> {
        Err(Self::unavailable("subscribe"))
    }

    fn unsubscribe(&self, _subscription_id: &str) -> Result<(), ScriptError> {
        Err(Self::unavailable("unsubscribe"))
    }

    fn next_event(
        &self,
        _subscription_ids: &[String],
        _timeout: Option<Duration>,
    ) -> Result<Option<Value>, ScriptError> {
        Err(Self::unavailable("next_event"))
    }

    fn signal(&self, _session_id: &str, _name: &str, _payload: Value) -> Result<(), ScriptError> {
        Err(Self::unavailable("signal"))
    }

    fn next_signal(
        &self,
        _names: &[String],
        _timeout: Option<Duration>,
    ) -> Result<Option<Signal>, ScriptError> {
        Err(Self::unavailable("next_signal"))
    }

    fn store_mutate(
        &self,
        key: &str,
        operation: &str,
        operands: Vec<Value>,
    ) -> Result<Value, ScriptError> {
        crate::comm::local::apply_store_op(&mut self.store.borrow_mut(), key, operation, operands)
            .map_err(|e| ScriptError::new(ErrorKind::ProtocolError, e))
    }

    fn store_list(&self) -> Result<Vec<String>, ScriptError> {
        Ok(self.store.borrow().keys().cloned().collect())
    }

    fn register_no_activity(&self, _qualified_name: &str) {}

    fn get_env(&self, connection: &str, suffix: &str) -> Option<String> {
        use crate::env::EnvLookup;
        crate::env::ProcessEnv.get_env(connection, suffix)
    }

    fn http_request(&self, request: HttpRequest) -> Result<HttpResponse, ScriptError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| ScriptError::runtime(format!("failed to start HTTP runtime: {e}")))?;
        runtime.block_on(stdlib::http::perform(request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::parser::parse_module;

    fn run(source: &str) -> Result<Rc<ModuleObject>, ScriptError> {
        let module = parse_module(source, "wf", "wf.flow").unwrap();
        let mut interp = Interpreter::new(Rc::new(StdHost::new()));
        interp.exec_module(&module, source)
    }

    fn global(module: &ModuleObject, name: &str) -> Object {
        module.get(name).unwrap()
    }

    #[test]
    fn evaluates_functions_and_loops() {
        let module = run("\
def total(xs, start=0):
    acc = start
    for x in xs:
        if x % 2 == 0:
            continue
        acc += x
    return acc

result = total([1, 2, 3, 4, 5], start=10)
").unwrap();
        assert_eq!(global(&module, "result"), Object::Int(19));
    }

    #[test]
    fn closures_see_enclosing_scope() {
        let module = run("\
def outer(n):
    def inner(x):
        return x + n
    return inner(1)

value = outer(41)
").unwrap();
        assert_eq!(global(&module, "value"), Object::Int(42));
    }

    #[test]
    fn classes_construct_fieldwise_and_bind_methods() {
        let module = run("\
class Point:
    x = 0
    y = 0

    def norm1(self):
        return abs(self.x) + abs(self.y)

p = Point(3, y=-4)
n = p.norm1()
").unwrap();
        assert_eq!(global(&module, "n"), Object::Int(7));
    }

    #[test]
    fn try_except_catches_by_kind() {
        let module = run("\
def risky(d):
    return d['missing']

try:
    risky({})
    caught = 'no'
except KeyError as e:
    caught = 'key'
except:
    caught = 'other'
").unwrap();
        assert_eq!(global(&module, "caught"), Object::from("key"));
    }

    #[test]
    fn tracebacks_record_frames_outermost_first() {
        let source = "\
def inner():
    raise ValueError('bad input')

def outer():
    return inner()

outer()
";
        let err = run(source).err().unwrap();
        assert_eq!(err.kind, ErrorKind::ValueError);
        let functions: Vec<&str> = err.traceback.iter().map(|f| f.function.as_str()).collect();
        assert_eq!(functions, vec!["<module>", "outer", "inner"]);
        assert_eq!(err.traceback[2].line, 2);
        assert_eq!(err.traceback[2].source, "raise ValueError('bad input')");
    }

    #[test]
    fn calling_non_callable_is_a_type_error() {
        let err = run("x = 1\nx()\n").err().unwrap();
        assert_eq!(err.kind, ErrorKind::TypeError);
    }

    #[test]
    fn unbounded_recursion_is_stopped() {
        // Same stack size the session runner gives its execution thread.
        let message = std::thread::Builder::new()
            .stack_size(64 * 1024 * 1024)
            .spawn(|| {
                let err = run("def f(n):\n    return f(n + 1)\nf(0)\n").err().unwrap();
                err.message
            })
            .unwrap()
            .join()
            .unwrap();
        assert!(message.contains("recursion"));
    }

    #[test]
    fn floor_division_and_modulo_round_down() {
        let module = run("a = -7 // 2\nb = -7 % 2\nc = 7 % -2\n").unwrap();
        assert_eq!(global(&module, "a"), Object::Int(-4));
        assert_eq!(global(&module, "b"), Object::Int(1));
        assert_eq!(global(&module, "c"), Object::Int(-1));
    }

    #[test]
    fn smallest_int_divided_by_minus_one() {
        let err = run("x = -9223372036854775807 - 1\ny = x // -1\n").err().unwrap();
        assert_eq!(err.kind, ErrorKind::ValueError);
        assert!(err.message.contains("overflow"));

        let module = run("x = -9223372036854775807 - 1\ny = x % -1\n").unwrap();
        assert_eq!(global(&module, "y"), Object::Int(0));
    }

    #[test]
    fn oversized_timeouts_are_usage_errors() {
        let err = timeout_arg(Some(&Object::Float(1e30)), "sleep").unwrap_err();
        assert_eq!(err.kind, ErrorKind::UsageError);
        assert_eq!(
            timeout_arg(Some(&Object::Float(1.5)), "sleep").unwrap(),
            Some(Duration::from_millis(1500))
        );
    }
}
