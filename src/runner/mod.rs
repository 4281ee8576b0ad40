//! Session runners.
//!
//! A runner owns one workflow session: one interpreter on one dedicated OS
//! thread, plus the table of calls that thread is blocked on. [`RunnerHost`]
//! keeps runners by id and implements [`RunnerService`] for the transports.

pub mod dispatch;
pub mod host;

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};

use crate::cache::LargeObjectCache;
use crate::comm::{
    ActivityReplyRequest, CommError, DoneRequest, ErrorReport, ExecuteRequest, HealthResponse,
    ModuleRequest, Outcome, RunnerService, StartRequest, StartResponse, Worker,
};
use crate::env::{EnvLookup, ProcessEnv};
use crate::registry::Registry;
use crate::script::{
    Args, CodeDir, EntryPoint, ErrorKind, Interpreter, LoadError, Object, ScriptError, HOOK_NAME,
};
use crate::value::{OpaqueCodec, Value};

use dispatch::Dispatcher;
use host::SessionHost;

/// Workflow code recurses on the native stack.
const EXEC_STACK_SIZE: usize = 64 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error("runner '{0}' already exists")]
    Duplicate(String),
    #[error("no runner '{0}'")]
    UnknownRunner(String),
    #[error("runner '{runner_id}' has no pending call '{call_id}'")]
    UnknownCall { runner_id: String, call_id: String },
    #[error("failed to spawn execution thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("runner did not finish loading within {0:?}")]
    StartTimeout(Duration),
    #[error("execution thread for runner '{0}' exited")]
    ThreadExited(String),
    #[error(transparent)]
    Comm(#[from] CommError),
}

/// Invoked once on the first fatal transport failure.
pub type FatalHandler = Arc<dyn Fn(&CommError) + Send + Sync>;

/// Log and terminate the process.
pub fn exit_on_fatal() -> FatalHandler {
    Arc::new(|err| {
        tracing::error!(error = %err, "Fatal transport failure, exiting");
        eprintln!("tether: fatal transport failure: {err}");
        std::process::exit(1);
    })
}

/// What a blocked execution thread is told to do next.
pub enum Instruction {
    /// Run the pending call here and report the outcome.
    Execute { respond: oneshot::Sender<Outcome> },
    /// The call is resolved; resume with this outcome.
    Reply(Outcome),
}

/// Runner state reachable from both the execution thread and the transport
/// tasks. Only `Send` wire data crosses between them.
pub struct RunnerShared {
    id: String,
    pending: Mutex<HashMap<String, mpsc::UnboundedSender<Instruction>>>,
    worker: Arc<dyn Worker>,
    runtime: Handle,
    fatal: FatalHandler,
    terminated: AtomicBool,
}

impl RunnerShared {
    pub fn new(
        id: impl Into<String>,
        worker: Arc<dyn Worker>,
        runtime: Handle,
        fatal: FatalHandler,
    ) -> Self {
        Self {
            id: id.into(),
            pending: Mutex::new(HashMap::new()),
            worker,
            runtime,
            fatal,
            terminated: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn worker(&self) -> &dyn Worker {
        self.worker.as_ref()
    }

    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    /// Open the channel a pending call waits on.
    pub fn register_call(&self, call_id: &str) -> mpsc::UnboundedReceiver<Instruction> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.pending.lock().insert(call_id.to_string(), tx);
        rx
    }

    pub fn forget_call(&self, call_id: &str) {
        self.pending.lock().remove(call_id);
    }

    pub fn pending_calls(&self) -> usize {
        self.pending.lock().len()
    }

    fn unknown_call(&self, call_id: &str) -> RunnerError {
        RunnerError::UnknownCall {
            runner_id: self.id.clone(),
            call_id: call_id.to_string(),
        }
    }

    /// Forward an instruction to the thread blocked on `call_id`. A reply
    /// resolves the call, so it is removed from the table.
    pub fn deliver(&self, call_id: &str, instruction: Instruction) -> Result<(), RunnerError> {
        let sender = {
            let mut pending = self.pending.lock();
            match instruction {
                Instruction::Reply(_) => pending.remove(call_id),
                Instruction::Execute { .. } => pending.get(call_id).cloned(),
            }
        };
        let sender = sender.ok_or_else(|| self.unknown_call(call_id))?;
        sender
            .send(instruction)
            .map_err(|_| RunnerError::ThreadExited(self.id.clone()))
    }

    /// Block the execution thread on one worker RPC.
    ///
    /// The first fatal failure runs the fatal handler; after it no further
    /// RPC is attempted.
    pub fn rpc<T, F>(&self, rpc: &str, request: F) -> Result<T, CommError>
    where
        F: Future<Output = Result<T, CommError>>,
    {
        if self.is_terminated() {
            return Err(CommError::Cancelled(format!(
                "{rpc} not sent: transport already failed"
            )));
        }
        let result = self.runtime.block_on(request);
        if let Err(err) = &result {
            if err.is_fatal() && !self.terminated.swap(true, Ordering::AcqRel) {
                tracing::error!(runner_id = %self.id, rpc, error = %err, "Transport failure");
                (self.fatal)(err);
            }
        }
        result
    }

    /// [`Self::rpc`] with the failure raised into workflow code.
    pub fn syscall<T, F>(&self, rpc: &str, request: F) -> Result<T, ScriptError>
    where
        F: Future<Output = Result<T, CommError>>,
    {
        self.rpc(rpc, request).map_err(|err| {
            let kind = if err.is_fatal() {
                ErrorKind::RuntimeError
            } else {
                ErrorKind::ProtocolError
            };
            ScriptError::new(kind, err.to_string())
        })
    }
}

#[derive(Clone)]
pub struct RunnerSettings {
    /// Materialized user code.
    pub code_dir: PathBuf,
    pub start_timeout: Duration,
    pub cache: Option<Arc<LargeObjectCache>>,
    pub env: Arc<dyn EnvLookup>,
}

impl RunnerSettings {
    pub fn new(code_dir: impl Into<PathBuf>) -> Self {
        Self {
            code_dir: code_dir.into(),
            start_timeout: Duration::from_secs(30),
            cache: None,
            env: Arc::new(ProcessEnv),
        }
    }
}

pub struct RunnerHost {
    worker: Arc<dyn Worker>,
    registry: Arc<Registry>,
    settings: RunnerSettings,
    fatal: FatalHandler,
    runners: Arc<Mutex<HashMap<String, Arc<RunnerShared>>>>,
}

impl RunnerHost {
    pub fn new(worker: Arc<dyn Worker>, registry: Arc<Registry>, settings: RunnerSettings) -> Self {
        Self {
            worker,
            registry,
            settings,
            fatal: exit_on_fatal(),
            runners: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_fatal_handler(mut self, fatal: FatalHandler) -> Self {
        self.fatal = fatal;
        self
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn runner_count(&self) -> usize {
        self.runners.lock().len()
    }

    fn runner(&self, runner_id: &str) -> Result<Arc<RunnerShared>, RunnerError> {
        self.runners
            .lock()
            .get(runner_id)
            .cloned()
            .ok_or_else(|| RunnerError::UnknownRunner(runner_id.to_string()))
    }
}

#[async_trait]
impl RunnerService for RunnerHost {
    async fn start(&self, request: StartRequest) -> Result<StartResponse, RunnerError> {
        let entry = EntryPoint::parse(&request.entry_point)?;
        let runner_id = request.runner_id;
        let shared = Arc::new(RunnerShared::new(
            runner_id.clone(),
            self.worker.clone(),
            Handle::current(),
            self.fatal.clone(),
        ));
        {
            let mut runners = self.runners.lock();
            if runners.contains_key(&runner_id) {
                return Err(RunnerError::Duplicate(runner_id));
            }
            runners.insert(runner_id.clone(), shared.clone());
        }

        let (ready_tx, ready_rx) = oneshot::channel();
        let session = Session {
            shared,
            registry: self.registry.clone(),
            settings: self.settings.clone(),
            entry,
            event: request.event,
        };
        let deregister = Deregister {
            runners: self.runners.clone(),
            runner_id: runner_id.clone(),
        };
        let spawned = std::thread::Builder::new()
            .name(format!("tether-{runner_id}"))
            .stack_size(EXEC_STACK_SIZE)
            .spawn(move || {
                let _deregister = deregister;
                let runner_id = session.shared.id().to_string();
                if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(|| session.run(ready_tx))) {
                    tracing::error!(
                        runner_id = %runner_id,
                        panic = %panic_message(panic.as_ref()),
                        "Execution thread panicked"
                    );
                }
            });
        if let Err(err) = spawned {
            self.runners.lock().remove(&runner_id);
            return Err(RunnerError::Spawn(err));
        }

        let functions = match tokio::time::timeout(self.settings.start_timeout, ready_rx).await {
            Ok(Ok(loaded)) => loaded?,
            Ok(Err(_)) => return Err(RunnerError::ThreadExited(runner_id)),
            Err(_) => return Err(RunnerError::StartTimeout(self.settings.start_timeout)),
        };
        tracing::info!(runner_id = %runner_id, functions = ?functions, "Runner started");
        Ok(StartResponse {
            runner_id,
            functions,
        })
    }

    async fn execute(&self, request: ExecuteRequest) -> Result<Outcome, RunnerError> {
        let shared = self.runner(&request.runner_id)?;
        let (respond, outcome) = oneshot::channel();
        shared.deliver(&request.call_id, Instruction::Execute { respond })?;
        outcome
            .await
            .map_err(|_| RunnerError::ThreadExited(request.runner_id))
    }

    async fn activity_reply(&self, request: ActivityReplyRequest) -> Result<(), RunnerError> {
        let shared = self.runner(&request.runner_id)?;
        shared.deliver(&request.call_id, Instruction::Reply(request.outcome))
    }

    async fn health(&self) -> Result<HealthResponse, RunnerError> {
        Ok(HealthResponse {
            runners: self.runner_count(),
        })
    }
}

/// Drops the runner from the host's table when its thread ends, unwinding
/// included.
struct Deregister {
    runners: Arc<Mutex<HashMap<String, Arc<RunnerShared>>>>,
    runner_id: String,
}

impl Drop for Deregister {
    fn drop(&mut self) {
        self.runners.lock().remove(&self.runner_id);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Everything the execution thread needs, moved onto it at spawn.
struct Session {
    shared: Arc<RunnerShared>,
    registry: Arc<Registry>,
    settings: RunnerSettings,
    entry: EntryPoint,
    event: Value,
}

impl Session {
    fn run(self, ready: oneshot::Sender<Result<Vec<String>, RunnerError>>) {
        let code = Rc::new(CodeDir::new(&self.settings.code_dir, HOOK_NAME));
        let mut codec = OpaqueCodec::new(self.shared.id());
        if let Some(cache) = &self.settings.cache {
            codec = codec.with_cache(cache.clone());
        }
        let dispatcher = Rc::new(Dispatcher::new(
            self.shared.clone(),
            self.registry.clone(),
            code.clone(),
        ));
        let host = SessionHost::new(
            self.shared.clone(),
            self.registry.clone(),
            self.settings.env.clone(),
        );
        let mut interp = Interpreter::new(Rc::new(host));
        interp.set_loader(code.clone());
        interp.set_hook(dispatcher.clone());
        interp.set_extension(Rc::new(codec));

        let loaded = self.load(&mut interp, &code);
        dispatcher.finish_loading();
        let function = match loaded {
            Ok((function, functions)) => {
                let announced = self.shared.rpc(
                    "module",
                    self.shared.worker().module_loaded(ModuleRequest {
                        runner_id: self.shared.id().to_string(),
                        functions: functions.clone(),
                    }),
                );
                if let Err(err) = announced {
                    let _ = ready.send(Err(err.into()));
                    return;
                }
                let _ = ready.send(Ok(functions));
                function
            }
            Err(err) => {
                tracing::warn!(runner_id = %self.shared.id(), error = %err, "Load failed");
                let _ = ready.send(Err(err));
                return;
            }
        };

        let outcome = self.call_entry(&mut interp, &function);
        match &outcome {
            Outcome::Value(_) => tracing::info!(runner_id = %self.shared.id(), "Session finished"),
            Outcome::Error(report) => tracing::info!(
                runner_id = %self.shared.id(),
                error = %report.message,
                "Session raised"
            ),
        }
        let done = self.shared.rpc(
            "done",
            self.shared.worker().done(DoneRequest {
                runner_id: self.shared.id().to_string(),
                outcome,
            }),
        );
        if let Err(err) = done {
            tracing::warn!(runner_id = %self.shared.id(), error = %err, "Failed to report done");
        }
    }

    /// Execute the entry module with every call forced local, then look up
    /// the entry function.
    fn load(
        &self,
        interp: &mut Interpreter,
        code: &CodeDir,
    ) -> Result<(Object, Vec<String>), RunnerError> {
        let source = code.read_entry(&self.entry)?;
        let module = interp
            .exec_module(&source.module, &source.source)
            .map_err(|error| LoadError::Script {
                module: self.entry.module.clone(),
                error,
            })?;
        let function = module
            .get(&self.entry.function)
            .filter(Object::is_callable)
            .ok_or_else(|| LoadError::MissingFunction {
                module: self.entry.module.clone(),
                function: self.entry.function.clone(),
            })?;
        Ok((function, module.exported_functions()))
    }

    /// A panic in workflow execution still ends the session with an error
    /// outcome, so `done` is always sent.
    fn call_entry(&self, interp: &mut Interpreter, function: &Object) -> Outcome {
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            interp
                .unwrap(&self.event)
                .and_then(|event| interp.call(function, Args::new(vec![event])))
                .and_then(|result| interp.wrap(&result))
        }))
        .unwrap_or_else(|panic| {
            let message = panic_message(panic.as_ref());
            tracing::error!(runner_id = %self.shared.id(), panic = %message, "Workflow execution panicked");
            Err(ScriptError::runtime(format!("internal error: {message}")))
        });
        match result {
            Ok(value) => Outcome::Value(value),
            Err(err) => Outcome::Error(ErrorReport::from(&err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::local::LocalWorker;

    fn shared() -> RunnerShared {
        let (worker, _events) = LocalWorker::quiet();
        RunnerShared::new("r1", worker, Handle::current(), Arc::new(|_: &CommError| {}))
    }

    #[tokio::test]
    async fn replies_resolve_and_remove_pending_calls() {
        let shared = shared();
        let mut rx = shared.register_call("call-1");
        assert_eq!(shared.pending_calls(), 1);

        let (respond, _outcome) = oneshot::channel();
        shared
            .deliver("call-1", Instruction::Execute { respond })
            .unwrap();
        assert_eq!(shared.pending_calls(), 1);
        assert!(matches!(rx.recv().await, Some(Instruction::Execute { .. })));

        shared
            .deliver("call-1", Instruction::Reply(Outcome::Value(Value::Integer(1))))
            .unwrap();
        assert_eq!(shared.pending_calls(), 0);
        assert!(matches!(
            rx.recv().await,
            Some(Instruction::Reply(Outcome::Value(Value::Integer(1))))
        ));

        let err = shared
            .deliver("call-1", Instruction::Reply(Outcome::Value(Value::Nothing)))
            .unwrap_err();
        assert!(matches!(err, RunnerError::UnknownCall { .. }));
    }

    #[test]
    fn panic_messages_are_recovered_from_payloads() {
        let payload = std::panic::catch_unwind(|| panic!("boom {}", 1)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "boom 1");
        let payload = std::panic::catch_unwind(|| std::panic::panic_any(7u8)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }
}
