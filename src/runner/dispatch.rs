//! The call hook: routes every instrumented call either inline or out as an
//! activity, and blocks the execution thread for the activity round trip.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use tokio::sync::mpsc;

use super::{Instruction, RunnerShared};
use crate::classify::{classify, Decision, Flags};
use crate::comm::{ActivityRequest, CallInfo, ErrorReport, Outcome};
use crate::registry::Registry;
use crate::script::{Args, CallHook, CallTarget, CodeDir, Interpreter, Object, ScriptError};

pub struct Dispatcher {
    shared: Arc<RunnerShared>,
    registry: Arc<Registry>,
    code: Rc<CodeDir>,
    loading: Cell<bool>,
    in_activity: Cell<bool>,
    /// Calls awaiting a reply, by call id, so an `execute` can run them.
    replay: RefCell<HashMap<String, (Object, Args)>>,
    next_call: Cell<u64>,
}

impl Dispatcher {
    pub fn new(shared: Arc<RunnerShared>, registry: Arc<Registry>, code: Rc<CodeDir>) -> Self {
        Self {
            shared,
            registry,
            code,
            loading: Cell::new(true),
            in_activity: Cell::new(false),
            replay: RefCell::new(HashMap::new()),
            next_call: Cell::new(1),
        }
    }

    /// Leave the `Loading` state; top-level module code has finished.
    pub fn finish_loading(&self) {
        self.loading.set(false);
    }

    pub fn flags(&self) -> Flags {
        Flags {
            loading: self.loading.get(),
            in_activity: self.in_activity.get(),
        }
    }

    fn next_call_id(&self) -> String {
        let n = self.next_call.get();
        self.next_call.set(n + 1);
        format!("call-{n}")
    }

    fn encode(&self, interp: &Interpreter, target: &CallTarget, args: &Args) -> Result<CallInfo, ScriptError> {
        let positional = args
            .positional
            .iter()
            .map(|arg| interp.wrap(arg))
            .collect::<Result<_, _>>()?;
        let kwargs = args
            .keywords
            .iter()
            .map(|(name, arg)| Ok((name.clone(), interp.wrap(arg)?)))
            .collect::<Result<_, ScriptError>>()?;
        Ok(CallInfo {
            function: target.qualified_name(),
            args: positional,
            kwargs,
        })
    }

    fn run_activity(
        &self,
        interp: &mut Interpreter,
        callee: Object,
        target: &CallTarget,
        args: Args,
    ) -> Result<Object, ScriptError> {
        let call = self.encode(interp, target, &args)?;
        let call_id = self.next_call_id();
        tracing::debug!(
            runner_id = %self.shared.id(),
            call_id = %call_id,
            function = %call.function,
            "Dispatching activity"
        );

        let mut instructions = self.shared.register_call(&call_id);
        self.replay
            .borrow_mut()
            .insert(call_id.clone(), (callee, args));
        let request = ActivityRequest {
            runner_id: self.shared.id().to_string(),
            call,
            data: call_id.clone(),
        };
        let result = self
            .shared
            .syscall("callback", self.shared.worker().activity(request))
            .and_then(|()| self.await_reply(interp, &call_id, &mut instructions));
        self.shared.forget_call(&call_id);
        self.replay.borrow_mut().remove(&call_id);
        result
    }

    fn await_reply(
        &self,
        interp: &mut Interpreter,
        call_id: &str,
        instructions: &mut mpsc::UnboundedReceiver<Instruction>,
    ) -> Result<Object, ScriptError> {
        loop {
            match instructions.blocking_recv() {
                Some(Instruction::Execute { respond }) => {
                    let outcome = self.execute_recorded(interp, call_id);
                    if respond.send(outcome).is_err() {
                        tracing::debug!(call_id, "Execute requester went away");
                    }
                }
                Some(Instruction::Reply(Outcome::Value(value))) => return interp.unwrap(&value),
                Some(Instruction::Reply(Outcome::Error(report))) => {
                    return Err(report.into_script_error())
                }
                None => {
                    return Err(ScriptError::runtime(format!(
                        "runner stopped while waiting for {call_id}"
                    )))
                }
            }
        }
    }

    /// Run a recorded call in place. Everything it calls stays local.
    fn execute_recorded(&self, interp: &mut Interpreter, call_id: &str) -> Outcome {
        let recorded = self.replay.borrow().get(call_id).cloned();
        let Some((callee, args)) = recorded else {
            let err = ScriptError::runtime(format!("no recorded call '{call_id}'"));
            return Outcome::Error(ErrorReport::from(&err));
        };
        let was_in_activity = self.in_activity.replace(true);
        let result = interp.call(&callee, args);
        self.in_activity.set(was_in_activity);
        match result.and_then(|obj| interp.wrap(&obj)) {
            Ok(value) => Outcome::Value(value),
            Err(err) => Outcome::Error(ErrorReport::from(&err)),
        }
    }
}

impl CallHook for Dispatcher {
    fn dispatch(
        &self,
        interp: &mut Interpreter,
        callee: Object,
        args: Args,
    ) -> Result<Object, ScriptError> {
        let Some(target) = callee.call_target() else {
            return Err(ScriptError::usage(format!(
                "'{}' object is not callable ({})",
                callee.type_name(),
                interp.location()
            )));
        };
        let decision = classify(&target, self.flags(), &self.registry, |module| {
            self.code.is_user_module(module)
        });
        match decision {
            Decision::Local => interp.call(&callee, args),
            Decision::Activity => self.run_activity(interp, callee, &target, args),
        }
    }
}
