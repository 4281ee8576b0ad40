//! Host services for workflow code running inside a session. Each one is a
//! blocking worker RPC issued from the execution thread.

use std::sync::Arc;
use std::time::Duration;

use super::RunnerShared;
use crate::comm::{
    LogRequest, NextEventRequest, NextSignalRequest, PrintRequest, Signal, SignalRequest,
    SleepRequest, StoreListRequest, StoreMutateRequest, SubscribeRequest, UnsubscribeRequest,
};
use crate::env::EnvLookup;
use crate::registry::Registry;
use crate::script::stdlib::http::{self, HttpRequest, HttpResponse};
use crate::script::{Host, ScriptError};
use crate::value::{self, Value};

pub struct SessionHost {
    shared: Arc<RunnerShared>,
    registry: Arc<Registry>,
    env: Arc<dyn EnvLookup>,
}

impl SessionHost {
    pub fn new(shared: Arc<RunnerShared>, registry: Arc<Registry>, env: Arc<dyn EnvLookup>) -> Self {
        Self {
            shared,
            registry,
            env,
        }
    }

    fn runner_id(&self) -> String {
        self.shared.id().to_string()
    }
}

fn wire_timeout(timeout: Option<Duration>) -> Option<value::Duration> {
    timeout.map(value::Duration::from_std)
}

impl Host for SessionHost {
    fn print(&self, text: &str) -> Result<(), ScriptError> {
        let request = PrintRequest {
            runner_id: self.runner_id(),
            text: text.to_string(),
        };
        self.shared.syscall("print", self.shared.worker().print(request))
    }

    fn log(&self, level: &str, message: &str) -> Result<(), ScriptError> {
        let request = LogRequest {
            runner_id: self.runner_id(),
            level: level.to_string(),
            message: message.to_string(),
        };
        self.shared.syscall("log", self.shared.worker().log(request))
    }

    fn sleep(&self, duration: Duration) -> Result<(), ScriptError> {
        let request = SleepRequest {
            runner_id: self.runner_id(),
            duration: value::Duration::from_std(duration),
        };
        self.shared.syscall("sleep", self.shared.worker().sleep(request))
    }

    fn subscribe(&self, connection: &str, filter: &str) -> Result<String, ScriptError> {
        let request = SubscribeRequest {
            runner_id: self.runner_id(),
            connection: connection.to_string(),
            filter: filter.to_string(),
        };
        self.shared
            .syscall("subscribe", self.shared.worker().subscribe(request))
    }

    fn unsubscribe(&self, subscription_id: &str) -> Result<(), ScriptError> {
        let request = UnsubscribeRequest {
            runner_id: self.runner_id(),
            subscription_id: subscription_id.to_string(),
        };
        self.shared
            .syscall("unsubscribe", self.shared.worker().unsubscribe(request))
    }

    fn next_event(
        &self,
        subscription_ids: &[String],
        timeout: Option<Duration>,
    ) -> Result<Option<Value>, ScriptError> {
        let request = NextEventRequest {
            runner_id: self.runner_id(),
            subscription_ids: subscription_ids.to_vec(),
            timeout: wire_timeout(timeout),
        };
        self.shared
            .syscall("next_event", self.shared.worker().next_event(request))
    }

    fn signal(&self, session_id: &str, name: &str, payload: Value) -> Result<(), ScriptError> {
        let request = SignalRequest {
            runner_id: self.runner_id(),
            session_id: session_id.to_string(),
            name: name.to_string(),
            payload,
        };
        self.shared.syscall("signal", self.shared.worker().signal(request))
    }

    fn next_signal(
        &self,
        names: &[String],
        timeout: Option<Duration>,
    ) -> Result<Option<Signal>, ScriptError> {
        let request = NextSignalRequest {
            runner_id: self.runner_id(),
            names: names.to_vec(),
            timeout: wire_timeout(timeout),
        };
        self.shared
            .syscall("next_signal", self.shared.worker().next_signal(request))
    }

    fn store_mutate(
        &self,
        key: &str,
        operation: &str,
        operands: Vec<Value>,
    ) -> Result<Value, ScriptError> {
        let request = StoreMutateRequest {
            runner_id: self.runner_id(),
            key: key.to_string(),
            operation: operation.to_string(),
            operands,
        };
        self.shared
            .syscall("store_mutate", self.shared.worker().store_mutate(request))
    }

    fn store_list(&self) -> Result<Vec<String>, ScriptError> {
        let request = StoreListRequest {
            runner_id: self.runner_id(),
        };
        self.shared
            .syscall("store_list", self.shared.worker().store_list(request))
    }

    fn register_no_activity(&self, qualified_name: &str) {
        self.registry.register_no_activity(qualified_name);
    }

    fn get_env(&self, connection: &str, suffix: &str) -> Option<String> {
        self.env.get_env(connection, suffix)
    }

    fn http_request(&self, request: HttpRequest) -> Result<HttpResponse, ScriptError> {
        self.shared.runtime().block_on(http::perform(request))
    }
}
