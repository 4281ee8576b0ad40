//! Communication between the harness and the worker that fronts the
//! orchestrator.
//!
//! [`Worker`] is the outbound side: every RPC the execution thread can
//! issue. [`RunnerService`] is the inbound side the worker drives: start a
//! session, execute a recorded call, deliver an activity result.
//!
//! Transports: [`line`] speaks line-delimited JSON over any byte stream,
//! [`local`] answers everything in-process for `tether run`.

pub mod line;
pub mod local;
pub mod protocol;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::runner::RunnerError;
use crate::script::{ErrorKind, Frame, ScriptError};
use crate::value::{Duration, Value};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CommError {
    /// The worker answered with a non-empty error field.
    #[error("{rpc} failed: {message}")]
    Remote { rpc: String, message: String },
    #[error("worker unavailable: {0}")]
    Unavailable(String),
    #[error("request cancelled: {0}")]
    Cancelled(String),
    /// The reply arrived but could not be decoded.
    #[error("malformed {rpc} reply: {message}")]
    Malformed { rpc: String, message: String },
}

impl CommError {
    /// Transport failures after which local protocol state cannot be trusted.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CommError::Unavailable(_) | CommError::Cancelled(_))
    }

    pub fn rpc(&self) -> Option<&str> {
        match self {
            CommError::Remote { rpc, .. } | CommError::Malformed { rpc, .. } => Some(rpc),
            _ => None,
        }
    }
}

/// A call submitted as an activity, every argument already encoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallInfo {
    /// Qualified name of the callable.
    pub function: String,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: BTreeMap<String, Value>,
}

/// Error with its traceback, as reported across the process boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub kind: String,
    pub message: String,
    #[serde(default)]
    pub traceback: Vec<Frame>,
}

impl From<&ScriptError> for ErrorReport {
    fn from(err: &ScriptError) -> Self {
        Self {
            kind: err.kind.name().to_string(),
            message: err.message.clone(),
            traceback: err.traceback.clone(),
        }
    }
}

impl ErrorReport {
    /// Kinds this harness does not know come back as activity errors.
    pub fn into_script_error(self) -> ScriptError {
        let kind = ErrorKind::parse(&self.kind).unwrap_or(ErrorKind::ActivityError);
        ScriptError {
            kind,
            message: self.message,
            traceback: self.traceback,
        }
    }
}

/// Result of running a call or a whole session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Value(Value),
    Error(ErrorReport),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub name: String,
    pub payload: Value,
}

// ============================================================================
// Harness -> worker requests
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleRequest {
    pub runner_id: String,
    pub functions: Vec<String>,
}

/// Wire type `callback`. `data` is the opaque replay payload, the call id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityRequest {
    pub runner_id: String,
    #[serde(flatten)]
    pub call: CallInfo,
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRequest {
    pub runner_id: String,
    pub level: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrintRequest {
    pub runner_id: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SleepRequest {
    pub runner_id: String,
    pub duration: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscribeRequest {
    pub runner_id: String,
    pub connection: String,
    pub filter: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscribeResponse {
    pub subscription_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnsubscribeRequest {
    pub runner_id: String,
    pub subscription_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NextEventRequest {
    pub runner_id: String,
    pub subscription_ids: Vec<String>,
    /// `None` waits indefinitely.
    #[serde(default)]
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NextEventResponse {
    /// `None` when the wait timed out.
    #[serde(default)]
    pub event: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalRequest {
    pub runner_id: String,
    pub session_id: String,
    pub name: String,
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NextSignalRequest {
    pub runner_id: String,
    pub names: Vec<String>,
    #[serde(default)]
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NextSignalResponse {
    #[serde(default)]
    pub signal: Option<Signal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreMutateRequest {
    pub runner_id: String,
    pub key: String,
    /// `get`, `set`, `del` or `add`.
    pub operation: String,
    #[serde(default)]
    pub operands: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreMutateResponse {
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreListRequest {
    pub runner_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreListResponse {
    pub keys: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoneRequest {
    pub runner_id: String,
    pub outcome: Outcome,
}

/// Outbound RPCs. Each call either succeeds or fails on its own; nothing at
/// this layer retries.
#[async_trait]
pub trait Worker: Send + Sync {
    async fn module_loaded(&self, request: ModuleRequest) -> Result<(), CommError>;

    /// Submit a call for out-of-process execution. The result arrives later
    /// through [`RunnerService::activity_reply`].
    async fn activity(&self, request: ActivityRequest) -> Result<(), CommError>;

    async fn sleep(&self, request: SleepRequest) -> Result<(), CommError>;

    async fn subscribe(&self, request: SubscribeRequest) -> Result<String, CommError>;

    async fn unsubscribe(&self, request: UnsubscribeRequest) -> Result<(), CommError>;

    async fn next_event(&self, request: NextEventRequest) -> Result<Option<Value>, CommError>;

    async fn signal(&self, request: SignalRequest) -> Result<(), CommError>;

    async fn next_signal(&self, request: NextSignalRequest) -> Result<Option<Signal>, CommError>;

    async fn store_mutate(&self, request: StoreMutateRequest) -> Result<Value, CommError>;

    async fn store_list(&self, request: StoreListRequest) -> Result<Vec<String>, CommError>;

    async fn log(&self, request: LogRequest) -> Result<(), CommError>;

    async fn print(&self, request: PrintRequest) -> Result<(), CommError>;

    /// Fired once per session.
    async fn done(&self, request: DoneRequest) -> Result<(), CommError>;

    async fn health(&self) -> Result<(), CommError>;
}

// ============================================================================
// Worker -> harness requests
// ============================================================================

/// Wire type `run`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartRequest {
    pub runner_id: String,
    /// `path/to/file.flow:function`
    pub entry_point: String,
    #[serde(default = "nothing")]
    pub event: Value,
}

fn nothing() -> Value {
    Value::Nothing
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartResponse {
    pub runner_id: String,
    pub functions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub runner_id: String,
    pub call_id: String,
}

/// Wire type `response`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityReplyRequest {
    pub runner_id: String,
    pub call_id: String,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub runners: usize,
}

/// Inbound operations a worker drives.
#[async_trait]
pub trait RunnerService: Send + Sync {
    async fn start(&self, request: StartRequest) -> Result<StartResponse, RunnerError>;

    /// Run a recorded pending call on its execution thread.
    async fn execute(&self, request: ExecuteRequest) -> Result<Outcome, RunnerError>;

    /// Resolve a pending activity. Unknown call ids fail.
    async fn activity_reply(&self, request: ActivityReplyRequest) -> Result<(), RunnerError>;

    async fn health(&self) -> Result<HealthResponse, RunnerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transport_failures_are_fatal() {
        assert!(CommError::Unavailable("reset".into()).is_fatal());
        assert!(CommError::Cancelled("closed".into()).is_fatal());
        let remote = CommError::Remote {
            rpc: "sleep".into(),
            message: "boom".into(),
        };
        assert!(!remote.is_fatal());
        assert_eq!(remote.rpc(), Some("sleep"));
        assert_eq!(remote.to_string(), "sleep failed: boom");
    }

    #[test]
    fn error_reports_keep_known_kinds() {
        let mut err = ScriptError::value_error("bad input");
        err.push_frame(Frame {
            file: "wf.flow".into(),
            line: 3,
            source: "raise ValueError('bad input')".into(),
            function: "charge".into(),
        });
        let report = ErrorReport::from(&err);
        assert_eq!(report.kind, "ValueError");
        assert_eq!(report.clone().into_script_error(), err);

        let foreign = ErrorReport {
            kind: "TimeoutError".into(),
            ..report
        };
        assert_eq!(foreign.into_script_error().kind, ErrorKind::ActivityError);
    }

    #[test]
    fn activity_requests_flatten_the_call() {
        let request = ActivityRequest {
            runner_id: "r1".into(),
            call: CallInfo {
                function: "wf.fetch".into(),
                args: vec![Value::Integer(1)],
                kwargs: BTreeMap::new(),
            },
            data: "call-1".into(),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["function"], "wf.fetch");
        assert_eq!(json["args"][0]["integer"], 1);
        assert_eq!(json["data"], "call-1");
        let back: ActivityRequest = serde_json::from_value(json).unwrap();
        assert_eq!(back, request);
    }
}
