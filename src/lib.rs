//! tether: runs workflow scripts as durable, replayable workflows.
//!
//! Workflow code is instrumented at load time so every call passes through
//! a dispatcher. Deterministic calls run inline; everything else becomes an
//! activity executed (or replayed) by the orchestrator behind a worker.

pub mod cache;
pub mod classify;
pub mod comm;
pub mod config;
pub mod env;
pub mod instrument;
pub mod registry;
pub mod runner;
pub mod script;
pub mod util;
pub mod value;

pub use classify::{classify, Decision, Flags};
pub use comm::{CommError, Outcome, RunnerService, Worker};
pub use config::Config;
pub use instrument::instrument;
pub use registry::{Registry, RegistryLists};
pub use runner::{RunnerError, RunnerHost, RunnerSettings};
pub use value::Value;
