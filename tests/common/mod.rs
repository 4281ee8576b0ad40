//! Shared test utilities for integration tests
//!
//! - `MockWorker`: scripted [`Worker`] that records every RPC
//! - `CodeFixture`: temporary code directory holding workflow files
//! - `fatal_recorder`: fatal handler that records instead of exiting

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::sync::mpsc;

use tether::comm::{
    ActivityRequest, CommError, DoneRequest, LogRequest, ModuleRequest, NextEventRequest,
    NextSignalRequest, PrintRequest, Signal, SignalRequest, SleepRequest, StoreListRequest,
    StoreMutateRequest, SubscribeRequest, UnsubscribeRequest, Worker,
};
use tether::runner::FatalHandler;
use tether::{Registry, RunnerHost, RunnerSettings, Value};

/// Requests a test needs to react to.
#[derive(Debug)]
pub enum WorkerEvent {
    Activity(ActivityRequest),
    Done(DoneRequest),
}

/// Worker that records RPC names and forwards activities and completions.
pub struct MockWorker {
    calls: Mutex<Vec<&'static str>>,
    printed: Mutex<Vec<String>>,
    events: mpsc::UnboundedSender<WorkerEvent>,
    fail_activity: Option<CommError>,
    panic_on_print: bool,
}

impl MockWorker {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<WorkerEvent>) {
        Self::build(None, false)
    }

    /// Every activity submission fails with `error`.
    pub fn failing_activities(error: CommError) -> (Arc<Self>, mpsc::UnboundedReceiver<WorkerEvent>) {
        Self::build(Some(error), false)
    }

    /// Print requests panic on the calling thread.
    pub fn panicking_print() -> (Arc<Self>, mpsc::UnboundedReceiver<WorkerEvent>) {
        Self::build(None, true)
    }

    fn build(
        fail_activity: Option<CommError>,
        panic_on_print: bool,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<WorkerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            printed: Mutex::new(Vec::new()),
            events: tx,
            fail_activity,
            panic_on_print,
        });
        (worker, rx)
    }

    /// RPC names in the order they were issued.
    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().clone()
    }

    pub fn count(&self, rpc: &str) -> usize {
        self.calls.lock().iter().filter(|name| **name == rpc).count()
    }

    pub fn printed(&self) -> Vec<String> {
        self.printed.lock().clone()
    }

    fn record(&self, rpc: &'static str) {
        self.calls.lock().push(rpc);
    }

    fn forward(&self, event: WorkerEvent) {
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl Worker for MockWorker {
    async fn module_loaded(&self, _request: ModuleRequest) -> Result<(), CommError> {
        self.record("module");
        Ok(())
    }

    async fn activity(&self, request: ActivityRequest) -> Result<(), CommError> {
        self.record("callback");
        if let Some(err) = &self.fail_activity {
            return Err(err.clone());
        }
        self.forward(WorkerEvent::Activity(request));
        Ok(())
    }

    async fn sleep(&self, _request: SleepRequest) -> Result<(), CommError> {
        self.record("sleep");
        Ok(())
    }

    async fn subscribe(&self, _request: SubscribeRequest) -> Result<String, CommError> {
        self.record("subscribe");
        Ok("sub-1".to_string())
    }

    async fn unsubscribe(&self, _request: UnsubscribeRequest) -> Result<(), CommError> {
        self.record("unsubscribe");
        Ok(())
    }

    async fn next_event(&self, _request: NextEventRequest) -> Result<Option<Value>, CommError> {
        self.record("next_event");
        Ok(None)
    }

    async fn signal(&self, _request: SignalRequest) -> Result<(), CommError> {
        self.record("signal");
        Ok(())
    }

    async fn next_signal(&self, _request: NextSignalRequest) -> Result<Option<Signal>, CommError> {
        self.record("next_signal");
        Ok(None)
    }

    async fn store_mutate(&self, _request: StoreMutateRequest) -> Result<Value, CommError> {
        self.record("store_mutate");
        Ok(Value::Nothing)
    }

    async fn store_list(&self, _request: StoreListRequest) -> Result<Vec<String>, CommError> {
        self.record("store_list");
        Ok(Vec::new())
    }

    async fn log(&self, _request: LogRequest) -> Result<(), CommError> {
        self.record("log");
        Ok(())
    }

    async fn print(&self, request: PrintRequest) -> Result<(), CommError> {
        self.record("print");
        if self.panic_on_print {
            panic!("print handler exploded");
        }
        self.printed.lock().push(request.text);
        Ok(())
    }

    async fn done(&self, request: DoneRequest) -> Result<(), CommError> {
        self.record("done");
        self.forward(WorkerEvent::Done(request));
        Ok(())
    }

    async fn health(&self) -> Result<(), CommError> {
        self.record("health");
        Ok(())
    }
}

/// A temporary code directory
pub struct CodeFixture {
    dir: TempDir,
}

impl CodeFixture {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp dir"),
        }
    }

    pub fn with_file(self, relative: &str, contents: &str) -> Self {
        let path = self.dir.path().join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create module dir");
        }
        std::fs::write(&path, contents).expect("Failed to write workflow file");
        self
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Host over this directory with the bundled registry.
    pub fn host(&self, worker: Arc<dyn Worker>) -> RunnerHost {
        let registry = Registry::with_defaults().expect("bundled registry parses");
        let mut settings = RunnerSettings::new(self.path());
        settings.start_timeout = Duration::from_secs(10);
        RunnerHost::new(worker, Arc::new(registry), settings)
    }
}

/// Fatal handler that stores the error text instead of exiting.
pub fn fatal_recorder() -> (FatalHandler, Arc<Mutex<Vec<String>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let handler: FatalHandler = {
        let seen = seen.clone();
        Arc::new(move |err: &CommError| seen.lock().push(err.to_string()))
    };
    (handler, seen)
}

/// Receive the next worker event or fail the test after a few seconds.
pub async fn next_event(events: &mut mpsc::UnboundedReceiver<WorkerEvent>) -> WorkerEvent {
    tokio::time::timeout(Duration::from_secs(10), events.recv())
        .await
        .expect("timed out waiting for a worker event")
        .expect("worker event channel closed")
}

/// Wait until every runner thread has exited.
pub async fn wait_for_idle(host: &RunnerHost) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while host.runner_count() > 0 {
        assert!(
            tokio::time::Instant::now() < deadline,
            "runners still alive after 10s"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
