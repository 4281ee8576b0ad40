//! In-process worker for `tether run`.
//!
//! Activities are not executed here; they are surfaced as [`LocalEvent`]s
//! and [`drive`] feeds each one straight back through Execute and
//! ActivityReply. Everything else (store, sleep, event and signal queues)
//! is answered locally.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};

use super::{
    ActivityReplyRequest, ActivityRequest, CommError, DoneRequest, ExecuteRequest, LogRequest,
    ModuleRequest, NextEventRequest, NextSignalRequest, Outcome, PrintRequest, RunnerService,
    Signal, SignalRequest, SleepRequest, StartRequest, StoreListRequest, StoreMutateRequest,
    SubscribeRequest, UnsubscribeRequest, Worker,
};
use crate::runner::RunnerError;
use crate::value::{Duration, Value};

/// Requests the local worker cannot answer by itself.
#[derive(Debug, Clone)]
pub enum LocalEvent {
    Module(ModuleRequest),
    Activity(ActivityRequest),
    Done(DoneRequest),
}

#[derive(Default)]
struct Queues {
    subscriptions: HashMap<String, VecDeque<Value>>,
    signals: VecDeque<Signal>,
}

pub struct LocalWorker {
    events: mpsc::UnboundedSender<LocalEvent>,
    store: Mutex<BTreeMap<String, Value>>,
    queues: Mutex<Queues>,
    arrivals: Notify,
    printed: Mutex<Vec<String>>,
    echo: bool,
}

impl LocalWorker {
    /// Worker that echoes printed lines to stdout.
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<LocalEvent>) {
        Self::build(true)
    }

    /// Worker that only records printed lines.
    pub fn quiet() -> (Arc<Self>, mpsc::UnboundedReceiver<LocalEvent>) {
        Self::build(false)
    }

    fn build(echo: bool) -> (Arc<Self>, mpsc::UnboundedReceiver<LocalEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let worker = Arc::new(Self {
            events,
            store: Mutex::new(BTreeMap::new()),
            queues: Mutex::new(Queues::default()),
            arrivals: Notify::new(),
            printed: Mutex::new(Vec::new()),
            echo,
        });
        (worker, rx)
    }

    pub fn printed(&self) -> Vec<String> {
        self.printed.lock().clone()
    }

    pub fn store_snapshot(&self) -> BTreeMap<String, Value> {
        self.store.lock().clone()
    }

    /// Deliver an event to a subscription. Unknown subscriptions are ignored.
    pub fn push_event(&self, subscription_id: &str, data: Value) {
        if let Some(queue) = self.queues.lock().subscriptions.get_mut(subscription_id) {
            queue.push_back(data);
        }
        self.arrivals.notify_waiters();
    }

    pub fn push_signal(&self, signal: Signal) {
        self.queues.lock().signals.push_back(signal);
        self.arrivals.notify_waiters();
    }

    fn emit(&self, event: LocalEvent) -> Result<(), CommError> {
        self.events
            .send(event)
            .map_err(|_| CommError::Unavailable("local session driver stopped".into()))
    }

    /// Poll `take` until it yields or the timeout passes. Without a timeout
    /// only what is already queued can be returned: nothing else can arrive
    /// while the session itself is blocked.
    async fn wait_for<T>(
        &self,
        rpc: &str,
        timeout: Option<Duration>,
        mut take: impl FnMut(&mut Queues) -> Result<Option<T>, String>,
    ) -> Result<Option<T>, CommError> {
        let deadline = timeout.map(|t| tokio::time::Instant::now() + t.to_std());
        loop {
            let arrived = self.arrivals.notified();
            let taken = take(&mut self.queues.lock()).map_err(|message| CommError::Remote {
                rpc: rpc.to_string(),
                message,
            })?;
            if taken.is_some() {
                return Ok(taken);
            }
            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, arrived).await.is_err() {
                        return Ok(None);
                    }
                }
                None => {
                    tracing::warn!(rpc, "Wait without timeout has nothing queued locally");
                    return Ok(None);
                }
            }
        }
    }
}

#[async_trait]
impl Worker for LocalWorker {
    async fn module_loaded(&self, request: ModuleRequest) -> Result<(), CommError> {
        tracing::debug!(runner_id = %request.runner_id, functions = ?request.functions, "Module loaded");
        self.emit(LocalEvent::Module(request))
    }

    async fn activity(&self, request: ActivityRequest) -> Result<(), CommError> {
        self.emit(LocalEvent::Activity(request))
    }

    async fn sleep(&self, request: SleepRequest) -> Result<(), CommError> {
        tokio::time::sleep(request.duration.to_std()).await;
        Ok(())
    }

    async fn subscribe(&self, request: SubscribeRequest) -> Result<String, CommError> {
        let id = format!("sub-{}", uuid::Uuid::new_v4());
        tracing::debug!(connection = %request.connection, filter = %request.filter, id = %id, "Subscribed");
        self.queues
            .lock()
            .subscriptions
            .insert(id.clone(), VecDeque::new());
        Ok(id)
    }

    async fn unsubscribe(&self, request: UnsubscribeRequest) -> Result<(), CommError> {
        self.queues
            .lock()
            .subscriptions
            .remove(&request.subscription_id);
        Ok(())
    }

    async fn next_event(&self, request: NextEventRequest) -> Result<Option<Value>, CommError> {
        let ids = request.subscription_ids;
        self.wait_for("next_event", request.timeout, |queues| {
            for id in &ids {
                let queue = queues
                    .subscriptions
                    .get_mut(id)
                    .ok_or_else(|| format!("unknown subscription '{id}'"))?;
                if let Some(data) = queue.pop_front() {
                    return Ok(Some(data));
                }
            }
            Ok(None)
        })
        .await
    }

    async fn signal(&self, request: SignalRequest) -> Result<(), CommError> {
        tracing::debug!(session_id = %request.session_id, name = %request.name, "Signal queued");
        self.push_signal(Signal {
            name: request.name,
            payload: request.payload,
        });
        Ok(())
    }

    async fn next_signal(&self, request: NextSignalRequest) -> Result<Option<Signal>, CommError> {
        let names = request.names;
        self.wait_for("next_signal", request.timeout, |queues| {
            let position = queues
                .signals
                .iter()
                .position(|s| names.iter().any(|n| n == &s.name));
            Ok(position.and_then(|i| queues.signals.remove(i)))
        })
        .await
    }

    async fn store_mutate(&self, request: StoreMutateRequest) -> Result<Value, CommError> {
        apply_store_op(
            &mut self.store.lock(),
            &request.key,
            &request.operation,
            request.operands,
        )
        .map_err(|message| CommError::Remote {
            rpc: "store_mutate".into(),
            message,
        })
    }

    async fn store_list(&self, _request: StoreListRequest) -> Result<Vec<String>, CommError> {
        Ok(self.store.lock().keys().cloned().collect())
    }

    async fn log(&self, request: LogRequest) -> Result<(), CommError> {
        let runner_id = request.runner_id.as_str();
        let message = request.message.as_str();
        match request.level.as_str() {
            "error" => tracing::error!(target: "workflow", runner_id, "{message}"),
            "warning" | "warn" => tracing::warn!(target: "workflow", runner_id, "{message}"),
            "debug" => tracing::debug!(target: "workflow", runner_id, "{message}"),
            _ => tracing::info!(target: "workflow", runner_id, "{message}"),
        }
        Ok(())
    }

    async fn print(&self, request: PrintRequest) -> Result<(), CommError> {
        if self.echo {
            println!("{}", request.text);
        }
        self.printed.lock().push(request.text);
        Ok(())
    }

    async fn done(&self, request: DoneRequest) -> Result<(), CommError> {
        self.emit(LocalEvent::Done(request))
    }

    async fn health(&self) -> Result<(), CommError> {
        Ok(())
    }
}

/// Apply one store operation: `get`, `set`, `del` or `add`.
///
/// `get` and `del` yield the stored value (nothing when absent), `set`
/// and `add` yield the new value. `add` starts from zero.
pub fn apply_store_op(
    store: &mut BTreeMap<String, Value>,
    key: &str,
    operation: &str,
    operands: Vec<Value>,
) -> Result<Value, String> {
    let mut operands = operands.into_iter();
    match operation {
        "get" => Ok(store.get(key).cloned().unwrap_or(Value::Nothing)),
        "set" => {
            let value = operands
                .next()
                .ok_or_else(|| "set needs a value".to_string())?;
            store.insert(key.to_string(), value.clone());
            Ok(value)
        }
        "del" => Ok(store.remove(key).unwrap_or(Value::Nothing)),
        "add" => {
            let amount = operands.next().unwrap_or(Value::Integer(1));
            let current = store.get(key).cloned().unwrap_or(Value::Integer(0));
            let sum = match (&current, &amount) {
                (Value::Integer(a), Value::Integer(b)) => a
                    .checked_add(*b)
                    .map(Value::Integer)
                    .ok_or_else(|| format!("integer overflow adding to '{key}'"))?,
                (Value::Integer(a), Value::Float(b)) => Value::Float(*a as f64 + b),
                (Value::Float(a), Value::Integer(b)) => Value::Float(a + *b as f64),
                (Value::Float(a), Value::Float(b)) => Value::Float(a + b),
                _ => {
                    return Err(format!(
                        "cannot add {} to {} at '{key}'",
                        amount.type_name(),
                        current.type_name()
                    ))
                }
            };
            store.insert(key.to_string(), sum.clone());
            Ok(sum)
        }
        other => Err(format!("unknown store operation '{other}'")),
    }
}

/// Run one session to completion against a [`LocalWorker`], executing each
/// activity as soon as it is requested.
pub async fn drive(
    service: &dyn RunnerService,
    mut events: mpsc::UnboundedReceiver<LocalEvent>,
    start: StartRequest,
) -> Result<Outcome, RunnerError> {
    let runner_id = start.runner_id.clone();
    service.start(start).await?;
    while let Some(event) = events.recv().await {
        match event {
            LocalEvent::Module(_) => {}
            LocalEvent::Activity(request) => {
                let call_id = request.data;
                tracing::debug!(function = %request.call.function, call_id = %call_id, "Executing activity locally");
                let outcome = service
                    .execute(ExecuteRequest {
                        runner_id: request.runner_id.clone(),
                        call_id: call_id.clone(),
                    })
                    .await?;
                service
                    .activity_reply(ActivityReplyRequest {
                        runner_id: request.runner_id,
                        call_id,
                        outcome,
                    })
                    .await?;
            }
            LocalEvent::Done(done) if done.runner_id == runner_id => return Ok(done.outcome),
            LocalEvent::Done(done) => {
                tracing::debug!(runner_id = %done.runner_id, "Ignoring done for another runner");
            }
        }
    }
    Err(RunnerError::ThreadExited(runner_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_ops_follow_get_set_del_add() {
        let mut store = BTreeMap::new();
        assert_eq!(apply_store_op(&mut store, "n", "get", vec![]), Ok(Value::Nothing));
        assert_eq!(apply_store_op(&mut store, "n", "add", vec![]), Ok(Value::Integer(1)));
        assert_eq!(
            apply_store_op(&mut store, "n", "add", vec![Value::Float(0.5)]),
            Ok(Value::Float(1.5))
        );
        assert_eq!(
            apply_store_op(&mut store, "s", "set", vec![Value::from("x")]),
            Ok(Value::from("x"))
        );
        assert!(apply_store_op(&mut store, "s", "add", vec![Value::Integer(1)]).is_err());
        assert_eq!(apply_store_op(&mut store, "s", "del", vec![]), Ok(Value::from("x")));
        assert!(!store.contains_key("s"));
        assert!(apply_store_op(&mut store, "s", "swap", vec![]).is_err());
    }

    #[tokio::test]
    async fn queued_events_are_returned_in_order() {
        let (worker, _events) = LocalWorker::quiet();
        let id = worker
            .subscribe(SubscribeRequest {
                runner_id: "r".into(),
                connection: "webhook".into(),
                filter: String::new(),
            })
            .await
            .unwrap();
        worker.push_event(&id, Value::Integer(1));
        worker.push_event(&id, Value::Integer(2));

        let next = |timeout| NextEventRequest {
            runner_id: "r".into(),
            subscription_ids: vec![id.clone()],
            timeout,
        };
        assert_eq!(worker.next_event(next(None)).await.unwrap(), Some(Value::Integer(1)));
        assert_eq!(worker.next_event(next(None)).await.unwrap(), Some(Value::Integer(2)));
        let short = Some(Duration { seconds: 0, nanos: 10_000_000 });
        assert_eq!(worker.next_event(next(short)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn signals_wake_a_waiting_receiver() {
        let (worker, _events) = LocalWorker::quiet();
        let waiter = tokio::spawn({
            let worker = worker.clone();
            async move {
                worker
                    .next_signal(NextSignalRequest {
                        runner_id: "r".into(),
                        names: vec!["approve".into()],
                        timeout: Some(Duration { seconds: 5, nanos: 0 }),
                    })
                    .await
            }
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        worker.push_signal(Signal {
            name: "ignored".into(),
            payload: Value::Nothing,
        });
        worker.push_signal(Signal {
            name: "approve".into(),
            payload: Value::Boolean(true),
        });
        let signal = waiter.await.unwrap().unwrap().unwrap();
        assert_eq!(signal.name, "approve");
        assert_eq!(signal.payload, Value::Boolean(true));
    }

    #[tokio::test]
    async fn unknown_subscriptions_are_remote_errors() {
        let (worker, _events) = LocalWorker::quiet();
        let err = worker
            .next_event(NextEventRequest {
                runner_id: "r".into(),
                subscription_ids: vec!["nope".into()],
                timeout: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err.rpc(), Some("next_event"));
    }
}
