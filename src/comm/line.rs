//! Line-delimited JSON transport.
//!
//! [`LinePeer`] writes envelopes and matches replies to pending requests by
//! id; [`serve`] runs the read loop, resolving replies and dispatching the
//! worker's own requests to a [`RunnerService`].

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{oneshot, Mutex};

use super::protocol::{self, Envelope};
use super::{
    ActivityReplyRequest, ActivityRequest, CommError, DoneRequest, ExecuteRequest, LogRequest,
    ModuleRequest, NextEventRequest, NextEventResponse, NextSignalRequest, NextSignalResponse,
    PrintRequest, RunnerService, Signal, SignalRequest, SleepRequest, StartRequest,
    StoreListRequest, StoreListResponse, StoreMutateRequest, StoreMutateResponse,
    SubscribeRequest, SubscribeResponse, UnsubscribeRequest, Worker,
};
use crate::value::Value;

type Writer = Box<dyn AsyncWrite + Send + Unpin>;

#[derive(Clone)]
pub struct LinePeer {
    writer: Arc<Mutex<Writer>>,
    pending: Arc<Mutex<HashMap<u64, oneshot::Sender<Envelope>>>>,
    id_counter: Arc<AtomicU64>,
    closed: Arc<AtomicBool>,
}

impl LinePeer {
    pub fn new(writer: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self {
            writer: Arc::new(Mutex::new(Box::new(writer))),
            pending: Arc::new(Mutex::new(HashMap::new())),
            id_counter: Arc::new(AtomicU64::new(1)),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    fn next_request_id(&self) -> u64 {
        self.id_counter.fetch_add(1, Ordering::Relaxed)
    }

    pub async fn send(&self, envelope: &Envelope) -> io::Result<()> {
        let raw = envelope.to_line()?;
        let mut guard = self.writer.lock().await;
        guard.write_all(raw.as_bytes()).await?;
        guard.write_all(b"\n").await?;
        guard.flush().await
    }

    /// Send a request and wait for its reply.
    pub async fn request<T: Serialize, R: DeserializeOwned>(
        &self,
        kind: &str,
        payload: &T,
    ) -> Result<R, CommError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CommError::Unavailable("connection closed".into()));
        }
        let request_id = self.next_request_id();
        let envelope = Envelope::request(request_id, kind, payload).map_err(|e| {
            CommError::Malformed {
                rpc: kind.to_string(),
                message: e.to_string(),
            }
        })?;

        let (tx, rx) = oneshot::channel();
        {
            // close() flips the flag under this lock, so a request that
            // races it is either refused here or cleared by it.
            let mut pending = self.pending.lock().await;
            if self.closed.load(Ordering::Acquire) {
                return Err(CommError::Unavailable("connection closed".into()));
            }
            pending.insert(request_id, tx);
        }
        if let Err(err) = self.send(&envelope).await {
            self.pending.lock().await.remove(&request_id);
            return Err(CommError::Unavailable(err.to_string()));
        }
        tracing::trace!(rpc = kind, id = request_id, "Request sent");

        let reply = rx
            .await
            .map_err(|_| CommError::Cancelled(format!("connection closed before {kind} reply")))?;
        if let Some(message) = reply.error() {
            return Err(CommError::Remote {
                rpc: kind.to_string(),
                message: message.to_string(),
            });
        }
        reply.decode().map_err(|e| CommError::Malformed {
            rpc: kind.to_string(),
            message: e.to_string(),
        })
    }

    async fn resolve(&self, reply: Envelope) {
        let Some(request_id) = reply.id else {
            tracing::warn!("Dropping reply without an id");
            return;
        };
        match self.pending.lock().await.remove(&request_id) {
            Some(tx) => {
                if tx.send(reply).is_err() {
                    tracing::debug!(id = request_id, "Dropping reply; requester already gone");
                }
            }
            None => tracing::warn!(id = request_id, "Reply for unknown request id"),
        }
    }

    /// Fail every in-flight request and refuse new ones.
    pub async fn close(&self) {
        let mut pending = self.pending.lock().await;
        self.closed.store(true, Ordering::Release);
        pending.clear();
    }
}

/// Read envelopes until EOF. Replies resolve pending requests; anything else
/// is a worker request, handled on its own task so a long `execute` does not
/// stall the replies it depends on.
pub async fn serve<R>(
    reader: R,
    peer: LinePeer,
    service: Arc<dyn RunnerService>,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buffer = String::new();
    let result = loop {
        buffer.clear();
        match reader.read_line(&mut buffer).await {
            Ok(0) => break Ok(()),
            Ok(_) => {
                let line = buffer.trim();
                if line.is_empty() {
                    continue;
                }
                match Envelope::from_line(line) {
                    Ok(envelope) if envelope.is_reply() => peer.resolve(envelope).await,
                    Ok(envelope) => {
                        let peer = peer.clone();
                        let service = service.clone();
                        tokio::spawn(async move {
                            handle_request(&peer, service.as_ref(), envelope).await;
                        });
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "Failed to parse envelope");
                    }
                }
            }
            Err(err) => break Err(err),
        }
    };
    tracing::info!("Worker connection closed");
    peer.close().await;
    result
}

async fn handle_request(peer: &LinePeer, service: &dyn RunnerService, envelope: Envelope) {
    let kind = envelope.kind.clone();
    let outcome: Result<serde_json::Value, String> = match kind.as_str() {
        protocol::RUN => match envelope.decode::<StartRequest>() {
            Ok(request) => respond(service.start(request).await),
            Err(err) => Err(err.to_string()),
        },
        protocol::EXECUTE => match envelope.decode::<ExecuteRequest>() {
            Ok(request) => respond(service.execute(request).await),
            Err(err) => Err(err.to_string()),
        },
        protocol::RESPONSE => match envelope.decode::<ActivityReplyRequest>() {
            Ok(request) => respond(service.activity_reply(request).await),
            Err(err) => Err(err.to_string()),
        },
        protocol::HEALTH => respond(service.health().await),
        other => Err(format!("unknown request type '{other}'")),
    };

    let Some(id) = envelope.id else {
        if let Err(message) = outcome {
            tracing::warn!(kind = %kind, error = %message, "Notification failed");
        }
        return;
    };
    let reply = match outcome {
        Ok(payload) => Envelope::reply(id, payload),
        Err(message) => {
            tracing::warn!(kind = %kind, error = %message, "Request failed");
            Envelope::error_reply(id, message)
        }
    };
    if let Err(err) = peer.send(&reply).await {
        tracing::warn!(kind = %kind, error = %err, "Failed to send reply");
    }
}

fn respond<T: Serialize, E: std::fmt::Display>(
    result: Result<T, E>,
) -> Result<serde_json::Value, String> {
    let value = result.map_err(|e| e.to_string())?;
    serde_json::to_value(value).map_err(|e| e.to_string())
}

#[async_trait]
impl Worker for LinePeer {
    async fn module_loaded(&self, request: ModuleRequest) -> Result<(), CommError> {
        self.request(protocol::MODULE, &request).await
    }

    async fn activity(&self, request: ActivityRequest) -> Result<(), CommError> {
        self.request(protocol::CALLBACK, &request).await
    }

    async fn sleep(&self, request: SleepRequest) -> Result<(), CommError> {
        self.request(protocol::SLEEP, &request).await
    }

    async fn subscribe(&self, request: SubscribeRequest) -> Result<String, CommError> {
        let response: SubscribeResponse = self.request(protocol::SUBSCRIBE, &request).await?;
        Ok(response.subscription_id)
    }

    async fn unsubscribe(&self, request: UnsubscribeRequest) -> Result<(), CommError> {
        self.request(protocol::UNSUBSCRIBE, &request).await
    }

    async fn next_event(&self, request: NextEventRequest) -> Result<Option<Value>, CommError> {
        let response: NextEventResponse = self.request(protocol::NEXT_EVENT, &request).await?;
        Ok(response.event)
    }

    async fn signal(&self, request: SignalRequest) -> Result<(), CommError> {
        self.request(protocol::SIGNAL, &request).await
    }

    async fn next_signal(&self, request: NextSignalRequest) -> Result<Option<Signal>, CommError> {
        let response: NextSignalResponse = self.request(protocol::NEXT_SIGNAL, &request).await?;
        Ok(response.signal)
    }

    async fn store_mutate(&self, request: StoreMutateRequest) -> Result<Value, CommError> {
        let response: StoreMutateResponse = self.request(protocol::STORE_MUTATE, &request).await?;
        Ok(response.value)
    }

    async fn store_list(&self, request: StoreListRequest) -> Result<Vec<String>, CommError> {
        let response: StoreListResponse = self.request(protocol::STORE_LIST, &request).await?;
        Ok(response.keys)
    }

    async fn log(&self, request: LogRequest) -> Result<(), CommError> {
        self.request(protocol::LOG, &request).await
    }

    async fn print(&self, request: PrintRequest) -> Result<(), CommError> {
        self.request(protocol::PRINT, &request).await
    }

    async fn done(&self, request: DoneRequest) -> Result<(), CommError> {
        self.request(protocol::DONE, &request).await
    }

    async fn health(&self) -> Result<(), CommError> {
        self.request(protocol::HEALTH, &serde_json::Value::Null).await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::comm::{HealthResponse, Outcome, StartResponse};
    use crate::runner::RunnerError;
    use serde_json::json;
    use tokio::io::{DuplexStream, Lines, ReadHalf, WriteHalf};

    struct EchoService;

    #[async_trait]
    impl RunnerService for EchoService {
        async fn start(&self, request: StartRequest) -> Result<StartResponse, RunnerError> {
            Ok(StartResponse {
                runner_id: request.runner_id,
                functions: vec!["main".into()],
            })
        }

        async fn execute(&self, request: ExecuteRequest) -> Result<Outcome, RunnerError> {
            Err(RunnerError::UnknownCall {
                runner_id: request.runner_id,
                call_id: request.call_id,
            })
        }

        async fn activity_reply(&self, _request: ActivityReplyRequest) -> Result<(), RunnerError> {
            Ok(())
        }

        async fn health(&self) -> Result<HealthResponse, RunnerError> {
            Ok(HealthResponse { runners: 0 })
        }
    }

    struct FakeWorker {
        lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
        writer: WriteHalf<DuplexStream>,
    }

    impl FakeWorker {
        async fn recv(&mut self) -> Envelope {
            let line = self.lines.next_line().await.unwrap().unwrap();
            Envelope::from_line(&line).unwrap()
        }

        async fn send(&mut self, envelope: Envelope) {
            let line = format!("{}\n", envelope.to_line().unwrap());
            self.writer.write_all(line.as_bytes()).await.unwrap();
        }
    }

    fn connect() -> (LinePeer, FakeWorker) {
        let (harness, worker) = tokio::io::duplex(64 * 1024);
        let (harness_read, harness_write) = tokio::io::split(harness);
        let peer = LinePeer::new(harness_write);
        tokio::spawn(serve(harness_read, peer.clone(), Arc::new(EchoService)));
        let (worker_read, worker_write) = tokio::io::split(worker);
        let fake = FakeWorker {
            lines: BufReader::new(worker_read).lines(),
            writer: worker_write,
        };
        (peer, fake)
    }

    fn store_request() -> StoreMutateRequest {
        StoreMutateRequest {
            runner_id: "r1".into(),
            key: "count".into(),
            operation: "add".into(),
            operands: vec![Value::Integer(5)],
        }
    }

    #[tokio::test]
    async fn replies_resolve_the_matching_request() {
        let (peer, mut worker) = connect();
        let first = tokio::spawn({
            let peer = peer.clone();
            async move { peer.store_mutate(store_request()).await }
        });
        let second = tokio::spawn({
            let peer = peer.clone();
            async move {
                peer.store_list(StoreListRequest {
                    runner_id: "r1".into(),
                })
                .await
            }
        });

        let a = worker.recv().await;
        let b = worker.recv().await;
        let (mutate, list) = if a.kind == protocol::STORE_MUTATE { (a, b) } else { (b, a) };
        assert_eq!(mutate.decode::<StoreMutateRequest>().unwrap(), store_request());

        // Answer out of order; correlation is by id only.
        worker
            .send(Envelope::reply(list.id.unwrap(), json!({"keys": ["count"]})))
            .await;
        worker
            .send(Envelope::reply(mutate.id.unwrap(), json!({"value": {"integer": 5}})))
            .await;

        assert_eq!(first.await.unwrap().unwrap(), Value::Integer(5));
        assert_eq!(second.await.unwrap().unwrap(), vec!["count".to_string()]);
    }

    #[tokio::test]
    async fn error_replies_name_the_rpc() {
        let (peer, mut worker) = connect();
        let pending = tokio::spawn({
            let peer = peer.clone();
            async move {
                peer.print(PrintRequest {
                    runner_id: "r1".into(),
                    text: "hi".into(),
                })
                .await
            }
        });
        let request = worker.recv().await;
        worker
            .send(Envelope::error_reply(request.id.unwrap(), "session gone"))
            .await;

        let err = pending.await.unwrap().unwrap_err();
        assert_eq!(
            err,
            CommError::Remote {
                rpc: "print".into(),
                message: "session gone".into()
            }
        );
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn closed_connections_are_fatal() {
        let (peer, mut worker) = connect();
        let pending = tokio::spawn({
            let peer = peer.clone();
            async move { peer.health().await }
        });
        worker.recv().await;
        drop(worker);

        let err = pending.await.unwrap().unwrap_err();
        assert!(err.is_fatal(), "{err:?}");
    }

    #[tokio::test]
    async fn worker_requests_are_served() {
        let (_peer, mut worker) = connect();
        let start = StartRequest {
            runner_id: "r9".into(),
            entry_point: "wf.flow:main".into(),
            event: Value::Nothing,
        };
        worker
            .send(Envelope::request(11, protocol::RUN, &start).unwrap())
            .await;
        let reply = worker.recv().await;
        assert_eq!(reply.id, Some(11));
        assert_eq!(reply.error(), None);
        let response: StartResponse = reply.decode().unwrap();
        assert_eq!(response.runner_id, "r9");

        worker
            .send(Envelope::request(12, "bogus", &json!({})).unwrap())
            .await;
        let reply = worker.recv().await;
        assert_eq!(reply.id, Some(12));
        assert!(reply.error().unwrap().contains("bogus"));

        let execute = ExecuteRequest {
            runner_id: "r9".into(),
            call_id: "c1".into(),
        };
        worker
            .send(Envelope::request(13, protocol::EXECUTE, &execute).unwrap())
            .await;
        let reply = worker.recv().await;
        assert!(reply.error().unwrap().contains("c1"));
    }

    #[tokio::test]
    async fn requests_after_close_fail_without_waiting() {
        // The worker end stays open, so only the closed flag can refuse.
        let (peer, _worker) = connect();
        peer.close().await;

        let result = tokio::time::timeout(Duration::from_secs(5), peer.health()).await;
        let err = result.expect("request should not hang").unwrap_err();
        assert!(matches!(err, CommError::Unavailable(_)), "{err:?}");
        assert!(peer.pending.lock().await.is_empty());
    }
}
