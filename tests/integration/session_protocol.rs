//! Integration tests for the session lifecycle
//!
//! Tests the flow: RunnerHost -> MockWorker RPCs -> activity replies -> done

use std::sync::Arc;

use tether::comm::{
    ActivityReplyRequest, CommError, ErrorReport, ExecuteRequest, Outcome, RunnerService,
    StartRequest,
};
use tether::script::LoadError;
use tether::{RunnerError, Value};

use super::common::{fatal_recorder, next_event, wait_for_idle, CodeFixture, MockWorker, WorkerEvent};

const INCREMENT: &str = "\
import durable

@durable.activity
def fetch(x):
    return x * 100

def increment(event):
    value = fetch(event)
    print('got', value)
    return value
";

const NESTED: &str = "\
import durable

@durable.activity
def inner(x):
    return x + 1

@durable.activity
def outer(x):
    return inner(x) * 2

def main(event):
    return outer(event)
";

fn start(entry_point: &str, event: Value) -> StartRequest {
    StartRequest {
        runner_id: "r1".to_string(),
        entry_point: entry_point.to_string(),
        event,
    }
}

/// Test that an activity is submitted, resolved by reply, and the session
/// reports its final value
#[tokio::test(flavor = "multi_thread")]
async fn test_activity_reply_resumes_the_session() {
    let code = CodeFixture::new().with_file("wf.flow", INCREMENT);
    let (worker, mut events) = MockWorker::new();
    let host = code.host(worker.clone());

    let started = host
        .start(start("wf.flow:increment", Value::Integer(41)))
        .await
        .expect("session should start");
    assert_eq!(started.runner_id, "r1");
    assert!(started.functions.contains(&"increment".to_string()));

    let request = match next_event(&mut events).await {
        WorkerEvent::Activity(request) => request,
        other => panic!("Expected an activity, got {:?}", other),
    };
    assert_eq!(request.runner_id, "r1");
    assert_eq!(request.call.function, "wf.fetch");
    assert_eq!(request.call.args, vec![Value::Integer(41)]);

    // The orchestrator answers without running the body.
    host.activity_reply(ActivityReplyRequest {
        runner_id: "r1".to_string(),
        call_id: request.data,
        outcome: Outcome::Value(Value::Integer(42)),
    })
    .await
    .expect("reply should be accepted");

    match next_event(&mut events).await {
        WorkerEvent::Done(done) => {
            assert_eq!(done.runner_id, "r1");
            assert_eq!(done.outcome, Outcome::Value(Value::Integer(42)));
        }
        other => panic!("Expected done, got {:?}", other),
    }
    wait_for_idle(&host).await;

    assert_eq!(worker.calls(), vec!["module", "callback", "print", "done"]);
    assert_eq!(worker.printed(), vec!["got 42".to_string()]);
}

/// Test that executing a pending call runs its body on the session thread
/// and keeps every nested call local
#[tokio::test(flavor = "multi_thread")]
async fn test_execute_runs_nested_calls_inline() {
    let code = CodeFixture::new().with_file("wf.flow", NESTED);
    let (worker, mut events) = MockWorker::new();
    let host = code.host(worker.clone());

    host.start(start("wf.flow:main", Value::Integer(4)))
        .await
        .unwrap();

    let request = match next_event(&mut events).await {
        WorkerEvent::Activity(request) => request,
        other => panic!("Expected an activity, got {:?}", other),
    };
    assert_eq!(request.call.function, "wf.outer");

    let outcome = host
        .execute(ExecuteRequest {
            runner_id: "r1".to_string(),
            call_id: request.data.clone(),
        })
        .await
        .expect("execute should run the recorded call");
    assert_eq!(outcome, Outcome::Value(Value::Integer(10)));

    host.activity_reply(ActivityReplyRequest {
        runner_id: "r1".to_string(),
        call_id: request.data,
        outcome,
    })
    .await
    .unwrap();

    match next_event(&mut events).await {
        WorkerEvent::Done(done) => assert_eq!(done.outcome, Outcome::Value(Value::Integer(10))),
        other => panic!("Expected done, got {:?}", other),
    }
    wait_for_idle(&host).await;
    assert_eq!(worker.count("callback"), 1);
}

/// Test that an error reply is raised into workflow code with its kind
#[tokio::test(flavor = "multi_thread")]
async fn test_error_replies_are_catchable() {
    let source = "\
import durable

@durable.activity
def charge(amount):
    return amount

def main(event):
    try:
        charge(event)
    except ActivityError as e:
        return 'declined'
    return 'charged'
";
    let code = CodeFixture::new().with_file("pay.flow", source);
    let (worker, mut events) = MockWorker::new();
    let host = code.host(worker);

    host.start(start("pay.flow:main", Value::Integer(5)))
        .await
        .unwrap();
    let request = match next_event(&mut events).await {
        WorkerEvent::Activity(request) => request,
        other => panic!("Expected an activity, got {:?}", other),
    };
    host.activity_reply(ActivityReplyRequest {
        runner_id: "r1".to_string(),
        call_id: request.data,
        outcome: Outcome::Error(ErrorReport {
            kind: "CardDeclined".to_string(),
            message: "insufficient funds".to_string(),
            traceback: Vec::new(),
        }),
    })
    .await
    .unwrap();

    match next_event(&mut events).await {
        WorkerEvent::Done(done) => assert_eq!(done.outcome, Outcome::Value(Value::from("declined"))),
        other => panic!("Expected done, got {:?}", other),
    }
}

/// Test that replies for unknown calls are rejected without disturbing the
/// pending one
#[tokio::test(flavor = "multi_thread")]
async fn test_unknown_call_ids_are_rejected() {
    let code = CodeFixture::new().with_file("wf.flow", INCREMENT);
    let (worker, mut events) = MockWorker::new();
    let host = code.host(worker);

    host.start(start("wf.flow:increment", Value::Integer(1)))
        .await
        .unwrap();
    let request = match next_event(&mut events).await {
        WorkerEvent::Activity(request) => request,
        other => panic!("Expected an activity, got {:?}", other),
    };

    let err = host
        .activity_reply(ActivityReplyRequest {
            runner_id: "r1".to_string(),
            call_id: "call-99".to_string(),
            outcome: Outcome::Value(Value::Nothing),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, RunnerError::UnknownCall { ref call_id, .. } if call_id == "call-99"));

    let err = host
        .activity_reply(ActivityReplyRequest {
            runner_id: "nope".to_string(),
            call_id: request.data.clone(),
            outcome: Outcome::Value(Value::Nothing),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, RunnerError::UnknownRunner(_)));

    host.activity_reply(ActivityReplyRequest {
        runner_id: "r1".to_string(),
        call_id: request.data,
        outcome: Outcome::Value(Value::Integer(2)),
    })
    .await
    .unwrap();
    match next_event(&mut events).await {
        WorkerEvent::Done(done) => assert_eq!(done.outcome, Outcome::Value(Value::Integer(2))),
        other => panic!("Expected done, got {:?}", other),
    }
}

/// Test that a fatal transport failure stops all further RPCs, including done
#[tokio::test(flavor = "multi_thread")]
async fn test_fatal_transport_failure_stops_the_session() {
    let source = "\
import durable

@durable.activity
def fetch(x):
    return x

def main(event):
    try:
        fetch(event)
    except Exception:
        pass
    print('still running')
    return 1
";
    let code = CodeFixture::new().with_file("wf.flow", source);
    let (worker, _events) =
        MockWorker::failing_activities(CommError::Unavailable("connection reset".to_string()));
    let (fatal, seen) = fatal_recorder();
    let host = code.host(worker.clone()).with_fatal_handler(fatal);

    host.start(start("wf.flow:main", Value::Nothing))
        .await
        .unwrap();
    wait_for_idle(&host).await;

    assert_eq!(worker.calls(), vec!["module", "callback"]);
    let seen = seen.lock().clone();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].contains("connection reset"));
}

/// Test that load failures are reported by start and leave no runner behind
#[tokio::test(flavor = "multi_thread")]
async fn test_load_failures_fail_start() {
    let code = CodeFixture::new()
        .with_file("wf.flow", "def other(event):\n    return 1\n")
        .with_file("broken.flow", "def main(event)\n    return 1\n");
    let (worker, _events) = MockWorker::new();
    let host = code.host(worker.clone());

    let err = host.start(start("wf.flow:main", Value::Nothing)).await.unwrap_err();
    assert!(matches!(
        err,
        RunnerError::Load(LoadError::MissingFunction { ref function, .. }) if function == "main"
    ));

    let mut request = start("broken.flow:main", Value::Nothing);
    request.runner_id = "r2".to_string();
    let err = host.start(request).await.unwrap_err();
    assert!(matches!(err, RunnerError::Load(LoadError::Parse { .. })));

    let mut request = start("missing.flow:main", Value::Nothing);
    request.runner_id = "r3".to_string();
    let err = host.start(request).await.unwrap_err();
    assert!(matches!(err, RunnerError::Load(LoadError::Io { .. })));

    let err = host.start(start("not-an-entry", Value::Nothing)).await.unwrap_err();
    assert!(matches!(err, RunnerError::Load(LoadError::BadEntryPoint(_))));

    wait_for_idle(&host).await;
    assert_eq!(worker.count("module"), 0);
    assert_eq!(worker.count("done"), 0);
}

/// Test that calling a non-callable is reported with its location
#[tokio::test(flavor = "multi_thread")]
async fn test_calling_a_non_callable_names_the_line() {
    let source = "\
def main(event):
    count = 3
    return count()
";
    let code = CodeFixture::new().with_file("wf.flow", source);
    let (worker, mut events) = MockWorker::new();
    let host = code.host(worker);

    host.start(start("wf.flow:main", Value::Nothing))
        .await
        .unwrap();
    match next_event(&mut events).await {
        WorkerEvent::Done(done) => match done.outcome {
            Outcome::Error(report) => {
                assert_eq!(report.kind, "UsageError");
                assert!(report.message.contains("'int' object is not callable"));
                assert!(report.message.contains("wf.flow:3"), "{}", report.message);
            }
            other => panic!("Expected an error outcome, got {:?}", other),
        },
        other => panic!("Expected done, got {:?}", other),
    }
}

/// Test that two sessions on one host are independent
#[tokio::test(flavor = "multi_thread")]
async fn test_sessions_are_isolated() {
    let code = CodeFixture::new().with_file("wf.flow", INCREMENT);
    let (worker, mut events) = MockWorker::new();
    let host = Arc::new(code.host(worker));

    for id in ["a", "b"] {
        let mut request = start("wf.flow:increment", Value::Integer(1));
        request.runner_id = id.to_string();
        host.start(request).await.unwrap();
    }
    let mut duplicate = start("wf.flow:increment", Value::Integer(1));
    duplicate.runner_id = "a".to_string();
    assert!(matches!(
        host.start(duplicate).await.unwrap_err(),
        RunnerError::Duplicate(_)
    ));

    let mut pending = Vec::new();
    while pending.len() < 2 {
        if let WorkerEvent::Activity(request) = next_event(&mut events).await {
            pending.push(request);
        }
    }
    for request in pending {
        let reply = if request.runner_id == "a" { 10 } else { 20 };
        host.activity_reply(ActivityReplyRequest {
            runner_id: request.runner_id,
            call_id: request.data,
            outcome: Outcome::Value(Value::Integer(reply)),
        })
        .await
        .unwrap();
    }

    let mut finished = Vec::new();
    while finished.len() < 2 {
        if let WorkerEvent::Done(done) = next_event(&mut events).await {
            finished.push((done.runner_id, done.outcome));
        }
    }
    finished.sort_by(|a, b| a.0.cmp(&b.0));
    assert_eq!(
        finished,
        vec![
            ("a".to_string(), Outcome::Value(Value::Integer(10))),
            ("b".to_string(), Outcome::Value(Value::Integer(20))),
        ]
    );
}

/// Test that a panic on the execution thread still ends the session with
/// done and frees the runner
#[tokio::test(flavor = "multi_thread")]
async fn test_panics_during_execution_are_reported_through_done() {
    let source = "\
def main(event):
    print('about to fail')
    return 1
";
    let code = CodeFixture::new().with_file("wf.flow", source);
    let (worker, mut events) = MockWorker::panicking_print();
    let host = code.host(worker.clone());

    host.start(start("wf.flow:main", Value::Nothing))
        .await
        .unwrap();
    match next_event(&mut events).await {
        WorkerEvent::Done(done) => match done.outcome {
            Outcome::Error(report) => {
                assert_eq!(report.kind, "RuntimeError");
                assert!(report.message.contains("print handler exploded"), "{}", report.message);
            }
            other => panic!("Expected an error outcome, got {:?}", other),
        },
        other => panic!("Expected done, got {:?}", other),
    }
    wait_for_idle(&host).await;
    assert_eq!(worker.calls(), vec!["module", "print", "done"]);
}

/// Test that integer overflow in workflow arithmetic is a workflow error
#[tokio::test(flavor = "multi_thread")]
async fn test_integer_overflow_fails_the_session_cleanly() {
    let code = CodeFixture::new().with_file("wf.flow", "def main(event):\n    return event // -1\n");
    let (worker, mut events) = MockWorker::new();
    let host = code.host(worker.clone());

    host.start(start("wf.flow:main", Value::Integer(i64::MIN)))
        .await
        .unwrap();
    match next_event(&mut events).await {
        WorkerEvent::Done(done) => match done.outcome {
            Outcome::Error(report) => assert!(report.message.contains("overflow")),
            other => panic!("Expected an error outcome, got {:?}", other),
        },
        other => panic!("Expected done, got {:?}", other),
    }
    wait_for_idle(&host).await;
    assert_eq!(worker.calls(), vec!["module", "done"]);
}
