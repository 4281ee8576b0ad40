//! Integration tests for local runs
//!
//! Tests the flow: LocalWorker -> drive -> activities executed in-process

use std::sync::Arc;

use tether::comm::local::{self, LocalWorker};
use tether::comm::{Outcome, StartRequest};
use tether::value::DictItem;
use tether::{Registry, RunnerHost, RunnerSettings, Value};

use super::common::CodeFixture;

type LocalEvents = tokio::sync::mpsc::UnboundedReceiver<local::LocalEvent>;

fn local_host(code: &CodeFixture) -> (RunnerHost, Arc<LocalWorker>, LocalEvents) {
    let (worker, events) = LocalWorker::quiet();
    let registry = Registry::with_defaults().unwrap();
    let host = RunnerHost::new(
        worker.clone(),
        Arc::new(registry),
        RunnerSettings::new(code.path()),
    );
    (host, worker, events)
}

fn start(entry_point: &str, event: Value) -> StartRequest {
    StartRequest {
        runner_id: "local".to_string(),
        entry_point: entry_point.to_string(),
        event,
    }
}

/// Test that activities run locally and their results flow back
#[tokio::test(flavor = "multi_thread")]
async fn test_drive_executes_activities_in_process() {
    let code = CodeFixture::new()
        .with_file(
            "lib/pricing.flow",
            "def total(items):\n    return sum(items)\n",
        )
        .with_file(
            "orders.flow",
            "\
import durable
import lib.pricing as pricing

@durable.activity
def quote(items):
    return pricing.total(items)

def main(event):
    price = quote(event['items'])
    durable.store_set('last', price)
    print('quoted', price)
    return [price, len(event['items'])]
",
        );
    let (host, worker, events) = local_host(&code);

    let event = Value::Dict(vec![DictItem {
        k: Value::from("items"),
        v: Value::List(vec![Value::Integer(3), Value::Integer(4)]),
    }]);
    let outcome = local::drive(&host, events, start("orders.flow:main", event))
        .await
        .expect("local run should finish");

    assert_eq!(
        outcome,
        Outcome::Value(Value::List(vec![Value::Integer(7), Value::Integer(2)]))
    );
    assert_eq!(worker.printed(), vec!["quoted 7".to_string()]);
    assert_eq!(
        worker.store_snapshot().get("last"),
        Some(&Value::Integer(7))
    );
}

/// Test that a raising workflow yields an error outcome with a traceback
#[tokio::test(flavor = "multi_thread")]
async fn test_drive_reports_workflow_errors() {
    let code = CodeFixture::new().with_file(
        "wf.flow",
        "\
def main(event):
    raise ValueError('bad input')
",
    );
    let (host, _worker, events) = local_host(&code);

    let outcome = local::drive(&host, events, start("wf.flow:main", Value::Nothing))
        .await
        .unwrap();
    match outcome {
        Outcome::Error(report) => {
            assert_eq!(report.kind, "ValueError");
            assert_eq!(report.message, "bad input");
            assert!(!report.traceback.is_empty());
        }
        other => panic!("Expected an error outcome, got {:?}", other),
    }
}
