//! Cancellation: Ctrl+C style requests and the run deadline

use crate::common::{executor_with_sink, items, test_config};
use iga_backup::backup::{FailureKind, RunOutcome};
use iga_backup::config::{EnabledEndpoints, EndpointSpec};
use iga_backup::output::MemorySink;
use iga_backup::shutdown::{ShutdownCoordinator, ShutdownReason};
use std::time::Duration;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

fn endpoints() -> EnabledEndpoints {
    EnabledEndpoints::new(
        vec![
            EndpointSpec::global("alpha", "/api/alpha"),
            EndpointSpec::global("beta", "/api/beta"),
        ],
        Vec::new(),
    )
    .unwrap()
}

#[tokio::test]
async fn test_cancelled_before_start_issues_no_requests() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(items(&["x"])))
        .expect(0)
        .mount(&server)
        .await;

    let shutdown = ShutdownCoordinator::shared();
    shutdown.request_shutdown();
    let (executor, sink) = executor_with_sink(&test_config(&server.uri()), MemorySink::new(), shutdown);
    let summary = executor.run(&endpoints()).await;

    assert_eq!(
        summary.outcome,
        RunOutcome::Aborted {
            reason: ShutdownReason::Interrupted
        }
    );
    assert_eq!(summary.failures.len(), 2);
    assert!(summary.failures.iter().all(|f| f.kind == FailureKind::Cancelled));
    assert!(sink.batches().is_empty());
    assert!(sink.is_finished());
}

#[tokio::test]
async fn test_in_flight_requests_abandoned() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(items(&["x"]))
                .set_delay(Duration::from_secs(30)),
        )
        .mount(&server)
        .await;

    let shutdown = ShutdownCoordinator::shared();
    let (executor, _sink) =
        executor_with_sink(&test_config(&server.uri()), MemorySink::new(), shutdown.clone());

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        shutdown.request_shutdown();
    });

    let summary = tokio::time::timeout(Duration::from_secs(10), executor.run(&endpoints()))
        .await
        .expect("run should stop promptly after cancellation");

    assert_eq!(
        summary.outcome,
        RunOutcome::Aborted {
            reason: ShutdownReason::Interrupted
        }
    );
    assert_eq!(summary.total_records, 0);
    assert!(summary.failures.iter().all(|f| f.kind == FailureKind::Cancelled));
}

#[tokio::test]
async fn test_deadline_aborts_run() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(items(&["x"]))
                .set_delay(Duration::from_secs(30)),
        )
        .mount(&server)
        .await;

    let mut config = test_config(&server.uri());
    config.run.deadline_secs = Some(1);
    let (executor, _sink) = executor_with_sink(&config, MemorySink::new(), ShutdownCoordinator::shared());

    let summary = tokio::time::timeout(Duration::from_secs(10), executor.run(&endpoints()))
        .await
        .expect("run should stop at the deadline");

    assert_eq!(
        summary.outcome,
        RunOutcome::Aborted {
            reason: ShutdownReason::DeadlineExceeded
        }
    );
}
