//! Sink failures stay local to the batch and the sink

use crate::common::{items, test_config};
use iga_backup::backup::{BackupExecutor, FailureKind, RunOutcome};
use iga_backup::config::{EnabledEndpoints, EndpointSpec};
use iga_backup::output::{BackupLayout, JsonSink, MemorySink, Sink, SinkTarget};
use iga_backup::shutdown::ShutdownCoordinator;
use std::sync::Arc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_rejected_batch_does_not_affect_other_sinks() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/alpha"))
        .respond_with(ResponseTemplate::new(200).set_body_json(items(&["a1"])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/beta"))
        .respond_with(ResponseTemplate::new(200).set_body_json(items(&["b1", "b2"])))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let memory = Arc::new(MemorySink::new().failing_on("beta"));
    let json = Arc::new(JsonSink::new(BackupLayout::at(dir.path())));
    let executor = BackupExecutor::from_config(&test_config(&server.uri()), ShutdownCoordinator::shared())
        .unwrap()
        .with_sinks(vec![memory.clone() as Arc<dyn Sink>, json as Arc<dyn Sink>]);

    let endpoints = EnabledEndpoints::new(
        vec![
            EndpointSpec::global("alpha", "/api/alpha"),
            EndpointSpec::global("beta", "/api/beta"),
        ],
        Vec::new(),
    )
    .unwrap();
    let summary = executor.run(&endpoints).await;

    assert_eq!(summary.outcome, RunOutcome::CompletedWithFailures);
    let failures: Vec<_> = summary.failures_for("beta").collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].kind, FailureKind::Sink);
    assert!(failures[0].message.contains("memory"));

    assert!(memory.records_for(&SinkTarget::global("alpha")).is_some());
    assert!(memory.records_for(&SinkTarget::global("beta")).is_none());

    let beta: Vec<serde_json::Value> =
        serde_json::from_str(&std::fs::read_to_string(dir.path().join("beta.json")).unwrap()).unwrap();
    assert_eq!(beta.len(), 2);
    assert!(dir.path().join("manifest.json").exists());
}
