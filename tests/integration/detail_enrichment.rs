//! Per-item detail calls merged over list items

use crate::common::{executor_with_memory, ids, items, test_config};
use iga_backup::backup::{FailureKind, RunOutcome};
use iga_backup::config::{EnabledEndpoints, EndpointSpec};
use iga_backup::output::SinkTarget;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn widgets() -> EnabledEndpoints {
    EnabledEndpoints::new(
        vec![EndpointSpec::global("widgets", "/api/widgets").with_detail("/api/widgets/{id}")],
        Vec::new(),
    )
    .unwrap()
}

async fn mount_detail(server: &MockServer, id: &str, expect: u64) {
    Mock::given(method("GET"))
        .and(path(format!("/api/widgets/{id}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": id,
            "name": format!("full-{id}"),
            "owners": ["u1"]
        })))
        .expect(expect)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_detail_failure_keeps_list_item() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/widgets"))
        .respond_with(ResponseTemplate::new(200).set_body_json(items(&["w1", "w2", "w3"])))
        .mount(&server)
        .await;
    mount_detail(&server, "w1", 1).await;
    Mock::given(method("GET"))
        .and(path("/api/widgets/w2"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;
    mount_detail(&server, "w3", 1).await;

    let (executor, sink) = executor_with_memory(&test_config(&server.uri()));
    let summary = executor.run(&widgets()).await;

    assert_eq!(summary.outcome, RunOutcome::CompletedWithFailures);
    assert_eq!(summary.batches[0].detail_calls, 3);

    let records = sink.records_for(&SinkTarget::global("widgets")).unwrap();
    assert_eq!(ids(&records), vec!["w1", "w2", "w3"]);
    assert_eq!(records[0].display_name, "full-w1");
    assert_eq!(records[0].payload["owners"], json!(["u1"]));
    assert_eq!(records[1].display_name, "name-w2");

    let failures: Vec<_> = summary.failures_for("widgets").collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].kind, FailureKind::PermanentFetch);
    assert_eq!(failures[0].item_id.as_deref(), Some("w2"));
}

#[tokio::test]
async fn test_object_cap_applies_before_detail_calls() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/widgets"))
        .respond_with(ResponseTemplate::new(200).set_body_json(items(&["w1", "w2", "w3"])))
        .mount(&server)
        .await;
    mount_detail(&server, "w1", 1).await;
    mount_detail(&server, "w2", 0).await;
    mount_detail(&server, "w3", 0).await;

    let mut config = test_config(&server.uri());
    config.run.objects_per_endpoint = Some(1);
    let (executor, sink) = executor_with_memory(&config);
    let summary = executor.run(&widgets()).await;

    assert_eq!(summary.outcome, RunOutcome::Completed);
    let records = sink.records_for(&SinkTarget::global("widgets")).unwrap();
    assert_eq!(ids(&records), vec!["w1"]);
    assert_eq!(summary.total_requests, 2);
}

#[tokio::test]
async fn test_list_only_skips_detail_calls() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/widgets"))
        .respond_with(ResponseTemplate::new(200).set_body_json(items(&["w1"])))
        .mount(&server)
        .await;
    mount_detail(&server, "w1", 0).await;

    let (executor, _sink) = executor_with_memory(&test_config(&server.uri()));
    let endpoints = EnabledEndpoints::new(
        vec![EndpointSpec::global("widgets", "/api/widgets")
            .with_detail("/api/widgets/{id}")
            .list_only()],
        Vec::new(),
    )
    .unwrap();
    let summary = executor.run(&endpoints).await;

    assert_eq!(summary.outcome, RunOutcome::Completed);
    assert_eq!(summary.batches[0].detail_calls, 0);
}
