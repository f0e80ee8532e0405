//! One failing endpoint never aborts its siblings

use crate::common::{executor_with_memory, ids, items, test_config};
use iga_backup::backup::{FailureKind, RunOutcome};
use iga_backup::config::{EnabledEndpoints, EndpointSpec};
use iga_backup::output::SinkTarget;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn three_endpoints() -> EnabledEndpoints {
    EnabledEndpoints::new(
        vec![
            EndpointSpec::global("alpha", "/api/alpha"),
            EndpointSpec::global("beta", "/api/beta"),
            EndpointSpec::global("gamma", "/api/gamma"),
        ],
        Vec::new(),
    )
    .unwrap()
}

#[tokio::test]
async fn test_server_error_isolated_to_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/alpha"))
        .respond_with(ResponseTemplate::new(200).set_body_json(items(&["a1", "a2"])))
        .mount(&server)
        .await;
    // max_retries = 2: three attempts, then give up.
    Mock::given(method("GET"))
        .and(path("/api/beta"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .expect(3)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/gamma"))
        .respond_with(ResponseTemplate::new(200).set_body_json(items(&["g1"])))
        .mount(&server)
        .await;

    let (executor, sink) = executor_with_memory(&test_config(&server.uri()));
    let summary = executor.run(&three_endpoints()).await;

    assert_eq!(summary.outcome, RunOutcome::CompletedWithFailures);
    assert_eq!(summary.records_for("alpha"), 2);
    assert_eq!(summary.records_for("gamma"), 1);
    assert_eq!(summary.records_for("beta"), 0);

    let failures: Vec<_> = summary.failures_for("beta").collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].kind, FailureKind::TransientFetch);
    assert_eq!(failures[0].retries, 2);
    assert_eq!(summary.total_retries, 2);

    assert_eq!(ids(&sink.records_for(&SinkTarget::global("alpha")).unwrap()), vec!["a1", "a2"]);
    assert!(sink.records_for(&SinkTarget::global("beta")).is_none());
}

#[tokio::test]
async fn test_client_error_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/alpha"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({"errorCode": "E0000006"})))
        .expect(1)
        .mount(&server)
        .await;
    for p in ["/api/beta", "/api/gamma"] {
        Mock::given(method("GET"))
            .and(path(p))
            .respond_with(ResponseTemplate::new(200).set_body_json(items(&["x"])))
            .mount(&server)
            .await;
    }

    let (executor, _sink) = executor_with_memory(&test_config(&server.uri()));
    let summary = executor.run(&three_endpoints()).await;

    let failures: Vec<_> = summary.failures_for("alpha").collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].kind, FailureKind::PermanentFetch);
    assert_eq!(failures[0].retries, 0);
    assert_eq!(summary.records_for("beta"), 1);
}

#[tokio::test]
async fn test_malformed_items_dropped_individually() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/alpha"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": "a1", "name": "first"},
            {"name": "no id here"},
            {"id": "a3", "name": "third"}
        ])))
        .mount(&server)
        .await;

    let (executor, sink) = executor_with_memory(&test_config(&server.uri()));
    let endpoints =
        EnabledEndpoints::new(vec![EndpointSpec::global("alpha", "/api/alpha")], Vec::new()).unwrap();
    let summary = executor.run(&endpoints).await;

    assert_eq!(summary.outcome, RunOutcome::CompletedWithFailures);
    assert_eq!(summary.records_for("alpha"), 2);
    let failures: Vec<_> = summary.failures_for("alpha").collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].kind, FailureKind::MalformedRecord);
    assert_eq!(ids(&sink.records_for(&SinkTarget::global("alpha")).unwrap()), vec!["a1", "a3"]);
}
