//! Cursor pagination against a mock tenant

use crate::common::{executor_with_memory, ids, items, next_link, test_config};
use iga_backup::backup::{FailureKind, RunOutcome};
use iga_backup::config::{EnabledEndpoints, EndpointSpec};
use iga_backup::output::SinkTarget;
use wiremock::matchers::{header, method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

const WIDGETS: &str = "/api/v1/widgets";

async fn mount_three_pages(server: &MockServer) {
    let base = server.uri();
    Mock::given(method("GET"))
        .and(path(WIDGETS))
        .and(query_param_is_missing("after"))
        .and(query_param("limit", "2"))
        .and(header("authorization", "SSWS test-token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(items(&["w1", "w2"]))
                .insert_header("link", next_link(&base, WIDGETS, "c2").as_str()),
        )
        .expect(1)
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(WIDGETS))
        .and(query_param("after", "c2"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(items(&["w3", "w4"]))
                .insert_header("link", next_link(&base, WIDGETS, "c3").as_str()),
        )
        .expect(1)
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(WIDGETS))
        .and(query_param("after", "c3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(items(&["w5"])))
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_follows_cursors_in_order() {
    let server = MockServer::start().await;
    mount_three_pages(&server).await;

    let (executor, sink) = executor_with_memory(&test_config(&server.uri()));
    let endpoints =
        EnabledEndpoints::new(vec![EndpointSpec::global("widgets", WIDGETS)], Vec::new()).unwrap();
    let summary = executor.run(&endpoints).await;

    assert_eq!(summary.outcome, RunOutcome::Completed);
    assert_eq!(summary.records_for("widgets"), 5);
    assert_eq!(summary.total_requests, 3);
    assert_eq!(summary.batches[0].pages, 3);

    let records = sink.records_for(&SinkTarget::global("widgets")).unwrap();
    assert_eq!(ids(&records), vec!["w1", "w2", "w3", "w4", "w5"]);
    assert_eq!(records[0].display_name, "name-w1");
    assert!(sink.is_finished());
}

#[tokio::test]
async fn test_page_cap_records_truncation() {
    let server = MockServer::start().await;
    let base = server.uri();
    // Every page points at another one.
    Mock::given(method("GET"))
        .and(path(WIDGETS))
        .and(query_param_is_missing("after"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(items(&["w1", "w2"]))
                .insert_header("link", next_link(&base, WIDGETS, "c2").as_str()),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(WIDGETS))
        .and(query_param("after", "c2"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(items(&["w3", "w4"]))
                .insert_header("link", next_link(&base, WIDGETS, "c3").as_str()),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(WIDGETS))
        .and(query_param("after", "c3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(items(&["w5"])))
        .expect(0)
        .mount(&server)
        .await;

    let mut config = test_config(&base);
    config.pagination.max_pages = 2;
    let (executor, sink) = executor_with_memory(&config);
    let endpoints =
        EnabledEndpoints::new(vec![EndpointSpec::global("widgets", WIDGETS)], Vec::new()).unwrap();
    let summary = executor.run(&endpoints).await;

    assert_eq!(summary.outcome, RunOutcome::CompletedWithFailures);
    let failures: Vec<_> = summary.failures_for("widgets").collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].kind, FailureKind::PageLimit);

    let records = sink.records_for(&SinkTarget::global("widgets")).unwrap();
    assert_eq!(ids(&records), vec!["w1", "w2", "w3", "w4"]);
}

#[tokio::test]
async fn test_empty_collection_still_written() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(WIDGETS))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let (executor, sink) = executor_with_memory(&test_config(&server.uri()));
    let endpoints =
        EnabledEndpoints::new(vec![EndpointSpec::global("widgets", WIDGETS)], Vec::new()).unwrap();
    let summary = executor.run(&endpoints).await;

    assert_eq!(summary.outcome, RunOutcome::Completed);
    assert_eq!(summary.records_for("widgets"), 0);
    assert_eq!(sink.records_for(&SinkTarget::global("widgets")), Some(Vec::new()));
}

#[tokio::test]
async fn test_wrapped_items_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(WIDGETS))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"items": items(&["w1"])})),
        )
        .mount(&server)
        .await;

    let (executor, sink) = executor_with_memory(&test_config(&server.uri()));
    let endpoints =
        EnabledEndpoints::new(vec![EndpointSpec::global("widgets", WIDGETS)], Vec::new()).unwrap();
    executor.run(&endpoints).await;

    let records = sink.records_for(&SinkTarget::global("widgets")).unwrap();
    assert_eq!(ids(&records), vec!["w1"]);
}
