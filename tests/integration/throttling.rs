//! 429 handling: retry and slow the shared rate governor

use crate::common::{executor_with_memory, items, test_config};
use iga_backup::backup::RunOutcome;
use iga_backup::config::{EnabledEndpoints, EndpointSpec};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_429_retried_and_reported_to_governor() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/widgets"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "0"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/widgets"))
        .respond_with(ResponseTemplate::new(200).set_body_json(items(&["w1", "w2"])))
        .expect(1)
        .mount(&server)
        .await;

    let (executor, _sink) = executor_with_memory(&test_config(&server.uri()));
    let baseline = executor.governor().effective_rate_per_minute();
    let endpoints =
        EnabledEndpoints::new(vec![EndpointSpec::global("widgets", "/api/widgets")], Vec::new()).unwrap();
    let summary = executor.run(&endpoints).await;

    assert_eq!(summary.outcome, RunOutcome::Completed);
    assert_eq!(summary.records_for("widgets"), 2);
    assert_eq!(summary.throttle_events, 1);
    assert_eq!(summary.total_retries, 1);
    assert_eq!(summary.total_requests, 2);
    assert!(executor.governor().effective_rate_per_minute() < baseline);
}

#[tokio::test]
async fn test_persistent_429_gives_up_as_transient() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/widgets"))
        .respond_with(ResponseTemplate::new(429))
        .expect(3)
        .mount(&server)
        .await;

    let (executor, _sink) = executor_with_memory(&test_config(&server.uri()));
    let endpoints =
        EnabledEndpoints::new(vec![EndpointSpec::global("widgets", "/api/widgets")], Vec::new()).unwrap();
    let summary = executor.run(&endpoints).await;

    assert_eq!(summary.outcome, RunOutcome::CompletedWithFailures);
    let failures: Vec<_> = summary.failures_for("widgets").collect();
    assert_eq!(failures[0].kind, iga_backup::backup::FailureKind::TransientFetch);
    // The final 429 reaches the governor too.
    assert_eq!(summary.throttle_events, 3);
    assert_eq!(summary.total_requests, 3);
}
