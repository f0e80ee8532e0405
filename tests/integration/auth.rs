//! Token refresh on 401 and run abort on repeated rejection

use crate::common::{executor_with_memory, items, test_config};
use async_trait::async_trait;
use iga_backup::backup::{FailureKind, RunOutcome};
use iga_backup::config::{EnabledEndpoints, EndpointSpec};
use iga_backup::fetcher::auth::{AuthError, AuthToken, TokenProvider};
use iga_backup::shutdown::ShutdownReason;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Hands out `t1`, then `t2` after the first invalidation, and so on
#[derive(Default)]
struct RotatingToken {
    generation: AtomicUsize,
}

#[async_trait]
impl TokenProvider for RotatingToken {
    async fn token(&self) -> Result<AuthToken, AuthError> {
        let generation = self.generation.load(Ordering::SeqCst) + 1;
        Ok(AuthToken::ssws(format!("t{generation}")))
    }

    fn invalidate(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_refreshes_token_once_on_401() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/widgets"))
        .and(header("authorization", "SSWS t1"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/widgets"))
        .and(header("authorization", "SSWS t2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(items(&["w1"])))
        .expect(1)
        .mount(&server)
        .await;

    let provider = Arc::new(RotatingToken::default());
    let (executor, _sink) = executor_with_memory(&test_config(&server.uri()));
    let executor = executor.with_token_provider(provider.clone());
    let endpoints =
        EnabledEndpoints::new(vec![EndpointSpec::global("widgets", "/api/widgets")], Vec::new()).unwrap();
    let summary = executor.run(&endpoints).await;

    assert_eq!(summary.outcome, RunOutcome::Completed);
    assert_eq!(summary.records_for("widgets"), 1);
    assert_eq!(provider.generation.load(Ordering::SeqCst), 1);
    // The re-authenticated attempt is not a retry.
    assert_eq!(summary.total_retries, 0);
}

#[tokio::test]
async fn test_second_401_aborts_run() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/alpha"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/beta"))
        .respond_with(ResponseTemplate::new(200).set_body_json(items(&["b1"])))
        .expect(0)
        .mount(&server)
        .await;

    let mut config = test_config(&server.uri());
    config.concurrency.max_concurrent_endpoints = 1;
    let (executor, sink) = executor_with_memory(&config);
    let endpoints = EnabledEndpoints::new(
        vec![
            EndpointSpec::global("alpha", "/api/alpha"),
            EndpointSpec::global("beta", "/api/beta"),
        ],
        Vec::new(),
    )
    .unwrap();
    let summary = executor.run(&endpoints).await;

    assert_eq!(
        summary.outcome,
        RunOutcome::Aborted {
            reason: ShutdownReason::AuthenticationFailed
        }
    );
    let alpha: Vec<_> = summary.failures_for("alpha").collect();
    assert_eq!(alpha[0].kind, FailureKind::Auth);
    let beta: Vec<_> = summary.failures_for("beta").collect();
    assert_eq!(beta.len(), 1);
    assert_eq!(beta[0].kind, FailureKind::Cancelled);
    assert!(sink.batches().is_empty());
    assert!(sink.is_finished());
}

#[tokio::test]
async fn test_token_endpoint_outage_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth2/v1/token"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/oauth2/v1/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "fresh",
            "token_type": "Bearer",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/widgets"))
        .and(header("authorization", "Bearer fresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(items(&["w1"])))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = test_config(&server.uri());
    config.auth.api_token = None;
    config.auth.client_id = Some("client".to_string());
    config.auth.client_secret = Some("secret".to_string());
    let (executor, _sink) = executor_with_memory(&config);
    let endpoints =
        EnabledEndpoints::new(vec![EndpointSpec::global("widgets", "/api/widgets")], Vec::new()).unwrap();
    let summary = executor.run(&endpoints).await;

    assert_eq!(summary.outcome, RunOutcome::Completed);
    assert_eq!(summary.records_for("widgets"), 1);
    assert_eq!(summary.total_retries, 1);
    assert_eq!(summary.total_requests, 1);
}

#[tokio::test]
async fn test_rejected_client_credentials_abort_run() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth2/v1/token"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid_client"))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = test_config(&server.uri());
    config.auth.api_token = None;
    config.auth.client_id = Some("client".to_string());
    config.auth.client_secret = Some("wrong".to_string());
    let (executor, _sink) = executor_with_memory(&config);
    let endpoints =
        EnabledEndpoints::new(vec![EndpointSpec::global("widgets", "/api/widgets")], Vec::new()).unwrap();
    let summary = executor.run(&endpoints).await;

    assert_eq!(
        summary.outcome,
        RunOutcome::Aborted {
            reason: ShutdownReason::AuthenticationFailed
        }
    );
    let failures: Vec<_> = summary.failures_for("widgets").collect();
    assert_eq!(failures[0].kind, FailureKind::Auth);
}
