//! Phase-two fan-out over resource IDs discovered in phase one

use crate::common::{executor_with_memory, test_config};
use iga_backup::backup::RunOutcome;
use iga_backup::config::{EnabledEndpoints, EndpointSpec};
use iga_backup::output::SinkTarget;
use iga_backup::ResourceId;
use serde_json::{json, Value};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const CAMPAIGNS: &str = "/governance/api/v1/campaigns";

fn campaign(id: &str, resources: &[&str]) -> Value {
    json!({
        "id": id,
        "name": format!("Campaign {id}"),
        "resourceSettings": {
            "targetResources": resources
                .iter()
                .map(|r| json!({"resourceId": r}))
                .collect::<Vec<_>>()
        }
    })
}

fn endpoints() -> EnabledEndpoints {
    EnabledEndpoints::new(
        vec![EndpointSpec::global("campaigns", CAMPAIGNS)],
        vec![
            EndpointSpec::resource_path("grants", "/api/resources/{resourceId}/grants"),
            EndpointSpec::resource_filter(
                "principal_access",
                "/api/principal-access",
                "resource.externalId eq \"{resourceId}\"",
            ),
        ],
    )
    .unwrap()
}

async fn mount_resource_endpoints(server: &MockServer, resource: &str, expect: u64) {
    Mock::given(method("GET"))
        .and(path(format!("/api/resources/{resource}/grants")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": format!("g-{resource}"), "name": "grant"}
        ])))
        .expect(expect)
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/principal-access"))
        .and(query_param("filter", format!("resource.externalId eq \"{resource}\"")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": format!("pa-{resource}"), "name": "access"}
        ])))
        .expect(expect)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_each_pair_fetched_exactly_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(CAMPAIGNS))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            campaign("c1", &["r1", "r2"]),
            campaign("c2", &["r2"]),
        ])))
        .expect(1)
        .mount(&server)
        .await;
    mount_resource_endpoints(&server, "r1", 1).await;
    mount_resource_endpoints(&server, "r2", 1).await;

    let (executor, sink) = executor_with_memory(&test_config(&server.uri()));
    let summary = executor.run(&endpoints()).await;

    assert_eq!(summary.outcome, RunOutcome::Completed);
    assert_eq!(summary.resources_processed, 2);
    assert!(summary.duplicate_resources.is_empty());
    assert_eq!(summary.records_for("grants"), 2);
    assert_eq!(summary.records_for("principal_access"), 2);
    // One campaigns list plus four resource calls.
    assert_eq!(summary.total_requests, 5);

    let r1 = ResourceId::new("r1").unwrap();
    let grants = sink.records_for(&SinkTarget::resource("grants", r1.clone())).unwrap();
    assert_eq!(grants.len(), 1);
    assert_eq!(grants[0].external_id, "g-r1");
    assert_eq!(grants[0].parent_resource_id, Some(r1));
    assert_eq!(sink.records_by_target("principal_access").len(), 2);
}

#[tokio::test]
async fn test_resources_limit_skips_rest() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(CAMPAIGNS))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([campaign("c1", &["r1", "r2", "r3"])])),
        )
        .mount(&server)
        .await;
    mount_resource_endpoints(&server, "r1", 1).await;
    mount_resource_endpoints(&server, "r2", 0).await;
    mount_resource_endpoints(&server, "r3", 0).await;

    let mut config = test_config(&server.uri());
    config.run.resources_limit = Some(1);
    let (executor, _sink) = executor_with_memory(&config);
    let summary = executor.run(&endpoints()).await;

    assert_eq!(summary.outcome, RunOutcome::Completed);
    assert_eq!(summary.resources_processed, 1);
    let skipped: Vec<_> = summary.skipped_resources.iter().map(|s| s.resource_id.to_string()).collect();
    assert_eq!(skipped, vec!["r2", "r3"]);
}

#[tokio::test]
async fn test_no_resources_skips_phase_two() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(CAMPAIGNS))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([campaign("c1", &[])])))
        .mount(&server)
        .await;
    mount_resource_endpoints(&server, "r1", 0).await;

    let (executor, _sink) = executor_with_memory(&test_config(&server.uri()));
    let summary = executor.run(&endpoints()).await;

    assert_eq!(summary.outcome, RunOutcome::Completed);
    assert_eq!(summary.resources_processed, 0);
    assert_eq!(summary.total_requests, 1);
}

#[tokio::test]
async fn test_discovered_ids_are_path_encoded() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(CAMPAIGNS))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([campaign("c1", &["x?y"])])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/resources/x%3Fy/grants"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": "g1", "name": "grant"}])))
        .expect(1)
        .mount(&server)
        .await;

    let endpoints = EnabledEndpoints::new(
        vec![EndpointSpec::global("campaigns", CAMPAIGNS)],
        vec![EndpointSpec::resource_path("grants", "/api/resources/{resourceId}/grants")],
    )
    .unwrap();
    let (executor, sink) = executor_with_memory(&test_config(&server.uri()));
    let summary = executor.run(&endpoints).await;

    assert_eq!(summary.outcome, RunOutcome::Completed);
    let rid = ResourceId::new("x?y").unwrap();
    let grants = sink.records_for(&SinkTarget::resource("grants", rid.clone())).unwrap();
    assert_eq!(grants[0].parent_resource_id, Some(rid));
}
