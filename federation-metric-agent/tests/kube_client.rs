use axum::extract::Query;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::get;
use axum::{Json, Router};
use federation_metric_agent::kube::{ClusterApi, ClusterClientFactory, KubeClientFactory, ProbeError};
use federation_metric_agent::metrics;
use federation_metric_agent::model::{ClusterCredential, HealthStatus, NodeSummary};
use federation_metric_devkit::fixtures::{node_list, node_metrics, pod_list};
use federation_metric_devkit::{spawn_http_fixture, NodeFixture, PodFixture};
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;

fn bearer_ok(headers: &HeaderMap) -> bool {
    headers.get("authorization").and_then(|v| v.to_str().ok()) == Some("Bearer cluster-token")
}

/// API server with two nodes; pods answer only to the node field selector.
fn api_server() -> Router {
    let nodes = serde_json::to_value(node_list(&[
        NodeFixture::new("node1").allocatable("2", "4Gi").ready(true),
        NodeFixture::new("node2").allocatable("2", "4Gi").ready(true),
    ]))
    .unwrap();
    let usage = serde_json::to_value(node_metrics(&[
        ("node1", "2000000000n", "4Gi"),
        ("node2", "0n", "0Gi"),
    ]))
    .unwrap();
    let node1_pods = serde_json::to_value(pod_list(&[
        PodFixture::running("web", "node1").container(Some("500m"), Some("1Gi")),
    ]))
    .unwrap();
    let no_pods = serde_json::to_value(pod_list(&[])).unwrap();

    Router::new()
        .route(
            "/api/v1/nodes",
            get(move |headers: HeaderMap| {
                let nodes = nodes.clone();
                async move {
                    if !bearer_ok(&headers) {
                        return (StatusCode::UNAUTHORIZED, Json(json!({"code": 401})));
                    }
                    (StatusCode::OK, Json(nodes))
                }
            }),
        )
        .route(
            "/apis/metrics.k8s.io/v1beta1/nodes",
            get(move || {
                let usage = usage.clone();
                async move { Json(usage) }
            }),
        )
        .route("/healthz", get(|| async { "ok" }))
        .route(
            "/api/v1/pods",
            get(move |Query(query): Query<HashMap<String, String>>| {
                let node1_pods = node1_pods.clone();
                let no_pods = no_pods.clone();
                async move {
                    match query.get("fieldSelector").map(String::as_str) {
                        Some("spec.nodeName=node1") => (StatusCode::OK, Json(node1_pods)),
                        Some("spec.nodeName=node2") => (StatusCode::OK, Json(no_pods)),
                        _ => (StatusCode::BAD_REQUEST, Json(json!({"code": 400}))),
                    }
                }
            }),
        )
}

fn credential(url: &str, token: &str) -> ClusterCredential {
    ClusterCredential {
        cluster_id: "c1".into(),
        api_server_url: url.to_string(),
        bearer_token: token.to_string(),
    }
}

#[tokio::test]
async fn test_probes_over_http() {
    let base = spawn_http_fixture(api_server()).await.unwrap();
    let factory = KubeClientFactory::new(Duration::from_secs(5));
    let client = factory.connect(&credential(&format!("{}/", base), "cluster-token")).unwrap();
    let client = client.as_ref();

    // capacity 4 cores / 8Gi per node: 2 of 8 cores, 4Gi of 16Gi
    let (cpu, memory) = metrics::collect_metric(client).await.unwrap();
    assert_eq!(cpu, 25.0);
    assert_eq!(memory, 25.0);

    // allocatable 2 cores / 4Gi per node: 500m of 4 cores, 1Gi of 8Gi
    let (cpu, memory) = metrics::collect_request_metric(client).await.unwrap();
    assert_eq!(cpu, 12.5);
    assert_eq!(memory, 12.5);

    assert_eq!(metrics::node_health_check(client).await, HealthStatus::Healthy);
    assert_eq!(
        metrics::node_summary(client).await.unwrap(),
        NodeSummary { total_num: 2, ready_num: 2 }
    );
}

#[tokio::test]
async fn test_rejected_token_surfaces_status() {
    let base = spawn_http_fixture(api_server()).await.unwrap();
    let factory = KubeClientFactory::new(Duration::from_secs(5));
    let client = factory.connect(&credential(&base, "stale-token")).unwrap();

    assert!(matches!(
        client.node_list_raw().await,
        Err(ProbeError::Status { status: 401, .. })
    ));
    assert!(metrics::node_summary(client.as_ref()).await.is_err());
}

#[tokio::test]
async fn test_unreachable_cluster_is_unknown() {
    let factory = KubeClientFactory::new(Duration::from_secs(2));
    let client = factory.connect(&credential("http://127.0.0.1:1", "cluster-token")).unwrap();

    assert_eq!(metrics::node_health_check(client.as_ref()).await, HealthStatus::Unknown);
    assert!(matches!(client.healthz_raw().await, Err(ProbeError::Request(_))));
}
