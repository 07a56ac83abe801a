use axum::http::{HeaderMap, StatusCode};
use axum::routing::get;
use axum::{Json, Router};
use federation_metric_agent::sources::{KarmadaClient, TopologyFetchError, TopologySource};
use federation_metric_devkit::spawn_http_fixture;
use serde_json::{json, Value};
use std::time::Duration;

const CLUSTERS: &str = "/apis/cluster.karmada.io/v1alpha1/clusters";

fn karmada_router(status: StatusCode, body: Value) -> Router {
    Router::new().route(
        CLUSTERS,
        get(move |headers: HeaderMap| {
            let body = body.clone();
            async move {
                let bearer = headers.get("authorization").and_then(|v| v.to_str().ok());
                if bearer != Some("Bearer karmada-token") {
                    return (StatusCode::UNAUTHORIZED, Json(json!({"kind": "Status", "code": 401})));
                }
                (status, Json(body))
            }
        }),
    )
}

#[tokio::test]
async fn test_lists_member_clusters() {
    let body = json!({
        "apiVersion": "cluster.karmada.io/v1alpha1",
        "kind": "ClusterList",
        "items": [
            {"metadata": {"name": "member-1"}, "spec": {"apiEndpoint": "https://member-1:6443", "syncMode": "Push"}},
            {"metadata": {"name": "member-2"}, "spec": {"apiEndpoint": "https://member-2:6443"}}
        ]
    });
    let base = spawn_http_fixture(karmada_router(StatusCode::OK, body)).await.unwrap();
    let client = KarmadaClient::new(format!("{}/", base), "karmada-token", Duration::from_secs(5)).unwrap();

    let members = client.member_clusters().await.unwrap();
    assert_eq!(members.len(), 2);
    assert_eq!(members[0].name, "member-1");
    assert_eq!(members[0].endpoint, "https://member-1:6443");
    assert_eq!(members[1].name, "member-2");
}

#[tokio::test]
async fn test_empty_federation() {
    let base = spawn_http_fixture(karmada_router(StatusCode::OK, json!({"items": []})))
        .await
        .unwrap();
    let client = KarmadaClient::new(base, "karmada-token", Duration::from_secs(5)).unwrap();
    assert!(client.member_clusters().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_non_ok_status_is_error() {
    let base = spawn_http_fixture(karmada_router(StatusCode::OK, json!({"items": []})))
        .await
        .unwrap();
    let client = KarmadaClient::new(base, "wrong-token", Duration::from_secs(5)).unwrap();
    assert!(matches!(
        client.member_clusters().await,
        Err(TopologyFetchError::Status { status: 401, .. })
    ));

    let base = spawn_http_fixture(karmada_router(StatusCode::ACCEPTED, json!({"items": []})))
        .await
        .unwrap();
    let client = KarmadaClient::new(base, "karmada-token", Duration::from_secs(5)).unwrap();
    assert!(matches!(
        client.member_clusters().await,
        Err(TopologyFetchError::Status { status: 202, .. })
    ));
}

#[tokio::test]
async fn test_malformed_body() {
    let router = Router::new().route(CLUSTERS, get(|| async { "not json" }));
    let base = spawn_http_fixture(router).await.unwrap();
    let client = KarmadaClient::new(base, "karmada-token", Duration::from_secs(5)).unwrap();
    assert!(matches!(
        client.member_clusters().await,
        Err(TopologyFetchError::Decode(_))
    ));
}
