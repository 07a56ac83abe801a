use federation_metric_agent::aggregator::CycleError;
use federation_metric_agent::config::MembershipRule;
use federation_metric_agent::health::LoopState;
use federation_metric_agent::model::{HealthStatus, NodeSummary, UsageRatio};
use federation_metric_devkit::fixtures::{node_list, node_metrics, pod_list};
use federation_metric_devkit::test_utils::SUBJECT;
use federation_metric_devkit::{FakeCluster, NodeFixture, PodFixture, TestHarness};
use std::time::Duration;

const HOST_URL: &str = "https://host.cluster:6443";

/// Two nodes, one ready; 25% usage and 25% requested on both axes.
fn healthy_host() -> FakeCluster {
    FakeCluster::new()
        .with_nodes(&node_list(&[
            NodeFixture::new("node1").ready(true),
            NodeFixture::new("node2").ready(false),
        ]))
        .with_node_metrics(&node_metrics(&[
            ("node1", "1000000000n", "2Gi"),
            ("node2", "1000000000n", "2Gi"),
        ]))
        .with_healthz("ok")
        .with_pods(
            "node1",
            &pod_list(&[PodFixture::running("app-1", "node1").container(Some("1"), Some("2Gi"))]),
        )
        .with_pods(
            "node2",
            &pod_list(&[
                PodFixture::running("app-2", "node2").container(Some("1000m"), Some("2Gi")),
                PodFixture::running("done", "node2")
                    .phase("Succeeded")
                    .container(Some("4"), Some("8Gi")),
            ]),
        )
}

/// One node at 50% CPU and 25% memory.
fn member_cluster() -> FakeCluster {
    FakeCluster::new()
        .with_nodes(&node_list(&[NodeFixture::new("m1").capacity("1", "4Gi")]))
        .with_node_metrics(&node_metrics(&[("m1", "500000000n", "1Gi")]))
}

async fn wait_for_state(harness: &TestHarness, state: LoopState) -> bool {
    for _ in 0..500 {
        if harness.tracker.report().state == state {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn test_host_and_member_published() {
    let harness = TestHarness::new("host");
    harness.add_cluster("host", HOST_URL, healthy_host());
    harness.add_cluster("edge-1", "https://edge-1:6443", member_cluster());

    let snapshots = harness.run_until_published(1).await.unwrap();
    let snapshot = &snapshots[0];

    let host = &snapshot.host_cluster_status;
    assert_eq!(host.cluster_id, "host");
    assert_eq!(host.status, HealthStatus::Healthy);
    assert_eq!(host.node_summary, NodeSummary { total_num: 2, ready_num: 1 });
    assert_eq!(host.real_time_usage, UsageRatio { cpu: 25.0, memory: 25.0 });
    assert_eq!(host.request_usage, UsageRatio { cpu: 25.0, memory: 25.0 });

    // empty topology, but every non-host credential counts as a member
    assert_eq!(snapshot.member_cluster_status.len(), 1);
    let member = &snapshot.member_cluster_status[0];
    assert_eq!(member.cluster_id, "edge-1");
    assert_eq!(member.real_time_usage, UsageRatio { cpu: 50.0, memory: 25.0 });
}

#[tokio::test]
async fn test_wire_format_in_bucket() {
    let harness = TestHarness::new("host");
    harness.add_cluster("host", HOST_URL, healthy_host());

    harness.run_until_published(1).await.unwrap();

    let puts = harness.store.get_puts();
    assert_eq!(puts[0].bucket, "metrics");
    assert_eq!(puts[0].key, SUBJECT);

    let json: serde_json::Value = harness.store.get_last_json(SUBJECT).unwrap().unwrap();
    assert!(json["time"].is_string());
    assert_eq!(json["hostClusterStatus"]["clusterId"], "host");
    assert_eq!(json["hostClusterStatus"]["status"], "True");
    assert_eq!(json["hostClusterStatus"]["nodeSummary"]["totalNum"], 2);
    assert_eq!(json["hostClusterStatus"]["nodeSummary"]["readyNum"], 1);
    assert_eq!(json["hostClusterStatus"]["realTimeUsage"]["cpu"], 25.0);
    assert_eq!(json["hostClusterStatus"]["requestUsage"]["memory"], 25.0);
    assert_eq!(json["memberClusterStatus"], serde_json::json!([]));
}

#[tokio::test]
async fn test_topology_rule_skips_unlisted_clusters() {
    let harness = TestHarness::new("host").with_membership(MembershipRule::Topology);
    harness.add_cluster("host", HOST_URL, healthy_host());
    harness.add_cluster("listed", "https://listed:6443", member_cluster());
    harness.add_cluster("stray", "https://stray:6443", member_cluster());
    harness.add_topology_member("listed", "https://listed:6443");

    let snapshots = harness.run_until_published(1).await.unwrap();
    let members: Vec<&str> = snapshots[0]
        .member_cluster_status
        .iter()
        .map(|m| m.cluster_id.as_str())
        .collect();
    assert_eq!(members, vec!["listed"]);
    assert!(!harness.clusters.get_connects().contains(&"https://stray:6443".to_string()));
}

#[tokio::test]
async fn test_members_keep_credential_order() {
    let harness = TestHarness::new("host");
    harness.add_cluster("host", HOST_URL, healthy_host());
    harness.add_cluster(
        "slow",
        "https://slow:6443",
        member_cluster().with_delay(Duration::from_millis(150)),
    );
    harness.add_cluster("fast", "https://fast:6443", member_cluster());
    harness.add_cluster(
        "medium",
        "https://medium:6443",
        member_cluster().with_delay(Duration::from_millis(50)),
    );

    let snapshots = harness.run_until_published(1).await.unwrap();
    let members: Vec<&str> = snapshots[0]
        .member_cluster_status
        .iter()
        .map(|m| m.cluster_id.as_str())
        .collect();
    assert_eq!(members, vec!["slow", "fast", "medium"]);
}

#[tokio::test]
async fn test_client_build_failure_skips_cluster() {
    let harness = TestHarness::new("host");
    harness.add_cluster("host", HOST_URL, healthy_host());
    harness.add_cluster("broken", "https://broken:6443", member_cluster());
    harness.add_cluster("edge-1", "https://edge-1:6443", member_cluster());
    harness.clusters.refuse("https://broken:6443");

    let snapshots = harness.run_until_published(1).await.unwrap();
    let members: Vec<&str> = snapshots[0]
        .member_cluster_status
        .iter()
        .map(|m| m.cluster_id.as_str())
        .collect();
    assert_eq!(members, vec!["edge-1"]);
}

#[tokio::test]
async fn test_missing_host_gets_placeholder() {
    let harness = TestHarness::new("host");
    harness.add_cluster("edge-1", "https://edge-1:6443", member_cluster());

    let snapshots = harness.run_until_published(1).await.unwrap();
    let host = &snapshots[0].host_cluster_status;
    assert_eq!(host.cluster_id, "host");
    assert_eq!(host.status, HealthStatus::Unknown);
    assert_eq!(host.node_summary, NodeSummary::UNAVAILABLE);
    assert_eq!(host.real_time_usage, UsageRatio::UNAVAILABLE);
    assert_eq!(host.request_usage, UsageRatio::UNAVAILABLE);
    assert_eq!(snapshots[0].member_cluster_status.len(), 1);
}

#[tokio::test]
async fn test_slow_host_hits_deadline() {
    let harness = TestHarness::new("host").with_deadline(Duration::from_millis(100));
    harness.add_cluster(
        "host",
        HOST_URL,
        healthy_host().with_delay(Duration::from_millis(500)),
    );
    harness.add_cluster("edge-1", "https://edge-1:6443", member_cluster());

    let snapshots = harness.run_until_published(1).await.unwrap();
    assert_eq!(snapshots[0].host_cluster_status.status, HealthStatus::Unknown);
    assert_eq!(snapshots[0].host_cluster_status.real_time_usage, UsageRatio::UNAVAILABLE);
    assert_eq!(snapshots[0].member_cluster_status[0].cluster_id, "edge-1");
}

#[tokio::test]
async fn test_partial_host_failure_uses_sentinels() {
    let harness = TestHarness::new("host");
    let host = FakeCluster::new()
        .with_nodes(&node_list(&[NodeFixture::new("node1").ready(true)]))
        .with_healthz("degraded");
    harness.add_cluster("host", HOST_URL, host);

    let snapshots = harness.run_until_published(1).await.unwrap();
    let host = &snapshots[0].host_cluster_status;
    assert_eq!(host.status, HealthStatus::Unhealthy);
    assert_eq!(host.node_summary, NodeSummary { total_num: 1, ready_num: 1 });
    // no metrics-server
    assert_eq!(host.real_time_usage, UsageRatio::UNAVAILABLE);
    // no pods listed on node1, but allocatable is known
    assert_eq!(host.request_usage, UsageRatio { cpu: 0.0, memory: 0.0 });
}

#[tokio::test]
async fn test_publish_failure_does_not_stop_loop() {
    let harness = TestHarness::new("host");
    harness.add_cluster("host", HOST_URL, healthy_host());
    harness.store.fail_next_puts(1);

    let snapshots = harness.run_until_published(2).await.unwrap();
    assert!(snapshots.len() >= 2);
    assert_eq!(harness.store.get_puts()[0].revision, 1);

    let report = harness.tracker.report();
    assert_eq!(report.publish_failures, 1);
    assert!(report.snapshots_published >= 2);
    assert!(report.cycles_completed >= 3);
}

#[tokio::test]
async fn test_snapshot_times_advance() {
    let harness = TestHarness::new("host");
    harness.add_cluster("host", HOST_URL, healthy_host());

    let snapshots = harness.run_until_published(2).await.unwrap();
    assert!(snapshots[1].time >= snapshots[0].time);

    let revisions: Vec<u64> = harness.store.get_puts().iter().map(|p| p.revision).collect();
    assert_eq!(revisions[..2], [1, 2]);
}

#[tokio::test]
async fn test_shutdown_before_tick_discards_snapshot() {
    let harness = TestHarness::new("host").with_interval(Duration::from_secs(30));
    harness.add_cluster("host", HOST_URL, healthy_host());

    let running = harness.start();
    assert!(wait_for_state(&harness, LoopState::AwaitingTick).await);
    running.stop().await.unwrap();

    assert_eq!(harness.store.put_count(), 0);
    let report = harness.tracker.report();
    assert_eq!(report.state, LoopState::Cancelled);
    assert_eq!(report.cycles_completed, 1);
    assert!(report.bucket_ready);
}

#[tokio::test]
async fn test_shutdown_during_collection() {
    let harness = TestHarness::new("host").with_deadline(Duration::from_secs(10));
    harness.add_cluster("host", HOST_URL, healthy_host().with_delay(Duration::from_secs(5)));

    let running = harness.start();
    assert!(wait_for_state(&harness, LoopState::Collecting).await);
    let stopped = tokio::time::timeout(Duration::from_secs(2), running.stop()).await;
    assert!(matches!(stopped, Ok(Ok(()))));
    assert_eq!(harness.tracker.report().state, LoopState::Cancelled);
    assert_eq!(harness.tracker.report().cycles_completed, 0);
}

#[tokio::test]
async fn test_credential_failure_is_fatal() {
    let harness = TestHarness::new("host");
    harness.credentials.fail_with("permission denied");

    let result = harness.start().join().await;
    assert!(matches!(result, Err(CycleError::Credentials(_))));
    assert_eq!(harness.store.put_count(), 0);
}

#[tokio::test]
async fn test_topology_failure_is_fatal() {
    let harness = TestHarness::new("host");
    harness.add_cluster("host", HOST_URL, healthy_host());
    harness.topology.fail_with_status(503);

    let result = harness.start().join().await;
    assert!(matches!(result, Err(CycleError::Topology(_))));
}

#[tokio::test]
async fn test_bucket_failure_is_fatal() {
    let harness = TestHarness::new("host");
    harness.store.refuse_bucket();

    let result = harness.start().join().await;
    assert!(matches!(result, Err(CycleError::Bucket(_))));
    assert!(!harness.tracker.is_ready());
}

#[tokio::test]
async fn test_collect_without_publishing() {
    let harness = TestHarness::new("host");
    harness.add_cluster("host", HOST_URL, healthy_host());
    harness.add_cluster("edge-1", "https://edge-1:6443", member_cluster());

    let pending = harness.aggregator().collect().await.unwrap();
    assert_eq!(pending.host.status, HealthStatus::Healthy);
    assert_eq!(pending.members.len(), 1);
    assert!(harness.store.get_buckets().is_empty());
}
