/*!
Harness de test pour la boucle de collecte
*/

use crate::cluster_stub::{FakeCluster, FakeClusterFactory, StaticCredentials, StaticTopology};
use crate::kv_stub::MockKvStore;
use anyhow::Result;
use axum::Router;
use federation_metric_agent::aggregator::{Aggregator, AggregatorSettings, CycleError};
use federation_metric_agent::config::MembershipRule;
use federation_metric_agent::health::StatusTracker;
use federation_metric_agent::model::MetricStatus;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

pub const BUCKET: &str = "metrics";
pub const SUBJECT: &str = "federation";

pub struct TestHarness {
    pub store: MockKvStore,
    pub clusters: FakeClusterFactory,
    pub credentials: StaticCredentials,
    pub topology: StaticTopology,
    pub tracker: StatusTracker,
    pub settings: AggregatorSettings,
}

/// Handle to a loop running in the background.
pub struct RunningLoop {
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<Result<(), CycleError>>,
}

impl RunningLoop {
    /// Signal shutdown and wait for the loop to return.
    pub async fn stop(mut self) -> Result<(), CycleError> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        self.handle.await.expect("aggregator task panicked")
    }

    /// Wait for the loop to end on its own (fatal error).
    pub async fn join(self) -> Result<(), CycleError> {
        self.handle.await.expect("aggregator task panicked")
    }
}

impl TestHarness {
    pub fn new(host_cluster_id: &str) -> Self {
        init_test_tracing();

        Self {
            store: MockKvStore::new(),
            clusters: FakeClusterFactory::new(),
            credentials: StaticCredentials::new(),
            topology: StaticTopology::new(),
            tracker: StatusTracker::new(),
            settings: AggregatorSettings {
                host_cluster_id: host_cluster_id.to_string(),
                bucket_name: BUCKET.to_string(),
                subject: SUBJECT.to_string(),
                publish_interval: Duration::from_millis(50),
                probe_concurrency: 4,
                probe_deadline: Duration::from_secs(2),
                membership: MembershipRule::AnyNonHost,
            },
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.settings.publish_interval = interval;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.settings.probe_deadline = deadline;
        self
    }

    pub fn with_membership(mut self, rule: MembershipRule) -> Self {
        self.settings.membership = rule;
        self
    }

    /// Credential for `cluster_id` at `url`, served by `cluster`.
    pub fn add_cluster(&self, cluster_id: &str, url: &str, cluster: FakeCluster) -> &Self {
        self.credentials.push(cluster_id, url, "test-token");
        self.clusters.register(url, cluster);
        self
    }

    pub fn add_topology_member(&self, name: &str, endpoint: &str) -> &Self {
        self.topology.push(name, endpoint);
        self
    }

    pub fn aggregator(&self) -> Aggregator {
        Aggregator::new(
            Arc::new(self.credentials.clone()),
            Arc::new(self.topology.clone()),
            Arc::new(self.clusters.clone()),
            Arc::new(self.store.clone()),
            self.settings.clone(),
        )
        .with_tracker(self.tracker.clone())
    }

    pub fn start(&self) -> RunningLoop {
        let aggregator = self.aggregator();
        let (tx, rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            aggregator
                .run(async move {
                    let _ = rx.await;
                })
                .await
        });
        RunningLoop {
            shutdown: Some(tx),
            handle,
        }
    }

    /// Poll until `count` puts landed or `timeout_ms` elapsed.
    pub async fn wait_for_puts(&self, count: usize, timeout_ms: u64) -> bool {
        let start = std::time::Instant::now();
        while start.elapsed() < Duration::from_millis(timeout_ms) {
            if self.store.put_count() >= count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tracing::warn!("timeout waiting for {} puts, saw {}", count, self.store.put_count());
        false
    }

    /// Run until `count` snapshots were published, then stop.
    pub async fn run_until_published(&self, count: usize) -> Result<Vec<MetricStatus>> {
        let running = self.start();
        let reached = self.wait_for_puts(count, 5_000).await;
        running.stop().await?;
        if !reached {
            anyhow::bail!("expected {} snapshots, got {}", count, self.store.put_count());
        }
        self.published_snapshots()
    }

    pub fn published_snapshots(&self) -> Result<Vec<MetricStatus>> {
        self.store
            .find_by_key(SUBJECT)
            .iter()
            .map(|v| serde_json::from_slice(&v.payload).map_err(anyhow::Error::from))
            .collect()
    }
}

/// Serve `router` on an ephemeral local port; returns `http://127.0.0.1:<port>`.
pub async fn spawn_http_fixture(router: Router) -> Result<String> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    Ok(format!("http://{}", addr))
}

pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("federation_metric_agent=debug")),
        )
        .with_test_writer()
        .try_init();
}
