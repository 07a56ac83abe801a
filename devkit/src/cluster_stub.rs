/*!
Clusters scriptés + sources de credentials/topologie statiques

`FakeCluster` répond aux quatre lectures avec des payloads préparés ; une
lecture sans payload échoue comme un endpoint injoignable.
*/

use async_trait::async_trait;
use federation_metric_agent::kube::{ClientBuildError, ClusterApi, ClusterClientFactory, ProbeError};
use federation_metric_agent::model::{ClusterCredential, MemberCluster};
use federation_metric_agent::sources::{
    CredentialSource, CredentialStoreError, TopologyFetchError, TopologySource,
};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone, Default)]
pub struct FakeCluster {
    nodes: Option<Vec<u8>>,
    node_metrics: Option<Vec<u8>>,
    healthz: Option<Vec<u8>>,
    pods: HashMap<String, Vec<u8>>,
    delay: Option<Duration>,
    reads: Arc<AtomicUsize>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_nodes<T: Serialize>(mut self, nodes: &T) -> Self {
        self.nodes = Some(to_bytes(nodes));
        self
    }

    pub fn with_node_metrics<T: Serialize>(mut self, metrics: &T) -> Self {
        self.node_metrics = Some(to_bytes(metrics));
        self
    }

    pub fn with_healthz(mut self, body: &str) -> Self {
        self.healthz = Some(body.as_bytes().to_vec());
        self
    }

    pub fn with_pods<T: Serialize>(mut self, node_name: &str, pods: &T) -> Self {
        self.pods.insert(node_name.to_string(), to_bytes(pods));
        self
    }

    /// Every read sleeps this long first.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Reads served so far, across clones.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    async fn serve(&self, what: &str, payload: Option<&Vec<u8>>) -> Result<Vec<u8>, ProbeError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        payload
            .cloned()
            .ok_or_else(|| ProbeError::Unavailable(format!("fake cluster has no {}", what)))
    }
}

fn to_bytes<T: Serialize>(value: &T) -> Vec<u8> {
    serde_json::to_vec(value).unwrap()
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn node_list_raw(&self) -> Result<Vec<u8>, ProbeError> {
        self.serve("nodes", self.nodes.as_ref()).await
    }

    async fn node_metrics_raw(&self) -> Result<Vec<u8>, ProbeError> {
        self.serve("node metrics", self.node_metrics.as_ref()).await
    }

    async fn healthz_raw(&self) -> Result<Vec<u8>, ProbeError> {
        self.serve("healthz", self.healthz.as_ref()).await
    }

    async fn pods_on_node_raw(&self, node_name: &str) -> Result<Vec<u8>, ProbeError> {
        self.serve("pods", self.pods.get(node_name)).await
    }
}

/// Hands out `FakeCluster`s keyed by API server URL.
#[derive(Clone, Default)]
pub struct FakeClusterFactory {
    clusters: Arc<Mutex<HashMap<String, FakeCluster>>>,
    refused: Arc<Mutex<HashSet<String>>>,
    connects: Arc<Mutex<Vec<String>>>,
}

impl FakeClusterFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, api_server_url: &str, cluster: FakeCluster) {
        self.clusters.lock().unwrap().insert(api_server_url.to_string(), cluster);
    }

    /// Client construction for this URL fails.
    pub fn refuse(&self, api_server_url: &str) {
        self.refused.lock().unwrap().insert(api_server_url.to_string());
    }

    pub fn get_connects(&self) -> Vec<String> {
        self.connects.lock().unwrap().clone()
    }
}

impl ClusterClientFactory for FakeClusterFactory {
    fn connect(&self, credential: &ClusterCredential) -> Result<Arc<dyn ClusterApi>, ClientBuildError> {
        let url = &credential.api_server_url;
        self.connects.lock().unwrap().push(url.clone());

        if self.refused.lock().unwrap().contains(url) {
            return Err(ClientBuildError::InvalidEndpoint {
                url: url.clone(),
                reason: "refused by fake".into(),
            });
        }
        match self.clusters.lock().unwrap().get(url) {
            Some(cluster) => Ok(Arc::new(cluster.clone())),
            None => Err(ClientBuildError::InvalidEndpoint {
                url: url.clone(),
                reason: "no fake registered".into(),
            }),
        }
    }
}

/// Credential source with a fixed list, or a fixed failure.
#[derive(Clone, Default)]
pub struct StaticCredentials {
    credentials: Arc<Mutex<Vec<ClusterCredential>>>,
    failure: Arc<Mutex<Option<String>>>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, cluster_id: &str, api_server_url: &str, bearer_token: &str) {
        self.credentials.lock().unwrap().push(ClusterCredential {
            cluster_id: cluster_id.to_string(),
            api_server_url: api_server_url.to_string(),
            bearer_token: bearer_token.to_string(),
        });
    }

    pub fn fail_with(&self, message: &str) {
        *self.failure.lock().unwrap() = Some(message.to_string());
    }
}

#[async_trait]
impl CredentialSource for StaticCredentials {
    async fn cluster_infos(&self) -> Result<Vec<ClusterCredential>, CredentialStoreError> {
        if let Some(message) = self.failure.lock().unwrap().clone() {
            return Err(CredentialStoreError::Malformed(message));
        }
        Ok(self.credentials.lock().unwrap().clone())
    }
}

/// Topology source with a fixed member list, or a fixed failure.
#[derive(Clone, Default)]
pub struct StaticTopology {
    members: Arc<Mutex<Vec<MemberCluster>>>,
    failure: Arc<Mutex<Option<u16>>>,
}

impl StaticTopology {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, name: &str, endpoint: &str) {
        self.members.lock().unwrap().push(MemberCluster {
            name: name.to_string(),
            endpoint: endpoint.to_string(),
        });
    }

    /// Answer with this HTTP status instead of a list.
    pub fn fail_with_status(&self, status: u16) {
        *self.failure.lock().unwrap() = Some(status);
    }
}

#[async_trait]
impl TopologySource for StaticTopology {
    async fn member_clusters(&self) -> Result<Vec<MemberCluster>, TopologyFetchError> {
        if let Some(status) = *self.failure.lock().unwrap() {
            return Err(TopologyFetchError::Status {
                status,
                body: "fake topology failure".into(),
            });
        }
        Ok(self.members.lock().unwrap().clone())
    }
}
