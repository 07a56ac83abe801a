//! Per-cluster Kubernetes API access
//!
//! Provides:
//! - `ClusterApi`: the four raw reads the probes need
//! - `KubeClient`: reqwest implementation (bearer token, self-signed certs accepted)
//! - `ClusterClientFactory`: builds one client per credential each cycle

pub mod quantity;
pub mod types;

use crate::model::ClusterCredential;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub const NODES_PATH: &str = "api/v1/nodes";
pub const NODE_METRICS_PATH: &str = "apis/metrics.k8s.io/v1beta1/nodes";
pub const HEALTHZ_PATH: &str = "healthz";
pub const PODS_PATH: &str = "api/v1/pods";

/// Failure of a single probe read or computation
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("{path} returned HTTP {status}")]
    Status { path: String, status: u16 },
    #[error("malformed response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("no {0} capacity to compute a ratio against")]
    NoCapacity(&'static str),
    #[error("cluster unavailable: {0}")]
    Unavailable(String),
}

/// Failure to build a client for one cluster; that cluster is skipped for the cycle
#[derive(Debug, thiserror::Error)]
pub enum ClientBuildError {
    #[error("invalid API server URL {url:?}: {reason}")]
    InvalidEndpoint { url: String, reason: String },
    #[error("bearer token is not a valid header value")]
    InvalidToken,
    #[error("HTTP client init failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Raw reads against one cluster's API surface.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// `api/v1/nodes`
    async fn node_list_raw(&self) -> Result<Vec<u8>, ProbeError>;

    /// `apis/metrics.k8s.io/v1beta1/nodes`
    async fn node_metrics_raw(&self) -> Result<Vec<u8>, ProbeError>;

    /// `/healthz` body
    async fn healthz_raw(&self) -> Result<Vec<u8>, ProbeError>;

    /// Pods of every namespace scheduled to `node_name`
    async fn pods_on_node_raw(&self, node_name: &str) -> Result<Vec<u8>, ProbeError>;
}

pub trait ClusterClientFactory: Send + Sync {
    fn connect(&self, credential: &ClusterCredential) -> Result<Arc<dyn ClusterApi>, ClientBuildError>;
}

/// reqwest-backed cluster client.
///
/// Certificate validation is disabled: member API servers use self-signed
/// certificates, so anyone on the path can impersonate them.
pub struct KubeClient {
    http: reqwest::Client,
    base_url: String,
}

impl KubeClient {
    pub fn connect(credential: &ClusterCredential, timeout: Duration) -> Result<Self, ClientBuildError> {
        let url = reqwest::Url::parse(&credential.api_server_url).map_err(|e| {
            ClientBuildError::InvalidEndpoint {
                url: credential.api_server_url.clone(),
                reason: e.to_string(),
            }
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ClientBuildError::InvalidEndpoint {
                url: credential.api_server_url.clone(),
                reason: format!("unsupported scheme {}", url.scheme()),
            });
        }

        let mut auth = HeaderValue::from_str(&format!("Bearer {}", credential.bearer_token))
            .map_err(|_| ClientBuildError::InvalidToken)?;
        auth.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);

        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .default_headers(headers)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            http,
            base_url: credential.api_server_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get(&self, path: &str, query: Option<(&str, String)>) -> Result<Vec<u8>, ProbeError> {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let mut request = self.http.get(&url);
        if let Some(pair) = query {
            request = request.query(&[pair]);
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.bytes().await?;
        if !status.is_success() {
            debug!("GET {} -> {}", url, status);
            return Err(ProbeError::Status {
                path: path.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(body.to_vec())
    }
}

#[async_trait]
impl ClusterApi for KubeClient {
    async fn node_list_raw(&self) -> Result<Vec<u8>, ProbeError> {
        self.get(NODES_PATH, None).await
    }

    async fn node_metrics_raw(&self) -> Result<Vec<u8>, ProbeError> {
        self.get(NODE_METRICS_PATH, None).await
    }

    async fn healthz_raw(&self) -> Result<Vec<u8>, ProbeError> {
        self.get(HEALTHZ_PATH, None).await
    }

    async fn pods_on_node_raw(&self, node_name: &str) -> Result<Vec<u8>, ProbeError> {
        let selector = format!("spec.nodeName={}", node_name);
        self.get(PODS_PATH, Some(("fieldSelector", selector))).await
    }
}

/// Default factory: one `KubeClient` per credential with a per-request timeout.
#[derive(Debug, Clone)]
pub struct KubeClientFactory {
    request_timeout: Duration,
}

impl KubeClientFactory {
    pub fn new(request_timeout: Duration) -> Self {
        Self { request_timeout }
    }
}

impl ClusterClientFactory for KubeClientFactory {
    fn connect(&self, credential: &ClusterCredential) -> Result<Arc<dyn ClusterApi>, ClientBuildError> {
        let client = KubeClient::connect(credential, self.request_timeout)?;
        Ok(Arc::new(client))
    }
}
