//! Karmada control-plane client (cluster.karmada.io/v1alpha1)

use super::TopologySource;
use crate::model::MemberCluster;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

const CLUSTERS_PATH: &str = "apis/cluster.karmada.io/v1alpha1/clusters";

#[derive(Debug, thiserror::Error)]
pub enum TopologyFetchError {
    #[error("karmada request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("karmada responded {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed karmada cluster list: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize)]
struct ClusterList {
    #[serde(default)]
    items: Vec<ClusterItem>,
}

#[derive(Debug, Deserialize)]
struct ClusterItem {
    #[serde(default)]
    metadata: ClusterMetadata,
    #[serde(default)]
    spec: ClusterSpec,
}

#[derive(Debug, Default, Deserialize)]
struct ClusterMetadata {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClusterSpec {
    #[serde(default)]
    api_endpoint: String,
}

/// Lists federation member clusters.
///
/// TLS verification is off (self-signed control-plane certs), so a MITM on
/// this channel can inject fake members.
#[derive(Clone)]
pub struct KarmadaClient {
    http: reqwest::Client,
    api: String,
    token: String,
}

impl KarmadaClient {
    pub fn new(api: impl Into<String>, token: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            api: api.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }
}

#[async_trait]
impl TopologySource for KarmadaClient {
    async fn member_clusters(&self) -> Result<Vec<MemberCluster>, TopologyFetchError> {
        let url = format!("{}/{}", self.api, CLUSTERS_PATH);
        let response = self.http.get(&url).bearer_auth(&self.token).send().await?;

        let status = response.status();
        let body = response.text().await?;
        if status != reqwest::StatusCode::OK {
            return Err(TopologyFetchError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let list: ClusterList = serde_json::from_str(&body)?;
        debug!("karmada lists {} clusters", list.items.len());

        Ok(list
            .items
            .into_iter()
            .map(|item| MemberCluster {
                name: item.metadata.name,
                endpoint: item.spec.api_endpoint,
            })
            .collect())
    }
}
