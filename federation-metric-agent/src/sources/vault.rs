//! Vault KV v2 credential store (AppRole auth)
//!
//! Layout: `secret/metadata/cluster` lists cluster ids, and
//! `secret/data/cluster/<id>` holds `{ clusterApiUrl, clusterToken }`.

use super::CredentialSource;
use crate::model::ClusterCredential;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

const LOGIN_PATH: &str = "v1/auth/approle/login";
const LIST_PATH: &str = "v1/secret/metadata/cluster";
const DATA_PATH: &str = "v1/secret/data/cluster";

#[derive(Debug, thiserror::Error)]
pub enum CredentialStoreError {
    #[error("vault unreachable: {0}")]
    Unreachable(#[from] reqwest::Error),
    #[error("vault {operation} returned HTTP {status}: {body}")]
    Status {
        operation: &'static str,
        status: u16,
        body: String,
    },
    #[error("malformed vault response: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone)]
pub struct VaultConfig {
    pub url: String,
    pub role_id: String,
    pub secret_id: String,
}

#[derive(Deserialize)]
struct LoginResponse {
    auth: LoginAuth,
}

#[derive(Deserialize)]
struct LoginAuth {
    client_token: String,
}

#[derive(Deserialize)]
struct ListResponse {
    data: ListData,
}

#[derive(Deserialize)]
struct ListData {
    #[serde(default)]
    keys: Vec<String>,
}

#[derive(Deserialize)]
struct ReadResponse {
    data: Option<ReadData>,
}

#[derive(Deserialize)]
struct ReadData {
    data: Option<Value>,
}

pub struct VaultClient {
    http: reqwest::Client,
    config: VaultConfig,
}

impl VaultClient {
    pub fn new(config: VaultConfig, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.url.trim_end_matches('/'), path)
    }

    /// AppRole login; a fresh token per fetch so nothing outlives a cycle.
    async fn login(&self) -> Result<String, CredentialStoreError> {
        let body = serde_json::json!({
            "role_id": self.config.role_id,
            "secret_id": self.config.secret_id,
        });
        let response = self.http.post(self.url(LOGIN_PATH)).json(&body).send().await?;
        let response = check_status("login", response).await?;

        let login: LoginResponse = response
            .json()
            .await
            .map_err(|e| CredentialStoreError::Malformed(format!("login: {}", e)))?;
        Ok(login.auth.client_token)
    }

    async fn list_ids(&self, token: &str) -> Result<Vec<String>, CredentialStoreError> {
        let response = self
            .http
            .get(self.url(LIST_PATH))
            .query(&[("list", "true")])
            .header("X-Vault-Token", token)
            .send()
            .await?;

        // vault answers 404 when the folder holds no secrets
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        let response = check_status("list", response).await?;

        let list: ListResponse = response
            .json()
            .await
            .map_err(|e| CredentialStoreError::Malformed(format!("list: {}", e)))?;
        Ok(list.data.keys)
    }

    /// `None` when the record can't be read or lacks a field.
    async fn read_credential(&self, token: &str, key: &str) -> Option<ClusterCredential> {
        let cluster_id = key.trim_end_matches('/');
        let url = format!("{}/{}", self.url(DATA_PATH), cluster_id);

        let response = match self.http.get(&url).header("X-Vault-Token", token).send().await {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                warn!("[vault] record {} skipped: HTTP {}", cluster_id, r.status());
                return None;
            }
            Err(e) => {
                warn!("[vault] record {} skipped: {}", cluster_id, e);
                return None;
            }
        };

        let record = match response.json::<ReadResponse>().await {
            Ok(ReadResponse { data: Some(ReadData { data: Some(record) }) }) => record,
            Ok(_) => {
                warn!("[vault] record {} skipped: empty", cluster_id);
                return None;
            }
            Err(e) => {
                warn!("[vault] record {} skipped: {}", cluster_id, e);
                return None;
            }
        };

        parse_record(cluster_id, &record)
    }
}

async fn check_status(
    operation: &'static str,
    response: reqwest::Response,
) -> Result<reqwest::Response, CredentialStoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(CredentialStoreError::Status {
        operation,
        status: status.as_u16(),
        body,
    })
}

/// Build a credential from a `{ clusterApiUrl, clusterToken }` record.
pub fn parse_record(cluster_id: &str, record: &Value) -> Option<ClusterCredential> {
    let url = record.get("clusterApiUrl").and_then(Value::as_str);
    let token = record.get("clusterToken").and_then(Value::as_str);

    match (url, token) {
        (Some(url), Some(token)) => Some(ClusterCredential {
            cluster_id: cluster_id.to_string(),
            api_server_url: url.to_string(),
            bearer_token: token.to_string(),
        }),
        _ => {
            warn!("[vault] record {} skipped: missing clusterApiUrl/clusterToken", cluster_id);
            None
        }
    }
}

#[async_trait]
impl CredentialSource for VaultClient {
    async fn cluster_infos(&self) -> Result<Vec<ClusterCredential>, CredentialStoreError> {
        let token = self.login().await?;
        let ids = self.list_ids(&token).await?;

        let mut credentials = Vec::with_capacity(ids.len());
        for id in &ids {
            if let Some(credential) = self.read_credential(&token, id).await {
                credentials.push(credential);
            }
        }
        debug!("vault: {} of {} cluster records usable", credentials.len(), ids.len());
        Ok(credentials)
    }
}
