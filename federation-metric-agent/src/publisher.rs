//! Publication des snapshots dans un bucket KV NATS JetStream.
//! Chaque put écrase la valeur sous la clé ; pas de file de rejeu.

use async_trait::async_trait;
use async_nats::jetstream::{self, kv};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("NATS connection to {url} failed: {reason}")]
    Connect { url: String, reason: String },
    #[error("bucket {bucket} unavailable: {reason}")]
    Bucket { bucket: String, reason: String },
    #[error("put {key} failed: {reason}")]
    Put { key: String, reason: String },
    #[error("snapshot encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Create the bucket, or open it if it already exists.
    async fn ensure_bucket(&self, name: &str) -> Result<Arc<dyn KeyValueBucket>, PublishError>;
}

#[async_trait]
pub trait KeyValueBucket: Send + Sync {
    /// Overwrite `key`; returns the new revision.
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<u64, PublishError>;
}

#[derive(Debug, Clone)]
pub struct NatsConfig {
    pub url: String,
    pub user: String,
    pub password: String,
}

pub struct NatsStore {
    jetstream: jetstream::Context,
}

impl NatsStore {
    pub async fn connect(config: &NatsConfig) -> Result<Self, PublishError> {
        let client = async_nats::ConnectOptions::with_user_and_password(config.user.clone(), config.password.clone())
            .connect(config.url.as_str())
            .await
            .map_err(|e| PublishError::Connect {
                url: config.url.clone(),
                reason: e.to_string(),
            })?;
        info!("🔌 [nats] Connected to {}", config.url);

        Ok(Self {
            jetstream: jetstream::new(client),
        })
    }
}

#[async_trait]
impl KeyValueStore for NatsStore {
    async fn ensure_bucket(&self, name: &str) -> Result<Arc<dyn KeyValueBucket>, PublishError> {
        let created = self
            .jetstream
            .create_key_value(kv::Config {
                bucket: name.to_string(),
                ..Default::default()
            })
            .await;

        let store = match created {
            Ok(store) => store,
            Err(create_err) => {
                debug!("create bucket {} failed ({}), opening existing", name, create_err);
                self.jetstream
                    .get_key_value(name)
                    .await
                    .map_err(|e| PublishError::Bucket {
                        bucket: name.to_string(),
                        reason: format!("create: {}; open: {}", create_err, e),
                    })?
            }
        };
        Ok(Arc::new(NatsBucket { store }))
    }
}

struct NatsBucket {
    store: kv::Store,
}

#[async_trait]
impl KeyValueBucket for NatsBucket {
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<u64, PublishError> {
        self.store
            .put(key, value.into())
            .await
            .map_err(|e| PublishError::Put {
                key: key.to_string(),
                reason: e.to_string(),
            })
    }
}
