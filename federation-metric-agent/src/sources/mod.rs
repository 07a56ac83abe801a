//! Where the aggregator learns which clusters exist.
//!
//! - `CredentialSource`: every cluster with its endpoint and token (Vault)
//! - `TopologySource`: clusters registered in the federation (Karmada)

pub mod karmada;
pub mod vault;

use crate::model::{ClusterCredential, MemberCluster};
use async_trait::async_trait;

pub use karmada::{KarmadaClient, TopologyFetchError};
pub use vault::{CredentialStoreError, VaultClient};

#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// Current cluster list. Malformed records are skipped, not reported.
    async fn cluster_infos(&self) -> Result<Vec<ClusterCredential>, CredentialStoreError>;
}

#[async_trait]
pub trait TopologySource: Send + Sync {
    async fn member_clusters(&self) -> Result<Vec<MemberCluster>, TopologyFetchError>;
}
