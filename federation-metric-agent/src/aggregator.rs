/*!
AGGREGATOR - Boucle de collecte et de publication

RÔLE :
Produit un snapshot de la fédération par tick et le pousse dans le bucket KV.

FONCTIONNEMENT :
1. credentials (Vault) + topologie (Karmada) ; un échec termine la boucle
2. sonde chaque cluster en parallèle borné, avec une deadline par cluster ;
   les résultats reviennent dans l'ordre des credentials
3. le snapshot attend le tick suivant, puis il est horodaté et publié

Le cluster hôte a santé, nodes et requests en plus ; les membres n'ont que
l'usage temps réel. Un cluster en échec vaut `-1`, jamais une erreur de cycle.
*/

use crate::config::{AgentConfig, MembershipRule};
use crate::health::{LoopState, StatusTracker};
use crate::kube::{ClusterApi, ClusterClientFactory, ProbeError};
use crate::metrics;
use crate::model::{
    ClusterCredential, HostClusterStatus, MemberCluster, MemberClusterStatus, NodeSummary,
    PendingSnapshot, UsageRatio,
};
use crate::publisher::{KeyValueBucket, KeyValueStore, PublishError};
use crate::sources::{CredentialSource, CredentialStoreError, TopologyFetchError, TopologySource};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Errors that stop the loop. The caller decides between exit and restart.
#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    #[error("credential store: {0}")]
    Credentials(#[from] CredentialStoreError),
    #[error("federation topology: {0}")]
    Topology(#[from] TopologyFetchError),
    #[error("key-value bucket: {0}")]
    Bucket(#[source] PublishError),
}

#[derive(Debug, Clone)]
pub struct AggregatorSettings {
    pub host_cluster_id: String,
    pub bucket_name: String,
    pub subject: String,
    pub publish_interval: Duration,
    pub probe_concurrency: usize,
    pub probe_deadline: Duration,
    pub membership: MembershipRule,
}

impl AggregatorSettings {
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            host_cluster_id: config.host_cluster_name.clone(),
            bucket_name: config.nats_bucket_name.clone(),
            subject: config.nats_subject_name.clone(),
            publish_interval: config.publish_interval(),
            probe_concurrency: config.probe_concurrency,
            probe_deadline: config.probe_timeout(),
            membership: config.membership_rule,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterRole {
    Host,
    Member,
}

/// Host if the id matches; otherwise member per `rule`, or `None` to skip.
///
/// Under `AnyNonHost` a credential is a member when its endpoint is listed in
/// the topology or its id differs from the host's, so every non-host
/// credential qualifies whatever the topology says.
pub fn classify(
    credential: &ClusterCredential,
    topology: &[MemberCluster],
    host_cluster_id: &str,
    rule: MembershipRule,
) -> Option<ClusterRole> {
    if credential.cluster_id == host_cluster_id {
        return Some(ClusterRole::Host);
    }

    let listed = topology.iter().any(|m| m.endpoint == credential.api_server_url);
    let member = match rule {
        MembershipRule::AnyNonHost => listed || credential.cluster_id != host_cluster_id,
        MembershipRule::Topology => listed,
    };
    member.then_some(ClusterRole::Member)
}

enum ClusterOutcome {
    Host(HostClusterStatus),
    Member(MemberClusterStatus),
}

/// Everything one cluster probe needs, owned so the future is `'static`.
struct ProbeJob {
    clients: Arc<dyn ClusterClientFactory>,
    topology: Arc<Vec<MemberCluster>>,
    host_cluster_id: String,
    rule: MembershipRule,
    deadline: Duration,
}

impl ProbeJob {
    async fn run(self, credential: ClusterCredential) -> Option<ClusterOutcome> {
        let role = match classify(&credential, &self.topology, &self.host_cluster_id, self.rule) {
            Some(role) => role,
            None => {
                debug!("{} not in federation topology, skipped", credential.cluster_id);
                return None;
            }
        };

        let client = match self.clients.connect(&credential) {
            Ok(client) => client,
            Err(e) => {
                warn!("{} client creation failed: {}", credential.cluster_id, e);
                return None;
            }
        };

        let probe = async {
            match role {
                ClusterRole::Host => ClusterOutcome::Host(probe_host(&self.host_cluster_id, client.as_ref()).await),
                ClusterRole::Member => {
                    ClusterOutcome::Member(probe_member(&credential.cluster_id, client.as_ref()).await)
                }
            }
        };

        match timeout(self.deadline, probe).await {
            Ok(outcome) => Some(outcome),
            Err(_) => {
                warn!("{} probe exceeded {:?}, left out of this cycle", credential.cluster_id, self.deadline);
                None
            }
        }
    }
}

async fn probe_host(cluster_id: &str, client: &dyn ClusterApi) -> HostClusterStatus {
    let (usage, requests, status, summary) = tokio::join!(
        metrics::collect_metric(client),
        metrics::collect_request_metric(client),
        metrics::node_health_check(client),
        metrics::node_summary(client),
    );

    let node_summary = summary.unwrap_or_else(|e| {
        warn!("{} node summary unavailable: {}", cluster_id, e);
        NodeSummary::UNAVAILABLE
    });

    debug!("{} apiserver health: {}", cluster_id, status.as_str());
    HostClusterStatus {
        cluster_id: cluster_id.to_string(),
        status,
        node_summary,
        real_time_usage: ratio_or_sentinel(cluster_id, "usage", usage),
        request_usage: ratio_or_sentinel(cluster_id, "request usage", requests),
    }
}

async fn probe_member(cluster_id: &str, client: &dyn ClusterApi) -> MemberClusterStatus {
    let usage = metrics::collect_metric(client).await;
    MemberClusterStatus {
        cluster_id: cluster_id.to_string(),
        real_time_usage: ratio_or_sentinel(cluster_id, "usage", usage),
    }
}

fn ratio_or_sentinel(cluster_id: &str, what: &str, result: Result<(f64, f64), ProbeError>) -> UsageRatio {
    match result {
        Ok((cpu, memory)) => UsageRatio::rounded(cpu, memory),
        Err(e) => {
            warn!("{} {} unavailable: {}", cluster_id, what, e);
            UsageRatio::UNAVAILABLE
        }
    }
}

pub struct Aggregator {
    credentials: Arc<dyn CredentialSource>,
    topology: Arc<dyn TopologySource>,
    clients: Arc<dyn ClusterClientFactory>,
    store: Arc<dyn KeyValueStore>,
    settings: AggregatorSettings,
    tracker: StatusTracker,
}

impl Aggregator {
    pub fn new(
        credentials: Arc<dyn CredentialSource>,
        topology: Arc<dyn TopologySource>,
        clients: Arc<dyn ClusterClientFactory>,
        store: Arc<dyn KeyValueStore>,
        settings: AggregatorSettings,
    ) -> Self {
        Self {
            credentials,
            topology,
            clients,
            store,
            settings,
            tracker: StatusTracker::new(),
        }
    }

    /// Share an existing tracker (e.g. the one behind the health router).
    pub fn with_tracker(mut self, tracker: StatusTracker) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn tracker(&self) -> &StatusTracker {
        &self.tracker
    }

    pub fn settings(&self) -> &AggregatorSettings {
        &self.settings
    }

    /// One collection pass, without publishing.
    pub async fn collect(&self) -> Result<PendingSnapshot, CycleError> {
        let credentials = self.credentials.cluster_infos().await?;
        let topology = Arc::new(self.topology.member_clusters().await?);
        debug!("cycle: {} credentials, {} topology entries", credentials.len(), topology.len());

        let probes: Vec<_> = credentials
            .into_iter()
            .map(|credential| {
                let job = ProbeJob {
                    clients: Arc::clone(&self.clients),
                    topology: Arc::clone(&topology),
                    host_cluster_id: self.settings.host_cluster_id.clone(),
                    rule: self.settings.membership,
                    deadline: self.settings.probe_deadline,
                };
                job.run(credential)
            })
            .collect();

        // buffered keeps input order, so members stay in credential order
        let outcomes: Vec<Option<ClusterOutcome>> = stream::iter(probes)
            .buffered(self.settings.probe_concurrency.max(1))
            .collect()
            .await;

        let mut host = None;
        let mut members = Vec::new();
        for outcome in outcomes.into_iter().flatten() {
            match outcome {
                ClusterOutcome::Host(status) if host.is_none() => host = Some(status),
                ClusterOutcome::Host(_) => warn!("duplicate host credential ignored"),
                ClusterOutcome::Member(status) => members.push(status),
            }
        }

        let host = host.unwrap_or_else(|| {
            warn!("host cluster {} not probed this cycle", self.settings.host_cluster_id);
            HostClusterStatus::unavailable(&self.settings.host_cluster_id)
        });
        Ok(PendingSnapshot { host, members })
    }

    /// Run until `shutdown` resolves or a fatal error occurs.
    ///
    /// A collected snapshot waits for the next tick; if `shutdown` resolves
    /// first it is discarded.
    pub async fn run<S>(&self, shutdown: S) -> Result<(), CycleError>
    where
        S: Future<Output = ()>,
    {
        let bucket = self
            .store
            .ensure_bucket(&self.settings.bucket_name)
            .await
            .map_err(CycleError::Bucket)?;
        self.tracker.mark_bucket_ready();
        info!("📦 Publishing to bucket {} under {}", self.settings.bucket_name, self.settings.subject);

        let period = self.settings.publish_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tokio::pin!(shutdown);

        loop {
            self.tracker.set_state(LoopState::Collecting);
            let pending = tokio::select! {
                _ = &mut shutdown => {
                    self.tracker.set_state(LoopState::Cancelled);
                    info!("🛑 Shutdown during collection");
                    return Ok(());
                }
                result = self.collect() => match result {
                    Ok(pending) => pending,
                    Err(e) => {
                        error!("💥 Collection aborted: {}", e);
                        return Err(e);
                    }
                },
            };
            self.tracker.record_cycle();
            debug!(
                "Cycle complete: {} member clusters ({} degraded), waiting for tick",
                pending.members.len(),
                pending.degraded_members()
            );

            self.tracker.set_state(LoopState::AwaitingTick);
            tokio::select! {
                _ = &mut shutdown => {
                    self.tracker.set_state(LoopState::Cancelled);
                    info!("🛑 Shutdown before tick, snapshot discarded");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    self.tracker.set_state(LoopState::Publishing);
                    self.publish(bucket.as_ref(), pending).await;
                }
            }
        }
    }

    /// Stamp and put; failures are logged and the loop goes on.
    async fn publish(&self, bucket: &dyn KeyValueBucket, pending: PendingSnapshot) {
        let snapshot = pending.finalize(Utc::now());

        let payload = match serde_json::to_vec(&snapshot) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to encode metrics: {}", PublishError::from(e));
                self.tracker.record_publish_failure();
                return;
            }
        };

        match bucket.put(&self.settings.subject, payload).await {
            Ok(revision) => {
                info!("📤 Metric transfer complete (revision {})", revision);
                self.tracker.record_publish(revision, snapshot.time);
            }
            Err(e) => {
                warn!("❌ Failed to send metrics: {}", e);
                self.tracker.record_publish_failure();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credential(id: &str, url: &str) -> ClusterCredential {
        ClusterCredential {
            cluster_id: id.into(),
            api_server_url: url.into(),
            bearer_token: "t".into(),
        }
    }

    fn member(name: &str, endpoint: &str) -> MemberCluster {
        MemberCluster {
            name: name.into(),
            endpoint: endpoint.into(),
        }
    }

    #[test]
    fn test_host_is_never_member() {
        let host = credential("host-1", "https://host");
        let topology = vec![member("host-1", "https://host")];
        for rule in [MembershipRule::AnyNonHost, MembershipRule::Topology] {
            assert_eq!(classify(&host, &topology, "host-1", rule), Some(ClusterRole::Host));
        }
    }

    #[test]
    fn test_any_non_host_ignores_topology() {
        let other = credential("edge-7", "https://edge-7");
        assert_eq!(
            classify(&other, &[], "host-1", MembershipRule::AnyNonHost),
            Some(ClusterRole::Member)
        );
        assert_eq!(
            classify(&other, &[member("m", "https://elsewhere")], "host-1", MembershipRule::AnyNonHost),
            Some(ClusterRole::Member)
        );
    }

    #[test]
    fn test_topology_rule_requires_listing() {
        let listed = credential("member-1", "https://member");
        let unlisted = credential("edge-7", "https://edge-7");
        let topology = vec![member("member-1", "https://member")];

        assert_eq!(
            classify(&listed, &topology, "host-1", MembershipRule::Topology),
            Some(ClusterRole::Member)
        );
        assert_eq!(classify(&unlisted, &topology, "host-1", MembershipRule::Topology), None);
    }
}
