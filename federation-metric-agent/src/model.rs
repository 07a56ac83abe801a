//! Snapshot data model (matches the JSON document published to the KV bucket)
//!
//! Field names are camelCase on the wire; consumers (dashboards, autoscalers)
//! read them as-is.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Cluster identity and access credentials, as stored in the credential store.
///
/// Re-fetched every cycle, never cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterCredential {
    pub cluster_id: String,
    pub api_server_url: String,
    pub bearer_token: String,
}

/// Cluster known to the federation control plane (classification only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberCluster {
    pub name: String,
    pub endpoint: String,
}

/// CPU/memory utilisation in percent, rounded to 2 decimals.
///
/// Can exceed 100 on over-commit. `-1` means the value was unavailable.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct UsageRatio {
    pub cpu: f64,
    pub memory: f64,
}

impl UsageRatio {
    pub const UNAVAILABLE: UsageRatio = UsageRatio { cpu: -1.0, memory: -1.0 };

    /// Build a ratio from raw percentages, rounding both to 2 decimals.
    pub fn rounded(cpu: f64, memory: f64) -> Self {
        Self {
            cpu: round(cpu, 2),
            memory: round(memory, 2),
        }
    }

    pub fn is_available(&self) -> bool {
        self.cpu >= 0.0 && self.memory >= 0.0
    }
}

/// Node count and ready-node count. `-1/-1` when the node list was unavailable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSummary {
    pub total_num: i64,
    pub ready_num: i64,
}

impl NodeSummary {
    pub const UNAVAILABLE: NodeSummary = NodeSummary { total_num: -1, ready_num: -1 };
}

/// Liveness of a cluster's API server.
///
/// `Unhealthy` means the endpoint answered with something other than `ok`;
/// `Unknown` means it could not be reached at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    #[serde(rename = "True")]
    Healthy,
    #[serde(rename = "False")]
    Unhealthy,
    #[serde(rename = "Unknown")]
    Unknown,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "True",
            HealthStatus::Unhealthy => "False",
            HealthStatus::Unknown => "Unknown",
        }
    }
}

/// Extended status, only collected for the host cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostClusterStatus {
    pub cluster_id: String,
    pub status: HealthStatus,
    pub node_summary: NodeSummary,
    pub real_time_usage: UsageRatio,
    pub request_usage: UsageRatio,
}

impl HostClusterStatus {
    /// Placeholder used when the host cluster could not be probed this cycle.
    pub fn unavailable(cluster_id: impl Into<String>) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            status: HealthStatus::Unknown,
            node_summary: NodeSummary::UNAVAILABLE,
            real_time_usage: UsageRatio::UNAVAILABLE,
            request_usage: UsageRatio::UNAVAILABLE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberClusterStatus {
    pub cluster_id: String,
    pub real_time_usage: UsageRatio,
}

/// One published snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricStatus {
    pub time: DateTime<Utc>,
    pub host_cluster_status: HostClusterStatus,
    pub member_cluster_status: Vec<MemberClusterStatus>,
}

/// Snapshot assembled by a collection cycle, not yet stamped.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingSnapshot {
    pub host: HostClusterStatus,
    pub members: Vec<MemberClusterStatus>,
}

impl PendingSnapshot {
    /// Members whose usage could not be read this cycle.
    pub fn degraded_members(&self) -> usize {
        self.members
            .iter()
            .filter(|m| !m.real_time_usage.is_available())
            .count()
    }

    /// Stamp the snapshot at the instant it is finalized for a tick.
    pub fn finalize(self, time: DateTime<Utc>) -> MetricStatus {
        MetricStatus {
            time,
            host_cluster_status: self.host,
            member_cluster_status: self.members,
        }
    }
}

/// Round half away from zero to `decimals` places.
pub fn round(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
