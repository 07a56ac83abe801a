//! Cluster metric probes
//!
//! Four independent reads against one cluster:
//! - real-time CPU/memory utilisation (metrics-server usage vs node capacity)
//! - requested CPU/memory of running pods vs node allocatable
//! - API server liveness (tri-state)
//! - node count and ready-node count
//!
//! Each returns an error (or `Unknown`) on failure; the aggregator turns that
//! into the `-1` sentinel.

use crate::kube::quantity::Amount;
use crate::kube::types::{object_name, Node, NodeList, NodeMetricsList, PodList, Quantity};
use crate::kube::{ClusterApi, ProbeError};
use crate::model::{HealthStatus, NodeSummary};
use std::collections::HashMap;
use tracing::{debug, warn};

/// metrics-server reports CPU usage in nanocores
const NANOCORES_PER_CORE: f64 = 1_000_000_000.0;

/// Real-time utilisation as `(cpu_percent, memory_percent)`, unrounded.
pub async fn collect_metric(client: &dyn ClusterApi) -> Result<(f64, f64), ProbeError> {
    let metrics: NodeMetricsList = serde_json::from_slice(&client.node_metrics_raw().await?)?;
    let nodes: NodeList = serde_json::from_slice(&client.node_list_raw().await?)?;
    compute_usage(&nodes, &metrics)
}

/// Requested vs allocatable as `(cpu_percent, memory_percent)`, unrounded.
pub async fn collect_request_metric(client: &dyn ClusterApi) -> Result<(f64, f64), ProbeError> {
    let nodes: NodeList = serde_json::from_slice(&client.node_list_raw().await?)?;

    let mut requested_cpu = Amount::ZERO;
    let mut requested_memory = Amount::ZERO;
    let mut allocatable_cpu = Amount::ZERO;
    let mut allocatable_memory = Amount::ZERO;

    for node in &nodes.items {
        let name = object_name(&node.metadata);
        match pods_on_node(client, name).await {
            Ok(pods) => {
                let (cpu, memory) = running_pod_requests(&pods);
                requested_cpu += cpu;
                requested_memory += memory;
            }
            Err(e) => warn!("pod listing failed for node {}: {}", name, e),
        }

        allocatable_cpu += amount_or_zero(allocatable(node, "cpu"));
        allocatable_memory += amount_or_zero(allocatable(node, "memory"));
    }

    let allocatable_cpu_milli = allocatable_cpu.milli_value();
    if allocatable_cpu_milli <= 0 {
        return Err(ProbeError::NoCapacity("allocatable cpu"));
    }
    let allocatable_memory_bytes = allocatable_memory.value();
    if allocatable_memory_bytes <= 0 {
        return Err(ProbeError::NoCapacity("allocatable memory"));
    }

    let cpu = requested_cpu.milli_value() as f64 / allocatable_cpu_milli as f64 * 100.0;
    let memory = requested_memory.value() as f64 / allocatable_memory_bytes as f64 * 100.0;
    Ok((cpu, memory))
}

/// `Healthy` only for a body of exactly `ok`.
pub async fn node_health_check(client: &dyn ClusterApi) -> HealthStatus {
    match client.healthz_raw().await {
        Ok(body) => health_from_body(&body),
        Err(e) => {
            debug!("healthz failed: {}", e);
            HealthStatus::Unknown
        }
    }
}

pub async fn node_summary(client: &dyn ClusterApi) -> Result<NodeSummary, ProbeError> {
    let nodes: NodeList = serde_json::from_slice(&client.node_list_raw().await?)?;
    Ok(count_ready(&nodes))
}

async fn pods_on_node(client: &dyn ClusterApi, node_name: &str) -> Result<PodList, ProbeError> {
    let raw = client.pods_on_node_raw(node_name).await?;
    Ok(serde_json::from_slice(&raw)?)
}

pub fn health_from_body(body: &[u8]) -> HealthStatus {
    if body == b"ok" {
        HealthStatus::Healthy
    } else {
        HealthStatus::Unhealthy
    }
}

/// Match usage to nodes by name; unmatched entries on either side are left out
/// of both sums (metrics-server may lag behind node registration).
pub fn compute_usage(nodes: &NodeList, metrics: &NodeMetricsList) -> Result<(f64, f64), ProbeError> {
    let by_name: HashMap<&str, &Node> = nodes
        .items
        .iter()
        .map(|n| (object_name(&n.metadata), n))
        .collect();

    let mut cpu_used = 0.0;
    let mut memory_used = 0.0;
    let mut cpu_cores = 0.0;
    let mut memory_size = 0.0;

    for item in &metrics.items {
        let Some(node) = by_name.get(item.name()) else {
            debug!("no node entry for metrics of {}", item.name());
            continue;
        };
        cpu_used += strip_unit(&item.usage.cpu.0, 1);
        memory_used += strip_unit(&item.usage.memory.0, 2);
        cpu_cores += capacity(node, "cpu")
            .and_then(|q| q.0.trim().parse::<f64>().ok())
            .unwrap_or(0.0);
        memory_size += capacity(node, "memory").map_or(0.0, |q| strip_unit(&q.0, 2));
    }

    if cpu_cores <= 0.0 {
        return Err(ProbeError::NoCapacity("cpu"));
    }
    if memory_size <= 0.0 {
        return Err(ProbeError::NoCapacity("memory"));
    }

    let cpu = cpu_used / (cpu_cores * NANOCORES_PER_CORE) * 100.0;
    let memory = memory_used / memory_size * 100.0;
    Ok((cpu, memory))
}

/// Total nodes, and nodes whose first `Ready` condition is `True`.
pub fn count_ready(nodes: &NodeList) -> NodeSummary {
    let ready = nodes
        .items
        .iter()
        .filter(|node| {
            node.status
                .as_ref()
                .and_then(|s| s.conditions.as_ref())
                .and_then(|conditions| conditions.iter().find(|c| c.type_ == "Ready"))
                .is_some_and(|c| c.status == "True")
        })
        .count();

    NodeSummary {
        total_num: nodes.items.len() as i64,
        ready_num: ready as i64,
    }
}

/// Sum container requests (not limits) of `Running` pods.
pub fn running_pod_requests(pods: &PodList) -> (Amount, Amount) {
    let mut cpu = Amount::ZERO;
    let mut memory = Amount::ZERO;

    let running = pods
        .items
        .iter()
        .filter(|p| p.status.as_ref().and_then(|s| s.phase.as_deref()) == Some("Running"));
    for pod in running {
        let containers = pod.spec.iter().flat_map(|spec| &spec.containers);
        for requests in containers.filter_map(|c| c.resources.as_ref()?.requests.as_ref()) {
            cpu += amount_or_zero(requests.get("cpu"));
            memory += amount_or_zero(requests.get("memory"));
        }
    }
    (cpu, memory)
}

fn capacity<'a>(node: &'a Node, resource: &str) -> Option<&'a Quantity> {
    node.status.as_ref()?.capacity.as_ref()?.get(resource)
}

fn allocatable<'a>(node: &'a Node, resource: &str) -> Option<&'a Quantity> {
    node.status.as_ref()?.allocatable.as_ref()?.get(resource)
}

fn amount_or_zero(quantity: Option<&Quantity>) -> Amount {
    let Some(quantity) = quantity else {
        return Amount::ZERO;
    };
    Amount::from_quantity(quantity).unwrap_or_else(|e| {
        debug!("{}", e);
        Amount::ZERO
    })
}

/// Drop up to `suffix_len` trailing unit letters and parse the rest; 0 if unparsable.
fn strip_unit(raw: &str, suffix_len: usize) -> f64 {
    let mut number = raw.trim();
    for _ in 0..suffix_len {
        if number.ends_with(|c: char| c.is_ascii_alphabetic()) {
            number = &number[..number.len() - 1];
        }
    }
    number.parse().unwrap_or(0.0)
}
