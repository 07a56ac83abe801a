/*!
Builders de payloads Kubernetes (types `k8s_openapi`)
*/

use federation_metric_agent::kube::types::{
    Container, List, Node, NodeCondition, NodeList, NodeMetrics, NodeMetricsList, NodeMetricsUsage, NodeStatus,
    ObjectMeta, Pod, PodList, PodSpec, PodStatus, Quantity, ResourceRequirements,
};
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct NodeFixture {
    name: String,
    capacity: (String, String),
    allocatable: (String, String),
    conditions: Vec<(String, String)>,
}

impl NodeFixture {
    /// A node with 4 cores / 8Gi, all allocatable, no conditions.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            capacity: ("4".into(), "8Gi".into()),
            allocatable: ("4".into(), "8Gi".into()),
            conditions: Vec::new(),
        }
    }

    pub fn capacity(mut self, cpu: &str, memory: &str) -> Self {
        self.capacity = (cpu.into(), memory.into());
        self
    }

    pub fn allocatable(mut self, cpu: &str, memory: &str) -> Self {
        self.allocatable = (cpu.into(), memory.into());
        self
    }

    pub fn ready(self, ready: bool) -> Self {
        self.condition("Ready", if ready { "True" } else { "False" })
    }

    pub fn condition(mut self, condition_type: &str, status: &str) -> Self {
        self.conditions.push((condition_type.into(), status.into()));
        self
    }

    pub fn build(&self) -> Node {
        let conditions = self
            .conditions
            .iter()
            .map(|(condition_type, status)| NodeCondition {
                type_: condition_type.clone(),
                status: status.clone(),
                ..Default::default()
            })
            .collect();

        Node {
            metadata: named(&self.name),
            status: Some(NodeStatus {
                capacity: Some(cpu_memory(&self.capacity.0, &self.capacity.1)),
                allocatable: Some(cpu_memory(&self.allocatable.0, &self.allocatable.1)),
                conditions: Some(conditions),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

fn named(name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        ..Default::default()
    }
}

fn cpu_memory(cpu: &str, memory: &str) -> BTreeMap<String, Quantity> {
    BTreeMap::from([
        ("cpu".to_string(), Quantity(cpu.to_string())),
        ("memory".to_string(), Quantity(memory.to_string())),
    ])
}

pub fn node_list(nodes: &[NodeFixture]) -> NodeList {
    List {
        items: nodes.iter().map(NodeFixture::build).collect(),
        metadata: Default::default(),
    }
}

/// `(node, cpu usage, memory usage)` entries, usage as metrics-server reports it.
pub fn node_metrics(entries: &[(&str, &str, &str)]) -> NodeMetricsList {
    NodeMetricsList {
        items: entries
            .iter()
            .map(|(name, cpu, memory)| NodeMetrics {
                metadata: named(name),
                timestamp: "2024-01-01T00:00:00Z".to_string(),
                window: "30s".to_string(),
                usage: NodeMetricsUsage {
                    cpu: Quantity(cpu.to_string()),
                    memory: Quantity(memory.to_string()),
                },
            })
            .collect(),
    }
}

#[derive(Debug, Clone)]
pub struct PodFixture {
    name: String,
    node_name: String,
    phase: String,
    containers: Vec<BTreeMap<String, Quantity>>,
}

impl PodFixture {
    /// A running pod with no containers yet.
    pub fn running(name: &str, node_name: &str) -> Self {
        Self {
            name: name.to_string(),
            node_name: node_name.to_string(),
            phase: "Running".into(),
            containers: Vec::new(),
        }
    }

    pub fn phase(mut self, phase: &str) -> Self {
        self.phase = phase.into();
        self
    }

    /// Add a container requesting `cpu`/`memory`; `None` leaves the request unset.
    pub fn container(mut self, cpu: Option<&str>, memory: Option<&str>) -> Self {
        let mut requests = BTreeMap::new();
        if let Some(cpu) = cpu {
            requests.insert("cpu".to_string(), Quantity(cpu.to_string()));
        }
        if let Some(memory) = memory {
            requests.insert("memory".to_string(), Quantity(memory.to_string()));
        }
        self.containers.push(requests);
        self
    }

    pub fn build(&self) -> Pod {
        let containers = self
            .containers
            .iter()
            .enumerate()
            .map(|(i, requests)| Container {
                name: format!("c{}", i),
                resources: Some(ResourceRequirements {
                    requests: Some(requests.clone()),
                    ..Default::default()
                }),
                ..Default::default()
            })
            .collect();

        Pod {
            metadata: named(&self.name),
            spec: Some(PodSpec {
                node_name: Some(self.node_name.clone()),
                containers,
                ..Default::default()
            }),
            status: Some(PodStatus {
                phase: Some(self.phase.clone()),
                ..Default::default()
            }),
        }
    }
}

pub fn pod_list(pods: &[PodFixture]) -> PodList {
    List {
        items: pods.iter().map(PodFixture::build).collect(),
        metadata: Default::default(),
    }
}
