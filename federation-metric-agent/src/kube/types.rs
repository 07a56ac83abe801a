//! Kubernetes wire types.
//! Core objects come from `k8s_openapi`; metrics-server objects are not in the
//! OpenAPI schema and are declared here on the same building blocks.

pub use k8s_openapi::api::core::v1::{
    Container, Node, NodeCondition, NodeStatus, Pod, PodSpec, PodStatus, ResourceRequirements,
};
pub use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
pub use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
pub use k8s_openapi::List;

/// `api/v1/nodes`
pub type NodeList = List<Node>;

/// `api/v1/pods?fieldSelector=spec.nodeName=...`
pub type PodList = List<Pod>;

#[derive(serde::Deserialize, serde::Serialize, Clone, Debug)]
pub struct NodeMetricsUsage {
    /// nanocores, e.g. `250000000n`
    pub cpu: Quantity,
    pub memory: Quantity,
}

#[derive(serde::Deserialize, serde::Serialize, Clone, Debug)]
pub struct NodeMetrics {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub window: String,
    pub usage: NodeMetricsUsage,
}

/// `apis/metrics.k8s.io/v1beta1/nodes`
#[derive(serde::Deserialize, serde::Serialize, Clone, Debug, Default)]
pub struct NodeMetricsList {
    #[serde(default)]
    pub items: Vec<NodeMetrics>,
}

impl NodeMetrics {
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }
}

/// `metadata.name` of a core object, empty when unset.
pub fn object_name(metadata: &ObjectMeta) -> &str {
    metadata.name.as_deref().unwrap_or_default()
}
