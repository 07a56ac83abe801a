//! Federation Metric Agent
//!
//! Periodically collects resource usage from every cluster of a Karmada
//! federation and publishes one aggregated snapshot to a NATS key-value bucket:
//! - cluster credentials from Vault, federation topology from Karmada
//! - per-cluster probes against the Kubernetes API and metrics API
//! - one snapshot per tick, overwriting the previous one

pub mod aggregator;
pub mod config;
pub mod health;
pub mod kube;
pub mod metrics;
pub mod model;
pub mod publisher;
pub mod sources;
