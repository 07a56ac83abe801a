/*!
# Federation Metric DevKit - Stubs et Utilitaires pour Tests

Fait tourner la boucle de collecte sans Vault, Karmada, Kubernetes ni NATS :
- store KV en mémoire qui enregistre chaque put
- clusters scriptés, sources de credentials et de topologie
- builders typés pour nodes, node-metrics et pods
- un harness qui branche le tout sur un `Aggregator`
*/

pub mod cluster_stub;
pub mod fixtures;
pub mod kv_stub;
pub mod test_utils;

pub use cluster_stub::{FakeCluster, FakeClusterFactory, StaticCredentials, StaticTopology};
pub use fixtures::{NodeFixture, PodFixture};
pub use kv_stub::MockKvStore;
pub use test_utils::{spawn_http_fixture, TestHarness};
