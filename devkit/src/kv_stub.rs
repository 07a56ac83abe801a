/*!
Mock KV Store pour tests sans serveur NATS

Remplace le bucket JetStream : enregistre chaque put avec sa révision et peut
simuler un bucket refusé ou des puts en échec.
*/

use async_trait::async_trait;
use federation_metric_agent::publisher::{KeyValueBucket, KeyValueStore, PublishError};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
pub struct StoredValue {
    pub bucket: String,
    pub key: String,
    pub payload: Vec<u8>,
    pub revision: u64,
}

#[derive(Clone, Default)]
pub struct MockKvStore {
    puts: Arc<Mutex<Vec<StoredValue>>>,
    buckets: Arc<Mutex<Vec<String>>>,
    revision: Arc<AtomicU64>,
    failing_puts: Arc<AtomicUsize>,
    refuse_bucket: Arc<AtomicBool>,
}

impl MockKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `count` puts fail with `PublishError::Put`.
    pub fn fail_next_puts(&self, count: usize) {
        self.failing_puts.store(count, Ordering::SeqCst);
    }

    /// `ensure_bucket` fails from now on.
    pub fn refuse_bucket(&self) {
        self.refuse_bucket.store(true, Ordering::SeqCst);
    }

    pub fn get_puts(&self) -> Vec<StoredValue> {
        self.puts.lock().unwrap().clone()
    }

    pub fn get_buckets(&self) -> Vec<String> {
        self.buckets.lock().unwrap().clone()
    }

    pub fn put_count(&self) -> usize {
        self.puts.lock().unwrap().len()
    }

    pub fn find_by_key(&self, key: &str) -> Vec<StoredValue> {
        self.puts
            .lock()
            .unwrap()
            .iter()
            .filter(|v| v.key == key)
            .cloned()
            .collect()
    }

    /// Parse the latest value under `key` as JSON
    pub fn get_last_json<T>(&self, key: &str) -> anyhow::Result<Option<T>>
    where
        T: for<'de> serde::Deserialize<'de>,
    {
        match self.find_by_key(key).last() {
            Some(value) => Ok(Some(serde_json::from_slice(&value.payload)?)),
            None => Ok(None),
        }
    }

    pub fn clear(&self) {
        self.puts.lock().unwrap().clear();
        self.buckets.lock().unwrap().clear();
    }
}

#[async_trait]
impl KeyValueStore for MockKvStore {
    async fn ensure_bucket(&self, name: &str) -> Result<Arc<dyn KeyValueBucket>, PublishError> {
        if self.refuse_bucket.load(Ordering::SeqCst) {
            return Err(PublishError::Bucket {
                bucket: name.to_string(),
                reason: "refused by mock".into(),
            });
        }
        self.buckets.lock().unwrap().push(name.to_string());
        tracing::info!("📦 [MOCK] bucket {} ready", name);
        Ok(Arc::new(MockBucket {
            name: name.to_string(),
            store: self.clone(),
        }))
    }
}

struct MockBucket {
    name: String,
    store: MockKvStore,
}

#[async_trait]
impl KeyValueBucket for MockBucket {
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<u64, PublishError> {
        let failing = self
            .store
            .failing_puts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            tracing::info!("❌ [MOCK] put {} rejected", key);
            return Err(PublishError::Put {
                key: key.to_string(),
                reason: "rejected by mock".into(),
            });
        }

        let revision = self.store.revision.fetch_add(1, Ordering::SeqCst) + 1;
        self.store.puts.lock().unwrap().push(StoredValue {
            bucket: self.name.clone(),
            key: key.to_string(),
            payload: value,
            revision,
        });
        tracing::info!("📤 [MOCK] Published to {}: revision {}", key, revision);
        Ok(revision)
    }
}
