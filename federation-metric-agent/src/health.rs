/*!
Santé de l'agent : suivi de la boucle + endpoints HTTP

- `/actuator/health/liveness`  toujours `ok` tant que le process répond
- `/actuator/health/readiness` `ready` une fois le bucket KV ouvert, 503 avant
- `/status`                    rapport JSON de la boucle de collecte
*/

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;

/// Aggregator loop states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Idle,
    Collecting,
    AwaitingTick,
    Publishing,
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoopReport {
    pub state: LoopState,
    pub uptime_seconds: u64,
    pub bucket_ready: bool,
    pub cycles_completed: u64,
    pub snapshots_published: u64,
    pub publish_failures: u64,
    pub last_revision: Option<u64>,
    pub last_published_at: Option<DateTime<Utc>>,
}

struct Inner {
    state: LoopState,
    bucket_ready: bool,
    cycles_completed: u64,
    snapshots_published: u64,
    publish_failures: u64,
    last_revision: Option<u64>,
    last_published_at: Option<DateTime<Utc>>,
}

/// Shared view of the aggregator's progress, cheap to clone.
#[derive(Clone)]
pub struct StatusTracker {
    start_time: Instant,
    inner: Arc<Mutex<Inner>>,
}

impl StatusTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            inner: Arc::new(Mutex::new(Inner {
                state: LoopState::Idle,
                bucket_ready: false,
                cycles_completed: 0,
                snapshots_published: 0,
                publish_failures: 0,
                last_revision: None,
                last_published_at: None,
            })),
        }
    }

    pub fn set_state(&self, state: LoopState) {
        self.inner.lock().state = state;
    }

    pub fn mark_bucket_ready(&self) {
        self.inner.lock().bucket_ready = true;
    }

    pub fn record_cycle(&self) {
        self.inner.lock().cycles_completed += 1;
    }

    pub fn record_publish(&self, revision: u64, at: DateTime<Utc>) {
        let mut inner = self.inner.lock();
        inner.snapshots_published += 1;
        inner.last_revision = Some(revision);
        inner.last_published_at = Some(at);
    }

    pub fn record_publish_failure(&self) {
        self.inner.lock().publish_failures += 1;
    }

    pub fn is_ready(&self) -> bool {
        self.inner.lock().bucket_ready
    }

    pub fn report(&self) -> LoopReport {
        let inner = self.inner.lock();
        LoopReport {
            state: inner.state,
            uptime_seconds: self.start_time.elapsed().as_secs(),
            bucket_ready: inner.bucket_ready,
            cycles_completed: inner.cycles_completed,
            snapshots_published: inner.snapshots_published,
            publish_failures: inner.publish_failures,
            last_revision: inner.last_revision,
            last_published_at: inner.last_published_at,
        }
    }
}

impl Default for StatusTracker {
    fn default() -> Self {
        Self::new()
    }
}

pub fn build_router(tracker: StatusTracker) -> Router {
    Router::new()
        .route("/actuator/health/liveness", get(liveness))
        .route("/actuator/health/readiness", get(readiness))
        .route("/status", get(status))
        .with_state(tracker)
}

/// Serve the health routes until `shutdown` resolves, then drain open
/// connections and return.
pub async fn serve<F>(listener: TcpListener, tracker: StatusTracker, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, build_router(tracker))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn liveness() -> &'static str {
    "ok"
}

async fn readiness(State(tracker): State<StatusTracker>) -> (StatusCode, &'static str) {
    if tracker.is_ready() {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    }
}

async fn status(State(tracker): State<StatusTracker>) -> Json<LoopReport> {
    Json(tracker.report())
}
