/*!
FEDERATION METRIC AGENT - Point d'entrée du binaire

RÔLE : Assemble config, sources (Vault, Karmada), clients Kubernetes, store NATS
et serveur de santé, puis lance la boucle de collecte.

USAGE :
- `federation-metric-agent`         boucle de collecte + publication
- `federation-metric-agent --once`  une seule collecte, snapshot JSON sur stdout

ARRÊT : SIGINT/SIGTERM arrêtent la boucle et laissent le serveur HTTP se vider.
Une erreur fatale (credentials, topologie, bucket) sort en code non nul.
*/

use anyhow::{Context, Result};
use chrono::Utc;
use federation_metric_agent::aggregator::{Aggregator, AggregatorSettings};
use federation_metric_agent::config::AgentConfig;
use federation_metric_agent::health::{self, StatusTracker};
use federation_metric_agent::kube::KubeClientFactory;
use federation_metric_agent::publisher::{KeyValueBucket, KeyValueStore, NatsStore, PublishError};
use federation_metric_agent::sources::{KarmadaClient, VaultClient};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("federation_metric_agent=info")),
        )
        .init();

    let once = std::env::args().skip(1).any(|arg| arg == "--once");

    let config = AgentConfig::load().await.context("Failed to load configuration")?;
    info!(
        "🛰️ Federation Metric Agent v{} starting (host cluster {})",
        env!("CARGO_PKG_VERSION"),
        config.host_cluster_name
    );

    let request_timeout = config.probe_timeout();
    let credentials = Arc::new(
        VaultClient::new(config.vault(), request_timeout).context("Failed to build Vault client")?,
    );
    let topology = Arc::new(
        KarmadaClient::new(&config.karmada_api, &config.karmada_token, request_timeout)
            .context("Failed to build Karmada client")?,
    );
    let clients = Arc::new(KubeClientFactory::new(request_timeout));
    let settings = AggregatorSettings::from_config(&config);

    if once {
        let store: Arc<dyn KeyValueStore> = Arc::new(OfflineStore);
        let aggregator = Aggregator::new(credentials, topology, clients, store, settings);
        let snapshot = aggregator.collect().await?.finalize(Utc::now());
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    let store = NatsStore::connect(&config.nats()).await.context("Failed to connect to NATS")?;
    let tracker = StatusTracker::new();
    let aggregator =
        Aggregator::new(credentials, topology, clients, Arc::new(store), settings).with_tracker(tracker.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("🛑 Shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.health_port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind health endpoint on {}", addr))?;
    info!("🩺 Health endpoints on http://{}", addr);
    let mut server_shutdown = shutdown_rx.clone();
    let server = tokio::spawn(async move {
        let stopped = async move {
            let _ = server_shutdown.wait_for(|stop| *stop).await;
        };
        if let Err(e) = health::serve(listener, tracker, stopped).await {
            error!("Health server failed: {}", e);
        }
    });

    let mut loop_shutdown = shutdown_rx;
    let outcome = aggregator
        .run(async move {
            let _ = loop_shutdown.wait_for(|stop| *stop).await;
        })
        .await;

    if let Err(e) = outcome {
        server.abort();
        return Err(e).context("Collection loop stopped");
    }

    // the signal already reached the server; let it drain
    let _ = server.await;
    info!("👋 Federation Metric Agent stopped");
    Ok(())
}

/// Stand-in store for `--once`, which never publishes.
struct OfflineStore;

#[async_trait::async_trait]
impl KeyValueStore for OfflineStore {
    async fn ensure_bucket(&self, name: &str) -> Result<Arc<dyn KeyValueBucket>, PublishError> {
        Err(PublishError::Bucket {
            bucket: name.to_string(),
            reason: "offline mode".into(),
        })
    }
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                error!("SIGTERM handler unavailable: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
