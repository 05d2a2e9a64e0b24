use anyhow::Result;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use control::admission::status::{KubeStatusSink, StatusAdmitter};
use control::apis::endpoints_watcher::watch_endpoints;
use control::apis::namespace_watcher::watch_namespaces;
use control::apis::route_watcher::watch_routes;
use control::commit::template::StateFileBackend;
use control::commit::CommitCoordinator;
use control::config::RouterConfig;
use control::controller::Controller;

/// Rudder route controller: admission, status write-back, and debounced
/// commits to the proxy backend.
#[tokio::main]
async fn main() -> Result<()> {
    // Initialize rustls crypto provider (needed for Kubernetes TLS client)
    rustls::crypto::ring::default_provider()
        .install_default()
        .ok(); // Ignore error if already installed

    tracing_subscriber::fmt::init();

    let config = RouterConfig::from_env();
    info!(
        router_name = %config.router_name,
        base_domain = %config.base_domain,
        wildcard_routes = config.allow_wildcard_routes,
        namespace_ownership = config.namespace_ownership_check,
        "Starting rudder router controller"
    );

    let client = kube::Client::try_default().await?;

    let (event_tx, event_rx) = mpsc::channel(1024);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let coordinator = Arc::new(CommitCoordinator::new(
        config.reload_interval(),
        config.commit_timeout(),
        config.max_commit_backoff(),
    ));

    // Commit loop against the state file backend.
    let commit_handle = {
        let coordinator = coordinator.clone();
        let backend = StateFileBackend::new(&config);
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move { coordinator.run(backend, shutdown).await })
    };

    // Watchers feeding the controller channel.
    let mut watcher_handles = vec![];
    for (name, task) in [
        (
            "route",
            tokio::spawn(watch_routes(client.clone(), event_tx.clone())),
        ),
        (
            "endpoints",
            tokio::spawn(watch_endpoints(client.clone(), event_tx.clone())),
        ),
        (
            "namespace",
            tokio::spawn(watch_namespaces(client.clone(), event_tx.clone())),
        ),
    ] {
        watcher_handles.push((name, task));
    }
    drop(event_tx);

    let status = StatusAdmitter::new(KubeStatusSink::new(client), &config);
    let controller = Controller::new(&config, status, coordinator);
    let controller_handle = {
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move { controller.run(event_rx, shutdown).await })
    };

    signal::ctrl_c().await?;
    info!("Shutdown signal received");

    if shutdown_tx.send(true).is_err() {
        warn!("All tasks already stopped");
    }

    if let Err(e) = controller_handle.await {
        error!("Controller task failed: {}", e);
    }
    if let Err(e) = commit_handle.await {
        error!("Commit task failed: {}", e);
    }
    for (name, handle) in watcher_handles {
        handle.abort();
        info!(watcher = name, "Watcher stopped");
    }

    Ok(())
}
