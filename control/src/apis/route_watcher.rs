//! Route watcher.

use crate::controller::ResourceEvent;
use common::{route_key, Route};
use futures::StreamExt;
use kube::runtime::watcher;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::{api::Api, Client};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Watch Route objects across all namespaces and forward them to the
/// controller. Runs until the watch stream ends or the controller goes away.
pub async fn watch_routes(client: Client, tx: mpsc::Sender<ResourceEvent>) -> anyhow::Result<()> {
    let api: Api<Route> = Api::all(client);
    let watcher = watcher(api, WatcherConfig::default());

    futures::pin_mut!(watcher);

    info!("Starting route watcher");

    while let Some(event) = watcher.next().await {
        match event {
            Ok(watcher::Event::Apply(route)) | Ok(watcher::Event::InitApply(route)) => {
                debug!(route = %route_key(&route), "Route applied");
                if tx
                    .send(ResourceEvent::RouteUpserted(Box::new(route)))
                    .await
                    .is_err()
                {
                    break;
                }
            }
            Ok(watcher::Event::Delete(route)) => {
                debug!(route = %route_key(&route), "Route deleted");
                if tx
                    .send(ResourceEvent::RouteDeleted(Box::new(route)))
                    .await
                    .is_err()
                {
                    break;
                }
            }
            Ok(watcher::Event::Init) => {
                debug!("Route watcher initializing");
            }
            Ok(watcher::Event::InitDone) => {
                info!("Route watcher initial sync complete");
            }
            Err(e) => {
                warn!("Route watcher error: {}", e);
            }
        }
    }

    Ok(())
}
