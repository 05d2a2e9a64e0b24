//! Namespace watcher.
//!
//! Only deletions matter: when a namespace goes away the controller tears
//! down every route, claim, and endpoint set that belonged to it.

use crate::controller::ResourceEvent;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Namespace;
use kube::runtime::watcher;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::{api::Api, Client, ResourceExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub async fn watch_namespaces(
    client: Client,
    tx: mpsc::Sender<ResourceEvent>,
) -> anyhow::Result<()> {
    let api: Api<Namespace> = Api::all(client);
    let watcher = watcher(api, WatcherConfig::default());

    futures::pin_mut!(watcher);

    info!("Starting namespace watcher");

    while let Some(event) = watcher.next().await {
        match event {
            Ok(watcher::Event::Delete(namespace)) => {
                let name = namespace.name_any();
                info!(namespace = %name, "Namespace deleted");
                if tx.send(ResourceEvent::NamespaceDeleted(name)).await.is_err() {
                    break;
                }
            }
            Ok(watcher::Event::Apply(_)) | Ok(watcher::Event::InitApply(_)) => {}
            Ok(watcher::Event::Init) => {
                debug!("Namespace watcher initializing");
            }
            Ok(watcher::Event::InitDone) => {
                info!("Namespace watcher initial sync complete");
            }
            Err(e) => {
                warn!("Namespace watcher error: {}", e);
            }
        }
    }

    Ok(())
}
