//! Endpoints watcher.
//!
//! Flattens core Endpoints objects into the reduced `EndpointSet` model the
//! controller consumes: only ready addresses, one entry per address/port
//! pair, in a deterministic order.

use crate::controller::ResourceEvent;
use common::{EndpointAddress, EndpointSet, ObjectKey};
use futures::StreamExt;
use k8s_openapi::api::core::v1::Endpoints;
use kube::runtime::watcher;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::{api::Api, Client, ResourceExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Watch Endpoints across all namespaces and forward the flattened sets to
/// the controller.
pub async fn watch_endpoints(
    client: Client,
    tx: mpsc::Sender<ResourceEvent>,
) -> anyhow::Result<()> {
    let api: Api<Endpoints> = Api::all(client);
    let watcher = watcher(api, WatcherConfig::default());

    futures::pin_mut!(watcher);

    info!("Starting endpoints watcher");

    while let Some(event) = watcher.next().await {
        match event {
            Ok(watcher::Event::Apply(endpoints)) | Ok(watcher::Event::InitApply(endpoints)) => {
                let service = service_key(&endpoints);
                let set = flatten_endpoints(&endpoints);
                debug!(service = %service, addresses = set.addresses.len(), "Endpoints applied");
                if tx
                    .send(ResourceEvent::EndpointsUpserted {
                        service,
                        endpoints: set,
                    })
                    .await
                    .is_err()
                {
                    break;
                }
            }
            Ok(watcher::Event::Delete(endpoints)) => {
                let service = service_key(&endpoints);
                debug!(service = %service, "Endpoints deleted");
                if tx
                    .send(ResourceEvent::EndpointsDeleted { service })
                    .await
                    .is_err()
                {
                    break;
                }
            }
            Ok(watcher::Event::Init) => {
                debug!("Endpoints watcher initializing");
            }
            Ok(watcher::Event::InitDone) => {
                info!("Endpoints watcher initial sync complete");
            }
            Err(e) => {
                warn!("Endpoints watcher error: {}", e);
            }
        }
    }

    Ok(())
}

/// An Endpoints object is named after its service.
fn service_key(endpoints: &Endpoints) -> ObjectKey {
    ObjectKey::new(
        endpoints
            .namespace()
            .unwrap_or_else(|| "default".to_string()),
        endpoints.name_any(),
    )
}

/// Flatten subsets into ready `(ip, port)` pairs. Not-ready addresses are
/// excluded; the router only balances over backends that can serve.
pub fn flatten_endpoints(endpoints: &Endpoints) -> EndpointSet {
    let mut addresses = Vec::new();

    for subset in endpoints.subsets.iter().flatten() {
        let ips = subset.addresses.iter().flatten();
        for address in ips {
            for port in subset.ports.iter().flatten() {
                let Ok(port_number) = u16::try_from(port.port) else {
                    continue;
                };
                addresses.push(EndpointAddress {
                    ip: address.ip.clone(),
                    port: port_number,
                    port_name: port.name.clone(),
                });
            }
        }
    }

    addresses.sort_by(|a, b| (&a.ip, a.port).cmp(&(&b.ip, b.port)));
    EndpointSet { addresses }
}
