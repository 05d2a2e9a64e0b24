//! Commit snapshot model.
//!
//! A snapshot is the router's entire desired backend configuration at one
//! point in time: the frontends derived from admitted routes and the service
//! units carrying their backend endpoints. Snapshots are immutable once
//! built; the commit task only ever reads them.

use crate::state::RouterState;
use common::{EndpointAddress, ObjectKey, TlsTermination};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A service and its observed ready backends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceUnit {
    pub name: ObjectKey,
    /// Cluster-internal hostname of the service (`<name>.<namespace>.svc`).
    pub hostname: String,
    #[serde(default)]
    pub endpoints: Vec<EndpointAddress>,
}

/// One admitted route rendered for the backend: a host (plus optional path)
/// mapped onto weighted service units.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frontend {
    /// Stable identifier of the owning route (`<namespace>:<name>`).
    pub key: String,
    pub host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Whether the frontend serves the whole subdomain of `host`.
    #[serde(default)]
    pub wildcard: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub termination: Option<TlsTermination>,
    /// Service unit keys to traffic weight.
    #[serde(default)]
    pub services: BTreeMap<String, i32>,
    /// Preferred target port (name or number), if the route pins one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefer_port: Option<String>,
}

/// The full desired configuration handed to the commit backend. Map keys
/// give a deterministic rendering order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitSnapshot {
    pub service_units: BTreeMap<String, ServiceUnit>,
    pub frontends: BTreeMap<String, Frontend>,
}

/// Identifier of a route's frontend.
pub fn frontend_key(route: &ObjectKey) -> String {
    format!("{}:{}", route.namespace, route.name)
}

/// Identifier and cluster hostname of a service unit.
pub fn service_unit_key(service: &ObjectKey) -> String {
    format!("{}/{}", service.namespace, service.name)
}

pub fn service_unit_hostname(service: &ObjectKey) -> String {
    format!("{}.{}.svc", service.name, service.namespace)
}

/// Render the current ownership table into a snapshot. Hosts whose owning
/// route has vanished from the cache are skipped; claims for them are
/// cleaned up by the admission path, not here.
pub fn build_snapshot(state: &RouterState) -> CommitSnapshot {
    let mut snapshot = CommitSnapshot::default();

    for (host, claim) in state.claims() {
        let Some(route) = state.route(&claim.owner) else {
            continue;
        };

        let mut services = BTreeMap::new();
        for target in &route.spec.to {
            if target.weight == 0 {
                continue;
            }
            let svc = ObjectKey::new(claim.owner.namespace.clone(), target.name.clone());
            let unit_key = service_unit_key(&svc);
            services.insert(unit_key.clone(), target.weight);

            snapshot.service_units.entry(unit_key).or_insert_with(|| ServiceUnit {
                hostname: service_unit_hostname(&svc),
                endpoints: state
                    .endpoints(&svc)
                    .map(|set| set.addresses.clone())
                    .unwrap_or_default(),
                name: svc,
            });
        }

        let key = frontend_key(&claim.owner);
        snapshot.frontends.insert(
            key.clone(),
            Frontend {
                key,
                host: host.clone(),
                path: route.spec.path.clone(),
                wildcard: claim.wildcard,
                termination: route.spec.tls.as_ref().and_then(|t| t.termination),
                services,
                prefer_port: route.spec.port.clone(),
            },
        );
    }

    snapshot
}
