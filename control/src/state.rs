//! In-memory router state.
//!
//! `RouterState` is the single source of truth the admission pipeline and the
//! commit snapshot builder read from: the cached route and endpoint objects,
//! the host ownership table, and the contenders waiting on each host. It is
//! owned by the controller task; nothing else mutates it.

use common::{route_key, EndpointSet, ObjectKey, Route, RouteIngress, RouteStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use std::collections::{BTreeMap, BTreeSet};

/// An exclusive claim on a host (or, for wildcard routes, on a subdomain).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostClaim {
    /// Route that owns the claim.
    pub owner: ObjectKey,
    /// Owner's creation timestamp, kept for the age tie-break.
    pub created: Option<Time>,
    /// Whether the owner claims the whole subdomain of the host.
    pub wildcard: bool,
}

/// Ownership precedence between two routes: older creation timestamps win,
/// missing timestamps lose to present ones, and exact ties fall back to the
/// lexical order of the object keys.
pub fn claim_precedes(
    a_created: &Option<Time>,
    a_key: &ObjectKey,
    b_created: &Option<Time>,
    b_key: &ObjectKey,
) -> bool {
    match (a_created, b_created) {
        (Some(a), Some(b)) if a.0 != b.0 => a.0 < b.0,
        (Some(_), None) => true,
        (None, Some(_)) => false,
        _ => a_key < b_key,
    }
}

/// All state the controller tracks between events.
#[derive(Debug, Default)]
pub struct RouterState {
    /// Cached route objects, keyed by namespace/name.
    routes: BTreeMap<ObjectKey, Route>,
    /// Observed ready endpoints per service.
    endpoints: BTreeMap<ObjectKey, EndpointSet>,
    /// Exclusive host ownership: resolved host to the claim on it.
    claims: BTreeMap<String, HostClaim>,
    /// Subdomain ownership for wildcard routes: domain to the claim on it.
    subdomain_claims: BTreeMap<String, HostClaim>,
    /// Routes that lost a host and are waiting for the owner to release it.
    contenders: BTreeMap<String, BTreeSet<ObjectKey>>,
    /// Routes queued for re-evaluation as a side effect of an admission
    /// decision (displacement, released claims).
    requeues: Vec<ObjectKey>,
}

impl RouterState {
    pub fn new() -> Self {
        Self::default()
    }

    // -------------------------------------------------------------------------
    // Routes
    // -------------------------------------------------------------------------

    /// Cache a route object, returning the previously cached version.
    pub fn upsert_route(&mut self, route: Route) -> Option<Route> {
        self.routes.insert(route_key(&route), route)
    }

    /// Drop a route from the cache. Claims are released separately via
    /// [`release_claims_for`](Self::release_claims_for).
    pub fn delete_route(&mut self, key: &ObjectKey) -> Option<Route> {
        self.routes.remove(key)
    }

    pub fn route(&self, key: &ObjectKey) -> Option<&Route> {
        self.routes.get(key)
    }

    pub fn route_keys(&self) -> Vec<ObjectKey> {
        self.routes.keys().cloned().collect()
    }

    pub fn routes(&self) -> impl Iterator<Item = (&ObjectKey, &Route)> {
        self.routes.iter()
    }

    /// Reflect a written status entry into the cached route so later diffs
    /// compare against what the API server now holds.
    pub fn apply_route_status(&mut self, key: &ObjectKey, router_name: &str, entry: RouteIngress) {
        if let Some(route) = self.routes.get_mut(key) {
            let status = route.status.get_or_insert_with(RouteStatus::default);
            match status.ingress.iter_mut().find(|i| i.router_name == router_name) {
                Some(existing) => *existing = entry,
                None => status.ingress.push(entry),
            }
        }
    }

    // -------------------------------------------------------------------------
    // Endpoints
    // -------------------------------------------------------------------------

    /// Record the endpoint set for a service. Returns false when the update
    /// matches what is already cached, letting the caller skip a commit.
    pub fn upsert_endpoints(&mut self, service: ObjectKey, endpoints: EndpointSet) -> bool {
        match self.endpoints.get(&service) {
            Some(existing) if *existing == endpoints => false,
            _ => {
                self.endpoints.insert(service, endpoints);
                true
            }
        }
    }

    /// Drop the endpoint set for a service. Returns false when nothing was
    /// cached for it.
    pub fn delete_endpoints(&mut self, service: &ObjectKey) -> bool {
        self.endpoints.remove(service).is_some()
    }

    pub fn endpoints(&self, service: &ObjectKey) -> Option<&EndpointSet> {
        self.endpoints.get(service)
    }

    // -------------------------------------------------------------------------
    // Host claims
    // -------------------------------------------------------------------------

    /// The claim on a host, if any.
    pub fn host_claim(&self, host: &str) -> Option<&HostClaim> {
        self.claims.get(host)
    }

    /// The claim on a subdomain, if any.
    pub fn subdomain_claim(&self, domain: &str) -> Option<&HostClaim> {
        self.subdomain_claims.get(domain)
    }

    /// Record or transfer the claim on a host.
    pub fn claim_host(&mut self, host: &str, claim: HostClaim) {
        self.claims.insert(host.to_string(), claim);
    }

    /// Record or transfer the claim on a subdomain.
    pub fn claim_subdomain(&mut self, domain: &str, claim: HostClaim) {
        self.subdomain_claims.insert(domain.to_string(), claim);
    }

    /// Hosts currently claimed, with their claims. Ordered by host.
    pub fn claims(&self) -> impl Iterator<Item = (&String, &HostClaim)> {
        self.claims.iter()
    }

    /// The hosts a route currently owns.
    pub fn hosts_owned_by(&self, key: &ObjectKey) -> Vec<String> {
        self.claims
            .iter()
            .filter(|(_, claim)| claim.owner == *key)
            .map(|(host, _)| host.clone())
            .collect()
    }

    /// Release every host and subdomain claim owned by a route, returning the
    /// contenders of the freed hosts so the caller can re-admit them.
    ///
    /// Contenders waiting on a subdomain are tracked under the synthetic host
    /// `*.<domain>` and come back when the subdomain claim is freed.
    pub fn release_claims_for(&mut self, key: &ObjectKey) -> Vec<ObjectKey> {
        let mut freed: Vec<String> = self.hosts_owned_by(key);
        for host in &freed {
            self.claims.remove(host);
        }

        let freed_domains: Vec<String> = self
            .subdomain_claims
            .iter()
            .filter(|(_, claim)| claim.owner == *key)
            .map(|(domain, _)| domain.clone())
            .collect();
        for domain in &freed_domains {
            self.subdomain_claims.remove(domain);
            freed.push(format!("*.{}", domain));
        }

        let mut requeue = Vec::new();
        for host in &freed {
            if let Some(waiting) = self.contenders.remove(host) {
                requeue.extend(waiting);
            }
        }
        requeue.sort();
        requeue.dedup();
        requeue
    }

    /// Release every claim owned by a route except the one on `keep_host`.
    /// Used after a host change so the stale host becomes available again.
    pub fn release_claims_except(&mut self, key: &ObjectKey, keep_host: &str) -> Vec<ObjectKey> {
        let freed: Vec<String> = self
            .claims
            .iter()
            .filter(|(host, claim)| claim.owner == *key && host.as_str() != keep_host)
            .map(|(host, _)| host.clone())
            .collect();
        for host in &freed {
            self.claims.remove(host);
        }

        let mut requeue = Vec::new();
        for host in &freed {
            if let Some(waiting) = self.contenders.remove(host) {
                requeue.extend(waiting);
            }
        }
        requeue.sort();
        requeue.dedup();
        requeue
    }

    /// Release the subdomain claims a route no longer asserts, keeping at
    /// most the one on `keep_domain`. Contenders waiting under the synthetic
    /// `*.<domain>` hosts of the freed subdomains are returned for
    /// re-admission. Covers updates that drop the wildcard policy or move the
    /// host to a different domain.
    pub fn release_subdomain_claims_except(
        &mut self,
        key: &ObjectKey,
        keep_domain: Option<&str>,
    ) -> Vec<ObjectKey> {
        let freed: Vec<String> = self
            .subdomain_claims
            .iter()
            .filter(|(domain, claim)| {
                claim.owner == *key && keep_domain != Some(domain.as_str())
            })
            .map(|(domain, _)| domain.clone())
            .collect();

        let mut requeue = Vec::new();
        for domain in &freed {
            self.subdomain_claims.remove(domain);
            if let Some(waiting) = self.contenders.remove(&format!("*.{}", domain)) {
                requeue.extend(waiting);
            }
        }
        requeue.sort();
        requeue.dedup();
        requeue
    }

    // -------------------------------------------------------------------------
    // Contenders
    // -------------------------------------------------------------------------

    /// Remember that a route wants a host it could not claim.
    pub fn record_contender(&mut self, host: &str, key: ObjectKey) {
        self.contenders.entry(host.to_string()).or_default().insert(key);
    }

    /// Forget a route's interest in a host (it was admitted or deleted).
    pub fn remove_contender(&mut self, host: &str, key: &ObjectKey) {
        if let Some(waiting) = self.contenders.get_mut(host) {
            waiting.remove(key);
            if waiting.is_empty() {
                self.contenders.remove(host);
            }
        }
    }

    /// Drop a route from every contender list.
    pub fn remove_contender_everywhere(&mut self, key: &ObjectKey) {
        self.contenders.retain(|_, waiting| {
            waiting.remove(key);
            !waiting.is_empty()
        });
    }

    /// Contenders currently waiting on a host.
    pub fn contenders_for(&self, host: &str) -> Vec<ObjectKey> {
        self.contenders
            .get(host)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    // -------------------------------------------------------------------------
    // Requeues
    // -------------------------------------------------------------------------

    /// Queue a route for re-evaluation after the current one finishes.
    pub fn push_requeue(&mut self, key: ObjectKey) {
        self.requeues.push(key);
    }

    pub fn push_requeues(&mut self, keys: impl IntoIterator<Item = ObjectKey>) {
        self.requeues.extend(keys);
    }

    /// Drain the queued re-evaluations, deduplicated and in deterministic
    /// order.
    pub fn take_requeues(&mut self) -> Vec<ObjectKey> {
        let mut keys = std::mem::take(&mut self.requeues);
        keys.sort();
        keys.dedup();
        keys
    }

    // -------------------------------------------------------------------------
    // Namespace teardown
    // -------------------------------------------------------------------------

    /// Drop everything belonging to a deleted namespace: routes, endpoints,
    /// claims, and contender entries. Returns the contenders freed by the
    /// released claims so the caller can re-admit them.
    pub fn purge_namespace(&mut self, namespace: &str) -> Vec<ObjectKey> {
        let doomed: Vec<ObjectKey> = self
            .routes
            .keys()
            .filter(|k| k.namespace == namespace)
            .cloned()
            .collect();

        let mut requeue = Vec::new();
        for key in &doomed {
            self.routes.remove(key);
            self.remove_contender_everywhere(key);
            requeue.extend(self.release_claims_for(key));
        }
        self.endpoints.retain(|k, _| k.namespace != namespace);

        requeue.retain(|k| k.namespace != namespace);
        requeue.sort();
        requeue.dedup();
        requeue
    }
}
