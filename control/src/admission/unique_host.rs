//! Exclusive host ownership.

use super::{Stage, Verdict, REASON_HOST_ALREADY_CLAIMED};
use crate::config::RouterConfig;
use crate::state::{claim_precedes, HostClaim, RouterState};
use common::{route_created, route_key, Route, WildcardPolicy};
use tracing::info;

/// Resolves the route's host (synthesizing one when the spec leaves it
/// empty) and enforces that exactly one route owns each host. Conflicts are
/// settled by namespace ownership first, then by route age.
pub struct UniqueHostAdmitter {
    base_domain: String,
    namespace_ownership_check: bool,
}

impl UniqueHostAdmitter {
    pub fn new(config: &RouterConfig) -> Self {
        Self {
            base_domain: config.base_domain.clone(),
            namespace_ownership_check: config.namespace_ownership_check,
        }
    }

    /// Deterministic default host for a route without one.
    fn synthesize_host(&self, route: &Route) -> String {
        let key = route_key(route);
        format!("{}-{}.{}", key.name, key.namespace, self.base_domain)
    }
}

impl Stage for UniqueHostAdmitter {
    fn name(&self) -> &'static str {
        "unique-host"
    }

    fn evaluate(&self, route: &Route, state: &mut RouterState, prior: Verdict) -> Verdict {
        let key = route_key(route);
        let host = match prior.host() {
            Some(h) if !h.is_empty() => h.to_string(),
            _ => self.synthesize_host(route),
        };

        let claim = HostClaim {
            owner: key.clone(),
            created: route_created(route),
            wildcard: route.spec.wildcard_policy == WildcardPolicy::Subdomain,
        };

        match state.host_claim(&host).cloned() {
            None => {
                state.claim_host(&host, claim);
            }
            Some(existing) if existing.owner == key => {
                // Same route re-evaluated. Refresh the claim in case the
                // timestamp or wildcard policy changed.
                state.claim_host(&host, claim);
            }
            Some(existing) => {
                let existing_owner = existing.owner;
                let existing_created = existing.created;

                if self.namespace_ownership_check && existing_owner.namespace != key.namespace {
                    // A namespace keeps the hosts it owns; age does not let
                    // another namespace take one over.
                    state.record_contender(&host, key);
                    return Verdict::rejected(
                        REASON_HOST_ALREADY_CLAIMED,
                        format!(
                            "host {} is claimed by route {} in another namespace",
                            host, existing_owner
                        ),
                    );
                }

                if claim_precedes(&claim.created, &key, &existing_created, &existing_owner) {
                    // The candidate is older: it displaces the current owner,
                    // which must be re-evaluated (and will be rejected).
                    info!(
                        host = %host,
                        winner = %key,
                        displaced = %existing_owner,
                        "Host ownership transferred to older route"
                    );
                    state.claim_host(&host, claim);
                    state.push_requeue(existing_owner);
                } else {
                    state.record_contender(&host, key);
                    return Verdict::rejected(
                        REASON_HOST_ALREADY_CLAIMED,
                        format!("host {} is claimed by route {}", host, existing_owner),
                    );
                }
            }
        }

        // A route owns at most one host. If its spec.host changed, free the
        // old one for whoever is waiting on it.
        let freed = state.release_claims_except(&key, &host);
        state.push_requeues(freed);

        Verdict::admitted(host)
    }
}
