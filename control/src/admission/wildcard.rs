//! Wildcard policy admission.

use super::{
    Stage, Verdict, REASON_INVALID_CONFIGURATION, REASON_ROUTE_NOT_ADMITTED,
    REASON_SUBDOMAIN_ALREADY_CLAIMED,
};
use crate::config::RouterConfig;
use crate::state::{HostClaim, RouterState};
use common::validate::hostname_domain;
use common::{route_created, route_key, Route, WildcardPolicy};

/// Enforces the router's wildcard policy. Routes with `wildcardPolicy:
/// Subdomain` claim the whole domain of their host; a subdomain belongs to
/// one namespace at a time. Specific-host routes are unaffected.
pub struct WildcardAdmitter {
    allow_wildcard_routes: bool,
}

impl WildcardAdmitter {
    pub fn new(config: &RouterConfig) -> Self {
        Self {
            allow_wildcard_routes: config.allow_wildcard_routes,
        }
    }
}

impl Stage for WildcardAdmitter {
    fn name(&self) -> &'static str {
        "wildcard-policy"
    }

    fn evaluate(&self, route: &Route, state: &mut RouterState, prior: Verdict) -> Verdict {
        let key = route_key(route);
        let host = prior.host().unwrap_or_default().to_string();
        let is_wildcard = route.spec.wildcard_policy == WildcardPolicy::Subdomain;
        let asserted = if is_wildcard {
            hostname_domain(&host).map(str::to_string)
        } else {
            None
        };

        // An update may have dropped the Subdomain policy or moved the host
        // to a different domain. Any subdomain the route no longer asserts
        // goes back to the contenders waiting on it.
        let freed = state.release_subdomain_claims_except(&key, asserted.as_deref());
        state.push_requeues(freed);

        if !is_wildcard {
            return prior;
        }

        if !self.allow_wildcard_routes {
            return Verdict::rejected(
                REASON_ROUTE_NOT_ADMITTED,
                "wildcard routes are not allowed on this router",
            );
        }

        let domain = match asserted {
            Some(d) => d,
            None => {
                return Verdict::rejected(
                    REASON_INVALID_CONFIGURATION,
                    format!("host {} has no domain to claim a wildcard for", host),
                )
            }
        };

        match state.subdomain_claim(&domain).cloned() {
            None => {
                state.claim_subdomain(
                    &domain,
                    HostClaim {
                        owner: key,
                        created: route_created(route),
                        wildcard: true,
                    },
                );
            }
            Some(existing) if existing.owner == key => {}
            Some(existing) if existing.owner.namespace == key.namespace => {
                // The namespace already owns the subdomain; additional
                // wildcard routes from it are fine.
            }
            Some(existing) => {
                let message = format!(
                    "subdomain {} is claimed by route {} in another namespace",
                    domain, existing.owner
                );
                state.record_contender(&format!("*.{}", domain), key);
                return Verdict::rejected(REASON_SUBDOMAIN_ALREADY_CLAIMED, message);
            }
        }

        prior
    }
}
