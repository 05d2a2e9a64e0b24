//! Route admission pipeline.
//!
//! Admission is an ordered chain of stages. Each stage sees the verdict of
//! the previous one and may refine the resolved host, reject the route, or
//! mutate the ownership tables. The first rejection short-circuits the rest
//! of the chain, and a rejected route owns nothing: any claims it held are
//! released and the routes waiting on them come back for re-evaluation.

pub mod status;
pub mod unique_host;
pub mod validator;
pub mod wildcard;

use crate::config::RouterConfig;
use crate::state::RouterState;
use common::{route_key, ObjectKey, Route};
use tracing::debug;

use self::unique_host::UniqueHostAdmitter;
use self::validator::ExtendedValidator;
use self::wildcard::WildcardAdmitter;

/// Rejection reason: the route spec itself is malformed.
pub const REASON_INVALID_CONFIGURATION: &str = "InvalidConfiguration";
/// Rejection reason: another route owns the host.
pub const REASON_HOST_ALREADY_CLAIMED: &str = "HostAlreadyClaimed";
/// Rejection reason: wildcard routes are not allowed by policy.
pub const REASON_ROUTE_NOT_ADMITTED: &str = "RouteNotAdmitted";
/// Rejection reason: another namespace owns the subdomain.
pub const REASON_SUBDOMAIN_ALREADY_CLAIMED: &str = "SubdomainAlreadyClaimed";

/// Outcome of evaluating a route against one stage, or the whole chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// The route is (so far) admitted for the resolved host.
    Admitted { host: String },
    /// The route is rejected with a machine-readable reason and a
    /// human-readable message.
    Rejected { reason: String, message: String },
}

impl Verdict {
    pub fn admitted(host: impl Into<String>) -> Self {
        Verdict::Admitted { host: host.into() }
    }

    pub fn rejected(reason: &str, message: impl Into<String>) -> Self {
        Verdict::Rejected {
            reason: reason.to_string(),
            message: message.into(),
        }
    }

    pub fn is_admitted(&self) -> bool {
        matches!(self, Verdict::Admitted { .. })
    }

    /// The resolved host, for admitted verdicts.
    pub fn host(&self) -> Option<&str> {
        match self {
            Verdict::Admitted { host } => Some(host),
            Verdict::Rejected { .. } => None,
        }
    }
}

/// One step of the admission pipeline.
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    /// Evaluate the route given the verdict of the previous stage. Only
    /// called while `prior` is an admission.
    fn evaluate(&self, route: &Route, state: &mut RouterState, prior: Verdict) -> Verdict;
}

/// Result of running the full chain over one route.
#[derive(Debug)]
pub struct Admission {
    pub verdict: Verdict,
    /// Routes that must be re-evaluated because this decision changed the
    /// ownership tables under them.
    pub requeue: Vec<ObjectKey>,
}

/// The ordered admission chain: extended validation (when enabled), then
/// host ownership, then wildcard policy.
pub struct AdmissionChain {
    stages: Vec<Box<dyn Stage>>,
}

impl AdmissionChain {
    pub fn new(config: &RouterConfig) -> Self {
        let mut stages: Vec<Box<dyn Stage>> = Vec::new();
        if config.extended_validation {
            stages.push(Box::new(ExtendedValidator));
        }
        stages.push(Box::new(UniqueHostAdmitter::new(config)));
        stages.push(Box::new(WildcardAdmitter::new(config)));
        Self { stages }
    }

    /// Run the chain over one route and settle the ownership tables.
    pub fn evaluate(&self, route: &Route, state: &mut RouterState) -> Admission {
        let key = route_key(route);
        let mut verdict = Verdict::admitted(route.spec.host.clone());

        // Drop stale contender records from earlier evaluations; stages
        // re-record interest in whatever host the route wants now.
        state.remove_contender_everywhere(&key);

        for stage in &self.stages {
            verdict = stage.evaluate(route, state, verdict);
            if let Verdict::Rejected { reason, message } = &verdict {
                debug!(
                    route = %key,
                    stage = stage.name(),
                    reason,
                    message,
                    "Route rejected"
                );
                break;
            }
        }

        if !verdict.is_admitted() {
            // A rejected route owns nothing. Releasing its claims may free
            // hosts other routes are waiting on.
            let freed = state.release_claims_for(&key);
            state.push_requeues(freed);
        }

        let mut requeue = state.take_requeues();
        requeue.retain(|k| *k != key);
        Admission { verdict, requeue }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use common::{RouteSpec, RouteTargetRef, WildcardPolicy};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

    fn route(ns: &str, name: &str, host: &str, created_secs: i64) -> Route {
        let mut route = Route::new(
            name,
            RouteSpec {
                host: host.to_string(),
                to: vec![RouteTargetRef {
                    name: "svc".to_string(),
                    weight: 100,
                }],
                ..Default::default()
            },
        );
        route.metadata.namespace = Some(ns.to_string());
        route.metadata.creation_timestamp =
            Some(Time(Utc.timestamp_opt(created_secs, 0).unwrap()));
        route
    }

    #[test]
    fn test_wildcard_rejection_rolls_back_host_claim() {
        // Wildcard routes are denied by default, but the unique host stage
        // runs first and claims the host. The rejection must undo that.
        let chain = AdmissionChain::new(&RouterConfig::default());
        let mut state = RouterState::new();
        let mut wild = route("web", "star", "app.apps.example.com", 100);
        wild.spec.wildcard_policy = WildcardPolicy::Subdomain;

        let admission = chain.evaluate(&wild, &mut state);

        assert!(!admission.verdict.is_admitted());
        assert!(
            state.host_claim("app.apps.example.com").is_none(),
            "rejected route must not keep its host claim"
        );
    }

    #[test]
    fn test_update_to_invalid_releases_claims_and_requeues_contender() {
        let chain = AdmissionChain::new(&RouterConfig::default());
        let mut state = RouterState::new();
        let good = route("web", "frontend", "app.example.com", 100);
        let waiting = route("web", "waiting", "app.example.com", 200);

        assert!(chain.evaluate(&good, &mut state).verdict.is_admitted());
        assert!(!chain.evaluate(&waiting, &mut state).verdict.is_admitted());

        // The owner's spec turns invalid; its claim frees the contender.
        let mut broken = good.clone();
        broken.spec.to.clear();
        let admission = chain.evaluate(&broken, &mut state);

        assert!(!admission.verdict.is_admitted());
        assert_eq!(admission.requeue, vec![route_key(&waiting)]);
        assert!(state.host_claim("app.example.com").is_none());
    }

    #[test]
    fn test_displacement_surfaces_requeue() {
        let chain = AdmissionChain::new(&RouterConfig::default());
        let mut state = RouterState::new();
        let younger = route("web", "younger", "app.example.com", 200);
        let older = route("web", "older", "app.example.com", 100);

        assert!(chain.evaluate(&younger, &mut state).verdict.is_admitted());
        let admission = chain.evaluate(&older, &mut state);

        assert!(admission.verdict.is_admitted());
        assert_eq!(admission.requeue, vec![route_key(&younger)]);
    }

    #[test]
    fn test_dropped_wildcard_policy_frees_subdomain_for_other_namespace() {
        let config = RouterConfig {
            allow_wildcard_routes: true,
            ..Default::default()
        };
        let chain = AdmissionChain::new(&config);
        let mut state = RouterState::new();
        let mut owner = route("web", "star", "app.apps.example.com", 100);
        owner.spec.wildcard_policy = WildcardPolicy::Subdomain;
        let mut foreign = route("other", "hopeful", "api.apps.example.com", 200);
        foreign.spec.wildcard_policy = WildcardPolicy::Subdomain;

        assert!(chain.evaluate(&owner, &mut state).verdict.is_admitted());
        assert!(!chain.evaluate(&foreign, &mut state).verdict.is_admitted());

        // The owner narrows to a plain route; its subdomain claim must not
        // keep blocking the other namespace.
        let mut narrowed = owner.clone();
        narrowed.spec.wildcard_policy = WildcardPolicy::None;
        let admission = chain.evaluate(&narrowed, &mut state);

        assert!(admission.verdict.is_admitted());
        assert_eq!(admission.requeue, vec![route_key(&foreign)]);
        assert!(state.subdomain_claim("apps.example.com").is_none());
        assert!(chain.evaluate(&foreign, &mut state).verdict.is_admitted());
    }

    #[test]
    fn test_validation_disabled_skips_structural_checks() {
        let config = RouterConfig {
            extended_validation: false,
            ..Default::default()
        };
        let chain = AdmissionChain::new(&config);
        let mut state = RouterState::new();
        let mut no_backends = route("web", "frontend", "app.example.com", 100);
        no_backends.spec.to.clear();

        assert!(chain.evaluate(&no_backends, &mut state).verdict.is_admitted());
    }
}
