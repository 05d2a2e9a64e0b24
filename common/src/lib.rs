//! Shared API model for the rudder router controller.
//!
//! Defines the `Route` custom resource (`routes.rudder.io/v1`), the reduced
//! endpoint model the controller consumes, and the object keys used to index
//! both. The control plane crate builds its admission and commit state on top
//! of these types.

pub mod validate;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Route custom resource: a desired hostname-to-service routing rule with
/// optional TLS termination and path.
///
/// The controller never creates or deletes Routes; it only writes
/// `status.ingress` entries recording its admission verdict.
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "rudder.io",
    version = "v1",
    kind = "Route",
    status = "RouteStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct RouteSpec {
    /// Desired host. Empty means the controller synthesizes a deterministic
    /// default of the form `<name>-<namespace>.<base-domain>`.
    #[serde(default)]
    pub host: String,

    /// Optional path prefix. Only valid for non-passthrough routes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Whether this route claims a whole subdomain (`*.<domain-of-host>`).
    #[serde(default)]
    pub wildcard_policy: WildcardPolicy,

    /// Weighted service backends. The first entry is the primary backend.
    #[serde(default)]
    pub to: Vec<RouteTargetRef>,

    /// Preferred target port (name or number) on the backing service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,

    /// TLS termination configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsConfig>,
}

/// Wildcard policy for a route host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum WildcardPolicy {
    /// The route claims exactly its host.
    #[default]
    None,
    /// The route claims `*.<domain-of-host>`.
    Subdomain,
}

/// Weighted reference to a backing service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RouteTargetRef {
    /// Service name in the route's namespace.
    pub name: String,

    /// Share of traffic relative to the other targets (0 disables).
    #[serde(default = "default_weight")]
    pub weight: i32,
}

fn default_weight() -> i32 {
    100
}

/// TLS termination mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum TlsTermination {
    /// TLS terminates at the router; plain HTTP to the backend.
    Edge,
    /// TLS passes through to the backend untouched.
    Passthrough,
    /// TLS terminates at the router and is re-established to the backend.
    Reencrypt,
}

/// TLS configuration for a route. Certificate material is carried inline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TlsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub termination: Option<TlsTermination>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_certificate: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_ca_certificate: Option<String>,
}

impl TlsConfig {
    /// Whether any edge certificate material (cert, key, or CA) is present.
    pub fn has_edge_material(&self) -> bool {
        self.certificate.as_deref().is_some_and(|s| !s.is_empty())
            || self.key.as_deref().is_some_and(|s| !s.is_empty())
            || self.ca_certificate.as_deref().is_some_and(|s| !s.is_empty())
    }
}

/// Route status: one ingress entry per router instance that has evaluated
/// the route.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RouteStatus {
    #[serde(default)]
    pub ingress: Vec<RouteIngress>,
}

impl RouteStatus {
    /// The ingress entry written by the named router instance, if any.
    pub fn entry_for(&self, router_name: &str) -> Option<&RouteIngress> {
        self.ingress.iter().find(|i| i.router_name == router_name)
    }
}

/// Per-router admission record within a route's status.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RouteIngress {
    /// Name of the router instance that wrote this entry.
    pub router_name: String,

    /// The host the route was evaluated against (resolved host on admission).
    #[serde(default)]
    pub host: String,

    /// Externally reachable hostname of the router instance itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub router_canonical_hostname: Option<String>,

    #[serde(default)]
    pub conditions: Vec<RouteIngressCondition>,
}

impl RouteIngress {
    /// The `Admitted` condition, if present.
    pub fn admitted_condition(&self) -> Option<&RouteIngressCondition> {
        self.conditions.iter().find(|c| c.r#type == CONDITION_ADMITTED)
    }

    /// Whether this entry records a positive admission verdict.
    pub fn is_admitted(&self) -> bool {
        self.admitted_condition()
            .is_some_and(|c| c.status == CONDITION_TRUE)
    }
}

/// Condition type for the admission verdict.
pub const CONDITION_ADMITTED: &str = "Admitted";
/// Condition status values.
pub const CONDITION_TRUE: &str = "True";
pub const CONDITION_FALSE: &str = "False";

/// A single condition on a route ingress entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RouteIngressCondition {
    pub r#type: String,

    /// "True" or "False".
    pub status: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// RFC3339 timestamp of the last verdict change. Ignored when diffing
    /// entries so resyncs do not churn the API.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

// =============================================================================
// Object keys
// =============================================================================

/// Namespaced object key: `(namespace, name)`.
///
/// Used for both routes and services; `Ord` gives the deterministic lexical
/// tie-break for host ownership.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Identity key of a route object. Routes without a namespace fall back to
/// `default`, matching the API server's behavior for namespaced resources.
pub fn route_key(route: &Route) -> ObjectKey {
    ObjectKey::new(
        route
            .metadata
            .namespace
            .clone()
            .unwrap_or_else(|| "default".to_string()),
        route.metadata.name.clone().unwrap_or_default(),
    )
}

/// Creation timestamp of a route, used as the ownership tie-break.
pub fn route_created(route: &Route) -> Option<Time> {
    route.metadata.creation_timestamp.clone()
}

// =============================================================================
// Endpoints
// =============================================================================

/// A single ready backend address for a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointAddress {
    pub ip: String,
    pub port: u16,
    /// Named port this address was observed under, if the service names its
    /// ports.
    pub port_name: Option<String>,
}

/// The observed backend set of one service: the flattened, ordered list of
/// ready `(ip, port)` pairs across all subsets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointSet {
    pub addresses: Vec<EndpointAddress>,
}

impl EndpointSet {
    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    /// Addresses matching a preferred port name or number. An empty
    /// preference returns everything.
    pub fn addresses_for_port(&self, prefer_port: Option<&str>) -> Vec<EndpointAddress> {
        match prefer_port {
            None | Some("") => self.addresses.clone(),
            Some(port) => self
                .addresses
                .iter()
                .filter(|a| a.port_name.as_deref() == Some(port) || a.port.to_string() == port)
                .cloned()
                .collect(),
        }
    }
}
