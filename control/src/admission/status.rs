//! Route status write-back.
//!
//! After the chain settles a verdict, the `StatusAdmitter` reflects it into
//! the route's `status.ingress` entry for this router. Writes are skipped
//! when the recorded verdict already matches, and a lost optimistic
//! concurrency race is retried exactly once against a fresh copy.

use super::Verdict;
use crate::config::RouterConfig;
use crate::error::RouterError;
use crate::metrics;
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use common::{
    route_key, Route, RouteIngress, RouteIngressCondition, RouteStatus, CONDITION_ADMITTED,
    CONDITION_FALSE, CONDITION_TRUE,
};
use kube::api::{Api, PostParams};
use tracing::{debug, warn};

/// Where status writes go. Abstracted so the admitter can be driven against
/// a recording fake in tests.
#[async_trait]
pub trait StatusSink: Send + Sync {
    /// Fetch the current version of a route, or None if it no longer exists.
    async fn fetch(&self, namespace: &str, name: &str) -> Result<Option<Route>, kube::Error>;

    /// Replace the route's status subresource. The object's resourceVersion
    /// drives optimistic concurrency; a stale version yields a 409.
    async fn replace_status(&self, namespace: &str, route: &Route) -> Result<(), kube::Error>;
}

/// Sink backed by the API server's status subresource.
pub struct KubeStatusSink {
    client: kube::Client,
}

impl KubeStatusSink {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StatusSink for KubeStatusSink {
    async fn fetch(&self, namespace: &str, name: &str) -> Result<Option<Route>, kube::Error> {
        let api: Api<Route> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name).await
    }

    async fn replace_status(&self, namespace: &str, route: &Route) -> Result<(), kube::Error> {
        let api: Api<Route> = Api::namespaced(self.client.clone(), namespace);
        let name = route.metadata.name.as_deref().unwrap_or_default();
        let data = serde_json::to_vec(route).map_err(kube::Error::SerdeError)?;
        api.replace_status(name, &PostParams::default(), data).await?;
        Ok(())
    }
}

/// Writes admission verdicts into route status.
pub struct StatusAdmitter<S> {
    sink: S,
    router_name: String,
    canonical_hostname: Option<String>,
}

impl<S: StatusSink> StatusAdmitter<S> {
    pub fn new(sink: S, config: &RouterConfig) -> Self {
        Self {
            sink,
            router_name: config.router_name.clone(),
            canonical_hostname: config.router_canonical_hostname.clone(),
        }
    }

    /// Record a verdict in the route's status, returning the entry now in
    /// effect so the caller can reflect it into its cache. The in-memory
    /// decision stands regardless of whether the write succeeds.
    pub async fn record(
        &self,
        route: &Route,
        verdict: &Verdict,
    ) -> Result<RouteIngress, RouterError> {
        let key = route_key(route);
        let desired = self.ingress_entry(route, verdict);

        if let Some(current) = route.status.as_ref().and_then(|s| s.entry_for(&self.router_name)) {
            if entries_match(current, &desired) {
                debug!(route = %key, "Status already current, skipping write");
                metrics::record_status_write("skipped");
                return Ok(desired);
            }
        }

        let mut updated = route.clone();
        apply_entry(&mut updated, &self.router_name, desired.clone());

        match self.sink.replace_status(&key.namespace, &updated).await {
            Ok(()) => {
                metrics::record_status_write("written");
                Ok(desired)
            }
            Err(e) if is_conflict(&e) => {
                metrics::record_status_write("conflict");
                self.retry_on_conflict(&key.namespace, &key.name, desired).await
            }
            Err(e) => {
                metrics::record_status_write("error");
                Err(RouterError::Status(e))
            }
        }
    }

    #[cfg(test)]
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Re-fetch and retry exactly once after a 409. A route that disappeared
    /// in the meantime is dropped silently.
    async fn retry_on_conflict(
        &self,
        namespace: &str,
        name: &str,
        desired: RouteIngress,
    ) -> Result<RouteIngress, RouterError> {
        let Some(mut fresh) = self
            .sink
            .fetch(namespace, name)
            .await
            .map_err(RouterError::Status)?
        else {
            debug!(
                route = format!("{}/{}", namespace, name),
                "Route deleted during status write, dropping"
            );
            metrics::record_status_write("dropped");
            return Ok(desired);
        };

        if let Some(current) = fresh.status.as_ref().and_then(|s| s.entry_for(&self.router_name)) {
            if entries_match(current, &desired) {
                metrics::record_status_write("skipped");
                return Ok(desired);
            }
        }

        apply_entry(&mut fresh, &self.router_name, desired.clone());
        match self.sink.replace_status(namespace, &fresh).await {
            Ok(()) => {
                metrics::record_status_write("written");
                Ok(desired)
            }
            Err(e) => {
                warn!(
                    route = format!("{}/{}", namespace, name),
                    error = %e,
                    "Status write failed after conflict retry"
                );
                metrics::record_status_write("error");
                Err(RouterError::Status(e))
            }
        }
    }

    /// The ingress entry this router wants recorded for the verdict.
    fn ingress_entry(&self, route: &Route, verdict: &Verdict) -> RouteIngress {
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let condition = match verdict {
            Verdict::Admitted { .. } => RouteIngressCondition {
                r#type: CONDITION_ADMITTED.to_string(),
                status: CONDITION_TRUE.to_string(),
                reason: None,
                message: None,
                last_transition_time: Some(now),
            },
            Verdict::Rejected { reason, message } => RouteIngressCondition {
                r#type: CONDITION_ADMITTED.to_string(),
                status: CONDITION_FALSE.to_string(),
                reason: Some(reason.clone()),
                message: Some(message.clone()),
                last_transition_time: Some(now),
            },
        };

        RouteIngress {
            router_name: self.router_name.clone(),
            host: verdict.host().unwrap_or(&route.spec.host).to_string(),
            router_canonical_hostname: self.canonical_hostname.clone(),
            conditions: vec![condition],
        }
    }
}

/// Replace or append this router's entry in the route's status.
fn apply_entry(route: &mut Route, router_name: &str, entry: RouteIngress) {
    let status = route.status.get_or_insert_with(RouteStatus::default);
    match status.ingress.iter_mut().find(|i| i.router_name == router_name) {
        Some(existing) => *existing = entry,
        None => status.ingress.push(entry),
    }
}

/// Whether two ingress entries agree, ignoring transition timestamps so
/// resyncs do not churn the API.
fn entries_match(a: &RouteIngress, b: &RouteIngress) -> bool {
    let strip = |entry: &RouteIngress| {
        let mut e = entry.clone();
        for c in &mut e.conditions {
            c.last_transition_time = None;
        }
        e
    };
    strip(a) == strip(b)
}

fn is_conflict(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 409)
}
