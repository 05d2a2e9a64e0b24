//! Event loop tying watchers, admission, status, and commits together.
//!
//! A single controller task owns the `RouterState`. Watchers feed it
//! `ResourceEvent`s over a channel; every state-changing event re-runs
//! admission where needed, writes status, and stages a fresh snapshot for
//! the commit loop. Re-evaluations triggered by ownership changes are
//! processed inline on a local work list, never back through the channel.

use crate::admission::status::{StatusAdmitter, StatusSink};
use crate::admission::{AdmissionChain, Verdict};
use crate::commit::service_unit::build_snapshot;
use crate::commit::CommitCoordinator;
use crate::config::RouterConfig;
use crate::metrics;
use crate::state::RouterState;
use common::{route_key, EndpointSet, ObjectKey, Route};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// What the watchers tell the controller.
#[derive(Debug)]
pub enum ResourceEvent {
    RouteUpserted(Box<Route>),
    RouteDeleted(Box<Route>),
    EndpointsUpserted {
        service: ObjectKey,
        endpoints: EndpointSet,
    },
    EndpointsDeleted {
        service: ObjectKey,
    },
    NamespaceDeleted(String),
    /// Periodic full re-evaluation of every cached route.
    Resync,
}

/// Single-writer reconciliation loop.
pub struct Controller<S> {
    state: RouterState,
    chain: AdmissionChain,
    status: StatusAdmitter<S>,
    coordinator: Arc<CommitCoordinator>,
    router_name: String,
    resync_interval: Duration,
    /// Last verdict per route, used to skip redundant staging and status
    /// writes on no-op updates.
    verdicts: BTreeMap<ObjectKey, Verdict>,
}

impl<S: StatusSink> Controller<S> {
    pub fn new(
        config: &RouterConfig,
        status: StatusAdmitter<S>,
        coordinator: Arc<CommitCoordinator>,
    ) -> Self {
        Self {
            state: RouterState::new(),
            chain: AdmissionChain::new(config),
            status,
            coordinator,
            router_name: config.router_name.clone(),
            resync_interval: config.resync_interval(),
            verdicts: BTreeMap::new(),
        }
    }

    /// Drain events until the channel closes or shutdown is signalled.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<ResourceEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut resync = tokio::time::interval(self.resync_interval);
        resync.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        resync.tick().await; // first tick fires immediately

        info!("Controller started");
        loop {
            tokio::select! {
                maybe_event = events.recv() => {
                    match maybe_event {
                        Some(event) => {
                            self.handle(event).await;
                        }
                        None => break,
                    }
                }
                _ = resync.tick() => {
                    self.handle(ResourceEvent::Resync).await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Controller stopped");
    }

    /// Process one event, staging a snapshot if router state changed.
    /// Returns whether anything the backend cares about changed.
    pub async fn handle(&mut self, event: ResourceEvent) -> bool {
        let changed = match event {
            ResourceEvent::RouteUpserted(route) => self.on_route_upserted(*route).await,
            ResourceEvent::RouteDeleted(route) => self.on_route_deleted(&route).await,
            ResourceEvent::EndpointsUpserted { service, endpoints } => {
                self.state.upsert_endpoints(service, endpoints)
            }
            ResourceEvent::EndpointsDeleted { service } => {
                self.state.delete_endpoints(&service)
            }
            ResourceEvent::NamespaceDeleted(namespace) => {
                self.on_namespace_deleted(&namespace).await
            }
            ResourceEvent::Resync => self.on_resync().await,
        };

        if changed {
            self.coordinator.stage(build_snapshot(&self.state));
        }
        changed
    }

    async fn on_route_upserted(&mut self, route: Route) -> bool {
        let key = route_key(&route);
        let previous = self.state.upsert_route(route.clone());

        let spec_unchanged = previous.as_ref().is_some_and(|p| p.spec == route.spec);
        let (verdict_changed, requeue) = self.evaluate(&route).await;

        // A metadata-only update with the same verdict changes nothing the
        // backend cares about.
        let mut changed = verdict_changed || !spec_unchanged || previous.is_none();
        changed |= self.process_requeues(requeue).await;

        debug!(route = %key, changed, "Route upserted");
        changed
    }

    async fn on_route_deleted(&mut self, route: &Route) -> bool {
        let key = route_key(route);
        let owned_hosts = self.state.hosts_owned_by(&key);
        self.state.delete_route(&key);
        self.state.remove_contender_everywhere(&key);
        self.verdicts.remove(&key);

        let freed = self.state.release_claims_for(&key);
        let mut changed = !owned_hosts.is_empty();
        changed |= self.process_requeues(freed).await;

        info!(route = %key, freed_hosts = owned_hosts.len(), "Route deleted");
        changed
    }

    async fn on_namespace_deleted(&mut self, namespace: &str) -> bool {
        let doomed: Vec<ObjectKey> = self
            .state
            .route_keys()
            .into_iter()
            .filter(|k| k.namespace == namespace)
            .collect();
        let requeue = self.state.purge_namespace(namespace);
        self.verdicts.retain(|k, _| k.namespace != namespace);

        let mut changed = !doomed.is_empty();
        changed |= self.process_requeues(requeue).await;

        info!(namespace, routes = doomed.len(), "Namespace purged");
        changed
    }

    async fn on_resync(&mut self) -> bool {
        let keys = self.state.route_keys();
        debug!(routes = keys.len(), "Resync started");
        self.process_requeues(keys).await
    }

    /// Re-evaluate routes on a local work list until it drains. Ownership
    /// decisions converge (a route is only requeued when a host it wants
    /// changed hands), so this terminates.
    async fn process_requeues(&mut self, initial: Vec<ObjectKey>) -> bool {
        let mut queue: VecDeque<ObjectKey> = initial.into();
        let mut changed = false;

        while let Some(key) = queue.pop_front() {
            let Some(route) = self.state.route(&key).cloned() else {
                continue;
            };
            let (verdict_changed, requeue) = self.evaluate(&route).await;
            changed |= verdict_changed;
            queue.extend(requeue);
        }

        changed
    }

    /// Run the chain over one route, record metrics, and write status.
    /// Returns whether the verdict differs from the last one and any routes
    /// needing re-evaluation.
    async fn evaluate(&mut self, route: &Route) -> (bool, Vec<ObjectKey>) {
        let key = route_key(route);
        let admission = self.chain.evaluate(route, &mut self.state);

        match &admission.verdict {
            Verdict::Admitted { host } => {
                metrics::record_admission("admitted", "");
                debug!(route = %key, host = %host, "Route admitted");
            }
            Verdict::Rejected { reason, message } => {
                metrics::record_admission("rejected", reason);
                info!(route = %key, reason, message, "Route rejected");
            }
        }

        // The in-memory decision stands even if the write fails; the next
        // resync converges the recorded status.
        match self.status.record(route, &admission.verdict).await {
            Ok(entry) => {
                self.state.apply_route_status(&key, &self.router_name, entry);
            }
            Err(e) => {
                warn!(route = %key, error = %e, "Failed to write route status");
            }
        }

        let verdict_changed = self
            .verdicts
            .insert(key, admission.verdict.clone())
            .as_ref()
            != Some(&admission.verdict);

        (verdict_changed, admission.requeue)
    }
}
