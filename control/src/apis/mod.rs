//! Kubernetes watch plumbing.
//!
//! One watcher task per resource kind, each translating raw watch events
//! into `ResourceEvent`s for the controller channel.

pub mod endpoints_watcher;
pub mod namespace_watcher;
pub mod route_watcher;
