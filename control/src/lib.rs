//! Rudder control plane library.
//!
//! Watches Route, Endpoints, and Namespace objects, runs the admission
//! pipeline, writes verdicts back into route status, and commits the
//! resulting configuration to the proxy backend.

pub mod admission;
pub mod apis;
pub mod commit;
pub mod config;
pub mod controller;
pub mod error;
pub mod metrics;
pub mod state;
