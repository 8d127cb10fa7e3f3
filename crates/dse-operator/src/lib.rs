//! Operator logic for DSE datacenters.
//!
//! A [`DseDatacenter`](crate::crd::DseDatacenter) declares how many nodes a
//! datacenter should run and how they are spread across racks. Every time the
//! controller is triggered, [`reconcile::racks::ReconcileRacks`] re-reads the
//! cluster state and performs at most one change that moves the datacenter
//! closer to that declaration: creating a rack, bringing up the next seed,
//! adding the next node once the cluster is healthy, or rolling out new
//! configuration.

pub mod builder;
pub mod cli;
pub mod client;
pub mod config_drift;
pub mod controller;
pub mod crd;
pub mod health;
pub mod labels;
pub mod locator;
pub mod logging;
pub mod namespace;
pub mod progress;
pub mod rack_plan;
pub mod reconcile;

// External re-exports
pub use k8s_openapi;
pub use kube;
