//! Builders for the Kubernetes objects managed per rack.
//!
//! They are not _pure_ builders: names, labels and owner references are
//! derived from the [`DseDatacenter`](crate::crd::DseDatacenter) they belong to.
pub mod meta;
pub mod pdb;
pub mod statefulset;
