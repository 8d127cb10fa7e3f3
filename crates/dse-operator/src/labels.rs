//! Labels identifying which cluster, datacenter and rack a resource belongs to.
//!
//! The scopes are nested: every datacenter resource also carries the cluster
//! labels, and every rack resource carries the datacenter and cluster labels.
//! [`updated_labels`] compares an existing label map with what a resource at a
//! given scope needs and returns the merged map if an update is required.
//! Labels outside of this hierarchy are never touched.
use std::collections::BTreeMap;

use crate::crd::DseDatacenter;

pub const CLUSTER_LABEL: &str = "datastax.com/cluster";
pub const DATACENTER_LABEL: &str = "datastax.com/datacenter";
pub const RACK_LABEL: &str = "datastax.com/rack";

/// Marks pods acting as seeds, so that they are picked up by the seed service.
pub const SEED_NODE_LABEL: &str = "datastax.com/seed-node";

pub type Labels = BTreeMap<String, String>;

/// The level of the resource hierarchy a resource belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LabelScope<'a> {
    Cluster,
    Datacenter,
    Rack(&'a str),
}

impl<'a> LabelScope<'a> {
    /// This scope and all scopes enclosing it, outermost first.
    pub fn hierarchy(self) -> Vec<LabelScope<'a>> {
        match self {
            LabelScope::Cluster => vec![LabelScope::Cluster],
            LabelScope::Datacenter => vec![LabelScope::Cluster, LabelScope::Datacenter],
            LabelScope::Rack(_) => vec![LabelScope::Cluster, LabelScope::Datacenter, self],
        }
    }

    /// The label that identifies a resource as belonging to this scope.
    fn identity(self, datacenter: &DseDatacenter) -> (&'static str, String) {
        match self {
            LabelScope::Cluster => (CLUSTER_LABEL, datacenter.cluster_name().to_owned()),
            LabelScope::Datacenter => (DATACENTER_LABEL, datacenter.datacenter_name()),
            LabelScope::Rack(rack_name) => (RACK_LABEL, rack_name.to_owned()),
        }
    }

    /// The full set of labels a resource at this scope must carry.
    pub fn labels(self, datacenter: &DseDatacenter) -> Labels {
        self.hierarchy()
            .into_iter()
            .map(|scope| {
                let (key, value) = scope.identity(datacenter);
                (key.to_owned(), value)
            })
            .collect()
    }
}

pub fn cluster_labels(datacenter: &DseDatacenter) -> Labels {
    LabelScope::Cluster.labels(datacenter)
}

pub fn datacenter_labels(datacenter: &DseDatacenter) -> Labels {
    LabelScope::Datacenter.labels(datacenter)
}

pub fn rack_labels(datacenter: &DseDatacenter, rack_name: &str) -> Labels {
    LabelScope::Rack(rack_name).labels(datacenter)
}

/// Returns the labels a resource at `scope` should have, or [`None`] if
/// `current` is already up to date.
///
/// Scopes are checked from the outside in. Once a scope is missing or has a
/// mismatching identity label, the full label set of that scope and of every
/// scope nested inside it is merged into the existing labels.
pub fn updated_labels(
    current: Option<&Labels>,
    datacenter: &DseDatacenter,
    scope: LabelScope,
) -> Option<Labels> {
    let mut labels = current.cloned().unwrap_or_default();
    let mut should_update = false;

    for scope in scope.hierarchy() {
        let (key, value) = scope.identity(datacenter);
        should_update |= labels.get(key) != Some(&value);

        if should_update {
            labels.extend(scope.labels(datacenter));
        }
    }

    should_update.then_some(labels)
}
