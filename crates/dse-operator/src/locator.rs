//! Looks up the resources managed for a rack, synthesizing them where they do not exist yet.
use k8s_openapi::api::{
    apps::v1::StatefulSet,
    core::v1::{PersistentVolumeClaim, Pod},
    policy::v1::PodDisruptionBudget,
};
use kube::ResourceExt;
use snafu::{OptionExt, ResultExt, Snafu};

use crate::{
    builder::{pdb, statefulset},
    client::{self, ResourceStore},
    config_drift,
    crd::DseDatacenter,
};

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("object has no namespace"))]
    ObjectHasNoNamespace,

    #[snafu(display("failed to look up StatefulSet for rack {rack:?}"))]
    GetStatefulSet { source: client::Error, rack: String },

    #[snafu(display("failed to render configuration for rack {rack:?}"))]
    RenderConfig {
        source: config_drift::Error,
        rack: String,
    },

    #[snafu(display("failed to build StatefulSet for rack {rack:?}"))]
    BuildStatefulSet {
        source: statefulset::Error,
        rack: String,
    },

    #[snafu(display("failed to look up PodDisruptionBudget for rack {rack:?}"))]
    GetPodDisruptionBudget { source: client::Error, rack: String },

    #[snafu(display("failed to build PodDisruptionBudget for rack {rack:?}"))]
    BuildPodDisruptionBudget { source: pdb::Error, rack: String },

    #[snafu(display("failed to create PodDisruptionBudget for rack {rack:?}"))]
    CreatePodDisruptionBudget { source: client::Error, rack: String },

    #[snafu(display("failed to look up pod {pod:?}"))]
    GetPod { source: client::Error, pod: String },

    #[snafu(display("failed to look up PersistentVolumeClaim {claim:?}"))]
    GetPersistentVolumeClaim {
        source: client::Error,
        claim: String,
    },
}

/// The StatefulSet of a rack, either read from the store or freshly synthesized.
#[derive(Clone, Debug)]
pub struct RackStatefulSet {
    pub stateful_set: StatefulSet,
    /// `false` if the StatefulSet does not exist yet and still has to be created.
    pub found: bool,
}

/// Reads the resources of a single datacenter through a [`ResourceStore`].
///
/// Nothing is cached, every call issues a fresh read.
pub struct ResourceLocator<'a, S> {
    store: &'a S,
    datacenter: &'a DseDatacenter,
    namespace: String,
}

impl<'a, S: ResourceStore> ResourceLocator<'a, S> {
    pub fn new(store: &'a S, datacenter: &'a DseDatacenter) -> Result<Self> {
        Ok(Self {
            store,
            datacenter,
            namespace: datacenter.namespace().context(ObjectHasNoNamespaceSnafu)?,
        })
    }

    /// Returns the StatefulSet of `rack_name`.
    ///
    /// A missing StatefulSet is synthesized with zero replicas and the desired
    /// configuration, and reported with `found: false`.
    pub async fn stateful_set(&self, rack_name: &str) -> Result<RackStatefulSet> {
        let name = self.datacenter.stateful_set_name(rack_name);
        let existing = self
            .store
            .get_opt::<StatefulSet>(&name, &self.namespace)
            .await
            .context(GetStatefulSetSnafu { rack: rack_name })?;

        if let Some(stateful_set) = existing {
            return Ok(RackStatefulSet {
                stateful_set,
                found: true,
            });
        }

        let config =
            config_drift::desired_config(self.datacenter).context(RenderConfigSnafu {
                rack: rack_name,
            })?;
        let stateful_set = statefulset::build_rack_stateful_set(self.datacenter, rack_name, 0, config)
            .context(BuildStatefulSetSnafu { rack: rack_name })?;
        Ok(RackStatefulSet {
            stateful_set,
            found: false,
        })
    }

    /// Creates the PodDisruptionBudget of `rack_name` unless it already exists.
    ///
    /// An existing budget is left untouched. Returns whether a budget was created.
    pub async fn ensure_pod_disruption_budget(&self, rack_name: &str) -> Result<bool> {
        let name = self.datacenter.pod_disruption_budget_name(rack_name);
        let existing = self
            .store
            .get_opt::<PodDisruptionBudget>(&name, &self.namespace)
            .await
            .context(GetPodDisruptionBudgetSnafu { rack: rack_name })?;
        if existing.is_some() {
            return Ok(false);
        }

        let budget = pdb::build_rack_pod_disruption_budget(self.datacenter, rack_name)
            .context(BuildPodDisruptionBudgetSnafu { rack: rack_name })?;
        self.store
            .create(&budget)
            .await
            .context(CreatePodDisruptionBudgetSnafu { rack: rack_name })?;
        Ok(true)
    }

    /// The pod with the given ordinal of the rack's StatefulSet, if it exists.
    pub async fn pod(&self, rack_name: &str, ordinal: i32) -> Result<Option<Pod>> {
        let name = format!("{}-{ordinal}", self.datacenter.stateful_set_name(rack_name));
        self.store
            .get_opt(&name, &self.namespace)
            .await
            .context(GetPodSnafu { pod: name })
    }

    /// The claim backing the first volume of `pod` that is bound to a PersistentVolumeClaim.
    pub async fn pod_claim(&self, pod: &Pod) -> Result<Option<PersistentVolumeClaim>> {
        let Some(claim_name) = pod_claim_name(pod) else {
            return Ok(None);
        };
        self.store
            .get_opt(claim_name, &self.namespace)
            .await
            .context(GetPersistentVolumeClaimSnafu { claim: claim_name })
    }
}

pub fn pod_claim_name(pod: &Pod) -> Option<&str> {
    pod.spec
        .as_ref()?
        .volumes
        .as_ref()?
        .iter()
        .find_map(|volume| volume.persistent_volume_claim.as_ref())
        .map(|claim| claim.claim_name.as_str())
}
