//! Converges the racks of a [`DseDatacenter`] one step at a time.
//!
//! [`ReconcileRacks::apply`] runs a fixed chain of checks over all racks:
//!
//! 1. create missing StatefulSets (and their PodDisruptionBudgets)
//! 2. keep the StatefulSet labels up to date
//! 3. scale parked racks down to zero
//! 4. bring up the seeds of every rack, one node at a time
//! 5. add the remaining nodes, one node at a time and only while the cluster is healthy
//! 6. roll out configuration changes
//! 7. keep the pod and volume claim labels up to date
//!
//! The first check that changes something (or has to wait) ends the
//! reconciliation and requeues the datacenter. Nothing is remembered between
//! reconciliations, every call starts again from the first check.
use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use kube::{
    ResourceExt,
    core::DynamicObject,
    runtime::reflector::ObjectRef,
};
use snafu::{ResultExt, Snafu};
use strum::{EnumDiscriminants, IntoStaticStr};

use crate::{
    client::{self, ResourceStore, StoredResource},
    config_drift,
    crd::DseDatacenter,
    health::{self, NodeMgmtClient},
    labels::{self, LabelScope, SEED_NODE_LABEL},
    locator::{self, ResourceLocator},
    logging::controller::ReconcilerError,
    progress::{self, ProgressState},
    rack_plan::{self, RackInformation},
    reconcile::{ReconcileFunctionAction, ReconcileResult, ReconciliationContext},
};

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
pub enum Error {
    #[snafu(display("failed to calculate the rack layout"))]
    CalculateRackInformation { source: rack_plan::Error },

    #[snafu(display("failed to locate rack resources"))]
    LocateRackResources { source: locator::Error },

    #[snafu(display("failed to create {stateful_set}"))]
    CreateStatefulSet {
        source: client::Error,
        stateful_set: ObjectRef<StatefulSet>,
    },

    #[snafu(display("failed to update {stateful_set}"))]
    UpdateStatefulSet {
        source: client::Error,
        stateful_set: ObjectRef<StatefulSet>,
    },

    #[snafu(display("failed to compare the configuration of {stateful_set}"))]
    CheckConfiguration {
        source: config_drift::Error,
        stateful_set: ObjectRef<StatefulSet>,
    },

    #[snafu(display("failed to record operator progress"))]
    RecordProgress { source: progress::Error },
}

impl ReconcilerError for Error {
    fn category(&self) -> &'static str {
        ErrorDiscriminants::from(self).into()
    }

    fn secondary_object(&self) -> Option<ObjectRef<DynamicObject>> {
        match self {
            Error::CreateStatefulSet { stateful_set, .. }
            | Error::UpdateStatefulSet { stateful_set, .. }
            | Error::CheckConfiguration { stateful_set, .. } => {
                Some(stateful_set.clone().erase())
            }
            Error::CalculateRackInformation { .. }
            | Error::LocateRackResources { .. }
            | Error::RecordProgress { .. } => None,
        }
    }
}

/// Desired replica count of a StatefulSet, defaulting to one like the API server does.
fn replicas(stateful_set: &StatefulSet) -> i32 {
    stateful_set
        .spec
        .as_ref()
        .and_then(|spec| spec.replicas)
        .unwrap_or(1)
}

fn ready_replicas(stateful_set: &StatefulSet) -> i32 {
    stateful_set
        .status
        .as_ref()
        .and_then(|status| status.ready_replicas)
        .unwrap_or(0)
}

/// Number of pods the StatefulSet controller has created so far.
fn observed_replicas(stateful_set: &StatefulSet) -> i32 {
    stateful_set
        .status
        .as_ref()
        .map_or(0, |status| status.replicas)
}

pub struct ReconcileRacks<'a, S, M> {
    context: ReconciliationContext<'a, S, M>,
    locator: ResourceLocator<'a, S>,
    rack_plan: Vec<RackInformation>,
}

impl<'a, S, M> ReconcileRacks<'a, S, M>
where
    S: ResourceStore,
    M: NodeMgmtClient,
{
    /// Calculates the desired layout of all racks.
    ///
    /// Fails if the datacenter does not declare any racks.
    pub fn new(context: ReconciliationContext<'a, S, M>) -> Result<Self> {
        let datacenter = context.datacenter;
        let rack_plan =
            rack_plan::calculate_rack_information(datacenter.effective_size(), &datacenter.spec.racks)
                .context(CalculateRackInformationSnafu)?;
        let locator =
            ResourceLocator::new(context.store, datacenter).context(LocateRackResourcesSnafu)?;

        Ok(Self {
            context,
            locator,
            rack_plan,
        })
    }

    fn datacenter(&self) -> &DseDatacenter {
        self.context.datacenter
    }

    /// Runs all checks and returns what should happen next.
    ///
    /// [`ReconcileFunctionAction::Done`] means that every rack is converged.
    #[tracing::instrument(
        skip_all,
        fields(datacenter = %self.datacenter().name_any(), cluster = self.datacenter().cluster_name())
    )]
    pub async fn apply(&self) -> ReconcileResult<Error> {
        let mut stateful_sets = Vec::with_capacity(self.rack_plan.len());
        if let action @ ReconcileFunctionAction::Requeue(_) =
            self.check_rack_creation(&mut stateful_sets).await?
        {
            return Ok(action);
        }

        self.check_rack_labels(&mut stateful_sets).await;

        let action = self
            .check_rack_parked_state(&stateful_sets)
            .await?
            .then(self.check_rack_seeds_ready(&stateful_sets))
            .await?
            .then(self.check_rack_scale_ready(&stateful_sets))
            .await?
            .then(self.check_rack_configuration(&stateful_sets))
            .await?
            .then(self.check_rack_pod_labels(&stateful_sets))
            .await?;
        if action != ReconcileFunctionAction::Continue {
            return Ok(action);
        }

        self.set_progress(ProgressState::Ready).await?;
        tracing::info!("all racks are reconciled");
        Ok(ReconcileFunctionAction::Done)
    }

    async fn set_progress(&self, state: ProgressState) -> Result<()> {
        progress::set_operator_progress(self.context.store, self.datacenter(), state)
            .await
            .context(RecordProgressSnafu)
    }

    /// Collects the StatefulSet of every rack into `stateful_sets`, in rack order.
    ///
    /// The first missing StatefulSet is created together with its
    /// PodDisruptionBudget, which requeues the datacenter.
    async fn check_rack_creation(
        &self,
        stateful_sets: &mut Vec<StatefulSet>,
    ) -> ReconcileResult<Error> {
        for rack in &self.rack_plan {
            let located = self
                .locator
                .stateful_set(&rack.rack_name)
                .await
                .context(LocateRackResourcesSnafu)?;

            if located.found {
                stateful_sets.push(located.stateful_set);
                continue;
            }

            tracing::info!(rack = rack.rack_name, "creating StatefulSet for new rack");
            return self.create_rack(&rack.rack_name, &located.stateful_set).await;
        }

        Ok(ReconcileFunctionAction::Continue)
    }

    async fn create_rack(
        &self,
        rack_name: &str,
        stateful_set: &StatefulSet,
    ) -> ReconcileResult<Error> {
        self.set_progress(ProgressState::Updating).await?;

        self.context
            .store
            .create(stateful_set)
            .await
            .with_context(|_| CreateStatefulSetSnafu {
                stateful_set: ObjectRef::from_obj(stateful_set),
            })?;

        if self
            .locator
            .ensure_pod_disruption_budget(rack_name)
            .await
            .context(LocateRackResourcesSnafu)?
        {
            tracing::info!(rack = rack_name, "created PodDisruptionBudget");
        }

        Ok(self.context.requeue())
    }

    /// Merges the rack labels into every StatefulSet. Failures are only logged.
    async fn check_rack_labels(&self, stateful_sets: &mut [StatefulSet]) {
        for (rack, stateful_set) in self.rack_plan.iter().zip(stateful_sets.iter_mut()) {
            if let Some(updated) = self.update_rack_labels(stateful_set, &rack.rack_name).await {
                *stateful_set = updated;
            }
        }
    }

    /// Scales the racks of a parked datacenter down to zero.
    async fn check_rack_parked_state(&self, stateful_sets: &[StatefulSet]) -> ReconcileResult<Error> {
        let parked = self.datacenter().spec.parked;

        for (rack, stateful_set) in self.rack_plan.iter().zip(stateful_sets) {
            let current = replicas(stateful_set);

            if parked && current > 0 {
                tracing::info!(
                    rack = rack.rack_name,
                    current,
                    "datacenter is parked, scaling rack down"
                );
                return self
                    .update_rack_node_count(stateful_set, rack.node_count)
                    .await;
            }

            // A rack starts with its first seed alone, the later checks take it from there.
            let target = if current <= 1 { 1 } else { rack.node_count };
            tracing::debug!(rack = rack.rack_name, current, target, "rack replica target");
        }

        Ok(ReconcileFunctionAction::Continue)
    }

    /// Adds seeds one by one until every rack runs all of its seeds.
    async fn check_rack_seeds_ready(&self, stateful_sets: &[StatefulSet]) -> ReconcileResult<Error> {
        for (rack, stateful_set) in self.rack_plan.iter().zip(stateful_sets) {
            self.label_seed_pods(rack).await;

            // A rack can be assigned a seed without getting any nodes, it must stay empty.
            let seed_target = rack.seed_count.min(rack.node_count);
            let current = replicas(stateful_set);
            let ready = ready_replicas(stateful_set);

            // Seeds are satisfied, the remaining nodes are added by the scale check.
            if ready >= seed_target {
                continue;
            }

            if ready < current {
                tracing::info!(
                    rack = rack.rack_name,
                    current,
                    ready,
                    "waiting for seeds to become ready"
                );
                return Ok(self.context.requeue());
            }

            tracing::info!(rack = rack.rack_name, seed_target, ready, "adding seed");
            return self.update_rack_node_count(stateful_set, current + 1).await;
        }

        Ok(ReconcileFunctionAction::Continue)
    }

    /// Marks the seed pods of `rack` that already exist. Best effort.
    async fn label_seed_pods(&self, rack: &RackInformation) {
        for ordinal in 0..rack.seed_count {
            let mut pod = match self.locator.pod(&rack.rack_name, ordinal).await {
                Ok(Some(pod)) => pod,
                Ok(None) => return,
                Err(error) => {
                    tracing::warn!(
                        rack = rack.rack_name,
                        error = &error as &dyn std::error::Error,
                        "failed to look up seed pod"
                    );
                    return;
                }
            };

            if pod.labels().contains_key(SEED_NODE_LABEL) {
                continue;
            }

            pod.labels_mut()
                .insert(SEED_NODE_LABEL.to_owned(), "true".to_owned());
            if let Err(error) = self.context.store.update(&pod).await {
                tracing::warn!(
                    pod = pod.name_any(),
                    error = &error as &dyn std::error::Error,
                    "failed to label seed pod"
                );
            }
        }
    }

    /// Adds the remaining nodes one by one, as long as the cluster stays healthy.
    async fn check_rack_scale_ready(&self, stateful_sets: &[StatefulSet]) -> ReconcileResult<Error> {
        for (rack, stateful_set) in self.rack_plan.iter().zip(stateful_sets) {
            let current = replicas(stateful_set);
            let ready = ready_replicas(stateful_set);

            if ready < current {
                tracing::info!(
                    rack = rack.rack_name,
                    current,
                    ready,
                    "waiting for all replicas to become ready"
                );
                return Ok(self.context.requeue());
            }

            if current < rack.node_count {
                let healthy = health::is_cluster_healthy(
                    self.context.store,
                    self.context.node_mgmt,
                    self.datacenter(),
                    self.context.options.management_api_port,
                )
                .await;
                if !healthy {
                    tracing::info!(rack = rack.rack_name, "cluster is not healthy, not adding node");
                    return Ok(self.context.requeue());
                }

                tracing::info!(
                    rack = rack.rack_name,
                    current,
                    desired = rack.node_count,
                    "adding node to rack"
                );
                return self.update_rack_node_count(stateful_set, current + 1).await;
            }

            if ready > rack.node_count {
                // Scaling down is left to the administrator.
                tracing::warn!(
                    rack = rack.rack_name,
                    ready,
                    desired = rack.node_count,
                    "more replicas are ready than desired"
                );
                return Ok(self.context.requeue());
            }

            tracing::debug!(rack = rack.rack_name, "all replicas of rack are ready");
        }

        Ok(ReconcileFunctionAction::Continue)
    }

    /// Rolls out the desired configuration to the first StatefulSet that deviates from it.
    async fn check_rack_configuration(
        &self,
        stateful_sets: &[StatefulSet],
    ) -> ReconcileResult<Error> {
        for stateful_set in stateful_sets {
            let drift = config_drift::detect_drift(self.datacenter(), stateful_set).with_context(
                |_| CheckConfigurationSnafu {
                    stateful_set: ObjectRef::from_obj(stateful_set),
                },
            )?;
            let Some(desired) = drift else {
                continue;
            };

            tracing::info!(
                stateful_set = stateful_set.name_any(),
                "configuration changed, updating StatefulSet"
            );
            self.set_progress(ProgressState::Updating).await?;

            let mut updated = stateful_set.clone();
            config_drift::set_deployed_config(&mut updated, desired).with_context(|_| {
                CheckConfigurationSnafu {
                    stateful_set: ObjectRef::from_obj(stateful_set),
                }
            })?;
            self.context
                .store
                .update(&updated)
                .await
                .with_context(|_| UpdateStatefulSetSnafu {
                    stateful_set: ObjectRef::from_obj(stateful_set),
                })?;

            // Pods restart with the new configuration, wait for them in the next round.
            return Ok(self.context.requeue());
        }

        Ok(ReconcileFunctionAction::Continue)
    }

    async fn check_rack_pod_labels(&self, stateful_sets: &[StatefulSet]) -> ReconcileResult<Error> {
        for (rack, stateful_set) in self.rack_plan.iter().zip(stateful_sets) {
            let action = self.reconcile_pods(rack, stateful_set).await;
            if action != ReconcileFunctionAction::Continue {
                return Ok(action);
            }
        }

        Ok(ReconcileFunctionAction::Continue)
    }

    /// Merges the rack labels into every pod of the rack and into its volume claim.
    ///
    /// Requeues if a pod or its claim cannot be read. Failing label updates are only logged.
    async fn reconcile_pods(
        &self,
        rack: &RackInformation,
        stateful_set: &StatefulSet,
    ) -> ReconcileFunctionAction {
        for ordinal in 0..observed_replicas(stateful_set) {
            let pod = match self.locator.pod(&rack.rack_name, ordinal).await {
                Ok(Some(pod)) => pod,
                Ok(None) => {
                    tracing::info!(rack = rack.rack_name, ordinal, "pod does not exist yet");
                    return self.context.requeue();
                }
                Err(error) => {
                    tracing::info!(
                        rack = rack.rack_name,
                        ordinal,
                        error = &error as &dyn std::error::Error,
                        "failed to get pod"
                    );
                    return self.context.requeue();
                }
            };
            self.update_rack_labels(&pod, &rack.rack_name).await;

            match self.locator.pod_claim(&pod).await {
                Ok(Some(claim)) => {
                    self.update_rack_labels(&claim, &rack.rack_name).await;
                }
                Ok(None) => {}
                Err(error) => {
                    tracing::info!(
                        pod = pod.name_any(),
                        error = &error as &dyn std::error::Error,
                        "failed to get volume claim"
                    );
                    return self.context.requeue();
                }
            }
        }

        ReconcileFunctionAction::Continue
    }

    /// Writes the rack labels to `resource` if they are out of date.
    ///
    /// Returns the updated resource, or [`None`] if nothing was written.
    async fn update_rack_labels<T: StoredResource>(&self, resource: &T, rack_name: &str) -> Option<T> {
        let labels = labels::updated_labels(
            Some(resource.labels()),
            self.datacenter(),
            LabelScope::Rack(rack_name),
        )?;

        tracing::info!(
            kind = %T::kind(&()),
            name = resource.name_any(),
            rack = rack_name,
            "updating labels"
        );
        let mut updated = resource.clone();
        *updated.labels_mut() = labels;

        match self.context.store.update(&updated).await {
            Ok(updated) => Some(updated),
            Err(error) => {
                tracing::warn!(
                    name = resource.name_any(),
                    error = &error as &dyn std::error::Error,
                    "failed to update labels"
                );
                None
            }
        }
    }

    async fn update_rack_node_count(
        &self,
        stateful_set: &StatefulSet,
        replicas: i32,
    ) -> ReconcileResult<Error> {
        tracing::info!(
            stateful_set = stateful_set.name_any(),
            replicas,
            "updating StatefulSet replicas"
        );
        self.set_progress(ProgressState::Updating).await?;

        let mut updated = stateful_set.clone();
        updated
            .spec
            .get_or_insert_with(StatefulSetSpec::default)
            .replicas = Some(replicas);
        self.context
            .store
            .update(&updated)
            .await
            .with_context(|_| UpdateStatefulSetSnafu {
                stateful_set: ObjectRef::from_obj(stateful_set),
            })?;

        Ok(self.context.requeue())
    }
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::apps::v1::StatefulSetStatus;
    use rstest::rstest;

    use super::*;

    fn stateful_set(replicas: Option<i32>, status: Option<(i32, Option<i32>)>) -> StatefulSet {
        StatefulSet {
            spec: Some(StatefulSetSpec {
                replicas,
                ..StatefulSetSpec::default()
            }),
            status: status.map(|(replicas, ready_replicas)| StatefulSetStatus {
                replicas,
                ready_replicas,
                ..StatefulSetStatus::default()
            }),
            ..StatefulSet::default()
        }
    }

    #[rstest]
    #[case(stateful_set(Some(3), Some((3, Some(2)))), 3, 2, 3)]
    #[case(stateful_set(None, None), 1, 0, 0)]
    #[case(stateful_set(Some(0), Some((1, None))), 0, 0, 1)]
    fn reads_replica_counts(
        #[case] stateful_set: StatefulSet,
        #[case] desired: i32,
        #[case] ready: i32,
        #[case] observed: i32,
    ) {
        assert_eq!(replicas(&stateful_set), desired);
        assert_eq!(ready_replicas(&stateful_set), ready);
        assert_eq!(observed_replicas(&stateful_set), observed);
    }

    #[test]
    fn errors_are_categorized() {
        let error = Error::CalculateRackInformation {
            source: rack_plan::Error::NoRacks,
        };

        assert_eq!(error.category(), "CalculateRackInformation");
        assert!(error.secondary_object().is_none());
    }
}
