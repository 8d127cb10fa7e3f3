use k8s_openapi::{
    api::policy::v1::{PodDisruptionBudget, PodDisruptionBudgetSpec},
    apimachinery::pkg::{
        apis::meta::v1::{LabelSelector, ObjectMeta},
        util::intstr::IntOrString,
    },
};
use snafu::{ResultExt, Snafu};

use crate::{builder::meta::ObjectMetaBuilder, crd::DseDatacenter, labels};

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, PartialEq, Eq, Snafu)]
pub enum Error {
    #[snafu(display("failed to set owner reference from resource"))]
    OwnerReferenceFromResource { source: crate::builder::meta::Error },
}

/// This builder is used to construct [`PodDisruptionBudget`]s.
///
/// The following attributes on a [`PodDisruptionBudget`] are considered mandatory and must be specified
/// before being able to construct the [`PodDisruptionBudget`]:
///
/// 1. [`PodDisruptionBudget::metadata`]
/// 2. [`PodDisruptionBudgetSpec::selector`]
/// 3. [`PodDisruptionBudgetSpec::max_unavailable`]
///
/// Both [`PodDisruptionBudget::metadata`] and [`PodDisruptionBudgetSpec::selector`] will be set by
/// [`PodDisruptionBudgetBuilder::new_with_rack`].
#[derive(Debug)]
pub struct PodDisruptionBudgetBuilder<ObjectMeta, LabelSelector, MaxUnavailable> {
    metadata: ObjectMeta,
    selector: LabelSelector,
    max_unavailable: MaxUnavailable,
}

impl PodDisruptionBudgetBuilder<(), (), ()> {
    /// Populates [`PodDisruptionBudget::metadata`] and [`PodDisruptionBudgetSpec::selector`]
    /// for the pods of a single rack. The budget is owned and controlled by `datacenter`.
    pub fn new_with_rack(
        datacenter: &DseDatacenter,
        rack_name: &str,
    ) -> Result<PodDisruptionBudgetBuilder<ObjectMeta, LabelSelector, ()>> {
        let rack_labels = labels::rack_labels(datacenter, rack_name);
        let metadata = ObjectMetaBuilder::new()
            .namespace_opt(datacenter.metadata.namespace.clone())
            .name(datacenter.pod_disruption_budget_name(rack_name))
            .ownerreference_from_resource(datacenter, None, Some(true))
            .context(OwnerReferenceFromResourceSnafu)?
            .with_labels(rack_labels.clone())
            .build();

        Ok(PodDisruptionBudgetBuilder {
            metadata,
            selector: LabelSelector {
                match_expressions: None,
                match_labels: Some(rack_labels),
            },
            max_unavailable: (),
        })
    }
}

impl PodDisruptionBudgetBuilder<ObjectMeta, LabelSelector, ()> {
    /// Sets the mandatory [`PodDisruptionBudgetSpec::max_unavailable`].
    ///
    /// Only fixed numbers are supported. `u16` always fits into the `i32` of [`IntOrString`]
    /// and rules out negative numbers.
    pub fn with_max_unavailable(
        self,
        max_unavailable: u16,
    ) -> PodDisruptionBudgetBuilder<ObjectMeta, LabelSelector, u16> {
        PodDisruptionBudgetBuilder {
            metadata: self.metadata,
            selector: self.selector,
            max_unavailable,
        }
    }
}

impl PodDisruptionBudgetBuilder<ObjectMeta, LabelSelector, u16> {
    pub fn build(self) -> PodDisruptionBudget {
        PodDisruptionBudget {
            metadata: self.metadata,
            spec: Some(PodDisruptionBudgetSpec {
                max_unavailable: Some(IntOrString::Int(i32::from(self.max_unavailable))),
                selector: Some(self.selector),
                ..PodDisruptionBudgetSpec::default()
            }),
            ..PodDisruptionBudget::default()
        }
    }
}

/// The disruption budget of a rack: at most one of its nodes may be evicted at a time.
pub fn build_rack_pod_disruption_budget(
    datacenter: &DseDatacenter,
    rack_name: &str,
) -> Result<PodDisruptionBudget> {
    Ok(PodDisruptionBudgetBuilder::new_with_rack(datacenter, rack_name)?
        .with_max_unavailable(1)
        .build())
}
