//! The `DseDatacenter` custom resource and the names derived from it.
use std::io::Write;

use kube::{CustomResource, CustomResourceExt, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

use crate::rack_plan::{self, RackInformation};

pub const APP_NAME: &str = "dse";
pub const OPERATOR_NAME: &str = "dse.datastax.com";

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to serialize CRD as YAML"))]
    YamlSerialization { source: serde_yaml::Error },

    #[snafu(display("failed to write YAML schema to stdout"))]
    WriteYamlSchema { source: std::io::Error },
}

/// A DSE datacenter spread across one or more racks.
///
/// The datacenter name is the name of this object; `clusterName` names the DSE
/// cluster the datacenter belongs to.
#[derive(Clone, CustomResource, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[kube(
    group = "datastax.com",
    version = "v1alpha1",
    kind = "DseDatacenter",
    plural = "dsedatacenters",
    shortname = "dsedc",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct DseDatacenterSpec {
    /// Name of the DSE cluster this datacenter is part of.
    pub cluster_name: String,

    /// Desired number of DSE nodes, spread as evenly as possible over all racks.
    pub size: u16,

    /// A parked datacenter keeps all of its resources but runs zero nodes.
    #[serde(default)]
    pub parked: bool,

    /// Failure domains the nodes are distributed over. At least one rack is required.
    #[serde(default)]
    pub racks: Vec<DseRack>,

    /// Container image running the DSE server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_image: Option<String>,

    /// Storage requested by every node for its data directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_claim: Option<StorageClaim>,

    /// Free-form DSE configuration, handed to the config builder of every node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "raw_object_schema")]
    pub config: Option<serde_json::Value>,
}

#[derive(Clone, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DseRack {
    pub name: String,
}

#[derive(Clone, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageClaim {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class_name: Option<String>,

    /// Requested capacity, for example `20Gi`.
    pub size: String,
}

pub fn raw_object_schema(_: &mut schemars::SchemaGenerator) -> schemars::Schema {
    schemars::json_schema!({
        "type": "object",
        "x-kubernetes-preserve-unknown-fields": true,
    })
}

impl DseDatacenter {
    pub fn cluster_name(&self) -> &str {
        &self.spec.cluster_name
    }

    /// The datacenter name, which is the name of this object.
    pub fn datacenter_name(&self) -> String {
        self.name_any()
    }

    /// Desired node count, taking the parked state into account.
    pub fn effective_size(&self) -> u16 {
        if self.spec.parked { 0 } else { self.spec.size }
    }

    pub fn stateful_set_name(&self, rack_name: &str) -> String {
        format!(
            "{cluster}-{dc}-{rack_name}-sts",
            cluster = self.cluster_name(),
            dc = self.datacenter_name()
        )
    }

    pub fn pod_disruption_budget_name(&self, rack_name: &str) -> String {
        format!("{}-pdb", self.stateful_set_name(rack_name))
    }

    /// Name of the headless service all DSE pods of this datacenter are registered with.
    pub fn service_name(&self) -> String {
        format!(
            "{cluster}-{dc}-service",
            cluster = self.cluster_name(),
            dc = self.datacenter_name()
        )
    }

    /// Names of the pods acting as seeds in the given rack.
    ///
    /// StatefulSet pods start in ordinal order, so the first `seed_count` pods
    /// of a rack are its seeds.
    pub fn seed_pod_names(&self, rack: &RackInformation) -> Vec<String> {
        let stateful_set_name = self.stateful_set_name(&rack.rack_name);
        (0..rack.seed_count)
            .map(|ordinal| format!("{stateful_set_name}-{ordinal}"))
            .collect()
    }

    /// Resolvable host names of all seeds of this datacenter.
    ///
    /// Seeds are derived from the configured size and ignore the parked state,
    /// so that parking a datacenter does not count as a configuration change.
    pub fn seed_list(&self) -> Result<Vec<String>, rack_plan::Error> {
        let service_name = self.service_name();
        let racks = rack_plan::calculate_rack_information(self.spec.size, &self.spec.racks)?;
        Ok(racks
            .iter()
            .flat_map(|rack| self.seed_pod_names(rack))
            .map(|pod_name| format!("{pod_name}.{service_name}"))
            .collect())
    }

    /// Prints the CRD of this resource as YAML to stdout.
    pub fn print_yaml_schema() -> Result<()> {
        let yaml = serde_yaml::to_string(&Self::crd()).context(YamlSerializationSnafu)?;
        let mut stdout = std::io::stdout().lock();
        stdout
            .write_all(yaml.as_bytes())
            .context(WriteYamlSchemaSnafu)
    }
}
