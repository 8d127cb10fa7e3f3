//! Detection of configuration drift between a `DseDatacenter` and its StatefulSets.
//!
//! The desired configuration is rendered as canonical JSON (sorted keys, no
//! whitespace) and handed to every DSE pod through the [`CONFIG_ENV_VAR`]
//! environment variable of the config init container. A StatefulSet has
//! drifted if that value differs from the desired rendering in any way.
use k8s_openapi::api::{apps::v1::StatefulSet, core::v1::EnvVar};
use serde_json::{Map, Value, json};
use snafu::{ResultExt, Snafu};

use crate::{crd::DseDatacenter, rack_plan};

pub const CONFIG_ENV_VAR: &str = "CONFIG_FILE_DATA";

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to determine the seed list"))]
    SeedList { source: rack_plan::Error },

    #[snafu(display("the DSE config must be an object, found {config}"))]
    ConfigNotAnObject { config: Value },

    #[snafu(display("failed to serialize the desired configuration"))]
    SerializeConfig { source: serde_json::Error },

    #[snafu(display(
        "{CONFIG_ENV_VAR} environment variable not available in StatefulSet {stateful_set:?}"
    ))]
    MissingConfigSlot { stateful_set: String },
}

/// Renders the configuration every DSE node of `datacenter` should run with.
pub fn desired_config(datacenter: &DseDatacenter) -> Result<String> {
    let seeds = datacenter.seed_list().context(SeedListSnafu)?;

    let mut config = match &datacenter.spec.config {
        None => Map::new(),
        Some(Value::Object(config)) => config.clone(),
        Some(config) => {
            return ConfigNotAnObjectSnafu {
                config: config.clone(),
            }
            .fail();
        }
    };
    config.insert(
        "cluster-info".to_owned(),
        json!({
            "name": datacenter.cluster_name(),
            "seeds": seeds.join(","),
        }),
    );
    config.insert(
        "datacenter-info".to_owned(),
        json!({ "name": datacenter.datacenter_name() }),
    );

    serde_json::to_string(&canonicalize(Value::Object(config))).context(SerializeConfigSnafu)
}

/// Sorts all object keys, so that equal configurations render to equal strings.
fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(object) => {
            let mut entries: Vec<_> = object.into_iter().collect();
            entries.sort_by(|(left, _), (right, _)| left.cmp(right));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(key, value)| (key, canonicalize(value)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

fn config_env_var(stateful_set: &StatefulSet) -> Option<&EnvVar> {
    stateful_set
        .spec
        .as_ref()?
        .template
        .spec
        .as_ref()?
        .init_containers
        .as_ref()?
        .first()?
        .env
        .as_ref()?
        .iter()
        .find(|env_var| env_var.name == CONFIG_ENV_VAR)
}

fn config_env_var_mut(stateful_set: &mut StatefulSet) -> Option<&mut EnvVar> {
    stateful_set
        .spec
        .as_mut()?
        .template
        .spec
        .as_mut()?
        .init_containers
        .as_mut()?
        .first_mut()?
        .env
        .as_mut()?
        .iter_mut()
        .find(|env_var| env_var.name == CONFIG_ENV_VAR)
}

fn missing_config_slot(stateful_set: &StatefulSet) -> Error {
    Error::MissingConfigSlot {
        stateful_set: stateful_set.metadata.name.clone().unwrap_or_default(),
    }
}

/// The configuration currently deployed by `stateful_set`.
///
/// A StatefulSet without the config variable is an error, not an empty config.
pub fn deployed_config(stateful_set: &StatefulSet) -> Result<&str> {
    config_env_var(stateful_set)
        .map(|env_var| env_var.value.as_deref().unwrap_or_default())
        .ok_or_else(|| missing_config_slot(stateful_set))
}

/// Replaces the deployed configuration of `stateful_set` with `config`.
pub fn set_deployed_config(stateful_set: &mut StatefulSet, config: String) -> Result<()> {
    let missing = missing_config_slot(stateful_set);
    let env_var = config_env_var_mut(stateful_set).ok_or(missing)?;
    env_var.value = Some(config);
    Ok(())
}

/// Compares the deployed and the desired configuration.
///
/// Returns the desired configuration if it differs from what `stateful_set`
/// currently deploys, [`None`] if both are equal.
pub fn detect_drift(
    datacenter: &DseDatacenter,
    stateful_set: &StatefulSet,
) -> Result<Option<String>> {
    let deployed = deployed_config(stateful_set)?;
    let desired = desired_config(datacenter)?;
    Ok((deployed != desired).then_some(desired))
}
