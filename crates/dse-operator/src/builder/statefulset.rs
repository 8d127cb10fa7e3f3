use std::collections::BTreeMap;

use k8s_openapi::{
    api::{
        apps::v1::{StatefulSet, StatefulSetSpec},
        core::v1::{
            Container, ContainerPort, EmptyDirVolumeSource, EnvVar, PersistentVolumeClaim,
            PersistentVolumeClaimSpec, PodSpec, PodTemplateSpec, Volume, VolumeMount,
            VolumeResourceRequirements,
        },
    },
    apimachinery::pkg::{
        api::resource::Quantity,
        apis::meta::v1::{LabelSelector, ObjectMeta},
    },
};
use snafu::{ResultExt, Snafu};

use crate::{
    builder::meta::ObjectMetaBuilder,
    config_drift::CONFIG_ENV_VAR,
    crd::{DseDatacenter, StorageClaim},
    health::DEFAULT_MANAGEMENT_API_PORT,
    labels,
};

pub const SERVER_CONTAINER_NAME: &str = "dse";
pub const CONFIG_INIT_CONTAINER_NAME: &str = "server-config-init";
pub const DATA_VOLUME_NAME: &str = "server-data";

const CONFIG_VOLUME_NAME: &str = "server-config";
const DEFAULT_SERVER_IMAGE: &str = "datastax/dse-server:6.7.3";
const CONFIG_BUILDER_IMAGE: &str = "datastax/dse-server-config-builder:6.7.3";
const NATIVE_TRANSPORT_PORT: i32 = 9042;

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, PartialEq, Eq, Snafu)]
pub enum Error {
    #[snafu(display("failed to set owner reference from resource"))]
    OwnerReferenceFromResource { source: crate::builder::meta::Error },
}

/// Builds the StatefulSet running the DSE nodes of one rack.
///
/// Pods are started one at a time in ordinal order. `config` ends up as the
/// first environment variable of the config init container, which renders
/// the DSE configuration files before the server starts.
pub fn build_rack_stateful_set(
    datacenter: &DseDatacenter,
    rack_name: &str,
    replicas: i32,
    config: String,
) -> Result<StatefulSet> {
    let rack_labels = labels::rack_labels(datacenter, rack_name);
    let metadata = ObjectMetaBuilder::new()
        .namespace_opt(datacenter.metadata.namespace.clone())
        .name(datacenter.stateful_set_name(rack_name))
        .ownerreference_from_resource(datacenter, None, Some(true))
        .context(OwnerReferenceFromResourceSnafu)?
        .with_labels(rack_labels.clone())
        .build();

    Ok(StatefulSet {
        metadata,
        spec: Some(StatefulSetSpec {
            replicas: Some(replicas),
            service_name: datacenter.service_name().into(),
            pod_management_policy: Some("OrderedReady".to_owned()),
            selector: LabelSelector {
                match_expressions: None,
                match_labels: Some(rack_labels.clone()),
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(rack_labels),
                    ..ObjectMeta::default()
                }),
                spec: Some(build_pod_spec(datacenter, config)),
            },
            volume_claim_templates: datacenter
                .spec
                .storage_claim
                .as_ref()
                .map(|storage_claim| vec![build_data_volume_claim(storage_claim)]),
            ..StatefulSetSpec::default()
        }),
        ..StatefulSet::default()
    })
}

fn build_pod_spec(datacenter: &DseDatacenter, config: String) -> PodSpec {
    let config_mount = VolumeMount {
        name: CONFIG_VOLUME_NAME.to_owned(),
        mount_path: "/config".to_owned(),
        ..VolumeMount::default()
    };

    let mut server_mounts = vec![config_mount.clone()];
    if datacenter.spec.storage_claim.is_some() {
        server_mounts.push(VolumeMount {
            name: DATA_VOLUME_NAME.to_owned(),
            mount_path: "/var/lib/cassandra".to_owned(),
            ..VolumeMount::default()
        });
    }

    PodSpec {
        init_containers: Some(vec![Container {
            name: CONFIG_INIT_CONTAINER_NAME.to_owned(),
            image: Some(CONFIG_BUILDER_IMAGE.to_owned()),
            env: Some(vec![EnvVar {
                name: CONFIG_ENV_VAR.to_owned(),
                value: Some(config),
                ..EnvVar::default()
            }]),
            volume_mounts: Some(vec![config_mount]),
            ..Container::default()
        }]),
        containers: vec![Container {
            name: SERVER_CONTAINER_NAME.to_owned(),
            image: Some(
                datacenter
                    .spec
                    .server_image
                    .clone()
                    .unwrap_or_else(|| DEFAULT_SERVER_IMAGE.to_owned()),
            ),
            ports: Some(vec![
                ContainerPort {
                    name: Some("native".to_owned()),
                    container_port: NATIVE_TRANSPORT_PORT,
                    ..ContainerPort::default()
                },
                ContainerPort {
                    name: Some("mgmt-api".to_owned()),
                    container_port: i32::from(DEFAULT_MANAGEMENT_API_PORT),
                    ..ContainerPort::default()
                },
            ]),
            volume_mounts: Some(server_mounts),
            ..Container::default()
        }],
        volumes: Some(vec![Volume {
            name: CONFIG_VOLUME_NAME.to_owned(),
            empty_dir: Some(EmptyDirVolumeSource::default()),
            ..Volume::default()
        }]),
        ..PodSpec::default()
    }
}

fn build_data_volume_claim(storage_claim: &StorageClaim) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(DATA_VOLUME_NAME.to_owned()),
            ..ObjectMeta::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_owned()]),
            storage_class_name: storage_claim.storage_class_name.clone(),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_owned(),
                    Quantity(storage_claim.size.clone()),
                )])),
                ..VolumeResourceRequirements::default()
            }),
            ..PersistentVolumeClaimSpec::default()
        }),
        ..PersistentVolumeClaim::default()
    }
}
