//! In-memory stand-ins for the Kubernetes API and the DSE management API.
#![allow(dead_code)]

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{
        Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use dse_operator::{
    builder::statefulset::{DATA_VOLUME_NAME, build_rack_stateful_set},
    client::{
        CreateResourceSnafu, GetResourceSnafu, ListResourcesSnafu, ResourceStore, Result,
        StoredResource, UpdateResourceSnafu, label_selector_string,
    },
    config_drift,
    crd::DseDatacenter,
    health::{self, NodeMgmtClient},
    k8s_openapi::api::{
        apps::v1::{StatefulSet, StatefulSetStatus},
        core::v1::{
            EmptyDirVolumeSource, PersistentVolumeClaim, PersistentVolumeClaimVolumeSource, Pod,
            PodSpec, Volume,
        },
        policy::v1::PodDisruptionBudget,
    },
    kube::{Resource, ResourceExt, api::ObjectMeta},
    labels::{self, SEED_NODE_LABEL},
    progress::{OPERATOR_PROGRESS_LABEL, ProgressState},
    rack_plan,
    reconcile::{
        ReconcileFunctionAction, ReconcileOptions, ReconciliationContext,
        racks::{self, ReconcileRacks},
    },
};
use indoc::indoc;
use snafu::IntoError;
use url::Url;

pub const NAMESPACE: &str = "default";

/// A write that reached the [`InMemoryStore`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Write {
    Create { kind: String, name: String },
    Update { kind: String, name: String },
}

impl Write {
    pub fn create<T: Resource<DynamicType = ()>>(name: &str) -> Self {
        Self::Create {
            kind: T::kind(&()).into_owned(),
            name: name.to_owned(),
        }
    }

    pub fn update<T: Resource<DynamicType = ()>>(name: &str) -> Self {
        Self::Update {
            kind: T::kind(&()).into_owned(),
            name: name.to_owned(),
        }
    }
}

type ObjectKey = (String, String, String);

fn object_key<T: Resource<DynamicType = ()>>(namespace: &str, name: &str) -> ObjectKey {
    (
        T::kind(&()).into_owned(),
        namespace.to_owned(),
        name.to_owned(),
    )
}

fn injected_failure(message: &'static str) -> kube::Error {
    kube::Error::Service(message.into())
}

/// A [`ResourceStore`] keeping objects as JSON in memory.
///
/// Updates are checked against the stored `resourceVersion` like the API server does.
#[derive(Default)]
pub struct InMemoryStore {
    objects: Mutex<BTreeMap<ObjectKey, serde_json::Value>>,
    writes: Mutex<Vec<Write>>,
    failing_gets: Mutex<BTreeSet<String>>,
    failing_updates: Mutex<BTreeSet<String>>,
}

impl InMemoryStore {
    pub fn insert<T: StoredResource>(&self, object: &T) {
        let mut object = object.clone();
        object.meta_mut().resource_version = Some("1".to_owned());
        let key = object_key::<T>(
            object.namespace().as_deref().unwrap_or(NAMESPACE),
            &object.name_any(),
        );
        self.objects
            .lock()
            .unwrap()
            .insert(key, serde_json::to_value(&object).unwrap());
    }

    pub fn remove<T: StoredResource>(&self, name: &str) {
        self.objects
            .lock()
            .unwrap()
            .remove(&object_key::<T>(NAMESPACE, name));
    }

    pub fn get<T: StoredResource>(&self, name: &str) -> Option<T> {
        self.objects
            .lock()
            .unwrap()
            .get(&object_key::<T>(NAMESPACE, name))
            .map(|value| serde_json::from_value(value.clone()).unwrap())
    }

    /// Applies `change` to a stored object without going through the write log.
    pub fn modify<T: StoredResource>(&self, name: &str, change: impl FnOnce(&mut T)) {
        let mut object = self.get::<T>(name).expect("object to modify exists");
        change(&mut object);
        self.objects.lock().unwrap().insert(
            object_key::<T>(NAMESPACE, name),
            serde_json::to_value(&object).unwrap(),
        );
    }

    pub fn writes(&self) -> Vec<Write> {
        self.writes.lock().unwrap().clone()
    }

    pub fn clear_writes(&self) {
        self.writes.lock().unwrap().clear();
    }

    pub fn fail_gets_of<T: StoredResource>(&self) {
        self.failing_gets
            .lock()
            .unwrap()
            .insert(T::kind(&()).into_owned());
    }

    pub fn fail_updates_of<T: StoredResource>(&self) {
        self.failing_updates
            .lock()
            .unwrap()
            .insert(T::kind(&()).into_owned());
    }

    fn fails(set: &Mutex<BTreeSet<String>>, kind: &str) -> bool {
        set.lock().unwrap().contains(kind)
    }
}

#[async_trait]
impl ResourceStore for InMemoryStore {
    async fn get_opt<T: StoredResource>(&self, name: &str, namespace: &str) -> Result<Option<T>> {
        let kind = T::kind(&()).into_owned();
        if Self::fails(&self.failing_gets, &kind) {
            return Err(GetResourceSnafu {
                kind,
                name,
                namespace,
            }
            .into_error(injected_failure("get failed")));
        }

        Ok(self
            .objects
            .lock()
            .unwrap()
            .get(&object_key::<T>(namespace, name))
            .map(|value| serde_json::from_value(value.clone()).unwrap()))
    }

    async fn create<T: StoredResource>(&self, resource: &T) -> Result<T> {
        let kind = T::kind(&()).into_owned();
        let name = resource.name_any();
        let key = object_key::<T>(resource.namespace().as_deref().unwrap_or_default(), &name);

        let mut objects = self.objects.lock().unwrap();
        if objects.contains_key(&key) {
            return Err(CreateResourceSnafu { kind, name }
                .into_error(injected_failure("object already exists")));
        }

        let mut created = resource.clone();
        created.meta_mut().resource_version = Some("1".to_owned());
        objects.insert(key, serde_json::to_value(&created).unwrap());
        self.writes
            .lock()
            .unwrap()
            .push(Write::Create { kind, name });
        Ok(created)
    }

    async fn update<T: StoredResource>(&self, resource: &T) -> Result<T> {
        let kind = T::kind(&()).into_owned();
        let name = resource.name_any();
        if Self::fails(&self.failing_updates, &kind) {
            return Err(UpdateResourceSnafu { kind, name }
                .into_error(injected_failure("update failed")));
        }

        let key = object_key::<T>(resource.namespace().as_deref().unwrap_or_default(), &name);
        let mut objects = self.objects.lock().unwrap();
        let Some(stored) = objects.get(&key) else {
            return Err(UpdateResourceSnafu { kind, name }
                .into_error(injected_failure("object not found")));
        };

        let stored_version: u64 = stored["metadata"]["resourceVersion"]
            .as_str()
            .and_then(|version| version.parse().ok())
            .unwrap_or_default();
        if resource.resource_version() != Some(stored_version.to_string()) {
            return Err(UpdateResourceSnafu { kind, name }
                .into_error(injected_failure("resourceVersion conflict")));
        }

        let mut updated = resource.clone();
        updated.meta_mut().resource_version = Some((stored_version + 1).to_string());
        objects.insert(key, serde_json::to_value(&updated).unwrap());
        self.writes
            .lock()
            .unwrap()
            .push(Write::Update { kind, name });
        Ok(updated)
    }

    async fn list_with_label_selector<T: StoredResource>(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<T>> {
        let kind = T::kind(&()).into_owned();
        if Self::fails(&self.failing_gets, &kind) {
            return Err(ListResourcesSnafu {
                kind,
                selector: label_selector_string(selector),
                namespace,
            }
            .into_error(injected_failure("list failed")));
        }

        Ok(self
            .objects
            .lock()
            .unwrap()
            .iter()
            .filter(|((object_kind, object_namespace, _), _)| {
                *object_kind == kind && object_namespace == namespace
            })
            .map(|(_, value)| serde_json::from_value::<T>(value.clone()).unwrap())
            .filter(|object| {
                selector
                    .iter()
                    .all(|(key, value)| object.labels().get(key) == Some(value))
            })
            .collect())
    }
}

/// A [`NodeMgmtClient`] answering every probe with the same, switchable health.
pub struct ScriptedProbe {
    healthy: AtomicBool,
    calls: Mutex<Vec<Url>>,
}

impl ScriptedProbe {
    pub fn healthy() -> Self {
        Self {
            healthy: AtomicBool::new(true),
            calls: Mutex::default(),
        }
    }

    pub fn unhealthy() -> Self {
        let probe = Self::healthy();
        probe.healthy.store(false, Ordering::SeqCst);
        probe
    }

    pub fn calls(&self) -> Vec<Url> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl NodeMgmtClient for ScriptedProbe {
    async fn get(&self, url: &Url) -> Result<(), health::Error> {
        self.calls.lock().unwrap().push(url.clone());
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(health::Error::UnhealthyStatus {
                url: url.clone(),
                status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
            })
        }
    }
}

/// A datacenter named `dc1` in cluster `cluster1` with the given size and racks.
pub fn datacenter(size: u16, racks: &[&str]) -> DseDatacenter {
    let mut datacenter: DseDatacenter = serde_yaml::from_str(indoc! {r#"
        apiVersion: datastax.com/v1alpha1
        kind: DseDatacenter
        metadata:
          name: dc1
          namespace: default
          uid: 8d4c5d4e-5b57-4a5e-9a24-3f0a9b5a1c11
        spec:
          clusterName: cluster1
          size: 0
          config:
            cassandra-yaml:
              num_tokens: 16
    "#})
    .unwrap();
    datacenter.spec.size = size;
    datacenter.spec.racks = racks
        .iter()
        .map(|name| dse_operator::crd::DseRack {
            name: (*name).to_owned(),
        })
        .collect();
    datacenter
}

/// The StatefulSet of `rack` running the desired configuration.
pub fn rack_stateful_set(
    datacenter: &DseDatacenter,
    rack: &str,
    replicas: i32,
    ready_replicas: i32,
) -> StatefulSet {
    let config = config_drift::desired_config(datacenter).unwrap();
    let mut stateful_set = build_rack_stateful_set(datacenter, rack, replicas, config).unwrap();
    stateful_set.status = Some(StatefulSetStatus {
        replicas,
        ready_replicas: Some(ready_replicas),
        ..StatefulSetStatus::default()
    });
    stateful_set
}

pub fn pod_name(datacenter: &DseDatacenter, rack: &str, ordinal: i32) -> String {
    format!("{}-{ordinal}", datacenter.stateful_set_name(rack))
}

pub fn claim_name(pod_name: &str) -> String {
    format!("{DATA_VOLUME_NAME}-{pod_name}")
}

/// A labeled pod of `rack`, with a config volume and a data volume claim.
pub fn rack_pod(datacenter: &DseDatacenter, rack: &str, ordinal: i32, seed: bool) -> Pod {
    let name = pod_name(datacenter, rack, ordinal);
    let mut pod_labels = labels::rack_labels(datacenter, rack);
    if seed {
        pod_labels.insert(SEED_NODE_LABEL.to_owned(), "true".to_owned());
    }

    Pod {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: Some(NAMESPACE.to_owned()),
            labels: Some(pod_labels),
            ..ObjectMeta::default()
        },
        spec: Some(PodSpec {
            volumes: Some(vec![
                Volume {
                    name: "server-config".to_owned(),
                    empty_dir: Some(EmptyDirVolumeSource::default()),
                    ..Volume::default()
                },
                Volume {
                    name: DATA_VOLUME_NAME.to_owned(),
                    persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                        claim_name: claim_name(&name),
                        read_only: None,
                    }),
                    ..Volume::default()
                },
            ]),
            ..PodSpec::default()
        }),
        ..Pod::default()
    }
}

pub fn rack_claim(datacenter: &DseDatacenter, rack: &str, pod_name: &str) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(claim_name(pod_name)),
            namespace: Some(NAMESPACE.to_owned()),
            labels: Some(labels::rack_labels(datacenter, rack)),
            ..ObjectMeta::default()
        },
        ..PersistentVolumeClaim::default()
    }
}

/// A store in which every rack of `datacenter` runs exactly as desired.
pub fn converged_store(datacenter: &DseDatacenter) -> InMemoryStore {
    let store = InMemoryStore::default();

    let mut datacenter = datacenter.clone();
    datacenter.labels_mut().insert(
        OPERATOR_PROGRESS_LABEL.to_owned(),
        ProgressState::Ready.to_string(),
    );
    store.insert(&datacenter);

    let plan =
        rack_plan::calculate_rack_information(datacenter.effective_size(), &datacenter.spec.racks)
            .unwrap();
    for rack in &plan {
        store.insert(&rack_stateful_set(
            &datacenter,
            &rack.rack_name,
            rack.node_count,
            rack.node_count,
        ));
        store.insert(
            &dse_operator::builder::pdb::build_rack_pod_disruption_budget(
                &datacenter,
                &rack.rack_name,
            )
            .unwrap(),
        );
        for ordinal in 0..rack.node_count {
            let pod = rack_pod(&datacenter, &rack.rack_name, ordinal, ordinal < rack.seed_count);
            store.insert(&rack_claim(&datacenter, &rack.rack_name, &pod.name_any()));
            store.insert(&pod);
        }
    }

    store
}

/// Runs one reconciliation of the datacenter as currently stored.
pub async fn apply(
    store: &InMemoryStore,
    probe: &ScriptedProbe,
) -> Result<ReconcileFunctionAction, racks::Error> {
    let datacenter = store
        .get::<DseDatacenter>("dc1")
        .expect("datacenter is stored");
    let options = ReconcileOptions::default();
    let context = ReconciliationContext::new(store, probe, &datacenter, &options);
    ReconcileRacks::new(context)?.apply().await
}

pub fn requeue() -> ReconcileFunctionAction {
    ReconcileFunctionAction::Requeue(ReconcileOptions::default().requeue_delay)
}

pub fn progress(store: &InMemoryStore) -> Option<String> {
    store
        .get::<DseDatacenter>("dc1")
        .and_then(|datacenter| datacenter.labels().get(OPERATOR_PROGRESS_LABEL).cloned())
}

pub fn replicas_of(store: &InMemoryStore, name: &str) -> Option<i32> {
    store
        .get::<StatefulSet>(name)
        .and_then(|stateful_set| stateful_set.spec)
        .and_then(|spec| spec.replicas)
}

pub fn pod_disruption_budget(store: &InMemoryStore, name: &str) -> Option<PodDisruptionBudget> {
    store.get(name)
}
