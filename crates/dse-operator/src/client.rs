//! Access to the Kubernetes resources the operator reads and writes.
//!
//! The reconciliation logic only talks to [`ResourceStore`], which [`Client`]
//! implements on top of a [`kube::Client`].
use std::{collections::BTreeMap, fmt::Debug};

use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use kube::{
    Api, Resource, ResourceExt,
    api::{ListParams, PostParams},
};
use serde::{Serialize, de::DeserializeOwned};
use snafu::{OptionExt, ResultExt, Snafu};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("failed to get {kind} {name:?} in namespace {namespace:?}"))]
    GetResource {
        source: kube::Error,
        kind: String,
        name: String,
        namespace: String,
    },

    #[snafu(display("failed to create {kind} {name:?}"))]
    CreateResource {
        source: kube::Error,
        kind: String,
        name: String,
    },

    #[snafu(display("failed to update {kind} {name:?}"))]
    UpdateResource {
        source: kube::Error,
        kind: String,
        name: String,
    },

    #[snafu(display("failed to list {kind} matching {selector:?} in namespace {namespace:?}"))]
    ListResources {
        source: kube::Error,
        kind: String,
        selector: String,
        namespace: String,
    },

    #[snafu(display("object is missing key {key:?}"))]
    MissingObjectKey { key: &'static str },
}

/// Namespaced Kubernetes objects the store can read and write.
pub trait StoredResource:
    Clone
    + Debug
    + DeserializeOwned
    + Serialize
    + Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Send
    + Sync
    + 'static
{
}

impl<T> StoredResource for T where
    T: Clone
        + Debug
        + DeserializeOwned
        + Serialize
        + Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Send
        + Sync
        + 'static
{
}

/// Read and write access to namespaced resources.
///
/// Every call goes to the backing store, nothing is cached between calls.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Retrieves a single resource, returning [`None`] if it does not exist.
    async fn get_opt<T: StoredResource>(&self, name: &str, namespace: &str) -> Result<Option<T>>;

    /// Creates a new resource in the namespace set in its metadata.
    async fn create<T: StoredResource>(&self, resource: &T) -> Result<T>;

    /// Replaces an existing resource.
    ///
    /// The write is rejected if the resource changed since it was read.
    async fn update<T: StoredResource>(&self, resource: &T) -> Result<T>;

    /// Lists all resources in `namespace` carrying every label in `selector`.
    async fn list_with_label_selector<T: StoredResource>(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<T>>;
}

/// Formats a label map as an equality-based label selector, e.g. `a=b,c=d`.
pub fn label_selector_string(selector: &BTreeMap<String, String>) -> String {
    selector
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join(",")
}

fn kind<T: Resource<DynamicType = ()>>() -> String {
    T::kind(&()).into_owned()
}

/// This `Client` can be used to access Kubernetes.
/// It wraps an underlying [`kube::Client`] and implements [`ResourceStore`].
#[derive(Clone)]
pub struct Client {
    client: kube::Client,
    post_params: PostParams,
}

impl Client {
    pub fn new(client: kube::Client, field_manager: Option<String>) -> Self {
        Self {
            client,
            post_params: PostParams {
                field_manager,
                ..PostParams::default()
            },
        }
    }

    pub fn get_api<T>(&self, namespace: &str) -> Api<T>
    where
        T: Resource<DynamicType = (), Scope = NamespaceResourceScope>,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    pub fn get_all_api<T>(&self) -> Api<T>
    where
        T: Resource<DynamicType = ()>,
    {
        Api::all(self.client.clone())
    }
}

#[async_trait]
impl ResourceStore for Client {
    async fn get_opt<T: StoredResource>(&self, name: &str, namespace: &str) -> Result<Option<T>> {
        self.get_api::<T>(namespace)
            .get_opt(name)
            .await
            .context(GetResourceSnafu {
                kind: kind::<T>(),
                name,
                namespace,
            })
    }

    async fn create<T: StoredResource>(&self, resource: &T) -> Result<T> {
        let namespace = resource
            .namespace()
            .context(MissingObjectKeySnafu { key: "namespace" })?;
        self.get_api::<T>(&namespace)
            .create(&self.post_params, resource)
            .await
            .context(CreateResourceSnafu {
                kind: kind::<T>(),
                name: resource.name_any(),
            })
    }

    async fn update<T: StoredResource>(&self, resource: &T) -> Result<T> {
        let namespace = resource
            .namespace()
            .context(MissingObjectKeySnafu { key: "namespace" })?;
        let name = resource
            .meta()
            .name
            .as_deref()
            .context(MissingObjectKeySnafu { key: "name" })?;
        self.get_api::<T>(&namespace)
            .replace(name, &self.post_params, resource)
            .await
            .context(UpdateResourceSnafu {
                kind: kind::<T>(),
                name,
            })
    }

    async fn list_with_label_selector<T: StoredResource>(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<T>> {
        let selector = label_selector_string(selector);
        let list_params = ListParams::default().labels(&selector);
        self.get_api::<T>(namespace)
            .list(&list_params)
            .await
            .map(|list| list.items)
            .context(ListResourcesSnafu {
                kind: kind::<T>(),
                selector,
                namespace,
            })
    }
}
