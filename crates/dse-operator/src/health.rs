//! Cluster health checks through the DSE management API.
//!
//! Before another node may join, every pod of the cluster has to confirm that
//! the cluster can still reach `LOCAL_QUORUM` with one replica per rack.
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use snafu::{OptionExt, ResultExt, Snafu, ensure};
use url::Url;

use crate::{client::ResourceStore, crd::DseDatacenter, labels};

pub const DEFAULT_MANAGEMENT_API_PORT: u16 = 8080;
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

const CLUSTER_PROBE_PATH: &str = "/api/v0/probes/cluster";

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to build the management API HTTP client"))]
    BuildHttpClient { source: reqwest::Error },

    #[snafu(display("failed to send health probe to {url}"))]
    SendProbe { source: reqwest::Error, url: Url },

    #[snafu(display("health probe {url} answered with status {status}"))]
    UnhealthyStatus {
        url: Url,
        status: reqwest::StatusCode,
    },

    #[snafu(display("failed to construct health probe URL for pod {pod:?}"))]
    ProbeUrl {
        source: url::ParseError,
        pod: String,
    },

    #[snafu(display("object has no namespace"))]
    ObjectHasNoNamespace,
}

/// Talks to the management API of a single DSE node.
#[async_trait]
pub trait NodeMgmtClient: Send + Sync {
    /// Issues a GET request, any non-success answer is an error.
    async fn get(&self, url: &Url) -> Result<(), Error>;
}

/// [`NodeMgmtClient`] backed by [`reqwest`].
#[derive(Clone, Debug)]
pub struct HttpNodeMgmtClient {
    client: reqwest::Client,
}

impl HttpNodeMgmtClient {
    /// Every request is aborted after `timeout`, so a hung node cannot stall reconciliation.
    pub fn new(timeout: Duration) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context(BuildHttpClientSnafu)?;
        Ok(Self { client })
    }
}

#[async_trait]
impl NodeMgmtClient for HttpNodeMgmtClient {
    async fn get(&self, url: &Url) -> Result<(), Error> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .context(SendProbeSnafu { url: url.clone() })?;

        let status = response.status();
        ensure!(status.is_success(), UnhealthyStatusSnafu {
            url: url.clone(),
            status
        });
        Ok(())
    }
}

/// The cluster health probe of `pod_name`, reached through the datacenter service.
pub fn probe_url(datacenter: &DseDatacenter, pod_name: &str, port: u16) -> Result<Url, Error> {
    let namespace = datacenter.namespace().context(ObjectHasNoNamespaceSnafu)?;
    let mut url = Url::parse(&format!(
        "http://{pod_name}.{service}.{namespace}:{port}{CLUSTER_PROBE_PATH}",
        service = datacenter.service_name(),
    ))
    .context(ProbeUrlSnafu { pod: pod_name })?;

    url.query_pairs_mut()
        .append_pair("consistency_level", "LOCAL_QUORUM")
        .append_pair("rf_per_dc", &datacenter.spec.racks.len().to_string());
    Ok(url)
}

/// Returns whether every pod of the cluster reports a healthy cluster.
///
/// Failing to list pods and the first failing probe both count as unhealthy.
/// Probes are not retried, the next reconciliation asks again.
pub async fn is_cluster_healthy(
    store: &impl ResourceStore,
    node_mgmt: &impl NodeMgmtClient,
    datacenter: &DseDatacenter,
    management_api_port: u16,
) -> bool {
    let Some(namespace) = datacenter.namespace() else {
        tracing::warn!("datacenter has no namespace, treating cluster as unhealthy");
        return false;
    };

    let pods: Vec<Pod> = match store
        .list_with_label_selector(&namespace, &labels::cluster_labels(datacenter))
        .await
    {
        Ok(pods) => pods,
        Err(error) => {
            tracing::warn!(
                error = &error as &dyn std::error::Error,
                "failed to list cluster pods"
            );
            return false;
        }
    };

    for pod in &pods {
        let result = match probe_url(datacenter, &pod.name_any(), management_api_port) {
            Ok(url) => node_mgmt.get(&url).await,
            Err(error) => Err(error),
        };

        if let Err(error) = result {
            tracing::info!(
                pod = pod.name_any(),
                error = &error as &dyn std::error::Error,
                "cluster health probe failed"
            );
            return false;
        }
    }

    true
}
