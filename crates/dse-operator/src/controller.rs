//! Runs [`ReconcileRacks`] for every `DseDatacenter` using [`kube::runtime::Controller`].
use std::{sync::Arc, time::Duration};

use futures::StreamExt;
use k8s_openapi::api::apps::v1::StatefulSet;
use kube::runtime::{Controller, controller::Action, watcher};
use snafu::{ResultExt, Snafu};

use crate::{
    client::Client,
    crd::DseDatacenter,
    health::{self, HttpNodeMgmtClient},
    logging::controller::report_controller_reconciled,
    namespace::WatchNamespace,
    reconcile::{
        ReconcileFunctionAction, ReconcileOptions, ReconciliationContext,
        racks::{self, ReconcileRacks},
    },
};

pub const CONTROLLER_NAME: &str = "dsedatacenter";

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to create the management API client"))]
    CreateNodeMgmtClient { source: health::Error },
}

pub struct Ctx {
    pub client: Client,
    pub node_mgmt: HttpNodeMgmtClient,
    pub options: ReconcileOptions,
}

pub async fn reconcile(datacenter: Arc<DseDatacenter>, ctx: Arc<Ctx>) -> Result<Action, racks::Error> {
    tracing::info!("Starting reconcile");

    let context =
        ReconciliationContext::new(&ctx.client, &ctx.node_mgmt, &datacenter, &ctx.options);
    let action = ReconcileRacks::new(context)?.apply().await?;

    Ok(match action {
        ReconcileFunctionAction::Requeue(delay) => Action::requeue(delay),
        ReconcileFunctionAction::Continue | ReconcileFunctionAction::Done => {
            Action::await_change()
        }
    })
}

pub fn error_policy(_datacenter: Arc<DseDatacenter>, _error: &racks::Error, ctx: Arc<Ctx>) -> Action {
    Action::requeue(ctx.options.requeue_delay)
}

/// Watches `DseDatacenter`s and the StatefulSets they own until a termination signal arrives.
pub async fn run(
    client: Client,
    watch_namespace: WatchNamespace,
    options: ReconcileOptions,
    health_probe_timeout: Duration,
) -> Result<(), Error> {
    let node_mgmt =
        HttpNodeMgmtClient::new(health_probe_timeout).context(CreateNodeMgmtClientSnafu)?;

    let datacenters = watch_namespace.get_api::<DseDatacenter>(&client);
    let stateful_sets = watch_namespace.get_api::<StatefulSet>(&client);

    Controller::new(datacenters, watcher::Config::default())
        .owns(stateful_sets, watcher::Config::default())
        .shutdown_on_signal()
        .run(
            reconcile,
            error_policy,
            Arc::new(Ctx {
                client,
                node_mgmt,
                options,
            }),
        )
        .for_each(|result| async move {
            report_controller_reconciled(CONTROLLER_NAME, &result);
        })
        .await;

    Ok(())
}
