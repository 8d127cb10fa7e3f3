//! Building blocks for reconcilers that run as a chain of checks.
//!
//! Every check returns a [`ReconcileFunctionAction`]. The chain moves on to the
//! next check only on [`ReconcileFunctionAction::Continue`], any other action
//! ends the current reconciliation.
use std::{future::Future, time::Duration};

use crate::{
    client::ResourceStore,
    crd::DseDatacenter,
    health::{DEFAULT_MANAGEMENT_API_PORT, NodeMgmtClient},
};

pub mod racks;

pub type ReconcileResult<E> = std::result::Result<ReconcileFunctionAction, E>;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReconcileFunctionAction {
    /// Run the next function in the reconciler chain
    Continue,

    /// Skip the remaining reconciler chain
    Done,

    /// Skip the remaining reconciler chain and queue this object again
    Requeue(Duration),
}

impl ReconcileFunctionAction {
    /// Runs `next` if this action is [`ReconcileFunctionAction::Continue`], otherwise keeps this action.
    ///
    /// `next` is only polled when it is run, so it can be constructed eagerly.
    pub async fn then<E>(
        self,
        next: impl Future<Output = ReconcileResult<E>>,
    ) -> ReconcileResult<E> {
        match self {
            ReconcileFunctionAction::Continue => next.await,
            action => Ok(action),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReconcileOptions {
    /// Delay before an object is looked at again after a change or while waiting.
    pub requeue_delay: Duration,

    /// Port of the DSE management API on every pod.
    pub management_api_port: u16,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            requeue_delay: Duration::from_secs(10),
            management_api_port: DEFAULT_MANAGEMENT_API_PORT,
        }
    }
}

/// Everything a single reconciliation of a [`DseDatacenter`] has access to.
pub struct ReconciliationContext<'a, S, M> {
    pub store: &'a S,
    pub node_mgmt: &'a M,
    pub datacenter: &'a DseDatacenter,
    pub options: &'a ReconcileOptions,
}

impl<'a, S, M> ReconciliationContext<'a, S, M>
where
    S: ResourceStore,
    M: NodeMgmtClient,
{
    pub fn new(
        store: &'a S,
        node_mgmt: &'a M,
        datacenter: &'a DseDatacenter,
        options: &'a ReconcileOptions,
    ) -> Self {
        Self {
            store,
            node_mgmt,
            datacenter,
            options,
        }
    }

    pub fn requeue(&self) -> ReconcileFunctionAction {
        ReconcileFunctionAction::Requeue(self.options.requeue_delay)
    }
}
