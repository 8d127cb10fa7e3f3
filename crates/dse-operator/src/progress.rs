//! The coarse progress marker kept on every `DseDatacenter`.
//!
//! Any stage about to change the datacenter marks it [`ProgressState::Updating`];
//! a reconciliation that finds nothing left to do marks it [`ProgressState::Ready`].
use kube::ResourceExt;
use snafu::{ResultExt, Snafu};
use strum::{Display, EnumString};

use crate::{
    client::{self, ResourceStore},
    crd::DseDatacenter,
};

pub const OPERATOR_PROGRESS_LABEL: &str = "datastax.com/operator-progress";

#[derive(Clone, Copy, Debug, Display, EnumString, Eq, PartialEq)]
pub enum ProgressState {
    Updating,
    Ready,
}

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to mark datacenter as {state}"))]
    UpdateProgress {
        source: client::Error,
        state: ProgressState,
    },
}

/// The progress currently recorded on `datacenter`, if any.
pub fn operator_progress(datacenter: &DseDatacenter) -> Option<ProgressState> {
    datacenter
        .labels()
        .get(OPERATOR_PROGRESS_LABEL)
        .and_then(|value| value.parse().ok())
}

/// Records `state` on `datacenter`.
///
/// The datacenter is only written if the recorded state differs.
pub async fn set_operator_progress(
    store: &impl ResourceStore,
    datacenter: &DseDatacenter,
    state: ProgressState,
) -> Result<(), Error> {
    if operator_progress(datacenter) == Some(state) {
        return Ok(());
    }

    let mut updated = datacenter.clone();
    updated
        .labels_mut()
        .insert(OPERATOR_PROGRESS_LABEL.to_owned(), state.to_string());

    tracing::debug!(%state, "updating operator progress");
    store.update(&updated).await.context(UpdateProgressSnafu { state })?;
    Ok(())
}
