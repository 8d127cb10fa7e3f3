//! Command line interface of the operator, built with `clap`.
//!
//! ```no_run
//! use clap::Parser;
//! use dse_operator::cli;
//!
//! #[derive(clap::Parser)]
//! struct Opts {
//!     #[clap(subcommand)]
//!     command: cli::Command,
//! }
//!
//! let opts = Opts::parse();
//! match opts.command {
//!     cli::Command::Crd => {
//!         // Print CRD objects
//!     }
//!     cli::Command::Run(cli::RunArguments { watch_namespace, .. }) => {
//!         // Run the operator
//!     }
//! }
//! ```
use std::time::Duration;

use clap::Parser;

use crate::{health::DEFAULT_MANAGEMENT_API_PORT, namespace::WatchNamespace, reconcile::ReconcileOptions};

#[derive(Debug, PartialEq, Eq, Parser)]
pub enum Command {
    /// Print CRD objects.
    Crd,

    /// Run the operator.
    Run(RunArguments),
}

#[derive(Debug, PartialEq, Eq, Parser)]
#[command(long_about = "")]
pub struct RunArguments {
    /// Provides a specific namespace to watch (instead of watching all namespaces)
    #[arg(long, env, default_value = "")]
    pub watch_namespace: WatchNamespace,

    /// Delay in seconds before a datacenter is reconciled again after a change or while waiting
    #[arg(long, env, default_value_t = 10)]
    pub requeue_delay_seconds: u64,

    /// Timeout in seconds for a single cluster health probe
    #[arg(long, env, default_value_t = 10)]
    pub health_probe_timeout_seconds: u64,

    /// Port of the DSE management API on every DSE pod
    #[arg(long, env, default_value_t = DEFAULT_MANAGEMENT_API_PORT)]
    pub management_api_port: u16,
}

impl RunArguments {
    pub fn reconcile_options(&self) -> ReconcileOptions {
        ReconcileOptions {
            requeue_delay: Duration::from_secs(self.requeue_delay_seconds),
            management_api_port: self.management_api_port,
        }
    }

    pub fn health_probe_timeout(&self) -> Duration {
        Duration::from_secs(self.health_probe_timeout_seconds)
    }
}
