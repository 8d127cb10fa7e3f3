use clap::Parser;
use dse_operator::{
    cli::{Command, RunArguments},
    client::Client,
    controller,
    crd::{self, APP_NAME, DseDatacenter, OPERATOR_NAME},
    logging,
};
use snafu::{ResultExt, Snafu};

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("failed to print the CRD"))]
    PrintCrd { source: crd::Error },

    #[snafu(display("failed to initialize logging"))]
    InitializeLogging { source: logging::Error },

    #[snafu(display("failed to create the Kubernetes client"))]
    CreateKubeClient { source: kube::Error },

    #[snafu(display("controller failed"))]
    RunController { source: controller::Error },
}

#[derive(Parser)]
#[clap(about, author, version)]
struct Opts {
    #[clap(subcommand)]
    cmd: Command,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let opts = Opts::parse();
    match opts.cmd {
        Command::Crd => DseDatacenter::print_yaml_schema().context(PrintCrdSnafu)?,
        Command::Run(arguments) => run(arguments).await?,
    }
    Ok(())
}

async fn run(arguments: RunArguments) -> Result<(), Error> {
    logging::initialize_logging("DSE_OPERATOR_LOG", APP_NAME).context(InitializeLoggingSnafu)?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        watch_namespace = ?arguments.watch_namespace,
        "Starting DSE operator"
    );

    let kube_client = kube::Client::try_default()
        .await
        .context(CreateKubeClientSnafu)?;
    let client = Client::new(kube_client, Some(OPERATOR_NAME.to_owned()));

    controller::run(
        client,
        arguments.watch_namespace.clone(),
        arguments.reconcile_options(),
        arguments.health_probe_timeout(),
    )
    .await
    .context(RunControllerSnafu)
}
