use clap::Parser;
use kube::Client;
use tracing::info;

use hpa_operator::{
    config::{Cli, init_tracing},
    controller::{self, Context},
    error::Error,
};

#[tokio::main]
async fn main() -> Result<(), Error> {
    let cli = Cli::parse();
    init_tracing(cli.log_format, "info");

    let synthesizer = cli.annotations.synthesizer()?;

    let client = Client::try_default()
        .await
        .expect("failed to create kube Client");

    let ctx = Context::new(client, synthesizer, cli.watch_namespace);

    info!(
        schema = %ctx.reconciler.synthesizer().schema().version(),
        domain = ctx.reconciler.synthesizer().schema().names().domain,
        version = env!("CARGO_PKG_VERSION"),
        "starting hpa-operator"
    );
    controller::run(ctx).await
}
