//! Upload hashed customer identifiers to Customer Match user lists.
use anyhow::{anyhow, bail, Error};
use clap::Parser;
use envconfig::Envconfig;
use match_common::metrics::{serve, setup_metrics_router};
use match_uploader::cli::Cli;
use match_uploader::config::Config;
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::EnvFilter;

fn setup_tracing() {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    setup_tracing();

    let cli = Cli::parse();
    let config =
        Config::init_from_env().map_err(|error| anyhow!("invalid configuration: {error}"))?;

    if let Some(bind) = config.metrics_bind() {
        let router = setup_metrics_router()?;
        info!(%bind, "serving metrics");
        tokio::task::spawn(async move {
            if let Err(error) = serve(router, &bind).await {
                error!(%error, "failed to serve metrics");
            }
        });
    }

    if !cli.run(&config).await? {
        bail!("customer match upload did not succeed");
    }

    Ok(())
}
