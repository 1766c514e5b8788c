use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use rtms_collector::config::SERVICE_KEY_ENV;
use rtms_collector::{logging, Config, RegionTable};

mod routes;

#[derive(Parser)]
#[command(version, about = "HTTP front end for the RTMS apartment trade collector")]
struct Cli {
    #[arg(long)]
    config: Option<PathBuf>,
    /// Overrides server.bind from the config
    #[arg(long)]
    bind: Option<SocketAddr>,
    /// Used when a request carries no service_key of its own
    #[arg(long, env = SERVICE_KEY_ENV, hide_env_values = true)]
    service_key: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_tracing("info")?;

    let cli = Cli::parse();
    let config = Config::discover(cli.config.as_deref())?;
    let bind = cli.bind.unwrap_or(config.server.bind);

    let regions = RegionTable::load_or_empty(&config.dataset);
    info!(
        "{0} districts loaded from {1}",
        regions.len(),
        config.dataset.path.display()
    );
    let state = routes::AppState::new(config, regions, cli.service_key)?;

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("binding {bind}"))?;
    info!("listening on {bind}");
    axum::serve(listener, routes::router(state)).await?;
    Ok(())
}
