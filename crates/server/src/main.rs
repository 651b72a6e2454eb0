use clap::Parser;
use tracing::info;

use tollgate_server::{app, bootstrap, config::ServerConfig, telemetry};

/// Tollgate: an OpenAI-compatible AI gateway with budgets, routing,
/// and a tamper-evident ledger.
#[derive(Debug, Parser)]
#[command(name = "tollgate-server", version)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, short)]
    config: Option<String>,

    /// Override the listen address from the config.
    #[arg(long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    telemetry::init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ServerConfig::from_path(path)?,
        None => ServerConfig::default(),
    };
    if let Some(listen) = args.listen {
        config.listen = listen;
    }
    let listen = config.listen.clone();

    let state = bootstrap::build_state(config).await?;
    let router = app(state);

    let listener = tokio::net::TcpListener::bind(&listen).await?;
    info!(%listen, "tollgate listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;
    Ok(())
}
