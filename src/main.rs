use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use crudgate::authz::{loader, web, AccessControl, RuleRegistry};
use crudgate::errors::AppError;
use crudgate::settings::Settings;
use miette::Result;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    name = "crudgate",
    version,
    about = "Access-control decision service for CRUD channels"
)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // logging
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();

    let settings = Settings::load(&cli.config)?;
    tracing::info!(?settings, "Loaded configuration");

    let registry = match &settings.access_control.policies_dir {
        Some(dir) => loader::load_policies(dir).map_err(AppError::from)?,
        None => {
            tracing::warn!("No policies directory configured, every decision uses the defaults");
            RuleRegistry::empty()
        }
    };

    let access = Arc::new(AccessControl::new(
        Arc::new(registry),
        settings.access_control.policy_defaults(),
    ));
    let defaults = access.defaults();
    tracing::info!(
        block_inbound_by_default = defaults.block_inbound_by_default,
        block_outbound_by_default = defaults.block_outbound_by_default,
        evaluator_timeout = ?defaults.evaluator_timeout,
        resources = ?access.registry().resource_types(),
        "Access control ready"
    );

    serve(&settings, access).await?;
    Ok(())
}

async fn serve(settings: &Settings, access: Arc<AccessControl>) -> Result<(), AppError> {
    let addr: SocketAddr = settings
        .bind_address()
        .parse()
        .map_err(|_| AppError::BadAddress(settings.bind_address()))?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "Decision API listening");

    axum::serve(listener, web::router(access))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutting down");
}
