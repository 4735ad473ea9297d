//! # routegate
//!
//! Configuration-driven HTTP gateway. Routes, auth schemes and request
//! schemas come from a routes file; business logic comes from the handler
//! catalog compiled into this binary.

mod handlers;
mod watcher;

use anyhow::{bail, Context};
use clap::Parser;
use routegate_core::auth::Authenticator;
use routegate_core::configurator::Configurator;
use routegate_core::middleware::LoggingMiddleware;
use routegate_core::server::{Gateway, Server, ServerConfig};
use routegate_core::settings::GatewaySettings;
use routegate_core::storage::{QueryExecutor, Storage};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use watcher::RouteWatcher;

/// Command-line options
#[derive(Debug, Parser)]
#[command(name = "routegate", version, about = "Configuration-driven HTTP request gateway")]
struct Cli {
    /// Settings file (server, auth, database)
    #[arg(long, value_name = "FILE")]
    settings: Option<PathBuf>,

    /// Routes file
    #[arg(long, value_name = "FILE", default_value = "config/routes.json")]
    routes: PathBuf,

    /// Reload the routes file when it changes
    #[arg(long)]
    watch: bool,

    /// Human-readable logs instead of JSON
    #[arg(long)]
    pretty: bool,
}

fn init_tracing(pretty: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("routegate=info"))?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = if pretty {
        builder.pretty().try_init()
    } else {
        builder.json().try_init()
    };
    result.map_err(|e| anyhow::anyhow!("installing tracing subscriber: {e}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.pretty)?;

    let settings = match &cli.settings {
        Some(path) => GatewaySettings::load(path).with_context(|| format!("loading settings from {}", path.display()))?,
        None => {
            warn!("No settings file given; using defaults");
            GatewaySettings::default()
        }
    };

    let storage = match &settings.database {
        Some(db) => Some(Arc::new(Storage::connect(db).await.context("connecting to the database")?)),
        None => {
            warn!("No database configured; storage-backed handlers will fail");
            None
        }
    };
    let executor = storage.clone().map(|s| s as Arc<dyn QueryExecutor>);

    let configurator = Arc::new(Configurator::new(handlers::catalog(executor)));
    let report = configurator
        .load_file(&cli.routes)
        .with_context(|| format!("loading routes from {}", cli.routes.display()))?;
    if !report.is_ready() {
        bail!("no valid routes in {}", cli.routes.display());
    }

    let _watcher = if cli.watch {
        Some(RouteWatcher::new(&cli.routes, configurator.clone()).run()?)
    } else {
        None
    };

    let authenticator = Authenticator::from_settings(&settings.auth).context("configuring authentication")?;
    let gateway = Gateway::new(configurator, authenticator).with_middleware(LoggingMiddleware::new());
    let server = Server::new(ServerConfig::from_settings(&settings.server)?, gateway);

    server.serve().await?;

    if let Some(storage) = storage {
        storage.close().await;
    }
    info!("Server stopped");
    Ok(())
}
