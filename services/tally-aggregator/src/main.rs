use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use tally_aggregator::api::{create_router, AppState};
use tally_aggregator::config::{AggregatorConfig, ConfigError};
use tally_aggregator::coordinator::RefreshCoordinator;
use tally_aggregator::geo::GeoJsonFileProvider;
use tally_aggregator::source;
use tally_aggregator::summary::{JsonFileSummary, NoSummary, SummaryStore};
use tally_aggregator::SERVICE_VERSION;

#[derive(Parser, Clone, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Opt {
    /// JSON config file. Flags below override its values.
    #[clap(long, env = "TALLY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Address for the HTTP surface (e.g., "0.0.0.0:8080")
    #[clap(long, env = "TALLY_BIND_ADDR")]
    pub bind_addr: Option<SocketAddr>,

    /// Seconds between timer refreshes, 5 to 60
    #[clap(long, env = "TALLY_REFRESH_INTERVAL_SECS")]
    pub refresh_interval_secs: Option<u64>,

    #[clap(long, env = "TALLY_GEOMETRY_PATH")]
    pub geometry_path: Option<PathBuf>,

    #[clap(long, env = "TALLY_SUMMARY_PATH")]
    pub summary_path: Option<PathBuf>,
}

impl Opt {
    fn into_config(self) -> Result<AggregatorConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => AggregatorConfig::from_file(path)?,
            None => AggregatorConfig::default(),
        };

        if let Some(bind_addr) = self.bind_addr {
            config.bind_addr = bind_addr;
        }
        if let Some(secs) = self.refresh_interval_secs {
            config.refresh_interval_secs = secs;
        }
        if let Some(path) = self.geometry_path {
            config.geometry_path = path;
        }
        if self.summary_path.is_some() {
            config.summary_path = self.summary_path;
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_file(true)
        .with_line_number(true)
        .init();

    let config = Opt::parse().into_config()?;
    info!(
        version = SERVICE_VERSION,
        refresh_interval_secs = config.refresh_interval_secs,
        geometry = %config.geometry_path.display(),
        "Starting tally aggregator"
    );

    let (producer, source) = source::channel(config.channel());
    let geometry = Arc::new(GeoJsonFileProvider::new(
        config.geometry_path.clone(),
        config.geometry_name_property.clone(),
    ));
    let summary: Arc<dyn SummaryStore> = match &config.summary_path {
        Some(path) => Arc::new(JsonFileSummary::new(path.clone())),
        None => {
            warn!("No summary store configured; snapshots will be degraded");
            Arc::new(NoSummary)
        }
    };

    let coordinator = Arc::new(RefreshCoordinator::new(
        Arc::new(source),
        geometry,
        summary,
        config.coordinator(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = tokio::spawn(Arc::clone(&coordinator).run_scheduler(config.refresh_interval(), shutdown_rx));

    let app = create_router(AppState::new(coordinator, producer));
    let listener = TcpListener::bind(config.bind_addr).await?;
    info!("Listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Receiver may already be gone if the scheduler exited on its own
    let _ = shutdown_tx.send(true);
    scheduler.await?;

    info!("Tally aggregator stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(err) => {
            error!(error = %err, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    }
}
