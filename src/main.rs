use anyhow::Context;
use parking_vision::aggregator::ZoneAggregator;
use parking_vision::config::ParkingConfig;
use parking_vision::server::{self, AppState};
use parking_vision::supervisor::ZoneSupervisor;
use parking_vision::zone_store::ZoneStateStore;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG_PATH: &str = "parking.toml";

fn main() -> anyhow::Result<()> {
    // --- 1. Logging & Configuration ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let config = ParkingConfig::from_file(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    // --- 2. Runtime ---
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get())
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    let grace = config.stop_grace();
    let result = runtime.block_on(run(config));

    // Zone loops that missed the grace period are still blocked in a frame read.
    runtime.shutdown_timeout(grace);
    result
}

async fn run(config: ParkingConfig) -> anyhow::Result<()> {
    // --- 3. Collaborators & Zone Loops ---
    let store = ZoneStateStore::new();
    let directory = Arc::new(config.zone_directory());
    let reservations = Arc::new(config.reservation_ledger());

    let supervisor = ZoneSupervisor::new(
        store.clone(),
        Arc::new(config.layout_provider()),
        Arc::new(config.frame_provider()),
        config.loop_config(),
    );
    for zone_id in config.sensor_zone_ids() {
        supervisor.start(zone_id);
    }

    let aggregator = ZoneAggregator::new(store, directory.clone(), reservations.clone())
        .with_display_offset(config.display_offset);
    let state = AppState {
        aggregator,
        directory,
        reservations,
    };

    // --- 4. HTTP Surface ---
    let bind_addr = config.effective_bind_addr();
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding {bind_addr}"))?;

    let shutdown = CancellationToken::new();
    let server = tokio::spawn(server::serve(listener, state, shutdown.clone()));

    // --- 5. Shutdown ---
    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("shutdown requested");
    shutdown.cancel();

    let report = supervisor.stop_all(config.stop_grace()).await;
    if !report.is_clean() {
        warn!(timed_out = ?report.timed_out, failed = ?report.failed, "some zone loops did not stop cleanly");
    }
    server.await.context("joining server task")??;
    Ok(())
}
