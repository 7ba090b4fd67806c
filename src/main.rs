use std::net::{IpAddr, SocketAddr};
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use event_booker::{config::Config, services::ReconciliationScheduler, AppState};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    let json_logs = config.app.is_production();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&config.app.rust_log))
        .with(json_logs.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json_logs).then(|| tracing_subscriber::fmt::layer()))
        .init();

    info!("Starting Event Booker API");

    let state = AppState::connect(&config).await?;

    // --- Start background tasks ---

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = ReconciliationScheduler::new(state.engine.clone(), &config.booking)
        .start(shutdown_rx);

    // --- Start the web server ---

    let app = event_booker::router(state).layer(TraceLayer::new_for_http());

    let host: IpAddr = config.app.host.parse()?;
    let addr = SocketAddr::new(host, config.app.port);
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    shutdown_tx.send(true).ok();
    if let Err(e) = scheduler.await {
        error!("Scheduler task ended abnormally: {:?}", e);
    }
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {:?}", e);
    }
}
