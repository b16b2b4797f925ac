mod broadcast;
mod error;
mod routes;
mod state;

use pulse_data::{
    cache::ChartCache,
    candle::{HistoricalSource, hyperliquid::HyperliquidClient},
    clock::{Clock, SystemClock},
    config::PulseConfig,
    feed::client::FeedClient,
    ingest::IngestionController,
    series::SeriesBook,
};
use state::AppState;
use std::{sync::Arc, time::Duration};
use tokio::{net::TcpListener, sync::broadcast as tokio_broadcast};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    init_logging();

    let config = PulseConfig::from_env();
    info!(
        feed = %config.feed.url,
        info_url = %config.info_url,
        http_addr = %config.http_addr,
        ws_addr = %config.ws_addr,
        "starting pulse-data server"
    );

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let source: Arc<dyn HistoricalSource> = Arc::new(HyperliquidClient::new(
        config.info_url.clone(),
        config.cache.fetch_timeout,
    ));

    // Live ingestion
    let book = SeriesBook::new();
    let ingest = IngestionController::new(
        config.ingest.clone(),
        book.clone(),
        Arc::clone(&source),
        Arc::clone(&clock),
        config.cache.fetch_timeout,
    );
    let snapshots = ingest.snapshots();
    let fills = ingest.fills();
    let (feed, events) = FeedClient::new(config.feed.clone()).start();
    tokio::spawn(ingest.run(feed, events));

    // Snapshot broadcaster
    let (snapshot_tx, _) = tokio_broadcast::channel(config.ws_buffer_size);
    tokio::spawn(broadcast::forward_snapshots(snapshots.clone(), snapshot_tx.clone()));
    tokio::spawn(broadcast::start_websocket_server(
        config.ws_addr,
        snapshot_tx,
        snapshots.clone(),
    ));

    // Chart cache
    let cache = ChartCache::new(source, Arc::clone(&clock), config.cache.clone());
    spawn_retention_sweep(cache.clone(), config.cache.retention);

    let state = AppState::new(cache, book, snapshots, fills, clock);
    let app = routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let listener = match TcpListener::bind(config.http_addr).await {
        Ok(listener) => listener,
        Err(error) => {
            error!(addr = %config.http_addr, %error, "failed to bind HTTP server");
            return;
        }
    };

    info!(addr = %config.http_addr, "HTTP API listening");
    if let Err(error) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!(%error, "HTTP server failed");
    }

    info!("pulse-data server stopped");
}

/// Periodically drop chart cache entries older than the retention period.
fn spawn_retention_sweep(cache: ChartCache, retention: Duration) {
    let period = (retention / 2).max(Duration::from_secs(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            cache.evict_expired();
        }
    });
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        error!(%error, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received, stopping");
}

/// Initialize logging. `LOG_FORMAT=json` switches to JSON lines.
fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let json = std::env::var("LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
