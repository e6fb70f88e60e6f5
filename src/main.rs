use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{info, warn};

use bookline::collab::InMemoryDirectory;
use bookline::http;
use bookline::provider::ProviderManager;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let metrics_port: Option<u16> = std::env::var("BOOKLINE_METRICS_PORT")
        .ok()
        .and_then(|s| s.parse().ok());
    bookline::observability::init(metrics_port);

    let port = std::env::var("BOOKLINE_PORT").unwrap_or_else(|_| "8080".into());
    let bind = std::env::var("BOOKLINE_BIND").unwrap_or_else(|_| "0.0.0.0".into());
    let data_dir = std::env::var("BOOKLINE_DATA_DIR").unwrap_or_else(|_| "./data".into());
    let directory_file =
        std::env::var("BOOKLINE_DIRECTORY_FILE").unwrap_or_else(|_| "./directory.json".into());
    let compact_threshold: u64 = std::env::var("BOOKLINE_COMPACT_THRESHOLD")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(1000);

    std::fs::create_dir_all(&data_dir)?;

    let directory = if Path::new(&directory_file).exists() {
        Arc::new(InMemoryDirectory::load(Path::new(&directory_file))?)
    } else {
        warn!("directory file {directory_file} not found, starting with no providers");
        Arc::new(InMemoryDirectory::new())
    };
    info!("loaded {} providers from {directory_file}", directory.provider_count());

    let manager = Arc::new(ProviderManager::new(
        PathBuf::from(&data_dir),
        compact_threshold,
        directory.clone(),
        directory,
    ));
    manager.open_all().await;

    let addr = format!("{bind}:{port}");
    let listener = TcpListener::bind(&addr).await?;
    info!("bookline listening on {addr}");
    info!("  data_dir: {data_dir}");
    info!(
        "  metrics: {}",
        metrics_port.map_or("disabled".to_string(), |p| format!(
            "http://0.0.0.0:{p}/metrics"
        ))
    );

    axum::serve(listener, http::router(manager))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("bookline stopped");
    Ok(())
}

/// Resolve on SIGTERM or ctrl-c; in-flight requests drain before exit.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
    info!("shutdown signal received");
}
