//! pxgate server assembly.
//!
//! Provides a reusable [`serve`] function used by both the binary and the
//! integration tests: it seeds the store from configuration, starts the
//! background loggers, wires the gateway routes behind key authentication,
//! and shuts everything down gracefully on cancellation.

#![deny(missing_docs)]

mod auth;
mod health;
mod seed;

use std::{net::SocketAddr, sync::Arc};

use axum::{Router, routing::get};
use config::Config;
use gateway::{Gateway, LastUsedTracker, RequestLogger};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

pub use seed::build_store;

use crate::auth::AuthLayer;

/// Configuration for serving pxgate.
pub struct ServeConfig {
    /// The socket address (IP and port) the server will bind to.
    pub listen_address: SocketAddr,
    /// The deserialized pxgate TOML configuration.
    pub config: Config,
    /// Cancellation token for graceful shutdown.
    pub shutdown_signal: CancellationToken,
    /// The version string to log on startup.
    pub version: String,
    /// Optional oneshot sender to send back the bound address (useful if
    /// port 0 was specified).
    pub bound_addr_sender: Option<tokio::sync::oneshot::Sender<SocketAddr>>,
}

/// Starts and runs the pxgate server with the provided configuration.
pub async fn serve(
    ServeConfig {
        listen_address,
        config,
        shutdown_signal,
        version,
        bound_addr_sender,
    }: ServeConfig,
) -> anyhow::Result<()> {
    log::info!("pxgate {version}");

    let store = build_store(&config).await?;

    if let Some(url) = &config.pricing.url {
        match gateway::fetch_pricing(&reqwest::Client::new(), url.as_str()).await {
            Ok(updates) => {
                let applied = store.apply_pricing(&updates).await;
                log::info!("pricing sync applied {applied} of {} entries", updates.len());
            }
            Err(error) => log::warn!("pricing sync failed, keeping configured prices: {error}"),
        }
    }

    let logger = RequestLogger::new(store.clone(), &config.request_log);
    let tracker = Arc::new(LastUsedTracker::new(store.clone(), &config.last_used));

    let gateway = Arc::new(Gateway::new(&config, store.clone(), logger.handle()));

    let app = Router::new()
        .merge(gateway::router(gateway).layer(AuthLayer::new(store.clone(), tracker.clone())))
        .route("/health", get(health::health));

    let listener = TcpListener::bind(&listen_address).await?;
    let bound_addr = listener.local_addr()?;

    if let Some(sender) = bound_addr_sender {
        let _ = sender.send(bound_addr);
    }

    log::info!("listening on {bound_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal.cancelled_owned())
        .await?;

    log::info!("shutting down, flushing request logs");

    tracker.close().await;
    logger.close().await;

    Ok(())
}
