//! HTTP/WebSocket API layer.
//!
//! This module contains thin handlers over the registry and the
//! dispatcher. It provides the router construction and server startup.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::events::BroadcastDispatcher;
use crate::registry::DeviceRegistry;
use crate::ssdp::SsdpEngine;
use crate::state::Config;

pub mod http;
pub mod ws;
pub mod ws_connection;

pub use ws_connection::{ConnectionGuard, ConnectionId, ConnectionState, WsConnectionManager};

/// Errors that can occur when starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind the listening socket.
    #[error("Failed to bind to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The accept loop failed.
    #[error("Server error: {0}")]
    Serve(#[source] std::io::Error),
}

/// Shared application state for the API layer.
///
/// This is a thin wrapper that holds references to services.
#[derive(Clone)]
pub struct AppState {
    /// Live device table.
    pub registry: Arc<DeviceRegistry>,
    /// Fans discovery events out to connections.
    pub dispatcher: Arc<BroadcastDispatcher>,
    /// Manages WebSocket connections.
    pub ws_manager: Arc<WsConnectionManager>,
    /// Discovery engine, reported by `/health`.
    pub ssdp: Option<Arc<SsdpEngine>>,
    /// Application configuration.
    pub config: Arc<Config>,
    started_at: Instant,
}

impl AppState {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        dispatcher: Arc<BroadcastDispatcher>,
        ws_manager: Arc<WsConnectionManager>,
        ssdp: Option<Arc<SsdpEngine>>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            registry,
            dispatcher,
            ws_manager,
            ssdp,
            config,
            started_at: Instant::now(),
        }
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Returns whether the discovery engine is running.
    pub fn discovery_running(&self) -> bool {
        self.ssdp.as_ref().is_some_and(|e| e.is_running())
    }
}

/// Opens the listening socket. Port 0 picks an ephemeral port.
pub async fn bind(address: IpAddr, port: u16) -> Result<TcpListener, ServerError> {
    let addr = SocketAddr::new(address, port);
    TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })
}

/// Serves the API on `listener` until `shutdown` is cancelled.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: CancellationToken,
) -> Result<(), ServerError> {
    if let Ok(addr) = listener.local_addr() {
        log::info!("[Server] Listening on http://{}", addr);
    }
    let app = http::create_router(state);

    // Use into_make_service_with_connect_info to enable ConnectInfo<SocketAddr> extraction
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { shutdown.cancelled().await })
    .await
    .map_err(ServerError::Serve)
}
