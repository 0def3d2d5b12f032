//! Application bootstrap and dependency wiring.
//!
//! This module contains the composition root - the single place where all
//! services are instantiated and wired together:
//!
//! ```text
//! SsdpEngine ─▶ DeviceRegistry ─▶ BroadcastDispatcher ─▶ OutboundQueue per connection
//!                     ▲                                          │
//!               ExpirySweeper                           WebSocket send loop
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::api::{self, AppState, WsConnectionManager};
use crate::error::BridgeResult;
use crate::events::BroadcastDispatcher;
use crate::registry::DeviceRegistry;
use crate::services::ExpirySweeper;
use crate::ssdp::SsdpEngine;
use crate::state::Config;

/// Upper bound on how long shutdown waits for background tasks.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Container for all bootstrapped services.
#[derive(Clone)]
pub struct BootstrappedServices {
    /// Validated configuration.
    pub config: Arc<Config>,
    /// Live device table.
    pub registry: Arc<DeviceRegistry>,
    /// Fans discovery events out to connections.
    pub dispatcher: Arc<BroadcastDispatcher>,
    /// Manages WebSocket connections.
    pub ws_manager: Arc<WsConnectionManager>,
    /// SSDP discovery engine.
    pub ssdp: Arc<SsdpEngine>,
    /// Tracks every background task for shutdown.
    pub tasks: TaskTracker,
    /// Cancellation token for graceful shutdown.
    pub cancel_token: CancellationToken,
}

impl BootstrappedServices {
    /// Starts discovery and the expiry sweeper.
    ///
    /// # Errors
    ///
    /// Fails if the SSDP sockets cannot be acquired.
    pub fn start_background_tasks(&self) -> BridgeResult<()> {
        self.ssdp
            .start(&self.config.search_target, self.config.search_interval())?;

        ExpirySweeper::new(Arc::clone(&self.registry), self.config.sweep_interval())
            .spawn(&self.tasks, self.cancel_token.child_token());

        Ok(())
    }

    /// Builds the state shared by HTTP and WebSocket handlers.
    pub fn app_state(&self) -> AppState {
        AppState::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.dispatcher),
            Arc::clone(&self.ws_manager),
            Some(Arc::clone(&self.ssdp)),
            Arc::clone(&self.config),
        )
    }

    /// Serves the API on an already-bound listener until shutdown.
    pub fn spawn_server(&self, listener: TcpListener) {
        let state = self.app_state();
        let shutdown = self.cancel_token.child_token();
        self.tasks.spawn(async move {
            if let Err(e) = api::serve(listener, state, shutdown).await {
                log::error!("[Server] {}", e);
            }
        });
    }

    /// Initiates graceful shutdown of all services.
    ///
    /// Stops discovery, closes every client connection and waits (bounded)
    /// for background tasks to exit.
    pub async fn shutdown(&self) {
        log::info!("[Bootstrap] Beginning graceful shutdown...");

        // Signal cancellation to all background tasks
        self.cancel_token.cancel();
        self.ssdp.stop();

        let connections_closed = self.ws_manager.close_all();
        if connections_closed > 0 {
            log::info!(
                "[Bootstrap] Closed {} WebSocket connection(s)",
                connections_closed
            );
        }

        self.tasks.close();
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, self.tasks.wait())
            .await
            .is_err()
        {
            log::warn!(
                "[Bootstrap] {} task(s) still running after {:?}",
                self.tasks.len(),
                SHUTDOWN_TIMEOUT
            );
        }

        log::info!("[Bootstrap] Shutdown complete");
    }
}

/// Wires up every service from `config`.
///
/// Nothing is started; call [`BootstrappedServices::start_background_tasks`]
/// and [`BootstrappedServices::spawn_server`] afterwards.
///
/// # Errors
///
/// Fails if `config` does not validate.
pub fn bootstrap_services(config: Config) -> BridgeResult<BootstrappedServices> {
    config.validate()?;
    let config = Arc::new(config);

    let tasks = TaskTracker::new();
    let cancel_token = CancellationToken::new();

    // The dispatcher is the registry's emitter; the connection manager
    // unsubscribes from it when connections close.
    let dispatcher = Arc::new(BroadcastDispatcher::new(
        config.queue_capacity,
        config.overflow_policy,
    ));
    let registry = Arc::new(DeviceRegistry::new(dispatcher.clone()));
    let ws_manager = Arc::new(WsConnectionManager::new(Arc::clone(&dispatcher)));

    let ssdp = Arc::new(SsdpEngine::new(
        Arc::clone(&registry),
        config.ssdp_config(),
        tasks.clone(),
        cancel_token.child_token(),
    ));

    log::debug!(
        "[Bootstrap] Services wired (queue_capacity={}, overflow_policy={:?})",
        config.queue_capacity,
        config.overflow_policy
    );

    Ok(BootstrappedServices {
        config,
        registry,
        dispatcher,
        ws_manager,
        ssdp,
        tasks,
        cancel_token,
    })
}
