//! UPnP Bridge Core - shared library for the UPnP bridge.
//!
//! This crate discovers UPnP/DLNA devices on the local network with SSDP
//! and republishes their presence to WebSocket clients. It is used by the
//! headless `upnp-bridge` server.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`ssdp`]: Multicast discovery engine and datagram parser
//! - [`registry`]: In-memory device table with expiry
//! - [`events`]: Discovery events, emitter trait and broadcast dispatcher
//! - [`api`]: HTTP/WebSocket server and connection management
//! - [`services`]: Background services (expiry sweeper)
//! - [`playlist`]: Ordered playlist container with row notifications
//! - [`state`]: Configuration
//! - [`error`]: Centralized error types
//!
//! # Data flow
//!
//! `SsdpEngine` → `DeviceRegistry` → `BroadcastDispatcher` (via
//! [`EventEmitter`](events::EventEmitter)) → per-connection
//! `OutboundQueue` → WebSocket send loop.

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod api;
pub mod bootstrap;
pub mod error;
pub mod events;
pub mod playlist;
pub mod protocol_constants;
pub mod registry;
pub mod services;
pub mod ssdp;
pub mod state;
pub mod utils;

// Re-export commonly used types at the crate root
pub use error::{BridgeError, BridgeResult, OverflowError, TransportWriteError};
pub use events::{
    BroadcastDispatcher, DiscoveryEvent, EventEmitter, NoopEventEmitter, OutboundQueue,
    OverflowPolicy, RemovalReason,
};
pub use registry::{DeviceAnnouncement, DeviceRecord, DeviceRegistry};
pub use ssdp::{DiscoveryError, ParseError, SsdpConfig, SsdpEngine};
pub use state::{Config, ConfigError};
pub use utils::now_millis;

// Re-export playlist types
pub use playlist::{PlaylistItem, PlaylistModel, PlaylistObserver, Role, RoleValue};

// Re-export bootstrap types
pub use bootstrap::{bootstrap_services, BootstrappedServices};

// Re-export API types
pub use api::{bind, serve, AppState, ConnectionId, ServerError, WsConnectionManager};
