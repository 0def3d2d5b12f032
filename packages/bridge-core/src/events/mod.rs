//! Event system for real-time client communication.
//!
//! This module provides:
//! - [`EventEmitter`] trait the registry publishes through
//! - [`BroadcastDispatcher`] fanning events out to WebSocket connections
//! - [`OutboundQueue`] bounded per-connection queue with overflow policy
//! - [`DiscoveryEvent`], the wire type sent to clients

mod dispatcher;
mod emitter;
mod queue;

pub use dispatcher::BroadcastDispatcher;
pub use emitter::{EventEmitter, NoopEventEmitter};
pub use queue::{OutboundQueue, OverflowPolicy, PushOutcome};

use serde::{Deserialize, Serialize};

use crate::registry::DeviceRecord;

/// A change in the set of discovered devices.
///
/// Serialized as one JSON object per WebSocket frame, tagged by `kind`:
///
/// ```json
/// {"kind":"added","deviceId":"uuid:1","usn":"...","location":"...", ...}
/// {"kind":"removed","deviceId":"uuid:1","reason":"byebye"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum DiscoveryEvent {
    /// A device was seen for the first time.
    Added(DeviceRecord),
    /// A known device re-announced itself.
    Updated(DeviceRecord),
    /// A device left or expired.
    Removed {
        #[serde(rename = "deviceId")]
        device_id: String,
        reason: RemovalReason,
    },
}

impl DiscoveryEvent {
    /// Returns the device this event concerns.
    pub fn device_id(&self) -> &str {
        match self {
            Self::Added(r) | Self::Updated(r) => &r.device_id,
            Self::Removed { device_id, .. } => device_id,
        }
    }
}

/// Why a device was removed from the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RemovalReason {
    /// The device sent `ssdp:byebye`.
    Byebye,
    /// The advertised max-age elapsed without a refresh.
    Expired,
}
