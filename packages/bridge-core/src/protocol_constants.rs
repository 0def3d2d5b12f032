//! Fixed protocol constants that should NOT be changed.
//!
//! These values are defined by external specifications (UPnP Device
//! Architecture, SSDP) or are part of the wire contract with bridge clients.

use std::net::Ipv4Addr;

// ─────────────────────────────────────────────────────────────────────────────
// SSDP (Simple Service Discovery Protocol)
// ─────────────────────────────────────────────────────────────────────────────

/// SSDP multicast group (UPnP Device Architecture 1.0, section 1).
pub const SSDP_MULTICAST_IPV4: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);

/// Standard SSDP port.
pub const SSDP_PORT: u16 = 1900;

/// Value of the HOST header for every SSDP request, regardless of the
/// actual destination address.
pub const SSDP_HOST: &str = "239.255.255.250:1900";

/// Multicast TTL recommended by UPnP 1.0 for SSDP traffic.
pub const SSDP_MULTICAST_TTL: u32 = 4;

/// Search target matching every device and service.
pub const SSDP_ALL: &str = "ssdp:all";

/// NTS value announcing a device.
pub const NTS_ALIVE: &str = "ssdp:alive";

/// NTS value announcing a device is leaving.
pub const NTS_BYEBYE: &str = "ssdp:byebye";

/// NTS value for a boot-id update (UPnP 1.1). Treated as an alive.
pub const NTS_UPDATE: &str = "ssdp:update";

/// Receive buffer size for SSDP datagrams. A datagram that fills it is
/// treated as truncated and dropped.
pub const SSDP_MAX_DATAGRAM: usize = 8192;

// ─────────────────────────────────────────────────────────────────────────────
// Application Identity
// ─────────────────────────────────────────────────────────────────────────────

/// Service identifier reported by the health endpoint.
///
/// Clients probe `/health` and expect this exact string.
pub const SERVICE_ID: &str = "upnp-bridge";

/// Product token used in the M-SEARCH `USER-AGENT` header.
pub const USER_AGENT_PRODUCT: &str = "UPnPBridge";

// ─────────────────────────────────────────────────────────────────────────────
// Bridge Transport
// ─────────────────────────────────────────────────────────────────────────────

/// Default bound on each connection's outbound queue (messages).
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// WebSocket heartbeat timeout (seconds).
pub const WS_HEARTBEAT_TIMEOUT_SECS: u64 = 60;

/// Interval between WebSocket heartbeat checks (seconds).
pub const WS_HEARTBEAT_CHECK_INTERVAL_SECS: u64 = 5;
