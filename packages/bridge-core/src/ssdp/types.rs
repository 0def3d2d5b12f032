//! Shared types for SSDP discovery.

use std::net::Ipv4Addr;

use thiserror::Error;

/// Errors that can occur while starting or running discovery.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Failed to bind or configure a UDP socket for discovery.
    #[error("failed to bind UDP socket: {0}")]
    SocketBind(#[source] std::io::Error),

    /// Failed to join the SSDP multicast group on any interface.
    #[error("failed to join SSDP multicast group on any interface")]
    MulticastJoin,

    /// Failed to send SSDP multicast search.
    #[error("failed to send SSDP search: {0}")]
    SendSearch(#[source] std::io::Error),

    /// No usable network interfaces found.
    #[error("no usable network interfaces found")]
    NoInterfaces,

    /// Search interval must be greater than zero.
    #[error("search interval must be greater than zero")]
    InvalidInterval,
}

/// Convenient Result alias for discovery operations.
pub type DiscoveryResult<T> = Result<T, DiscoveryError>;

/// Errors produced while parsing a single SSDP datagram.
///
/// These never leave the engine: a datagram that fails to parse is logged
/// and dropped, and the receive loop carries on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// Datagram is not valid UTF-8.
    #[error("datagram is not valid UTF-8")]
    NotUtf8,

    /// Datagram has no start line.
    #[error("empty datagram")]
    Empty,

    /// Start line is not NOTIFY, M-SEARCH, or an HTTP 200 response.
    #[error("unrecognised start line: {0:?}")]
    UnknownStartLine(String),

    /// A header required for this message type is absent.
    #[error("missing required header: {0}")]
    MissingHeader(&'static str),

    /// CACHE-CONTROL has no usable max-age directive.
    #[error("invalid CACHE-CONTROL max-age: {0:?}")]
    InvalidMaxAge(String),

    /// NTS is neither alive, update, nor byebye.
    #[error("unknown notification sub-type: {0:?}")]
    UnknownNotificationType(String),
}

/// Network interface used for multicast membership and searches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceInfo {
    /// Interface name (e.g., "en0", "eth0").
    pub name: String,
    /// IPv4 address bound to this interface.
    pub ip: Ipv4Addr,
}

/// Virtual interface prefixes to filter out during discovery.
pub const VIRTUAL_INTERFACE_PREFIXES: &[&str] = &[
    "lo", "docker", "veth", "br-", "virbr", "vmnet", "vbox", "tun", "tap",
];

/// Checks if an interface name belongs to a virtual/container interface.
pub fn is_virtual_interface(name: &str) -> bool {
    let name_lower = name.to_lowercase();
    VIRTUAL_INTERFACE_PREFIXES
        .iter()
        .any(|prefix| name_lower.starts_with(prefix))
}
