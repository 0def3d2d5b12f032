//! UDP socket setup for SSDP.
//!
//! Two kinds of sockets are used:
//!
//! - **Listener**: bound to the SSDP port and joined to the multicast group
//!   on every usable interface. Receives `NOTIFY` announcements.
//! - **Search**: one per interface on an ephemeral port. Sends `M-SEARCH`
//!   and receives the unicast `200 OK` replies, which devices send back to
//!   the source address/port of the search.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use local_ip_address::list_afinet_netifas;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;

use crate::protocol_constants::{SSDP_MULTICAST_IPV4, SSDP_MULTICAST_TTL};

use super::types::{is_virtual_interface, DiscoveryError, DiscoveryResult, InterfaceInfo};

/// Gets all usable network interfaces for discovery.
///
/// Filters out virtual/container interfaces and loopback.
pub fn get_interfaces() -> Vec<InterfaceInfo> {
    list_afinet_netifas()
        .unwrap_or_else(|e| {
            log::warn!("[SSDP] Failed to list network interfaces: {}", e);
            Vec::new()
        })
        .into_iter()
        .filter_map(|(name, addr)| {
            if is_virtual_interface(&name) {
                log::debug!("[SSDP] Skipping virtual interface: {}", name);
                return None;
            }
            match addr {
                IpAddr::V4(ip) if !ip.is_loopback() => {
                    log::debug!("[SSDP] Using interface {} ({})", name, ip);
                    Some(InterfaceInfo { name, ip })
                }
                _ => None,
            }
        })
        .collect()
}

/// Resolves the interfaces to use: explicit addresses when configured,
/// otherwise everything [`get_interfaces`] reports.
pub fn resolve_interfaces(explicit: &[Ipv4Addr]) -> Vec<InterfaceInfo> {
    if explicit.is_empty() {
        return get_interfaces();
    }
    explicit
        .iter()
        .map(|ip| InterfaceInfo {
            name: ip.to_string(),
            ip: *ip,
        })
        .collect()
}

/// Creates a UDP socket with the options every SSDP socket shares.
///
/// - SO_REUSEADDR for rapid restarts and coexistence with other SSDP stacks
/// - SO_REUSEPORT on Unix
/// - Multicast TTL of 4 per UPnP spec
fn new_udp_socket(label: &str) -> DiscoveryResult<Socket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .map_err(DiscoveryError::SocketBind)?;

    if let Err(e) = socket.set_reuse_address(true) {
        log::warn!("[SSDP] Failed to set SO_REUSEADDR on {}: {}", label, e);
    }

    #[cfg(unix)]
    if let Err(e) = socket.set_reuse_port(true) {
        log::warn!("[SSDP] Failed to set SO_REUSEPORT on {}: {}", label, e);
    }

    if let Err(e) = socket.set_multicast_ttl_v4(SSDP_MULTICAST_TTL) {
        log::warn!("[SSDP] Failed to set multicast TTL on {}: {}", label, e);
    }

    socket
        .set_nonblocking(true)
        .map_err(DiscoveryError::SocketBind)?;

    Ok(socket)
}

fn into_tokio(socket: Socket) -> DiscoveryResult<UdpSocket> {
    let std_socket: std::net::UdpSocket = socket.into();
    UdpSocket::from_std(std_socket).map_err(DiscoveryError::SocketBind)
}

/// Creates the multicast listener socket.
///
/// Binding failure is fatal. Joining is attempted on each interface and a
/// failure on one is only logged; failing on all of them is fatal. With no
/// interfaces the group is joined on `INADDR_ANY` and the OS picks one.
pub fn create_listener_socket(
    bind_ip: Ipv4Addr,
    port: u16,
    interfaces: &[InterfaceInfo],
) -> DiscoveryResult<UdpSocket> {
    let bind_addr = SocketAddr::new(IpAddr::V4(bind_ip), port);
    let socket = new_udp_socket(&bind_addr.to_string())?;

    socket
        .bind(&bind_addr.into())
        .map_err(DiscoveryError::SocketBind)?;

    let join_ips: Vec<Ipv4Addr> = if interfaces.is_empty() {
        vec![Ipv4Addr::UNSPECIFIED]
    } else {
        interfaces.iter().map(|i| i.ip).collect()
    };

    let mut joined = 0usize;
    for iface_ip in &join_ips {
        match socket.join_multicast_v4(&SSDP_MULTICAST_IPV4, iface_ip) {
            Ok(()) => {
                log::debug!(
                    "[SSDP] Joined {} on interface {}",
                    SSDP_MULTICAST_IPV4,
                    iface_ip
                );
                joined += 1;
            }
            Err(e) => {
                log::warn!(
                    "[SSDP] Failed to join {} on interface {}: {}",
                    SSDP_MULTICAST_IPV4,
                    iface_ip,
                    e
                );
            }
        }
    }

    if joined == 0 {
        return Err(DiscoveryError::MulticastJoin);
    }

    into_tokio(socket)
}

/// Creates a search socket bound to a specific interface on an ephemeral port.
pub fn create_search_socket(iface_ip: Ipv4Addr) -> DiscoveryResult<UdpSocket> {
    let bind_addr = SocketAddr::new(IpAddr::V4(iface_ip), 0);
    let socket = new_udp_socket(&iface_ip.to_string())?;

    if !iface_ip.is_unspecified() {
        if let Err(e) = socket.set_multicast_if_v4(&iface_ip) {
            log::warn!(
                "[SSDP] Failed to set multicast interface {}: {}",
                iface_ip,
                e
            );
        }
    }

    socket
        .bind(&bind_addr.into())
        .map_err(DiscoveryError::SocketBind)?;

    into_tokio(socket)
}
