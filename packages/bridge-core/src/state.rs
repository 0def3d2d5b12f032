//! Runtime configuration for the bridge.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::events::OverflowPolicy;
use crate::protocol_constants::{
    DEFAULT_QUEUE_CAPACITY, SSDP_ALL, SSDP_PORT, WS_HEARTBEAT_CHECK_INTERVAL_SECS,
    WS_HEARTBEAT_TIMEOUT_SECS,
};
use crate::ssdp::SsdpConfig;

/// Invalid configuration value.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A value that must be positive is zero.
    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    /// Search target is empty.
    #[error("search_target must not be empty")]
    EmptySearchTarget,

    /// SSDP MX outside the 1-5 range allowed by UPnP.
    #[error("ssdp_mx must be between 1 and 5, got {0}")]
    InvalidMx(u64),

    /// Heartbeat check runs less often than the timeout it enforces.
    #[error(
        "ws_heartbeat_check_interval_secs ({check}) must not exceed ws_heartbeat_timeout_secs ({timeout})"
    )]
    HeartbeatInterval { check: u64, timeout: u64 },
}

/// Configuration for the UPnP bridge.
///
/// All fields have sensible defaults.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    // Server
    /// Address the HTTP/WS server binds to.
    pub bind_address: IpAddr,

    /// Port for the HTTP/WS server (0 = ephemeral).
    pub port: u16,

    /// Browser origins allowed by CORS. Empty allows any origin.
    pub trusted_origins: Vec<String>,

    // Discovery
    /// SSDP search target (ST) sent in M-SEARCH.
    pub search_target: String,

    /// Interval between search rounds (seconds).
    pub search_interval_secs: u64,

    /// Number of M-SEARCH packets to send per round.
    pub ssdp_send_count: u64,

    /// Delay between M-SEARCH packet retries (milliseconds).
    pub ssdp_retry_delay_ms: u64,

    /// MX header value (seconds devices may wait before responding).
    pub ssdp_mx: u64,

    /// Port the multicast listener binds to.
    pub ssdp_listen_port: u16,

    /// IPv4 interfaces to discover on. Empty means auto-detect.
    pub interfaces: Vec<Ipv4Addr>,

    /// Interval between expiry sweeps (seconds).
    pub sweep_interval_secs: u64,

    // Broadcast
    /// Per-connection outbound queue capacity.
    pub queue_capacity: usize,

    /// What to do when a connection's queue is full.
    pub overflow_policy: OverflowPolicy,

    // WebSocket
    /// WebSocket heartbeat timeout (seconds).
    pub ws_heartbeat_timeout_secs: u64,

    /// Interval between WebSocket heartbeat checks (seconds).
    pub ws_heartbeat_check_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 49500,
            trusted_origins: Vec::new(),
            search_target: SSDP_ALL.to_string(),
            search_interval_secs: 30,
            ssdp_send_count: 3,
            ssdp_retry_delay_ms: 800,
            ssdp_mx: 2,
            ssdp_listen_port: SSDP_PORT,
            interfaces: Vec::new(),
            sweep_interval_secs: 5,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            overflow_policy: OverflowPolicy::DropOldest,
            ws_heartbeat_timeout_secs: WS_HEARTBEAT_TIMEOUT_SECS,
            ws_heartbeat_check_interval_secs: WS_HEARTBEAT_CHECK_INTERVAL_SECS,
        }
    }
}

impl Config {
    /// Checks values that would otherwise fail at runtime.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.search_target.trim().is_empty() {
            return Err(ConfigError::EmptySearchTarget);
        }
        let positive = [
            ("search_interval_secs", self.search_interval_secs),
            ("ssdp_send_count", self.ssdp_send_count),
            ("sweep_interval_secs", self.sweep_interval_secs),
            ("queue_capacity", self.queue_capacity as u64),
            ("ws_heartbeat_timeout_secs", self.ws_heartbeat_timeout_secs),
            (
                "ws_heartbeat_check_interval_secs",
                self.ws_heartbeat_check_interval_secs,
            ),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, v)| *v == 0) {
            return Err(ConfigError::Zero(*name));
        }
        if !(1..=5).contains(&self.ssdp_mx) {
            return Err(ConfigError::InvalidMx(self.ssdp_mx));
        }
        if self.ws_heartbeat_check_interval_secs > self.ws_heartbeat_timeout_secs {
            return Err(ConfigError::HeartbeatInterval {
                check: self.ws_heartbeat_check_interval_secs,
                timeout: self.ws_heartbeat_timeout_secs,
            });
        }
        Ok(())
    }

    pub fn search_interval(&self) -> Duration {
        Duration::from_secs(self.search_interval_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.ws_heartbeat_timeout_secs)
    }

    pub fn heartbeat_check_interval(&self) -> Duration {
        Duration::from_secs(self.ws_heartbeat_check_interval_secs)
    }

    /// Builds the SSDP engine settings from this configuration.
    pub fn ssdp_config(&self) -> SsdpConfig {
        SsdpConfig {
            send_count: self.ssdp_send_count,
            retry_delay: Duration::from_millis(self.ssdp_retry_delay_ms),
            mx: self.ssdp_mx,
            listen_ip: Ipv4Addr::UNSPECIFIED,
            listen_port: self.ssdp_listen_port,
            interfaces: self.interfaces.clone(),
            ..SsdpConfig::default()
        }
    }
}
