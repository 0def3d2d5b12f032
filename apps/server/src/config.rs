//! Server configuration.
//!
//! Supports loading from YAML files with environment variable overrides.

use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use upnp_bridge_core::OverflowPolicy;

/// Server configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind the HTTP/WS server to.
    /// Override: `UPNP_BRIDGE_BIND_ADDRESS`
    pub bind_address: IpAddr,

    /// Port to bind the HTTP/WS server to.
    /// Override: `UPNP_BRIDGE_PORT`
    pub port: u16,

    /// SSDP search target, e.g. `ssdp:all` or a device type URN.
    /// Override: `UPNP_BRIDGE_SEARCH_TARGET`
    pub search_target: String,

    /// Interval in seconds between M-SEARCH rounds.
    /// Override: `UPNP_BRIDGE_SEARCH_INTERVAL`
    pub search_interval_secs: u64,

    /// Number of M-SEARCH packets per round.
    pub ssdp_send_count: u64,

    /// Delay between M-SEARCH packets (milliseconds).
    pub ssdp_retry_delay_ms: u64,

    /// MX header value.
    pub ssdp_mx: u64,

    /// IPv4 interfaces to discover on. Empty means auto-detect.
    pub interfaces: Vec<Ipv4Addr>,

    /// Interval in seconds between expiry sweeps.
    pub sweep_interval_secs: u64,

    /// Per-connection outbound queue capacity.
    pub queue_capacity: usize,

    /// `drop_oldest` or `disconnect`.
    pub overflow_policy: OverflowPolicy,

    /// Close WebSocket clients idle for this many seconds.
    pub ws_heartbeat_timeout_secs: u64,

    /// Browser origins allowed by CORS. Empty allows any origin.
    pub trusted_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let core = upnp_bridge_core::Config::default();
        Self {
            bind_address: core.bind_address,
            port: core.port,
            search_target: core.search_target,
            search_interval_secs: core.search_interval_secs,
            ssdp_send_count: core.ssdp_send_count,
            ssdp_retry_delay_ms: core.ssdp_retry_delay_ms,
            ssdp_mx: core.ssdp_mx,
            interfaces: core.interfaces,
            sweep_interval_secs: core.sweep_interval_secs,
            queue_capacity: core.queue_capacity,
            overflow_policy: core.overflow_policy,
            ws_heartbeat_timeout_secs: core.ws_heartbeat_timeout_secs,
            trusted_origins: core.trusted_origins,
        }
    }
}

impl ServerConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    ///
    /// Unparseable values are ignored with a warning.
    fn apply_env_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(val) = var("UPNP_BRIDGE_BIND_ADDRESS") {
            match val.parse() {
                Ok(addr) => self.bind_address = addr,
                Err(_) => log::warn!("Ignoring invalid UPNP_BRIDGE_BIND_ADDRESS: {}", val),
            }
        }

        if let Some(val) = var("UPNP_BRIDGE_PORT") {
            match val.parse() {
                Ok(port) => self.port = port,
                Err(_) => log::warn!("Ignoring invalid UPNP_BRIDGE_PORT: {}", val),
            }
        }

        if let Some(val) = var("UPNP_BRIDGE_SEARCH_TARGET") {
            if !val.trim().is_empty() {
                self.search_target = val;
            }
        }

        if let Some(val) = var("UPNP_BRIDGE_SEARCH_INTERVAL") {
            match val.parse() {
                Ok(interval) => self.search_interval_secs = interval,
                Err(_) => log::warn!("Ignoring invalid UPNP_BRIDGE_SEARCH_INTERVAL: {}", val),
            }
        }
    }

    /// Converts to upnp-bridge-core's Config type.
    pub fn to_core_config(&self) -> upnp_bridge_core::Config {
        let defaults = upnp_bridge_core::Config::default();
        upnp_bridge_core::Config {
            bind_address: self.bind_address,
            port: self.port,
            trusted_origins: self.trusted_origins.clone(),
            search_target: self.search_target.clone(),
            search_interval_secs: self.search_interval_secs,
            ssdp_send_count: self.ssdp_send_count,
            ssdp_retry_delay_ms: self.ssdp_retry_delay_ms,
            ssdp_mx: self.ssdp_mx,
            interfaces: self.interfaces.clone(),
            sweep_interval_secs: self.sweep_interval_secs,
            queue_capacity: self.queue_capacity,
            overflow_policy: self.overflow_policy,
            ws_heartbeat_timeout_secs: self.ws_heartbeat_timeout_secs,
            ws_heartbeat_check_interval_secs: defaults
                .ws_heartbeat_check_interval_secs
                .min(self.ws_heartbeat_timeout_secs),
            ..defaults
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn load_without_file_uses_defaults() {
        let config = ServerConfig::load(None).unwrap();
        assert_eq!(config.search_target, "ssdp:all");
        assert_eq!(config.ssdp_send_count, 3);
        assert_eq!(config.overflow_policy, OverflowPolicy::DropOldest);
    }

    #[test]
    fn yaml_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "port: 8080\n\
             search_target: urn:schemas-upnp-org:device:MediaRenderer:1\n\
             overflow_policy: disconnect\n\
             interfaces:\n  - 192.168.1.10"
        )
        .unwrap();

        let config = ServerConfig::load(Some(file.path())).unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(
            config.search_target,
            "urn:schemas-upnp-org:device:MediaRenderer:1"
        );
        assert_eq!(config.overflow_policy, OverflowPolicy::Disconnect);
        assert_eq!(config.interfaces, vec![Ipv4Addr::new(192, 168, 1, 10)]);
        assert_eq!(config.search_interval_secs, 30);
    }

    #[test]
    fn invalid_yaml_reports_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "port: not-a-port").unwrap();

        let err = ServerConfig::load(Some(file.path())).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }

    #[test]
    fn env_overrides_apply_and_bad_values_are_ignored() {
        let mut config = ServerConfig::default();
        config.apply_env_overrides(env(&[
            ("UPNP_BRIDGE_BIND_ADDRESS", "127.0.0.1"),
            ("UPNP_BRIDGE_PORT", "not-a-number"),
            ("UPNP_BRIDGE_SEARCH_TARGET", "upnp:rootdevice"),
            ("UPNP_BRIDGE_SEARCH_INTERVAL", "10"),
        ]));

        assert_eq!(config.bind_address, IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(config.port, 49500);
        assert_eq!(config.search_target, "upnp:rootdevice");
        assert_eq!(config.search_interval_secs, 10);
    }

    #[test]
    fn core_config_is_valid_with_short_heartbeat() {
        let config = ServerConfig {
            ws_heartbeat_timeout_secs: 2,
            ..Default::default()
        };
        let core = config.to_core_config();
        assert_eq!(core.ws_heartbeat_check_interval_secs, 2);
        assert_eq!(core.validate(), Ok(()));
    }
}
