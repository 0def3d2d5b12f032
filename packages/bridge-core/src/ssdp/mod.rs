//! SSDP discovery of UPnP devices.
//!
//! - [`message`]: datagram parsing and M-SEARCH construction
//! - [`socket`]: listener and search socket setup
//! - [`engine`]: receive and search loops feeding the registry

pub mod engine;
pub mod message;
pub mod socket;
pub mod types;

pub use engine::{handle_datagram, DatagramOutcome, SsdpConfig, SsdpEngine};
pub use message::{build_msearch_message, device_id_from_usn, parse_datagram, SsdpAnnouncement};
pub use types::{DiscoveryError, DiscoveryResult, InterfaceInfo, ParseError};
