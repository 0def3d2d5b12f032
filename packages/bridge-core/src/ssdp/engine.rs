//! SSDP discovery engine.
//!
//! Owns the discovery sockets and the tasks driving them:
//!
//! - one receive loop on the multicast listener (NOTIFY announcements)
//! - one receive loop per search socket (unicast search responses)
//! - one search loop sending M-SEARCH rounds on a repeating timer
//!
//! Every valid datagram is translated into a registry update. Malformed
//! datagrams are routine on a shared segment and are dropped at trace level.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::protocol_constants::{SSDP_MAX_DATAGRAM, SSDP_MULTICAST_IPV4, SSDP_PORT};
use crate::registry::DeviceRegistry;
use crate::utils::now_millis;

use super::message::{build_msearch_message, parse_datagram, SsdpAnnouncement};
use super::socket::{create_listener_socket, create_search_socket, resolve_interfaces};
use super::types::{DiscoveryError, DiscoveryResult, InterfaceInfo, ParseError};

/// Pause after a socket receive error before reading again.
const RECV_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Configuration for the SSDP engine.
#[derive(Debug, Clone)]
pub struct SsdpConfig {
    /// Number of M-SEARCH packets sent per search round.
    pub send_count: u64,
    /// Delay between M-SEARCH packets within a round.
    pub retry_delay: Duration,
    /// MX value (max response delay in seconds).
    pub mx: u64,
    /// Address the multicast listener binds to.
    pub listen_ip: Ipv4Addr,
    /// Port the multicast listener binds to.
    pub listen_port: u16,
    /// Interfaces to use. Empty means auto-detect.
    pub interfaces: Vec<Ipv4Addr>,
    /// Where M-SEARCH packets are sent. The SSDP multicast group by default.
    pub search_destination: SocketAddr,
}

impl Default for SsdpConfig {
    fn default() -> Self {
        Self {
            send_count: 3,
            retry_delay: Duration::from_millis(800),
            mx: 2,
            listen_ip: Ipv4Addr::UNSPECIFIED,
            listen_port: SSDP_PORT,
            interfaces: Vec::new(),
            search_destination: SocketAddr::from((SSDP_MULTICAST_IPV4, SSDP_PORT)),
        }
    }
}

/// What happened to a single received datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatagramOutcome {
    /// A device was added or refreshed.
    Alive(String),
    /// A device announced its departure.
    Byebye(String),
    /// Valid but uninteresting (foreign M-SEARCH, other search target).
    Ignored,
    /// Malformed; dropped without touching the registry.
    Dropped(ParseError),
}

/// Applies one datagram to the registry.
pub fn handle_datagram(
    registry: &DeviceRegistry,
    data: &[u8],
    src: SocketAddr,
    search_target: &str,
) -> DatagramOutcome {
    match parse_datagram(data, search_target) {
        Ok(Some(SsdpAnnouncement::Alive(announcement))) => {
            log::trace!(
                "[SSDP] alive from {}: {} ({})",
                src,
                announcement.device_id,
                announcement.device_type
            );
            let device_id = announcement.device_id.clone();
            registry.record_alive(announcement, now_millis());
            DatagramOutcome::Alive(device_id)
        }
        Ok(Some(SsdpAnnouncement::Byebye { device_id, .. })) => {
            log::trace!("[SSDP] byebye from {}: {}", src, device_id);
            registry.notify_byebye(&device_id);
            DatagramOutcome::Byebye(device_id)
        }
        Ok(None) => DatagramOutcome::Ignored,
        Err(e) => {
            log::trace!("[SSDP] Dropping datagram from {}: {}", src, e);
            DatagramOutcome::Dropped(e)
        }
    }
}

/// Drives UPnP discovery over multicast UDP.
pub struct SsdpEngine {
    registry: Arc<DeviceRegistry>,
    config: SsdpConfig,
    tasks: TaskTracker,
    parent_cancel: CancellationToken,
    /// Token for the current run; `None` while stopped.
    running: Mutex<Option<CancellationToken>>,
}

impl SsdpEngine {
    /// Creates a stopped engine.
    ///
    /// Tasks are spawned on `tasks` so shutdown can wait for them, and
    /// every run is cancelled when `parent_cancel` is.
    pub fn new(
        registry: Arc<DeviceRegistry>,
        config: SsdpConfig,
        tasks: TaskTracker,
        parent_cancel: CancellationToken,
    ) -> Self {
        Self {
            registry,
            config,
            tasks,
            parent_cancel,
            running: Mutex::new(None),
        }
    }

    /// Starts periodic discovery for `search_target`.
    ///
    /// Binds the listener, joins the multicast group, opens the search
    /// sockets and spawns the loops. Calling this while already running is
    /// a no-op. Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if `interval` is zero or if the sockets cannot be
    /// acquired. Nothing is left running on error.
    pub fn start(&self, search_target: &str, interval: Duration) -> DiscoveryResult<()> {
        self.start_on(search_target, interval, || self.open_sockets())
    }

    /// Opens the multicast listener and one search socket per interface.
    fn open_sockets(&self) -> DiscoveryResult<(UdpSocket, Vec<(InterfaceInfo, UdpSocket)>)> {
        let interfaces = resolve_interfaces(&self.config.interfaces);
        let listener =
            create_listener_socket(self.config.listen_ip, self.config.listen_port, &interfaces)?;

        let search_ifaces = if interfaces.is_empty() {
            vec![InterfaceInfo {
                name: "any".into(),
                ip: Ipv4Addr::UNSPECIFIED,
            }]
        } else {
            interfaces
        };

        let mut search_sockets = Vec::new();
        for iface in search_ifaces {
            match create_search_socket(iface.ip) {
                Ok(socket) => search_sockets.push((iface, socket)),
                Err(e) => {
                    log::warn!(
                        "[SSDP] Failed to create search socket for {} ({}): {}",
                        iface.name,
                        iface.ip,
                        e
                    );
                }
            }
        }
        if search_sockets.is_empty() {
            return Err(DiscoveryError::NoInterfaces);
        }

        Ok((listener, search_sockets))
    }

    /// Spawns the receive and search loops on sockets from `open`.
    ///
    /// `open` only runs when the engine is not already running.
    fn start_on(
        &self,
        search_target: &str,
        interval: Duration,
        open: impl FnOnce() -> DiscoveryResult<(UdpSocket, Vec<(InterfaceInfo, UdpSocket)>)>,
    ) -> DiscoveryResult<()> {
        if interval.is_zero() {
            return Err(DiscoveryError::InvalidInterval);
        }

        let mut running = self.running.lock();
        if running.as_ref().is_some_and(|t| !t.is_cancelled()) {
            log::debug!("[SSDP] start called while already running");
            return Ok(());
        }

        let (listener, search_sockets) = open()?;
        let search_sockets: Vec<(InterfaceInfo, Arc<UdpSocket>)> = search_sockets
            .into_iter()
            .map(|(iface, socket)| (iface, Arc::new(socket)))
            .collect();

        let cancel = self.parent_cancel.child_token();
        let target: Arc<str> = Arc::from(search_target);

        self.tasks.spawn(recv_loop(
            Arc::new(listener),
            "multicast".to_string(),
            Arc::clone(&self.registry),
            Arc::clone(&target),
            cancel.clone(),
        ));
        for (iface, socket) in &search_sockets {
            self.tasks.spawn(recv_loop(
                Arc::clone(socket),
                iface.name.clone(),
                Arc::clone(&self.registry),
                Arc::clone(&target),
                cancel.clone(),
            ));
        }

        let interface_names: Vec<_> = search_sockets
            .iter()
            .map(|(i, _)| format!("{} ({})", i.name, i.ip))
            .collect();
        log::info!(
            "[SSDP] Discovery started: target={}, interval={}s, interfaces={:?}",
            search_target,
            interval.as_secs(),
            interface_names
        );

        self.tasks.spawn(search_loop(
            search_sockets,
            build_msearch_message(search_target, self.config.mx),
            self.config.search_destination,
            SearchSchedule {
                interval,
                send_count: self.config.send_count,
                retry_delay: self.config.retry_delay,
            },
            cancel.clone(),
        ));

        *running = Some(cancel);
        Ok(())
    }

    /// Stops discovery. Idempotent.
    ///
    /// The loops observe cancellation and exit, dropping the sockets, which
    /// leaves the multicast group.
    pub fn stop(&self) {
        if let Some(token) = self.running.lock().take() {
            token.cancel();
            log::info!("[SSDP] Discovery stopped");
        }
    }

    /// Returns whether discovery is currently running.
    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .is_some_and(|t| !t.is_cancelled())
    }
}

impl Drop for SsdpEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn recv_loop(
    socket: Arc<UdpSocket>,
    label: String,
    registry: Arc<DeviceRegistry>,
    search_target: Arc<str>,
    cancel: CancellationToken,
) {
    let mut buf = [0u8; SSDP_MAX_DATAGRAM];
    log::trace!("[SSDP] Recv loop starting on {}", label);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            res = socket.recv_from(&mut buf) => match res {
                // A datagram that fills the buffer may have been cut short.
                Ok((len, src)) if len >= buf.len() => {
                    log::trace!("[SSDP] Dropping oversized datagram from {} on {}", src, label);
                }
                Ok((len, src)) => {
                    handle_datagram(&registry, &buf[..len], src, &search_target);
                }
                Err(e) => {
                    log::warn!("[SSDP] Socket recv error on {}: {}", label, e);
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(RECV_ERROR_BACKOFF) => {}
                    }
                }
            }
        }
    }

    log::trace!("[SSDP] Recv loop finished on {}", label);
}

/// Timing of the M-SEARCH rounds.
struct SearchSchedule {
    interval: Duration,
    send_count: u64,
    retry_delay: Duration,
}

async fn search_loop(
    sockets: Vec<(InterfaceInfo, Arc<UdpSocket>)>,
    message: String,
    destination: SocketAddr,
    schedule: SearchSchedule,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(schedule.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                for attempt in 0..schedule.send_count {
                    if attempt > 0 {
                        tokio::select! {
                            _ = cancel.cancelled() => return,
                            _ = tokio::time::sleep(schedule.retry_delay) => {}
                        }
                    }
                    for (iface, socket) in &sockets {
                        if let Err(e) = socket.send_to(message.as_bytes(), destination).await {
                            let err = DiscoveryError::SendSearch(e);
                            log::warn!(
                                "[SSDP] {} on {} (attempt {})",
                                err,
                                iface.name,
                                attempt + 1
                            );
                        } else {
                            log::trace!(
                                "[SSDP] Sent M-SEARCH from {} to {}",
                                iface.ip,
                                destination
                            );
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{DiscoveryEvent, NoopEventEmitter};
    use crate::protocol_constants::SSDP_ALL;
    use crate::registry::test_support::RecordingEmitter;

    fn src() -> SocketAddr {
        "10.0.0.5:1900".parse().unwrap()
    }

    const ALIVE: &str = "NOTIFY * HTTP/1.1\r\n\
HOST: 239.255.255.250:1900\r\n\
CACHE-CONTROL: max-age=1800\r\n\
LOCATION: http://10.0.0.5/desc.xml\r\n\
NT: urn:schemas-upnp-org:device:MediaServer:1\r\n\
NTS: ssdp:alive\r\n\
USN: uuid:1::urn:schemas-upnp-org:device:MediaServer:1\r\n\r\n";

    #[test]
    fn alive_then_byebye_updates_registry() {
        let emitter = Arc::new(RecordingEmitter::default());
        let registry = DeviceRegistry::new(emitter.clone());

        assert_eq!(
            handle_datagram(&registry, ALIVE.as_bytes(), src(), SSDP_ALL),
            DatagramOutcome::Alive("uuid:1".into())
        );
        assert_eq!(registry.snapshot().len(), 1);

        let byebye = "NOTIFY * HTTP/1.1\r\nNTS: ssdp:byebye\r\nUSN: uuid:1::upnp:rootdevice\r\n\r\n";
        assert_eq!(
            handle_datagram(&registry, byebye.as_bytes(), src(), SSDP_ALL),
            DatagramOutcome::Byebye("uuid:1".into())
        );
        assert!(registry.snapshot().is_empty());

        let events = emitter.events();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], DiscoveryEvent::Added { .. }));
        assert!(matches!(events[1], DiscoveryEvent::Removed { .. }));
    }

    #[test]
    fn malformed_datagram_leaves_registry_untouched() {
        let emitter = Arc::new(RecordingEmitter::default());
        let registry = DeviceRegistry::new(emitter.clone());
        let no_location = "NOTIFY * HTTP/1.1\r\n\
CACHE-CONTROL: max-age=1800\r\n\
NTS: ssdp:alive\r\n\
USN: uuid:1\r\n\r\n";

        let outcome = handle_datagram(&registry, no_location.as_bytes(), src(), SSDP_ALL);

        assert_eq!(
            outcome,
            DatagramOutcome::Dropped(ParseError::MissingHeader("LOCATION"))
        );
        assert!(registry.is_empty());
        assert!(emitter.events().is_empty());

        // The next valid datagram is still processed.
        assert_eq!(
            handle_datagram(&registry, ALIVE.as_bytes(), src(), SSDP_ALL),
            DatagramOutcome::Alive("uuid:1".into())
        );
    }

    #[tokio::test]
    async fn start_rejects_zero_interval() {
        let registry = Arc::new(DeviceRegistry::new(Arc::new(NoopEventEmitter)));
        let engine = SsdpEngine::new(
            registry,
            SsdpConfig::default(),
            TaskTracker::new(),
            CancellationToken::new(),
        );
        assert!(matches!(
            engine.start(SSDP_ALL, Duration::ZERO),
            Err(DiscoveryError::InvalidInterval)
        ));
        assert!(!engine.is_running());
    }

    #[tokio::test]
    async fn start_reports_bind_failure() {
        let registry = Arc::new(DeviceRegistry::new(Arc::new(NoopEventEmitter)));
        let config = SsdpConfig {
            listen_ip: Ipv4Addr::new(203, 0, 113, 7),
            listen_port: 0,
            interfaces: vec![Ipv4Addr::LOCALHOST],
            ..Default::default()
        };
        let engine = SsdpEngine::new(
            registry,
            config,
            TaskTracker::new(),
            CancellationToken::new(),
        );

        let result = engine.start(SSDP_ALL, Duration::from_secs(30));

        assert!(matches!(result, Err(DiscoveryError::SocketBind(_))));
        assert!(!engine.is_running());
    }

    #[tokio::test]
    async fn stop_is_idempotent_when_never_started() {
        let registry = Arc::new(DeviceRegistry::new(Arc::new(NoopEventEmitter)));
        let engine = SsdpEngine::new(
            registry,
            SsdpConfig::default(),
            TaskTracker::new(),
            CancellationToken::new(),
        );
        engine.stop();
        engine.stop();
        assert!(!engine.is_running());
    }

    async fn recv_text(socket: &UdpSocket) -> String {
        let mut buf = [0u8; 1024];
        let (len, _) = tokio::time::timeout(Duration::from_secs(2), socket.recv_from(&mut buf))
            .await
            .expect("no M-SEARCH received")
            .unwrap();
        String::from_utf8_lossy(&buf[..len]).into_owned()
    }

    async fn wait_until(mut done: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !done() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not reached");
    }

    /// A LOCATION header cut off at the receive buffer boundary.
    fn oversized_alive() -> String {
        let head = "NOTIFY * HTTP/1.1\r\n\
USN: uuid:big\r\n\
CACHE-CONTROL: max-age=1800\r\n\
NTS: ssdp:alive\r\n\
X-PAD: ";
        let location = "\r\nLOCATION: http://10.0.0.9/";
        let pad = SSDP_MAX_DATAGRAM - 20 - head.len() - location.len();
        format!(
            "{}{}{}{}/desc.xml\r\n\r\n",
            head,
            "p".repeat(pad),
            location,
            "x".repeat(100)
        )
    }

    #[tokio::test]
    async fn running_engine_searches_listens_and_stops() {
        let emitter = Arc::new(RecordingEmitter::default());
        let registry = Arc::new(DeviceRegistry::new(emitter.clone()));

        let listener = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let search = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let observer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let listener_addr = listener.local_addr().unwrap();
        let search_addr = search.local_addr().unwrap();

        let config = SsdpConfig {
            send_count: 2,
            retry_delay: Duration::from_millis(10),
            search_destination: observer.local_addr().unwrap(),
            ..Default::default()
        };
        let tasks = TaskTracker::new();
        let engine = SsdpEngine::new(
            Arc::clone(&registry),
            config,
            tasks.clone(),
            CancellationToken::new(),
        );
        let iface = InterfaceInfo {
            name: "lo".into(),
            ip: Ipv4Addr::LOCALHOST,
        };
        engine
            .start_on(SSDP_ALL, Duration::from_secs(30), || {
                Ok((listener, vec![(iface, search)]))
            })
            .unwrap();
        assert!(engine.is_running());

        // One round: send_count packets from the search socket.
        for _ in 0..2 {
            let msearch = recv_text(&observer).await;
            assert!(msearch.starts_with("M-SEARCH * HTTP/1.1\r\n"));
            assert!(msearch.contains("ST: ssdp:all\r\n"));
        }

        // Bad datagrams first; the loop keeps going and handles the valid one.
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        peer.send_to(oversized_alive().as_bytes(), listener_addr)
            .await
            .unwrap();
        peer.send_to(b"NOTIFY * HTTP/1.1\r\nNTS: ssdp:alive\r\n\r\n", listener_addr)
            .await
            .unwrap();
        peer.send_to(ALIVE.as_bytes(), listener_addr).await.unwrap();
        wait_until(|| registry.get("uuid:1").is_some()).await;
        assert!(registry.get("uuid:big").is_none());

        // Search sockets are read too.
        let byebye = "NOTIFY * HTTP/1.1\r\nNTS: ssdp:byebye\r\nUSN: uuid:1::upnp:rootdevice\r\n\r\n";
        peer.send_to(byebye.as_bytes(), search_addr).await.unwrap();
        wait_until(|| registry.get("uuid:1").is_none()).await;

        let events = emitter.events();
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], DiscoveryEvent::Added(r) if r.device_id == "uuid:1"));
        assert!(matches!(&events[1], DiscoveryEvent::Removed { .. }));

        engine.stop();
        assert!(!engine.is_running());
        tasks.close();
        tokio::time::timeout(Duration::from_secs(1), tasks.wait())
            .await
            .expect("discovery loops did not exit");
    }
}
