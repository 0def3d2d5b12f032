//! In-memory registry of discovered devices.
//!
//! The registry is the single source of truth for which devices are alive.
//! Every mutation emits exactly one [`DiscoveryEvent`] through the
//! [`EventEmitter`], and the emission happens while the write lock is held,
//! so subscribers observe events in the same order the table changed.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::events::{DiscoveryEvent, EventEmitter, RemovalReason};
use crate::utils::now_millis;

/// Marker for a device type URN, as opposed to a service or root token.
const DEVICE_URN_MARKER: &str = ":device:";

/// A discovered device as exposed to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRecord {
    /// USN with any `::<type>` suffix stripped.
    pub device_id: String,
    /// Full USN from the most recent announcement.
    pub usn: String,
    /// URL of the device description document.
    pub location: String,
    /// NT/ST token identifying the device type.
    pub device_type: String,
    /// SERVER header, when the device sent one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    /// Unix ms after which the record is stale.
    pub expires_at: u64,
    /// Unix ms of the most recent announcement.
    pub last_seen_at: u64,
}

impl DeviceRecord {
    /// Returns whether the record has expired at `now` (unix ms).
    pub fn is_expired(&self, now: u64) -> bool {
        self.expires_at <= now
    }
}

/// Input to the registry from one alive announcement or search response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceAnnouncement {
    pub device_id: String,
    pub usn: String,
    pub location: String,
    pub device_type: String,
    pub server: Option<String>,
    pub max_age_secs: u64,
}

/// Thread-safe device table keyed by device id.
pub struct DeviceRegistry {
    devices: RwLock<HashMap<String, DeviceRecord>>,
    emitter: Arc<dyn EventEmitter>,
}

impl DeviceRegistry {
    /// Creates an empty registry publishing through `emitter`.
    pub fn new(emitter: Arc<dyn EventEmitter>) -> Self {
        Self {
            devices: RwLock::new(HashMap::new()),
            emitter,
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Mutations
    // ─────────────────────────────────────────────────────────────────────────

    /// Records that a device is alive, using the current time.
    ///
    /// Emits `Added` for a new device and `Updated` for a known one.
    pub fn notify_alive(
        &self,
        device_id: &str,
        location: &str,
        device_type: &str,
        max_age_secs: u64,
    ) {
        self.record_alive(
            DeviceAnnouncement {
                device_id: device_id.to_string(),
                usn: device_id.to_string(),
                location: location.to_string(),
                device_type: device_type.to_string(),
                server: None,
                max_age_secs,
            },
            now_millis(),
        );
    }

    /// Records a full announcement received at `now` (unix ms).
    ///
    /// Devices announce one message per advertised type. A refresh keeps an
    /// existing `:device:` URN rather than replacing it with a root or
    /// service token, so the record keeps describing the device itself.
    pub fn record_alive(&self, announcement: DeviceAnnouncement, now: u64) {
        let expires_at = now.saturating_add(announcement.max_age_secs.saturating_mul(1000));
        let mut devices = self.devices.write();

        match devices.get_mut(&announcement.device_id) {
            Some(existing) => {
                if prefer_incoming_type(&existing.device_type, &announcement.device_type) {
                    existing.device_type = announcement.device_type;
                    existing.usn = announcement.usn;
                }
                existing.location = announcement.location;
                if announcement.server.is_some() {
                    existing.server = announcement.server;
                }
                existing.expires_at = expires_at;
                existing.last_seen_at = now;
                self.emitter
                    .emit_discovery(DiscoveryEvent::Updated(existing.clone()));
            }
            None => {
                let record = DeviceRecord {
                    device_id: announcement.device_id,
                    usn: announcement.usn,
                    location: announcement.location,
                    device_type: announcement.device_type,
                    server: announcement.server,
                    expires_at,
                    last_seen_at: now,
                };
                log::info!(
                    "[Registry] Device added: {} at {}",
                    record.device_id,
                    record.location
                );
                devices.insert(record.device_id.clone(), record.clone());
                self.emitter.emit_discovery(DiscoveryEvent::Added(record));
            }
        }
    }

    /// Removes a device that announced its departure.
    ///
    /// Returns whether a record was removed. Unknown devices are ignored
    /// without emitting anything.
    pub fn notify_byebye(&self, device_id: &str) -> bool {
        let mut devices = self.devices.write();
        if devices.remove(device_id).is_none() {
            log::trace!("[Registry] byebye for unknown device {}", device_id);
            return false;
        }
        log::info!("[Registry] Device left: {}", device_id);
        self.emitter.emit_discovery(DiscoveryEvent::Removed {
            device_id: device_id.to_string(),
            reason: RemovalReason::Byebye,
        });
        true
    }

    /// Removes every record expired at `now` (unix ms).
    ///
    /// Emits one `Removed` event per record, in device id order, and returns
    /// how many were removed.
    pub fn sweep_expired(&self, now: u64) -> usize {
        let mut devices = self.devices.write();
        let mut expired: Vec<String> = devices
            .values()
            .filter(|r| r.is_expired(now))
            .map(|r| r.device_id.clone())
            .collect();
        if expired.is_empty() {
            return 0;
        }
        expired.sort();

        for device_id in &expired {
            devices.remove(device_id);
            log::info!("[Registry] Device expired: {}", device_id);
            self.emitter.emit_discovery(DiscoveryEvent::Removed {
                device_id: device_id.clone(),
                reason: RemovalReason::Expired,
            });
        }
        expired.len()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────────────────────

    /// Returns all live devices sorted by device id.
    ///
    /// Stale records are purged (with `Removed` events) before the copy is
    /// taken, so callers never see an expired device.
    pub fn snapshot(&self) -> Vec<DeviceRecord> {
        self.snapshot_at(now_millis())
    }

    /// Same as [`snapshot`](Self::snapshot) with an explicit clock.
    pub fn snapshot_at(&self, now: u64) -> Vec<DeviceRecord> {
        self.purge_stale(now);
        sorted(self.devices.read().values().cloned().collect())
    }

    /// Returns one live device.
    pub fn get(&self, device_id: &str) -> Option<DeviceRecord> {
        self.purge_stale(now_millis());
        self.devices.read().get(device_id).cloned()
    }

    /// Number of live devices.
    pub fn len(&self) -> usize {
        self.purge_stale(now_millis());
        self.devices.read().len()
    }

    /// Returns whether no live devices are known.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs `f` with the current snapshot while holding the write lock.
    ///
    /// No mutation (and therefore no event) can happen while `f` runs. A
    /// new subscriber registered inside `f` sees the snapshot strictly
    /// before any event emitted afterwards.
    pub fn seed_subscriber<R>(&self, f: impl FnOnce(Vec<DeviceRecord>) -> R) -> R {
        let now = now_millis();
        let mut devices = self.devices.write();

        let mut expired: Vec<String> = devices
            .values()
            .filter(|r| r.is_expired(now))
            .map(|r| r.device_id.clone())
            .collect();
        expired.sort();
        for device_id in expired {
            devices.remove(&device_id);
            self.emitter.emit_discovery(DiscoveryEvent::Removed {
                device_id,
                reason: RemovalReason::Expired,
            });
        }

        f(sorted(devices.values().cloned().collect()))
    }

    fn purge_stale(&self, now: u64) {
        let any_stale = self.devices.read().values().any(|r| r.is_expired(now));
        if any_stale {
            self.sweep_expired(now);
        }
    }
}

fn sorted(mut records: Vec<DeviceRecord>) -> Vec<DeviceRecord> {
    records.sort_by(|a, b| a.device_id.cmp(&b.device_id));
    records
}

fn prefer_incoming_type(current: &str, incoming: &str) -> bool {
    if incoming.is_empty() {
        return false;
    }
    incoming.contains(DEVICE_URN_MARKER) || !current.contains(DEVICE_URN_MARKER)
}
