//! Event emitter abstraction for decoupling the registry from transport.
//!
//! The registry depends on the [`EventEmitter`] trait rather than on the
//! dispatcher, so it can be tested with a recording emitter and run without
//! any clients attached.

use super::DiscoveryEvent;

/// Trait for emitting discovery events without knowledge of transport.
///
/// Implementations are called while the registry's write lock is held and
/// must not block or call back into the registry.
pub trait EventEmitter: Send + Sync {
    /// Emits a device discovery event.
    fn emit_discovery(&self, event: DiscoveryEvent);
}

/// No-op emitter for tests and headless tooling.
pub struct NoopEventEmitter;

impl EventEmitter for NoopEventEmitter {
    fn emit_discovery(&self, _event: DiscoveryEvent) {
        // No-op
    }
}
