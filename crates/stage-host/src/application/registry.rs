//! DeviceRegistry: the single owning table of every known device.
//!
//! The registry is the host's in-memory database of every device discovery has
//! ever reported.  Each entry is a [`Device`]: the immutable descriptor plus
//! its pairing state, connection state, and role.
//!
//! # Single serialization point
//!
//! All state changes go through [`DeviceRegistry::mutate`].  `mutate` applies
//! the transition to a working copy, commits it only if the transition
//! succeeded, and then notifies every [`RegistryListener`] with the committed
//! device.  Because the registry itself lives inside the single stage task,
//! two operations on the same device can never interleave.
//!
//! # Queries
//!
//! The filter accessors (`discoverable`, `paired`, ...) are recomputed on
//! every call and never cached, so a caller can never observe a list that is
//! staler than the registry itself.

use std::collections::HashMap;
use std::sync::Arc;

use stage_core::{
    ConnectionState, Device, DeviceDescriptor, DeviceId, PairingState, Role, StageError,
};
use tokio::sync::broadcast;
use tracing::debug;

/// Receives the committed state of a device after every successful mutation.
///
/// Listeners run synchronously inside `mutate`, so they observe the device
/// exactly as it was committed with no other mutation in between.
pub trait RegistryListener: Send + Sync {
    fn device_changed(&self, device: &Device);
}

/// Change notification published to presentation observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEvent {
    pub device_id: DeviceId,
    pub name: String,
    pub pairing_state: PairingState,
    pub connection_state: ConnectionState,
    pub role: Option<Role>,
}

impl From<&Device> for DeviceEvent {
    fn from(device: &Device) -> Self {
        Self {
            device_id: device.id(),
            name: device.name().to_string(),
            pairing_state: device.pairing_state,
            connection_state: device.connection_state,
            role: device.assigned_role,
        }
    }
}

/// Fans registry changes out to any number of presentation subscribers.
///
/// Having no subscribers is normal (headless runs), so send errors are
/// ignored.
impl RegistryListener for broadcast::Sender<DeviceEvent> {
    fn device_changed(&self, device: &Device) {
        let _ = self.send(DeviceEvent::from(device));
    }
}

/// In-memory registry of all known devices.
///
/// Devices are kept in a `HashMap` for O(1) lookup plus a `Vec` of ids in
/// discovery order so snapshots come back in a stable order for the UI.
#[derive(Default)]
pub struct DeviceRegistry {
    devices: HashMap<DeviceId, Device>,
    order: Vec<DeviceId>,
    listeners: Vec<Arc<dyn RegistryListener>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `listener` to the list notified after each committed change.
    pub fn subscribe(&mut self, listener: Arc<dyn RegistryListener>) {
        self.listeners.push(listener);
    }

    /// Registers a discovered device, or returns the existing entry.
    ///
    /// Calling this again with an id that is already known is a no-op: the
    /// first descriptor wins and no change is published.
    pub fn upsert(&mut self, descriptor: DeviceDescriptor) -> Device {
        if let Some(existing) = self.devices.get(&descriptor.id) {
            return existing.clone();
        }

        let id = descriptor.id;
        let device = Device::discovered(descriptor);
        debug!(device_id = %id, name = device.name(), "device registered");
        self.devices.insert(id, device.clone());
        self.order.push(id);
        self.notify(&device);
        device
    }

    /// Returns the entry for `id`.
    pub fn get(&self, id: DeviceId) -> Option<&Device> {
        self.devices.get(&id)
    }

    /// Returns the entry for `id` or [`StageError::NotFound`].
    pub fn require(&self, id: DeviceId) -> Result<&Device, StageError> {
        self.get(id).ok_or(StageError::NotFound(id))
    }

    /// Applies `transition` atomically to one device.
    ///
    /// The closure works on a copy.  On `Ok` the copy is committed and, if it
    /// differs from the previous state, every listener is notified before
    /// this method returns.  On `Err` the stored device is untouched.
    ///
    /// # Errors
    ///
    /// [`StageError::NotFound`] for an unknown id, or whatever `transition`
    /// returns.
    pub fn mutate<T, F>(&mut self, id: DeviceId, transition: F) -> Result<(Device, T), StageError>
    where
        F: FnOnce(&mut Device) -> Result<T, StageError>,
    {
        let stored = self.devices.get_mut(&id).ok_or(StageError::NotFound(id))?;
        let mut working = stored.clone();
        let output = transition(&mut working)?;

        let changed = working != *stored;
        *stored = working.clone();
        if changed {
            self.notify(&working);
        }
        Ok((working, output))
    }

    /// Returns a snapshot of all devices in discovery order.
    pub fn all(&self) -> Vec<Device> {
        self.filtered(|_| true)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn discoverable(&self) -> Vec<Device> {
        self.in_state(PairingState::Discoverable)
    }

    pub fn incoming_requests(&self) -> Vec<Device> {
        self.in_state(PairingState::IncomingRequest)
    }

    pub fn outgoing_requests(&self) -> Vec<Device> {
        self.in_state(PairingState::OutgoingRequest)
    }

    pub fn awaiting_role_selection(&self) -> Vec<Device> {
        self.in_state(PairingState::AwaitingRoleSelection)
    }

    pub fn paired(&self) -> Vec<Device> {
        self.in_state(PairingState::Paired)
    }

    /// Paired devices currently holding the camera role.
    pub fn cameras_only(&self) -> Vec<Device> {
        self.filtered(Device::is_camera)
    }

    fn in_state(&self, state: PairingState) -> Vec<Device> {
        self.filtered(|d| d.pairing_state == state)
    }

    fn filtered(&self, keep: impl Fn(&Device) -> bool) -> Vec<Device> {
        self.order
            .iter()
            .filter_map(|id| self.devices.get(id))
            .filter(|device| keep(*device))
            .cloned()
            .collect()
    }

    fn notify(&self, device: &Device) {
        for listener in &self.listeners {
            listener.device_changed(device);
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use stage_core::{Capability, DeviceKind, PairingEvent, Transport};
    use std::sync::Mutex;
    use uuid::Uuid;

    /// Records every notification for later inspection.
    #[derive(Default)]
    struct RecordingListener {
        seen: Mutex<Vec<Device>>,
    }

    impl RegistryListener for RecordingListener {
        fn device_changed(&self, device: &Device) {
            self.seen.lock().expect("lock poisoned").push(device.clone());
        }
    }

    fn make_descriptor(name: &str) -> DeviceDescriptor {
        DeviceDescriptor {
            id: Uuid::new_v4(),
            name: name.to_string(),
            kind: DeviceKind::Phone,
            transports: [Transport::Wifi].into_iter().collect(),
            capabilities: [Capability::Camera].into_iter().collect(),
        }
    }

    #[test]
    fn test_registry_starts_empty() {
        let registry = DeviceRegistry::new();
        assert!(registry.all().is_empty());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_upsert_adds_device_as_discoverable() {
        let mut registry = DeviceRegistry::new();
        let descriptor = make_descriptor("stage-left");
        let id = descriptor.id;

        let device = registry.upsert(descriptor);

        assert_eq!(device.pairing_state, PairingState::Discoverable);
        assert!(registry.get(id).is_some());
    }

    #[test]
    fn test_upsert_same_id_twice_does_not_duplicate_or_overwrite() {
        // Arrange
        let mut registry = DeviceRegistry::new();
        let descriptor = make_descriptor("stage-left");
        let id = descriptor.id;
        registry.upsert(descriptor.clone());
        registry
            .mutate(id, |d| d.apply(PairingEvent::IncomingRequest))
            .unwrap();

        // Act
        let renamed = DeviceDescriptor {
            name: "renamed".to_string(),
            ..descriptor
        };
        let device = registry.upsert(renamed);

        // Assert
        assert_eq!(registry.len(), 1);
        assert_eq!(device.name(), "stage-left");
        assert_eq!(device.pairing_state, PairingState::IncomingRequest);
    }

    #[test]
    fn test_mutate_unknown_device_is_not_found() {
        let mut registry = DeviceRegistry::new();
        let id = Uuid::new_v4();

        let result = registry.mutate(id, |d| d.apply(PairingEvent::Unpair));

        assert_eq!(result.unwrap_err(), StageError::NotFound(id));
    }

    #[test]
    fn test_mutate_notifies_listener_with_committed_state() {
        // Arrange
        let mut registry = DeviceRegistry::new();
        let listener = Arc::new(RecordingListener::default());
        registry.subscribe(listener.clone());
        let id = registry.upsert(make_descriptor("cam")).id();

        // Act
        registry
            .mutate(id, |d| d.apply(PairingEvent::IncomingRequest))
            .unwrap();

        // Assert
        let seen = listener.seen.lock().unwrap();
        assert_eq!(seen.len(), 2, "one event for discovery, one for the mutation");
        assert_eq!(seen[1].pairing_state, PairingState::IncomingRequest);
    }

    #[test]
    fn test_failed_mutation_leaves_state_and_sends_no_event() {
        let mut registry = DeviceRegistry::new();
        let listener = Arc::new(RecordingListener::default());
        let id = registry.upsert(make_descriptor("cam")).id();
        registry.subscribe(listener.clone());

        let result = registry.mutate(id, |d| d.apply(PairingEvent::AcceptIncoming));

        assert!(matches!(result, Err(StageError::InvalidTransition { .. })));
        assert_eq!(
            registry.get(id).unwrap().pairing_state,
            PairingState::Discoverable
        );
        assert!(listener.seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_noop_mutation_sends_no_event() {
        let mut registry = DeviceRegistry::new();
        let listener = Arc::new(RecordingListener::default());
        let id = registry.upsert(make_descriptor("cam")).id();
        registry.subscribe(listener.clone());

        registry.mutate(id, |d| d.apply(PairingEvent::Unpair)).unwrap();

        assert!(listener.seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_query_filters_track_pairing_state() {
        // Arrange
        let mut registry = DeviceRegistry::new();
        let a = registry.upsert(make_descriptor("a")).id();
        let b = registry.upsert(make_descriptor("b")).id();
        let c = registry.upsert(make_descriptor("c")).id();

        // Act
        registry
            .mutate(a, |d| d.apply(PairingEvent::IncomingRequest))
            .unwrap();
        registry
            .mutate(b, |d| {
                d.apply(PairingEvent::RequestPairing {
                    request_id: Uuid::new_v4(),
                })
            })
            .unwrap();
        registry
            .mutate(c, |d| {
                d.apply(PairingEvent::IncomingRequest)?;
                d.apply(PairingEvent::AcceptIncoming)?;
                d.apply(PairingEvent::AssignRole(Role::Camera))
            })
            .unwrap();

        // Assert
        assert!(registry.discoverable().is_empty());
        assert_eq!(registry.incoming_requests()[0].id(), a);
        assert_eq!(registry.outgoing_requests()[0].id(), b);
        assert_eq!(registry.paired()[0].id(), c);
        assert_eq!(registry.cameras_only()[0].id(), c);
        assert!(registry.awaiting_role_selection().is_empty());
    }

    #[test]
    fn test_multi_step_mutation_is_all_or_nothing() {
        let mut registry = DeviceRegistry::new();
        let id = registry.upsert(make_descriptor("cam")).id();

        let result = registry.mutate(id, |d| {
            d.apply(PairingEvent::IncomingRequest)?;
            d.apply(PairingEvent::Cancel)?;
            d.apply(PairingEvent::AcceptIncoming)
        });

        assert!(result.is_err());
        assert_eq!(
            registry.get(id).unwrap().pairing_state,
            PairingState::Discoverable
        );
    }

    #[test]
    fn test_broadcast_listener_publishes_device_events() {
        let mut registry = DeviceRegistry::new();
        let (tx, mut rx) = broadcast::channel(8);
        registry.subscribe(Arc::new(tx));

        let id = registry.upsert(make_descriptor("cam")).id();

        let event = rx.try_recv().expect("event published");
        assert_eq!(event.device_id, id);
        assert_eq!(event.pairing_state, PairingState::Discoverable);
    }
}
