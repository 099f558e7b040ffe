//! Device identity and per-device session state.
//!
//! A [`DeviceDescriptor`] is what discovery tells us about a device and never
//! changes after the first sighting.  A [`Device`] is the registry entry that
//! wraps the descriptor together with its mutable pairing/session state.
//!
//! # Two independent state axes
//!
//! ```text
//! PairingState:     Discoverable ─► OutgoingRequest ─┐
//!                        │                           ├─► AwaitingRoleSelection ─► Paired
//!                        └────► IncomingRequest ─────┘
//!
//! ConnectionState:  Disconnected ─► Pairing ─► Connected | Streaming
//! ```
//!
//! Pairing state describes the handshake; connection state describes the
//! media session.  Every edge back to `Discoverable` also drops the
//! connection state to `Disconnected` and clears the assigned role.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable unique identifier of a device, derived from UUID.
pub type DeviceId = Uuid;

/// Correlates an outgoing pairing request with its remote confirmation.
pub type RequestId = Uuid;

/// Physical form factor reported by discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    Phone,
    Tablet,
    Wearable,
    Capture,
}

/// Discovery transport a device is reachable over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    Wifi,
    Bluetooth,
    Usb,
}

/// A hardware capability a device advertises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Camera,
    Microphone,
    Speaker,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Camera => f.write_str("camera"),
            Capability::Microphone => f.write_str("microphone"),
            Capability::Speaker => f.write_str("speaker"),
        }
    }
}

/// The role a paired device plays on the stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Publishes its camera to the stage.
    Camera,
    /// Watches the other feeds.
    Viewer,
}

impl Role {
    /// Returns the capability a device must advertise to take this role.
    pub fn required_capability(self) -> Option<Capability> {
        match self {
            Role::Camera => Some(Capability::Camera),
            Role::Viewer => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Camera => f.write_str("camera"),
            Role::Viewer => f.write_str("viewer"),
        }
    }
}

/// Handshake phase of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairingState {
    /// Visible but not pairing. The initial state.
    Discoverable,
    /// We asked the device to pair and are waiting for it to confirm.
    OutgoingRequest,
    /// The device asked us to pair.
    IncomingRequest,
    /// Both sides agreed; a role has not been chosen yet.
    AwaitingRoleSelection,
    /// Paired with an assigned role.
    Paired,
}

impl fmt::Display for PairingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PairingState::Discoverable => "discoverable",
            PairingState::OutgoingRequest => "outgoing_request",
            PairingState::IncomingRequest => "incoming_request",
            PairingState::AwaitingRoleSelection => "awaiting_role_selection",
            PairingState::Paired => "paired",
        };
        f.write_str(s)
    }
}

/// Media-session-level state of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Pairing,
    Connected,
    Streaming,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Pairing => "pairing",
            ConnectionState::Connected => "connected",
            ConnectionState::Streaming => "streaming",
        };
        f.write_str(s)
    }
}

/// Static identity and capability record for a discovered device.
///
/// Immutable once discovered; re-discovery of the same `id` refers to the
/// same entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub id: DeviceId,
    pub name: String,
    pub kind: DeviceKind,
    #[serde(default)]
    pub transports: BTreeSet<Transport>,
    #[serde(default)]
    pub capabilities: BTreeSet<Capability>,
}

impl DeviceDescriptor {
    /// Returns `true` if the device advertises `capability`.
    pub fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    /// Returns `true` if the device is allowed to take `role`.
    pub fn supports_role(&self, role: Role) -> bool {
        role.required_capability()
            .map_or(true, |cap| self.has_capability(cap))
    }
}

/// Registry entry for a known device.
///
/// Fields are public for reading; all mutation outside this crate goes
/// through the registry's `mutate` entry point and the transition function in
/// [`crate::domain::pairing`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub descriptor: DeviceDescriptor,
    pub pairing_state: PairingState,
    pub connection_state: ConnectionState,
    /// Only meaningful while `pairing_state == Paired`.
    pub assigned_role: Option<Role>,
    pub talkback_enabled: bool,
    /// Id of the outgoing request awaiting remote confirmation, if any.
    pub pending_request: Option<RequestId>,
}

impl Device {
    /// Creates a freshly discovered, discoverable device.
    pub fn discovered(descriptor: DeviceDescriptor) -> Self {
        Self {
            descriptor,
            pairing_state: PairingState::Discoverable,
            connection_state: ConnectionState::Disconnected,
            assigned_role: None,
            talkback_enabled: false,
            pending_request: None,
        }
    }

    pub fn id(&self) -> DeviceId {
        self.descriptor.id
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    /// Returns `true` when the device is paired in the camera role.
    pub fn is_camera(&self) -> bool {
        self.pairing_state == PairingState::Paired && self.assigned_role == Some(Role::Camera)
    }

    /// Checks the role/pairing invariant.
    ///
    /// A role may only be set while paired, and a camera role requires the
    /// camera capability.
    pub fn invariants_hold(&self) -> bool {
        let role_only_when_paired =
            self.assigned_role.is_none() || self.pairing_state == PairingState::Paired;
        let role_supported = self
            .assigned_role
            .map_or(true, |role| self.descriptor.supports_role(role));
        let disconnected_when_discoverable = self.pairing_state != PairingState::Discoverable
            || self.connection_state == ConnectionState::Disconnected;
        role_only_when_paired && role_supported && disconnected_when_discoverable
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
