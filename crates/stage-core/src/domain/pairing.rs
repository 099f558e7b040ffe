//! Pairing handshake state machine.
//!
//! Both pairing styles a device may use are expressed by the same five states:
//! the host can ask the device (`RequestPairing` then a remote confirmation) or
//! the device can ask the host (`IncomingRequest` then `AcceptIncoming`).  The
//! two paths meet in `AwaitingRoleSelection`, and `AssignRole` finishes the
//! handshake.
//!
//! ```text
//!                 RequestPairing            RemoteConfirmed
//! Discoverable ──────────────────► Outgoing ───────────────┐
//!      │                                                    ▼
//!      │ IncomingRequest          AcceptIncoming     AwaitingRoleSelection
//!      └────────────────► Incoming ───────────────────►     │ AssignRole
//!                                                           ▼
//!                                                         Paired ◄─┐ AssignRole
//!                                                           └──────┘ (in place)
//!
//! Decline / Cancel : Outgoing | Incoming | AwaitingRoleSelection ─► Discoverable
//! Unpair           : any state ─► Discoverable (never fails)
//! ```
//!
//! # Guards
//!
//! [`Device::apply`] is total: it either performs the guarded mutation and
//! returns a [`Transition`] or returns an error and leaves the device exactly
//! as it was.  Timers and remote events that race with user commands are
//! expected to hit the error path and ignore it.

use crate::domain::device::{ConnectionState, Device, PairingState, RequestId, Role};
use crate::error::StageError;

/// An input to the pairing state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingEvent {
    /// The host asks the device to pair.
    RequestPairing { request_id: RequestId },
    /// The device confirmed the host's request `request_id`.
    RemoteConfirmed { request_id: RequestId },
    /// The device asked the host to pair.
    IncomingRequest,
    /// The host accepted the device's request.
    AcceptIncoming,
    /// The host declined the device's request.
    Decline,
    /// The host withdrew its own request.
    Cancel,
    /// Assign (or change) the device's role.
    AssignRole(Role),
    /// Enable or disable the return audio channel of a paired device.
    SetTalkback(bool),
    /// Forget the pairing.
    Unpair,
}

impl PairingEvent {
    /// Verb phrase used in [`StageError::InvalidTransition`] messages.
    pub fn action(&self) -> &'static str {
        match self {
            PairingEvent::RequestPairing { .. } => "request pairing with",
            PairingEvent::RemoteConfirmed { .. } => "confirm pairing of",
            PairingEvent::IncomingRequest => "receive a pairing request from",
            PairingEvent::AcceptIncoming => "accept incoming request from",
            PairingEvent::Decline => "decline incoming request from",
            PairingEvent::Cancel => "cancel pairing request to",
            PairingEvent::AssignRole(_) => "assign a role to",
            PairingEvent::SetTalkback(_) => "change talkback on",
            PairingEvent::Unpair => "unpair",
        }
    }
}

/// Summary of an applied transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: PairingState,
    pub to: PairingState,
    pub previous_role: Option<Role>,
    pub role: Option<Role>,
    /// `false` when the event was an accepted no-op (e.g. a repeated request).
    pub changed: bool,
}

impl Transition {
    /// Returns `true` if the device left (or never had) a camera role in a way
    /// that requires the media session and feed to be torn down.
    pub fn requires_teardown(&self) -> bool {
        let lost_camera =
            self.previous_role == Some(Role::Camera) && self.role != Some(Role::Camera);
        lost_camera || self.to == PairingState::Discoverable
    }
}

impl Device {
    /// Applies `event` to this device if its guard holds.
    ///
    /// # Errors
    ///
    /// - [`StageError::CapabilityMismatch`] when assigning a role the device
    ///   cannot perform.  Checked before the state guard.
    /// - [`StageError::InvalidTransition`] when the current state does not
    ///   allow `event`, including stale remote confirmations.
    pub fn apply(&mut self, event: PairingEvent) -> Result<Transition, StageError> {
        let from = self.pairing_state;
        let previous_role = self.assigned_role;
        let before = self.clone();

        match event {
            PairingEvent::RequestPairing { request_id } => match from {
                PairingState::Discoverable => {
                    self.pairing_state = PairingState::OutgoingRequest;
                    self.connection_state = ConnectionState::Pairing;
                    self.pending_request = Some(request_id);
                }
                PairingState::OutgoingRequest => {}
                _ => return Err(self.invalid(event)),
            },
            PairingEvent::RemoteConfirmed { request_id } => {
                let still_pending = from == PairingState::OutgoingRequest
                    && self.pending_request == Some(request_id);
                if !still_pending {
                    return Err(self.invalid(event));
                }
                self.pairing_state = PairingState::AwaitingRoleSelection;
                self.pending_request = None;
            }
            PairingEvent::IncomingRequest => {
                if from != PairingState::Discoverable {
                    return Err(self.invalid(event));
                }
                self.pairing_state = PairingState::IncomingRequest;
                self.connection_state = ConnectionState::Pairing;
            }
            PairingEvent::AcceptIncoming => {
                if from != PairingState::IncomingRequest {
                    return Err(self.invalid(event));
                }
                self.pairing_state = PairingState::AwaitingRoleSelection;
            }
            PairingEvent::Decline | PairingEvent::Cancel => match from {
                PairingState::IncomingRequest
                | PairingState::OutgoingRequest
                | PairingState::AwaitingRoleSelection => self.reset(),
                _ => return Err(self.invalid(event)),
            },
            PairingEvent::AssignRole(role) => {
                if let Some(capability) = role.required_capability() {
                    if !self.descriptor.has_capability(capability) {
                        return Err(StageError::CapabilityMismatch {
                            device_id: self.id(),
                            role,
                            capability,
                        });
                    }
                }
                match from {
                    PairingState::AwaitingRoleSelection | PairingState::Paired => {
                        self.pairing_state = PairingState::Paired;
                        self.assigned_role = Some(role);
                        self.pending_request = None;
                        self.connection_state = match role {
                            Role::Camera => ConnectionState::Streaming,
                            Role::Viewer => ConnectionState::Connected,
                        };
                    }
                    _ => return Err(self.invalid(event)),
                }
            }
            PairingEvent::SetTalkback(enabled) => {
                if from != PairingState::Paired {
                    return Err(self.invalid(event));
                }
                self.talkback_enabled = enabled;
            }
            PairingEvent::Unpair => self.reset(),
        }

        Ok(Transition {
            from,
            to: self.pairing_state,
            previous_role,
            role: self.assigned_role,
            changed: *self != before,
        })
    }

    /// Records that the camera's media session went live.
    ///
    /// # Errors
    ///
    /// [`StageError::InvalidTransition`] unless the device is a paired camera.
    pub fn mark_media_live(&mut self) -> Result<(), StageError> {
        self.require_camera("mark streaming")?;
        self.connection_state = ConnectionState::Streaming;
        Ok(())
    }

    /// Records that the camera's media session failed to start, so the device
    /// is not left advertising `Streaming`.
    ///
    /// # Errors
    ///
    /// [`StageError::InvalidTransition`] unless the device is a paired camera.
    pub fn mark_media_failed(&mut self) -> Result<(), StageError> {
        self.require_camera("mark media failure on")?;
        self.connection_state = ConnectionState::Connected;
        Ok(())
    }

    fn require_camera(&self, action: &'static str) -> Result<(), StageError> {
        if self.is_camera() {
            Ok(())
        } else {
            Err(StageError::InvalidTransition {
                device_id: self.id(),
                action,
                state: self.pairing_state,
            })
        }
    }

    fn reset(&mut self) {
        self.pairing_state = PairingState::Discoverable;
        self.connection_state = ConnectionState::Disconnected;
        self.assigned_role = None;
        self.pending_request = None;
        self.talkback_enabled = false;
    }

    fn invalid(&self, event: PairingEvent) -> StageError {
        StageError::InvalidTransition {
            device_id: self.id(),
            action: event.action(),
            state: self.pairing_state,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
