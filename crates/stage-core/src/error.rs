//! Error type shared by every stage command.
//!
//! None of these conditions is fatal.  `NotFound` and `InvalidTransition` are
//! expected outcomes of racing UI clicks and timers and are reported back to
//! the caller, which is free to ignore them.

use thiserror::Error;

use crate::domain::device::{Capability, DeviceId, PairingState, Role};

/// Errors returned by registry, pairing, and media commands.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StageError {
    /// The device id is not in the registry.
    #[error("device not found: {0}")]
    NotFound(DeviceId),

    /// The state machine guard for `action` failed; state is unchanged.
    #[error("cannot {action} device {device_id} while it is {state}")]
    InvalidTransition {
        device_id: DeviceId,
        action: &'static str,
        state: PairingState,
    },

    /// The device lacks the capability the requested role needs.
    #[error("device {device_id} lacks the {capability} capability required by the {role} role")]
    CapabilityMismatch {
        device_id: DeviceId,
        role: Role,
        capability: Capability,
    },

    /// The media sender failed to start; the feed was reverted.
    #[error("media session for device {device_id} failed to start: {reason}")]
    SessionStartFailure { device_id: DeviceId, reason: String },

    /// The serialized stage context is no longer running.
    #[error("stage service is not running")]
    ServiceUnavailable,
}

impl StageError {
    /// Short machine-readable label used by the presentation bridge.
    pub fn kind(&self) -> &'static str {
        match self {
            StageError::NotFound(_) => "not_found",
            StageError::InvalidTransition { .. } => "invalid_transition",
            StageError::CapabilityMismatch { .. } => "capability_mismatch",
            StageError::SessionStartFailure { .. } => "session_start_failure",
            StageError::ServiceUnavailable => "service_unavailable",
        }
    }
}
