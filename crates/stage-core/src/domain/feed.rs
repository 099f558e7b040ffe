//! Feed view-model and its projection rules.
//!
//! A [`Feed`] is the UI-facing record of one camera device.  It is derived
//! from two independent sources that must never overwrite each other:
//!
//! | Source            | Fields                                                         |
//! |-------------------|----------------------------------------------------------------|
//! | Device (registry) | `display_name`, `role_label`, structural status                 |
//! | Media pipeline    | `is_publishing`, `latest_frame`, `streaming_mode`, media status |
//! | User toggles      | `is_video_enabled`, `is_muted`                                  |
//!
//! [`Feed::sync_structure`] only touches the first row; the `mark_*`,
//! `set_*` and `clear_streaming` methods only touch the others.
//!
//! # Status text priority
//!
//! `connection_status_text` is recomputed after every change:
//!
//! 1. `"Video disabled"` while video is off.
//! 2. The media sender's latest status while a session is starting or live.
//! 3. The last start failure, until the next start or reset.
//! 4. The structural status derived from pairing/connection state.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::domain::device::{ConnectionState, Device, DeviceId, PairingState, Role};
use crate::domain::media::VideoFrame;

/// Status shown for a device with no pairing and no media.
pub const NEUTRAL_STATUS: &str = "Not paired";

/// Status forced while the user has switched video off.
pub const VIDEO_DISABLED_STATUS: &str = "Video disabled";

/// How frames reach a publishing feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamingMode {
    #[default]
    None,
    /// Frames come from the built-in placeholder generator.
    Simulated,
    /// Frames come from a real transport.
    External,
}

/// Derived, observable projection of a camera device.
#[derive(Debug, Clone, PartialEq)]
pub struct Feed {
    /// Back-reference to the owning device (not ownership).
    pub device_id: DeviceId,
    pub display_name: String,
    pub role_label: String,
    pub is_publishing: bool,
    pub is_video_enabled: bool,
    pub is_muted: bool,
    pub connection_status_text: String,
    pub latest_frame: Option<Arc<VideoFrame>>,
    pub streaming_mode: StreamingMode,
    structural_status: String,
    media_status: Option<String>,
    last_failure: Option<String>,
}

impl Feed {
    /// Builds the feed for `device`.
    ///
    /// This is the only constructor, so a feed cannot exist without a device.
    pub fn for_device(device: &Device) -> Self {
        let mut feed = Self {
            device_id: device.id(),
            display_name: String::new(),
            role_label: String::new(),
            is_publishing: false,
            is_video_enabled: true,
            is_muted: false,
            connection_status_text: String::new(),
            latest_frame: None,
            streaming_mode: StreamingMode::None,
            structural_status: String::new(),
            media_status: None,
            last_failure: None,
        };
        feed.sync_structure(device);
        feed
    }

    /// Re-derives the structural fields from `device`.
    ///
    /// Never touches `is_publishing`, `latest_frame`, or `streaming_mode`.
    /// A recorded start failure only outlives the resync while the device is
    /// still a paired camera.
    pub fn sync_structure(&mut self, device: &Device) {
        if !device.is_camera() {
            self.last_failure = None;
        }
        self.display_name = device.name().to_string();
        self.role_label = role_label(device).to_string();
        self.structural_status = structural_status(device).to_string();
        self.refresh_status_text();
    }

    /// Returns the status derived purely from pairing/connection state.
    pub fn structural_status(&self) -> &str {
        &self.structural_status
    }

    /// A session start was issued; publishing is not live yet.
    pub fn mark_starting(&mut self, mode: StreamingMode) {
        self.is_publishing = false;
        self.streaming_mode = mode;
        self.latest_frame = None;
        self.last_failure = None;
        self.media_status = Some("Starting stream".to_string());
        self.refresh_status_text();
    }

    /// The session start completed; the feed is live.
    pub fn mark_publishing(&mut self, mode: StreamingMode) {
        self.is_publishing = true;
        self.streaming_mode = mode;
        self.media_status = Some(match mode {
            StreamingMode::Simulated => "Live (simulated)".to_string(),
            _ => "Live".to_string(),
        });
        self.refresh_status_text();
    }

    /// Mirrors a sender-reported status while a session exists.
    ///
    /// Ignored when no session is active so a late status string cannot
    /// resurrect a stopped feed.
    pub fn set_media_status(&mut self, status: impl Into<String>) {
        if self.media_status.is_some() {
            self.media_status = Some(status.into());
            self.refresh_status_text();
        }
    }

    /// Stores the most recent frame of a live session.
    pub fn set_latest_frame(&mut self, frame: Arc<VideoFrame>) {
        if self.is_publishing && self.is_video_enabled {
            self.latest_frame = Some(frame);
        }
    }

    /// Tears down every streaming field and restores structural status text.
    pub fn clear_streaming(&mut self) {
        self.is_publishing = false;
        self.latest_frame = None;
        self.streaming_mode = StreamingMode::None;
        self.media_status = None;
        self.refresh_status_text();
    }

    /// Reverts a failed start and records `reason` for display.
    pub fn mark_start_failed(&mut self, reason: impl Into<String>) {
        self.clear_streaming();
        self.last_failure = Some(reason.into());
        self.refresh_status_text();
    }

    pub fn set_video_enabled(&mut self, enabled: bool) {
        self.is_video_enabled = enabled;
        if !enabled {
            self.latest_frame = None;
        }
        self.refresh_status_text();
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.is_muted = muted;
    }

    /// Returns the feed to a neutral, non-publishing state.
    ///
    /// Identity (`device_id`, `display_name`) is kept so existing observers
    /// still point at the same device.
    pub fn reset(&mut self) {
        self.clear_streaming();
        self.is_video_enabled = true;
        self.is_muted = false;
        self.last_failure = None;
        self.role_label = role_label_for(None).to_string();
        self.structural_status = NEUTRAL_STATUS.to_string();
        self.refresh_status_text();
    }

    fn refresh_status_text(&mut self) {
        self.connection_status_text = if !self.is_video_enabled {
            VIDEO_DISABLED_STATUS.to_string()
        } else if let Some(status) = &self.media_status {
            status.clone()
        } else if let Some(reason) = &self.last_failure {
            format!("Stream failed: {reason}")
        } else {
            self.structural_status.clone()
        };
    }
}

/// Human-readable status for a device's pairing and connection state.
pub fn structural_status(device: &Device) -> &'static str {
    match device.pairing_state {
        PairingState::Discoverable => NEUTRAL_STATUS,
        PairingState::OutgoingRequest => "Waiting for confirmation",
        PairingState::IncomingRequest => "Pairing request received",
        PairingState::AwaitingRoleSelection => "Choose a role",
        PairingState::Paired => match (device.assigned_role, device.connection_state) {
            (_, ConnectionState::Disconnected) => "Disconnected",
            (Some(Role::Camera), ConnectionState::Streaming) => "Camera ready",
            (Some(Role::Camera), _) => "Camera idle",
            (Some(Role::Viewer), _) => "Viewing",
            (None, _) => "Paired",
        },
    }
}

/// Label for the device's role as shown on the feed tile.
pub fn role_label(device: &Device) -> &'static str {
    role_label_for(device.assigned_role)
}

fn role_label_for(role: Option<Role>) -> &'static str {
    match role {
        Some(Role::Camera) => "Camera",
        Some(Role::Viewer) => "Viewer",
        None => "Unassigned",
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
