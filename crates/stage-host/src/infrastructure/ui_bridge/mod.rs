//! Presentation command bridge: exposes the stage's command surface to a UI.
//!
//! Every command lives here as an async function taking the shared
//! [`AppState`] plus plain strings, and delegates to the [`StageHandle`].  A
//! desktop shell or web bridge registers these functions as its commands; the
//! Application and Domain layers never import this module.
//!
//! # Data Transfer Objects (DTOs)
//!
//! The stage works with internal types (`Device`, `Feed`, `Uuid`) that carry
//! more than a UI should see (frame buffers, pending request ids).  DTOs are
//! flat, JSON-serialisable snapshots:
//!
//! - [`DeviceDto`] – one registry entry.
//! - [`FeedDto`] – one camera feed.  The frame itself is reduced to its
//!   sequence number; pixels travel over a separate channel.
//!
//! # `CommandResult<T>` wrapper
//!
//! All commands return `CommandResult<T>` rather than `Result<T, E>`, so every
//! response has the same shape:
//! `{ success: bool, data: T | null, error: string | null, error_kind: string | null }`.
//! `error_kind` is a stable label (`not_found`, `invalid_transition`,
//! `capability_mismatch`, `session_start_failure`, `service_unavailable`,
//! `invalid_id`, `invalid_role`) the frontend can switch on without parsing messages.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use stage_core::{Device, DeviceId, Feed, Role, StageError, StreamingMode};

use crate::infrastructure::runtime::StageHandle;

// ── Shared application state ──────────────────────────────────────────────────

/// State shared between command invocations.
///
/// Only holds the stage handle: the stage task already serialises every
/// command, so no extra locking is needed here.
pub struct AppState {
    pub stage: StageHandle,
}

impl AppState {
    pub fn new(stage: StageHandle) -> Arc<Self> {
        Arc::new(Self { stage })
    }
}

// ── Data Transfer Objects (Presentation layer) ────────────────────────────────

/// DTO representing one known device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceDto {
    pub device_id: String,
    pub name: String,
    pub kind: String,
    pub pairing_state: String,
    pub connection_state: String,
    pub role: Option<String>,
    pub talkback_enabled: bool,
    pub capabilities: Vec<String>,
}

impl From<&Device> for DeviceDto {
    fn from(d: &Device) -> Self {
        Self {
            device_id: d.id().to_string(),
            name: d.name().to_string(),
            kind: label(&d.descriptor.kind),
            pairing_state: d.pairing_state.to_string(),
            connection_state: d.connection_state.to_string(),
            role: d.assigned_role.map(|r| r.to_string()),
            talkback_enabled: d.talkback_enabled,
            capabilities: d.descriptor.capabilities.iter().map(|c| c.to_string()).collect(),
        }
    }
}

/// DTO representing one camera feed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedDto {
    pub device_id: String,
    pub display_name: String,
    pub role_label: String,
    pub is_publishing: bool,
    pub is_video_enabled: bool,
    pub is_muted: bool,
    pub connection_status_text: String,
    pub streaming_mode: StreamingMode,
    pub latest_frame_sequence: Option<u64>,
}

impl From<&Feed> for FeedDto {
    fn from(f: &Feed) -> Self {
        Self {
            device_id: f.device_id.to_string(),
            display_name: f.display_name.clone(),
            role_label: f.role_label.clone(),
            is_publishing: f.is_publishing,
            is_video_enabled: f.is_video_enabled,
            is_muted: f.is_muted,
            connection_status_text: f.connection_status_text.clone(),
            streaming_mode: f.streaming_mode,
            latest_frame_sequence: f.latest_frame.as_ref().map(|frame| frame.sequence),
        }
    }
}

/// Serialises a snake_case enum to its wire label.
fn label<T: Serialize>(value: &T) -> String {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::String(s)) => s,
        _ => String::new(),
    }
}

/// Unified response wrapper used by every command.
#[derive(Debug, Serialize, Deserialize)]
pub struct CommandResult<T: Serialize> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    pub error_kind: Option<String>,
}

impl<T: Serialize> CommandResult<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            error_kind: None,
        }
    }

    pub fn err(kind: &str, msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
            error_kind: Some(kind.to_string()),
        }
    }
}

impl<T: Serialize> From<Result<T, StageError>> for CommandResult<T> {
    fn from(result: Result<T, StageError>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(e) => Self::err(e.kind(), e.to_string()),
        }
    }
}

fn parse_id(device_id: &str) -> Result<DeviceId, String> {
    device_id
        .parse::<DeviceId>()
        .map_err(|e| format!("invalid device_id UUID: {e}"))
}

fn parse_role(role: &str) -> Result<Role, String> {
    match role.to_ascii_lowercase().as_str() {
        "camera" => Ok(Role::Camera),
        "viewer" => Ok(Role::Viewer),
        other => Err(format!("unknown role {other:?}")),
    }
}

/// Parses `device_id`, runs `$call` with it bound to `$id`, and maps the
/// resulting device into its DTO.
macro_rules! device_command {
    ($device_id:expr, |$id:ident| $call:expr) => {{
        let $id = match parse_id($device_id) {
            Ok(id) => id,
            Err(e) => return CommandResult::err("invalid_id", e),
        };
        CommandResult::from($call.map(|d| DeviceDto::from(&d)))
    }};
}

/// Same as `device_command!` but for commands answering with a feed.
macro_rules! feed_command {
    ($device_id:expr, |$id:ident| $call:expr) => {{
        let $id = match parse_id($device_id) {
            Ok(id) => id,
            Err(e) => return CommandResult::err("invalid_id", e),
        };
        CommandResult::from($call.map(|f| FeedDto::from(&f)))
    }};
}

// ── Queries ───────────────────────────────────────────────────────────────────

fn device_list(result: Result<Vec<Device>, StageError>) -> CommandResult<Vec<DeviceDto>> {
    result
        .map(|devices| devices.iter().map(DeviceDto::from).collect())
        .into()
}

/// Returns every known device in discovery order.
///
/// # Example (frontend)
/// ```ts
/// const devices = await invoke<DeviceDto[]>('get_devices');
/// ```
pub async fn get_devices(state: Arc<AppState>) -> CommandResult<Vec<DeviceDto>> {
    device_list(state.stage.devices().await)
}

pub async fn get_discoverable(state: Arc<AppState>) -> CommandResult<Vec<DeviceDto>> {
    device_list(state.stage.discoverable().await)
}

pub async fn get_incoming_requests(state: Arc<AppState>) -> CommandResult<Vec<DeviceDto>> {
    device_list(state.stage.incoming_requests().await)
}

pub async fn get_outgoing_requests(state: Arc<AppState>) -> CommandResult<Vec<DeviceDto>> {
    device_list(state.stage.outgoing_requests().await)
}

pub async fn get_awaiting_role_selection(state: Arc<AppState>) -> CommandResult<Vec<DeviceDto>> {
    device_list(state.stage.awaiting_role_selection().await)
}

pub async fn get_paired(state: Arc<AppState>) -> CommandResult<Vec<DeviceDto>> {
    device_list(state.stage.paired().await)
}

pub async fn get_cameras(state: Arc<AppState>) -> CommandResult<Vec<DeviceDto>> {
    device_list(state.stage.cameras_only().await)
}

/// Returns every feed created so far.
pub async fn get_feeds(state: Arc<AppState>) -> CommandResult<Vec<FeedDto>> {
    state
        .stage
        .feeds()
        .await
        .map(|feeds| feeds.iter().map(FeedDto::from).collect())
        .into()
}

pub async fn get_feed(state: Arc<AppState>, device_id: String) -> CommandResult<FeedDto> {
    feed_command!(&device_id, |id| state.stage.feed(id).await)
}

// ── Pairing commands ──────────────────────────────────────────────────────────

pub async fn request_pairing(state: Arc<AppState>, device_id: String) -> CommandResult<DeviceDto> {
    device_command!(&device_id, |id| state.stage.request_pairing(id).await)
}

pub async fn accept_incoming_request(
    state: Arc<AppState>,
    device_id: String,
) -> CommandResult<DeviceDto> {
    device_command!(&device_id, |id| state
        .stage
        .accept_incoming_request(id)
        .await)
}

pub async fn decline_incoming_request(
    state: Arc<AppState>,
    device_id: String,
) -> CommandResult<DeviceDto> {
    device_command!(&device_id, |id| state
        .stage
        .decline_incoming_request(id)
        .await)
}

pub async fn cancel_pairing_request(
    state: Arc<AppState>,
    device_id: String,
) -> CommandResult<DeviceDto> {
    device_command!(&device_id, |id| state
        .stage
        .cancel_pairing_request(id)
        .await)
}

/// Assigns `"camera"` or `"viewer"`.
pub async fn assign_role(
    state: Arc<AppState>,
    device_id: String,
    role: String,
) -> CommandResult<DeviceDto> {
    let role = match parse_role(&role) {
        Ok(role) => role,
        Err(e) => return CommandResult::err("invalid_role", e),
    };
    device_command!(&device_id, |id| state.stage.assign_role(id, role).await)
}

pub async fn unpair(state: Arc<AppState>, device_id: String) -> CommandResult<DeviceDto> {
    device_command!(&device_id, |id| state.stage.unpair(id).await)
}

pub async fn set_talkback(
    state: Arc<AppState>,
    device_id: String,
    enabled: bool,
) -> CommandResult<DeviceDto> {
    device_command!(&device_id, |id| state
        .stage
        .set_talkback(id, enabled)
        .await)
}

// ── Feed commands ─────────────────────────────────────────────────────────────

pub async fn toggle_mute(state: Arc<AppState>, device_id: String) -> CommandResult<FeedDto> {
    feed_command!(&device_id, |id| state.stage.toggle_mute(id).await)
}

pub async fn toggle_video(state: Arc<AppState>, device_id: String) -> CommandResult<FeedDto> {
    feed_command!(&device_id, |id| state.stage.toggle_video(id).await)
}

pub async fn start_publishing(state: Arc<AppState>, device_id: String) -> CommandResult<FeedDto> {
    feed_command!(&device_id, |id| state.stage.start_publishing(id).await)
}

pub async fn stop_publishing(state: Arc<AppState>, device_id: String) -> CommandResult<FeedDto> {
    feed_command!(&device_id, |id| state.stage.stop_publishing(id).await)
}

pub async fn push_to_talk(
    state: Arc<AppState>,
    device_id: String,
    active: bool,
) -> CommandResult<()> {
    let id = match parse_id(&device_id) {
        Ok(id) => id,
        Err(e) => return CommandResult::err("invalid_id", e),
    };
    state.stage.push_to_talk(id, active).await.into()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
