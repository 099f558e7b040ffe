//! Messages accepted by the serialized stage context.
//!
//! Everything that changes stage state arrives as a [`StageCommand`] on one
//! mailbox: user commands from the presentation layer, discovery results,
//! remote pairing signals, and completions of suspended media operations.
//! The stage task drains the mailbox one command at a time, which is what
//! serializes all mutation.
//!
//! Commands that expect an answer carry a [`Reply`]; the answer is sent once
//! the command (or, for `StartPublishing`, the suspended start) completes.

use stage_core::{
    AudioFrame, Device, DeviceDescriptor, DeviceId, Feed, RequestId, Role, StageError, VideoFrame,
};
use tokio::sync::{oneshot, watch};

use crate::application::media_coupling::MediaEvent;

/// One-shot answer channel for a command.
pub type Reply<T> = oneshot::Sender<Result<T, StageError>>;

/// Registry filters available to the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceQuery {
    All,
    Discoverable,
    IncomingRequests,
    OutgoingRequests,
    AwaitingRoleSelection,
    Paired,
    CamerasOnly,
}

/// A unit of work for the stage task.
pub enum StageCommand {
    // ── Ingress from collaborators ───────────────────────────────────────────
    /// Discovery reported a device (new or already known).
    Discovered(DeviceDescriptor),
    /// The remote side of `device_id` asked to pair.
    IncomingRequest { device_id: DeviceId },
    /// The remote side confirmed our request `request_id`.
    RemoteConfirmed {
        device_id: DeviceId,
        request_id: RequestId,
    },
    /// A frame from an external transport.
    DeliverVideoFrame { device_id: DeviceId, frame: VideoFrame },
    /// Outbound talkback audio for a camera device.
    DeliverAudioFrame { device_id: DeviceId, frame: AudioFrame },

    // ── Presentation commands ────────────────────────────────────────────────
    RequestPairing {
        device_id: DeviceId,
        reply: Reply<Device>,
    },
    AcceptIncomingRequest {
        device_id: DeviceId,
        reply: Reply<Device>,
    },
    DeclineIncomingRequest {
        device_id: DeviceId,
        reply: Reply<Device>,
    },
    CancelPairingRequest {
        device_id: DeviceId,
        reply: Reply<Device>,
    },
    AssignRole {
        device_id: DeviceId,
        role: Role,
        reply: Reply<Device>,
    },
    Unpair {
        device_id: DeviceId,
        reply: Reply<Device>,
    },
    SetTalkback {
        device_id: DeviceId,
        enabled: bool,
        reply: Reply<Device>,
    },
    PushToTalk {
        device_id: DeviceId,
        active: bool,
        reply: Reply<()>,
    },
    ToggleMute {
        device_id: DeviceId,
        reply: Reply<Feed>,
    },
    ToggleVideo {
        device_id: DeviceId,
        reply: Reply<Feed>,
    },
    StartPublishing {
        device_id: DeviceId,
        reply: Reply<Feed>,
    },
    StopPublishing {
        device_id: DeviceId,
        reply: Reply<Feed>,
    },

    // ── Read-only queries ────────────────────────────────────────────────────
    Query {
        query: DeviceQuery,
        reply: oneshot::Sender<Vec<Device>>,
    },
    Device {
        device_id: DeviceId,
        reply: Reply<Device>,
    },
    Feed {
        device_id: DeviceId,
        reply: Reply<Feed>,
    },
    Feeds {
        reply: oneshot::Sender<Vec<Feed>>,
    },
    SubscribeFeed {
        device_id: DeviceId,
        reply: Reply<watch::Receiver<Feed>>,
    },
    ActiveSessions {
        reply: oneshot::Sender<Vec<DeviceId>>,
    },

    // ── Completions of suspended media work ──────────────────────────────────
    Media(MediaEvent),

    // ── Lifecycle ────────────────────────────────────────────────────────────
    /// Stops every media session, then ends the stage task.  Answered once
    /// every sender has finished stopping.
    Shutdown { reply: oneshot::Sender<()> },
}
