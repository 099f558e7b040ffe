//! MediaCoupling: binds paired camera devices to media senders.
//!
//! The coupling owns at most one [`MediaSession`] per device.  A session goes
//! through two phases:
//!
//! ```text
//! (none) ──start──► Starting ──sender started──► Live ──stop──► (none)
//!                      │                                  ▲
//!                      └──── sender failed / torn down ───┘
//! ```
//!
//! `MediaSender::start_publishing` is asynchronous, so starting a session
//! suspends.  The start runs on a spawned task and its result comes back to
//! the stage mailbox as [`MediaEvent::StartCompleted`].  Each session carries
//! a [`SessionToken`]; a completion, status string, or frame whose token does
//! not match the device's current session is stale and is dropped (a stale
//! *successful* start has its sender stopped right away so no session is ever
//! orphaned).
//!
//! The coupling addresses devices by id only; it never holds a `Device`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use stage_core::{
    AudioFrame, Device, DeviceId, Feed, StageError, StreamingMode, VideoFrame,
};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::application::commands::{Reply, StageCommand};
use crate::application::feed_projection::FeedProjection;

/// Identifies one media session of one device.
pub type SessionToken = u64;

/// Error type for media sender operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MediaError {
    #[error("sender refused to start: {0}")]
    StartRefused(String),
}

/// Capability interface of a media transport bound to one camera device.
///
/// Infrastructure implementations publish over a real or simulated
/// transport; test implementations record calls.
#[async_trait]
pub trait MediaSender: Send + Sync {
    /// Starts publishing.  Suspends for the duration of the handshake.
    async fn start_publishing(&self) -> Result<(), MediaError>;

    /// Stops publishing and releases transport resources.
    async fn stop_publishing(&self);

    fn send_video_frame(&self, frame: &VideoFrame);

    fn send_audio_frame(&self, frame: &AudioFrame);

    /// Enables the return (talkback) audio channel.
    fn set_return_audio_enabled(&self, enabled: bool);

    fn push_to_talk(&self, active: bool);

    /// Stream of human-readable transport state strings.
    fn status_updates(&self) -> watch::Receiver<String>;
}

/// Periodic frame producer for a live session.
///
/// The simulated driver generates placeholder frames; an external transport
/// needs no driver and pushes frames through the stage handle instead.
pub trait FrameDriver: Send + Sync {
    /// Starts producing frames into `sink` until aborted or the sink closes.
    fn spawn(&self, sink: FrameSink) -> JoinHandle<()>;
}

/// Everything the coupling needs to run a session for one device.
#[derive(Clone)]
pub struct MediaBinding {
    pub sender: Arc<dyn MediaSender>,
    pub mode: StreamingMode,
    pub driver: Option<Arc<dyn FrameDriver>>,
}

/// Creates a [`MediaBinding`] for a camera device.
pub trait MediaSenderFactory: Send + Sync {
    fn bind(&self, device: &Device) -> MediaBinding;
}

/// Completions and outputs of background media work, delivered through the
/// stage mailbox.
pub enum MediaEvent {
    StartCompleted {
        device_id: DeviceId,
        token: SessionToken,
        sender: Arc<dyn MediaSender>,
        result: Result<(), MediaError>,
        reply: Reply<Feed>,
    },
    Status {
        device_id: DeviceId,
        token: SessionToken,
        status: String,
    },
    Frame {
        device_id: DeviceId,
        token: SessionToken,
        frame: VideoFrame,
    },
}

/// Handle through which background producers post into the stage mailbox
/// on behalf of one session.
#[derive(Clone)]
pub struct FrameSink {
    device_id: DeviceId,
    token: SessionToken,
    mailbox: mpsc::WeakUnboundedSender<StageCommand>,
}

impl FrameSink {
    pub fn new(
        device_id: DeviceId,
        token: SessionToken,
        mailbox: mpsc::WeakUnboundedSender<StageCommand>,
    ) -> Self {
        Self {
            device_id,
            token,
            mailbox,
        }
    }

    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    /// Posts a frame.  Returns `false` once the stage has shut down.
    pub fn deliver(&self, frame: VideoFrame) -> bool {
        self.post(MediaEvent::Frame {
            device_id: self.device_id,
            token: self.token,
            frame,
        })
    }

    /// Posts a status string.  Returns `false` once the stage has shut down.
    pub fn status(&self, status: impl Into<String>) -> bool {
        self.post(MediaEvent::Status {
            device_id: self.device_id,
            token: self.token,
            status: status.into(),
        })
    }

    fn post(&self, event: MediaEvent) -> bool {
        self.mailbox
            .upgrade()
            .is_some_and(|tx| tx.send(StageCommand::Media(event)).is_ok())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionPhase {
    Starting,
    Live,
}

struct MediaSession {
    token: SessionToken,
    phase: SessionPhase,
    binding: MediaBinding,
    driver_task: Option<JoinHandle<()>>,
    status_task: Option<JoinHandle<()>>,
}

impl MediaSession {
    fn stop_driver(&mut self) {
        if let Some(task) = self.driver_task.take() {
            task.abort();
        }
    }

    fn abort_tasks(&mut self) {
        self.stop_driver();
        if let Some(task) = self.status_task.take() {
            task.abort();
        }
    }
}

/// How a suspended start resolved once it was re-validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// The session is live.
    Live,
    /// The sender failed; the feed was reverted.
    Failed(String),
    /// The session was stopped or replaced while starting.
    Superseded,
}

/// The media coupling.
pub struct MediaCoupling {
    feeds: Arc<FeedProjection>,
    factory: Arc<dyn MediaSenderFactory>,
    // Weak so background work never keeps the stage task alive.
    mailbox: mpsc::WeakUnboundedSender<StageCommand>,
    sessions: HashMap<DeviceId, MediaSession>,
    next_token: SessionToken,
}

impl MediaCoupling {
    pub fn new(
        feeds: Arc<FeedProjection>,
        factory: Arc<dyn MediaSenderFactory>,
        mailbox: mpsc::WeakUnboundedSender<StageCommand>,
    ) -> Self {
        Self {
            feeds,
            factory,
            mailbox,
            sessions: HashMap::new(),
            next_token: 1,
        }
    }

    /// Devices with a starting or live session.
    pub fn active_sessions(&self) -> Vec<DeviceId> {
        self.sessions.keys().copied().collect()
    }

    pub fn has_session(&self, id: DeviceId) -> bool {
        self.sessions.contains_key(&id)
    }

    fn is_live(&self, id: DeviceId) -> bool {
        matches!(self.sessions.get(&id), Some(s) if s.phase == SessionPhase::Live)
    }

    /// Begins a publishing session for a paired camera.
    ///
    /// Any existing session for the device is stopped first.  `reply` is
    /// answered when the suspended start completes (see
    /// [`MediaCoupling::complete_start`]).
    pub fn start_publishing(&mut self, device: &Device, reply: Reply<Feed>) {
        let id = device.id();
        if !device.is_camera() {
            let _ = reply.send(Err(StageError::InvalidTransition {
                device_id: id,
                action: "start publishing on",
                state: device.pairing_state,
            }));
            return;
        }

        if self.stop_publishing(id) {
            info!(device_id = %id, "replacing active media session");
        }

        self.feeds.feed_for(device);
        let binding = self.factory.bind(device);
        let token = self.next_token;
        self.next_token += 1;
        let mode = binding.mode;
        self.feeds
            .update_streaming(id, |feed| feed.mark_starting(mode));

        let sender = Arc::clone(&binding.sender);
        self.sessions.insert(
            id,
            MediaSession {
                token,
                phase: SessionPhase::Starting,
                binding,
                driver_task: None,
                status_task: None,
            },
        );
        info!(device_id = %id, token, ?mode, "starting media session");

        let mailbox = self.mailbox.clone();
        tokio::spawn(async move {
            let result = sender.start_publishing().await;
            let event = MediaEvent::StartCompleted {
                device_id: id,
                token,
                sender,
                result,
                reply,
            };
            let command = StageCommand::Media(event);
            let undelivered = match mailbox.upgrade() {
                Some(tx) => tx.send(command).err().map(|e| e.0),
                None => Some(command),
            };
            if let Some(StageCommand::Media(MediaEvent::StartCompleted {
                sender,
                result: Ok(()),
                ..
            })) = undelivered
            {
                // The stage is gone; nobody will ever stop this sender.
                sender.stop_publishing().await;
            }
        });
    }

    /// Resumes a suspended start after re-validating its guard.
    ///
    /// `device` is the registry's current view of the device, if it still
    /// exists.  The start only goes live if the token still names the
    /// device's current session and the device is still a paired camera.
    pub fn complete_start(
        &mut self,
        device: Option<&Device>,
        device_id: DeviceId,
        token: SessionToken,
        sender: Arc<dyn MediaSender>,
        result: Result<(), MediaError>,
    ) -> StartOutcome {
        let current = matches!(
            self.sessions.get(&device_id),
            Some(s) if s.token == token && s.phase == SessionPhase::Starting
        );
        if !current {
            debug!(device_id = %device_id, token, "dropping stale session start");
            if result.is_ok() {
                spawn_stop(sender);
            }
            return StartOutcome::Superseded;
        }

        let device = match device {
            Some(d) if d.is_camera() => d,
            _ => {
                self.stop_publishing(device_id);
                if result.is_ok() {
                    spawn_stop(sender);
                }
                return StartOutcome::Superseded;
            }
        };

        if let Err(e) = result {
            warn!(device_id = %device_id, error = %e, "media session failed to start");
            if let Some(mut session) = self.sessions.remove(&device_id) {
                session.abort_tasks();
            }
            let reason = e.to_string();
            self.feeds
                .update_streaming(device_id, |feed| feed.mark_start_failed(reason.clone()));
            return StartOutcome::Failed(reason);
        }

        let video_enabled = self
            .feeds
            .get(device_id)
            .map_or(true, |feed| feed.is_video_enabled);
        let mailbox = self.mailbox.clone();
        let Some(session) = self.sessions.get_mut(&device_id) else {
            return StartOutcome::Superseded;
        };
        session.phase = SessionPhase::Live;
        let sink = FrameSink::new(device_id, token, mailbox);
        session.status_task = Some(spawn_status_forwarder(
            session.binding.sender.as_ref(),
            sink.clone(),
        ));
        if video_enabled {
            session.driver_task = session.binding.driver.as_ref().map(|d| d.spawn(sink));
        }
        session
            .binding
            .sender
            .set_return_audio_enabled(device.talkback_enabled);

        let mode = session.binding.mode;
        self.feeds
            .update_streaming(device_id, |feed| feed.mark_publishing(mode));
        info!(device_id = %device_id, token, "media session live");
        StartOutcome::Live
    }

    /// Tears down the device's session, if any.
    ///
    /// Streaming fields are cleared immediately; the sender's own shutdown
    /// runs in the background.  Returns `true` if a session existed.
    pub fn stop_publishing(&mut self, id: DeviceId) -> bool {
        let Some(mut session) = self.sessions.remove(&id) else {
            return false;
        };
        session.abort_tasks();
        spawn_stop(Arc::clone(&session.binding.sender));
        self.feeds.update_streaming(id, Feed::clear_streaming);
        info!(device_id = %id, token = session.token, "media session stopped");
        true
    }

    /// Ends every session and returns their senders so the caller can await
    /// each `stop_publishing` before the stage goes away.
    pub fn drain(&mut self) -> Vec<Arc<dyn MediaSender>> {
        let sessions: Vec<_> = self.sessions.drain().collect();
        sessions
            .into_iter()
            .map(|(id, mut session)| {
                session.abort_tasks();
                self.feeds.update_streaming(id, Feed::clear_streaming);
                info!(device_id = %id, token = session.token, "media session drained");
                session.binding.sender
            })
            .collect()
    }

    /// Flips the feed's video flag and pauses or resumes frame delivery
    /// without restarting the session.
    ///
    /// Returns the new value, or `None` if the device has no feed.
    pub fn toggle_video(&mut self, id: DeviceId) -> Option<bool> {
        let mut enabled = true;
        let found = self.feeds.update_streaming(id, |feed| {
            enabled = !feed.is_video_enabled;
            feed.set_video_enabled(enabled);
        });
        if !found {
            return None;
        }

        let mailbox = self.mailbox.clone();
        if let Some(session) = self.sessions.get_mut(&id) {
            if !enabled {
                session.stop_driver();
            } else if session.phase == SessionPhase::Live && session.driver_task.is_none() {
                let sink = FrameSink::new(id, session.token, mailbox);
                session.driver_task = session.binding.driver.as_ref().map(|d| d.spawn(sink));
            }
        }
        debug!(device_id = %id, enabled, "video toggled");
        Some(enabled)
    }

    /// Flips the feed's mute flag.  Never touches publishing or connection
    /// state.
    pub fn toggle_mute(&mut self, id: DeviceId) -> Option<bool> {
        let mut muted = false;
        let found = self.feeds.update_streaming(id, |feed| {
            muted = !feed.is_muted;
            feed.set_muted(muted);
        });
        found.then_some(muted)
    }

    /// Mirrors a sender status string into the feed for a current session.
    pub fn on_status(&mut self, id: DeviceId, token: SessionToken, status: String) {
        if !self.is_current(id, token) {
            trace!(device_id = %id, token, "dropping stale status");
            return;
        }
        self.feeds
            .update_streaming(id, |feed| feed.set_media_status(status));
    }

    /// Routes a frame from the session's driver to the sender and the feed.
    pub fn on_frame(&mut self, id: DeviceId, token: SessionToken, frame: VideoFrame) {
        if !self.is_current(id, token) || !self.is_live(id) {
            trace!(device_id = %id, token, "dropping frame without live session");
            return;
        }
        let frame = Arc::new(frame);
        let mut accepted = false;
        self.feeds.update_streaming(id, |feed| {
            if feed.is_video_enabled {
                feed.set_latest_frame(Arc::clone(&frame));
                accepted = true;
            }
        });
        if accepted {
            if let Some(session) = self.sessions.get(&id) {
                session.binding.sender.send_video_frame(&frame);
            }
        }
    }

    /// Routes a frame pushed by an external transport into the current
    /// session.
    pub fn deliver_external_frame(&mut self, id: DeviceId, frame: VideoFrame) {
        match self.sessions.get(&id).map(|s| s.token) {
            Some(token) => self.on_frame(id, token, frame),
            None => trace!(device_id = %id, "dropping external frame without session"),
        }
    }

    /// Forwards talkback audio while live and not muted.
    pub fn deliver_audio(&mut self, id: DeviceId, frame: &AudioFrame) {
        let muted = self.feeds.get(id).map_or(true, |feed| feed.is_muted);
        match self.sessions.get(&id) {
            Some(session) if session.phase == SessionPhase::Live && !muted => {
                session.binding.sender.send_audio_frame(frame);
            }
            _ => trace!(device_id = %id, "dropping audio frame"),
        }
    }

    /// Forwards push-to-talk to the live session's sender.
    ///
    /// # Errors
    ///
    /// [`StageError::InvalidTransition`] when the device has no live session.
    pub fn push_to_talk(&mut self, device: &Device, active: bool) -> Result<(), StageError> {
        match self.sessions.get(&device.id()) {
            Some(session) if session.phase == SessionPhase::Live => {
                session.binding.sender.push_to_talk(active);
                Ok(())
            }
            _ => Err(StageError::InvalidTransition {
                device_id: device.id(),
                action: "push to talk on",
                state: device.pairing_state,
            }),
        }
    }

    /// Applies the device's talkback flag to its live sender, if any.
    pub fn set_talkback(&mut self, id: DeviceId, enabled: bool) {
        if let Some(session) = self.sessions.get(&id) {
            if session.phase == SessionPhase::Live {
                session.binding.sender.set_return_audio_enabled(enabled);
            }
        }
    }

    fn is_current(&self, id: DeviceId, token: SessionToken) -> bool {
        matches!(self.sessions.get(&id), Some(s) if s.token == token)
    }
}

fn spawn_stop(sender: Arc<dyn MediaSender>) {
    tokio::spawn(async move {
        sender.stop_publishing().await;
    });
}

fn spawn_status_forwarder(sender: &dyn MediaSender, sink: FrameSink) -> JoinHandle<()> {
    let mut updates = sender.status_updates();
    tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let status = updates.borrow_and_update().clone();
            if !sink.status(status) {
                break;
            }
        }
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
