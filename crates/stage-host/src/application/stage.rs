//! Stage: the serialized context that owns the registry, the feed table, and
//! the media coupling.
//!
//! Exactly one task drives a `Stage` (see `infrastructure::runtime`).  It
//! takes [`StageCommand`]s off a mailbox and hands them to
//! [`Stage::handle`] one at a time, so every registry mutation, feed resync,
//! and media effect for a device is totally ordered.
//!
//! Timers and remote peers never touch the stage directly.  They post a
//! command, and the command re-checks its guard when it is finally handled.
//! This is how a confirmation that arrives after the user cancelled (or a
//! media start that completes after the device was unpaired) gets dropped.

use std::ops::ControlFlow;
use std::sync::Arc;

use stage_core::{
    Device, DeviceDescriptor, DeviceId, Feed, PairingEvent, RequestId, Role, StageError,
};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::application::commands::{DeviceQuery, Reply, StageCommand};
use crate::application::feed_projection::FeedProjection;
use crate::application::media_coupling::{
    MediaCoupling, MediaEvent, MediaSender, MediaSenderFactory, StartOutcome,
};
use crate::application::registry::{DeviceEvent, DeviceRegistry, RegistryListener};

/// Outbound half of the remote-pairing boundary.
///
/// Best effort: the stage never waits for, or depends on, delivery.
#[cfg_attr(test, mockall::automock)]
pub trait PairingSignaling: Send + Sync {
    /// Asks the remote side of `device_id` to confirm request `request_id`.
    fn send_request(&self, device_id: DeviceId, request_id: RequestId);

    /// Tells the remote side that the pairing was withdrawn.
    fn send_cancel(&self, device_id: DeviceId);
}

/// Signaling that goes nowhere, for hosts with no remote peer.
pub struct NoopSignaling;

impl PairingSignaling for NoopSignaling {
    fn send_request(&self, _device_id: DeviceId, _request_id: RequestId) {}
    fn send_cancel(&self, _device_id: DeviceId) {}
}

/// Capacity of the device-event broadcast channel.
pub const EVENT_CAPACITY: usize = 256;

/// The serialized stage context.
pub struct Stage {
    registry: DeviceRegistry,
    feeds: Arc<FeedProjection>,
    media: MediaCoupling,
    signaling: Arc<dyn PairingSignaling>,
}

impl Stage {
    /// Builds a stage whose background media work posts back into `mailbox`.
    ///
    /// The mailbox is held weakly, so the stage never keeps its own task
    /// alive.  `events` receives one [`DeviceEvent`] per committed device
    /// change.
    pub fn new(
        factory: Arc<dyn MediaSenderFactory>,
        signaling: Arc<dyn PairingSignaling>,
        mailbox: mpsc::WeakUnboundedSender<StageCommand>,
        events: broadcast::Sender<DeviceEvent>,
    ) -> Self {
        let feeds = Arc::new(FeedProjection::new());
        let mut registry = DeviceRegistry::new();
        registry.subscribe(Arc::clone(&feeds) as Arc<dyn RegistryListener>);
        registry.subscribe(Arc::new(events));
        let media = MediaCoupling::new(Arc::clone(&feeds), factory, mailbox);
        Self {
            registry,
            feeds,
            media,
            signaling,
        }
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn feeds(&self) -> &FeedProjection {
        &self.feeds
    }

    pub fn media(&self) -> &MediaCoupling {
        &self.media
    }

    /// Handles one command.  Never panics on bad input; every failure goes
    /// back through the command's reply, or is logged for fire-and-forget
    /// ingress.
    ///
    /// Returns [`ControlFlow::Break`] with the shutdown reply when the task
    /// driving the stage should drain it and stop.
    pub fn handle(&mut self, command: StageCommand) -> ControlFlow<oneshot::Sender<()>> {
        match command {
            StageCommand::Discovered(descriptor) => {
                self.discovered(descriptor);
            }
            StageCommand::IncomingRequest { device_id } => self.incoming_request(device_id),
            StageCommand::RemoteConfirmed {
                device_id,
                request_id,
            } => self.remote_confirmed(device_id, request_id),
            StageCommand::DeliverVideoFrame { device_id, frame } => {
                self.media.deliver_external_frame(device_id, frame)
            }
            StageCommand::DeliverAudioFrame { device_id, frame } => {
                self.media.deliver_audio(device_id, &frame)
            }

            StageCommand::RequestPairing { device_id, reply } => {
                respond(reply, self.request_pairing(device_id))
            }
            StageCommand::AcceptIncomingRequest { device_id, reply } => {
                respond(reply, self.accept_incoming_request(device_id))
            }
            StageCommand::DeclineIncomingRequest { device_id, reply } => {
                respond(reply, self.decline_incoming_request(device_id))
            }
            StageCommand::CancelPairingRequest { device_id, reply } => {
                respond(reply, self.cancel_pairing_request(device_id))
            }
            StageCommand::AssignRole {
                device_id,
                role,
                reply,
            } => respond(reply, self.assign_role(device_id, role)),
            StageCommand::Unpair { device_id, reply } => {
                respond(reply, self.unpair(device_id))
            }
            StageCommand::SetTalkback {
                device_id,
                enabled,
                reply,
            } => respond(reply, self.set_talkback(device_id, enabled)),
            StageCommand::PushToTalk {
                device_id,
                active,
                reply,
            } => respond(reply, self.push_to_talk(device_id, active)),
            StageCommand::ToggleMute { device_id, reply } => {
                respond(reply, self.toggle_mute(device_id))
            }
            StageCommand::ToggleVideo { device_id, reply } => {
                respond(reply, self.toggle_video(device_id))
            }
            StageCommand::StartPublishing { device_id, reply } => {
                self.start_publishing(device_id, reply)
            }
            StageCommand::StopPublishing { device_id, reply } => {
                respond(reply, self.stop_publishing(device_id))
            }

            StageCommand::Query { query, reply } => {
                let _ = reply.send(self.query(query));
            }
            StageCommand::Device { device_id, reply } => {
                respond(reply, self.registry.require(device_id).cloned())
            }
            StageCommand::Feed { device_id, reply } => respond(reply, self.feed(device_id)),
            StageCommand::Feeds { reply } => {
                let _ = reply.send(self.feeds.all());
            }
            StageCommand::SubscribeFeed { device_id, reply } => {
                let subscription = self
                    .registry
                    .require(device_id)
                    .map(|device| self.feeds.subscribe(device));
                respond(reply, subscription)
            }
            StageCommand::ActiveSessions { reply } => {
                let _ = reply.send(self.media.active_sessions());
            }

            StageCommand::Media(event) => self.media_event(event),
            StageCommand::Shutdown { reply } => return ControlFlow::Break(reply),
        }
        ControlFlow::Continue(())
    }

    /// Ends every media session and returns the senders still to be
    /// stopped.  Pairing state is left as is.
    pub fn shutdown(&mut self) -> Vec<Arc<dyn MediaSender>> {
        let senders = self.media.drain();
        info!(sessions = senders.len(), "stage shutting down");
        senders
    }

    // ── Discovery and remote ingress ─────────────────────────────────────────

    /// Registers a discovered device; re-discovery is a no-op.
    pub fn discovered(&mut self, descriptor: DeviceDescriptor) -> Device {
        self.registry.upsert(descriptor)
    }

    /// The remote side initiated pairing.  Ignored unless discoverable.
    pub fn incoming_request(&mut self, device_id: DeviceId) {
        match self
            .registry
            .mutate(device_id, |d| d.apply(PairingEvent::IncomingRequest))
        {
            Ok(_) => info!(device_id = %device_id, "incoming pairing request"),
            Err(e) => debug!(device_id = %device_id, error = %e, "ignoring incoming request"),
        }
    }

    /// The remote side confirmed `request_id`.  Stale confirmations are
    /// dropped by the transition guard.
    pub fn remote_confirmed(&mut self, device_id: DeviceId, request_id: RequestId) {
        match self.registry.mutate(device_id, |d| {
            d.apply(PairingEvent::RemoteConfirmed { request_id })
        }) {
            Ok(_) => info!(device_id = %device_id, "pairing confirmed by remote"),
            Err(e) => debug!(
                device_id = %device_id,
                request_id = %request_id,
                error = %e,
                "dropping stale confirmation"
            ),
        }
    }

    // ── Pairing commands ─────────────────────────────────────────────────────

    /// Sends a pairing request.  Repeating it while the request is pending is
    /// an accepted no-op and does not re-signal the remote.
    pub fn request_pairing(&mut self, device_id: DeviceId) -> Result<Device, StageError> {
        let request_id = Uuid::new_v4();
        let (device, transition) = self.registry.mutate(device_id, |d| {
            d.apply(PairingEvent::RequestPairing { request_id })
        })?;
        if transition.changed {
            info!(device_id = %device_id, request_id = %request_id, "pairing requested");
            self.signaling.send_request(device_id, request_id);
        }
        Ok(device)
    }

    pub fn accept_incoming_request(&mut self, device_id: DeviceId) -> Result<Device, StageError> {
        let (device, _) = self
            .registry
            .mutate(device_id, |d| d.apply(PairingEvent::AcceptIncoming))?;
        info!(device_id = %device_id, "incoming request accepted");
        Ok(device)
    }

    /// Shared path of decline, cancel, and unpair: apply the reset, stop any
    /// media session, and reset the feed.
    fn abort_pairing(
        &mut self,
        device_id: DeviceId,
        event: PairingEvent,
    ) -> Result<Device, StageError> {
        // Check the guard first so observers never see a reset pairing with
        // a feed that is still publishing.
        self.registry.require(device_id)?.clone().apply(event)?;
        self.media.stop_publishing(device_id);
        self.feeds.reset(device_id);
        let (device, transition) = self.registry.mutate(device_id, |d| d.apply(event))?;
        if transition.from != transition.to {
            self.signaling.send_cancel(device_id);
        }
        info!(device_id = %device_id, action = event.action(), from = %transition.from, "pairing reset");
        Ok(device)
    }

    pub fn decline_incoming_request(&mut self, device_id: DeviceId) -> Result<Device, StageError> {
        self.abort_pairing(device_id, PairingEvent::Decline)
    }

    pub fn cancel_pairing_request(&mut self, device_id: DeviceId) -> Result<Device, StageError> {
        self.abort_pairing(device_id, PairingEvent::Cancel)
    }

    /// Never fails for a known device.
    pub fn unpair(&mut self, device_id: DeviceId) -> Result<Device, StageError> {
        self.abort_pairing(device_id, PairingEvent::Unpair)
    }

    /// Assigns or changes the role in place.  Leaving the camera role stops
    /// the media session first.
    pub fn assign_role(&mut self, device_id: DeviceId, role: Role) -> Result<Device, StageError> {
        let event = PairingEvent::AssignRole(role);
        let preview = self.registry.require(device_id)?.clone().apply(event)?;
        if preview.requires_teardown() && self.media.stop_publishing(device_id) {
            info!(device_id = %device_id, "camera role released, media session stopped");
        }
        let (device, _) = self.registry.mutate(device_id, |d| d.apply(event))?;
        info!(device_id = %device_id, %role, "role assigned");
        Ok(device)
    }

    pub fn set_talkback(&mut self, device_id: DeviceId, enabled: bool) -> Result<Device, StageError> {
        let (device, _) = self
            .registry
            .mutate(device_id, |d| d.apply(PairingEvent::SetTalkback(enabled)))?;
        self.media.set_talkback(device_id, enabled);
        debug!(device_id = %device_id, enabled, "talkback changed");
        Ok(device)
    }

    pub fn push_to_talk(&mut self, device_id: DeviceId, active: bool) -> Result<(), StageError> {
        let device = self.registry.require(device_id)?;
        self.media.push_to_talk(device, active)
    }

    // ── Media commands ───────────────────────────────────────────────────────

    /// Begins a publishing session; `reply` is answered once the sender has
    /// started (or failed to).
    pub fn start_publishing(&mut self, device_id: DeviceId, reply: Reply<Feed>) {
        match self.registry.require(device_id) {
            Ok(device) => self.media.start_publishing(device, reply),
            Err(e) => {
                let _ = reply.send(Err(e));
            }
        }
    }

    pub fn stop_publishing(&mut self, device_id: DeviceId) -> Result<Feed, StageError> {
        let device = self.registry.require(device_id)?;
        let feed = self.feeds.feed_for(device);
        if !self.media.stop_publishing(device_id) {
            return Ok(feed);
        }
        self.feed(device_id)
    }

    pub fn toggle_mute(&mut self, device_id: DeviceId) -> Result<Feed, StageError> {
        let device = self.registry.require(device_id)?;
        self.feeds.feed_for(device);
        self.media.toggle_mute(device_id);
        self.feed(device_id)
    }

    pub fn toggle_video(&mut self, device_id: DeviceId) -> Result<Feed, StageError> {
        let device = self.registry.require(device_id)?;
        self.feeds.feed_for(device);
        self.media.toggle_video(device_id);
        self.feed(device_id)
    }

    // ── Queries ──────────────────────────────────────────────────────────────

    pub fn query(&self, query: DeviceQuery) -> Vec<Device> {
        match query {
            DeviceQuery::All => self.registry.all(),
            DeviceQuery::Discoverable => self.registry.discoverable(),
            DeviceQuery::IncomingRequests => self.registry.incoming_requests(),
            DeviceQuery::OutgoingRequests => self.registry.outgoing_requests(),
            DeviceQuery::AwaitingRoleSelection => self.registry.awaiting_role_selection(),
            DeviceQuery::Paired => self.registry.paired(),
            DeviceQuery::CamerasOnly => self.registry.cameras_only(),
        }
    }

    /// Returns the device's feed, creating it on first access.
    pub fn feed(&self, device_id: DeviceId) -> Result<Feed, StageError> {
        let device = self.registry.require(device_id)?;
        Ok(self.feeds.feed_for(device))
    }

    // ── Media completions ────────────────────────────────────────────────────

    fn media_event(&mut self, event: MediaEvent) {
        match event {
            MediaEvent::StartCompleted {
                device_id,
                token,
                sender,
                result,
                reply,
            } => {
                let device = self.registry.get(device_id).cloned();
                let outcome =
                    self.media
                        .complete_start(device.as_ref(), device_id, token, sender, result);
                let answer = self.resolve_start(device_id, outcome);
                let _ = reply.send(answer);
            }
            MediaEvent::Status {
                device_id,
                token,
                status,
            } => self.media.on_status(device_id, token, status),
            MediaEvent::Frame {
                device_id,
                token,
                frame,
            } => self.media.on_frame(device_id, token, frame),
        }
    }

    fn resolve_start(&mut self, device_id: DeviceId, outcome: StartOutcome) -> Result<Feed, StageError> {
        match outcome {
            StartOutcome::Live => {
                self.registry.mutate(device_id, |d| d.mark_media_live())?;
                self.feed(device_id)
            }
            StartOutcome::Failed(reason) => {
                if let Err(e) = self.registry.mutate(device_id, |d| d.mark_media_failed()) {
                    warn!(device_id = %device_id, error = %e, "could not revert connection state");
                }
                Err(StageError::SessionStartFailure { device_id, reason })
            }
            StartOutcome::Superseded => Err(StageError::SessionStartFailure {
                device_id,
                reason: "session was stopped before it started".to_string(),
            }),
        }
    }
}

fn respond<T>(reply: oneshot::Sender<Result<T, StageError>>, result: Result<T, StageError>) {
    if let Err(e) = &result {
        debug!(error = %e, kind = e.kind(), "command rejected");
    }
    // The caller may have stopped waiting.
    let _ = reply.send(result);
}

// ── Tests ─────────────────────────────────────────────────────────────────────
