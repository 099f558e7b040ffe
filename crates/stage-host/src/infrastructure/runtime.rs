//! Runtime: the task that owns the [`Stage`] and the cloneable handle used to
//! talk to it.
//!
//! ```text
//!  UI / ui_bridge ─┐
//!  discovery pump ─┼──► StageHandle ──mpsc──► stage task ──► Stage::handle
//!  signaling peer ─┤                             ▲
//!  media tasks ────┘ (FrameSink) ────────────────┘
//! ```
//!
//! Every caller gets an answer through a oneshot channel.  If the stage task
//! has stopped, calls fail with [`StageError::ServiceUnavailable`] instead of
//! hanging.
//!
//! Only `StageHandle`s keep the mailbox open.  The stage itself and anything
//! it spawns post through weak senders, so the task ends on its own once the
//! last handle is dropped, or right after [`StageHandle::shutdown`].

use std::ops::ControlFlow;
use std::sync::Arc;

use stage_core::{
    AudioFrame, Device, DeviceDescriptor, DeviceId, Feed, RequestId, Role, StageError, VideoFrame,
};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::application::commands::{DeviceQuery, Reply, StageCommand};
use crate::application::media_coupling::MediaSenderFactory;
use crate::application::registry::DeviceEvent;
use crate::application::stage::{PairingSignaling, Stage, EVENT_CAPACITY};

/// Cloneable client of the stage task.
#[derive(Clone)]
pub struct StageHandle {
    tx: mpsc::UnboundedSender<StageCommand>,
    events: broadcast::Sender<DeviceEvent>,
}

/// A handle that does not keep the stage task alive.
#[derive(Clone)]
pub struct WeakStageHandle {
    tx: mpsc::WeakUnboundedSender<StageCommand>,
    events: broadcast::Sender<DeviceEvent>,
}

impl WeakStageHandle {
    /// Returns a usable handle while the stage task is still running.
    pub fn upgrade(&self) -> Option<StageHandle> {
        Some(StageHandle {
            tx: self.tx.upgrade()?,
            events: self.events.clone(),
        })
    }
}

/// Starts the stage task.
///
/// `signaling` is built from a weak handle to the new stage so a simulated
/// peer can post confirmations back into it without keeping it alive.
pub fn spawn_stage<F>(
    factory: Arc<dyn MediaSenderFactory>,
    signaling: F,
) -> (StageHandle, JoinHandle<()>)
where
    F: FnOnce(WeakStageHandle) -> Arc<dyn PairingSignaling>,
{
    let (tx, mut rx) = mpsc::unbounded_channel();
    let (events, _) = broadcast::channel(EVENT_CAPACITY);
    let handle = StageHandle { tx, events };

    let signaling = signaling(handle.downgrade());
    let mut stage = Stage::new(
        factory,
        signaling,
        handle.tx.downgrade(),
        handle.events.clone(),
    );

    let task = tokio::spawn(async move {
        info!("stage started");
        while let Some(command) = rx.recv().await {
            if let ControlFlow::Break(reply) = stage.handle(command) {
                for sender in stage.shutdown() {
                    sender.stop_publishing().await;
                }
                info!("stage stopped");
                let _ = reply.send(());
                return;
            }
        }
        debug!("stage mailbox closed");
    });

    (handle, task)
}

impl StageHandle {
    pub fn downgrade(&self) -> WeakStageHandle {
        WeakStageHandle {
            tx: self.tx.downgrade(),
            events: self.events.clone(),
        }
    }

    /// Stops every media session, waits for the senders to finish stopping,
    /// and ends the stage task.  Later calls fail with
    /// [`StageError::ServiceUnavailable`].
    pub async fn shutdown(&self) -> Result<(), StageError> {
        self.ask(|reply| StageCommand::Shutdown { reply }).await
    }

    /// Subscribes to one event per committed device change.
    pub fn subscribe_events(&self) -> broadcast::Receiver<DeviceEvent> {
        self.events.subscribe()
    }

    // ── Ingress ──────────────────────────────────────────────────────────────

    /// Reports a discovered device.  Fire-and-forget.
    pub fn discovered(&self, descriptor: DeviceDescriptor) -> Result<(), StageError> {
        self.post(StageCommand::Discovered(descriptor))
    }

    /// The remote side of `device_id` asked to pair.
    pub fn incoming_request(&self, device_id: DeviceId) -> Result<(), StageError> {
        self.post(StageCommand::IncomingRequest { device_id })
    }

    /// The remote side confirmed request `request_id`.
    pub fn remote_confirmed(
        &self,
        device_id: DeviceId,
        request_id: RequestId,
    ) -> Result<(), StageError> {
        self.post(StageCommand::RemoteConfirmed {
            device_id,
            request_id,
        })
    }

    /// Delivers a frame from an external transport.
    pub fn deliver_frame(&self, device_id: DeviceId, frame: VideoFrame) -> Result<(), StageError> {
        self.post(StageCommand::DeliverVideoFrame { device_id, frame })
    }

    /// Delivers outbound talkback audio for a camera device.
    pub fn deliver_audio_frame(
        &self,
        device_id: DeviceId,
        frame: AudioFrame,
    ) -> Result<(), StageError> {
        self.post(StageCommand::DeliverAudioFrame { device_id, frame })
    }

    // ── Commands ─────────────────────────────────────────────────────────────

    pub async fn request_pairing(&self, device_id: DeviceId) -> Result<Device, StageError> {
        self.call(|reply| StageCommand::RequestPairing { device_id, reply })
            .await
    }

    pub async fn accept_incoming_request(&self, device_id: DeviceId) -> Result<Device, StageError> {
        self.call(|reply| StageCommand::AcceptIncomingRequest { device_id, reply })
            .await
    }

    pub async fn decline_incoming_request(
        &self,
        device_id: DeviceId,
    ) -> Result<Device, StageError> {
        self.call(|reply| StageCommand::DeclineIncomingRequest { device_id, reply })
            .await
    }

    pub async fn cancel_pairing_request(&self, device_id: DeviceId) -> Result<Device, StageError> {
        self.call(|reply| StageCommand::CancelPairingRequest { device_id, reply })
            .await
    }

    pub async fn assign_role(&self, device_id: DeviceId, role: Role) -> Result<Device, StageError> {
        self.call(|reply| StageCommand::AssignRole {
            device_id,
            role,
            reply,
        })
        .await
    }

    pub async fn unpair(&self, device_id: DeviceId) -> Result<Device, StageError> {
        self.call(|reply| StageCommand::Unpair { device_id, reply })
            .await
    }

    pub async fn set_talkback(
        &self,
        device_id: DeviceId,
        enabled: bool,
    ) -> Result<Device, StageError> {
        self.call(|reply| StageCommand::SetTalkback {
            device_id,
            enabled,
            reply,
        })
        .await
    }

    pub async fn push_to_talk(&self, device_id: DeviceId, active: bool) -> Result<(), StageError> {
        self.call(|reply| StageCommand::PushToTalk {
            device_id,
            active,
            reply,
        })
        .await
    }

    pub async fn toggle_mute(&self, device_id: DeviceId) -> Result<Feed, StageError> {
        self.call(|reply| StageCommand::ToggleMute { device_id, reply })
            .await
    }

    pub async fn toggle_video(&self, device_id: DeviceId) -> Result<Feed, StageError> {
        self.call(|reply| StageCommand::ToggleVideo { device_id, reply })
            .await
    }

    /// Starts publishing.  Resolves once the media sender has started, with
    /// [`StageError::SessionStartFailure`] if it could not.
    pub async fn start_publishing(&self, device_id: DeviceId) -> Result<Feed, StageError> {
        self.call(|reply| StageCommand::StartPublishing { device_id, reply })
            .await
    }

    pub async fn stop_publishing(&self, device_id: DeviceId) -> Result<Feed, StageError> {
        self.call(|reply| StageCommand::StopPublishing { device_id, reply })
            .await
    }

    // ── Queries ──────────────────────────────────────────────────────────────

    pub async fn device(&self, device_id: DeviceId) -> Result<Device, StageError> {
        self.call(|reply| StageCommand::Device { device_id, reply })
            .await
    }

    pub async fn devices(&self) -> Result<Vec<Device>, StageError> {
        self.query(DeviceQuery::All).await
    }

    pub async fn discoverable(&self) -> Result<Vec<Device>, StageError> {
        self.query(DeviceQuery::Discoverable).await
    }

    pub async fn incoming_requests(&self) -> Result<Vec<Device>, StageError> {
        self.query(DeviceQuery::IncomingRequests).await
    }

    pub async fn outgoing_requests(&self) -> Result<Vec<Device>, StageError> {
        self.query(DeviceQuery::OutgoingRequests).await
    }

    pub async fn awaiting_role_selection(&self) -> Result<Vec<Device>, StageError> {
        self.query(DeviceQuery::AwaitingRoleSelection).await
    }

    pub async fn paired(&self) -> Result<Vec<Device>, StageError> {
        self.query(DeviceQuery::Paired).await
    }

    pub async fn cameras_only(&self) -> Result<Vec<Device>, StageError> {
        self.query(DeviceQuery::CamerasOnly).await
    }

    pub async fn query(&self, query: DeviceQuery) -> Result<Vec<Device>, StageError> {
        self.ask(|reply| StageCommand::Query { query, reply }).await
    }

    /// Returns the device's feed, creating it on first access.
    pub async fn feed(&self, device_id: DeviceId) -> Result<Feed, StageError> {
        self.call(|reply| StageCommand::Feed { device_id, reply })
            .await
    }

    pub async fn feeds(&self) -> Result<Vec<Feed>, StageError> {
        self.ask(|reply| StageCommand::Feeds { reply }).await
    }

    /// Returns a live view of the device's feed that survives resync and
    /// reset.
    pub async fn subscribe_feed(
        &self,
        device_id: DeviceId,
    ) -> Result<watch::Receiver<Feed>, StageError> {
        self.call(|reply| StageCommand::SubscribeFeed { device_id, reply })
            .await
    }

    /// Devices with a starting or live media session.
    pub async fn active_sessions(&self) -> Result<Vec<DeviceId>, StageError> {
        self.ask(|reply| StageCommand::ActiveSessions { reply })
            .await
    }

    // ── Plumbing ─────────────────────────────────────────────────────────────

    fn post(&self, command: StageCommand) -> Result<(), StageError> {
        self.tx
            .send(command)
            .map_err(|_| StageError::ServiceUnavailable)
    }

    async fn ask<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> StageCommand,
    ) -> Result<T, StageError> {
        let (reply, answer) = oneshot::channel();
        self.post(build(reply))?;
        answer.await.map_err(|_| StageError::ServiceUnavailable)
    }

    async fn call<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> StageCommand,
    ) -> Result<T, StageError> {
        self.ask(build).await?
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::stage::NoopSignaling;
    use crate::infrastructure::media::mock::{RecordingFactory, RecordingSender};
    use stage_core::{Capability, DeviceKind, PairingState};
    use uuid::Uuid;

    fn start() -> (StageHandle, JoinHandle<()>) {
        let sender = Arc::new(RecordingSender::new());
        spawn_stage(Arc::new(RecordingFactory::new(sender)), |_| {
            Arc::new(NoopSignaling) as Arc<dyn PairingSignaling>
        })
    }

    #[tokio::test]
    async fn test_discovered_devices_are_queryable() {
        // Arrange
        let (handle, _task) = start();
        let id = Uuid::new_v4();

        // Act
        handle
            .discovered(DeviceDescriptor {
                id,
                name: "Lobby".to_string(),
                kind: DeviceKind::Capture,
                transports: Default::default(),
                capabilities: [Capability::Camera].into_iter().collect(),
            })
            .unwrap();
        let devices = handle.discoverable().await.unwrap();

        // Assert
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].pairing_state, PairingState::Discoverable);
    }

    #[tokio::test]
    async fn test_calls_fail_with_service_unavailable_after_shutdown() {
        // Arrange
        let (handle, task) = start();
        task.abort();
        let _ = task.await;

        // Act
        let result = handle.devices().await;

        // Assert
        assert_eq!(result, Err(StageError::ServiceUnavailable));
    }

    #[tokio::test]
    async fn test_unknown_device_reports_not_found() {
        let (handle, _task) = start();
        let id = Uuid::new_v4();

        assert_eq!(handle.feed(id).await, Err(StageError::NotFound(id)));
    }

    #[tokio::test]
    async fn test_task_ends_once_last_handle_is_dropped() {
        // Arrange
        let (handle, task) = start();
        handle.devices().await.unwrap();

        // Act
        drop(handle);
        let finished = tokio::time::timeout(std::time::Duration::from_secs(2), task).await;

        // Assert
        assert!(matches!(finished, Ok(Ok(()))));
    }

    #[tokio::test]
    async fn test_shutdown_stops_live_sessions_before_returning() {
        // Arrange
        let sender = Arc::new(RecordingSender::new());
        let (handle, task) = spawn_stage(
            Arc::new(RecordingFactory::new(Arc::clone(&sender))),
            |_| Arc::new(NoopSignaling) as Arc<dyn PairingSignaling>,
        );
        let id = Uuid::new_v4();
        handle
            .discovered(DeviceDescriptor {
                id,
                name: "Wing".to_string(),
                kind: DeviceKind::Phone,
                transports: Default::default(),
                capabilities: [Capability::Camera].into_iter().collect(),
            })
            .unwrap();
        handle.incoming_request(id).unwrap();
        handle.accept_incoming_request(id).await.unwrap();
        handle.assign_role(id, stage_core::Role::Camera).await.unwrap();
        handle.start_publishing(id).await.unwrap();

        // Act
        handle.shutdown().await.unwrap();

        // Assert
        assert_eq!(sender.stop_count(), 1);
        assert!(task.await.is_ok());
        assert_eq!(handle.devices().await, Err(StageError::ServiceUnavailable));
    }
}
