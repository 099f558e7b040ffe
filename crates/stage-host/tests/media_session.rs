//! Integration tests for media sessions: start/stop, feed projection while
//! publishing, and teardown on pairing changes.

use std::sync::Arc;
use std::time::Duration;

use stage_core::{
    AudioFrame, Capability, ConnectionState, DeviceDescriptor, DeviceId, DeviceKind, PairingState,
    Role, StageError, StreamingMode, VideoFrame,
};
use stage_host::application::stage::{NoopSignaling, PairingSignaling};
use stage_host::infrastructure::media::mock::{RecordingFactory, RecordingSender};
use stage_host::infrastructure::media::SimulatedStreamDriver;
use stage_host::infrastructure::runtime::{spawn_stage, StageHandle};
use tokio_test::assert_ok;
use uuid::Uuid;

// ── Helpers ───────────────────────────────────────────────────────────────────

fn start(factory: RecordingFactory) -> StageHandle {
    let (handle, _task) = spawn_stage(Arc::new(factory), |_| {
        Arc::new(NoopSignaling) as Arc<dyn PairingSignaling>
    });
    handle
}

fn external() -> (StageHandle, Arc<RecordingSender>) {
    let sender = Arc::new(RecordingSender::new());
    (start(RecordingFactory::new(Arc::clone(&sender))), sender)
}

async fn paired_camera(stage: &StageHandle) -> DeviceId {
    let id = Uuid::new_v4();
    stage
        .discovered(DeviceDescriptor {
            id,
            name: "Front of House".to_string(),
            kind: DeviceKind::Tablet,
            transports: Default::default(),
            capabilities: [Capability::Camera, Capability::Microphone]
                .into_iter()
                .collect(),
        })
        .unwrap();
    stage.incoming_request(id).unwrap();
    stage.accept_incoming_request(id).await.unwrap();
    stage.assign_role(id, Role::Camera).await.unwrap();
    id
}

fn frame(sequence: u64) -> VideoFrame {
    VideoFrame::new(sequence, 2, 2, vec![0u8; 4])
}

// ── Scenarios ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_scenario_a_request_confirm_assign_then_publish() {
    // Arrange
    let (stage, sender) = external();
    let id = Uuid::new_v4();
    stage
        .discovered(DeviceDescriptor {
            id,
            name: "D".to_string(),
            kind: DeviceKind::Phone,
            transports: Default::default(),
            capabilities: [Capability::Camera, Capability::Microphone]
                .into_iter()
                .collect(),
        })
        .unwrap();

    // Act: request, remote confirms, assign camera.
    let requested = stage.request_pairing(id).await.unwrap();
    let request_id = requested.pending_request.unwrap();
    stage.remote_confirmed(id, request_id).unwrap();
    let paired = stage.assign_role(id, Role::Camera).await.unwrap();
    let before_start = stage.feed(id).await.unwrap();
    let live = stage.start_publishing(id).await.unwrap();

    // Assert
    assert_eq!(requested.pairing_state, PairingState::OutgoingRequest);
    assert_eq!(paired.pairing_state, PairingState::Paired);
    assert_eq!(paired.connection_state, ConnectionState::Streaming);
    assert!(!before_start.is_publishing);
    assert!(live.is_publishing);
    assert_eq!(live.streaming_mode, StreamingMode::External);
    assert_eq!(sender.start_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_scenario_c_unpair_while_publishing_leaves_no_session() {
    // Arrange
    let (stage, sender) = external();
    let id = paired_camera(&stage).await;
    assert_ok!(stage.start_publishing(id).await);

    // Act
    let device = stage.unpair(id).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1)).await;

    // Assert
    let feed = stage.feed(id).await.unwrap();
    assert_eq!(device.pairing_state, PairingState::Discoverable);
    assert!(!feed.is_publishing);
    assert_eq!(feed.streaming_mode, StreamingMode::None);
    assert!(feed.latest_frame.is_none());
    assert!(stage.active_sessions().await.unwrap().is_empty());
    assert_eq!(sender.stop_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unpair_while_starting_stops_the_late_sender() {
    // Arrange
    let (stage, sender) = external();
    sender.delay_starts_by(Duration::from_secs(1));
    let id = paired_camera(&stage).await;
    let starter = stage.clone();
    let pending = tokio::spawn(async move { starter.start_publishing(id).await });
    tokio::time::sleep(Duration::from_millis(1)).await;

    // Act
    stage.unpair(id).await.unwrap();
    let result = pending.await.unwrap();
    tokio::time::sleep(Duration::from_millis(1)).await;

    // Assert
    assert!(matches!(result, Err(StageError::SessionStartFailure { .. })));
    assert!(stage.active_sessions().await.unwrap().is_empty());
    assert_eq!(sender.start_count(), 1);
    // Session teardown and orphaned start both stop the sender.
    assert_eq!(sender.stop_count(), 2);
}

#[tokio::test]
async fn test_talkback_toggle_does_not_reset_live_feed() {
    // Arrange
    let (stage, sender) = external();
    let id = paired_camera(&stage).await;
    stage.start_publishing(id).await.unwrap();
    stage.deliver_frame(id, frame(42)).unwrap();
    let before = stage.feed(id).await.unwrap();

    // Act
    let device = stage.set_talkback(id, true).await.unwrap();
    let after = stage.feed(id).await.unwrap();

    // Assert
    assert!(device.talkback_enabled);
    assert!(sender.return_audio_enabled());
    assert_eq!(before.latest_frame.as_ref().map(|f| f.sequence), Some(42));
    assert!(after.is_publishing);
    assert_eq!(after.latest_frame.as_ref().map(|f| f.sequence), Some(42));
    assert_eq!(after.streaming_mode, StreamingMode::External);
}

#[tokio::test]
async fn test_failed_start_reverts_device_and_feed() {
    // Arrange
    let (stage, sender) = external();
    sender.fail_starts_with("no uplink");
    let id = paired_camera(&stage).await;

    // Act
    let result = stage.start_publishing(id).await;

    // Assert
    match result {
        Err(StageError::SessionStartFailure { device_id, reason }) => {
            assert_eq!(device_id, id);
            assert!(reason.contains("no uplink"));
        }
        other => panic!("expected SessionStartFailure, got {other:?}"),
    }
    let device = stage.device(id).await.unwrap();
    let feed = stage.feed(id).await.unwrap();
    assert_eq!(device.connection_state, ConnectionState::Connected);
    assert!(!feed.is_publishing);
    assert!(feed.connection_status_text.contains("no uplink"));
    assert!(stage.active_sessions().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_restarting_keeps_one_session_per_device() {
    // Arrange
    let (stage, sender) = external();
    let id = paired_camera(&stage).await;
    stage.start_publishing(id).await.unwrap();

    // Act
    stage.start_publishing(id).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1)).await;

    // Assert
    assert_eq!(stage.active_sessions().await.unwrap(), vec![id]);
    assert_eq!(sender.start_count(), 2);
    assert_eq!(sender.stop_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_role_change_to_viewer_stops_session_in_place() {
    // Arrange
    let (stage, sender) = external();
    let id = paired_camera(&stage).await;
    stage.start_publishing(id).await.unwrap();

    // Act
    let device = stage.assign_role(id, Role::Viewer).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1)).await;

    // Assert
    let feed = stage.feed(id).await.unwrap();
    assert_eq!(device.pairing_state, PairingState::Paired);
    assert_eq!(device.connection_state, ConnectionState::Connected);
    assert_eq!(feed.role_label, "Viewer");
    assert!(!feed.is_publishing);
    assert_eq!(sender.stop_count(), 1);
}

#[tokio::test]
async fn test_toggle_mute_never_touches_publishing() {
    // Arrange
    let (stage, _sender) = external();
    let id = paired_camera(&stage).await;
    stage.start_publishing(id).await.unwrap();

    // Act
    let muted = stage.toggle_mute(id).await.unwrap();
    let device = stage.device(id).await.unwrap();

    // Assert
    assert!(muted.is_muted);
    assert!(muted.is_publishing);
    assert_eq!(device.connection_state, ConnectionState::Streaming);
}

#[tokio::test]
async fn test_push_to_talk_and_audio_follow_session() {
    // Arrange
    let (stage, sender) = external();
    let id = paired_camera(&stage).await;
    let audio = AudioFrame {
        sample_rate: 16_000,
        channels: 1,
        samples: vec![1i16; 160].into(),
    };

    // Act / Assert
    assert!(matches!(
        stage.push_to_talk(id, true).await,
        Err(StageError::InvalidTransition { .. })
    ));
    stage.start_publishing(id).await.unwrap();
    stage.push_to_talk(id, true).await.unwrap();
    stage.deliver_audio_frame(id, audio).unwrap();
    stage.feed(id).await.unwrap();

    assert_eq!(sender.push_to_talk_calls(), vec![true]);
    assert_eq!(sender.audio_frame_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_simulated_driver_feeds_frames_and_pauses_with_video() {
    // Arrange
    let sender = Arc::new(RecordingSender::new());
    let driver = Arc::new(SimulatedStreamDriver::new(Duration::from_millis(100), 4, 4));
    let stage = start(RecordingFactory::with_driver(Arc::clone(&sender), driver));
    let id = paired_camera(&stage).await;
    let mut feed_rx = stage.subscribe_feed(id).await.unwrap();

    // Act: run for a while, pause video, then resume.
    let live = stage.start_publishing(id).await.unwrap();
    tokio::time::sleep(Duration::from_millis(350)).await;
    let running = stage.feed(id).await.unwrap();
    let paused = stage.toggle_video(id).await.unwrap();
    let sent_while_paused = sender.video_frame_count();
    tokio::time::sleep(Duration::from_millis(500)).await;
    let still_paused = sender.video_frame_count();
    stage.toggle_video(id).await.unwrap();
    tokio::time::sleep(Duration::from_millis(250)).await;
    let resumed = stage.feed(id).await.unwrap();

    // Assert
    assert_eq!(live.streaming_mode, StreamingMode::Simulated);
    assert!(running.latest_frame.is_some());
    assert_eq!(paused.connection_status_text, "Video disabled");
    assert!(paused.latest_frame.is_none());
    assert_eq!(sent_while_paused, still_paused);
    assert!(resumed.latest_frame.is_some());
    assert_eq!(sender.start_count(), 1);
    assert!(feed_rx.has_changed().unwrap());
    assert!(feed_rx.borrow_and_update().is_publishing);
}

#[tokio::test]
async fn test_frames_without_session_are_dropped() {
    let (stage, sender) = external();
    let id = paired_camera(&stage).await;

    stage.deliver_frame(id, frame(1)).unwrap();
    let feed = stage.feed(id).await.unwrap();

    assert!(feed.latest_frame.is_none());
    assert_eq!(sender.video_frame_count(), 0);
}

#[tokio::test]
async fn test_failure_status_gives_way_after_switching_to_viewer() {
    // Arrange
    let (stage, sender) = external();
    sender.fail_starts_with("no uplink");
    let id = paired_camera(&stage).await;
    assert!(stage.start_publishing(id).await.is_err());

    // Act
    let device = stage.assign_role(id, Role::Viewer).await.unwrap();
    let feed = stage.feed(id).await.unwrap();

    // Assert
    assert_eq!(device.connection_state, ConnectionState::Connected);
    assert_eq!(feed.role_label, "Viewer");
    assert_eq!(feed.connection_status_text, "Viewing");
}

#[tokio::test(start_paused = true)]
async fn test_stop_publishing_keeps_pairing_and_connection_state() {
    // Arrange
    let (stage, sender) = external();
    let id = paired_camera(&stage).await;
    stage.start_publishing(id).await.unwrap();

    // Act
    let feed = stage.stop_publishing(id).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1)).await;

    // Assert
    let device = stage.device(id).await.unwrap();
    assert_eq!(device.pairing_state, PairingState::Paired);
    assert_eq!(device.connection_state, ConnectionState::Streaming);
    assert!(!feed.is_publishing);
    assert_eq!(feed.connection_status_text, "Camera ready");
    assert!(stage.active_sessions().await.unwrap().is_empty());
    assert_eq!(sender.stop_count(), 1);
}

#[tokio::test]
async fn test_shutdown_ends_stage_after_stopping_senders() {
    // Arrange
    let sender = Arc::new(RecordingSender::new());
    let (stage, task) = spawn_stage(
        Arc::new(RecordingFactory::new(Arc::clone(&sender))),
        |_| Arc::new(NoopSignaling) as Arc<dyn PairingSignaling>,
    );
    let id = paired_camera(&stage).await;
    stage.start_publishing(id).await.unwrap();

    // Act
    assert_ok!(stage.shutdown().await);
    task.await.unwrap();

    // Assert
    assert_eq!(sender.stop_count(), 1);
    assert!(matches!(
        stage.feed(id).await,
        Err(StageError::ServiceUnavailable)
    ));
}
