//! FeedProjection: keeps one observable [`Feed`] per camera device in sync
//! with the registry.
//!
//! Each feed lives inside a `tokio::sync::watch` channel.  The sender is
//! created once and never replaced, so every `watch::Receiver` handed to the
//! presentation layer stays attached to the same feed for the lifetime of the
//! process, across every resync and reset.
//!
//! # Who may write which fields
//!
//! - [`FeedProjection::resync`] (called by the registry after each commit)
//!   rewrites only the structural fields via [`Feed::sync_structure`].
//! - [`FeedProjection::update_streaming`] is the media coupling's entry
//!   point and is the only path that touches `is_publishing`,
//!   `latest_frame`, and `streaming_mode`.
//!
//! Feeds are created lazily: on first access through [`FeedProjection::feed_for`]
//! or when a device is first seen in the camera role.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use stage_core::{Device, DeviceId, Feed};
use tokio::sync::watch;
use tracing::trace;

use crate::application::registry::RegistryListener;

/// Owner of the feed table.
#[derive(Default)]
pub struct FeedProjection {
    feeds: Mutex<HashMap<DeviceId, watch::Sender<Feed>>>,
}

impl FeedProjection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the feed for `device`, creating it if needed.
    ///
    /// The returned snapshot reflects `device` as passed in.
    pub fn feed_for(&self, device: &Device) -> Feed {
        let mut feeds = self.lock();
        let sender = Self::entry(&mut feeds, device);
        sender.send_modify(|feed| feed.sync_structure(device));
        let snapshot = sender.borrow().clone();
        snapshot
    }

    /// Returns a live subscription to the feed for `device`, creating it if
    /// needed.
    pub fn subscribe(&self, device: &Device) -> watch::Receiver<Feed> {
        let mut feeds = self.lock();
        Self::entry(&mut feeds, device).subscribe()
    }

    /// Returns the current snapshot of an existing feed.
    pub fn get(&self, id: DeviceId) -> Option<Feed> {
        self.lock().get(&id).map(|sender| sender.borrow().clone())
    }

    /// Returns snapshots of every feed.
    pub fn all(&self) -> Vec<Feed> {
        self.lock()
            .values()
            .map(|sender| sender.borrow().clone())
            .collect()
    }

    /// Re-derives the structural fields of `device`'s feed.
    ///
    /// Creates the feed when the device has just become a camera; otherwise
    /// devices without a feed are skipped.
    pub fn resync(&self, device: &Device) {
        let mut feeds = self.lock();
        match feeds.get(&device.id()) {
            Some(sender) => sender.send_modify(|feed| feed.sync_structure(device)),
            None if device.is_camera() => {
                Self::entry(&mut feeds, device);
            }
            None => return,
        }
        trace!(device_id = %device.id(), "feed resynchronized");
    }

    /// Clears every streaming field and shows the neutral status.
    pub fn reset(&self, id: DeviceId) {
        if let Some(sender) = self.lock().get(&id) {
            sender.send_modify(Feed::reset);
        }
    }

    /// Applies a streaming-side change to an existing feed.
    ///
    /// Returns `false` if the device has no feed.
    pub fn update_streaming(&self, id: DeviceId, change: impl FnOnce(&mut Feed)) -> bool {
        match self.lock().get(&id) {
            Some(sender) => {
                sender.send_modify(change);
                true
            }
            None => false,
        }
    }

    fn entry<'a>(
        feeds: &'a mut HashMap<DeviceId, watch::Sender<Feed>>,
        device: &Device,
    ) -> &'a watch::Sender<Feed> {
        feeds
            .entry(device.id())
            .or_insert_with(|| watch::Sender::new(Feed::for_device(device)))
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<DeviceId, watch::Sender<Feed>>> {
        self.feeds.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RegistryListener for FeedProjection {
    fn device_changed(&self, device: &Device) {
        self.resync(device);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use stage_core::{
        Capability, DeviceDescriptor, DeviceKind, PairingEvent, Role, StreamingMode, VideoFrame,
    };
    use std::sync::Arc;
    use uuid::Uuid;

    fn camera_capable() -> Device {
        Device::discovered(DeviceDescriptor {
            id: Uuid::new_v4(),
            name: "Stage Right".to_string(),
            kind: DeviceKind::Tablet,
            transports: Default::default(),
            capabilities: [Capability::Camera].into_iter().collect(),
        })
    }

    fn make_camera(device: &mut Device) {
        device.apply(PairingEvent::IncomingRequest).unwrap();
        device.apply(PairingEvent::AcceptIncoming).unwrap();
        device.apply(PairingEvent::AssignRole(Role::Camera)).unwrap();
    }

    #[test]
    fn test_resync_skips_devices_without_feed_until_camera() {
        // Arrange
        let projection = FeedProjection::new();
        let mut device = camera_capable();

        // Act / Assert
        projection.resync(&device);
        assert!(projection.get(device.id()).is_none());

        make_camera(&mut device);
        projection.resync(&device);
        assert_eq!(projection.get(device.id()).unwrap().role_label, "Camera");
    }

    #[test]
    fn test_feed_for_creates_lazily_and_reflects_device() {
        let projection = FeedProjection::new();
        let device = camera_capable();

        let feed = projection.feed_for(&device);

        assert_eq!(feed.device_id, device.id());
        assert_eq!(feed.connection_status_text, "Not paired");
        assert_eq!(projection.all().len(), 1);
    }

    #[test]
    fn test_resync_does_not_clobber_streaming_fields() {
        // Arrange
        let projection = FeedProjection::new();
        let mut device = camera_capable();
        make_camera(&mut device);
        projection.resync(&device);
        projection.update_streaming(device.id(), |feed| {
            feed.mark_publishing(StreamingMode::Simulated);
            feed.set_latest_frame(Arc::new(VideoFrame::new(7, 2, 2, vec![1u8; 4])));
        });

        // Act
        device.apply(PairingEvent::SetTalkback(true)).unwrap();
        projection.resync(&device);

        // Assert
        let feed = projection.get(device.id()).unwrap();
        assert!(feed.is_publishing);
        assert_eq!(feed.latest_frame.as_ref().map(|f| f.sequence), Some(7));
        assert_eq!(feed.streaming_mode, StreamingMode::Simulated);
    }

    #[test]
    fn test_subscription_survives_reset() {
        // Arrange
        let projection = FeedProjection::new();
        let mut device = camera_capable();
        make_camera(&mut device);
        let mut rx = projection.subscribe(&device);
        projection.update_streaming(device.id(), |feed| {
            feed.mark_publishing(StreamingMode::External)
        });

        // Act
        projection.reset(device.id());

        // Assert
        assert!(rx.has_changed().unwrap());
        let feed = rx.borrow_and_update().clone();
        assert!(!feed.is_publishing);
        assert_eq!(feed.display_name, "Stage Right");
    }

    #[test]
    fn test_update_streaming_without_feed_returns_false() {
        let projection = FeedProjection::new();
        assert!(!projection.update_streaming(Uuid::new_v4(), |_| {}));
    }
}
