//! Recording media sender for tests.
//!
//! Stands in for a real transport: it records every call the media coupling
//! makes and can be told to refuse or delay its start.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use stage_core::{AudioFrame, Device, StreamingMode, VideoFrame};
use tokio::sync::watch;

use crate::application::media_coupling::{
    FrameDriver, MediaBinding, MediaError, MediaSender, MediaSenderFactory,
};

/// A [`MediaSender`] that records calls instead of publishing.
pub struct RecordingSender {
    starts: AtomicUsize,
    stops: AtomicUsize,
    video_frames: AtomicUsize,
    audio_frames: AtomicUsize,
    return_audio: AtomicBool,
    push_to_talk: Mutex<Vec<bool>>,
    start_failure: Mutex<Option<String>>,
    start_delay: Mutex<Option<Duration>>,
    status: watch::Sender<String>,
}

impl RecordingSender {
    pub fn new() -> Self {
        let (status, _) = watch::channel(String::new());
        Self {
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            video_frames: AtomicUsize::new(0),
            audio_frames: AtomicUsize::new(0),
            return_audio: AtomicBool::new(false),
            push_to_talk: Mutex::new(Vec::new()),
            start_failure: Mutex::new(None),
            start_delay: Mutex::new(None),
            status,
        }
    }

    /// Makes every later start fail with `reason`.
    pub fn fail_starts_with(&self, reason: impl Into<String>) {
        *lock(&self.start_failure) = Some(reason.into());
    }

    /// Makes every later start suspend for `delay` before completing.
    pub fn delay_starts_by(&self, delay: Duration) {
        *lock(&self.start_delay) = Some(delay);
    }

    /// Publishes a transport status string, as a real sender would.
    pub fn emit_status(&self, status: impl Into<String>) {
        self.status.send_replace(status.into());
    }

    pub fn start_count(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn video_frame_count(&self) -> usize {
        self.video_frames.load(Ordering::SeqCst)
    }

    pub fn audio_frame_count(&self) -> usize {
        self.audio_frames.load(Ordering::SeqCst)
    }

    pub fn return_audio_enabled(&self) -> bool {
        self.return_audio.load(Ordering::SeqCst)
    }

    /// Every push-to-talk value received, in order.
    pub fn push_to_talk_calls(&self) -> Vec<bool> {
        lock(&self.push_to_talk).clone()
    }
}

impl Default for RecordingSender {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaSender for RecordingSender {
    async fn start_publishing(&self) -> Result<(), MediaError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        let delay = *lock(&self.start_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match lock(&self.start_failure).clone() {
            Some(reason) => Err(MediaError::StartRefused(reason)),
            None => Ok(()),
        }
    }

    async fn stop_publishing(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }

    fn send_video_frame(&self, _frame: &VideoFrame) {
        self.video_frames.fetch_add(1, Ordering::SeqCst);
    }

    fn send_audio_frame(&self, _frame: &AudioFrame) {
        self.audio_frames.fetch_add(1, Ordering::SeqCst);
    }

    fn set_return_audio_enabled(&self, enabled: bool) {
        self.return_audio.store(enabled, Ordering::SeqCst);
    }

    fn push_to_talk(&self, active: bool) {
        lock(&self.push_to_talk).push(active);
    }

    fn status_updates(&self) -> watch::Receiver<String> {
        self.status.subscribe()
    }
}

/// Binds every device to the same [`RecordingSender`].
pub struct RecordingFactory {
    sender: Arc<RecordingSender>,
    mode: StreamingMode,
    driver: Option<Arc<dyn FrameDriver>>,
}

impl RecordingFactory {
    /// External mode, no frame driver: frames arrive only through
    /// `StageHandle::deliver_frame`.
    pub fn new(sender: Arc<RecordingSender>) -> Self {
        Self {
            sender,
            mode: StreamingMode::External,
            driver: None,
        }
    }

    /// Simulated mode driven by `driver`.
    pub fn with_driver(sender: Arc<RecordingSender>, driver: Arc<dyn FrameDriver>) -> Self {
        Self {
            sender,
            mode: StreamingMode::Simulated,
            driver: Some(driver),
        }
    }
}

impl MediaSenderFactory for RecordingFactory {
    fn bind(&self, _device: &Device) -> MediaBinding {
        MediaBinding {
            sender: Arc::clone(&self.sender) as Arc<dyn MediaSender>,
            mode: self.mode,
            driver: self.driver.clone(),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_recording_sender_counts_starts_and_stops() {
        // Arrange
        let sender = RecordingSender::new();

        // Act
        sender.start_publishing().await.unwrap();
        sender.stop_publishing().await;

        // Assert
        assert_eq!(sender.start_count(), 1);
        assert_eq!(sender.stop_count(), 1);
    }

    #[tokio::test]
    async fn test_recording_sender_can_refuse_start() {
        let sender = RecordingSender::new();
        sender.fail_starts_with("camera busy");

        let result = sender.start_publishing().await;

        assert_eq!(result, Err(MediaError::StartRefused("camera busy".to_string())));
    }

    #[test]
    fn test_recording_sender_publishes_status() {
        let sender = RecordingSender::new();
        let mut updates = sender.status_updates();

        sender.emit_status("Connecting");

        assert!(updates.has_changed().unwrap());
        assert_eq!(*updates.borrow_and_update(), "Connecting");
    }
}
