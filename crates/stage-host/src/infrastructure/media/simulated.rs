//! Simulated media transport and stream driver.
//!
//! Used when no real transport is attached.  [`SimulatedSender`] accepts
//! every call and walks through a short handshake; [`SimulatedStreamDriver`]
//! ticks at a fixed interval and posts placeholder frames plus an occasional
//! status line into the stage.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use stage_core::{AudioFrame, Device, DeviceId, StreamingMode, VideoFrame};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::application::media_coupling::{
    FrameDriver, FrameSink, MediaBinding, MediaError, MediaSender, MediaSenderFactory,
};
use crate::infrastructure::storage::config::{MediaConfig, MediaMode};

/// Frames between two simulated status updates.
const STATUS_EVERY: u64 = 50;

/// A sender that publishes nowhere.
pub struct SimulatedSender {
    device_id: DeviceId,
    start_delay: Duration,
    publishing: AtomicBool,
    frames_sent: AtomicU64,
    status: watch::Sender<String>,
}

impl SimulatedSender {
    pub fn new(device_id: DeviceId, start_delay: Duration) -> Self {
        let (status, _) = watch::channel(String::new());
        Self {
            device_id,
            start_delay,
            publishing: AtomicBool::new(false),
            frames_sent: AtomicU64::new(0),
            status,
        }
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    pub fn is_publishing(&self) -> bool {
        self.publishing.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaSender for SimulatedSender {
    async fn start_publishing(&self) -> Result<(), MediaError> {
        tokio::time::sleep(self.start_delay).await;
        self.publishing.store(true, Ordering::SeqCst);
        debug!(device_id = %self.device_id, "simulated sender publishing");
        Ok(())
    }

    async fn stop_publishing(&self) {
        self.publishing.store(false, Ordering::SeqCst);
        debug!(device_id = %self.device_id, frames = self.frames_sent(), "simulated sender stopped");
    }

    fn send_video_frame(&self, frame: &VideoFrame) {
        if self.is_publishing() {
            let sent = self.frames_sent.fetch_add(1, Ordering::Relaxed) + 1;
            trace!(device_id = %self.device_id, sequence = frame.sequence, sent, "frame sent");
        }
    }

    fn send_audio_frame(&self, frame: &AudioFrame) {
        trace!(device_id = %self.device_id, samples = frame.samples.len(), "audio frame sent");
    }

    fn set_return_audio_enabled(&self, enabled: bool) {
        self.status.send_replace(if enabled {
            "Live (talkback on)".to_string()
        } else {
            "Live (simulated)".to_string()
        });
    }

    fn push_to_talk(&self, active: bool) {
        self.status.send_replace(if active {
            "Live (talking)".to_string()
        } else {
            "Live (simulated)".to_string()
        });
    }

    fn status_updates(&self) -> watch::Receiver<String> {
        self.status.subscribe()
    }
}

/// Periodic producer of placeholder frames.
pub struct SimulatedStreamDriver {
    interval: Duration,
    width: u32,
    height: u32,
}

impl SimulatedStreamDriver {
    pub fn new(interval: Duration, width: u32, height: u32) -> Self {
        Self {
            interval,
            width,
            height,
        }
    }

    pub fn from_config(config: &MediaConfig) -> Self {
        Self::new(config.frame_interval(), config.frame_width, config.frame_height)
    }
}

impl FrameDriver for SimulatedStreamDriver {
    fn spawn(&self, sink: FrameSink) -> JoinHandle<()> {
        let (interval, width, height) = (self.interval, self.width, self.height);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let mut sequence: u64 = 0;
            loop {
                ticker.tick().await;
                sequence += 1;
                if !sink.deliver(placeholder_frame(sequence, width, height)) {
                    break;
                }
                if sequence % STATUS_EVERY == 0
                    && !sink.status(format!("Live (simulated, {sequence} frames)"))
                {
                    break;
                }
            }
            debug!(device_id = %sink.device_id(), "simulated driver stopped");
        })
    }
}

/// A single-channel gradient that scrolls with `sequence`.
fn placeholder_frame(sequence: u64, width: u32, height: u32) -> VideoFrame {
    let shift = (sequence % 256) as u8;
    let data: Vec<u8> = (0..height)
        .flat_map(|y| (0..width).map(move |x| ((x + y) as u8).wrapping_add(shift)))
        .collect();
    VideoFrame::new(sequence, width, height, data)
}

/// Binds camera devices to simulated senders, with or without the driver.
pub struct LocalMediaFactory {
    config: MediaConfig,
    driver: Arc<SimulatedStreamDriver>,
}

impl LocalMediaFactory {
    pub fn new(config: MediaConfig) -> Self {
        let driver = Arc::new(SimulatedStreamDriver::from_config(&config));
        Self { config, driver }
    }
}

impl MediaSenderFactory for LocalMediaFactory {
    fn bind(&self, device: &Device) -> MediaBinding {
        let sender = Arc::new(SimulatedSender::new(device.id(), self.config.start_delay()));
        match self.config.mode {
            MediaMode::Simulated => MediaBinding {
                sender,
                mode: StreamingMode::Simulated,
                driver: Some(Arc::clone(&self.driver) as Arc<dyn FrameDriver>),
            },
            MediaMode::External => MediaBinding {
                sender,
                mode: StreamingMode::External,
                driver: None,
            },
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
