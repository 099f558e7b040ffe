//! Frame payloads exchanged with media senders.
//!
//! The stage never decodes frames; it only routes them.  Payloads are kept
//! behind `Arc` so a frame can sit in a feed as `latest_frame` and be handed
//! to a sender at the same time without copying.

use std::sync::Arc;
use std::time::SystemTime;

/// An encoded or rendered video frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    /// Monotonic per-session frame counter.
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub captured_at: SystemTime,
    pub data: Arc<[u8]>,
}

impl VideoFrame {
    pub fn new(sequence: u64, width: u32, height: u32, data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            sequence,
            width,
            height,
            captured_at: SystemTime::now(),
            data: data.into(),
        }
    }
}

/// A chunk of PCM audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    pub sample_rate: u32,
    pub channels: u8,
    pub samples: Arc<[i16]>,
}
