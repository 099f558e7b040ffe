//! Device discovery sources.
//!
//! The physical scan (Wi-Fi, Bluetooth, USB) lives outside the host.  What
//! the host sees is a [`DiscoveryFeed`]: something that, when polled, returns
//! the descriptors currently visible.  The discovery pump polls it on a timer
//! and posts each descriptor into the stage, where `upsert` makes repeated
//! sightings of the same id harmless.
//!
//! Two feeds ship with the host:
//!
//! - [`StaticDiscoveryFeed`] reports a fixed list (the `[discovery]` section
//!   of `stage.toml`).
//! - [`ChannelDiscoveryFeed`] adapts a push source: a scanner sends
//!   descriptors into a channel as it finds them, and each poll drains what
//!   has arrived since the last one.

use std::time::Duration;

use async_trait::async_trait;
use stage_core::DeviceDescriptor;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::infrastructure::runtime::StageHandle;

/// Error type for discovery sources.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DiscoveryError {
    /// The push source hung up; no further devices will arrive.
    #[error("discovery source closed")]
    Closed,
}

/// A pollable source of visible devices.
#[async_trait]
pub trait DiscoveryFeed: Send {
    /// Returns the descriptors seen since the previous poll (or all visible
    /// descriptors; the stage deduplicates by id).
    async fn poll(&mut self) -> Result<Vec<DeviceDescriptor>, DiscoveryError>;
}

/// Reports the same fixed set of devices on every poll.
pub struct StaticDiscoveryFeed {
    devices: Vec<DeviceDescriptor>,
}

impl StaticDiscoveryFeed {
    pub fn new(devices: Vec<DeviceDescriptor>) -> Self {
        Self { devices }
    }
}

#[async_trait]
impl DiscoveryFeed for StaticDiscoveryFeed {
    async fn poll(&mut self) -> Result<Vec<DeviceDescriptor>, DiscoveryError> {
        Ok(self.devices.clone())
    }
}

/// Drains descriptors pushed by a scanner.
pub struct ChannelDiscoveryFeed {
    rx: mpsc::UnboundedReceiver<DeviceDescriptor>,
}

impl ChannelDiscoveryFeed {
    /// Returns the feed and the sender a scanner pushes into.
    pub fn new() -> (Self, mpsc::UnboundedSender<DeviceDescriptor>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { rx }, tx)
    }
}

#[async_trait]
impl DiscoveryFeed for ChannelDiscoveryFeed {
    async fn poll(&mut self) -> Result<Vec<DeviceDescriptor>, DiscoveryError> {
        let mut batch = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(descriptor) => batch.push(descriptor),
                Err(mpsc::error::TryRecvError::Empty) => return Ok(batch),
                Err(mpsc::error::TryRecvError::Disconnected) if !batch.is_empty() => {
                    return Ok(batch)
                }
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    return Err(DiscoveryError::Closed)
                }
            }
        }
    }
}

/// Polls `feed` every `interval` and posts each descriptor into the stage.
///
/// Stops when the feed closes or the stage shuts down.
pub fn spawn_discovery_pump<F>(mut feed: F, stage: StageHandle, interval: Duration) -> JoinHandle<()>
where
    F: DiscoveryFeed + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let batch = match feed.poll().await {
                Ok(batch) => batch,
                Err(DiscoveryError::Closed) => {
                    info!("discovery source closed, pump stopping");
                    break;
                }
            };
            if !batch.is_empty() {
                debug!(count = batch.len(), "discovery batch");
            }
            for descriptor in batch {
                if stage.discovered(descriptor).is_err() {
                    debug!("stage gone, discovery pump stopping");
                    return;
                }
            }
        }
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
