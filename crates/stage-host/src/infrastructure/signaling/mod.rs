//! Simulated remote side of the pairing handshake.
//!
//! Without a real peer the host still needs someone to answer its pairing
//! requests and, now and then, to ask to pair on its own.
//!
//! - [`SimulatedPeer`] implements `PairingSignaling`.  Each outgoing request
//!   schedules a confirmation that is posted back into the stage after a
//!   fixed delay.  Cancelling does not abort the timer: the confirmation
//!   still arrives and the stage drops it because the request id no longer
//!   matches.
//! - [`spawn_incoming_requests`] periodically picks a random discoverable
//!   device and posts an incoming request for it.

use std::time::Duration;

use rand::seq::SliceRandom;
use stage_core::{DeviceId, RequestId};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::application::stage::PairingSignaling;
use crate::infrastructure::runtime::{StageHandle, WeakStageHandle};

/// Remote peer that confirms every request after `confirm_delay`.
pub struct SimulatedPeer {
    stage: WeakStageHandle,
    confirm_delay: Duration,
}

impl SimulatedPeer {
    pub fn new(stage: WeakStageHandle, confirm_delay: Duration) -> Self {
        Self {
            stage,
            confirm_delay,
        }
    }
}

impl PairingSignaling for SimulatedPeer {
    fn send_request(&self, device_id: DeviceId, request_id: RequestId) {
        let stage = self.stage.clone();
        let delay = self.confirm_delay;
        debug!(device_id = %device_id, request_id = %request_id, ?delay, "peer will confirm");
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // A closed stage just means nobody is listening any more.
            if let Some(stage) = stage.upgrade() {
                let _ = stage.remote_confirmed(device_id, request_id);
            }
        });
    }

    fn send_cancel(&self, device_id: DeviceId) {
        debug!(device_id = %device_id, "peer notified of cancellation");
    }
}

/// Every `interval`, asks the stage to treat one random discoverable device
/// as having requested pairing.
pub fn spawn_incoming_requests(stage: StageHandle, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately; skip it so a fresh stage is
        // not greeted by a request before discovery has run.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let Ok(candidates) = stage.discoverable().await else {
                break;
            };
            let picked = {
                let mut rng = rand::thread_rng();
                candidates.choose(&mut rng).map(|device| device.id())
            };
            if let Some(device_id) = picked {
                info!(device_id = %device_id, "simulated incoming pairing request");
                if stage.incoming_request(device_id).is_err() {
                    break;
                }
            }
        }
        debug!("incoming request simulator stopped");
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
