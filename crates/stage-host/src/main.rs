//! Live Stage host entry point.
//!
//! Runs the stage headless: loads configuration, starts the serialized stage
//! task and its background collaborators, and logs every device change until
//! Ctrl-C.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load_config()            -- stage.toml (or --config)
//!  └─ spawn_stage()            -- serialized context + StageHandle
//!       ├─ SimulatedPeer        (confirms outgoing requests after a delay)
//!       ├─ discovery pump       (polls the static discovery feed)
//!       ├─ incoming requests    (random discoverable device asks to pair)
//!       └─ event logger         (broadcast::Receiver<DeviceEvent>)
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use stage_host::application::stage::PairingSignaling;
use stage_host::infrastructure::discovery::{spawn_discovery_pump, StaticDiscoveryFeed};
use stage_host::infrastructure::media::LocalMediaFactory;
use stage_host::infrastructure::runtime::spawn_stage;
use stage_host::infrastructure::signaling::{spawn_incoming_requests, SimulatedPeer};
use stage_host::infrastructure::storage::config::{load_config, MediaMode};

/// Headless host for a multi-device live-video stage.
#[derive(Debug, Parser)]
#[command(
    name = "stage-host",
    about = "Pairing and session orchestration host for a live-video stage",
    version
)]
struct Cli {
    /// Path to `stage.toml`.  Defaults to the platform config directory.
    #[arg(long, env = "STAGE_CONFIG")]
    config: Option<PathBuf>,

    /// Log level used when `RUST_LOG` is not set.  Overrides the config file.
    #[arg(long, env = "STAGE_LOG_LEVEL")]
    log_level: Option<String>,

    /// `simulated` or `external`.  Overrides the config file.
    #[arg(long, env = "STAGE_MEDIA_MODE")]
    media_mode: Option<MediaMode>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_deref()).context("failed to load stage config")?;
    if let Some(level) = cli.log_level {
        config.stage.log_level = level;
    }
    if let Some(mode) = cli.media_mode {
        config.media.mode = mode;
    }

    // `RUST_LOG` wins over the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.stage.log_level)),
        )
        .init();

    info!(
        stage = %config.stage.name,
        media_mode = ?config.media.mode,
        seeded_devices = config.discovery.devices.len(),
        "Live Stage host starting"
    );

    // ── Stage ─────────────────────────────────────────────────────────────────
    let factory = Arc::new(LocalMediaFactory::new(config.media.clone()));
    let confirm_delay = config.pairing.confirm_delay();
    let (stage, stage_task) = spawn_stage(factory, move |handle| {
        Arc::new(SimulatedPeer::new(handle, confirm_delay)) as Arc<dyn PairingSignaling>
    });

    // ── Device event logger ───────────────────────────────────────────────────
    let mut events = stage.subscribe_events();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => info!(
                    device_id = %event.device_id,
                    name = %event.name,
                    pairing = %event.pairing_state,
                    connection = %event.connection_state,
                    role = ?event.role,
                    "device changed"
                ),
                Err(RecvError::Lagged(missed)) => warn!(missed, "event logger lagged"),
                Err(RecvError::Closed) => break,
            }
        }
        debug!("event logger stopped");
    });

    // ── Discovery pump ────────────────────────────────────────────────────────
    let discovery = spawn_discovery_pump(
        StaticDiscoveryFeed::new(config.discovery.devices.clone()),
        stage.clone(),
        config.discovery.poll_interval(),
    );

    // ── Simulated remote initiator ────────────────────────────────────────────
    let initiator = config
        .pairing
        .incoming_request_interval()
        .map(|interval| spawn_incoming_requests(stage.clone(), interval));

    info!("Live Stage host ready.  Press Ctrl-C to exit.");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("shutdown signal received");

    discovery.abort();
    if let Some(task) = initiator {
        task.abort();
    }
    if let Err(e) = stage.shutdown().await {
        warn!(error = %e, "stage was already stopped");
    }
    drop(stage);
    stage_task.await.context("stage task panicked")?;

    info!("Live Stage host stopped");
    Ok(())
}
