//! Infrastructure layer for the stage host.
//!
//! Contains the adapters around the application layer: the task that runs
//! the stage, discovery sources, the simulated remote peer, media
//! transports, configuration storage, and the presentation command bridge.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `stage_core`, but MUST NOT be imported by the `application` or domain
//! layers.

pub mod discovery;
pub mod media;
pub mod runtime;
pub mod signaling;
pub mod storage;
pub mod ui_bridge;
