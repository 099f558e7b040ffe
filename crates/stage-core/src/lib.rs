//! # stage-core
//!
//! Shared library for the live-video stage containing the device domain
//! entities, the pairing state machine, and the rules that project device
//! state into UI-facing feeds.
//!
//! This crate is used by the host application and by its tests.
//! It has zero dependencies on async runtimes, OS APIs, or network sockets.
//!
//! # Architecture overview (for beginners)
//!
//! A live stage is a set of nearby devices (phones, tablets, capture boxes)
//! that pair with the host.  Once paired, each device is given a role: it
//! either publishes its camera (a *camera*) or watches the other cameras (a
//! *viewer*).
//!
//! - **`domain::device`** – Who a device is (`DeviceDescriptor`) and where it
//!   currently stands (`Device`: pairing state, connection state, role).
//!
//! - **`domain::pairing`** – The handshake state machine.  Every transition
//!   is a guarded, total function: it either applies or leaves the device
//!   untouched and reports [`StageError::InvalidTransition`].
//!
//! - **`domain::feed`** – The derived view-model of a camera device.  Its
//!   fields are split between *structural* fields (derived from the device)
//!   and *streaming* fields (owned by the media pipeline).
//!
//! - **`domain::media`** – Opaque frame types exchanged with media senders.

pub mod domain;
pub mod error;

pub use domain::device::{
    Capability, ConnectionState, Device, DeviceDescriptor, DeviceId, DeviceKind, PairingState,
    RequestId, Role, Transport,
};
pub use domain::feed::{Feed, StreamingMode};
pub use domain::media::{AudioFrame, VideoFrame};
pub use domain::pairing::{PairingEvent, Transition};
pub use error::StageError;
