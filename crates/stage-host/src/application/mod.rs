//! Application layer of the stage host.
//!
//! # What is the "application" layer? (for beginners)
//!
//! In Clean Architecture the *application* layer sits between the domain
//! (pure pairing rules in `stage_core`) and the infrastructure (timers,
//! transports, configuration files).
//!
//! Components in this layer:
//!
//! - **Orchestrate** domain objects to fulfil a user goal (e.g., "pair this
//!   phone and make it a camera").
//! - **Depend on abstractions** (`MediaSender`, `PairingSignaling`) rather
//!   than concrete transports.
//! - **Contain no OS calls, no network I/O, no file system access**.
//!
//! # Sub-modules
//!
//! - **`registry`** – The single owning table of devices.  Every state change
//!   goes through `DeviceRegistry::mutate`, which notifies listeners.
//!
//! - **`feed_projection`** – One observable `Feed` per camera device, kept in
//!   sync with the registry without clobbering live streaming fields.
//!
//! - **`media_coupling`** – Starts, stops, and routes media for camera
//!   devices through the `MediaSender` capability.  At most one session per
//!   device.
//!
//! - **`commands`** – The message type accepted by the serialized context.
//!
//! - **`stage`** – The serialized context itself: dispatches commands to the
//!   three components above.

pub mod commands;
pub mod feed_projection;
pub mod media_coupling;
pub mod registry;
pub mod stage;
