//! Domain entities for the live-video stage.
//!
//! This module contains pure business logic with no infrastructure dependencies.
//!
//! # What is "domain" in Clean Architecture? (for beginners)
//!
//! The innermost layer of a Clean Architecture codebase is the **domain**.
//! Domain code holds the rules that make the system what it is (here: how a
//! device pairs, which roles it may take, what a feed shows) and never imports
//! network, storage, or UI code.  Outer layers depend on it, never the other
//! way around, so everything here can be unit-tested without a runtime.

/// Device identity, capabilities, and per-device session state.
pub mod device;

/// UI-facing feed projection rules.
pub mod feed;

/// Frame payloads handed to and from media senders.
pub mod media;

/// The pairing handshake state machine.
pub mod pairing;
