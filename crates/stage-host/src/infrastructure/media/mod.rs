//! Media transports behind the `MediaSender` capability.
//!
//! - **`simulated`** – In-process sender and the periodic placeholder frame
//!   driver, plus `LocalMediaFactory` which picks between simulated and
//!   external frame delivery from configuration.
//! - **`mock`** – A recording sender used by unit and integration tests.

pub mod mock;
pub mod simulated;

pub use simulated::{LocalMediaFactory, SimulatedSender, SimulatedStreamDriver};
