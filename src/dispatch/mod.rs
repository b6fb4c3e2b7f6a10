//! # Dispatch
//!
//! The consumer loop and the per-message dispatcher it spawns.

pub mod consumer_loop;
pub mod dispatcher;
pub mod stats;

pub use consumer_loop::{ConsumerLoop, ConsumerState, LoopOutcome};
pub use dispatcher::{DispatchError, DispatchOutcome, Dispatcher};
pub use stats::{DispatchStats, DispatchStatsSnapshot};
