//! Observer notification module.
//!
//! Provides the sink trait the status broadcaster notifies. The host
//! application implements the sink to forward events to its UI layer.

mod sink;

pub use sink::*;
