//! Causal bookkeeping: vector clocks and the local clock tracker.

pub mod tracker;
pub mod vector_clock;

pub use tracker::{ClockStore, MemoryClockStore, VectorClockTracker};
pub use vector_clock::{ClientId, VectorClock, VectorClockComparison, MAX_COUNTER};
