//! Test utilities and helpers for opsync
//!
//! Fixtures for operations and state, plus an in-memory transport used by
//! the sync and key-rotation tests.

pub mod fixtures;
pub mod mock_transport;

pub use fixtures::*;
pub use mock_transport::{CountingCipher, MockTransport, TransportCall};
