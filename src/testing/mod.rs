//! Testing utilities and mock implementations
//!
//! Lets the connection manager be exercised without a NATS server.

pub mod mocks;

pub use mocks::*;
