//! Testing utilities
//!
//! Mock transport implementations for exercising the connection controller
//! without a broker.

pub mod mocks;

pub use mocks::*;
