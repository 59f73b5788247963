//! Shared primitives: timing, pixel math and the error type.

pub mod core;
pub mod error;
pub(crate) mod math;
