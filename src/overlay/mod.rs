//! Declarative overlay model and its JSON wire format.

pub mod color;
pub mod spec;
