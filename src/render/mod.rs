//! CPU compositing onto the encoder's input surface.

pub mod compositor;
pub mod context;
pub mod surface;
pub mod text;
