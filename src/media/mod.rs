//! Container and codec plumbing: demux, software H.264, mux.

pub mod codec;
pub mod muxer;
pub mod nal;
pub mod openh264;
pub mod source;
