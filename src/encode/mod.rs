//! Frame sinks used when frames are synthesized rather than decoded.

pub mod ffmpeg;
pub mod sink;
