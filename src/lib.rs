//! vidoverlay bakes text, shape, image and layer-stack overlays into MP4 video.
//!
//! A run pulls compressed samples from a container, decodes them, composites the overlay
//! onto each frame through the encoder's input surface, re-encodes, and writes a new
//! single-video-track MP4:
//!
//! - Describe the overlay with an [`OverlaySpec`] (or its JSON form)
//! - Drive one export with a [`PipelineDriver`], or let [`export_with_fallback`] degrade
//!   to a synthetic video or a placeholder file when the full path fails
//! - Host toolkits go through [`bridge`]
#![forbid(unsafe_code)]

pub mod bridge;
pub mod encode;
pub mod foundation;
pub mod media;
pub mod overlay;
pub mod pipeline;
pub mod render;

pub use crate::foundation::core::{Canvas, Fps, FrameIndex, Point};
pub use crate::foundation::error::{ErrorKind, ExportError, ExportResult};

pub use crate::encode::sink::{FrameSink, Mp4Sink, Mp4SinkConfig};
pub use crate::media::codec::{CodecFactory, MediaTrackDescriptor, VideoDecoder, VideoEncoder};
pub use crate::media::openh264::OpenH264Factory;
pub use crate::media::source::{Mp4SampleSource, validate_source};
pub use crate::overlay::color::ColorDef;
pub use crate::overlay::spec::{OverlayKind, OverlaySpec};
pub use crate::pipeline::driver::{PipelineDriver, PipelineResult};
pub use crate::pipeline::fallback::{ExportOutcome, Fidelity, export_with_fallback};
pub use crate::pipeline::opts::ExportOpts;
pub use crate::pipeline::pool::{CancelToken, ExportPool};
pub use crate::pipeline::state::PipelineState;
pub use crate::render::compositor::{Background, Compositor};
pub use crate::render::surface::FrameRGBA;
