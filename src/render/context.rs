use crate::foundation::core::Canvas;
use crate::foundation::error::{ExportError, ExportResult};
use crate::render::surface::{FrameRGBA, InputSurface, SurfaceFrame};

/// Rasterizer state bound to one encoder input surface.
///
/// Created when codecs are configured and torn down with the run. Like the surface it
/// wraps, it is `!Send`.
pub struct RenderContext {
    canvas: Canvas,
    width: u16,
    height: u16,
    pixmap: vello_cpu::Pixmap,
    surface: InputSurface,
}

impl RenderContext {
    pub fn bind(surface: InputSurface) -> ExportResult<Self> {
        if surface.is_released() {
            return Err(ExportError::internal(
                "cannot bind a render context to a released surface",
            ));
        }
        let canvas = surface.canvas();
        let (width, height) = canvas.as_u16()?;
        Ok(Self {
            canvas,
            width,
            height,
            pixmap: vello_cpu::Pixmap::new(width, height),
            surface,
        })
    }

    pub fn canvas(&self) -> Canvas {
        self.canvas
    }

    pub fn surface(&self) -> &InputSurface {
        &self.surface
    }

    /// Fresh draw list for the next frame.
    pub(crate) fn begin(&self) -> vello_cpu::RenderContext {
        vello_cpu::RenderContext::new(self.width, self.height)
    }

    fn rasterize(&mut self, mut ctx: vello_cpu::RenderContext) {
        clear_pixmap(&mut self.pixmap);
        ctx.flush();
        ctx.render_to_pixmap(&mut self.pixmap);
    }

    /// Rasterize `ctx` and hand the result to the encoder with `presentation_time_micros`.
    pub(crate) fn commit(
        &mut self,
        ctx: vello_cpu::RenderContext,
        presentation_time_micros: i64,
    ) -> ExportResult<()> {
        if !self.surface.has_capacity() {
            return Err(ExportError::encoder_stalled(
                "encoder input surface has no free buffer",
            ));
        }
        self.rasterize(ctx);
        let mut data = self.surface.take_buffer();
        data.copy_from_slice(self.pixmap.data_as_u8_slice());
        self.surface.swap_buffers(SurfaceFrame {
            frame: FrameRGBA {
                width: self.canvas.width,
                height: self.canvas.height,
                data,
                premultiplied: true,
            },
            presentation_time_micros,
        })
    }

    /// Rasterize `ctx` without committing it; used for still previews.
    pub(crate) fn read_back(&mut self, ctx: vello_cpu::RenderContext) -> FrameRGBA {
        self.rasterize(ctx);
        FrameRGBA {
            width: self.canvas.width,
            height: self.canvas.height,
            data: self.pixmap.data_as_u8_slice().to_vec(),
            premultiplied: true,
        }
    }

    /// Detach from the surface. The surface itself is released by its encoder.
    pub fn release(self) {
        tracing::debug!(
            width = self.canvas.width,
            height = self.canvas.height,
            "render context released"
        );
    }
}

fn clear_pixmap(pixmap: &mut vello_cpu::Pixmap) {
    pixmap.data_as_u8_slice_mut().fill(0);
}

/// Wrap premultiplied RGBA8 bytes as a `vello_cpu` image paint.
pub(crate) fn premul_bytes_to_image(
    rgba8_premul: &[u8],
    width: u32,
    height: u32,
) -> ExportResult<vello_cpu::Image> {
    let w: u16 = width
        .try_into()
        .map_err(|_| ExportError::internal("image width exceeds u16"))?;
    let h: u16 = height
        .try_into()
        .map_err(|_| ExportError::internal("image height exceeds u16"))?;
    if rgba8_premul.len() != width as usize * height as usize * 4 {
        return Err(ExportError::internal("image byte length mismatch"));
    }

    let mut may_have_opacities = false;
    let mut pixels = Vec::with_capacity(width as usize * height as usize);
    for px in rgba8_premul.chunks_exact(4) {
        let a = px[3];
        may_have_opacities |= a != 255;
        pixels.push(vello_cpu::peniko::color::PremulRgba8 {
            r: px[0],
            g: px[1],
            b: px[2],
            a,
        });
    }

    let pixmap = vello_cpu::Pixmap::from_parts_with_opacity(pixels, w, h, may_have_opacities);
    Ok(vello_cpu::Image {
        image: vello_cpu::ImageSource::Pixmap(std::sync::Arc::new(pixmap)),
        sampler: vello_cpu::peniko::ImageSampler::default(),
    })
}

#[cfg(test)]
#[path = "../../tests/unit/render/context.rs"]
mod tests;
