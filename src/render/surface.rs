use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::foundation::core::Canvas;
use crate::foundation::error::{ExportError, ExportResult};

/// A tightly packed RGBA8 frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameRGBA {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// RGBA8 bytes, row-major.
    pub data: Vec<u8>,
    /// Whether the `data` is premultiplied alpha.
    pub premultiplied: bool,
}

impl FrameRGBA {
    pub fn canvas(&self) -> Canvas {
        Canvas {
            width: self.width,
            height: self.height,
        }
    }

    #[cfg(test)]
    pub(crate) fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let i = ((y as usize) * (self.width as usize) + (x as usize)) * 4;
        [
            self.data[i],
            self.data[i + 1],
            self.data[i + 2],
            self.data[i + 3],
        ]
    }
}

/// A composited frame committed to an [`InputSurface`].
#[derive(Debug)]
pub struct SurfaceFrame {
    pub frame: FrameRGBA,
    pub presentation_time_micros: i64,
}

#[derive(Debug)]
struct SurfaceQueue {
    pending: VecDeque<SurfaceFrame>,
    spare: Vec<Vec<u8>>,
    capacity: usize,
    released: bool,
}

/// Hand-off point between the compositor (producer) and the encoder (consumer).
///
/// Both sides hold a handle to the same queue. The handle is `Rc` based and therefore
/// `!Send`: a surface, and every codec and render context attached to it, stays on the
/// thread that created it.
#[derive(Clone, Debug)]
pub struct InputSurface {
    queue: Rc<RefCell<SurfaceQueue>>,
    canvas: Canvas,
}

impl InputSurface {
    pub fn new(canvas: Canvas, capacity: usize) -> Self {
        Self {
            queue: Rc::new(RefCell::new(SurfaceQueue {
                pending: VecDeque::with_capacity(capacity),
                spare: Vec::new(),
                capacity: capacity.max(1),
                released: false,
            })),
            canvas,
        }
    }

    pub fn canvas(&self) -> Canvas {
        self.canvas
    }

    /// `true` if a frame can be committed without overrunning the consumer.
    pub fn has_capacity(&self) -> bool {
        let q = self.queue.borrow();
        !q.released && q.pending.len() < q.capacity
    }

    pub fn pending(&self) -> usize {
        self.queue.borrow().pending.len()
    }

    pub fn is_released(&self) -> bool {
        self.queue.borrow().released
    }

    /// Borrow a recycled pixel buffer sized for this surface.
    pub(crate) fn take_buffer(&self) -> Vec<u8> {
        let len = (self.canvas.width as usize) * (self.canvas.height as usize) * 4;
        let mut buf = self.queue.borrow_mut().spare.pop().unwrap_or_default();
        buf.clear();
        buf.resize(len, 0);
        buf
    }

    /// Return a consumed buffer for reuse by the producer.
    pub fn recycle(&self, buf: Vec<u8>) {
        let mut q = self.queue.borrow_mut();
        if !q.released && q.spare.len() < q.capacity {
            q.spare.push(buf);
        }
    }

    /// Commit a frame to the consumer side (the `eglSwapBuffers` of this pipeline).
    pub fn swap_buffers(&self, frame: SurfaceFrame) -> ExportResult<()> {
        let mut q = self.queue.borrow_mut();
        if q.released {
            return Err(ExportError::internal("input surface already released"));
        }
        if frame.frame.width != self.canvas.width || frame.frame.height != self.canvas.height {
            return Err(ExportError::internal(format!(
                "surface frame size mismatch: got {}x{}, expected {}x{}",
                frame.frame.width, frame.frame.height, self.canvas.width, self.canvas.height
            )));
        }
        if q.pending.len() >= q.capacity {
            return Err(ExportError::encoder_stalled(
                "input surface full, encoder is not consuming frames",
            ));
        }
        q.pending.push_back(frame);
        Ok(())
    }

    /// Consumer side: take the oldest committed frame.
    pub fn acquire_next(&self) -> Option<SurfaceFrame> {
        self.queue.borrow_mut().pending.pop_front()
    }

    /// Drop all queued frames and refuse further commits. Idempotent.
    pub fn release(&self) {
        let mut q = self.queue.borrow_mut();
        q.released = true;
        q.pending.clear();
        q.spare.clear();
    }
}

#[cfg(test)]
#[path = "../../tests/unit/render/surface.rs"]
mod tests;
