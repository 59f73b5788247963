use crate::foundation::error::{ExportError, ExportResult};

pub use kurbo::Point;

/// Microseconds per second, the unit of every presentation timestamp in the pipeline.
pub const MICROS_PER_SEC: i64 = 1_000_000;

/// Absolute 0-based frame index within one export run.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct FrameIndex(pub u64);

/// Frames-per-second represented as a rational `num/den`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Fps {
    /// Numerator (frames).
    pub num: u32,
    /// Denominator (seconds), must be non-zero.
    pub den: u32,
}

impl Fps {
    /// Create a validated FPS value.
    pub fn new(num: u32, den: u32) -> ExportResult<Self> {
        if den == 0 {
            return Err(ExportError::validation("fps den must be > 0"));
        }
        if num == 0 {
            return Err(ExportError::validation("fps num must be > 0"));
        }
        Ok(Self { num, den })
    }

    /// Approximate a floating-point rate reported by a container.
    ///
    /// Integral rates map to `n/1`; fractional NTSC-style rates keep millihertz precision.
    pub fn from_hz(hz: f64) -> ExportResult<Self> {
        if !hz.is_finite() || hz <= 0.0 {
            return Err(ExportError::validation(format!(
                "frame rate must be finite and > 0, got {hz}"
            )));
        }
        let rounded = hz.round();
        if (hz - rounded).abs() < 1e-3 {
            return Self::new(rounded as u32, 1);
        }
        let num = (hz * 1000.0).round() as u32;
        let g = gcd(num, 1000);
        Self::new(num / g, 1000 / g)
    }

    /// Convert to floating-point FPS.
    pub fn as_f64(self) -> f64 {
        f64::from(self.num) / f64::from(self.den)
    }

    /// Duration of one frame in microseconds (floor).
    pub fn frame_duration_micros(self) -> i64 {
        MICROS_PER_SEC * i64::from(self.den) / i64::from(self.num)
    }

    /// Presentation timestamp of a synthesized frame: `idx * 1_000_000 / fps`.
    pub fn pts_for_frame(self, idx: FrameIndex) -> i64 {
        let idx = i64::try_from(idx.0).unwrap_or(i64::MAX / MICROS_PER_SEC);
        idx.saturating_mul(MICROS_PER_SEC)
            .saturating_mul(i64::from(self.den))
            / i64::from(self.num)
    }

    /// Number of whole frames covering `secs` seconds (rounded to nearest).
    pub fn frames_for_secs(self, secs: f64) -> u64 {
        (secs * self.as_f64()).round().max(0.0) as u64
    }
}

fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a.max(1)
}

/// Output canvas dimensions in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Canvas {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Canvas {
    pub fn center(self) -> Point {
        Point::new(f64::from(self.width) / 2.0, f64::from(self.height) / 2.0)
    }

    /// Dimensions as the `u16` pair the rasterizer expects.
    pub fn as_u16(self) -> ExportResult<(u16, u16)> {
        let w = u16::try_from(self.width)
            .map_err(|_| ExportError::validation(format!("width {} exceeds u16", self.width)))?;
        let h = u16::try_from(self.height)
            .map_err(|_| ExportError::validation(format!("height {} exceeds u16", self.height)))?;
        if w == 0 || h == 0 {
            return Err(ExportError::validation("canvas dimensions must be non-zero"));
        }
        Ok((w, h))
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/core.rs"]
mod tests;
