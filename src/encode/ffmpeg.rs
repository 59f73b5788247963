use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};

use crate::encode::sink::FrameSink;
use crate::foundation::core::{Canvas, Fps};
use crate::foundation::error::{ExportError, ExportResult};
use crate::foundation::math::flatten_premul_to_rgb8;
use crate::render::surface::SurfaceFrame;

#[derive(Clone, Debug)]
pub struct FfmpegConfig {
    pub width: u32,
    pub height: u32,
    pub fps: Fps,
    pub bitrate_bps: u32,
    pub key_frame_interval_secs: u32,
    pub out_path: PathBuf,
    pub overwrite: bool,
}

impl FfmpegConfig {
    pub fn validate(&self) -> ExportResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(ExportError::unsupported_codec(
                "encode width/height must be non-zero",
            ));
        }
        if !self.width.is_multiple_of(2) || !self.height.is_multiple_of(2) {
            return Err(ExportError::unsupported_codec(
                "encode width/height must be even (required for yuv420p mp4 output)",
            ));
        }
        Ok(())
    }

    fn gop_frames(&self) -> u32 {
        ((self.fps.as_f64() * f64::from(self.key_frame_interval_secs)).round() as u32).max(1)
    }
}

pub fn is_ffmpeg_on_path() -> bool {
    Command::new("ffmpeg")
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

pub fn ensure_parent_dir(path: &Path) -> ExportResult<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        use anyhow::Context as _;
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create output directory '{}'", parent.display()))?;
    }
    Ok(())
}

/// Streams raw RGB frames into a system `ffmpeg` (libx264) process.
pub struct FfmpegSink {
    cfg: FfmpegConfig,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    scratch: Vec<u8>,
    frames: u64,
    last_pts: Option<i64>,
}

impl FfmpegSink {
    pub fn spawn(cfg: FfmpegConfig) -> ExportResult<Self> {
        cfg.validate()?;
        ensure_parent_dir(&cfg.out_path)?;

        if !cfg.overwrite && cfg.out_path.exists() {
            return Err(ExportError::internal(format!(
                "output file '{}' already exists",
                cfg.out_path.display()
            )));
        }
        if !is_ffmpeg_on_path() {
            return Err(ExportError::unsupported_codec(
                "ffmpeg sink selected, but ffmpeg was not found on PATH",
            ));
        }

        let mut cmd = Command::new("ffmpeg");
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        cmd.arg(if cfg.overwrite { "-y" } else { "-n" });
        cmd.args([
            "-loglevel",
            "error",
            "-f",
            "rawvideo",
            "-pix_fmt",
            "rgb24",
            "-s",
            &format!("{}x{}", cfg.width, cfg.height),
            "-framerate",
            &format!("{}/{}", cfg.fps.num, cfg.fps.den),
            "-i",
            "pipe:0",
            "-an",
            "-c:v",
            "libx264",
            "-b:v",
            &cfg.bitrate_bps.to_string(),
            "-g",
            &cfg.gop_frames().to_string(),
            "-pix_fmt",
            "yuv420p",
            "-movflags",
            "+faststart",
        ])
        .arg(&cfg.out_path);

        let mut child = cmd.spawn().map_err(|e| {
            ExportError::unsupported_codec(format!("failed to spawn ffmpeg: {e}"))
        })?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ExportError::internal("failed to open ffmpeg stdin"))?;

        tracing::debug!(path = %cfg.out_path.display(), "ffmpeg sink spawned");
        Ok(Self {
            scratch: Vec::with_capacity((cfg.width * cfg.height * 3) as usize),
            cfg,
            child: Some(child),
            stdin: Some(stdin),
            frames: 0,
            last_pts: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.cfg.out_path
    }
}

impl FrameSink for FfmpegSink {
    fn canvas(&self) -> Canvas {
        Canvas {
            width: self.cfg.width,
            height: self.cfg.height,
        }
    }

    fn push_frame(&mut self, frame: SurfaceFrame) -> ExportResult<()> {
        let f = &frame.frame;
        if f.width != self.cfg.width || f.height != self.cfg.height {
            return Err(ExportError::internal(format!(
                "frame size mismatch: got {}x{}, expected {}x{}",
                f.width, f.height, self.cfg.width, self.cfg.height
            )));
        }
        // ffmpeg assigns timestamps from the frame rate; ordering is all we can check.
        if let Some(last) = self.last_pts
            && frame.presentation_time_micros < last
        {
            return Err(ExportError::internal(format!(
                "frame timestamps went backwards: {} < {last}",
                frame.presentation_time_micros
            )));
        }
        self.last_pts = Some(frame.presentation_time_micros);

        flatten_premul_to_rgb8(&mut self.scratch, &f.data, [0, 0, 0]);
        let Some(stdin) = self.stdin.as_mut() else {
            return Err(ExportError::internal("ffmpeg sink is already finalized"));
        };
        stdin
            .write_all(&self.scratch)
            .map_err(|e| ExportError::internal(format!("failed to write frame to ffmpeg: {e}")))?;
        self.frames += 1;
        Ok(())
    }

    fn finish(&mut self) -> ExportResult<u64> {
        drop(self.stdin.take());
        let Some(child) = self.child.take() else {
            return Err(ExportError::internal("ffmpeg sink is already finalized"));
        };
        let output = child
            .wait_with_output()
            .map_err(|e| ExportError::internal(format!("failed to wait for ffmpeg: {e}")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExportError::internal(format!(
                "ffmpeg exited with status {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        Ok(self.frames)
    }

    fn abort(&mut self) {
        drop(self.stdin.take());
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

impl Drop for FfmpegSink {
    fn drop(&mut self) {
        self.abort();
    }
}

#[cfg(test)]
#[path = "../../tests/unit/encode/ffmpeg.rs"]
mod tests;
