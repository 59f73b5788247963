use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::foundation::core::{Canvas, Fps};
use crate::foundation::error::{ExportError, ExportResult};

/// Encoder used by the synthetic-background fallback.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyntheticSink {
    #[default]
    Builtin,
    Ffmpeg,
}

impl FromStr for SyntheticSink {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "builtin" | "openh264" => Ok(Self::Builtin),
            "ffmpeg" => Ok(Self::Ffmpeg),
            other => Err(ExportError::internal(format!(
                "unknown synthetic sink '{other}' (expected builtin|ffmpeg)"
            ))),
        }
    }
}

/// Tunables for one export run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportOpts {
    pub bitrate_bps: u32,
    pub key_frame_interval_secs: u32,
    /// Upper bound for a single dequeue/drain wait.
    pub dequeue_timeout_ms: u64,
    /// Consecutive polls without progress before a stage counts as stalled.
    pub stall_budget: u32,
    /// Frame rate used when the container reports none.
    pub default_fps: u32,
    pub synthetic_secs: f64,
    pub synthetic_width: u32,
    pub synthetic_height: u32,
    pub output_dir: PathBuf,
    pub output_prefix: String,
    pub font_path: Option<PathBuf>,
    pub workers: usize,
    pub synthetic_sink: SyntheticSink,
}

impl Default for ExportOpts {
    fn default() -> Self {
        Self {
            bitrate_bps: 2_000_000,
            key_frame_interval_secs: 1,
            dequeue_timeout_ms: 10,
            stall_budget: 500,
            default_fps: 30,
            synthetic_secs: 2.0,
            synthetic_width: 640,
            synthetic_height: 480,
            output_dir: std::env::temp_dir().join("vidoverlay"),
            output_prefix: "composed_video".to_owned(),
            font_path: None,
            workers: 2,
            synthetic_sink: SyntheticSink::Builtin,
        }
    }
}

impl ExportOpts {
    /// Defaults with `VIDOVERLAY_*` environment overrides applied.
    pub fn from_env() -> ExportResult<Self> {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides looked up by variable name (e.g. `VIDOVERLAY_BITRATE`).
    pub fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> ExportResult<Self> {
        fn parsed<T: FromStr>(key: &str, raw: Option<String>) -> ExportResult<Option<T>>
        where
            T::Err: std::fmt::Display,
        {
            raw.map(|v| {
                v.trim().parse::<T>().map_err(|e| {
                    ExportError::internal(format!("invalid value '{v}' for {key}: {e}"))
                })
            })
            .transpose()
        }
        macro_rules! apply {
            ($field:ident, $key:literal) => {
                if let Some(v) = parsed($key, lookup($key))? {
                    self.$field = v;
                }
            };
        }

        apply!(bitrate_bps, "VIDOVERLAY_BITRATE");
        apply!(key_frame_interval_secs, "VIDOVERLAY_KEYFRAME_SECS");
        apply!(dequeue_timeout_ms, "VIDOVERLAY_DEQUEUE_TIMEOUT_MS");
        apply!(stall_budget, "VIDOVERLAY_STALL_BUDGET");
        apply!(default_fps, "VIDOVERLAY_DEFAULT_FPS");
        apply!(synthetic_secs, "VIDOVERLAY_SYNTHETIC_SECS");
        apply!(synthetic_width, "VIDOVERLAY_SYNTHETIC_WIDTH");
        apply!(synthetic_height, "VIDOVERLAY_SYNTHETIC_HEIGHT");
        apply!(output_prefix, "VIDOVERLAY_OUTPUT_PREFIX");
        apply!(workers, "VIDOVERLAY_WORKERS");
        apply!(synthetic_sink, "VIDOVERLAY_SYNTHETIC_SINK");
        if let Some(dir) = lookup("VIDOVERLAY_OUTPUT_DIR") {
            self.output_dir = PathBuf::from(dir);
        }
        if let Some(font) = lookup("VIDOVERLAY_FONT") {
            self.font_path = Some(PathBuf::from(font));
        }

        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> ExportResult<()> {
        if self.bitrate_bps == 0 {
            return Err(ExportError::internal("bitrate must be > 0"));
        }
        if self.default_fps == 0 {
            return Err(ExportError::internal("default fps must be > 0"));
        }
        if self.workers == 0 {
            return Err(ExportError::internal("worker count must be >= 1"));
        }
        if !self.synthetic_secs.is_finite() || self.synthetic_secs <= 0.0 {
            return Err(ExportError::internal("synthetic duration must be > 0"));
        }
        if self.synthetic_width == 0 || self.synthetic_height == 0 {
            return Err(ExportError::internal("synthetic size must be non-zero"));
        }
        if self.output_prefix.is_empty() || self.output_prefix.contains(['/', '\\']) {
            return Err(ExportError::internal(
                "output prefix must be a non-empty file-name fragment",
            ));
        }
        Ok(())
    }

    pub fn dequeue_timeout(&self) -> Duration {
        Duration::from_millis(self.dequeue_timeout_ms)
    }

    pub fn fallback_fps(&self) -> Fps {
        Fps {
            num: self.default_fps.max(1),
            den: 1,
        }
    }

    pub fn synthetic_canvas(&self) -> Canvas {
        Canvas {
            width: self.synthetic_width,
            height: self.synthetic_height,
        }
    }

    /// Reserve `<dir>/<prefix>_<millis>.mp4`, bumped past any existing file.
    ///
    /// The returned path already exists as an empty file owned by the caller, so concurrent
    /// runs never share an output.
    pub fn output_path_at(&self, unix_millis: u128) -> ExportResult<PathBuf> {
        reserve_path(&self.output_dir, &self.output_prefix, unix_millis, "mp4")
    }

    pub fn next_output_path(&self) -> ExportResult<PathBuf> {
        std::fs::create_dir_all(&self.output_dir)?;
        self.output_path_at(unix_millis())
    }

    /// Sibling path for the diagnostic placeholder of the last fallback rung.
    pub fn next_placeholder_path(&self) -> ExportResult<PathBuf> {
        std::fs::create_dir_all(&self.output_dir)?;
        reserve_path(&self.output_dir, &self.output_prefix, unix_millis(), "txt")
    }
}

pub(crate) fn unix_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

fn reserve_path(dir: &Path, prefix: &str, millis: u128, ext: &str) -> ExportResult<PathBuf> {
    for n in 0u32..u32::MAX {
        let name = if n == 0 {
            format!("{prefix}_{millis}.{ext}")
        } else {
            format!("{prefix}_{millis}_{n}.{ext}")
        };
        let path = dir.join(name);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => return Ok(path),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Err(ExportError::internal(format!(
        "no free output name for '{prefix}_{millis}.{ext}' in '{}'",
        dir.display()
    )))
}

#[cfg(test)]
#[path = "../../tests/unit/pipeline/opts.rs"]
mod tests;
