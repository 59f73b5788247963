pub type ExportResult<T> = Result<T, ExportError>;

/// Stable classification of an [`ExportError`], suitable for mapping onto caller-facing codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// The container has no track whose MIME type starts with `video/`.
    NoVideoTrack,
    /// The container could not be opened or parsed.
    UnreadableContainer,
    /// No codec can handle the track, or the codec rejected its configuration.
    UnsupportedCodec,
    /// The decoder made no progress within the retry budget.
    DecoderStalled,
    /// The encoder made no progress within the retry budget.
    EncoderStalled,
    /// The muxer was driven out of order.
    MuxerProtocolViolation,
    /// The pipeline finished but the output file is missing or empty.
    ExportProducedEmptyOutput,
    /// A resource failed to release during teardown.
    ResourceReleaseFailure,
    /// The input failed validation before any codec resource was allocated.
    SourceValidationFailed,
    /// The overlay description could not be interpreted.
    InvalidOverlay,
    /// The run was cancelled between loop iterations.
    Cancelled,
    /// Any other failure.
    Internal,
}

impl ErrorKind {
    /// Stable string code, e.g. `NO_VIDEO_TRACK`.
    pub fn code(self) -> &'static str {
        match self {
            Self::NoVideoTrack => "NO_VIDEO_TRACK",
            Self::UnreadableContainer => "UNREADABLE_CONTAINER",
            Self::UnsupportedCodec => "UNSUPPORTED_CODEC",
            Self::DecoderStalled => "DECODER_STALLED",
            Self::EncoderStalled => "ENCODER_STALLED",
            Self::MuxerProtocolViolation => "MUXER_PROTOCOL_VIOLATION",
            Self::ExportProducedEmptyOutput => "EXPORT_PRODUCED_EMPTY_OUTPUT",
            Self::ResourceReleaseFailure => "RESOURCE_RELEASE_FAILURE",
            Self::SourceValidationFailed => "SOURCE_VALIDATION_FAILED",
            Self::InvalidOverlay => "INVALID_OVERLAY",
            Self::Cancelled => "CANCELLED",
            Self::Internal => "INTERNAL",
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ExportError {
    #[error("no video track: {0}")]
    NoVideoTrack(String),

    #[error("unreadable container: {0}")]
    UnreadableContainer(String),

    #[error("unsupported codec: {0}")]
    UnsupportedCodec(String),

    #[error("decoder stalled: {0}")]
    DecoderStalled(String),

    #[error("encoder stalled: {0}")]
    EncoderStalled(String),

    #[error("muxer protocol violation: {0}")]
    MuxerProtocolViolation(String),

    #[error("export produced empty output: {0}")]
    ExportProducedEmptyOutput(String),

    #[error("resource release failure: {0}")]
    ResourceReleaseFailure(String),

    #[error("source validation failed: {0}")]
    SourceValidationFailed(String),

    #[error("invalid overlay: {0}")]
    InvalidOverlay(String),

    #[error("export cancelled")]
    Cancelled,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ExportError {
    pub fn no_video_track(msg: impl Into<String>) -> Self {
        Self::NoVideoTrack(msg.into())
    }

    pub fn unreadable_container(msg: impl Into<String>) -> Self {
        Self::UnreadableContainer(msg.into())
    }

    pub fn unsupported_codec(msg: impl Into<String>) -> Self {
        Self::UnsupportedCodec(msg.into())
    }

    pub fn decoder_stalled(msg: impl Into<String>) -> Self {
        Self::DecoderStalled(msg.into())
    }

    pub fn encoder_stalled(msg: impl Into<String>) -> Self {
        Self::EncoderStalled(msg.into())
    }

    pub fn muxer_protocol(msg: impl Into<String>) -> Self {
        Self::MuxerProtocolViolation(msg.into())
    }

    pub fn empty_output(msg: impl Into<String>) -> Self {
        Self::ExportProducedEmptyOutput(msg.into())
    }

    pub fn release_failure(msg: impl Into<String>) -> Self {
        Self::ResourceReleaseFailure(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::SourceValidationFailed(msg.into())
    }

    pub fn invalid_overlay(msg: impl Into<String>) -> Self {
        Self::InvalidOverlay(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Other(anyhow::anyhow!(msg.into()))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NoVideoTrack(_) => ErrorKind::NoVideoTrack,
            Self::UnreadableContainer(_) => ErrorKind::UnreadableContainer,
            Self::UnsupportedCodec(_) => ErrorKind::UnsupportedCodec,
            Self::DecoderStalled(_) => ErrorKind::DecoderStalled,
            Self::EncoderStalled(_) => ErrorKind::EncoderStalled,
            Self::MuxerProtocolViolation(_) => ErrorKind::MuxerProtocolViolation,
            Self::ExportProducedEmptyOutput(_) => ErrorKind::ExportProducedEmptyOutput,
            Self::ResourceReleaseFailure(_) => ErrorKind::ResourceReleaseFailure,
            Self::SourceValidationFailed(_) => ErrorKind::SourceValidationFailed,
            Self::InvalidOverlay(_) => ErrorKind::InvalidOverlay,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Other(_) => ErrorKind::Internal,
        }
    }

    /// Errors that no fallback strategy can recover from.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::SourceValidationFailed | ErrorKind::InvalidOverlay | ErrorKind::Cancelled
        )
    }
}

impl From<std::io::Error> for ExportError {
    fn from(e: std::io::Error) -> Self {
        Self::Other(anyhow::Error::new(e))
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/error.rs"]
mod tests;
