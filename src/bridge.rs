//! Host-facing adapter: `{source_path, overlay}` in, output path or error code out.
//!
//! Nothing here makes pipeline decisions. It parses the request, hands it to the fallback
//! ladder and flattens the typed outcome into a response a host toolkit can forward.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::foundation::error::{ExportError, ExportResult};
use crate::media::codec::CodecFactory;
use crate::overlay::spec::{OverlaySpec, strip_file_uri};
use crate::pipeline::fallback::{ExportOutcome, Fidelity, default_ladder, export_with_fallback};
use crate::pipeline::opts::ExportOpts;
use crate::pipeline::pool::{CancelToken, ExportPool, RunHandle};

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComposeRequest {
    /// Plain path or `file://` URI.
    #[serde(alias = "sourceUri", alias = "videoUri", alias = "source")]
    pub source_path: String,
    #[serde(alias = "overlayConfig", alias = "overlayParams")]
    pub overlay: serde_json::Value,
}

impl ComposeRequest {
    pub fn new(source_path: impl Into<String>, overlay: serde_json::Value) -> Self {
        Self {
            source_path: source_path.into(),
            overlay,
        }
    }

    pub fn source(&self) -> PathBuf {
        PathBuf::from(strip_file_uri(&self.source_path))
    }

    pub fn overlay_spec(&self) -> ExportResult<OverlaySpec> {
        OverlaySpec::from_value(self.overlay.clone())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ComposeResponse {
    Ok {
        output_path: String,
        byte_size: i64,
        frame_count: u64,
        fidelity: Fidelity,
    },
    Error {
        code: &'static str,
        message: String,
    },
}

impl ComposeResponse {
    pub fn from_result(result: ExportResult<ExportOutcome>) -> Self {
        match result {
            Ok(outcome) => Self::Ok {
                output_path: outcome.result.output_path.display().to_string(),
                byte_size: outcome.result.byte_size,
                frame_count: outcome.result.frame_count,
                fidelity: outcome.fidelity,
            },
            Err(e) => Self::from_error(&e),
        }
    }

    pub fn from_error(e: &ExportError) -> Self {
        Self::Error {
            code: e.kind().code(),
            message: e.to_string(),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok { .. })
    }
}

/// Run `request` on the calling thread.
pub fn compose(
    request: &ComposeRequest,
    opts: &ExportOpts,
    factory: &dyn CodecFactory,
    cancel: &CancelToken,
) -> ComposeResponse {
    ComposeResponse::from_result(compose_outcome(request, opts, factory, cancel))
}

/// Parse a JSON request body, then [`compose`] it.
pub fn compose_json(
    body: &str,
    opts: &ExportOpts,
    factory: &dyn CodecFactory,
    cancel: &CancelToken,
) -> ComposeResponse {
    match serde_json::from_str::<ComposeRequest>(body) {
        Ok(request) => compose(&request, opts, factory, cancel),
        Err(e) => ComposeResponse::from_error(&ExportError::invalid_overlay(format!(
            "malformed compose request: {e}"
        ))),
    }
}

/// Queue `request` on `pool`; the handle yields the response once the run finishes.
pub fn submit(
    pool: &ExportPool,
    request: ComposeRequest,
    opts: ExportOpts,
    factory: Arc<dyn CodecFactory>,
) -> RunHandle<ExportOutcome> {
    pool.submit(move |cancel| compose_outcome(&request, &opts, factory.as_ref(), &cancel))
}

fn compose_outcome(
    request: &ComposeRequest,
    opts: &ExportOpts,
    factory: &dyn CodecFactory,
    cancel: &CancelToken,
) -> ExportResult<ExportOutcome> {
    let overlay = request.overlay_spec()?;
    let source = request.source();
    tracing::debug!(source = %source.display(), kind = overlay.kind.as_str(), "compose request");
    export_with_fallback(&source, &overlay, opts, factory, cancel, &default_ladder())
}

#[cfg(test)]
#[path = "../tests/unit/bridge.rs"]
mod tests;
