use serde::Serialize;

use crate::foundation::error::{ExportError, ExportResult};

/// Lifecycle of one export run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Init,
    SourceOpened,
    CodecsConfigured,
    Running,
    Draining,
    Finalized,
    Failed,
}

impl PipelineState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finalized | Self::Failed)
    }

    /// Legal forward edges; `Failed` is reachable from every non-terminal state.
    pub fn can_advance_to(self, next: Self) -> bool {
        use PipelineState::*;
        match (self, next) {
            (s, Failed) => !s.is_terminal(),
            (Init, SourceOpened)
            | (SourceOpened, CodecsConfigured)
            | (CodecsConfigured, Running)
            | (Running, Draining)
            | (Draining, Finalized) => true,
            _ => false,
        }
    }
}

/// Records the transitions of one run and rejects illegal ones.
#[derive(Clone, Debug)]
pub struct StateMachine {
    current: PipelineState,
    history: Vec<PipelineState>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            current: PipelineState::Init,
            history: vec![PipelineState::Init],
        }
    }

    pub fn current(&self) -> PipelineState {
        self.current
    }

    pub fn history(&self) -> &[PipelineState] {
        &self.history
    }

    pub fn advance(&mut self, next: PipelineState) -> ExportResult<()> {
        if !self.current.can_advance_to(next) {
            return Err(ExportError::internal(format!(
                "illegal pipeline transition {:?} -> {next:?}",
                self.current
            )));
        }
        tracing::debug!(from = ?self.current, to = ?next, "pipeline state");
        self.current = next;
        self.history.push(next);
        Ok(())
    }

    /// Move to `Failed` unless already terminal.
    pub fn fail(&mut self) {
        if !self.current.is_terminal() {
            tracing::debug!(from = ?self.current, "pipeline failed");
            self.current = PipelineState::Failed;
            self.history.push(PipelineState::Failed);
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/pipeline/state.rs"]
mod tests;
