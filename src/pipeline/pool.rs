use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;

use crate::foundation::error::{ExportError, ExportResult};

/// Cooperative cancellation flag, checked by a run between loop iterations.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// `Err(Cancelled)` once [`CancelToken::cancel`] was called.
    pub fn check(&self) -> ExportResult<()> {
        if self.is_cancelled() {
            Err(ExportError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Fixed-size pool; each submitted run owns one worker until it finishes.
///
/// Runs share nothing. The non-`Send` render and codec state a run creates never leaves
/// the worker it was created on.
pub struct ExportPool {
    pool: rayon::ThreadPool,
    threads: usize,
}

impl ExportPool {
    pub fn new(threads: usize) -> ExportResult<Self> {
        let threads = threads.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("vidoverlay-export-{i}"))
            .build()
            .map_err(|e| ExportError::internal(format!("build export pool: {e}")))?;
        Ok(Self { pool, threads })
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Run `job` on a worker and return a handle to its result.
    pub fn submit<T, F>(&self, job: F) -> RunHandle<T>
    where
        T: Send + 'static,
        F: FnOnce(CancelToken) -> ExportResult<T> + Send + 'static,
    {
        let cancel = CancelToken::new();
        let (tx, rx) = mpsc::sync_channel(1);
        let token = cancel.clone();
        self.pool.spawn(move || {
            let result = job(token);
            // The receiver may have been dropped; nobody is waiting then.
            let _ = tx.send(result);
        });
        RunHandle { rx, cancel }
    }
}

/// Pending result of a run submitted to an [`ExportPool`].
pub struct RunHandle<T> {
    rx: mpsc::Receiver<ExportResult<T>>,
    cancel: CancelToken,
}

impl<T> RunHandle<T> {
    /// Ask the run to stop at its next loop iteration. Teardown still completes.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Block until the run finishes.
    pub fn wait(self) -> ExportResult<T> {
        self.rx
            .recv()
            .map_err(|_| ExportError::internal("export worker exited without a result"))?
    }
}

#[cfg(test)]
#[path = "../../tests/unit/pipeline/pool.rs"]
mod tests;
