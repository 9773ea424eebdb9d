//! Execution context and callbacks for Aster cells.
//!
//! Provides cooperative cancellation, output channels, and progress
//! reporting during cell execution.

use std::sync::{Arc, Mutex, PoisonError};

use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::output::CellOutput;
use crate::scaffold::CellId;
use crate::variables::VariableStore;

use super::pipeline::ExecutionOutcome;

/// Handle for cooperative cancellation of cell execution.
///
/// `AbortHandle` can be cloned and shared across tasks; any clone can
/// trigger the abort, which is visible to all other clones and to every
/// child handle.
///
/// # Example
///
/// ```
/// use aster_core::execute::AbortHandle;
///
/// let handle = AbortHandle::new();
/// let child = handle.child();
///
/// assert!(!child.is_aborted());
/// handle.abort();
/// assert!(child.is_aborted());
/// ```
#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    token: CancellationToken,
}

impl AbortHandle {
    /// Create a new abort handle.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Create a handle that is aborted whenever this one is.
    ///
    /// Aborting the child does not affect the parent.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
        }
    }

    /// Check if abort has been requested.
    ///
    /// Kernels should call this periodically during long-running operations
    /// and exit early if it returns `true`.
    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Request abort of execution.
    pub fn abort(&self) {
        self.token.cancel();
    }

    /// Return `Err(Error::Aborted)` if abort has been requested.
    pub fn check(&self) -> Result<()> {
        if self.is_aborted() {
            Err(Error::Aborted)
        } else {
            Ok(())
        }
    }

    /// Wait until abort is requested.
    pub async fn aborted(&self) {
        self.token.cancelled().await
    }
}

/// Callback trait for execution progress reporting.
pub trait ExecutionCallback: Send + Sync {
    /// Called when a cell starts executing.
    fn on_cell_started(&self, cell_id: &CellId, execution_count: u64);

    /// Called for every output written during execution.
    fn on_output(&self, _cell_id: &CellId, _output: &CellOutput) {}

    /// Called when a live display output is replaced.
    fn on_display_updated(&self, _cell_id: &CellId, _display_id: &str, _output: &CellOutput) {}

    /// Called when a cell finishes, whatever the outcome.
    fn on_cell_finished(&self, cell_id: &CellId, outcome: &ExecutionOutcome);
}

/// Collects outputs written while a cell runs.
///
/// Clones share the same buffer; the pipeline drains it once the run ends.
#[derive(Clone)]
pub struct OutputSink {
    cell_id: CellId,
    outputs: Arc<Mutex<Vec<CellOutput>>>,
    callback: Option<Arc<dyn ExecutionCallback>>,
}

impl OutputSink {
    pub(crate) fn new(cell_id: CellId, callback: Option<Arc<dyn ExecutionCallback>>) -> Self {
        Self {
            cell_id,
            outputs: Arc::new(Mutex::new(Vec::new())),
            callback,
        }
    }

    /// Append a permanent output.
    pub fn write(&self, output: CellOutput) {
        if let Some(ref callback) = self.callback {
            callback.on_output(&self.cell_id, &output);
        }
        self.outputs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(output);
    }

    /// Create or replace the display output tagged with `display_id`.
    pub fn display(&self, display_id: &str, output: CellOutput) {
        let output = match output {
            CellOutput::DisplayData { data, .. } => CellOutput::DisplayData {
                data,
                display_id: Some(display_id.to_string()),
            },
            other => other,
        };
        {
            let mut outputs = self.outputs.lock().unwrap_or_else(PoisonError::into_inner);
            match outputs
                .iter_mut()
                .find(|o| o.display_id() == Some(display_id))
            {
                Some(existing) => *existing = output.clone(),
                None => outputs.push(output.clone()),
            }
        }
        if let Some(ref callback) = self.callback {
            callback.on_display_updated(&self.cell_id, display_id, &output);
        }
    }

    /// Outputs written so far.
    pub fn snapshot(&self) -> Vec<CellOutput> {
        self.outputs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn take(&self) -> Vec<CellOutput> {
        std::mem::take(&mut *self.outputs.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

/// Context handed to a kernel for one execution.
pub struct ExecutionContext {
    cell_id: CellId,
    language: String,
    execution_count: u64,
    abort: AbortHandle,
    variables: Arc<VariableStore>,
    sink: OutputSink,
}

impl ExecutionContext {
    pub(crate) fn new(
        cell_id: CellId,
        language: String,
        execution_count: u64,
        abort: AbortHandle,
        variables: Arc<VariableStore>,
        sink: OutputSink,
    ) -> Self {
        Self {
            cell_id,
            language,
            execution_count,
            abort,
            variables,
            sink,
        }
    }

    /// Get the cell ID.
    pub fn cell_id(&self) -> &CellId {
        &self.cell_id
    }

    /// Language the cell is executed as.
    pub fn language(&self) -> &str {
        &self.language
    }

    /// Monotonic per-cell execution counter for this run.
    pub fn execution_count(&self) -> u64 {
        self.execution_count
    }

    /// Cancellation signal for this run.
    pub fn abort_handle(&self) -> &AbortHandle {
        &self.abort
    }

    /// Check if execution has been aborted.
    pub fn is_aborted(&self) -> bool {
        self.abort.is_aborted()
    }

    /// Return `Err(Error::Aborted)` if execution has been aborted.
    pub fn check_aborted(&self) -> Result<()> {
        self.abort.check()
    }

    /// The notebook's shared variables.
    pub fn variables(&self) -> &Arc<VariableStore> {
        &self.variables
    }

    /// Append a permanent output.
    pub fn write(&self, output: CellOutput) {
        self.sink.write(output);
    }

    /// Create or update a live display output.
    pub fn display(&self, display_id: &str, output: CellOutput) {
        self.sink.display(display_id, output);
    }
}
