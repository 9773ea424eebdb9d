//! Single-cell execution pipeline.
//!
//! Resolves the kernel, runs any magic directive, calls the kernel under
//! its execution gate while racing the abort signal, and normalizes the
//! result into an [`ExecutionOutcome`].

use std::borrow::Cow;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::context::{AbortHandle, ExecutionCallback, ExecutionContext, OutputSink};
use crate::error::{Error, Result};
use crate::extension::CapabilityRegistry;
use crate::kernel::{KernelHandle, KernelRegistry};
use crate::magic::{MagicContext, parse_directive};
use crate::output::CellOutput;
use crate::scaffold::CellId;
use crate::variables::VariableStore;

/// Snapshot of a cell taken when execution was requested.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub cell_id: CellId,
    /// Cell language; `None` uses the notebook default.
    pub language: Option<String>,
    pub source: String,
    pub execution_count: u64,
}

/// Terminal state of one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Cancelled,
    Failed,
}

/// Why an execution failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorSummary {
    pub kind: String,
    pub message: String,
}

/// Result of running one cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub cell_id: CellId,
    pub status: ExecutionStatus,
    pub execution_count: u64,
    #[serde(rename = "duration_ms", with = "duration_ms")]
    pub duration: Duration,
    pub outputs: Vec<CellOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorSummary>,
}

impl ExecutionOutcome {
    /// An outcome for a cell that never reached its kernel.
    pub fn cancelled(cell_id: CellId) -> Self {
        Self {
            cell_id,
            status: ExecutionStatus::Cancelled,
            execution_count: 0,
            duration: Duration::ZERO,
            outputs: Vec::new(),
            error: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == ExecutionStatus::Cancelled
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// Runs cells of one notebook.
pub struct ExecutionPipeline<'a> {
    kernels: &'a KernelRegistry,
    extensions: &'a CapabilityRegistry,
    variables: &'a Arc<VariableStore>,
    default_language: Option<String>,
    callback: Option<Arc<dyn ExecutionCallback>>,
}

impl<'a> ExecutionPipeline<'a> {
    pub fn new(
        kernels: &'a KernelRegistry,
        extensions: &'a CapabilityRegistry,
        variables: &'a Arc<VariableStore>,
    ) -> Self {
        Self {
            kernels,
            extensions,
            variables,
            default_language: None,
            callback: None,
        }
    }

    pub fn with_default_language(mut self, language: Option<String>) -> Self {
        self.default_language = language.filter(|l| !l.trim().is_empty());
        self
    }

    pub fn with_callback(mut self, callback: Option<Arc<dyn ExecutionCallback>>) -> Self {
        self.callback = callback;
        self
    }

    /// Execute one cell.
    ///
    /// Returns `Err` only when no kernel can be resolved; kernel and magic
    /// failures are reported as a `Failed` outcome with an error output,
    /// and cancellation as a `Cancelled` outcome.
    pub async fn run(
        &self,
        request: ExecutionRequest,
        abort: &AbortHandle,
    ) -> Result<ExecutionOutcome> {
        let started = Instant::now();
        let language = request
            .language
            .as_deref()
            .filter(|l| !l.trim().is_empty())
            .or(self.default_language.as_deref())
            .ok_or(Error::NoKernelConfigured)?
            .to_string();
        let kernel = self.kernels.resolve(&language, self.extensions)?;

        tracing::debug!(
            "Executing cell {} as '{}' (count {})",
            request.cell_id,
            language,
            request.execution_count
        );
        if let Some(ref callback) = self.callback {
            callback.on_cell_started(&request.cell_id, request.execution_count);
        }

        let sink = OutputSink::new(request.cell_id.clone(), self.callback.clone());
        let result = self.drive(&request, &language, &kernel, abort, &sink).await;
        let mut outputs = sink.take();

        let (status, error) = match result {
            Err(Error::Aborted) => (ExecutionStatus::Cancelled, None),
            _ if abort.is_aborted() => (ExecutionStatus::Cancelled, None),
            Ok(()) => (ExecutionStatus::Success, None),
            Err(e) => {
                tracing::debug!("Cell {} failed: {}", request.cell_id, e);
                outputs.push(CellOutput::error(e.kind(), e.message()));
                let summary = ErrorSummary {
                    kind: e.kind().to_string(),
                    message: e.message(),
                };
                (ExecutionStatus::Failed, Some(summary))
            }
        };

        for processor in self.extensions.post_processors() {
            outputs = processor.process(outputs);
        }

        let outcome = ExecutionOutcome {
            cell_id: request.cell_id,
            status,
            execution_count: request.execution_count,
            duration: started.elapsed(),
            outputs,
            error,
        };
        if let Some(ref callback) = self.callback {
            callback.on_cell_finished(&outcome.cell_id, &outcome);
        }
        Ok(outcome)
    }

    async fn drive(
        &self,
        request: &ExecutionRequest,
        language: &str,
        kernel: &KernelHandle,
        abort: &AbortHandle,
        sink: &OutputSink,
    ) -> Result<()> {
        abort.check()?;
        initialize(kernel, abort).await?;

        let mut body = Cow::Borrowed(request.source.as_str());
        if let Some(directive) = parse_directive(&request.source) {
            match self.extensions.find_magic_command(&directive.name) {
                Some(command) => {
                    tracing::debug!("Running magic '{}' in cell {}", directive.name, request.cell_id);
                    let mut ctx = MagicContext::new(
                        &request.cell_id,
                        language,
                        request.execution_count,
                        self.variables,
                        self.kernels,
                        self.extensions,
                        abort,
                        sink,
                    );
                    tokio::select! {
                        biased;
                        _ = abort.aborted() => return Err(Error::Aborted),
                        result = command.invoke(&directive.args, &directive.body, &mut ctx) => result?,
                    }
                    if ctx.is_suppressed() {
                        return Ok(());
                    }
                    body = Cow::Owned(directive.body);
                }
                None => {
                    tracing::debug!("No magic named '{}'; passing source through", directive.name);
                }
            }
        }

        abort.check()?;
        let _gate = tokio::select! {
            biased;
            _ = abort.aborted() => return Err(Error::Aborted),
            guard = kernel.lock() => guard,
        };
        // A restart may have run while we waited.
        initialize(kernel, abort).await?;

        let ctx = ExecutionContext::new(
            request.cell_id.clone(),
            language.to_string(),
            request.execution_count,
            abort.clone(),
            self.variables.clone(),
            sink.clone(),
        );
        let result = tokio::select! {
            biased;
            _ = abort.aborted() => return Err(Error::Aborted),
            result = kernel.kernel().execute(&body, &ctx) => result,
        };

        if !abort.is_aborted() {
            if let Err(e) = kernel.kernel().publish_variables(self.variables).await {
                tracing::warn!("Kernel '{}' failed to publish variables: {}", language, e);
            }
        }

        for output in result? {
            sink.write(output);
        }
        Ok(())
    }
}

/// Initialization is part of the run, so an abort must be able to interrupt it.
async fn initialize(kernel: &KernelHandle, abort: &AbortHandle) -> Result<()> {
    tokio::select! {
        biased;
        _ = abort.aborted() => Err(Error::Aborted),
        result = kernel.ensure_initialized() => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_serializes_duration_as_millis() {
        let outcome = ExecutionOutcome {
            cell_id: CellId::from("c1"),
            status: ExecutionStatus::Failed,
            execution_count: 3,
            duration: Duration::from_millis(42),
            outputs: vec![CellOutput::error("NameError", "x")],
            error: Some(ErrorSummary {
                kind: "NameError".into(),
                message: "x".into(),
            }),
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["duration_ms"], 42);
        assert_eq!(json["status"], "failed");
        assert_eq!(json["error"]["kind"], "NameError");

        let back: ExecutionOutcome = serde_json::from_value(json).unwrap();
        assert_eq!(back, outcome);
    }
}
