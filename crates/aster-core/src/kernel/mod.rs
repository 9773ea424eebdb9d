//! Kernel contract and per-notebook kernel registry.
//!
//! A kernel is an opaque language backend. The engine only initializes it,
//! hands it source text with an [`ExecutionContext`], asks it to publish
//! variables, and tears it down on restart.

mod registry;

pub use registry::{KernelHandle, KernelInfo, KernelOrigin, KernelRegistry};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::execute::ExecutionContext;
use crate::output::CellOutput;
use crate::variables::VariableStore;

/// A completion candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Severity of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

/// A diagnostic reported against cell source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    /// Byte offset range in the source.
    pub start: usize,
    pub end: usize,
}

/// A language execution backend.
#[async_trait]
pub trait Kernel: Send + Sync {
    /// Language id this kernel executes (matched case-insensitively).
    fn language(&self) -> &str;

    /// Human readable name.
    fn display_name(&self) -> &str {
        self.language()
    }

    /// One-time initialization, called lazily before first use and again
    /// after every restart.
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    /// Execute source text. Outputs may be returned, written through the
    /// context, or both.
    async fn execute(&self, source: &str, ctx: &ExecutionContext) -> Result<Vec<CellOutput>>;

    /// Publish values bound by the last execution into the shared store.
    async fn publish_variables(&self, _variables: &VariableStore) -> Result<()> {
        Ok(())
    }

    /// Completion candidates at a byte offset.
    async fn complete(&self, _source: &str, _cursor: usize) -> Result<Vec<Completion>> {
        Ok(Vec::new())
    }

    /// Hover text at a byte offset.
    async fn hover(&self, _source: &str, _cursor: usize) -> Result<Option<String>> {
        Ok(None)
    }

    /// Static diagnostics for source text.
    async fn diagnose(&self, _source: &str) -> Result<Vec<Diagnostic>> {
        Ok(Vec::new())
    }

    /// Release everything the kernel holds.
    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}
