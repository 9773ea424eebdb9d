//! Core engine for the Aster notebook environment.
//!
//! This crate provides:
//! - Extension host with validation, isolation scopes and typed capability lookup
//! - Kernel contract and per-notebook kernel registry
//! - Magic directive parsing and dispatch
//! - Cell execution pipeline with cooperative cancellation
//! - Notebook state (cells, variables, appearance)

pub mod error;
pub mod execute;
pub mod extension;
pub mod kernel;
pub mod magic;
pub mod output;
pub mod scaffold;
pub mod variables;

pub use error::{Error, Result};
pub use execute::{
    AbortHandle, ErrorSummary, ExecutionCallback, ExecutionContext, ExecutionOutcome,
    ExecutionPipeline, ExecutionRequest, ExecutionStatus, OutputSink,
};
pub use extension::{
    Capabilities, Capability, CapabilityRegistry, Extension, ExtensionCatalog,
    ExtensionDescriptor, ExtensionFactory, ExtensionManifest, ExtensionStatus, IsolationScope,
    ValidationCode, ValidationError,
};
pub use kernel::{
    Completion, Diagnostic, Kernel, KernelHandle, KernelInfo, KernelOrigin, KernelRegistry,
    Severity,
};
pub use magic::{Directive, MagicCommand, MagicContext, parse_directive};
pub use output::{CellOutput, MimeBundle, StreamName};
pub use scaffold::{Appearance, Cell, CellId, NewCell, NotebookDocument, Scaffold};
pub use variables::{Variable, VariableChange, VariableStore};
