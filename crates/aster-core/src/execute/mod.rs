//! Execution engine for Aster notebooks.
//!
//! ```text
//! ExecutionRequest
//!     │
//!     └── ExecutionPipeline
//!             ├── KernelRegistry::resolve (local, else adopted from an extension)
//!             ├── KernelHandle::ensure_initialized
//!             ├── magic directive (may suppress the kernel call)
//!             ├── execution gate + Kernel::execute, raced against AbortHandle
//!             └── ExecutionOutcome (Success | Cancelled | Failed)
//! ```

mod context;
mod pipeline;

pub use context::{AbortHandle, ExecutionCallback, ExecutionContext, OutputSink};
pub use pipeline::{
    ErrorSummary, ExecutionOutcome, ExecutionPipeline, ExecutionRequest, ExecutionStatus,
};
