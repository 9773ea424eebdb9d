//! Error types for aster-core.

use thiserror::Error;

use crate::extension::ValidationError;
use crate::scaffold::CellId;

/// Result type for aster-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in aster-core.
#[derive(Debug, Error)]
pub enum Error {
    /// Neither the cell nor the notebook names a language.
    #[error("no kernel configured: cell has no language and the notebook has no default language")]
    NoKernelConfigured,

    /// No kernel is registered or discoverable for a language.
    #[error("kernel not found for language '{0}'")]
    KernelNotFound(String),

    /// A kernel for this language is already registered in the notebook.
    #[error("kernel already registered for language '{0}'")]
    DuplicateKernel(String),

    /// Cell not found.
    #[error("cell not found: {0}")]
    CellNotFound(CellId),

    /// Index passed to an insert or move is past the end of the cell list.
    #[error("index {index} out of range for {len} cells")]
    IndexOutOfRange { index: usize, len: usize },

    /// The cell's type has no kernel behind it.
    #[error("cell {cell_id} of type '{cell_type}' is not executable")]
    NotExecutable { cell_id: CellId, cell_type: String },

    /// Extension not found.
    #[error("extension not found: {0}")]
    ExtensionNotFound(String),

    /// Extension failed validation; carries every failed rule.
    #[error("extension '{id}' rejected: {}", summarize(errors))]
    LoadRejected {
        id: String,
        errors: Vec<ValidationError>,
    },

    /// An extension load/unload hook failed or panicked.
    #[error("extension '{id}' failed in {hook} hook: {message}")]
    LifecycleHook {
        id: String,
        hook: &'static str,
        message: String,
    },

    /// Failure raised by a kernel or magic command.
    #[error("{kind}: {message}")]
    Execution { kind: String, message: String },

    /// Execution was aborted by user request.
    #[error("execution aborted")]
    Aborted,

    /// Invalid operation (e.g., selecting a theme nobody provides).
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Build an execution error with an explicit kind (e.g. `NameError`).
    pub fn execution(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Execution {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Short error kind, used as `ename` in error outputs.
    pub fn kind(&self) -> &str {
        match self {
            Self::Execution { kind, .. } => kind,
            Self::NoKernelConfigured => "NoKernelConfigured",
            Self::KernelNotFound(_) => "KernelNotFound",
            Self::DuplicateKernel(_) => "DuplicateKernel",
            Self::CellNotFound(_) => "CellNotFound",
            Self::IndexOutOfRange { .. } => "IndexOutOfRange",
            Self::NotExecutable { .. } => "NotExecutable",
            Self::ExtensionNotFound(_) => "ExtensionNotFound",
            Self::LoadRejected { .. } => "LoadRejected",
            Self::LifecycleHook { .. } => "LifecycleHook",
            Self::Aborted => "Aborted",
            Self::InvalidOperation(_) => "InvalidOperation",
            Self::Serialization(_) => "Serialization",
        }
    }

    /// Message without the kind prefix, used as `evalue` in error outputs.
    pub fn message(&self) -> String {
        match self {
            Self::Execution { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    /// Recovery hint shown by the CLI, if one applies.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::NoKernelConfigured => {
                Some("set a language on the cell or pass --default-language")
            }
            Self::KernelNotFound(_) => Some("run `aster extensions` to see available kernels"),
            Self::LoadRejected { .. } => Some("fix the extension manifest and reload it"),
            _ => None,
        }
    }

    /// Error message followed by its recovery hint, if any.
    pub fn with_hint(&self) -> String {
        match self.hint() {
            Some(hint) => format!("{self}\n  hint: {hint}"),
            None => self.to_string(),
        }
    }
}

fn summarize(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.code.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extension::ValidationCode;

    #[test]
    fn test_execution_error_kind_and_message() {
        let err = Error::execution("NameError", "x is not defined");
        assert_eq!(err.kind(), "NameError");
        assert_eq!(err.message(), "x is not defined");
        assert_eq!(err.to_string(), "NameError: x is not defined");
    }

    #[test]
    fn test_load_rejected_lists_every_code() {
        let err = Error::LoadRejected {
            id: "x".to_string(),
            errors: vec![
                ValidationError::new(ValidationCode::DuplicateId, "dup"),
                ValidationError::new(ValidationCode::MissingName, "name"),
            ],
        };
        assert_eq!(
            err.to_string(),
            "extension 'x' rejected: DUPLICATE_ID, MISSING_NAME"
        );
    }

    #[test]
    fn test_hint() {
        assert!(Error::NoKernelConfigured.with_hint().contains("hint:"));
        assert_eq!(Error::Aborted.with_hint(), "execution aborted");
    }
}
