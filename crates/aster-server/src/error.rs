//! Error types for Aster server.

use serde_json::{Value, json};

use crate::protocol::{ResponseError, codes};

/// Server error type.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// No open session has this id.
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// A session-scoped method was called without a session id.
    #[error("Method '{0}' requires a session_id")]
    MissingSessionId(String),

    /// Unknown method name.
    #[error("Method not found: {0}")]
    MethodNotFound(String),

    /// Parameters did not match the method.
    #[error("Invalid params: {0}")]
    InvalidParams(String),

    /// Aster core error.
    #[error(transparent)]
    Core(#[from] aster_core::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {message}")]
    Io { message: String },
}

impl From<std::io::Error> for ServerError {
    fn from(e: std::io::Error) -> Self {
        Self::Io {
            message: e.to_string(),
        }
    }
}

impl ServerError {
    /// Protocol error code.
    pub fn code(&self) -> i32 {
        use aster_core::Error as Core;
        match self {
            Self::SessionNotFound(_) => codes::SESSION_NOT_FOUND,
            Self::MissingSessionId(_) | Self::InvalidParams(_) => codes::INVALID_PARAMS,
            Self::MethodNotFound(_) => codes::METHOD_NOT_FOUND,
            Self::Json(_) => codes::PARSE_ERROR,
            Self::Io { .. } => codes::INTERNAL_ERROR,
            Self::Core(e) => match e {
                Core::CellNotFound(_) => codes::CELL_NOT_FOUND,
                Core::KernelNotFound(_) => codes::KERNEL_NOT_FOUND,
                Core::NoKernelConfigured => codes::NO_KERNEL_CONFIGURED,
                Core::LoadRejected { .. } => codes::LOAD_REJECTED,
                Core::ExtensionNotFound(_) => codes::EXTENSION_NOT_FOUND,
                Core::IndexOutOfRange { .. }
                | Core::NotExecutable { .. }
                | Core::DuplicateKernel(_)
                | Core::InvalidOperation(_) => codes::INVALID_OPERATION,
                Core::Execution { .. } | Core::LifecycleHook { .. } | Core::Aborted => {
                    codes::EXECUTION_FAILED
                }
                Core::Serialization(_) => codes::INVALID_PARAMS,
            },
        }
    }

    /// Structured detail for `error.data`.
    pub fn data(&self) -> Option<Value> {
        match self {
            Self::Core(aster_core::Error::LoadRejected { id, errors }) => {
                Some(json!({ "id": id, "errors": errors }))
            }
            Self::Core(e) => Some(json!({ "kind": e.kind() })),
            _ => None,
        }
    }

    pub fn to_response_error(&self) -> ResponseError {
        ResponseError {
            code: self.code(),
            message: self.to_string(),
            data: self.data(),
        }
    }
}

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

#[cfg(test)]
mod tests {
    use super::*;
    use aster_core::{ValidationCode, ValidationError};

    #[test]
    fn test_load_rejected_carries_validation_list() {
        let err = ServerError::from(aster_core::Error::LoadRejected {
            id: "x".into(),
            errors: vec![ValidationError::new(ValidationCode::DuplicateId, "dup")],
        });
        let wire = err.to_response_error();
        assert_eq!(wire.code, codes::LOAD_REJECTED);
        assert_eq!(wire.data.unwrap()["errors"][0]["code"], "DUPLICATE_ID");
    }

    #[test]
    fn test_missing_session_is_invalid_params() {
        assert_eq!(
            ServerError::MissingSessionId("cells/list".into()).code(),
            codes::INVALID_PARAMS
        );
        assert_eq!(
            ServerError::SessionNotFound("nope".into()).code(),
            codes::SESSION_NOT_FOUND
        );
    }
}
