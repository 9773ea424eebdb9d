//! Request/response protocol for Aster sessions.
//!
//! Every inbound frame is a [`Request`]. The host answers each with a
//! [`Response`] carrying the same `id`, and pushes [`Notification`]s tagged
//! with the originating session as state changes.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use aster_core::{CellId, NewCell, NotebookDocument};

use crate::error::{ServerError, ServerResult};

/// Opaque session identifier (UUID v4 string).
pub type SessionId = String;

/// Method names.
pub mod methods {
    // Session-free.
    pub const SESSION_OPEN: &str = "session/open";
    pub const SESSION_CLOSE: &str = "session/close";
    pub const SESSION_LIST: &str = "session/list";
    pub const HOST_INFO: &str = "host/info";

    // Notebook.
    pub const NOTEBOOK_GET: &str = "notebook/get";
    pub const NOTEBOOK_SET_DEFAULT_LANGUAGE: &str = "notebook/set_default_language";
    pub const NOTEBOOK_EXECUTE_ALL: &str = "notebook/execute_all";
    pub const NOTEBOOK_EXPORT: &str = "notebook/export";

    // Cells.
    pub const CELLS_LIST: &str = "cells/list";
    pub const CELLS_GET: &str = "cells/get";
    pub const CELLS_ADD: &str = "cells/add";
    pub const CELLS_INSERT: &str = "cells/insert";
    pub const CELLS_REMOVE: &str = "cells/remove";
    pub const CELLS_MOVE: &str = "cells/move";
    pub const CELLS_UPDATE_SOURCE: &str = "cells/update_source";
    pub const CELLS_SET_LANGUAGE: &str = "cells/set_language";
    pub const CELLS_CLEAR_OUTPUTS: &str = "cells/clear_outputs";
    pub const CELLS_FORMAT: &str = "cells/format";
    pub const CELLS_EXECUTE: &str = "cells/execute";

    // Execution and kernels.
    pub const EXECUTION_CANCEL: &str = "execution/cancel";
    pub const KERNEL_RESTART: &str = "kernel/restart";
    pub const KERNEL_LIST: &str = "kernel/list";
    pub const KERNEL_COMPLETE: &str = "kernel/complete";
    pub const KERNEL_HOVER: &str = "kernel/hover";
    pub const KERNEL_DIAGNOSTICS: &str = "kernel/diagnostics";

    // Variables.
    pub const VARIABLES_LIST: &str = "variables/list";
    pub const VARIABLES_GET: &str = "variables/get";
    pub const VARIABLES_SET: &str = "variables/set";

    // Extensions.
    pub const EXTENSIONS_LIST: &str = "extensions/list";
    pub const EXTENSIONS_ENABLE: &str = "extensions/enable";
    pub const EXTENSIONS_DISABLE: &str = "extensions/disable";
    pub const EXTENSIONS_UNLOAD: &str = "extensions/unload";

    // Appearance.
    pub const APPEARANCE_SET_THEME: &str = "appearance/set_theme";
    pub const APPEARANCE_SET_LAYOUT: &str = "appearance/set_layout";

    /// Methods handled without a session.
    pub fn is_session_free(method: &str) -> bool {
        matches!(method, SESSION_OPEN | SESSION_CLOSE | SESSION_LIST | HOST_INFO)
    }
}

/// Notification method names.
pub mod notifications {
    pub const EXECUTION_STARTED: &str = "execution/started";
    pub const EXECUTION_OUTPUT: &str = "execution/output";
    pub const EXECUTION_DISPLAY_UPDATED: &str = "execution/display_updated";
    pub const EXECUTION_FINISHED: &str = "execution/finished";
    pub const VARIABLES_CHANGED: &str = "variables/changed";
    pub const KERNEL_RESTARTED: &str = "kernel/restarted";
    pub const SESSION_CLOSED: &str = "session/closed";
}

/// JSON-RPC style error codes.
pub mod codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;

    pub const SESSION_NOT_FOUND: i32 = -32001;
    pub const CELL_NOT_FOUND: i32 = -32002;
    pub const KERNEL_NOT_FOUND: i32 = -32003;
    pub const NO_KERNEL_CONFIGURED: i32 = -32004;
    pub const LOAD_REJECTED: i32 = -32005;
    pub const EXTENSION_NOT_FOUND: i32 = -32006;
    pub const INVALID_OPERATION: i32 = -32007;
    pub const EXECUTION_FAILED: i32 = -32008;
}

/// An inbound request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Correlation id echoed in the response.
    #[serde(default)]
    pub id: Value,
    pub method: String,
    /// Target session; required for every session-scoped method.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    #[serde(default)]
    pub params: Value,
}

impl Request {
    pub fn new(id: impl Into<Value>, method: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            method: method.into(),
            session_id: None,
            params: Value::Null,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<SessionId>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }
}

/// Structured error carried by a failed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Answer to one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

impl Response {
    pub fn ok(id: Value, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: Value, error: ResponseError) -> Self {
        Self {
            id,
            result: None,
            error: Some(error),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Server-initiated message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    #[serde(default)]
    pub params: Value,
}

// =============================================================================
// Parameters
// =============================================================================

/// `session/open`. Either a parsed document, or encoded content plus the
/// serializer format to decode it with (`json` by default).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpenSessionParams {
    #[serde(default)]
    pub document: Option<NotebookDocument>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CellParams {
    pub cell_id: CellId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddCellParams {
    #[serde(flatten)]
    pub cell: NewCell,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsertCellParams {
    pub index: usize,
    #[serde(flatten)]
    pub cell: NewCell,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoveCellParams {
    pub cell_id: CellId,
    pub to: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateSourceParams {
    pub cell_id: CellId,
    pub source: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetLanguageParams {
    pub cell_id: CellId,
    #[serde(default)]
    pub language: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CursorParams {
    pub cell_id: CellId,
    pub cursor: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LanguageParams {
    #[serde(default)]
    pub language: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariableParams {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetVariableParams {
    pub name: String,
    pub value: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtensionParams {
    pub id: String,
}

/// `appearance/*`; `None` restores the front-end default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppearanceParams {
    #[serde(default)]
    pub id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportParams {
    #[serde(default = "default_format")]
    pub format: String,
}

pub(crate) fn default_format() -> String {
    "json".to_string()
}

/// Decode a parameter bag; `null` is treated as `{}`.
pub(crate) fn parse_params<T: DeserializeOwned>(params: Value) -> ServerResult<T> {
    let params = if params.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        params
    };
    serde_json::from_value(params).map_err(|e| ServerError::InvalidParams(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_defaults() {
        let req: Request = serde_json::from_value(json!({ "method": "session/list" })).unwrap();
        assert_eq!(req.id, Value::Null);
        assert!(req.session_id.is_none());
        assert_eq!(req.params, Value::Null);
    }

    #[test]
    fn test_response_omits_absent_fields() {
        let ok = serde_json::to_value(Response::ok(json!(1), json!({"x": 1}))).unwrap();
        assert_eq!(ok, json!({ "id": 1, "result": { "x": 1 } }));
    }

    #[test]
    fn test_session_free_methods() {
        assert!(methods::is_session_free(methods::SESSION_OPEN));
        assert!(methods::is_session_free(methods::HOST_INFO));
        assert!(!methods::is_session_free(methods::CELLS_EXECUTE));
    }
}
