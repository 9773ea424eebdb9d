//! Cell output representation.
//!
//! Outputs follow the Jupyter shapes so front-ends and serializers can map
//! them without translation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Mime type to payload.
pub type MimeBundle = BTreeMap<String, serde_json::Value>;

/// Mime type for plain text payloads.
pub const TEXT_PLAIN: &str = "text/plain";

/// Which standard stream a stream output came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamName {
    Stdout,
    Stderr,
}

/// A single cell output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "output_type", rename_all = "snake_case")]
pub enum CellOutput {
    /// Standard output/error text.
    Stream { name: StreamName, text: String },

    /// Rich display data. A `display_id` makes the output live-updatable.
    DisplayData {
        data: MimeBundle,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        display_id: Option<String>,
    },

    /// Value of the last expression.
    ExecuteResult {
        execution_count: u64,
        data: MimeBundle,
    },

    /// Error raised by a kernel or magic command.
    Error {
        ename: String,
        evalue: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        traceback: Vec<String>,
    },
}

impl CellOutput {
    /// Standard output text.
    pub fn stdout(text: impl Into<String>) -> Self {
        Self::Stream {
            name: StreamName::Stdout,
            text: text.into(),
        }
    }

    /// Standard error text.
    pub fn stderr(text: impl Into<String>) -> Self {
        Self::Stream {
            name: StreamName::Stderr,
            text: text.into(),
        }
    }

    /// Plain-text display data.
    pub fn text(text: impl Into<String>) -> Self {
        Self::DisplayData {
            data: plain_bundle(text.into()),
            display_id: None,
        }
    }

    /// Plain-text execution result.
    pub fn execute_result(execution_count: u64, text: impl Into<String>) -> Self {
        Self::ExecuteResult {
            execution_count,
            data: plain_bundle(text.into()),
        }
    }

    /// Error output.
    pub fn error(ename: impl Into<String>, evalue: impl Into<String>) -> Self {
        Self::Error {
            ename: ename.into(),
            evalue: evalue.into(),
            traceback: Vec::new(),
        }
    }

    /// Whether this output reports an error.
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    /// Display id of a live-updatable output.
    pub fn display_id(&self) -> Option<&str> {
        match self {
            Self::DisplayData { display_id, .. } => display_id.as_deref(),
            _ => None,
        }
    }

    /// Plain-text rendering, if the output carries one.
    pub fn plain_text(&self) -> Option<String> {
        match self {
            Self::Stream { text, .. } => Some(text.clone()),
            Self::DisplayData { data, .. } | Self::ExecuteResult { data, .. } => {
                data.get(TEXT_PLAIN).map(|v| match v {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
            }
            Self::Error { ename, evalue, .. } => Some(format!("{ename}: {evalue}")),
        }
    }
}

fn plain_bundle(text: String) -> MimeBundle {
    let mut data = MimeBundle::new();
    data.insert(TEXT_PLAIN.to_string(), serde_json::Value::String(text));
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_type_tag() {
        let json = serde_json::to_value(CellOutput::execute_result(3, "2")).unwrap();
        assert_eq!(json["output_type"], "execute_result");
        assert_eq!(json["execution_count"], 3);
        assert_eq!(json["data"]["text/plain"], "2");
    }

    #[test]
    fn test_error_output() {
        let out = CellOutput::error("ZeroDivisionError", "division by zero");
        assert!(out.is_error());
        assert_eq!(
            out.plain_text().as_deref(),
            Some("ZeroDivisionError: division by zero")
        );
    }

    #[test]
    fn test_stream_roundtrip_shape() {
        let json = r#"{"output_type":"stream","name":"stderr","text":"oops"}"#;
        let out: CellOutput = serde_json::from_str(json).unwrap();
        assert_eq!(out, CellOutput::stderr("oops"));
    }
}
