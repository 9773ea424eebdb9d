//! Cell types.

use serde::{Deserialize, Serialize};

use crate::output::CellOutput;

/// Cell type tag for executable code cells.
pub const CODE_CELL: &str = "code";
/// Cell type tag for markdown cells.
pub const MARKDOWN_CELL: &str = "markdown";

/// Free-form cell or notebook metadata.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Opaque unique identifier for a cell.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CellId(String);

impl CellId {
    /// Mint a fresh id.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CellId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for CellId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for CellId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for CellId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A notebook cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    /// Unique identifier.
    pub id: CellId,
    /// Type tag (`code`, `markdown`, or a registered cell type id).
    pub cell_type: String,
    /// Kernel affinity. `None` falls back to the notebook default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Source text.
    pub source: String,
    /// Outputs of the last execution.
    #[serde(default)]
    pub outputs: Vec<CellOutput>,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: Metadata,
    /// Number of execution attempts, including failed and cancelled ones.
    #[serde(default)]
    pub execution_count: u64,
}

impl Cell {
    /// Whether the cell has the plain `code` type.
    pub fn is_code(&self) -> bool {
        self.cell_type.eq_ignore_ascii_case(CODE_CELL)
    }
}

/// Parameters for a cell about to be added to a notebook.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewCell {
    #[serde(default = "default_cell_type")]
    pub cell_type: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub metadata: Metadata,
}

fn default_cell_type() -> String {
    CODE_CELL.to_string()
}

impl NewCell {
    /// A code cell with the given source.
    pub fn code(source: impl Into<String>) -> Self {
        Self {
            cell_type: CODE_CELL.to_string(),
            source: source.into(),
            ..Default::default()
        }
    }

    /// A markdown cell with the given text.
    pub fn markdown(source: impl Into<String>) -> Self {
        Self {
            cell_type: MARKDOWN_CELL.to_string(),
            source: source.into(),
            ..Default::default()
        }
    }

    /// Set the kernel affinity.
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub(crate) fn into_cell(self, id: CellId) -> Cell {
        Cell {
            id,
            cell_type: self.cell_type,
            language: self.language.filter(|l| !l.trim().is_empty()),
            source: self.source,
            outputs: Vec::new(),
            metadata: self.metadata,
            execution_count: 0,
        }
    }
}
