//! In-memory notebook document exchanged with serializers.

use serde::{Deserialize, Serialize};

use super::cell::{Cell, CellId, Metadata, NewCell};
use crate::output::CellOutput;

/// Notebook-level metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotebookMetadata {
    /// Language used by cells that do not name one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_language: Option<String>,
    /// Everything else, preserved verbatim.
    #[serde(flatten)]
    pub extra: Metadata,
}

/// A cell as stored in a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentCell {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<CellId>,
    #[serde(flatten)]
    pub cell: NewCell,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<CellOutput>,
}

/// A whole notebook.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotebookDocument {
    #[serde(default)]
    pub metadata: NotebookMetadata,
    #[serde(default)]
    pub cells: Vec<DocumentCell>,
}

impl NotebookDocument {
    /// Parse a document from JSON text.
    pub fn from_json(text: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Serialize the document as pretty JSON.
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl DocumentCell {
    pub(crate) fn into_cell(self) -> Cell {
        let mut cell = self.cell.into_cell(self.id.unwrap_or_default());
        cell.outputs = self.outputs;
        cell
    }
}

impl From<&Cell> for DocumentCell {
    fn from(cell: &Cell) -> Self {
        Self {
            id: Some(cell.id.clone()),
            cell: NewCell {
                cell_type: cell.cell_type.clone(),
                language: cell.language.clone(),
                source: cell.source.clone(),
                metadata: cell.metadata.clone(),
            },
            outputs: cell.outputs.clone(),
        }
    }
}
