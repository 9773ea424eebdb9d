//! JSON notebook serializer.

use aster_core::NotebookDocument;
use aster_core::extension::Serializer;

/// Reads and writes [`NotebookDocument`] as pretty-printed JSON.
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn format_id(&self) -> &str {
        "json"
    }

    fn serialize(&self, document: &NotebookDocument) -> aster_core::Result<Vec<u8>> {
        Ok(document.to_json()?.into_bytes())
    }

    fn deserialize(&self, bytes: &[u8]) -> aster_core::Result<NotebookDocument> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_garbage() {
        assert!(matches!(
            JsonSerializer.deserialize(b"{ not json"),
            Err(aster_core::Error::Serialization(_))
        ));
    }

    #[test]
    fn test_empty_object_is_empty_notebook() {
        let doc = JsonSerializer.deserialize(b"{}").unwrap();
        assert!(doc.cells.is_empty());
        assert!(doc.metadata.default_language.is_none());
    }
}
