//! Notebook state.
//!
//! A [`Scaffold`] owns one notebook's cells, its kernel bindings and its
//! variable store. Structural edits to the cell list happen under one lock
//! that is never held across an await; execution snapshots the cell at call
//! time and writes the outputs back once the run finishes.

mod cell;
mod document;

pub use cell::{CODE_CELL, Cell, CellId, MARKDOWN_CELL, Metadata, NewCell};
pub use document::{DocumentCell, NotebookDocument, NotebookMetadata};

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::execute::{
    AbortHandle, ExecutionCallback, ExecutionOutcome, ExecutionPipeline, ExecutionRequest,
};
use crate::extension::CapabilityRegistry;
use crate::kernel::{Completion, Diagnostic, Kernel, KernelHandle, KernelRegistry};
use crate::variables::VariableStore;

/// Selected theme and layout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appearance {
    pub theme: Option<String>,
    pub layout: Option<String>,
}

/// One notebook's mutable state.
pub struct Scaffold {
    cells: Mutex<Vec<Cell>>,
    default_language: RwLock<Option<String>>,
    metadata: RwLock<Metadata>,
    appearance: RwLock<Appearance>,
    variables: Arc<VariableStore>,
    kernels: KernelRegistry,
    extensions: Arc<CapabilityRegistry>,
    callback: Option<Arc<dyn ExecutionCallback>>,
}

impl Scaffold {
    /// Create an empty notebook backed by `extensions`.
    pub fn new(extensions: Arc<CapabilityRegistry>) -> Self {
        let variables = Arc::new(VariableStore::new());
        Self {
            cells: Mutex::new(Vec::new()),
            default_language: RwLock::new(None),
            metadata: RwLock::new(Metadata::new()),
            appearance: RwLock::new(Appearance::default()),
            kernels: KernelRegistry::new(variables.clone()),
            variables,
            extensions,
            callback: None,
        }
    }

    /// Build a notebook from a parsed document. Cells without ids get fresh
    /// ones.
    pub fn from_document(document: NotebookDocument, extensions: Arc<CapabilityRegistry>) -> Self {
        let scaffold = Self::new(extensions);
        *scaffold.lock_cells() = document
            .cells
            .into_iter()
            .map(DocumentCell::into_cell)
            .collect();
        scaffold.set_default_language(document.metadata.default_language);
        *scaffold.metadata.write().unwrap_or_else(PoisonError::into_inner) =
            document.metadata.extra;
        scaffold
    }

    /// Snapshot the notebook as a document.
    pub fn to_document(&self) -> NotebookDocument {
        NotebookDocument {
            metadata: NotebookMetadata {
                default_language: self.default_language(),
                extra: self
                    .metadata
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone(),
            },
            cells: self.lock_cells().iter().map(DocumentCell::from).collect(),
        }
    }

    /// Encode the notebook with a registered serializer.
    pub fn export(&self, format: &str) -> Result<Vec<u8>> {
        let serializer = self.extensions.find_serializer(format).ok_or_else(|| {
            Error::InvalidOperation(format!("no serializer for format '{format}'"))
        })?;
        serializer.serialize(&self.to_document())
    }

    /// Report execution progress to `callback`.
    pub fn with_callback(mut self, callback: Arc<dyn ExecutionCallback>) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn variables(&self) -> &Arc<VariableStore> {
        &self.variables
    }

    pub fn kernels(&self) -> &KernelRegistry {
        &self.kernels
    }

    pub fn extensions(&self) -> &Arc<CapabilityRegistry> {
        &self.extensions
    }

    /// Register a kernel directly on this notebook.
    pub fn register_kernel(&self, kernel: Arc<dyn Kernel>) -> Result<()> {
        self.kernels.register(kernel)
    }

    pub fn default_language(&self) -> Option<String> {
        self.default_language
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_default_language(&self, language: Option<String>) {
        *self
            .default_language
            .write()
            .unwrap_or_else(PoisonError::into_inner) =
            language.filter(|l| !l.trim().is_empty());
    }

    fn lock_cells(&self) -> MutexGuard<'_, Vec<Cell>> {
        self.cells.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_cell<T>(&self, cell_id: &CellId, f: impl FnOnce(&mut Cell) -> T) -> Result<T> {
        let mut cells = self.lock_cells();
        let cell = cells
            .iter_mut()
            .find(|c| &c.id == cell_id)
            .ok_or_else(|| Error::CellNotFound(cell_id.clone()))?;
        Ok(f(cell))
    }

    // =========================================================================
    // Cell operations
    // =========================================================================

    /// Append a cell.
    pub fn add_cell(&self, cell: NewCell) -> Cell {
        let cell = cell.into_cell(CellId::new());
        self.lock_cells().push(cell.clone());
        cell
    }

    /// Insert a cell at `index` (`0..=len`).
    pub fn insert_cell(&self, index: usize, cell: NewCell) -> Result<Cell> {
        let mut cells = self.lock_cells();
        if index > cells.len() {
            return Err(Error::IndexOutOfRange {
                index,
                len: cells.len(),
            });
        }
        let cell = cell.into_cell(CellId::new());
        cells.insert(index, cell.clone());
        Ok(cell)
    }

    pub fn remove_cell(&self, cell_id: &CellId) -> Result<Cell> {
        let mut cells = self.lock_cells();
        let pos = cells
            .iter()
            .position(|c| &c.id == cell_id)
            .ok_or_else(|| Error::CellNotFound(cell_id.clone()))?;
        Ok(cells.remove(pos))
    }

    /// Move a cell so it ends up at index `to` (`0..len`).
    pub fn move_cell(&self, cell_id: &CellId, to: usize) -> Result<()> {
        let mut cells = self.lock_cells();
        let from = cells
            .iter()
            .position(|c| &c.id == cell_id)
            .ok_or_else(|| Error::CellNotFound(cell_id.clone()))?;
        if to >= cells.len() {
            return Err(Error::IndexOutOfRange {
                index: to,
                len: cells.len(),
            });
        }
        let cell = cells.remove(from);
        cells.insert(to, cell);
        Ok(())
    }

    pub fn get_cell(&self, cell_id: &CellId) -> Result<Cell> {
        self.with_cell(cell_id, |c| c.clone())
    }

    /// All cells in list order.
    pub fn cells(&self) -> Vec<Cell> {
        self.lock_cells().clone()
    }

    pub fn cell_count(&self) -> usize {
        self.lock_cells().len()
    }

    pub fn update_source(&self, cell_id: &CellId, source: impl Into<String>) -> Result<()> {
        let source = source.into();
        self.with_cell(cell_id, |c| c.source = source)
    }

    /// Change a cell's kernel affinity. `None` falls back to the default.
    pub fn set_language(&self, cell_id: &CellId, language: Option<String>) -> Result<()> {
        let language = language.filter(|l| !l.trim().is_empty());
        self.with_cell(cell_id, |c| c.language = language)
    }

    pub fn clear_outputs(&self, cell_id: &CellId) -> Result<()> {
        self.with_cell(cell_id, |c| c.outputs.clear())
    }

    // =========================================================================
    // Execution
    // =========================================================================

    /// Language a cell executes as, `None` meaning the notebook default.
    ///
    /// Code cells use their own language. Registered cell types fall back to
    /// the language they declare; types without one are not executable.
    fn execution_language(&self, cell: &Cell) -> Result<Option<String>> {
        if cell.is_code() {
            return Ok(cell.language.clone());
        }
        let declared = self
            .extensions
            .find_cell_type(&cell.cell_type)
            .and_then(|t| t.language().map(str::to_string));
        match declared {
            Some(language) => Ok(cell.language.clone().or(Some(language))),
            None => Err(Error::NotExecutable {
                cell_id: cell.id.clone(),
                cell_type: cell.cell_type.clone(),
            }),
        }
    }

    /// Execute one cell.
    ///
    /// The execution counter is bumped before the kernel is resolved, so a
    /// `KernelNotFound` attempt still counts. Outputs of the run replace the
    /// cell's outputs.
    pub async fn execute(&self, cell_id: &CellId, abort: &AbortHandle) -> Result<ExecutionOutcome> {
        let request = {
            let mut cells = self.lock_cells();
            let cell = cells
                .iter_mut()
                .find(|c| &c.id == cell_id)
                .ok_or_else(|| Error::CellNotFound(cell_id.clone()))?;
            let language = self.execution_language(cell)?;
            cell.execution_count += 1;
            ExecutionRequest {
                cell_id: cell.id.clone(),
                language,
                source: cell.source.clone(),
                execution_count: cell.execution_count,
            }
        };

        let outcome = ExecutionPipeline::new(&self.kernels, &self.extensions, &self.variables)
            .with_default_language(self.default_language())
            .with_callback(self.callback.clone())
            .run(request, abort)
            .await?;

        if let Some(cell) = self.lock_cells().iter_mut().find(|c| &c.id == cell_id) {
            cell.outputs = outcome.outputs.clone();
        }
        Ok(outcome)
    }

    /// Execute every executable cell in list order.
    ///
    /// Stops after the first cancelled run. Cells removed while the run is
    /// in progress are skipped.
    pub async fn execute_all(&self, abort: &AbortHandle) -> Result<Vec<ExecutionOutcome>> {
        let ids: Vec<CellId> = self.lock_cells().iter().map(|c| c.id.clone()).collect();
        let mut outcomes = Vec::new();
        for id in ids {
            match self.execute(&id, abort).await {
                Ok(outcome) => {
                    let cancelled = outcome.is_cancelled();
                    outcomes.push(outcome);
                    if cancelled {
                        tracing::debug!("Execution cancelled at cell {}", id);
                        break;
                    }
                }
                Err(Error::NotExecutable { .. } | Error::CellNotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(outcomes)
    }

    /// Restart a kernel (the default language's if `None`).
    ///
    /// Clears the whole variable store. Returns the restarted language.
    pub async fn restart_kernel(&self, language: Option<&str>) -> Result<String> {
        let language = language
            .filter(|l| !l.trim().is_empty())
            .map(str::to_string)
            .or_else(|| self.default_language())
            .ok_or(Error::NoKernelConfigured)?;
        self.kernels.resolve(&language, &self.extensions)?;
        self.kernels.restart(&language).await?;
        Ok(language)
    }

    async fn query_target(&self, cell_id: &CellId) -> Result<(KernelHandle, String)> {
        let (language, source) = {
            let cells = self.lock_cells();
            let cell = cells
                .iter()
                .find(|c| &c.id == cell_id)
                .ok_or_else(|| Error::CellNotFound(cell_id.clone()))?;
            (self.execution_language(cell)?, cell.source.clone())
        };
        let language = language
            .or_else(|| self.default_language())
            .ok_or(Error::NoKernelConfigured)?;
        let kernel = self.kernels.resolve(&language, &self.extensions)?;
        kernel.ensure_initialized().await?;
        Ok((kernel, source))
    }

    /// Completion candidates at `cursor` in a cell.
    pub async fn complete(&self, cell_id: &CellId, cursor: usize) -> Result<Vec<Completion>> {
        let (kernel, source) = self.query_target(cell_id).await?;
        kernel.kernel().complete(&source, cursor).await
    }

    pub async fn hover(&self, cell_id: &CellId, cursor: usize) -> Result<Option<String>> {
        let (kernel, source) = self.query_target(cell_id).await?;
        kernel.kernel().hover(&source, cursor).await
    }

    pub async fn diagnose(&self, cell_id: &CellId) -> Result<Vec<Diagnostic>> {
        let (kernel, source) = self.query_target(cell_id).await?;
        kernel.kernel().diagnose(&source).await
    }

    /// Rewrite a cell's source with the formatter for its language.
    pub fn format_cell(&self, cell_id: &CellId) -> Result<Cell> {
        let (language, source) = {
            let cells = self.lock_cells();
            let cell = cells
                .iter()
                .find(|c| &c.id == cell_id)
                .ok_or_else(|| Error::CellNotFound(cell_id.clone()))?;
            (self.execution_language(cell)?, cell.source.clone())
        };
        let language = language
            .or_else(|| self.default_language())
            .ok_or(Error::NoKernelConfigured)?;
        let formatter = self.extensions.find_formatter(&language).ok_or_else(|| {
            Error::InvalidOperation(format!("no formatter for language '{language}'"))
        })?;
        let formatted = formatter.format(&source)?;
        self.with_cell(cell_id, |c| {
            c.source = formatted;
            c.clone()
        })
    }

    // =========================================================================
    // Appearance
    // =========================================================================

    pub fn appearance(&self) -> Appearance {
        self.appearance
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Select a theme by id; `None` restores the front-end default.
    pub fn set_theme(&self, theme: Option<&str>) -> Result<()> {
        let theme = match theme {
            Some(id) => Some(
                self.extensions
                    .find_theme(id)
                    .ok_or_else(|| Error::InvalidOperation(format!("no theme named '{id}'")))?
                    .id()
                    .to_string(),
            ),
            None => None,
        };
        self.appearance
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .theme = theme;
        Ok(())
    }

    /// Select a layout by id; `None` restores the front-end default.
    pub fn set_layout(&self, layout: Option<&str>) -> Result<()> {
        let layout = match layout {
            Some(id) => Some(
                self.extensions
                    .find_layout(id)
                    .ok_or_else(|| Error::InvalidOperation(format!("no layout named '{id}'")))?
                    .id()
                    .to_string(),
            ),
            None => None,
        };
        self.appearance
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .layout = layout;
        Ok(())
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Drop everything this notebook adopted from an extension that is
    /// being unloaded.
    pub async fn evict_extension(&self, extension_id: &str) {
        let evicted = self.kernels.evict_extension(extension_id).await;
        if evicted > 0 {
            tracing::debug!("Evicted {} kernel(s) from '{}'", evicted, extension_id);
        }
        let mut appearance = self.appearance.write().unwrap_or_else(PoisonError::into_inner);
        if appearance
            .theme
            .as_deref()
            .is_some_and(|t| self.extensions.find_theme(t).is_none())
        {
            appearance.theme = None;
        }
        if appearance
            .layout
            .as_deref()
            .is_some_and(|l| self.extensions.find_layout(l).is_none())
        {
            appearance.layout = None;
        }
    }

    /// Shut down every kernel.
    pub async fn shutdown(&self) {
        self.kernels.shutdown_all().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scaffold() -> Scaffold {
        Scaffold::new(Arc::new(CapabilityRegistry::new()))
    }

    fn sources(s: &Scaffold) -> Vec<String> {
        s.cells().into_iter().map(|c| c.source).collect()
    }

    #[test]
    fn test_insert_and_move() {
        let s = scaffold();
        let a = s.add_cell(NewCell::code("a"));
        s.add_cell(NewCell::code("c"));
        s.insert_cell(1, NewCell::code("b")).unwrap();
        assert_eq!(sources(&s), ["a", "b", "c"]);

        s.move_cell(&a.id, 2).unwrap();
        assert_eq!(sources(&s), ["b", "c", "a"]);
    }

    #[test]
    fn test_out_of_range_is_not_clamped() {
        let s = scaffold();
        let a = s.add_cell(NewCell::code("a"));
        assert!(matches!(
            s.insert_cell(5, NewCell::code("x")),
            Err(Error::IndexOutOfRange { index: 5, len: 1 })
        ));
        assert!(matches!(
            s.move_cell(&a.id, 1),
            Err(Error::IndexOutOfRange { index: 1, len: 1 })
        ));
        assert_eq!(sources(&s), ["a"]);
    }

    #[test]
    fn test_update_and_remove() {
        let s = scaffold();
        let a = s.add_cell(NewCell::code("a"));
        s.update_source(&a.id, "a2").unwrap();
        s.set_language(&a.id, Some("calc".into())).unwrap();
        let cell = s.get_cell(&a.id).unwrap();
        assert_eq!(cell.source, "a2");
        assert_eq!(cell.language.as_deref(), Some("calc"));

        s.remove_cell(&a.id).unwrap();
        assert!(matches!(s.get_cell(&a.id), Err(Error::CellNotFound(_))));
    }

    #[test]
    fn test_document_round_trip_keeps_ids_and_metadata() {
        let doc = NotebookDocument::from_json(
            r#"{"metadata":{"default_language":"calc","title":"t"},"cells":[{"id":"c1","source":"1"}]}"#,
        )
        .unwrap();
        let s = Scaffold::from_document(doc.clone(), Arc::new(CapabilityRegistry::new()));
        assert_eq!(s.default_language().as_deref(), Some("calc"));
        assert_eq!(s.to_document(), doc);
    }

    #[tokio::test]
    async fn test_markdown_is_not_executable() {
        let s = scaffold();
        let md = s.add_cell(NewCell::markdown("# hi"));
        let err = s.execute(&md.id, &AbortHandle::new()).await.unwrap_err();
        assert!(matches!(err, Error::NotExecutable { .. }));
        assert_eq!(s.get_cell(&md.id).unwrap().execution_count, 0);
    }

    #[test]
    fn test_unknown_theme_rejected() {
        let s = scaffold();
        assert!(matches!(
            s.set_theme(Some("solarized")),
            Err(Error::InvalidOperation(_))
        ));
        s.set_theme(None).unwrap();
        assert_eq!(s.appearance(), Appearance::default());
    }
}
