//! One open notebook and its runtime.
//!
//! A session owns a [`Scaffold`] and its own [`CapabilityRegistry`], so no
//! state crosses sessions even when they load the same extensions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::{Value, json};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use aster_core::{
    AbortHandle, CapabilityRegistry, CellId, CellOutput, ExecutionCallback, ExecutionOutcome,
    ExtensionCatalog, NotebookDocument, Scaffold,
};

use crate::error::{ServerError, ServerResult};
use crate::protocol::{
    AddCellParams, AppearanceParams, CellParams, CursorParams, ExportParams, ExtensionParams,
    InsertCellParams, LanguageParams, MoveCellParams, Notification, SessionId, SetLanguageParams,
    SetVariableParams, UpdateSourceParams, VariableParams, methods, notifications, parse_params,
};

/// Per-session settings derived from the server configuration.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// Default language for notebooks that do not name one.
    pub default_language: Option<String>,
}

/// Initial notebook content.
#[derive(Debug, Clone)]
pub enum SessionContent {
    Document(NotebookDocument),
    /// Bytes to decode with the session's serializer for `format`.
    Encoded { format: String, bytes: Vec<u8> },
}

/// Publishes session-tagged notifications.
pub struct SessionNotifier {
    session_id: SessionId,
    tx: broadcast::Sender<Notification>,
}

impl SessionNotifier {
    pub fn emit(&self, method: &str, params: Value) {
        let _ = self.tx.send(Notification {
            method: method.to_string(),
            session_id: Some(self.session_id.clone()),
            params,
        });
    }
}

impl ExecutionCallback for SessionNotifier {
    fn on_cell_started(&self, cell_id: &CellId, execution_count: u64) {
        self.emit(
            notifications::EXECUTION_STARTED,
            json!({ "cell_id": cell_id, "execution_count": execution_count }),
        );
    }

    fn on_output(&self, cell_id: &CellId, output: &CellOutput) {
        self.emit(
            notifications::EXECUTION_OUTPUT,
            json!({ "cell_id": cell_id, "output": output }),
        );
    }

    fn on_display_updated(&self, cell_id: &CellId, display_id: &str, output: &CellOutput) {
        self.emit(
            notifications::EXECUTION_DISPLAY_UPDATED,
            json!({ "cell_id": cell_id, "display_id": display_id, "output": output }),
        );
    }

    fn on_cell_finished(&self, cell_id: &CellId, outcome: &ExecutionOutcome) {
        self.emit(
            notifications::EXECUTION_FINISHED,
            json!({
                "cell_id": cell_id,
                "status": outcome.status,
                "execution_count": outcome.execution_count,
                "duration_ms": u64::try_from(outcome.duration.as_millis()).unwrap_or(u64::MAX),
                "error": outcome.error,
            }),
        );
    }
}

/// An open notebook.
pub struct NotebookSession {
    id: SessionId,
    scaffold: Scaffold,
    extensions: Arc<CapabilityRegistry>,
    notifier: Arc<SessionNotifier>,
    /// Parent of every execution token; cancelled on close.
    root: AbortHandle,
    /// Token of the most recent execution request.
    current: Mutex<AbortHandle>,
    forwarder: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl NotebookSession {
    /// Open a session: fresh registry, catalog loaded, notebook built.
    pub async fn open(
        config: &SessionConfig,
        catalog: &ExtensionCatalog,
        content: Option<SessionContent>,
        tx: broadcast::Sender<Notification>,
    ) -> ServerResult<Self> {
        let id = uuid::Uuid::new_v4().to_string();
        let extensions = Arc::new(CapabilityRegistry::new());
        let loaded = extensions.load_catalog(catalog).await;
        tracing::debug!("Session {} loaded {} extension(s)", id, loaded.len());

        let document = match content {
            None => None,
            Some(SessionContent::Document(doc)) => Some(doc),
            Some(SessionContent::Encoded { format, bytes }) => {
                let decoded = match extensions.find_serializer(&format) {
                    Some(serializer) => serializer.deserialize(&bytes).map_err(ServerError::from),
                    None => Err(ServerError::InvalidParams(format!(
                        "no serializer for format '{format}'"
                    ))),
                };
                match decoded {
                    Ok(doc) => Some(doc),
                    Err(e) => {
                        extensions.unload_all().await;
                        return Err(e);
                    }
                }
            }
        };

        let notifier = Arc::new(SessionNotifier {
            session_id: id.clone(),
            tx,
        });
        let scaffold = match document {
            Some(doc) => Scaffold::from_document(doc, extensions.clone()),
            None => Scaffold::new(extensions.clone()),
        }
        .with_callback(notifier.clone());
        if scaffold.default_language().is_none() {
            scaffold.set_default_language(config.default_language.clone());
        }

        let root = AbortHandle::new();
        let forwarder = spawn_variable_forwarder(&scaffold, notifier.clone(), root.clone());

        Ok(Self {
            id,
            scaffold,
            extensions,
            notifier,
            current: Mutex::new(root.child()),
            root,
            forwarder: Mutex::new(Some(forwarder)),
            closed: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn scaffold(&self) -> &Scaffold {
        &self.scaffold
    }

    pub fn extensions(&self) -> &Arc<CapabilityRegistry> {
        &self.extensions
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Replace the session's cancellation source with a fresh one.
    ///
    /// The previous token is dropped, not triggered.
    pub fn begin_execution(&self) -> AbortHandle {
        let handle = self.root.child();
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = handle.clone();
        handle
    }

    /// Trigger the most recent execution's cancellation source.
    pub fn cancel(&self) {
        tracing::debug!("Cancelling execution in session {}", self.id);
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .abort();
    }

    /// Tear the session down.
    ///
    /// In-flight executions observe cancellation. Safe to call while they
    /// run, and more than once.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.root.abort();
        self.scaffold.shutdown().await;
        self.extensions.unload_all().await;
        let forwarder = self
            .forwarder
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = forwarder {
            task.abort();
        }
        self.notifier
            .emit(notifications::SESSION_CLOSED, json!({ "session_id": self.id }));
        tracing::info!("Closed session {}", self.id);
    }

    /// Route a session-scoped method.
    pub async fn handle(&self, method: &str, params: Value) -> ServerResult<Value> {
        if self.is_closed() {
            return self.handle_closed(method, params);
        }
        let scaffold = &self.scaffold;
        let result = match method {
            methods::NOTEBOOK_GET => json!({
                "session_id": self.id,
                "document": scaffold.to_document(),
                "appearance": scaffold.appearance(),
            }),
            methods::NOTEBOOK_SET_DEFAULT_LANGUAGE => {
                let p: LanguageParams = parse_params(params)?;
                scaffold.set_default_language(p.language);
                json!({ "default_language": scaffold.default_language() })
            }
            methods::NOTEBOOK_EXPORT => {
                let p: ExportParams = parse_params(params)?;
                let bytes = scaffold.export(&p.format)?;
                json!({
                    "format": p.format,
                    "content": String::from_utf8_lossy(&bytes),
                })
            }
            methods::CELLS_LIST => serde_json::to_value(scaffold.cells())?,
            methods::CELLS_GET => {
                let p: CellParams = parse_params(params)?;
                serde_json::to_value(scaffold.get_cell(&p.cell_id)?)?
            }
            methods::CELLS_ADD => {
                let p: AddCellParams = parse_params(params)?;
                serde_json::to_value(scaffold.add_cell(p.cell))?
            }
            methods::CELLS_INSERT => {
                let p: InsertCellParams = parse_params(params)?;
                serde_json::to_value(scaffold.insert_cell(p.index, p.cell)?)?
            }
            methods::CELLS_REMOVE => {
                let p: CellParams = parse_params(params)?;
                serde_json::to_value(scaffold.remove_cell(&p.cell_id)?)?
            }
            methods::CELLS_MOVE => {
                let p: MoveCellParams = parse_params(params)?;
                scaffold.move_cell(&p.cell_id, p.to)?;
                Value::Null
            }
            methods::CELLS_UPDATE_SOURCE => {
                let p: UpdateSourceParams = parse_params(params)?;
                scaffold.update_source(&p.cell_id, p.source)?;
                Value::Null
            }
            methods::CELLS_SET_LANGUAGE => {
                let p: SetLanguageParams = parse_params(params)?;
                scaffold.set_language(&p.cell_id, p.language)?;
                Value::Null
            }
            methods::CELLS_CLEAR_OUTPUTS => {
                let p: CellParams = parse_params(params)?;
                scaffold.clear_outputs(&p.cell_id)?;
                Value::Null
            }
            methods::CELLS_FORMAT => {
                let p: CellParams = parse_params(params)?;
                serde_json::to_value(scaffold.format_cell(&p.cell_id)?)?
            }
            methods::CELLS_EXECUTE => {
                let p: CellParams = parse_params(params)?;
                let abort = self.begin_execution();
                serde_json::to_value(scaffold.execute(&p.cell_id, &abort).await?)?
            }
            methods::NOTEBOOK_EXECUTE_ALL => {
                let abort = self.begin_execution();
                serde_json::to_value(scaffold.execute_all(&abort).await?)?
            }
            methods::EXECUTION_CANCEL => {
                self.cancel();
                json!({ "cancelled": true })
            }
            methods::KERNEL_RESTART => {
                let p: LanguageParams = parse_params(params)?;
                let language = scaffold.restart_kernel(p.language.as_deref()).await?;
                self.notifier
                    .emit(notifications::KERNEL_RESTARTED, json!({ "language": language }));
                json!({ "language": language })
            }
            methods::KERNEL_LIST => serde_json::to_value(scaffold.kernels().list())?,
            methods::KERNEL_COMPLETE => {
                let p: CursorParams = parse_params(params)?;
                serde_json::to_value(scaffold.complete(&p.cell_id, p.cursor).await?)?
            }
            methods::KERNEL_HOVER => {
                let p: CursorParams = parse_params(params)?;
                let contents = scaffold.hover(&p.cell_id, p.cursor).await?;
                json!({ "contents": contents })
            }
            methods::KERNEL_DIAGNOSTICS => {
                let p: CellParams = parse_params(params)?;
                serde_json::to_value(scaffold.diagnose(&p.cell_id).await?)?
            }
            methods::VARIABLES_LIST => {
                let mut variables = scaffold.variables().snapshot();
                variables.sort_by(|a, b| a.name.cmp(&b.name));
                serde_json::to_value(variables)?
            }
            methods::VARIABLES_GET => {
                let p: VariableParams = parse_params(params)?;
                serde_json::to_value(scaffold.variables().get_variable(&p.name))?
            }
            methods::VARIABLES_SET => {
                let p: SetVariableParams = parse_params(params)?;
                scaffold.variables().set(p.name, p.value);
                Value::Null
            }
            methods::EXTENSIONS_LIST => serde_json::to_value(self.extensions.list())?,
            methods::EXTENSIONS_ENABLE => {
                let p: ExtensionParams = parse_params(params)?;
                serde_json::to_value(self.extensions.enable(&p.id)?)?
            }
            methods::EXTENSIONS_DISABLE => {
                let p: ExtensionParams = parse_params(params)?;
                serde_json::to_value(self.extensions.disable(&p.id)?)?
            }
            methods::EXTENSIONS_UNLOAD => {
                let p: ExtensionParams = parse_params(params)?;
                let descriptor = self.extensions.unload(&p.id).await?;
                scaffold.evict_extension(&descriptor.id).await;
                serde_json::to_value(descriptor)?
            }
            methods::APPEARANCE_SET_THEME => {
                let p: AppearanceParams = parse_params(params)?;
                scaffold.set_theme(p.id.as_deref())?;
                serde_json::to_value(scaffold.appearance())?
            }
            methods::APPEARANCE_SET_LAYOUT => {
                let p: AppearanceParams = parse_params(params)?;
                scaffold.set_layout(p.id.as_deref())?;
                serde_json::to_value(scaffold.appearance())?
            }
            other => return Err(ServerError::MethodNotFound(other.to_string())),
        };
        Ok(result)
    }

    /// Requests that raced `close`: executions report cancellation, the rest
    /// see a missing session.
    fn handle_closed(&self, method: &str, params: Value) -> ServerResult<Value> {
        tracing::debug!("Session {} is closed; rejecting '{}'", self.id, method);
        match method {
            methods::CELLS_EXECUTE => {
                let p: CellParams = parse_params(params)?;
                Ok(serde_json::to_value(ExecutionOutcome::cancelled(p.cell_id))?)
            }
            methods::NOTEBOOK_EXECUTE_ALL => Ok(json!([])),
            _ => Err(ServerError::SessionNotFound(self.id.clone())),
        }
    }
}

/// Forward variable store changes as `variables/changed` until the session
/// root token is cancelled.
fn spawn_variable_forwarder(
    scaffold: &Scaffold,
    notifier: Arc<SessionNotifier>,
    root: AbortHandle,
) -> JoinHandle<()> {
    let mut rx = scaffold.variables().subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = root.aborted() => break,
                change = rx.recv() => match change {
                    Ok(change) => notifier.emit(
                        notifications::VARIABLES_CHANGED,
                        serde_json::to_value(change).unwrap_or(Value::Null),
                    ),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::debug!("Variable forwarder lagged by {} changes", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    })
}
