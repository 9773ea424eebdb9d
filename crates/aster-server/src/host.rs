//! Multi-session host.
//!
//! Owns every open [`NotebookSession`] and routes requests to them. All
//! sessions share one notification channel; each notification carries its
//! session id so transports can filter.

use std::sync::{Arc, PoisonError, RwLock};

use rustc_hash::FxHashMap;
use serde_json::{Value, json};
use tokio::sync::broadcast;

use aster_core::ExtensionCatalog;

use crate::error::{ServerError, ServerResult};
use crate::protocol::{
    Notification, OpenSessionParams, Request, Response, SessionId, default_format, methods,
    parse_params,
};
use crate::session::{NotebookSession, SessionConfig, SessionContent};

#[derive(serde::Deserialize, Default)]
struct CloseParams {
    #[serde(default)]
    session_id: Option<SessionId>,
}

/// Registry of open sessions.
pub struct SessionHost {
    sessions: RwLock<FxHashMap<SessionId, Arc<NotebookSession>>>,
    catalog: ExtensionCatalog,
    config: SessionConfig,
    tx: broadcast::Sender<Notification>,
}

impl SessionHost {
    /// Create a host that loads `catalog` into every new session.
    pub fn new(catalog: ExtensionCatalog, config: SessionConfig, capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            sessions: RwLock::new(FxHashMap::default()),
            catalog,
            config,
            tx,
        }
    }

    /// Subscribe to notifications from every session.
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    pub fn catalog(&self) -> &ExtensionCatalog {
        &self.catalog
    }

    /// Open a new session and return its id.
    pub async fn open_session(&self, content: Option<SessionContent>) -> ServerResult<SessionId> {
        let session =
            NotebookSession::open(&self.config, &self.catalog, content, self.tx.clone()).await?;
        let id = session.id().to_string();
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), Arc::new(session));
        tracing::info!("Opened session {}", id);
        Ok(id)
    }

    /// Close a session. In-flight requests against it observe cancellation.
    pub async fn close_session(&self, id: &str) -> ServerResult<()> {
        let session = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
            .ok_or_else(|| ServerError::SessionNotFound(id.to_string()))?;
        session.close().await;
        Ok(())
    }

    /// Look up an open session.
    pub fn session(&self, id: &str) -> ServerResult<Arc<NotebookSession>> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .ok_or_else(|| ServerError::SessionNotFound(id.to_string()))
    }

    /// Ids of open sessions, sorted.
    pub fn session_ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<_> = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close every session.
    pub async fn shutdown(&self) {
        let drained: Vec<_> = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, s)| s)
            .collect();
        for session in drained {
            session.close().await;
        }
    }

    /// Answer one request. Never fails; errors become error responses.
    pub async fn dispatch(&self, request: Request) -> Response {
        tracing::debug!("Dispatching {} (id {})", request.method, request.id);
        let id = request.id.clone();
        let method = request.method.clone();
        match self.route(request).await {
            Ok(result) => Response::ok(id, result),
            Err(e) => {
                tracing::debug!("Request {} failed: {}", method, e);
                Response::err(id, e.to_response_error())
            }
        }
    }

    async fn route(&self, request: Request) -> ServerResult<Value> {
        let Request {
            method,
            session_id,
            params,
            ..
        } = request;

        match method.as_str() {
            methods::SESSION_OPEN => {
                let p: OpenSessionParams = parse_params(params)?;
                let content = match (p.document, p.content) {
                    (Some(doc), _) => Some(SessionContent::Document(doc)),
                    (None, Some(text)) => Some(SessionContent::Encoded {
                        format: p.format.unwrap_or_else(default_format),
                        bytes: text.into_bytes(),
                    }),
                    (None, None) => None,
                };
                let id = self.open_session(content).await?;
                Ok(json!({ "session_id": id }))
            }
            methods::SESSION_CLOSE => {
                let p: CloseParams = parse_params(params)?;
                let id = session_id
                    .or(p.session_id)
                    .ok_or_else(|| ServerError::MissingSessionId(method.clone()))?;
                self.close_session(&id).await?;
                Ok(json!({ "session_id": id }))
            }
            methods::SESSION_LIST => Ok(json!({ "sessions": self.session_ids() })),
            methods::HOST_INFO => {
                let extensions: Vec<_> = self
                    .catalog
                    .describe()
                    .into_iter()
                    .map(|(manifest, capabilities)| {
                        json!({ "manifest": manifest, "capabilities": capabilities })
                    })
                    .collect();
                Ok(json!({
                    "name": "aster",
                    "version": env!("CARGO_PKG_VERSION"),
                    "sessions": self.len(),
                    "extensions": extensions,
                }))
            }
            _ => {
                let id = session_id.ok_or_else(|| ServerError::MissingSessionId(method.clone()))?;
                let session = self.session(&id)?;
                session.handle(&method, params).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::codes;

    #[tokio::test]
    async fn test_open_list_close() {
        let host = SessionHost::new(ExtensionCatalog::new(), SessionConfig::default(), 16);
        let id = host.open_session(None).await.unwrap();
        assert_eq!(host.session_ids(), vec![id.clone()]);

        host.close_session(&id).await.unwrap();
        assert!(host.is_empty());
        assert!(matches!(
            host.close_session(&id).await,
            Err(ServerError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_session_scoped_method_without_id() {
        let host = SessionHost::new(ExtensionCatalog::new(), SessionConfig::default(), 16);
        let resp = host.dispatch(Request::new(7, methods::CELLS_LIST)).await;
        assert_eq!(resp.id, json!(7));
        assert_eq!(resp.error.unwrap().code, codes::INVALID_PARAMS);
    }
}
