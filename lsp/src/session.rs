//! Language session: one server process, its transport, its documents.
//!
//! The lifecycle is a single tagged enum behind a short-lived lock. Only a
//! `Ready` state carries a live [`Connection`]; every other state is plain
//! data, so a failed or stopped session can always be started again.
//! Startup and shutdown are serialized by `start_gate`, an async mutex held
//! across the handshake; the lifecycle lock itself is never held across an
//! await.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde_json::{Value, json};
use tokio::process::Child;
use tokio::sync::oneshot;

use crate::config::{ServerConfig, Timeouts};
use crate::diagnostics::DiagnosticsSender;
use crate::documents::DocumentRegistry;
use crate::error::LspError;
use crate::launcher::{Launcher, ServerIo};
use crate::pending::CloseReason;
use crate::protocol::{self, error_codes};
use crate::responses;
use crate::transport::Transport;
use crate::types::{CompletionItem, DocumentSymbol, Hover, Location, SessionState, WorkspaceEdit};

enum Lifecycle {
    NotStarted,
    Starting,
    AwaitingInitializeResponse,
    Ready(Arc<Connection>),
    ShuttingDown,
    Stopped,
    StartFailed(String),
    Crashed(String),
}

/// Providers the server declared in its initialize result.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct ServerCapabilities {
    document_symbol: bool,
    hover: bool,
    definition: bool,
    references: bool,
    rename: bool,
    completion: bool,
}

impl ServerCapabilities {
    /// A provider counts as present unless it is missing, `null` or `false`.
    fn from_initialize_result(result: &Value) -> Self {
        let caps = result.get("capabilities");
        let has = |key: &str| {
            caps.and_then(|c| c.get(key))
                .is_some_and(|v| !v.is_null() && *v != Value::Bool(false))
        };
        Self {
            document_symbol: has("documentSymbolProvider"),
            hover: has("hoverProvider"),
            definition: has("definitionProvider"),
            references: has("referencesProvider"),
            rename: has("renameProvider"),
            completion: has("completionProvider"),
        }
    }
}

struct Connection {
    transport: Transport,
    child: Mutex<Option<Child>>,
    capabilities: ServerCapabilities,
    documents: Mutex<DocumentRegistry>,
}

impl Connection {
    fn documents(&self) -> MutexGuard<'_, DocumentRegistry> {
        self.documents.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A query target: a live connection plus the document's URI.
struct Target {
    conn: Arc<Connection>,
    uri: String,
}

pub(crate) struct LanguageSession {
    language: String,
    config: ServerConfig,
    timeouts: Timeouts,
    workspace_root: PathBuf,
    root_uri: String,
    launcher: Arc<dyn Launcher>,
    diagnostics: DiagnosticsSender,
    lifecycle: Mutex<Lifecycle>,
    start_gate: tokio::sync::Mutex<()>,
}

impl LanguageSession {
    pub fn new(
        language: &str,
        config: ServerConfig,
        timeouts: Timeouts,
        workspace_root: &Path,
        launcher: Arc<dyn Launcher>,
        diagnostics: DiagnosticsSender,
    ) -> Result<Self, LspError> {
        let root_uri = protocol::path_to_file_uri(workspace_root)
            .ok_or_else(|| LspError::InvalidPath {
                path: workspace_root.to_path_buf(),
            })?
            .into();
        Ok(Self {
            language: language.to_string(),
            config,
            timeouts,
            workspace_root: workspace_root.to_path_buf(),
            root_uri,
            launcher,
            diagnostics,
            lifecycle: Mutex::new(Lifecycle::NotStarted),
            start_gate: tokio::sync::Mutex::new(()),
        })
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set(&self, next: Lifecycle) {
        *self.lifecycle() = next;
    }

    pub fn state(&self) -> SessionState {
        match &*self.lifecycle() {
            Lifecycle::NotStarted => SessionState::NotStarted,
            Lifecycle::Starting => SessionState::Starting,
            Lifecycle::AwaitingInitializeResponse => SessionState::AwaitingInitializeResponse,
            Lifecycle::Ready(conn) => match conn.transport.close_reason() {
                None => SessionState::Ready,
                Some(reason) => SessionState::Crashed {
                    reason: reason.to_error(&self.language).to_string(),
                },
            },
            Lifecycle::ShuttingDown => SessionState::ShuttingDown,
            Lifecycle::Stopped => SessionState::Stopped,
            Lifecycle::StartFailed(reason) => SessionState::StartFailed {
                reason: reason.clone(),
            },
            Lifecycle::Crashed(reason) => SessionState::Crashed {
                reason: reason.clone(),
            },
        }
    }

    /// The serving connection, if there is one. A `Ready` session whose
    /// transport has closed is moved to `Crashed` here.
    fn live_connection(&self) -> Option<Arc<Connection>> {
        let mut lifecycle = self.lifecycle();
        let Lifecycle::Ready(conn) = &*lifecycle else {
            return None;
        };
        let Some(reason) = conn.transport.close_reason() else {
            return Some(conn.clone());
        };
        let reason = reason.to_error(&self.language).to_string();
        tracing::warn!(language = %self.language, "Language server crashed: {reason}");
        *lifecycle = Lifecycle::Crashed(reason);
        None
    }

    /// Return the serving connection, starting the server if needed.
    async fn ensure_ready(&self) -> Result<Arc<Connection>, LspError> {
        if let Some(conn) = self.live_connection() {
            return Ok(conn);
        }
        let _gate = self.start_gate.lock().await;
        // Another caller may have finished starting it while we waited.
        if let Some(conn) = self.live_connection() {
            return Ok(conn);
        }
        self.start().await
    }

    async fn start(&self) -> Result<Arc<Connection>, LspError> {
        self.set(Lifecycle::Starting);
        tracing::info!(
            language = %self.language,
            command = %self.config.command(),
            "Starting language server"
        );

        let ServerIo {
            reader,
            writer,
            child,
        } = match self
            .launcher
            .launch(&self.language, &self.config, &self.workspace_root)
        {
            Ok(io) => io,
            Err(e) => {
                tracing::warn!(language = %self.language, "Language server failed to start: {e}");
                self.set(Lifecycle::StartFailed(e.to_string()));
                return Err(e);
            }
        };

        let mut transport = Transport::start(
            &self.language,
            reader,
            writer,
            self.diagnostics.clone(),
            self.timeouts.request(),
        );
        self.set(Lifecycle::AwaitingInitializeResponse);

        let capabilities = match self.handshake(&transport).await {
            Ok(caps) => caps,
            Err(e) => {
                let reason = format!("initialize failed: {e}");
                tracing::warn!(language = %self.language, "{reason}");
                transport.close();
                if let Some(mut child) = child {
                    let _ = child.start_kill();
                }
                self.set(Lifecycle::StartFailed(reason.clone()));
                return Err(LspError::StartFailed {
                    language: self.language.clone(),
                    reason,
                });
            }
        };

        let lost = transport.take_connection_lost();
        let conn = Arc::new(Connection {
            transport,
            child: Mutex::new(child),
            capabilities,
            documents: Mutex::new(DocumentRegistry::new()),
        });
        if let Some(lost) = lost {
            tokio::spawn(reap_lost_server(
                self.language.clone(),
                Arc::downgrade(&conn),
                lost,
            ));
        }
        self.set(Lifecycle::Ready(conn.clone()));
        tracing::info!(language = %self.language, "Language server ready");
        Ok(conn)
    }

    async fn handshake(&self, transport: &Transport) -> Result<ServerCapabilities, LspError> {
        let result = transport
            .call_with_timeout(
                "initialize",
                Some(protocol::initialize_params(&self.root_uri)),
                self.timeouts.initialize(),
            )
            .await?;
        transport.notify("initialized", Some(json!({})))?;
        Ok(ServerCapabilities::from_initialize_result(&result))
    }

    /// Tear the session down. It ends `NotStarted` when `restartable`
    /// (reload), `Stopped` otherwise; either way the next use starts it.
    pub async fn shutdown(&self, restartable: bool) {
        let _gate = self.start_gate.lock().await;
        let previous = std::mem::replace(&mut *self.lifecycle(), Lifecycle::ShuttingDown);
        if let Lifecycle::Ready(conn) = previous {
            tracing::info!(language = %self.language, "Shutting down language server");
            self.stop_connection(&conn).await;
        }
        self.set(if restartable {
            Lifecycle::NotStarted
        } else {
            Lifecycle::Stopped
        });
    }

    async fn stop_connection(&self, conn: &Connection) {
        let limit = self.timeouts.shutdown();
        if !conn.transport.is_closed() {
            match conn.transport.call_with_timeout("shutdown", None, limit).await {
                Ok(_) => {
                    let _ = conn.transport.notify("exit", None);
                }
                Err(e) => {
                    tracing::debug!(language = %self.language, "shutdown request failed: {e}");
                }
            }
        }
        conn.transport.close();

        let child = conn
            .child
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(mut child) = child else { return };
        match tokio::time::timeout(limit, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(language = %self.language, %status, "Language server exited");
            }
            Ok(Err(e)) => {
                tracing::warn!(language = %self.language, "Waiting for language server: {e}");
            }
            Err(_) => {
                tracing::warn!(language = %self.language, "Language server ignored exit, killing");
                let _ = child.kill().await;
            }
        }
    }

    fn uri_for(path: &Path) -> Result<String, LspError> {
        protocol::path_to_file_uri(path)
            .map(String::from)
            .ok_or_else(|| LspError::InvalidPath {
                path: path.to_path_buf(),
            })
    }

    pub async fn open(&self, path: &Path, text: &str) -> Result<(), LspError> {
        let uri = Self::uri_for(path)?;
        let conn = self.ensure_ready().await?;
        let mut docs = conn.documents();
        let sync = docs.open(path, &uri, self.config.language_id(), text);
        // Sent under the registry lock so versions leave in order.
        conn.transport.notify(sync.method, Some(sync.params))
    }

    /// Close `path` if open. Never starts the server.
    pub fn close(&self, path: &Path) {
        let Some(conn) = self.live_connection() else {
            return;
        };
        let mut docs = conn.documents();
        if let Some(sync) = docs.close(path) {
            let _ = conn.transport.notify(sync.method, Some(sync.params));
        }
    }

    pub fn change(&self, path: &Path, text: &str) -> Result<(), LspError> {
        let not_open = || LspError::DocumentNotOpen {
            path: path.to_path_buf(),
        };
        let conn = self.live_connection().ok_or_else(not_open)?;
        let mut docs = conn.documents();
        let sync = docs.change(path, text).ok_or_else(not_open)?;
        conn.transport.notify(sync.method, Some(sync.params))
    }

    /// Resolve the connection and make sure `path` is open on it, reading
    /// the file from disk if the caller never opened it. `None` when the
    /// position lies outside the document.
    async fn target(&self, path: &Path, position: Option<(u32, u32)>) -> Result<Option<Target>, LspError> {
        let conn = self.ensure_ready().await?;

        let opened = conn.documents().get(path).map(|doc| doc.uri().to_string());
        let uri = match opened {
            Some(uri) => uri,
            None => {
                let uri = Self::uri_for(path)?;
                let bytes = tokio::fs::read(path)
                    .await
                    .map_err(|source| LspError::ReadFile {
                        path: path.to_path_buf(),
                        source,
                    })?;
                let text = String::from_utf8_lossy(&bytes);
                let mut docs = conn.documents();
                // A concurrent caller may have opened it during the read.
                if docs.get(path).is_none() {
                    tracing::debug!(language = %self.language, path = %path.display(), "Opening document from disk");
                    let sync = docs.open(path, &uri, self.config.language_id(), &text);
                    conn.transport.notify(sync.method, Some(sync.params))?;
                }
                uri
            }
        };

        if let Some((line, character)) = position {
            let in_range = conn
                .documents()
                .get(path)
                .is_some_and(|doc| doc.contains_position(line, character));
            if !in_range {
                tracing::debug!(language = %self.language, line, character, "Position outside document");
                return Ok(None);
            }
        }
        Ok(Some(Target { conn, uri }))
    }

    /// Issue a request, treating "unsupported" style error replies as an
    /// empty (`null`) result.
    async fn request(&self, conn: &Connection, method: &str, params: Value) -> Result<Value, LspError> {
        match conn.transport.call(method, Some(params)).await {
            Err(LspError::Server { code, message, .. })
                if matches!(
                    code,
                    error_codes::METHOD_NOT_FOUND
                        | error_codes::REQUEST_CANCELLED
                        | error_codes::CONTENT_MODIFIED
                ) =>
            {
                tracing::debug!(language = %self.language, method, code, "Treating error reply as empty: {message}");
                Ok(Value::Null)
            }
            other => other,
        }
    }

    pub async fn document_symbols(&self, path: &Path) -> Result<Vec<DocumentSymbol>, LspError> {
        let Some(target) = self.target(path, None).await? else {
            return Ok(Vec::new());
        };
        if !target.conn.capabilities.document_symbol {
            return Ok(Vec::new());
        }
        let result = self
            .request(
                &target.conn,
                "textDocument/documentSymbol",
                protocol::text_document_params(&target.uri),
            )
            .await?;
        Ok(responses::document_symbols(result))
    }

    pub async fn hover(&self, path: &Path, line: u32, character: u32) -> Result<Option<Hover>, LspError> {
        let Some(target) = self.target(path, Some((line, character))).await? else {
            return Ok(None);
        };
        if !target.conn.capabilities.hover {
            return Ok(None);
        }
        let result = self
            .request(
                &target.conn,
                "textDocument/hover",
                protocol::position_params(&target.uri, line, character),
            )
            .await?;
        Ok(responses::hover(result))
    }

    pub async fn definition(&self, path: &Path, line: u32, character: u32) -> Result<Vec<Location>, LspError> {
        let Some(target) = self.target(path, Some((line, character))).await? else {
            return Ok(Vec::new());
        };
        if !target.conn.capabilities.definition {
            return Ok(Vec::new());
        }
        let result = self
            .request(
                &target.conn,
                "textDocument/definition",
                protocol::position_params(&target.uri, line, character),
            )
            .await?;
        Ok(responses::locations(result))
    }

    pub async fn references(
        &self,
        path: &Path,
        line: u32,
        character: u32,
        include_declaration: bool,
    ) -> Result<Vec<Location>, LspError> {
        let Some(target) = self.target(path, Some((line, character))).await? else {
            return Ok(Vec::new());
        };
        if !target.conn.capabilities.references {
            return Ok(Vec::new());
        }
        let result = self
            .request(
                &target.conn,
                "textDocument/references",
                protocol::reference_params(&target.uri, line, character, include_declaration),
            )
            .await?;
        Ok(responses::locations(result))
    }

    /// Rename the symbol at a position. Every returned edit must replace
    /// its range with exactly `new_name`.
    pub async fn rename(
        &self,
        path: &Path,
        line: u32,
        character: u32,
        new_name: &str,
    ) -> Result<WorkspaceEdit, LspError> {
        let Some(target) = self.target(path, Some((line, character))).await? else {
            return Ok(WorkspaceEdit::default());
        };
        if !target.conn.capabilities.rename {
            return Ok(WorkspaceEdit::default());
        }
        let result = self
            .request(
                &target.conn,
                "textDocument/rename",
                protocol::rename_params(&target.uri, line, character, new_name),
            )
            .await?;
        let edit = responses::workspace_edit(result);
        if let Some((_, bad)) = edit.edits().find(|(_, e)| e.new_text != new_name) {
            return Err(LspError::RenameMismatch {
                language: self.language.clone(),
                expected: new_name.to_string(),
                found: bad.new_text.clone(),
            });
        }
        Ok(edit)
    }

    pub async fn completion(&self, path: &Path, line: u32, character: u32) -> Result<Vec<CompletionItem>, LspError> {
        let Some(target) = self.target(path, Some((line, character))).await? else {
            return Ok(Vec::new());
        };
        if !target.conn.capabilities.completion {
            return Ok(Vec::new());
        }
        let result = self
            .request(
                &target.conn,
                "textDocument/completion",
                protocol::completion_params(&target.uri, line, character),
            )
            .await?;
        Ok(responses::completion_items(result))
    }
}

/// Kill the process once its connection is gone. A server that crashed or
/// wrote garbage is of no further use, and nothing drains its output.
async fn reap_lost_server(
    language: String,
    conn: Weak<Connection>,
    lost: oneshot::Receiver<CloseReason>,
) {
    let Ok(reason) = lost.await else { return };
    if reason == CloseReason::Shutdown {
        return;
    }
    let Some(conn) = conn.upgrade() else { return };
    let child = conn
        .child
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take();
    let Some(mut child) = child else { return };
    tracing::warn!(
        language = %language,
        "Connection lost ({}), killing language server",
        reason.to_error(&language)
    );
    let _ = child.kill().await;
}

impl std::fmt::Debug for LanguageSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LanguageSession")
            .field("language", &self.language)
            .field("state", &self.state().label())
            .finish_non_exhaustive()
    }
}
