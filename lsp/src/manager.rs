//! `LspManager`: the public operation surface.
//!
//! Routes each call by file extension to a per-language session, creating
//! the session on first use. Paths with no configured language are
//! silently ignored: opens are no-ops and queries return empty results.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::task::JoinSet;

use crate::config::LspConfig;
use crate::diagnostics::DiagnosticsDispatcher;
use crate::error::LspError;
use crate::launcher::{Launcher, ProcessLauncher};
use crate::protocol;
use crate::session::LanguageSession;
use crate::types::{
    CompletionItem, Diagnostic, DocumentSymbol, Hover, Location, SessionState, WorkspaceEdit,
};

/// Multiplexes one language server per configured language behind a
/// single API. Cheap to share behind an `Arc`; every method takes `&self`.
pub struct LspManager {
    config: LspConfig,
    /// Extension (e.g. "rs") → language (e.g. "rust").
    routes: HashMap<String, String>,
    workspace_root: PathBuf,
    launcher: Arc<dyn Launcher>,
    sessions: Mutex<HashMap<String, Arc<LanguageSession>>>,
    diagnostics: DiagnosticsDispatcher,
}

impl LspManager {
    /// Create a manager that spawns real server processes. No server is
    /// started until a file of its language is used.
    pub fn new(config: LspConfig, workspace_root: impl AsRef<Path>) -> Result<Self, LspError> {
        Self::with_launcher(config, workspace_root, Arc::new(ProcessLauncher))
    }

    pub fn with_launcher(
        config: LspConfig,
        workspace_root: impl AsRef<Path>,
        launcher: Arc<dyn Launcher>,
    ) -> Result<Self, LspError> {
        let workspace_root = protocol::normalize_path(&std::path::absolute(workspace_root)?);
        if protocol::path_to_file_uri(&workspace_root).is_none() {
            return Err(LspError::InvalidPath {
                path: workspace_root,
            });
        }
        let routes = config.extension_map();
        let diagnostics = DiagnosticsDispatcher::start()?;
        tracing::debug!(
            root = %workspace_root.display(),
            languages = config.servers().len(),
            "LSP manager created"
        );
        Ok(Self {
            config,
            routes,
            workspace_root,
            launcher,
            sessions: Mutex::new(HashMap::new()),
            diagnostics,
        })
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    /// The configured language for `path`, by extension (case-insensitive).
    pub fn language_for_path(&self, path: impl AsRef<Path>) -> Option<&str> {
        let ext = path.as_ref().extension()?.to_str()?.to_ascii_lowercase();
        self.routes.get(&ext).map(String::as_str)
    }

    /// Register the sink for every session's diagnostics pushes. Replaces
    /// any previous handler. It runs on a dedicated thread, never on a
    /// reader task, and a panic inside it is logged and contained.
    pub fn set_diagnostic_handler<F>(&self, handler: F)
    where
        F: Fn(&str, &[Diagnostic]) + Send + Sync + 'static,
    {
        self.diagnostics.set_handler(Arc::new(handler));
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<String, Arc<LanguageSession>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            protocol::normalize_path(path)
        } else {
            protocol::normalize_path(&self.workspace_root.join(path))
        }
    }

    /// Route `path` to its session, creating the session if needed.
    /// `None` for unsupported extensions.
    fn route(&self, path: &Path) -> Result<Option<(Arc<LanguageSession>, PathBuf)>, LspError> {
        let Some(language) = self.language_for_path(path) else {
            tracing::trace!(path = %path.display(), "No language server for file");
            return Ok(None);
        };
        let Some(server) = self.config.server(language) else {
            return Ok(None);
        };

        let mut sessions = self.sessions();
        let session = match sessions.get(language) {
            Some(session) => session.clone(),
            None => {
                let session = Arc::new(LanguageSession::new(
                    language,
                    server.clone(),
                    self.config.timeouts(),
                    &self.workspace_root,
                    self.launcher.clone(),
                    self.diagnostics.sender(),
                )?);
                sessions.insert(language.to_string(), session.clone());
                session
            }
        };
        Ok(Some((session, self.resolve_path(path))))
    }

    /// Open `path` with `content`, starting its language server if needed.
    /// Opening an already-open file replaces its content.
    pub async fn open_file(&self, path: impl AsRef<Path>, content: &str) -> Result<(), LspError> {
        let Some((session, path)) = self.route(path.as_ref())? else {
            return Ok(());
        };
        session.open(&path, content).await
    }

    /// Close `path`. A no-op for files that are not open.
    pub fn close_file(&self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        let Some(language) = self.language_for_path(path) else {
            return;
        };
        let session = self.sessions().get(language).cloned();
        if let Some(session) = session {
            session.close(&self.resolve_path(path));
        }
    }

    /// Replace the content of an open file. Fails with
    /// [`LspError::DocumentNotOpen`] if it was never opened.
    pub fn change_file(&self, path: impl AsRef<Path>, content: &str) -> Result<(), LspError> {
        let path = path.as_ref();
        let Some(language) = self.language_for_path(path) else {
            return Ok(());
        };
        let session = self.sessions().get(language).cloned();
        let resolved = self.resolve_path(path);
        match session {
            Some(session) => session.change(&resolved, content),
            None => Err(LspError::DocumentNotOpen { path: resolved }),
        }
    }

    pub async fn document_symbols(&self, path: impl AsRef<Path>) -> Result<Vec<DocumentSymbol>, LspError> {
        match self.route(path.as_ref())? {
            Some((session, path)) => session.document_symbols(&path).await,
            None => Ok(Vec::new()),
        }
    }

    /// Hover text at a zero-based position. `None` when the server has
    /// nothing to say or the position is past the end of the file.
    pub async fn hover(
        &self,
        path: impl AsRef<Path>,
        line: u32,
        character: u32,
    ) -> Result<Option<Hover>, LspError> {
        match self.route(path.as_ref())? {
            Some((session, path)) => session.hover(&path, line, character).await,
            None => Ok(None),
        }
    }

    pub async fn definition(
        &self,
        path: impl AsRef<Path>,
        line: u32,
        character: u32,
    ) -> Result<Vec<Location>, LspError> {
        match self.route(path.as_ref())? {
            Some((session, path)) => session.definition(&path, line, character).await,
            None => Ok(Vec::new()),
        }
    }

    pub async fn references(
        &self,
        path: impl AsRef<Path>,
        line: u32,
        character: u32,
        include_declaration: bool,
    ) -> Result<Vec<Location>, LspError> {
        match self.route(path.as_ref())? {
            Some((session, path)) => {
                session
                    .references(&path, line, character, include_declaration)
                    .await
            }
            None => Ok(Vec::new()),
        }
    }

    /// Rename the symbol at a position. An empty edit is a valid answer;
    /// an edit whose text is not exactly `new_name` is rejected with
    /// [`LspError::RenameMismatch`].
    pub async fn rename(
        &self,
        path: impl AsRef<Path>,
        line: u32,
        character: u32,
        new_name: &str,
    ) -> Result<WorkspaceEdit, LspError> {
        match self.route(path.as_ref())? {
            Some((session, path)) => session.rename(&path, line, character, new_name).await,
            None => Ok(WorkspaceEdit::default()),
        }
    }

    pub async fn completion(
        &self,
        path: impl AsRef<Path>,
        line: u32,
        character: u32,
    ) -> Result<Vec<CompletionItem>, LspError> {
        match self.route(path.as_ref())? {
            Some((session, path)) => session.completion(&path, line, character).await,
            None => Ok(Vec::new()),
        }
    }

    /// Stop every session and return it to `NotStarted`; the next use
    /// starts a fresh server.
    pub async fn reload(&self) {
        tracing::info!("Reloading language servers");
        self.shutdown_sessions(true).await;
    }

    /// Gracefully stop every session. The manager stays usable.
    pub async fn stop_all(&self) {
        self.shutdown_sessions(false).await;
    }

    async fn shutdown_sessions(&self, restartable: bool) {
        let sessions: Vec<Arc<LanguageSession>> = self.sessions().values().cloned().collect();
        let mut tasks = JoinSet::new();
        for session in sessions {
            tasks.spawn(async move { session.shutdown(restartable).await });
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::warn!("Session shutdown task failed: {e}");
            }
        }
    }

    /// State of every configured language. Languages never used report
    /// `NotStarted`.
    pub fn statuses(&self) -> BTreeMap<String, SessionState> {
        let mut statuses: BTreeMap<String, SessionState> = self
            .config
            .servers()
            .keys()
            .map(|language| (language.clone(), SessionState::NotStarted))
            .collect();
        let sessions: Vec<(String, Arc<LanguageSession>)> = self
            .sessions()
            .iter()
            .map(|(language, session)| (language.clone(), session.clone()))
            .collect();
        for (language, session) in sessions {
            statuses.insert(language, session.state());
        }
        statuses
    }
}

impl std::fmt::Debug for LspManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LspManager")
            .field("workspace_root", &self.workspace_root)
            .field("languages", &self.config.servers().keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
