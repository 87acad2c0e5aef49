//! Process creation for language servers.
//!
//! Sessions never spawn processes directly; they ask a [`Launcher`] for a
//! byte-stream pair. [`ProcessLauncher`] is the production implementation.

use std::path::Path;
use std::process::Stdio;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};

use crate::config::ServerConfig;
use crate::error::LspError;

/// The two halves of a server connection, plus the process if there is one.
pub struct ServerIo {
    /// Server → client (the child's stdout).
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
    /// Client → server (the child's stdin).
    pub writer: Box<dyn AsyncWrite + Send + Unpin>,
    pub child: Option<Child>,
}

impl ServerIo {
    pub fn new(
        reader: impl AsyncRead + Send + Unpin + 'static,
        writer: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
            child: None,
        }
    }
}

pub trait Launcher: Send + Sync {
    fn launch(
        &self,
        language: &str,
        config: &ServerConfig,
        workspace_root: &Path,
    ) -> Result<ServerIo, LspError>;
}

/// Spawns the configured command with piped stdio.
///
/// The command is resolved through `PATH` first so a missing binary is
/// reported as [`LspError::BinaryNotFound`] rather than a generic spawn
/// failure. stderr is discarded; many servers log heavily there and an
/// unread pipe would eventually block them.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessLauncher;

impl Launcher for ProcessLauncher {
    fn launch(
        &self,
        language: &str,
        config: &ServerConfig,
        workspace_root: &Path,
    ) -> Result<ServerIo, LspError> {
        let resolved = which::which(config.command()).map_err(|source| {
            LspError::BinaryNotFound {
                language: language.to_string(),
                command: config.command().to_string(),
                source,
            }
        })?;

        let mut cmd = Command::new(&resolved);
        cmd.args(config.args())
            .current_dir(workspace_root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| LspError::StartFailed {
            language: language.to_string(),
            reason: format!("spawning {}: {e}", resolved.display()),
        })?;

        let missing = |stream: &str| LspError::StartFailed {
            language: language.to_string(),
            reason: format!("no {stream} from child"),
        };
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
        let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;

        tracing::debug!(
            language,
            command = %resolved.display(),
            pid = child.id(),
            "Spawned language server"
        );

        Ok(ServerIo {
            reader: Box::new(stdout),
            writer: Box::new(stdin),
            child: Some(child),
        })
    }
}
