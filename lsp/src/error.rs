//! Error taxonomy for the LSP client.
//!
//! Every variant that originates inside a session carries the language
//! identifier so callers can tell which failure domain produced it.
//! Unsupported extensions never surface here; they degrade to no-ops.

use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum LspError {
    /// The configured server executable could not be resolved.
    #[error("{language}: language server `{command}` not found: {source}")]
    BinaryNotFound {
        language: String,
        command: String,
        #[source]
        source: which::Error,
    },

    /// The server could not be spawned or failed its initialize handshake.
    #[error("{language}: language server failed to start: {reason}")]
    StartFailed { language: String, reason: String },

    /// The server sent bytes that are not a valid framed JSON-RPC message.
    #[error("{language}: protocol error: {message}")]
    Protocol { language: String, message: String },

    #[error("{language}: `{method}` timed out after {}ms", elapsed.as_millis())]
    RequestTimeout {
        language: String,
        method: String,
        elapsed: Duration,
    },

    /// The server process went away while the session was serving.
    #[error("{language}: language server exited unexpectedly")]
    ServerCrashed { language: String },

    /// The session was shut down while the request was in flight.
    #[error("{language}: session stopped")]
    Stopped { language: String },

    /// The server answered with a JSON-RPC error object.
    #[error("{language}: `{method}` failed ({code}): {message}")]
    Server {
        language: String,
        method: String,
        code: i64,
        message: String,
    },

    #[error("document not open: {}", path.display())]
    DocumentNotOpen { path: PathBuf },

    #[error("cannot convert path to file URI: {}", path.display())]
    InvalidPath { path: PathBuf },

    #[error("reading {}: {source}", path.display())]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A rename edit did not carry the requested name as its replacement.
    #[error("{language}: rename to `{expected}` produced an edit with `{found}`")]
    RenameMismatch {
        language: String,
        expected: String,
        found: String,
    },

    #[error("{0}")]
    Io(#[from] std::io::Error),
}

impl LspError {
    /// Language this error belongs to, if it came from a session.
    #[must_use]
    pub fn language(&self) -> Option<&str> {
        match self {
            Self::BinaryNotFound { language, .. }
            | Self::StartFailed { language, .. }
            | Self::Protocol { language, .. }
            | Self::RequestTimeout { language, .. }
            | Self::ServerCrashed { language }
            | Self::Stopped { language }
            | Self::Server { language, .. }
            | Self::RenameMismatch { language, .. } => Some(language),
            Self::DocumentNotOpen { .. }
            | Self::InvalidPath { .. }
            | Self::ReadFile { .. }
            | Self::Io(_) => None,
        }
    }

    /// Whether the session that produced this error is no longer serving.
    ///
    /// Timeouts and server error replies leave the session intact.
    #[must_use]
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            Self::BinaryNotFound { .. }
                | Self::StartFailed { .. }
                | Self::Protocol { .. }
                | Self::ServerCrashed { .. }
        )
    }
}
