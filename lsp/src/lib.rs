//! Multiplexed Language Server Protocol client.
//!
//! One [`LspManager`] owns a session per configured language, starts each
//! server lazily on first use of a matching file, and exposes symbol,
//! navigation, rename and completion queries plus pushed diagnostics.

pub mod codec;
pub mod config;
pub mod error;
pub mod launcher;
pub mod types;

pub(crate) mod diagnostics;
pub(crate) mod documents;
pub(crate) mod pending;
pub(crate) mod protocol;
pub(crate) mod responses;
pub(crate) mod session;
pub(crate) mod transport;

mod manager;

pub use config::{ConfigError, LspConfig, ServerConfig, Timeouts};
pub use diagnostics::DiagnosticHandler;
pub use error::LspError;
pub use launcher::{Launcher, ProcessLauncher, ServerIo};
pub use manager::LspManager;
pub use types::{
    CompletionItem, CompletionItemKind, Diagnostic, DiagnosticSeverity, DocumentSymbol, Hover,
    Location, Position, Range, SessionState, SymbolKind, TextDocumentEdit, TextEdit,
    WorkspaceEdit,
};
