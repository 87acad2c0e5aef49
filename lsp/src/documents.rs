//! Open-document registry with per-document version counters.
//!
//! The registry decides *what* to send (`didOpen` vs `didChange`, which
//! version); the session sends it while still holding the registry lock so
//! versions reach the server in the order they were assigned.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::protocol;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct OpenDocument {
    uri: String,
    version: i32,
    /// Length of every line in UTF-16 code units, terminators excluded.
    lines: Vec<usize>,
}

impl OpenDocument {
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Whether `line:character` addresses a place in the last content sent
    /// to the server. The end of a line is addressable.
    pub fn contains_position(&self, line: u32, character: u32) -> bool {
        let (Ok(line), Ok(character)) = (usize::try_from(line), usize::try_from(character)) else {
            return false;
        };
        self.lines.get(line).is_some_and(|len| character <= *len)
    }
}

/// Line lengths as the server counts them: `\n`, `\r\n` and a bare `\r`
/// all end a line, and a trailing terminator opens one more empty line.
fn line_lengths(text: &str) -> Vec<usize> {
    let mut lines = Vec::new();
    let mut current = 0;
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\n' => lines.push(std::mem::take(&mut current)),
            '\r' => {
                chars.next_if_eq(&'\n');
                lines.push(std::mem::take(&mut current));
            }
            c => current += c.len_utf16(),
        }
    }
    lines.push(current);
    lines
}

/// A notification the session must send to keep the server in sync.
#[derive(Debug, PartialEq)]
pub(crate) struct SyncNotification {
    pub method: &'static str,
    pub params: Value,
}

#[derive(Debug, Default)]
pub(crate) struct DocumentRegistry {
    docs: HashMap<PathBuf, OpenDocument>,
}

impl DocumentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &Path) -> Option<&OpenDocument> {
        self.docs.get(path)
    }

    /// Open `path`, or replace its content if it is already open.
    ///
    /// A repeated open keeps the single entry and bumps its version, so the
    /// server sees a `didChange` rather than a second `didOpen`.
    pub fn open(&mut self, path: &Path, uri: &str, language_id: &str, text: &str) -> SyncNotification {
        if let Some(doc) = self.docs.get_mut(path) {
            doc.version += 1;
            doc.lines = line_lengths(text);
            return SyncNotification {
                method: "textDocument/didChange",
                params: protocol::did_change_params(&doc.uri, doc.version, text),
            };
        }

        let doc = OpenDocument {
            uri: uri.to_string(),
            version: 1,
            lines: line_lengths(text),
        };
        let params = protocol::did_open_params(&doc.uri, language_id, doc.version, text);
        self.docs.insert(path.to_path_buf(), doc);
        SyncNotification {
            method: "textDocument/didOpen",
            params,
        }
    }

    /// Replace the content of an open document. `None` if it is not open;
    /// no version is ever issued for an unknown path.
    pub fn change(&mut self, path: &Path, text: &str) -> Option<SyncNotification> {
        let doc = self.docs.get_mut(path)?;
        doc.version += 1;
        doc.lines = line_lengths(text);
        Some(SyncNotification {
            method: "textDocument/didChange",
            params: protocol::did_change_params(&doc.uri, doc.version, text),
        })
    }

    /// Forget `path`. `None` if it was not open.
    pub fn close(&mut self, path: &Path) -> Option<SyncNotification> {
        let doc = self.docs.remove(path)?;
        Some(SyncNotification {
            method: "textDocument/didClose",
            params: protocol::did_close_params(&doc.uri),
        })
    }
}
