//! Public value types returned by [`LspManager`](crate::LspManager).
//!
//! These are normalized forms of the LSP wire shapes. Position, Range,
//! Location and TextEdit share field names with the protocol, so they
//! deserialize straight from server results.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::protocol;

/// Zero-based line and character offset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

impl Position {
    #[must_use]
    pub const fn new(line: u32, character: u32) -> Self {
        Self { line, character }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

impl Range {
    #[must_use]
    pub const fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }

    /// Whether the two ranges share at least one character.
    /// Touching ranges (`a.end == b.start`) do not overlap.
    #[must_use]
    pub fn overlaps(&self, other: &Range) -> bool {
        self.start < other.end && other.start < self.end
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub uri: String,
    pub range: Range,
}

impl Location {
    /// Filesystem path for a `file://` location.
    #[must_use]
    pub fn path(&self) -> Option<PathBuf> {
        protocol::file_uri_to_path(&self.uri)
    }
}

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticSeverity {
    Error = 1,
    Warning = 2,
    Information = 3,
    Hint = 4,
}

impl DiagnosticSeverity {
    /// Convert from LSP numeric severity (1=Error, 2=Warning, 3=Info, 4=Hint).
    #[must_use]
    pub fn from_lsp(value: u64) -> Option<Self> {
        match value {
            1 => Some(Self::Error),
            2 => Some(Self::Warning),
            3 => Some(Self::Information),
            4 => Some(Self::Hint),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_error(self) -> bool {
        self == Self::Error
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Information => "info",
            Self::Hint => "hint",
        }
    }
}

/// A single diagnostic pushed by a language server.
///
/// Fields are private; diagnostics are only produced from
/// `textDocument/publishDiagnostics` notifications.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    range: Range,
    severity: DiagnosticSeverity,
    message: String,
    /// Producer label (e.g. "rustc", "Pyright"); "unknown" when omitted.
    source: String,
}

impl Diagnostic {
    #[must_use]
    pub fn new(
        range: Range,
        severity: DiagnosticSeverity,
        message: String,
        source: String,
    ) -> Self {
        Self {
            range,
            severity,
            message,
            source,
        }
    }

    #[must_use]
    pub fn range(&self) -> Range {
        self.range
    }

    #[must_use]
    pub fn severity(&self) -> DiagnosticSeverity {
        self.severity
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Format as `path:line:col: severity: [source] message`, 1-indexed.
    #[must_use]
    pub fn display_with_path(&self, path: &std::path::Path) -> String {
        format!(
            "{}:{}:{}: {}: [{}] {}",
            path.display(),
            self.range.start.line + 1,
            self.range.start.character + 1,
            self.severity.label(),
            self.source,
            self.message,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextEdit {
    pub range: Range,
    #[serde(rename = "newText")]
    pub new_text: String,
}

/// Edits against one versioned document (`documentChanges` form).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextDocumentEdit {
    pub uri: String,
    /// `None` when the server did not pin a version.
    pub version: Option<i32>,
    pub edits: Vec<TextEdit>,
}

/// Result of a rename: text replacements across one or more files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkspaceEdit {
    Changes(BTreeMap<String, Vec<TextEdit>>),
    DocumentChanges(Vec<TextDocumentEdit>),
}

impl Default for WorkspaceEdit {
    fn default() -> Self {
        Self::Changes(BTreeMap::new())
    }
}

impl WorkspaceEdit {
    /// Every `(uri, edit)` pair, in document order.
    pub fn edits(&self) -> Box<dyn Iterator<Item = (&str, &TextEdit)> + '_> {
        match self {
            Self::Changes(map) => Box::new(
                map.iter()
                    .flat_map(|(uri, edits)| edits.iter().map(move |e| (uri.as_str(), e))),
            ),
            Self::DocumentChanges(docs) => Box::new(
                docs.iter()
                    .flat_map(|d| d.edits.iter().map(move |e| (d.uri.as_str(), e))),
            ),
        }
    }

    #[must_use]
    pub fn edit_count(&self) -> usize {
        self.edits().count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.edits().next().is_none()
    }
}

macro_rules! lsp_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident { $($variant:ident = $value:literal => $label:literal,)+ }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant = $value,)+
        }

        impl $name {
            /// Convert from the protocol's numeric value.
            #[must_use]
            pub fn from_lsp(value: u64) -> Option<Self> {
                match value {
                    $($value => Some(Self::$variant),)+
                    _ => None,
                }
            }

            #[must_use]
            pub fn label(self) -> &'static str {
                match self {
                    $(Self::$variant => $label,)+
                }
            }
        }

        impl Serialize for $name {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.label())
            }
        }
    };
}

lsp_enum! {
    /// Kind of a document symbol.
    pub enum SymbolKind {
        File = 1 => "file",
        Module = 2 => "module",
        Namespace = 3 => "namespace",
        Package = 4 => "package",
        Class = 5 => "class",
        Method = 6 => "method",
        Property = 7 => "property",
        Field = 8 => "field",
        Constructor = 9 => "constructor",
        Enum = 10 => "enum",
        Interface = 11 => "interface",
        Function = 12 => "function",
        Variable = 13 => "variable",
        Constant = 14 => "constant",
        String = 15 => "string",
        Number = 16 => "number",
        Boolean = 17 => "boolean",
        Array = 18 => "array",
        Object = 19 => "object",
        Key = 20 => "key",
        Null = 21 => "null",
        EnumMember = 22 => "enum_member",
        Struct = 23 => "struct",
        Event = 24 => "event",
        Operator = 25 => "operator",
        TypeParameter = 26 => "type_parameter",
    }
}

lsp_enum! {
    /// Kind of a completion item.
    pub enum CompletionItemKind {
        Text = 1 => "text",
        Method = 2 => "method",
        Function = 3 => "function",
        Constructor = 4 => "constructor",
        Field = 5 => "field",
        Variable = 6 => "variable",
        Class = 7 => "class",
        Interface = 8 => "interface",
        Module = 9 => "module",
        Property = 10 => "property",
        Unit = 11 => "unit",
        Value = 12 => "value",
        Enum = 13 => "enum",
        Keyword = 14 => "keyword",
        Snippet = 15 => "snippet",
        Color = 16 => "color",
        File = 17 => "file",
        Reference = 18 => "reference",
        Folder = 19 => "folder",
        EnumMember = 20 => "enum_member",
        Constant = 21 => "constant",
        Struct = 22 => "struct",
        Event = 23 => "event",
        Operator = 24 => "operator",
        TypeParameter = 25 => "type_parameter",
    }
}

/// A named, range-bound code element, possibly with nested children.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentSymbol {
    pub name: String,
    pub detail: Option<String>,
    pub kind: Option<SymbolKind>,
    /// Full extent of the symbol, including its body.
    pub range: Range,
    /// The identifier itself; what an editor highlights on navigation.
    pub selection_range: Range,
    pub children: Vec<DocumentSymbol>,
}

impl DocumentSymbol {
    /// Depth-first walk over this symbol and all descendants.
    pub fn walk(&self) -> Box<dyn Iterator<Item = &DocumentSymbol> + '_> {
        Box::new(std::iter::once(self).chain(self.children.iter().flat_map(DocumentSymbol::walk)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionItem {
    pub label: String,
    pub kind: Option<CompletionItemKind>,
    pub detail: Option<String>,
    pub documentation: Option<String>,
    pub insert_text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Hover {
    /// Hover contents flattened to a single text block.
    pub contents: String,
    pub range: Option<Range>,
}

/// Lifecycle state of a language session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    NotStarted,
    Starting,
    AwaitingInitializeResponse,
    Ready,
    ShuttingDown,
    Stopped,
    StartFailed { reason: String },
    Crashed { reason: String },
}

impl SessionState {
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    /// `StartFailed` or `Crashed`. Neither is permanent; the next use
    /// of the session starts it again.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::StartFailed { .. } | Self::Crashed { .. })
    }

    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Starting => "starting",
            Self::AwaitingInitializeResponse => "awaiting_initialize_response",
            Self::Ready => "ready",
            Self::ShuttingDown => "shutting_down",
            Self::Stopped => "stopped",
            Self::StartFailed { .. } => "start_failed",
            Self::Crashed { .. } => "crashed",
        }
    }
}
