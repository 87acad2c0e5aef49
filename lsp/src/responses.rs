//! Normalization of server results into the public value types.
//!
//! Servers pick among several legal result shapes for the same request.
//! Every function here accepts all of them (plus `null`) and never fails:
//! unrecognized entries are skipped with a trace log.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

use crate::types::{
    CompletionItem, CompletionItemKind, Diagnostic, DiagnosticSeverity, DocumentSymbol, Hover,
    Location, Range, SymbolKind, TextDocumentEdit, TextEdit, WorkspaceEdit,
};

#[derive(Debug, Deserialize)]
pub(crate) struct PublishDiagnosticsParams {
    pub uri: String,
    #[serde(default)]
    pub diagnostics: Vec<LspDiagnostic>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LspDiagnostic {
    pub range: Range,
    pub severity: Option<u64>,
    pub source: Option<String>,
    pub message: String,
}

impl LspDiagnostic {
    /// Missing or out-of-range severity is reported as a warning.
    pub fn into_diagnostic(self) -> Diagnostic {
        Diagnostic::new(
            self.range,
            self.severity
                .and_then(DiagnosticSeverity::from_lsp)
                .unwrap_or(DiagnosticSeverity::Warning),
            self.message,
            self.source.unwrap_or_else(|| String::from("unknown")),
        )
    }
}

fn parse<T: for<'de> Deserialize<'de>>(value: Value, what: &str) -> Option<T> {
    match serde_json::from_value(value) {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::trace!("skipping unrecognized {what}: {e}");
            None
        }
    }
}

/// `Location | Location[] | LocationLink[] | null`.
pub(crate) fn locations(result: Value) -> Vec<Location> {
    match result {
        Value::Null => Vec::new(),
        Value::Array(items) => items.into_iter().filter_map(location_or_link).collect(),
        single => location_or_link(single).into_iter().collect(),
    }
}

fn location_or_link(value: Value) -> Option<Location> {
    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct LocationLink {
        target_uri: String,
        target_range: Range,
        target_selection_range: Option<Range>,
    }

    if value.get("targetUri").is_some() {
        let link: LocationLink = parse(value, "location link")?;
        return Some(Location {
            uri: link.target_uri,
            range: link.target_selection_range.unwrap_or(link.target_range),
        });
    }
    parse(value, "location")
}

/// `DocumentSymbol[] | SymbolInformation[] | null`, siblings sorted by
/// start position.
pub(crate) fn document_symbols(result: Value) -> Vec<DocumentSymbol> {
    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct RawSymbol {
        name: String,
        detail: Option<String>,
        kind: Option<u64>,
        // Hierarchical form
        range: Option<Range>,
        selection_range: Option<Range>,
        #[serde(default)]
        children: Vec<Value>,
        // Flat SymbolInformation form
        location: Option<Location>,
    }

    fn convert(value: Value) -> Option<DocumentSymbol> {
        let raw: RawSymbol = parse(value, "document symbol")?;
        let range = raw.range.or(raw.location.map(|l| l.range))?;
        let mut children: Vec<DocumentSymbol> =
            raw.children.into_iter().filter_map(convert).collect();
        sort_symbols(&mut children);
        Some(DocumentSymbol {
            name: raw.name,
            detail: raw.detail.filter(|d| !d.is_empty()),
            kind: raw.kind.and_then(SymbolKind::from_lsp),
            range,
            selection_range: raw.selection_range.unwrap_or(range),
            children,
        })
    }

    let Value::Array(items) = result else {
        return Vec::new();
    };
    let mut symbols: Vec<DocumentSymbol> = items.into_iter().filter_map(convert).collect();
    sort_symbols(&mut symbols);
    symbols
}

fn sort_symbols(symbols: &mut [DocumentSymbol]) {
    symbols.sort_by(|a, b| {
        a.range
            .start
            .cmp(&b.range.start)
            .then_with(|| a.name.cmp(&b.name))
    });
}

/// `Hover | null`. Empty contents count as no hover.
pub(crate) fn hover(result: Value) -> Option<Hover> {
    if result.is_null() {
        return None;
    }
    let contents = markup_text(result.get("contents")?);
    if contents.trim().is_empty() {
        return None;
    }
    let range = result
        .get("range")
        .cloned()
        .and_then(|r| parse(r, "hover range"));
    Some(Hover { contents, range })
}

/// Flatten `MarkupContent | MarkedString | MarkedString[]` to text.
/// Language-tagged strings become fenced code blocks.
fn markup_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(parts) => parts
            .iter()
            .map(markup_text)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n"),
        Value::Object(obj) => {
            let text = obj.get("value").and_then(Value::as_str).unwrap_or_default();
            match obj.get("language").and_then(Value::as_str) {
                Some(lang) => format!("```{lang}\n{text}\n```"),
                None => text.to_string(),
            }
        }
        _ => String::new(),
    }
}

/// `CompletionItem[] | CompletionList | null`.
pub(crate) fn completion_items(result: Value) -> Vec<CompletionItem> {
    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct RawItem {
        label: String,
        kind: Option<u64>,
        detail: Option<String>,
        documentation: Option<Value>,
        insert_text: Option<String>,
    }

    let items = match result {
        Value::Array(items) => items,
        Value::Object(mut list) => match list.remove("items") {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    };

    items
        .into_iter()
        .filter_map(|v| parse::<RawItem>(v, "completion item"))
        .map(|raw| CompletionItem {
            label: raw.label,
            kind: raw.kind.and_then(CompletionItemKind::from_lsp),
            detail: raw.detail,
            documentation: raw
                .documentation
                .as_ref()
                .map(markup_text)
                .filter(|d| !d.is_empty()),
            insert_text: raw.insert_text,
        })
        .collect()
}

/// `WorkspaceEdit | null`. In the `documentChanges` form, create/rename/
/// delete file operations are skipped; only text edits are returned.
pub(crate) fn workspace_edit(result: Value) -> WorkspaceEdit {
    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct RawEdit {
        changes: Option<BTreeMap<String, Vec<TextEdit>>>,
        document_changes: Option<Vec<Value>>,
    }

    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct RawDocumentEdit {
        text_document: RawVersionedId,
        edits: Vec<TextEdit>,
    }

    #[derive(Deserialize)]
    struct RawVersionedId {
        uri: String,
        version: Option<i32>,
    }

    if result.is_null() {
        return WorkspaceEdit::default();
    }
    let Some(raw) = parse::<RawEdit>(result, "workspace edit") else {
        return WorkspaceEdit::default();
    };

    if let Some(changes) = raw.document_changes {
        let docs = changes
            .into_iter()
            .filter(|c| c.get("textDocument").is_some())
            .filter_map(|c| parse::<RawDocumentEdit>(c, "text document edit"))
            .map(|d| TextDocumentEdit {
                uri: d.text_document.uri,
                version: d.text_document.version,
                edits: d.edits,
            })
            .collect();
        return WorkspaceEdit::DocumentChanges(docs);
    }
    WorkspaceEdit::Changes(raw.changes.unwrap_or_default())
}
