//! LSP message shapes used by the server.
//!
//! Incoming params are deserialized into the few fields the server reads;
//! everything else the client sends is ignored. Outgoing messages are built
//! as `serde_json::Value`s.

use std::path::{Path, PathBuf};

use lintlink_types::{Diagnostic, Edit, InvertedRange, Position, Range};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use url::Url;

pub(crate) const SOURCE: &str = "lintlink";
pub(crate) const REFRESH_COMMAND: &str = "lintlink.refresh";

pub(crate) const INVALID_REQUEST: i64 = -32600;
pub(crate) const METHOD_NOT_FOUND: i64 = -32601;
pub(crate) const INVALID_PARAMS: i64 = -32602;
pub(crate) const SERVER_NOT_INITIALIZED: i64 = -32002;

/// `MessageType` of `window/showMessage` and `window/logMessage`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MessageType {
    Error = 1,
    Warning = 2,
    Info = 3,
}

#[derive(Debug, thiserror::Error)]
#[error("cannot convert path to file URI: {}", path.display())]
pub(crate) struct PathToUriError {
    path: PathBuf,
}

#[derive(Debug, Serialize)]
pub(crate) struct Notification {
    pub jsonrpc: &'static str,
    pub method: &'static str,
    pub params: Value,
}

impl Notification {
    pub fn new(method: &'static str, params: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            method,
            params,
        }
    }
}

pub(crate) fn response(id: &Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

pub(crate) fn error_response(id: &Value, code: i64, message: impl Into<String>) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message.into() }
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct InitializeParams {
    pub root_uri: Option<String>,
    pub workspace_folders: Option<Vec<WorkspaceFolder>>,
    pub initialization_options: Option<Value>,
}

impl InitializeParams {
    /// First workspace folder, else `rootUri`.
    pub fn workspace_root(&self) -> Option<PathBuf> {
        self.workspace_folders
            .iter()
            .flatten()
            .map(|folder| folder.uri.as_str())
            .chain(self.root_uri.as_deref())
            .find_map(file_uri_to_path)
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct WorkspaceFolder {
    pub uri: String,
}

/// Any params carrying a `textDocument` identifier: didOpen, didChange,
/// didSave, didClose and textDocument/diagnostic.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TextDocumentParams {
    pub text_document: TextDocumentIdentifier,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TextDocumentIdentifier {
    pub uri: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CodeActionParams {
    pub text_document: TextDocumentIdentifier,
    pub range: LspRange,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ExecuteCommandParams {
    pub command: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct LspPosition {
    pub line: u32,
    pub character: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct LspRange {
    pub start: LspPosition,
    pub end: LspPosition,
}

impl LspRange {
    pub fn to_range(self) -> Result<Range, InvertedRange> {
        Range::new(
            Position::new(self.start.line, self.start.character),
            Position::new(self.end.line, self.end.character),
        )
    }
}

impl From<Range> for LspRange {
    fn from(range: Range) -> Self {
        let position = |p: Position| LspPosition {
            line: p.line,
            character: p.character,
        };
        Self {
            start: position(range.start()),
            end: position(range.end()),
        }
    }
}

pub(crate) fn server_capabilities() -> Value {
    json!({
        "positionEncoding": "utf-16",
        "textDocumentSync": {
            "openClose": true,
            // Full
            "change": 1,
            "save": { "includeText": false }
        },
        "codeActionProvider": { "codeActionKinds": ["quickfix"] },
        "diagnosticProvider": {
            "identifier": SOURCE,
            "interFileDependencies": true,
            "workspaceDiagnostics": true
        },
        "executeCommandProvider": { "commands": [REFRESH_COMMAND] }
    })
}

/// An LSP `Diagnostic`. The rendered detail, when present, is the message:
/// it carries the source snippet and notes the short message lacks.
pub(crate) fn diagnostic_to_lsp(diagnostic: &Diagnostic) -> Value {
    let mut value = json!({
        "range": LspRange::from(diagnostic.range()),
        "severity": diagnostic.severity().to_lsp(),
        "source": SOURCE,
        "message": diagnostic.detail().unwrap_or(diagnostic.message()),
    });
    if let Some(replacement) = diagnostic.suggested_replacement() {
        value["data"] = json!({ "corrections": [replacement] });
    }
    value
}

pub(crate) fn code_action(uri: &Url, edit: &Edit) -> Value {
    json!({
        "title": edit.title,
        "kind": "quickfix",
        "isPreferred": true,
        "edit": {
            "changes": {
                uri.as_str(): [{
                    "range": LspRange::from(edit.range),
                    "newText": edit.new_text,
                }]
            }
        }
    })
}

pub(crate) fn message_params(kind: MessageType, message: &str) -> Value {
    json!({ "type": kind as u8, "message": message })
}

pub(crate) fn path_to_file_uri(path: &Path) -> Result<Url, PathToUriError> {
    Url::from_file_path(path).map_err(|()| PathToUriError {
        path: path.to_path_buf(),
    })
}

pub(crate) fn file_uri_to_path(uri: &str) -> Option<PathBuf> {
    Url::parse(uri).ok().and_then(|u| u.to_file_path().ok())
}
